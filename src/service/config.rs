// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

extern crate config as _;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};
use crate::network::WireMode;

/// default transfer timeout of a connection, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 180;

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub wire_mode: WireMode,
    /// read/write deadline applied to every socket operation
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// largest body a frame header may declare, 0 means unlimited
    #[serde(default)]
    pub max_body_size: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 0,
            wire_mode: WireMode::default(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_body_size: 0,
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub network: NetworkConfig,
}

impl EngineConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<EngineConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .build()?;

        let engine_config: EngineConfig = config.try_deserialize()?;
        if engine_config.network.timeout_secs == 0 {
            return Err(AppError::InvalidValue(
                "network.timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(engine_config)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::Builder;

    use super::*;

    fn write_conf(content: &str) -> tempfile::NamedTempFile {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_full_config() -> AppResult<()> {
        let file = write_conf(
            r#"
[network]
ip = "0.0.0.0"
port = 9092
wire_mode = "line"
timeout_secs = 30
max_body_size = 4096
"#,
        );
        let config = EngineConfig::set_up_config(file.path())?;
        assert_eq!(config.network.listen_address(), "0.0.0.0:9092");
        assert_eq!(config.network.wire_mode, WireMode::Line);
        assert_eq!(config.network.timeout(), Duration::from_secs(30));
        assert_eq!(config.network.max_body_size, 4096);
        Ok(())
    }

    #[test]
    fn test_defaults_applied() -> AppResult<()> {
        let file = write_conf(
            r#"
[network]
ip = "127.0.0.1"
port = 7000
"#,
        );
        let config = EngineConfig::set_up_config(file.path())?;
        assert_eq!(config.network.wire_mode, WireMode::Framed);
        assert_eq!(config.network.timeout_secs, DEFAULT_TIMEOUT_SECS);
        assert_eq!(config.network.max_body_size, 0);
        Ok(())
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let file = write_conf(
            r#"
[network]
ip = "127.0.0.1"
port = 7000
timeout_secs = 0
"#,
        );
        assert!(EngineConfig::set_up_config(file.path()).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(EngineConfig::set_up_config("/definitely/not/here/conf.toml").is_err());
    }
}
