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

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use clap::Parser;
use stonenet::{setup_tracing, AppResult, Connection, Engine, EngineConfig, Handler, Message};
use tokio::{runtime, signal};
use tracing::info;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// directory for rolling log files
    #[arg(long, default_value = "logs")]
    pub log_dir: String,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

/// Sends every message straight back to its sender.
struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn on_new_connection(&self, conn: &Arc<Connection>) -> bool {
        info!(
            "echo accept connection {} from {:?}",
            conn.id(),
            conn.remote_addr()
        );
        true
    }

    fn on_connection_closed(&self, conn: &Connection) {
        info!("echo connection {} closed", conn.id());
    }

    async fn on_message(&self, conn: &Arc<Connection>, msg: Message) -> bool {
        // line records still carry their delimiter
        let body = msg.body().cloned().unwrap_or_default();
        let reply = match msg.head() {
            Some(head) => Message::new(*head, body),
            None => Message::raw(body),
        };
        conn.send(reply).await
    }
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let engine_config = EngineConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", engine_config);
        return Ok(());
    }

    let _tracing_guard = setup_tracing(&commandline.log_dir)?;

    // startup tokio runtime
    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(async move {
        let network = engine_config.network.clone();
        let engine = Engine::new(engine_config);
        let listener = engine
            .listen(
                network.listen_address(),
                network.wire_mode,
                Arc::new(EchoHandler),
                None,
            )
            .await?;
        info!(
            "stonenet listening on {} in {:?} mode",
            listener.local_addr(),
            network.wire_mode
        );

        signal::ctrl_c().await?;
        info!("get shutdown signal");
        engine.stop().await;
        info!("stonenet shutdown complete");
        AppResult::Ok(())
    })
}
