pub use app_error::{AppError, AppResult};
pub use config::{EngineConfig, NetworkConfig, DEFAULT_TIMEOUT_SECS};
pub use engine::{Engine, Stats};
pub use error_code::{ErrorCode, ErrorRegistry, MIN_USER_ERROR};
pub use shutdown::ShutdownCoordinator;
pub use tracing_config::{install_panic_hook, setup_local_tracing, setup_tracing, TracingGuard};

mod app_error;
mod config;
mod engine;
mod error_code;
mod shutdown;
mod tracing_config;
