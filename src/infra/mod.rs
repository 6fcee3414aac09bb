pub mod config;
pub mod logging;

pub use config::RuntimeConfig;
pub use logging::init_tracing;
