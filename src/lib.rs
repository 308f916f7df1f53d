pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use crate::config::{ClientConfig, ConfigError};
pub use crate::core::*;
pub use crate::errors::{ErrorCode, ServiceKind, SessionError, SessionResult};
