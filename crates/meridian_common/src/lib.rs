pub mod config;
pub mod error;

pub use config::PlannerConfig;
pub use error::{ErrorCode, ErrorKind, PlanError, PlanResult};
