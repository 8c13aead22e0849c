pub mod config;
pub mod error;

pub use config::GuardianConfig;
pub use error::{GuardianError, Result};
