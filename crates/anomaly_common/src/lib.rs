pub mod config;
pub mod error;
pub mod isolation;

pub use config::{EngineConfig, HarnessConfig, RetrySettings, TrialConfig};
pub use error::{ErrorKind, HarnessError, HarnessResult};
pub use isolation::{Engine, IsolationLevel, TxOptions};
