use thiserror::Error;

/// Convenience alias for `Result<T, HarnessError>`.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error classification for trial bookkeeping.
///
/// - `Fatal`: the harness itself is broken (connection, setup, config); stop the run
/// - `Conflict`: the engine aborted a transaction to preserve isolation; scenarios fold it in
/// - `Trial`: the enclosing trial fails, the run continues with the next trial
/// - `Assertion`: an anomaly did or did not manifest contrary to expectation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Fatal,
    Conflict,
    Trial,
    Assertion,
}

/// SQLSTATE codes the harness reacts to.
pub mod sqlstate {
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const INTEGRITY_CONSTRAINT_VIOLATION: &str = "23000";
}

/// MySQL server error codes the harness reacts to.
pub mod mysql_code {
    /// ER_LOCK_DEADLOCK: InnoDB picked this transaction as a deadlock victim.
    pub const LOCK_DEADLOCK: u16 = 1213;
    /// ER_LOCK_WAIT_TIMEOUT
    pub const LOCK_WAIT_TIMEOUT: u16 = 1205;
    /// ER_DUP_ENTRY
    pub const DUP_ENTRY: u16 = 1062;
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Statement error [{}]: {message} (sql: {sql})", .sqlstate.as_deref().unwrap_or("-"))]
    Statement {
        sql: String,
        sqlstate: Option<String>,
        message: String,
    },

    #[error("Serialization conflict [{sqlstate}]: {message}")]
    SerializationConflict { sqlstate: String, message: String },

    #[error("Concurrent body {body} panicked: {message}")]
    BodyPanicked { body: usize, message: String },

    #[error("Gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Expectation failed for {scenario}: {detail}")]
    ExpectationFailed { scenario: String, detail: String },
}

impl HarnessError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::Connection(_) | HarnessError::Setup(_) | HarnessError::Config(_) => {
                ErrorKind::Fatal
            }
            HarnessError::SerializationConflict { .. } => ErrorKind::Conflict,
            HarnessError::Statement { .. }
            | HarnessError::BodyPanicked { .. }
            | HarnessError::RetriesExhausted { .. } => ErrorKind::Trial,
            HarnessError::ExpectationFailed { .. } => ErrorKind::Assertion,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Fatal)
    }

    pub fn is_serialization_conflict(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict)
    }

    pub fn statement(sql: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Statement {
            sql: sql.into(),
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Classify an error the PostgreSQL server reported with a SQLSTATE.
    pub fn from_sqlstate(code: &str, message: impl Into<String>, sql: &str) -> Self {
        let message = message.into();
        match code {
            sqlstate::SERIALIZATION_FAILURE | sqlstate::DEADLOCK_DETECTED => {
                HarnessError::SerializationConflict {
                    sqlstate: code.to_string(),
                    message,
                }
            }
            // Class 08: connection exception.
            c if c.starts_with("08") => HarnessError::Connection(message),
            _ => HarnessError::Statement {
                sql: sql.to_string(),
                sqlstate: Some(code.to_string()),
                message,
            },
        }
    }

    /// Classify an error the MySQL server reported.
    ///
    /// InnoDB surfaces deadlock victims as 1213/40001; under SERIALIZABLE this
    /// is how it resolves read-write cycles, so it counts as a conflict.
    pub fn from_mysql_code(code: u16, state: &str, message: impl Into<String>, sql: &str) -> Self {
        let message = message.into();
        match code {
            mysql_code::LOCK_DEADLOCK | mysql_code::LOCK_WAIT_TIMEOUT => {
                HarnessError::SerializationConflict {
                    sqlstate: state.to_string(),
                    message,
                }
            }
            mysql_code::DUP_ENTRY => HarnessError::Statement {
                sql: sql.to_string(),
                sqlstate: Some(sqlstate::UNIQUE_VIOLATION.to_string()),
                message,
            },
            _ if state == sqlstate::SERIALIZATION_FAILURE => HarnessError::SerializationConflict {
                sqlstate: state.to_string(),
                message,
            },
            _ => HarnessError::Statement {
                sql: sql.to_string(),
                sqlstate: Some(state.to_string()),
                message,
            },
        }
    }

    /// Promote a statement failure during reset/provisioning to a fatal setup error.
    pub fn into_setup(self, step: &str) -> Self {
        match self {
            HarnessError::Connection(_) | HarnessError::Setup(_) | HarnessError::Config(_) => self,
            other => HarnessError::Setup(format!("{}: {}", step, other)),
        }
    }
}
