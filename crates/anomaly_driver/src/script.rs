use std::fmt;

use anomaly_common::IsolationLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminator {
    Commit,
    Rollback,
}

/// A whole transaction rendered as multi-statement text.
///
/// ```text
/// SET TRANSACTION ISOLATION LEVEL READ COMMITTED;
/// BEGIN;
/// UPDATE counters SET counter = 1 WHERE name = 'first';
/// COMMIT;
/// ```
///
/// The isolation declaration, when present, always precedes `BEGIN`.
/// Scripts carry no bind parameters; values must be rendered with
/// [`quote_literal`] or be integers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnScript {
    isolation: Option<IsolationLevel>,
    statements: Vec<String>,
    terminator: Terminator,
}

impl TxnScript {
    pub fn new() -> Self {
        Self {
            isolation: None,
            statements: Vec::new(),
            terminator: Terminator::Commit,
        }
    }

    /// Declare the level of the transaction; omitted means session default.
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }

    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        let sql = sql.into();
        self.statements
            .push(sql.trim().trim_end_matches(';').trim_end().to_string());
        self
    }

    pub fn commit(mut self) -> Self {
        self.terminator = Terminator::Commit;
        self
    }

    pub fn rollback(mut self) -> Self {
        self.terminator = Terminator::Rollback;
        self
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl Default for TxnScript {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxnScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(level) = self.isolation {
            writeln!(f, "{};", level.set_transaction_statement())?;
        }
        writeln!(f, "BEGIN;")?;
        for stmt in &self.statements {
            writeln!(f, "{};", stmt)?;
        }
        match self.terminator {
            Terminator::Commit => write!(f, "COMMIT;"),
            Terminator::Rollback => write!(f, "ROLLBACK;"),
        }
    }
}

/// Render a string as a SQL literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
