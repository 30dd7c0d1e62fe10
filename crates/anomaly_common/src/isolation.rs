use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HarnessError;

/// The four ANSI isolation levels, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// SQL spelling accepted by both PostgreSQL and MySQL.
    pub fn sql_name(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }

    /// Statement that declares the level of the next transaction on a session.
    pub fn set_transaction_statement(self) -> String {
        format!("SET TRANSACTION ISOLATION LEVEL {}", self.sql_name())
    }

    /// Short label used in reports and CLI output.
    pub fn label(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "read-uncommitted",
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Serializable => "serializable",
        }
    }

    /// Parse the level an engine reports for a running transaction.
    ///
    /// PostgreSQL answers `read committed`, InnoDB answers `READ COMMITTED`
    /// or `READ-COMMITTED` depending on where the value is read from.
    pub fn from_engine_name(reported: &str) -> Option<Self> {
        let normalized = normalize(reported);
        Self::ALL
            .into_iter()
            .find(|level| normalize(level.sql_name()) == normalized)
    }
}

fn normalize(s: &str) -> String {
    s.trim()
        .chars()
        .map(|c| match c {
            '-' | '_' => ' ',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for IsolationLevel {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "ru" | "read uncommitted" => Ok(IsolationLevel::ReadUncommitted),
            "rc" | "read committed" => Ok(IsolationLevel::ReadCommitted),
            "rr" | "repeatable read" => Ok(IsolationLevel::RepeatableRead),
            "s" | "serializable" => Ok(IsolationLevel::Serializable),
            _ => Err(HarnessError::Config(format!(
                "unknown isolation level '{}': expected read-uncommitted, read-committed, \
                 repeatable-read or serializable",
                s
            ))),
        }
    }
}

/// Database engines the harness can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Postgres,
    Mysql,
}

impl Engine {
    pub fn name(self) -> &'static str {
        match self {
            Engine::Postgres => "postgres",
            Engine::Mysql => "mysql",
        }
    }

    /// Rewrite `$n` placeholders into the engine's native marker.
    ///
    /// Harness statements bind parameters in order, so `$1, $2, ...` map
    /// positionally onto MySQL's `?`. Quoted literals are left untouched.
    pub fn placeholders(self, sql: &str) -> std::borrow::Cow<'_, str> {
        match self {
            Engine::Postgres => std::borrow::Cow::Borrowed(sql),
            Engine::Mysql => {
                if !sql.contains('$') {
                    return std::borrow::Cow::Borrowed(sql);
                }
                let mut out = String::with_capacity(sql.len());
                let mut chars = sql.chars().peekable();
                let mut in_literal = false;
                while let Some(c) = chars.next() {
                    if c == '\'' {
                        in_literal = !in_literal;
                        out.push(c);
                    } else if c == '$'
                        && !in_literal
                        && chars.peek().is_some_and(|n| n.is_ascii_digit())
                    {
                        while chars.peek().is_some_and(|n| n.is_ascii_digit()) {
                            chars.next();
                        }
                        out.push('?');
                    } else {
                        out.push(c);
                    }
                }
                std::borrow::Cow::Owned(out)
            }
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Engine {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Engine::Postgres),
            "mysql" | "innodb" => Ok(Engine::Mysql),
            other => Err(HarnessError::Config(format!(
                "unknown engine '{}': expected postgres or mysql",
                other
            ))),
        }
    }
}

/// Options applied when a transaction is opened programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOptions {
    pub isolation: IsolationLevel,
    pub read_only: bool,
}

impl TxOptions {
    pub fn new(isolation: IsolationLevel) -> Self {
        Self {
            isolation,
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Begin statement for engines that take options as SQL text.
    pub fn begin_statement(&self) -> String {
        let mut sql = format!("BEGIN ISOLATION LEVEL {}", self.isolation.sql_name());
        if self.read_only {
            sql.push_str(" READ ONLY");
        }
        sql
    }
}

impl From<IsolationLevel> for TxOptions {
    fn from(isolation: IsolationLevel) -> Self {
        Self::new(isolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_transaction_statement() {
        assert_eq!(
            IsolationLevel::ReadUncommitted.set_transaction_statement(),
            "SET TRANSACTION ISOLATION LEVEL READ UNCOMMITTED"
        );
        assert_eq!(
            IsolationLevel::Serializable.set_transaction_statement(),
            "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"
        );
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("rc".parse::<IsolationLevel>().unwrap(), IsolationLevel::ReadCommitted);
        assert_eq!(
            "Repeatable_Read".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "read uncommitted".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadUncommitted
        );
        assert_eq!("S".parse::<IsolationLevel>().unwrap(), IsolationLevel::Serializable);
    }

    #[test]
    fn test_parse_unknown_level_is_config_error() {
        let err = "snapshot".parse::<IsolationLevel>().unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_label_round_trips_through_parse() {
        for level in IsolationLevel::ALL {
            assert_eq!(level.label().parse::<IsolationLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_from_engine_name() {
        assert_eq!(
            IsolationLevel::from_engine_name("read committed"),
            Some(IsolationLevel::ReadCommitted)
        );
        assert_eq!(
            IsolationLevel::from_engine_name("REPEATABLE-READ"),
            Some(IsolationLevel::RepeatableRead)
        );
        assert_eq!(IsolationLevel::from_engine_name("snapshot"), None);
    }

    #[test]
    fn test_levels_ordered_by_strength() {
        assert!(IsolationLevel::ReadUncommitted < IsolationLevel::ReadCommitted);
        assert!(IsolationLevel::RepeatableRead < IsolationLevel::Serializable);
    }

    #[test]
    fn test_mysql_placeholders() {
        let sql = "UPDATE counters SET counter = $1 WHERE name = $2 AND counter = $3";
        assert_eq!(
            Engine::Mysql.placeholders(sql),
            "UPDATE counters SET counter = ? WHERE name = ? AND counter = ?"
        );
        assert_eq!(Engine::Postgres.placeholders(sql), sql);
    }

    #[test]
    fn test_mysql_placeholders_skip_literals() {
        let sql = "SELECT '$1' , $1";
        assert_eq!(Engine::Mysql.placeholders(sql), "SELECT '$1' , ?");
    }

    #[test]
    fn test_engine_parse() {
        assert_eq!("PostgreSQL".parse::<Engine>().unwrap(), Engine::Postgres);
        assert_eq!("mysql".parse::<Engine>().unwrap(), Engine::Mysql);
        assert!("oracle".parse::<Engine>().is_err());
    }

    #[test]
    fn test_begin_statement() {
        let opts = TxOptions::new(IsolationLevel::RepeatableRead);
        assert_eq!(opts.begin_statement(), "BEGIN ISOLATION LEVEL REPEATABLE READ");
        assert_eq!(
            opts.read_only().begin_statement(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY"
        );
    }
}
