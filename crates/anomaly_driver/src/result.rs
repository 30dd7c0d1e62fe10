use anomaly_common::{HarnessError, HarnessResult};

/// A bound statement parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Param {
    Int(i64),
    Text(String),
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(i64::from(v))
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

/// Outcome of one statement inside a multi-statement script.
///
/// Values come back in text form (the simple/text protocol of both engines),
/// `None` standing for SQL NULL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub rows: Vec<Vec<Option<String>>>,
    pub rows_affected: u64,
    /// True when the statement produced at least one row.
    pub returns_rows: bool,
}

impl ResultSet {
    /// First column of the single row this result set must hold, as an integer.
    pub fn scalar_i64(&self) -> HarnessResult<i64> {
        match self.rows.as_slice() {
            [row] => parse_int_cell(row.first().and_then(|c| c.as_deref())),
            [] => Err(HarnessError::statement("<script>", "expected one row, got none")),
            rows => Err(HarnessError::statement(
                "<script>",
                format!("expected one row, got {}", rows.len()),
            )),
        }
    }
}

fn parse_int_cell(cell: Option<&str>) -> HarnessResult<i64> {
    let text = cell.ok_or_else(|| HarnessError::statement("<script>", "expected integer, got NULL"))?;
    text.trim().parse().map_err(|_| {
        HarnessError::statement("<script>", format!("expected integer, got '{}'", text))
    })
}

/// Result sets of the statements that returned rows, in script order.
pub fn query_sets(sets: &[ResultSet]) -> Vec<&ResultSet> {
    sets.iter().filter(|s| s.returns_rows).collect()
}

/// Integer scalars read by each query of a script, in order.
pub fn scalars(sets: &[ResultSet]) -> HarnessResult<Vec<i64>> {
    query_sets(sets).into_iter().map(ResultSet::scalar_i64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(value: &str) -> ResultSet {
        ResultSet {
            rows: vec![vec![Some(value.to_string())]],
            rows_affected: 1,
            returns_rows: true,
        }
    }

    fn command(affected: u64) -> ResultSet {
        ResultSet {
            rows: Vec::new(),
            rows_affected: affected,
            returns_rows: false,
        }
    }

    #[test]
    fn test_scalars_skip_commands() {
        let sets = vec![command(0), command(0), query("10"), query("11"), command(0)];
        assert_eq!(scalars(&sets).unwrap(), vec![10, 11]);
    }

    #[test]
    fn test_scalar_requires_exactly_one_row() {
        let empty = ResultSet {
            returns_rows: true,
            ..ResultSet::default()
        };
        assert!(empty.scalar_i64().is_err());

        let two = ResultSet {
            rows: vec![vec![Some("1".into())], vec![Some("2".into())]],
            rows_affected: 2,
            returns_rows: true,
        };
        assert!(two.scalar_i64().is_err());
    }

    #[test]
    fn test_scalar_rejects_null_and_text() {
        let null = ResultSet {
            rows: vec![vec![None]],
            rows_affected: 1,
            returns_rows: true,
        };
        assert!(null.scalar_i64().is_err());
        assert!(query("abc").scalar_i64().is_err());
    }

    #[test]
    fn test_param_conversions() {
        assert_eq!(Param::from(3i32), Param::Int(3));
        assert_eq!(Param::from("first"), Param::Text("first".into()));
    }
}
