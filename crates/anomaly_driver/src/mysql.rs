//! MySQL/InnoDB backend over `mysql_async`.
//!
//! Statements are written with `$n` placeholders and rewritten to `?` on the
//! way in, so scenario SQL is shared verbatim with the PostgreSQL backend.

use anomaly_common::{Engine, EngineConfig, HarnessError, HarnessResult, IsolationLevel, TxOptions};
use mysql_async::prelude::*;
use mysql_async::{
    Conn, IsolationLevel as NativeLevel, Opts, OptsBuilder, Params, Pool, PoolConstraints, PoolOpts,
    Row, TxOpts, Value,
};
use tracing::{debug, warn};

use crate::result::{Param, ResultSet};

#[derive(Clone)]
pub struct MySqlDatabase {
    pool: Pool,
}

impl MySqlDatabase {
    pub async fn connect(config: &EngineConfig) -> HarnessResult<Self> {
        let opts = Opts::from_url(&config.url)
            .map_err(|e| HarnessError::Config(format!("invalid mysql url: {}", e)))?;
        let constraints = PoolConstraints::new(1, config.pool_size).ok_or_else(|| {
            HarnessError::Config(format!("invalid mysql pool size {}", config.pool_size))
        })?;
        let opts = OptsBuilder::from_opts(opts)
            .pool_opts(PoolOpts::default().with_constraints(constraints));
        let pool = Pool::new(opts);

        // Fail fast: the first checkout opens a real connection.
        let conn = checkout(&pool).await?;
        drop(conn);

        debug!("MySQL pool ready: max_size={}", config.pool_size);
        Ok(Self { pool })
    }

    pub async fn begin(&self, options: TxOptions) -> HarnessResult<MySqlTransaction> {
        let mut tx_opts = TxOpts::default();
        tx_opts.with_isolation_level(native_level(options.isolation));
        if options.read_only {
            tx_opts.with_readonly(true);
        }
        let tx = self
            .pool
            .start_transaction(tx_opts)
            .await
            .map_err(|e| mysql_error(e, "START TRANSACTION"))?;
        debug!("MySQL transaction started: {}", options.isolation);
        Ok(MySqlTransaction {
            tx: Some(tx),
            options,
        })
    }

    pub async fn execute_batch(&self, script: &str) -> HarnessResult<Vec<ResultSet>> {
        let mut conn = checkout(&self.pool).await?;
        match run_script(&mut conn, script).await {
            Ok(sets) => Ok(sets),
            Err(e) => {
                let err = mysql_error(e, script);
                release_after_failure(conn).await;
                Err(err)
            }
        }
    }

    pub async fn execute(&self, sql: &str, params: &[Param]) -> HarnessResult<u64> {
        let mut conn = checkout(&self.pool).await?;
        let sql = Engine::Mysql.placeholders(sql);
        conn.exec_drop(&*sql, to_params(params))
            .await
            .map_err(|e| mysql_error(e, &sql))?;
        Ok(conn.affected_rows())
    }

    pub async fn query_opt_scalar(&self, sql: &str, params: &[Param]) -> HarnessResult<Option<i64>> {
        let mut conn = checkout(&self.pool).await?;
        let sql = Engine::Mysql.placeholders(sql);
        let rows: Vec<Row> = conn
            .exec(&*sql, to_params(params))
            .await
            .map_err(|e| mysql_error(e, &sql))?;
        single_int(rows, &sql)
    }

    pub async fn close(self) {
        if let Err(e) = self.pool.disconnect().await {
            warn!("MySQL pool did not disconnect cleanly: {}", e);
        }
    }
}

pub struct MySqlTransaction {
    tx: Option<mysql_async::Transaction<'static>>,
    options: TxOptions,
}

impl MySqlTransaction {
    pub fn options(&self) -> TxOptions {
        self.options
    }

    fn handle(&mut self) -> &mut mysql_async::Transaction<'static> {
        self.tx
            .as_mut()
            .expect("connection is held until commit or rollback consumes the transaction")
    }

    pub async fn execute(&mut self, sql: &str, params: &[Param]) -> HarnessResult<u64> {
        let sql = Engine::Mysql.placeholders(sql);
        let tx = self.handle();
        tx.exec_drop(&*sql, to_params(params))
            .await
            .map_err(|e| mysql_error(e, &sql))?;
        Ok(tx.affected_rows())
    }

    pub async fn query_opt_scalar(&mut self, sql: &str, params: &[Param]) -> HarnessResult<Option<i64>> {
        let sql = Engine::Mysql.placeholders(sql);
        let rows: Vec<Row> = self
            .handle()
            .exec(&*sql, to_params(params))
            .await
            .map_err(|e| mysql_error(e, &sql))?;
        single_int(rows, &sql)
    }

    /// Level InnoDB records for this transaction.
    ///
    /// InnoDB registers a transaction lazily, on its first table access, so
    /// this fails until the transaction has read or written something.
    pub async fn current_isolation(&mut self) -> HarnessResult<IsolationLevel> {
        let sql = "SELECT trx_isolation_level FROM information_schema.innodb_trx \
                   WHERE trx_mysql_thread_id = CONNECTION_ID()";
        let reported: Option<String> = self
            .handle()
            .query_first(sql)
            .await
            .map_err(|e| mysql_error(e, sql))?;
        let reported = reported.ok_or_else(|| {
            HarnessError::statement(sql, "transaction not yet registered with InnoDB")
        })?;
        IsolationLevel::from_engine_name(&reported).ok_or_else(|| {
            HarnessError::statement(sql, format!("unrecognized isolation level '{}'", reported))
        })
    }

    pub async fn commit(mut self) -> HarnessResult<()> {
        let tx = self.tx.take().expect("transaction finished twice");
        tx.commit().await.map_err(|e| mysql_error(e, "COMMIT"))
    }

    pub async fn rollback(mut self) -> HarnessResult<()> {
        let tx = self.tx.take().expect("transaction finished twice");
        tx.rollback().await.map_err(|e| mysql_error(e, "ROLLBACK"))
    }
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        // mysql_async rolls an unfinished transaction back when the
        // connection returns to the pool.
        if self.tx.is_some() {
            warn!(
                "MySQL transaction ({}) dropped while open, rolling back on release",
                self.options.isolation
            );
        }
    }
}

async fn checkout(pool: &Pool) -> HarnessResult<Conn> {
    pool.get_conn()
        .await
        .map_err(|e| HarnessError::Connection(format!("mysql pool checkout failed: {}", e)))
}

async fn release_after_failure(mut conn: Conn) {
    if let Err(e) = conn.query_drop("ROLLBACK").await {
        warn!("Rollback after failure did not complete ({}), disconnecting", e);
        if let Err(e) = conn.disconnect().await {
            debug!("Disconnect after failed rollback: {}", e);
        }
    }
}

/// Run a multi-statement script over the text protocol and collect one
/// [`ResultSet`] per statement.
async fn run_script(conn: &mut Conn, script: &str) -> mysql_async::Result<Vec<ResultSet>> {
    let mut result = conn.query_iter(script).await?;
    let mut sets = Vec::new();
    while !result.is_empty() {
        let rows: Vec<Row> = result.collect().await?;
        sets.push(ResultSet {
            returns_rows: !rows.is_empty(),
            rows_affected: result.affected_rows(),
            rows: rows.iter().map(text_cells).collect(),
        });
    }
    Ok(sets)
}

fn text_cells(row: &Row) -> Vec<Option<String>> {
    (0..row.len())
        .map(|i| match row.as_ref(i) {
            None | Some(Value::NULL) => None,
            Some(Value::Bytes(bytes)) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Some(other) => Some(other.as_sql(true)),
        })
        .collect()
}

fn single_int(rows: Vec<Row>, sql: &str) -> HarnessResult<Option<i64>> {
    match rows.as_slice() {
        [] => Ok(None),
        [row] => match row.get_opt::<i64, usize>(0) {
            Some(Ok(v)) => Ok(Some(v)),
            Some(Err(e)) => Err(HarnessError::statement(
                sql,
                format!("expected integer column: {:?}", e),
            )),
            None => Err(HarnessError::statement(sql, "query returned no columns")),
        },
        many => Err(HarnessError::statement(
            sql,
            format!("expected at most one row, got {}", many.len()),
        )),
    }
}

fn to_params(params: &[Param]) -> Params {
    if params.is_empty() {
        return Params::Empty;
    }
    Params::Positional(
        params
            .iter()
            .map(|p| match p {
                Param::Int(v) => Value::Int(*v),
                Param::Text(s) => Value::Bytes(s.as_bytes().to_vec()),
            })
            .collect(),
    )
}

fn native_level(level: IsolationLevel) -> NativeLevel {
    match level {
        IsolationLevel::ReadUncommitted => NativeLevel::ReadUncommitted,
        IsolationLevel::ReadCommitted => NativeLevel::ReadCommitted,
        IsolationLevel::RepeatableRead => NativeLevel::RepeatableRead,
        IsolationLevel::Serializable => NativeLevel::Serializable,
    }
}

fn mysql_error(err: mysql_async::Error, sql: &str) -> HarnessError {
    match err {
        mysql_async::Error::Server(e) => HarnessError::from_mysql_code(e.code, &e.state, e.message, sql),
        mysql_async::Error::Io(e) => HarnessError::Connection(e.to_string()),
        mysql_async::Error::Url(e) => HarnessError::Config(e.to_string()),
        other => HarnessError::statement(sql, other.to_string()),
    }
}
