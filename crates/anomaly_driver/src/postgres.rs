//! PostgreSQL backend over `tokio-postgres`, pooled with `deadpool-postgres`.
//!
//! A transaction owns its pooled connection. If a transaction is dropped
//! before `COMMIT`/`ROLLBACK` completes (panic, early return) the connection
//! is detached from the pool and closed, which makes the server roll the
//! transaction back; it is never handed to the next trial mid-transaction.

use anomaly_common::{EngineConfig, HarnessError, HarnessResult, IsolationLevel, TxOptions};
use deadpool_postgres::{ClientWrapper, Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::{ToSql, Type};
use tokio_postgres::{NoTls, SimpleQueryMessage};
use tracing::{debug, warn};

use crate::result::{Param, ResultSet};

#[derive(Clone)]
pub struct PgDatabase {
    pool: Pool,
}

impl PgDatabase {
    pub async fn connect(config: &EngineConfig) -> HarnessResult<Self> {
        let pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| HarnessError::Config(format!("invalid postgres url: {}", e)))?;

        // Verified recycling probes each connection on checkout.
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Verified,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| HarnessError::Connection(format!("cannot build postgres pool: {}", e)))?;

        // Fail fast: the first checkout opens a real connection.
        let conn = checkout(&pool).await?;
        drop(conn);

        debug!("Postgres pool ready: max_size={}", config.pool_size);
        Ok(Self { pool })
    }

    pub async fn begin(&self, options: TxOptions) -> HarnessResult<PgTransaction> {
        let conn = checkout(&self.pool).await?;
        let begin = options.begin_statement();
        if let Err(e) = conn.batch_execute(&begin).await {
            let err = pg_error(e, &begin);
            release_after_failure(conn).await;
            return Err(err);
        }
        debug!("Postgres transaction started: {}", begin);
        Ok(PgTransaction {
            conn: Some(conn),
            options,
        })
    }

    pub async fn execute_batch(&self, script: &str) -> HarnessResult<Vec<ResultSet>> {
        let conn = checkout(&self.pool).await?;
        match run_script(&conn, script).await {
            Ok(sets) => Ok(sets),
            Err(e) => {
                let err = pg_error(e, script);
                release_after_failure(conn).await;
                Err(err)
            }
        }
    }

    pub async fn execute(&self, sql: &str, params: &[Param]) -> HarnessResult<u64> {
        let conn = checkout(&self.pool).await?;
        execute_on(&conn, sql, params).await
    }

    pub async fn query_opt_scalar(&self, sql: &str, params: &[Param]) -> HarnessResult<Option<i64>> {
        let conn = checkout(&self.pool).await?;
        query_opt_scalar_on(&conn, sql, params).await
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

pub struct PgTransaction {
    conn: Option<Object>,
    options: TxOptions,
}

impl PgTransaction {
    pub fn options(&self) -> TxOptions {
        self.options
    }

    fn client(&self) -> &Object {
        self.conn
            .as_ref()
            .expect("connection is held until commit or rollback consumes the transaction")
    }

    pub async fn execute(&mut self, sql: &str, params: &[Param]) -> HarnessResult<u64> {
        execute_on(self.client(), sql, params).await
    }

    pub async fn query_opt_scalar(&mut self, sql: &str, params: &[Param]) -> HarnessResult<Option<i64>> {
        query_opt_scalar_on(self.client(), sql, params).await
    }

    pub async fn current_isolation(&mut self) -> HarnessResult<IsolationLevel> {
        let sql = "SHOW transaction_isolation";
        let sets = run_script(self.client(), sql)
            .await
            .map_err(|e| pg_error(e, sql))?;
        let reported = sets
            .first()
            .and_then(|s| s.rows.first())
            .and_then(|r| r.first().cloned().flatten())
            .ok_or_else(|| HarnessError::statement(sql, "no isolation level reported"))?;
        IsolationLevel::from_engine_name(&reported).ok_or_else(|| {
            HarnessError::statement(sql, format!("unrecognized isolation level '{}'", reported))
        })
    }

    pub async fn commit(mut self) -> HarnessResult<()> {
        self.finish("COMMIT").await
    }

    pub async fn rollback(mut self) -> HarnessResult<()> {
        self.finish("ROLLBACK").await
    }

    async fn finish(&mut self, statement: &str) -> HarnessResult<()> {
        let conn = self
            .conn
            .take()
            .expect("transaction finished twice");
        match conn.batch_execute(statement).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // A failed COMMIT (e.g. serialization failure) already ended the
                // transaction server-side; the ROLLBACK below is a no-op then.
                let err = pg_error(e, statement);
                release_after_failure(conn).await;
                Err(err)
            }
        }
    }
}

impl Drop for PgTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            warn!(
                "Postgres transaction ({}) dropped while open, closing its connection",
                self.options.isolation
            );
            drop(Object::take(conn));
        }
    }
}

async fn checkout(pool: &Pool) -> HarnessResult<Object> {
    pool.get()
        .await
        .map_err(|e| HarnessError::Connection(format!("postgres pool checkout failed: {}", e)))
}

/// Roll back whatever a failed statement left open; drop the connection
/// from the pool if even that fails.
async fn release_after_failure(conn: Object) {
    if let Err(e) = conn.batch_execute("ROLLBACK").await {
        warn!("Rollback after failure did not complete ({}), detaching connection", e);
        drop(Object::take(conn));
    }
}

async fn run_script(
    client: &ClientWrapper,
    script: &str,
) -> Result<Vec<ResultSet>, tokio_postgres::Error> {
    let messages = client.simple_query(script).await?;

    let mut sets = Vec::new();
    let mut current = ResultSet::default();
    for msg in messages {
        match msg {
            SimpleQueryMessage::Row(row) => {
                current.returns_rows = true;
                current
                    .rows
                    .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
            SimpleQueryMessage::CommandComplete(n) => {
                current.rows_affected = n;
                sets.push(std::mem::take(&mut current));
            }
            _ => {}
        }
    }
    Ok(sets)
}

async fn execute_on(client: &ClientWrapper, sql: &str, params: &[Param]) -> HarnessResult<u64> {
    let stmt = client
        .prepare_cached(sql)
        .await
        .map_err(|e| pg_error(e, sql))?;
    let bound = bind(stmt.params(), params, sql)?;
    client
        .execute(&stmt, &as_refs(&bound))
        .await
        .map_err(|e| pg_error(e, sql))
}

async fn query_opt_scalar_on(
    client: &ClientWrapper,
    sql: &str,
    params: &[Param],
) -> HarnessResult<Option<i64>> {
    let stmt = client
        .prepare_cached(sql)
        .await
        .map_err(|e| pg_error(e, sql))?;
    let bound = bind(stmt.params(), params, sql)?;
    let rows = client
        .query(&stmt, &as_refs(&bound))
        .await
        .map_err(|e| pg_error(e, sql))?;
    match rows.as_slice() {
        [] => Ok(None),
        [row] => int_column(row, sql).map(Some),
        many => Err(HarnessError::statement(
            sql,
            format!("expected at most one row, got {}", many.len()),
        )),
    }
}

fn int_column(row: &tokio_postgres::Row, sql: &str) -> HarnessResult<i64> {
    row.try_get::<_, i64>(0)
        .or_else(|_| row.try_get::<_, i32>(0).map(i64::from))
        .or_else(|_| row.try_get::<_, i16>(0).map(i64::from))
        .map_err(|e| HarnessError::statement(sql, format!("expected integer column: {}", e)))
}

type BoundParam = Box<dyn ToSql + Sync + Send>;

/// Bind against the types the server inferred for each placeholder, so an
/// `i64` value can land in an `int4` column and vice versa.
fn bind(types: &[Type], params: &[Param], sql: &str) -> HarnessResult<Vec<BoundParam>> {
    if types.len() != params.len() {
        return Err(HarnessError::statement(
            sql,
            format!("statement takes {} parameters, {} given", types.len(), params.len()),
        ));
    }
    types
        .iter()
        .zip(params)
        .enumerate()
        .map(|(i, (ty, param))| bind_one(ty, param).ok_or_else(|| {
            HarnessError::statement(
                sql,
                format!("cannot bind {:?} to parameter ${} of type {}", param, i + 1, ty),
            )
        }))
        .collect()
}

fn bind_one(ty: &Type, param: &Param) -> Option<BoundParam> {
    let is_text = *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME;
    match param {
        Param::Int(v) if *ty == Type::INT8 => Some(Box::new(*v)),
        Param::Int(v) if *ty == Type::INT4 => i32::try_from(*v).ok().map(|v| Box::new(v) as BoundParam),
        Param::Int(v) if *ty == Type::INT2 => i16::try_from(*v).ok().map(|v| Box::new(v) as BoundParam),
        Param::Int(v) if is_text => Some(Box::new(v.to_string())),
        Param::Text(s) if is_text => Some(Box::new(s.clone())),
        _ => None,
    }
}

fn as_refs(bound: &[BoundParam]) -> Vec<&(dyn ToSql + Sync)> {
    bound
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

fn pg_error(err: tokio_postgres::Error, sql: &str) -> HarnessError {
    if let Some(db) = err.as_db_error() {
        return HarnessError::from_sqlstate(db.code().code(), db.message(), sql);
    }
    if err.is_closed() {
        return HarnessError::Connection(err.to_string());
    }
    HarnessError::statement(sql, err.to_string())
}
