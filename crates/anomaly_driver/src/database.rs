use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anomaly_common::{Engine, EngineConfig, HarnessError, HarnessResult, IsolationLevel, TxOptions};
use tracing::{info, warn};

use crate::mysql::{MySqlDatabase, MySqlTransaction};
use crate::postgres::{PgDatabase, PgTransaction};
use crate::result::{Param, ResultSet};
use crate::script::TxnScript;

/// Boxed, sendable future borrowed for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pooled handle to one engine. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub enum Database {
    Postgres(PgDatabase),
    Mysql(MySqlDatabase),
}

impl Database {
    /// Build the pool and open one connection to prove the target is reachable.
    pub async fn connect(engine: Engine, config: &EngineConfig) -> HarnessResult<Self> {
        let connect = async {
            match engine {
                Engine::Postgres => PgDatabase::connect(config).await.map(Database::Postgres),
                Engine::Mysql => MySqlDatabase::connect(config).await.map(Database::Mysql),
            }
        };
        let db = if config.connect_timeout_ms > 0 {
            let limit = Duration::from_millis(config.connect_timeout_ms);
            tokio::time::timeout(limit, connect).await.map_err(|_| {
                HarnessError::Connection(format!(
                    "timed out connecting to {} after {}ms",
                    engine, config.connect_timeout_ms
                ))
            })??
        } else {
            connect.await?
        };
        info!("Connected to {} (pool size {})", engine, config.pool_size);
        Ok(db)
    }

    pub fn engine(&self) -> Engine {
        match self {
            Database::Postgres(_) => Engine::Postgres,
            Database::Mysql(_) => Engine::Mysql,
        }
    }

    /// Open a transaction on a dedicated connection with the given options.
    pub async fn begin(&self, options: impl Into<TxOptions>) -> HarnessResult<Transaction> {
        let options = options.into();
        match self {
            Database::Postgres(db) => db.begin(options).await.map(Transaction::Postgres),
            Database::Mysql(db) => db.begin(options).await.map(Transaction::Mysql),
        }
    }

    /// Run `body` inside a transaction: commit when it returns `Ok`, roll
    /// back when it returns `Err`. The body's error wins over a failed
    /// rollback; a failed commit is returned as is.
    ///
    /// ```ignore
    /// let v = db
    ///     .transaction(IsolationLevel::Serializable, |tx| {
    ///         Box::pin(async move { tx.query_scalar(READ_FIRST, &[]).await })
    ///     })
    ///     .await?;
    /// ```
    pub async fn transaction<T, F>(&self, options: impl Into<TxOptions>, body: F) -> HarnessResult<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut Transaction) -> BoxFuture<'t, HarnessResult<T>>,
    {
        let mut tx = self.begin(options).await?;
        match body(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                let level = tx.isolation();
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        "Rollback at {} after failed body did not complete: {}",
                        level, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Send a multi-statement script in one round trip on a single
    /// connection. On failure the connection is rolled back before it
    /// returns to the pool.
    pub async fn execute_batch(&self, script: &str) -> HarnessResult<Vec<ResultSet>> {
        match self {
            Database::Postgres(db) => db.execute_batch(script).await,
            Database::Mysql(db) => db.execute_batch(script).await,
        }
    }

    pub async fn run_script(&self, script: &TxnScript) -> HarnessResult<Vec<ResultSet>> {
        self.execute_batch(&script.render()).await
    }

    /// Autocommit statement; returns rows affected.
    pub async fn execute(&self, sql: &str, params: &[Param]) -> HarnessResult<u64> {
        match self {
            Database::Postgres(db) => db.execute(sql, params).await,
            Database::Mysql(db) => db.execute(sql, params).await,
        }
    }

    /// Autocommit read of a single integer.
    pub async fn query_scalar(&self, sql: &str, params: &[Param]) -> HarnessResult<i64> {
        let value = match self {
            Database::Postgres(db) => db.query_opt_scalar(sql, params).await?,
            Database::Mysql(db) => db.query_opt_scalar(sql, params).await?,
        };
        value.ok_or_else(|| HarnessError::statement(sql, "query returned no rows"))
    }

    pub async fn close(self) {
        match self {
            Database::Postgres(db) => db.close(),
            Database::Mysql(db) => db.close().await,
        }
    }
}

/// An open transaction holding its own connection.
///
/// Consumed by [`commit`](Transaction::commit) or
/// [`rollback`](Transaction::rollback). Dropping it unfinished rolls it back.
pub enum Transaction {
    Postgres(PgTransaction),
    Mysql(MySqlTransaction),
}

impl Transaction {
    pub fn options(&self) -> TxOptions {
        match self {
            Transaction::Postgres(tx) => tx.options(),
            Transaction::Mysql(tx) => tx.options(),
        }
    }

    /// Level requested when the transaction began.
    pub fn isolation(&self) -> IsolationLevel {
        self.options().isolation
    }

    pub async fn execute(&mut self, sql: &str, params: &[Param]) -> HarnessResult<u64> {
        match self {
            Transaction::Postgres(tx) => tx.execute(sql, params).await,
            Transaction::Mysql(tx) => tx.execute(sql, params).await,
        }
    }

    pub async fn query_opt_scalar(&mut self, sql: &str, params: &[Param]) -> HarnessResult<Option<i64>> {
        match self {
            Transaction::Postgres(tx) => tx.query_opt_scalar(sql, params).await,
            Transaction::Mysql(tx) => tx.query_opt_scalar(sql, params).await,
        }
    }

    pub async fn query_scalar(&mut self, sql: &str, params: &[Param]) -> HarnessResult<i64> {
        self.query_opt_scalar(sql, params)
            .await?
            .ok_or_else(|| HarnessError::statement(sql, "query returned no rows"))
    }

    /// Level the engine reports for this transaction.
    pub async fn current_isolation(&mut self) -> HarnessResult<IsolationLevel> {
        match self {
            Transaction::Postgres(tx) => tx.current_isolation().await,
            Transaction::Mysql(tx) => tx.current_isolation().await,
        }
    }

    pub async fn commit(self) -> HarnessResult<()> {
        match self {
            Transaction::Postgres(tx) => tx.commit().await,
            Transaction::Mysql(tx) => tx.commit().await,
        }
    }

    pub async fn rollback(self) -> HarnessResult<()> {
        match self {
            Transaction::Postgres(tx) => tx.rollback().await,
            Transaction::Mysql(tx) => tx.rollback().await,
        }
    }
}
