//! Transaction driver.
//!
//! A [`Database`] is a pooled handle to one engine. Every transaction opened
//! through it owns a dedicated connection for its whole lifetime, so two
//! transactions running concurrently interleave inside the engine, never
//! inside the pool.
//!
//! Two entry points set the isolation level:
//!
//! - [`Database::begin`] / [`Database::transaction`] take a [`TxOptions`]
//!   value at begin time;
//! - [`Database::execute_batch`] runs a [`TxnScript`] whose text declares the
//!   level with `SET TRANSACTION ISOLATION LEVEL ...` ahead of `BEGIN`, so a
//!   whole transaction travels in one round trip.

pub mod database;
pub mod mysql;
pub mod postgres;
pub mod result;
pub mod script;

pub use anomaly_common::{Engine, HarnessError, HarnessResult, IsolationLevel, TxOptions};
pub use database::{BoxFuture, Database, Transaction};
pub use result::{Param, ResultSet};
pub use script::TxnScript;
