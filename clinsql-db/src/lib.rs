//! CLINSQL DB - PostgreSQL Adapter
//!
//! Pooled access to the clinical-trials database. Exposes catalog
//! introspection, EXPLAIN-based validation, and capped safe execution with
//! statement timeouts. Every borrowed connection is returned (or discarded)
//! on all exit paths.

mod execute;
mod introspect;

pub use execute::{has_limit, wrap_with_row_cap, Validation};
pub use introspect::{ColumnMeta, ForeignKeyMeta};

use clinsql_core::{ClinsqlError, ClinsqlResult, DatabaseConfig, DbError};
use deadpool_postgres::{Config, ManagerConfig, Object, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;

/// Database client wrapping a fixed-size connection pool.
#[derive(Clone)]
pub struct DbClient {
    pool: Pool,
    row_cap: usize,
}

impl DbClient {
    /// Create a client from connection parameters. The pool itself is the
    /// semaphore bounding concurrent statements.
    pub fn connect(config: &DatabaseConfig, row_cap: usize) -> ClinsqlResult<Self> {
        let mut cfg = Config::new();
        cfg.host = Some(config.host.clone());
        cfg.port = Some(config.port);
        cfg.dbname = Some(config.database.clone());
        cfg.user = Some(config.user.clone());
        cfg.password = Some(config.password.clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size));
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| {
                ClinsqlError::Db(DbError::Pool {
                    message: format!("failed to create pool: {}", e),
                })
            })?;

        Ok(Self { pool, row_cap })
    }

    /// Row cap applied by `safe_execute` to uncapped statements.
    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    /// Current pool size, for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    pub(crate) async fn conn(&self) -> ClinsqlResult<Object> {
        self.pool.get().await.map_err(|e| {
            ClinsqlError::Db(DbError::Pool {
                message: e.to_string(),
            })
        })
    }
}

impl std::fmt::Debug for DbClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbClient")
            .field("row_cap", &self.row_cap)
            .field("pool", &self.pool.status())
            .finish()
    }
}

/// Quote an identifier for interpolation into SQL.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Classify a tokio-postgres error into the adapter's failure kinds.
pub(crate) fn classify_pg_error(e: &tokio_postgres::Error, timeout_secs: u64) -> DbError {
    if e.is_closed() {
        return DbError::Connection {
            message: e.to_string(),
        };
    }
    if let Some(db_err) = e.as_db_error() {
        let code = db_err.code().code();
        if code == "57014" {
            return DbError::Timeout { timeout_secs };
        }
        if code.starts_with("42") {
            return DbError::Syntax {
                message: db_err.message().to_string(),
            };
        }
        return DbError::Runtime {
            message: db_err.message().to_string(),
        };
    }
    DbError::Connection {
        message: e.to_string(),
    }
}
