//! SQLite connection factory.
//!
//! SQLite connections are cheap, so a connection is opened per operation
//! and wrapped in `SyncConnectionWrapper` for async use.

use std::path::Path;

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

use super::util::to_diesel_error;

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

/// Per-connection settings. WAL mode is set once by the migrations.
const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 30000;
"#;

/// SQLite pool (creates connections on demand).
#[derive(Clone)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    pub fn from_path(path: &Path) -> Self {
        Self::new(&path.display().to_string())
    }

    /// Open a connection with the pragmas applied.
    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(to_diesel_error)?;
        conn.batch_execute(CONNECTION_PRAGMAS).await?;
        Ok(conn)
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}

/// Database pool handle held by the repositories.
#[derive(Clone)]
pub enum DbPool {
    Sqlite(SqlitePool),
}

impl DbPool {
    /// Create a pool from a database URL (`sqlite:` prefix optional).
    pub fn from_url(url: &str) -> Result<Self, DieselError> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Err(DieselError::QueryBuilderError(
                "only SQLite databases are supported".into(),
            ));
        }
        Ok(DbPool::Sqlite(SqlitePool::new(url)))
    }

    pub fn sqlite_from_path(path: &Path) -> Self {
        DbPool::Sqlite(SqlitePool::from_path(path))
    }

    pub fn database_url(&self) -> &str {
        match self {
            DbPool::Sqlite(pool) => pool.database_url(),
        }
    }
}

/// Run a block with a connection from the pool.
///
/// # Example
/// ```ignore
/// with_conn!(self.pool, conn => {
///     documents::table.find(id).first::<DocumentRecord>(&mut conn).await.optional()
/// })
/// ```
#[macro_export]
macro_rules! with_conn {
    ($pool:expr, $conn:ident => $body:expr) => {{
        match &$pool {
            $crate::repository::pool::DbPool::Sqlite(pool) => {
                let mut $conn = pool.get().await?;
                $body
            }
        }
    }};
}

pub use with_conn;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_detection() {
        assert_eq!(
            DbPool::from_url("sqlite:/path/to/db").unwrap().database_url(),
            "/path/to/db"
        );
        assert_eq!(
            DbPool::from_url("/path/to/farmdoc.db").unwrap().database_url(),
            "/path/to/farmdoc.db"
        );
        assert!(DbPool::from_url("postgres://localhost/test").is_err());
    }
}
