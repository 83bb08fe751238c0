use std::time::Duration;

use crate::connection::{ConnectionOptions, DbConnection};
use crate::error::SqlMapperError;

use super::connection::SqliteRawConnection;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Options for a `SQLite` connection.
#[derive(Debug, Clone)]
pub struct SqliteOptions {
    pub db_path: String,
    /// Lock wait applied when a command carries no timeout of its own
    pub busy_timeout: Duration,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            db_path,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
    connection: ConnectionOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(db_path: String) -> Self {
        Self {
            opts: SqliteOptions::new(db_path),
            connection: ConnectionOptions::default(),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.opts.busy_timeout = busy_timeout;
        self
    }

    /// Engine-level options (plan cache, stream buffer) for the connection.
    #[must_use]
    pub fn connection_options(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Build a connection handle in the closed state. Each call opens and
    /// closes it on demand.
    #[must_use]
    pub fn connect(self) -> DbConnection<SqliteRawConnection> {
        DbConnection::with_options(SqliteRawConnection::new(self.opts), self.connection)
    }

    /// Build a connection handle and open it.
    ///
    /// # Errors
    /// Returns `SqlMapperError` if the database file cannot be opened.
    pub async fn open(self) -> Result<DbConnection<SqliteRawConnection>, SqlMapperError> {
        let conn = self.connect();
        conn.open().await?;
        Ok(conn)
    }
}

impl SqliteRawConnection {
    #[must_use]
    pub fn builder(db_path: impl Into<String>) -> SqliteOptionsBuilder {
        SqliteOptionsBuilder::new(db_path.into())
    }
}
