use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, Statement};

use crate::driver::{Command, CommandCanceller, RawConnection, RowCursor};
use crate::error::SqlMapperError;
use crate::results::{ColumnInfo, ColumnSet};
use crate::types::{CommandKind, TxId};

use super::config::SqliteOptions;
use super::params::row_value_to_sqlite_value;
use super::query::SqliteCursor;

/// Blocking rusqlite connection with an explicit open/closed state.
///
/// Closing drops the underlying handle; reopening connects to `db_path` again,
/// so in-memory databases do not survive a close.
pub struct SqliteRawConnection {
    options: SqliteOptions,
    conn: Option<Connection>,
    active_tx: Option<TxId>,
    next_tx: TxId,
}

impl SqliteRawConnection {
    /// A closed connection that opens `options.db_path` on demand.
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self {
            options,
            conn: None,
            active_tx: None,
            next_tx: 0,
        }
    }

    /// Wrap an already open rusqlite connection.
    ///
    /// # Errors
    /// Returns `SqlMapperError` if the busy timeout cannot be applied.
    pub fn from_connection(conn: Connection) -> Result<Self, SqlMapperError> {
        let db_path = conn
            .path()
            .filter(|path| !path.is_empty())
            .unwrap_or(":memory:")
            .to_owned();
        let options = SqliteOptions::new(db_path);
        conn.busy_timeout(options.busy_timeout)?;
        Ok(Self {
            options,
            conn: Some(conn),
            active_tx: None,
            next_tx: 0,
        })
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }

    fn live(&self) -> Result<&Connection, SqlMapperError> {
        self.conn
            .as_ref()
            .ok_or_else(|| SqlMapperError::ConnectionError("SQLite connection is closed".into()))
    }

    fn check_command(&self, command: &Command) -> Result<(), SqlMapperError> {
        if command.kind() == CommandKind::StoredProcedure {
            return Err(SqlMapperError::Unimplemented(
                "SQLite has no stored procedures".into(),
            ));
        }
        if let Some(tx) = command.transaction()
            && self.active_tx != Some(tx)
        {
            return Err(SqlMapperError::ExecutionError(format!(
                "transaction {tx} is not active on this connection"
            )));
        }
        Ok(())
    }

    fn check_tx(&self, tx: TxId) -> Result<(), SqlMapperError> {
        if self.active_tx == Some(tx) {
            Ok(())
        } else {
            Err(SqlMapperError::ExecutionError(format!(
                "transaction {tx} is not active on this connection"
            )))
        }
    }

    // Runs `f` with the command's timeout as busy timeout, then restores the default.
    fn with_timeout<R>(
        &self,
        timeout: Option<Duration>,
        f: impl FnOnce(&Connection) -> Result<R, SqlMapperError>,
    ) -> Result<R, SqlMapperError> {
        let conn = self.live()?;
        let Some(timeout) = timeout else {
            return f(conn);
        };
        conn.busy_timeout(timeout)?;
        let outcome = f(conn);
        if let Err(err) = conn.busy_timeout(self.options.busy_timeout) {
            tracing::warn!("failed to restore SQLite busy timeout: {err}");
        }
        outcome
    }
}

fn prepare<'c>(conn: &'c Connection, command: &Command) -> Result<Statement<'c>, SqlMapperError> {
    let mut stmt = conn.prepare(command.text())?;
    for param in command.params() {
        let Some(idx) = stmt.parameter_index(&param.placeholder)? else {
            return Err(SqlMapperError::ParameterError(format!(
                "statement has no placeholder {}",
                param.placeholder
            )));
        };
        stmt.raw_bind_parameter(idx, row_value_to_sqlite_value(&param.value))?;
    }
    Ok(stmt)
}

// Expression columns have no declared type.
fn column_set(stmt: &Statement<'_>) -> ColumnSet {
    let columns = stmt
        .columns()
        .into_iter()
        .map(|column| match column.decl_type() {
            Some(decl_type) => ColumnInfo::new(column.name()).with_decl_type(decl_type),
            None => ColumnInfo::new(column.name()),
        })
        .collect();
    ColumnSet::new(columns)
}

struct SqliteInterrupt(InterruptHandle);

impl CommandCanceller for SqliteInterrupt {
    fn cancel(&self) -> Result<(), SqlMapperError> {
        self.0.interrupt();
        Ok(())
    }
}

impl RawConnection for SqliteRawConnection {
    fn provider(&self) -> &'static str {
        "sqlite"
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    fn open(&mut self) -> Result<(), SqlMapperError> {
        if self.conn.is_some() {
            return Ok(());
        }
        let conn = Connection::open(&self.options.db_path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        self.conn = Some(conn);
        Ok(())
    }

    fn close(&mut self) -> Result<(), SqlMapperError> {
        self.active_tx = None;
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, err)| SqlMapperError::SqliteError(err)),
            None => Ok(()),
        }
    }

    fn canceller(&self) -> Option<Arc<dyn CommandCanceller>> {
        self.conn.as_ref().map(|conn| {
            Arc::new(SqliteInterrupt(conn.get_interrupt_handle())) as Arc<dyn CommandCanceller>
        })
    }

    fn execute(&mut self, command: &Command) -> Result<usize, SqlMapperError> {
        self.check_command(command)?;
        self.with_timeout(command.timeout(), |conn| {
            let mut stmt = prepare(conn, command)?;
            Ok(stmt.raw_execute()?)
        })
    }

    fn query<R, F>(&mut self, command: &Command, consume: F) -> Result<R, SqlMapperError>
    where
        F: FnOnce(&mut dyn RowCursor) -> Result<R, SqlMapperError>,
    {
        self.check_command(command)?;
        self.with_timeout(command.timeout(), |conn| {
            let mut stmt = prepare(conn, command)?;
            let columns = column_set(&stmt);
            let mut cursor = SqliteCursor::new(stmt.raw_query(), columns);
            consume(&mut cursor)
        })
    }

    fn execute_script(&mut self, script: &str) -> Result<(), SqlMapperError> {
        self.live()?.execute_batch(script)?;
        Ok(())
    }

    fn begin(&mut self) -> Result<TxId, SqlMapperError> {
        if let Some(active) = self.active_tx {
            return Err(SqlMapperError::ExecutionError(format!(
                "transaction {active} is already active on this connection"
            )));
        }
        self.live()?.execute_batch("BEGIN")?;
        self.next_tx += 1;
        self.active_tx = Some(self.next_tx);
        Ok(self.next_tx)
    }

    fn commit(&mut self, tx: TxId) -> Result<(), SqlMapperError> {
        self.check_tx(tx)?;
        self.live()?.execute_batch("COMMIT")?;
        self.active_tx = None;
        Ok(())
    }

    fn rollback(&mut self, tx: TxId) -> Result<(), SqlMapperError> {
        self.check_tx(tx)?;
        self.active_tx = None;
        self.live()?.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl fmt::Debug for SqliteRawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteRawConnection")
            .field("db_path", &self.options.db_path)
            .field("open", &self.conn.is_some())
            .field("active_tx", &self.active_tx)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_reports_declared_column_types() {
        let mut conn =
            SqliteRawConnection::from_connection(Connection::open_in_memory().unwrap()).unwrap();
        conn.execute_script(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, label VARCHAR(40));
             INSERT INTO items VALUES (1, 'one');",
        )
        .unwrap();

        let command = Command::new(
            "SELECT id, label, id + 1 AS next FROM items",
            CommandKind::Text,
        );
        let columns = conn
            .query(&command, |cursor| Ok(cursor.columns().clone()))
            .unwrap();

        assert_eq!(columns.len(), 3);
        assert_eq!(columns.get(0).unwrap().decl_type.as_deref(), Some("INTEGER"));
        assert_eq!(columns.get(1).unwrap().decl_type.as_deref(), Some("VARCHAR(40)"));
        assert_eq!(columns.get(2).unwrap().name, "next");
        assert_eq!(columns.get(2).unwrap().decl_type, None);
    }
}
