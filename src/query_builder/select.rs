use std::vec;

use crate::driver::RawConnection;
use crate::error::SqlMapperError;
use crate::executor::{self, RowStream, TaskHandle};
use crate::mapping::FromRow;
use crate::params::SqlParams;

use super::StatementBuilder;

impl<C: RawConnection, P: SqlParams> StatementBuilder<'_, C, P> {
    /// Execute a query and materialize every row.
    pub fn query<T: FromRow>(mut self) -> TaskHandle<Vec<T>> {
        if let Some(err) = self.invalid.take() {
            return TaskHandle::ready(Err(err));
        }
        match self.single_params() {
            Ok(params) => executor::query(self.conn, self.call_spec(), params),
            Err(err) => TaskHandle::ready(Err(err)),
        }
    }

    /// Execute a query and return its first row, if any. The rest of the
    /// result is abandoned.
    pub fn query_first<T: FromRow>(mut self) -> TaskHandle<Option<T>> {
        if let Some(err) = self.invalid.take() {
            return TaskHandle::ready(Err(err));
        }
        match self.single_params() {
            Ok(params) => executor::query_first(self.conn, self.call_spec(), params),
            Err(err) => TaskHandle::ready(Err(err)),
        }
    }

    /// Execute a query and read its rows lazily.
    ///
    /// # Errors
    /// Returns faults raised while executing the command or deriving the row
    /// deserializer; later failures arrive through the stream.
    pub async fn stream<T: FromRow>(mut self) -> Result<RowStream<T>, SqlMapperError> {
        if let Some(err) = self.invalid.take() {
            return Err(err);
        }
        let params = self.single_params()?;
        executor::open_stream(self.conn, self.call_spec(), params).await
    }

    /// Buffered or streamed rows, per [`StatementBuilder::buffered`].
    ///
    /// # Errors
    /// See [`StatementBuilder::query`] and [`StatementBuilder::stream`].
    pub async fn query_rows<T: FromRow>(self) -> Result<Rows<T>, SqlMapperError> {
        if self.buffered {
            Ok(Rows::Buffered(self.query::<T>().await?.into_iter()))
        } else {
            Ok(Rows::Streamed(self.stream::<T>().await?))
        }
    }
}

/// Rows of a query, either fully materialized or streamed.
#[derive(Debug)]
pub enum Rows<T> {
    Buffered(vec::IntoIter<T>),
    Streamed(RowStream<T>),
}

impl<T: Send + 'static> Rows<T> {
    #[must_use]
    pub fn is_buffered(&self) -> bool {
        matches!(self, Rows::Buffered(_))
    }

    pub async fn next(&mut self) -> Option<Result<T, SqlMapperError>> {
        match self {
            Rows::Buffered(rows) => rows.next().map(Ok),
            Rows::Streamed(stream) => stream.next().await,
        }
    }

    /// # Errors
    /// Returns the first row error of a streamed result.
    pub async fn try_collect(self) -> Result<Vec<T>, SqlMapperError> {
        match self {
            Rows::Buffered(rows) => Ok(rows.collect()),
            Rows::Streamed(stream) => stream.try_collect().await,
        }
    }

    /// Release the rows; for a stream this waits for the connection to be released.
    ///
    /// # Errors
    /// Returns an error if the stream worker failed.
    pub async fn close(self) -> Result<(), SqlMapperError> {
        match self {
            Rows::Buffered(_) => Ok(()),
            Rows::Streamed(stream) => stream.close().await,
        }
    }
}
