// SQLite backend - rusqlite implementation of the blocking driver seam
//
// - config: Connection options and builder
// - params: Conversion from row values to SQLite values
// - query: Value extraction and the forward-only cursor
// - connection: `RawConnection` implementation

pub mod config;
pub mod connection;
pub mod params;
pub mod query;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteRawConnection;
