//! Typed command execution and row materialization over SQLite.
//!
//! # Intention
//!
//! - Run parameterized commands against one SQLite database and project each
//!   result row into a caller-chosen Rust type.
//! - Coerce SQLite's native storage classes into the requested types with
//!   explicit, width-checked rules; NULL becomes the type's default.
//! - Keep the connection open only while something is using it.
//!
//! # Architectural Boundaries
//!
//! - Only SQLite/database code belongs here.
//! - No SQL generation beyond schema DDL; command text is run as written.
//! - No business logic or unrelated utilities.
//!
//! # Example
//!
//! ```no_run
//! use rust_sqlite_provider::{ProviderConfig, QueryCommand, SqlType, SqliteQueryProvider, Value};
//!
//! # fn main() -> rust_sqlite_provider::Result<()> {
//! let provider = SqliteQueryProvider::new(ProviderConfig::new("app.db"))?;
//! let command = QueryCommand::new("SELECT Id, Name FROM T WHERE Id = @id")
//!     .with_parameter("id", SqlType::Int);
//! let rows: Vec<(i32, String)> = provider.executor().execute(
//!     &command,
//!     &[Value::from(5)],
//!     |f| Ok((f.get(0)?, f.get(1)?)),
//! )?;
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod convert;
pub mod error;
pub mod executor;
pub mod field;
pub mod reader;
pub mod schema;
pub mod sqlite;
pub mod types;
pub mod value;

pub use connection::{ConnectionManager, Lease, SqliteConnection};
pub use convert::{Convert, SqlEnum, TypeConverter};
pub use error::{Error, Result};
pub use executor::{DeferredRows, Executor, QueryCommand, QueryParameter};
pub use field::FieldReader;
pub use reader::{BufferedReader, ReaderState, RowReader, SqliteDataReader};
pub use schema::{
    ColumnConstraint, ColumnDefinition, DefaultValue, ForeignKey, ForeignKeyAction,
    IndexDefinition, Schema, TableDefinition,
};
pub use sqlite::{ProviderConfig, SqliteQueryProvider};
pub use types::{SqlType, SqliteTypeSystem, TypeDescriptor};
pub use value::{Guid, NativeClass, NativeValue, Value};
