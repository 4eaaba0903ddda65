//! The query provider: one SQLite database, its connection manager, and the
//! settings every command executed against it shares.

use std::cell::RefCell;
use std::fmt;
use std::io::Write;

use chrono::NaiveDateTime;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::connection::{ConnectionManager, Lease, SqliteConnection};
use crate::convert::TypeConverter;
use crate::error::{Error, Result};
use crate::executor::{Executor, QueryCommand};
use crate::schema::Schema;
use crate::types::SqliteTypeSystem;
use crate::value::Value;

fn default_store_date_time_as_ticks() -> bool {
    true
}

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Path to the SQLite database file
    pub db_path: String,
    /// Store date-times as INTEGER ticks (100 ns since 0001-01-01) rather
    /// than TEXT.
    #[serde(default = "default_store_date_time_as_ticks")]
    pub store_date_time_as_ticks: bool,
    /// Copy result rows into memory and close the engine cursor before
    /// projecting them.
    #[serde(default)]
    pub buffer_result_rows: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            db_path: String::new(),
            store_date_time_as_ticks: default_store_date_time_as_ticks(),
            buffer_result_rows: false,
        }
    }
}

impl ProviderConfig {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn with_store_date_time_as_ticks(mut self, enabled: bool) -> Self {
        self.store_date_time_as_ticks = enabled;
        self
    }

    pub fn with_buffer_result_rows(mut self, enabled: bool) -> Self {
        self.buffer_result_rows = enabled;
        self
    }
}

/// Executes commands against one SQLite database.
///
/// Not `Sync`: the connection's use counter lives in a `Cell`, so a provider
/// shared between threads must be wrapped in a lock by the caller.
pub struct SqliteQueryProvider {
    config: ProviderConfig,
    manager: ConnectionManager,
    converter: TypeConverter,
    type_system: SqliteTypeSystem,
    log: RefCell<Option<Box<dyn Write>>>,
}

impl SqliteQueryProvider {
    /// A provider that opens `config.db_path` on first use and closes it when
    /// the last lease is released.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        if config.db_path.trim().is_empty() {
            return Err(Error::Configuration("Connection not specified".into()));
        }
        let connection = SqliteConnection::new(config.db_path.clone());
        Ok(Self::from_parts(config, connection))
    }

    /// A provider over a connection the caller opened. It is never closed by
    /// the provider.
    pub fn with_connection(config: ProviderConfig, connection: Connection) -> Self {
        let path = config.db_path.clone();
        Self::from_parts(config, SqliteConnection::from_open(path, connection))
    }

    fn from_parts(config: ProviderConfig, connection: SqliteConnection) -> Self {
        Self {
            converter: TypeConverter::new(config.store_date_time_as_ticks),
            manager: ConnectionManager::new(connection),
            type_system: SqliteTypeSystem::new(),
            log: RefCell::new(None),
            config,
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn converter(&self) -> &TypeConverter {
        &self.converter
    }

    pub fn type_system(&self) -> &SqliteTypeSystem {
        &self.type_system
    }

    /// Echo every command and its parameter values to `sink` before it runs.
    pub fn set_log(&self, sink: impl Write + 'static) {
        *self.log.borrow_mut() = Some(Box::new(sink));
    }

    pub fn clear_log(&self) {
        self.log.borrow_mut().take();
    }

    pub fn executor(&self) -> Executor<'_> {
        Executor::new(self)
    }

    pub fn do_connected<R>(&self, action: impl FnOnce(&Lease<'_>) -> Result<R>) -> Result<R> {
        self.manager.do_connected(action)
    }

    pub fn do_transacted<R>(&self, action: impl FnOnce(&Lease<'_>) -> Result<R>) -> Result<R> {
        self.manager.do_transacted(action)
    }

    /// Run parameterless command text, returning the rows it changed.
    pub fn execute_command_text(&self, command_text: &str) -> Result<usize> {
        self.executor()
            .execute_command(&QueryCommand::new(command_text), &[])
    }

    /// Create every table and index of `schema` that does not exist yet.
    pub fn create_schema(&self, schema: &Schema) -> Result<()> {
        let statements = schema.statements(&self.type_system);
        let executor = self.executor();
        self.do_transacted(|_| {
            for statement in &statements {
                executor.execute_command(&QueryCommand::new(statement.as_str()), &[])?;
            }
            Ok(())
        })?;
        log::debug!("created schema with {} statements", statements.len());
        Ok(())
    }

    /// A date-time in the storage form this provider is configured for.
    pub fn date_time_value(&self, value: NaiveDateTime) -> Result<Value> {
        Value::from_date_time(value, self.config.store_date_time_as_ticks)
    }

    pub(crate) fn log_command(&self, command: &QueryCommand, params: &[Value]) -> Result<()> {
        log::debug!("executing command: {}", command.command_text());
        let mut sink = self.log.borrow_mut();
        if let Some(out) = sink.as_mut() {
            writeln!(out, "{}", command.command_text())?;
            for (parameter, value) in command.parameters().iter().zip(params) {
                if value.is_null() {
                    writeln!(out, "-- {} = NULL", parameter.name())?;
                } else {
                    writeln!(out, "-- {} = [{}]", parameter.name(), value)?;
                }
            }
            writeln!(out)?;
        }
        Ok(())
    }
}

impl fmt::Debug for SqliteQueryProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteQueryProvider")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("logging", &self.log.borrow().is_some())
            .finish()
    }
}
