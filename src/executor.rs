//! Command execution: binding, running and materializing rows.
//!
//! # Intention
//!
//! - Every execution runs inside a connection lease, and every prepared
//!   statement is finalized before the lease is released, whichever way the
//!   call ends.
//! - Eager reads return a `Vec`; deferred reads hand a pull-based iterator to
//!   a caller-supplied closure and clean up when that closure returns.
//!
//! # Architectural Boundaries
//!
//! - No SQL generation. Command text is passed to SQLite as written.

use std::cell::Cell;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use rusqlite::Statement;

use crate::connection::{ConnectionManager, Lease};
use crate::convert::Convert;
use crate::error::{Error, Result};
use crate::field::FieldReader;
use crate::reader::{BufferedReader, RowReader, SqliteDataReader};
use crate::sqlite::SqliteQueryProvider;
use crate::types::TypeDescriptor;
use crate::value::Value;

/// A named, typed placeholder of a command. Bound as `@name`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameter {
    name: String,
    sql_type: TypeDescriptor,
}

impl QueryParameter {
    pub fn new(name: impl Into<String>, sql_type: impl Into<TypeDescriptor>) -> Self {
        let name = name.into();
        let name = match name.strip_prefix('@') {
            Some(bare) => bare.to_string(),
            None => name,
        };
        Self {
            name,
            sql_type: sql_type.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sql_type(&self) -> &TypeDescriptor {
        &self.sql_type
    }
}

/// Command text plus the parameters it declares.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCommand {
    command_text: String,
    parameters: Vec<QueryParameter>,
    column_count: Option<usize>,
}

impl QueryCommand {
    pub fn new(command_text: impl Into<String>) -> Self {
        Self {
            command_text: command_text.into(),
            parameters: Vec::new(),
            column_count: None,
        }
    }

    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        sql_type: impl Into<TypeDescriptor>,
    ) -> Self {
        self.parameters.push(QueryParameter::new(name, sql_type));
        self
    }

    /// Fail execution unless the statement yields exactly `count` columns.
    pub fn with_column_count(mut self, count: usize) -> Self {
        self.column_count = Some(count);
        self
    }

    pub fn command_text(&self) -> &str {
        &self.command_text
    }

    pub fn parameters(&self) -> &[QueryParameter] {
        &self.parameters
    }

    pub fn column_count(&self) -> Option<usize> {
        self.column_count
    }
}

/// A statement counted against the manager until it is dropped (finalized).
struct PreparedStatement<'c> {
    statement: Statement<'c>,
    manager: &'c ConnectionManager,
}

impl<'c> PreparedStatement<'c> {
    fn prepare(lease: &'c Lease<'_>, command_text: &str) -> Result<Self> {
        let statement = lease.connection().prepare(command_text)?;
        let manager = lease.manager();
        manager.statement_prepared();
        Ok(Self { statement, manager })
    }
}

impl<'c> Deref for PreparedStatement<'c> {
    type Target = Statement<'c>;

    fn deref(&self) -> &Self::Target {
        &self.statement
    }
}

impl DerefMut for PreparedStatement<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.statement
    }
}

impl Drop for PreparedStatement<'_> {
    fn drop(&mut self) {
        self.manager.statement_finalized();
    }
}

fn bind(statement: &mut Statement<'_>, command: &QueryCommand, params: &[Value]) -> Result<()> {
    let declared = command.parameters();
    if declared.len() != params.len() {
        return Err(Error::ParameterArity {
            expected: declared.len(),
            actual: params.len(),
        });
    }
    for (parameter, value) in declared.iter().zip(params) {
        let index = statement
            .parameter_index(&format!("@{}", parameter.name()))?
            .ok_or_else(|| Error::UnknownParameter(parameter.name().to_string()))?;
        statement.raw_bind_parameter(index, value)?;
    }
    Ok(())
}

/// Runs commands against a provider's connection.
pub struct Executor<'p> {
    provider: &'p SqliteQueryProvider,
    rows_affected: Cell<usize>,
}

impl<'p> Executor<'p> {
    pub fn new(provider: &'p SqliteQueryProvider) -> Self {
        Self {
            provider,
            rows_affected: Cell::new(0),
        }
    }

    /// Run `command` and project every row. The result holds no engine
    /// resources and can be iterated any number of times.
    pub fn execute<T, P>(&self, command: &QueryCommand, params: &[Value], projector: P) -> Result<Vec<T>>
    where
        P: FnMut(&FieldReader<'_>) -> Result<T>,
    {
        self.execute_deferred(command, params, projector, |rows| rows.collect())
    }

    /// Run `command` and hand `consume` an iterator that projects one row per
    /// pull. The reader, statement and lease stay alive until `consume`
    /// returns, then are released in that order.
    pub fn execute_deferred<T, P, R, F>(
        &self,
        command: &QueryCommand,
        params: &[Value],
        projector: P,
        consume: F,
    ) -> Result<R>
    where
        P: FnMut(&FieldReader<'_>) -> Result<T>,
        F: FnOnce(&mut DeferredRows<'_, T, P>) -> Result<R>,
    {
        self.provider.log_command(command, params)?;
        let lease = self.provider.manager().lease()?;
        let result = self.run_query(&lease, command, params, projector, consume);
        let released = lease.release();
        let value = result?;
        released?;
        Ok(value)
    }

    fn run_query<T, P, R, F>(
        &self,
        lease: &Lease<'_>,
        command: &QueryCommand,
        params: &[Value],
        projector: P,
        consume: F,
    ) -> Result<R>
    where
        P: FnMut(&FieldReader<'_>) -> Result<T>,
        F: FnOnce(&mut DeferredRows<'_, T, P>) -> Result<R>,
    {
        let mut statement = PreparedStatement::prepare(lease, command.command_text())?;
        bind(&mut statement, command, params)?;

        let field_count = statement.column_count();
        if let Some(expected) = command.column_count() {
            if expected != field_count {
                return Err(Error::ColumnCountMismatch {
                    expected,
                    actual: field_count,
                });
            }
        }

        let converter = *self.provider.converter();
        let ticks = converter.store_date_time_as_ticks();
        let mut cursor = SqliteDataReader::new(statement.raw_query(), field_count, ticks);
        let reader: Box<dyn RowReader + '_> = if self.provider.config().buffer_result_rows {
            Box::new(BufferedReader::load(&mut cursor)?)
        } else {
            Box::new(cursor)
        };

        let mut rows = DeferredRows::new(FieldReader::new(reader, converter), projector);
        let result = consume(&mut rows);
        log::trace!("deferred read ended after {} rows", rows.rows_read());
        rows.fields.close();
        result
    }

    /// Run a command that returns no rows and report how many rows it
    /// changed. The count is also kept for [`Executor::rows_affected`].
    pub fn execute_command(&self, command: &QueryCommand, params: &[Value]) -> Result<usize> {
        self.provider.log_command(command, params)?;
        let affected = self.provider.manager().do_connected(|lease| {
            let mut statement = PreparedStatement::prepare(lease, command.command_text())?;
            bind(&mut statement, command, params)?;
            Ok(statement.raw_execute()?)
        })?;
        self.rows_affected.set(affected);
        Ok(affected)
    }

    /// Rows changed by the last [`Executor::execute_command`].
    pub fn rows_affected(&self) -> usize {
        self.rows_affected.get()
    }

    /// Convert a standalone value with the provider's settings.
    pub fn convert<T: Convert>(&self, value: &Value) -> Result<T> {
        self.provider.converter().convert(value.as_native())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cursor {
    Open,
    Closed,
    Done,
}

/// Rows of a deferred read, projected one at a time as they are pulled.
pub struct DeferredRows<'r, T, P> {
    fields: FieldReader<'r>,
    projector: P,
    cursor: Cursor,
    rows_read: usize,
    _row: PhantomData<fn() -> T>,
}

impl<'r, T, P> DeferredRows<'r, T, P> {
    fn new(fields: FieldReader<'r>, projector: P) -> Self {
        Self {
            fields,
            projector,
            cursor: Cursor::Open,
            rows_read: 0,
            _row: PhantomData,
        }
    }

    /// Stop early and release the engine cursor. The next pull yields
    /// [`Error::CursorClosed`].
    pub fn close(&mut self) {
        self.fields.close();
        if self.cursor == Cursor::Open {
            self.cursor = Cursor::Closed;
        }
    }

    pub fn rows_read(&self) -> usize {
        self.rows_read
    }

    pub fn field_count(&self) -> usize {
        self.fields.field_count()
    }
}

impl<T, P> Iterator for DeferredRows<'_, T, P>
where
    P: FnMut(&FieldReader<'_>) -> Result<T>,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor {
            Cursor::Open => {}
            Cursor::Closed => {
                self.cursor = Cursor::Done;
                return Some(Err(Error::CursorClosed));
            }
            Cursor::Done => return None,
        }
        match self.fields.advance() {
            Ok(true) => {
                self.rows_read += 1;
                Some((self.projector)(&self.fields))
            }
            Ok(false) => {
                self.fields.close();
                self.cursor = Cursor::Done;
                None
            }
            Err(err) => {
                self.fields.close();
                self.cursor = Cursor::Done;
                Some(Err(err))
            }
        }
    }
}
