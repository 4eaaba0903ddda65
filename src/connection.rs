//! Reference-counted use of a single SQLite connection.
//!
//! # Intention
//!
//! - Open the connection on first use and close it when the last user leaves,
//!   but only if this manager was the one that opened it.
//! - Hand out [`Lease`] guards so release happens on every exit path.
//!
//! # Architectural Boundaries
//!
//! - The counter and flag live in `Cell`s: a manager belongs to one thread,
//!   and callers sharing it across threads must serialize access themselves.

use std::cell::{Cell, Ref, RefCell};

use rusqlite::Connection;

use crate::error::{Error, Result};

/// A connection that may or may not currently be open.
#[derive(Debug)]
pub struct SqliteConnection {
    path: String,
    handle: Option<Connection>,
}

impl SqliteConnection {
    /// A closed connection to the database file at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            handle: None,
        }
    }

    /// Wrap a connection someone else already opened. A manager never closes
    /// a connection it did not open.
    pub fn from_open(path: impl Into<String>, handle: Connection) -> Self {
        Self {
            path: path.into(),
            handle: Some(handle),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&Connection> {
        self.handle.as_ref()
    }

    pub fn open(&mut self) -> Result<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        if self.path.is_empty() {
            return Err(Error::Configuration("database path not specified".into()));
        }
        self.handle = Some(Connection::open(&self.path)?);
        log::trace!("opened sqlite connection at {}", self.path);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            if let Err((handle, err)) = handle.close() {
                self.handle = Some(handle);
                return Err(err.into());
            }
            log::trace!("closed sqlite connection at {}", self.path);
        }
        Ok(())
    }
}

/// Counts the spans that are using a connection.
#[derive(Debug)]
pub struct ConnectionManager {
    connection: RefCell<SqliteConnection>,
    leases: Cell<usize>,
    opened_connection: Cell<bool>,
    physical_opens: Cell<usize>,
    open_statements: Cell<usize>,
}

impl ConnectionManager {
    pub fn new(connection: SqliteConnection) -> Self {
        Self {
            connection: RefCell::new(connection),
            leases: Cell::new(0),
            opened_connection: Cell::new(false),
            physical_opens: Cell::new(0),
            open_statements: Cell::new(0),
        }
    }

    /// Start a span of use. The first span opens the connection unless it is
    /// already open.
    pub fn enter(&self) -> Result<()> {
        let count = self.leases.get();
        if count == 0 {
            let mut connection = self
                .connection
                .try_borrow_mut()
                .map_err(|_| Error::ConnectionBusy)?;
            if !connection.is_open() {
                connection.open()?;
                self.opened_connection.set(true);
                self.physical_opens.set(self.physical_opens.get() + 1);
            }
        }
        self.leases.set(count + 1);
        log::trace!("connection lease acquired ({} held)", count + 1);
        Ok(())
    }

    /// End a span of use. The last span closes the connection if `enter`
    /// opened it.
    ///
    /// # Panics
    ///
    /// Panics if no span is active.
    pub fn exit(&self) -> Result<()> {
        let count = self.leases.get();
        assert!(count > 0, "connection lease released with none held");
        self.leases.set(count - 1);
        log::trace!("connection lease released ({} held)", count - 1);
        if count == 1 && self.opened_connection.get() {
            let mut connection = self
                .connection
                .try_borrow_mut()
                .map_err(|_| Error::ConnectionBusy)?;
            connection.close()?;
            self.opened_connection.set(false);
        }
        Ok(())
    }

    /// Enter and return a guard that exits when dropped.
    pub fn lease(&self) -> Result<Lease<'_>> {
        self.enter()?;
        let handle = self
            .connection
            .try_borrow()
            .map_err(|_| Error::ConnectionBusy)
            .and_then(|c| Ref::filter_map(c, SqliteConnection::handle).map_err(|_| Error::ConnectionClosed));
        match handle {
            Ok(handle) => Ok(Lease {
                manager: self,
                handle: Some(handle),
            }),
            Err(err) => {
                self.exit()?;
                Err(err)
            }
        }
    }

    /// Run `action` while holding a lease.
    pub fn do_connected<R>(&self, action: impl FnOnce(&Lease<'_>) -> Result<R>) -> Result<R> {
        let lease = self.lease()?;
        let result = action(&lease);
        let released = lease.release();
        let value = result?;
        released?;
        Ok(value)
    }

    /// Run `action` while holding a lease. Transaction control stays with
    /// the command text the action executes.
    pub fn do_transacted<R>(&self, action: impl FnOnce(&Lease<'_>) -> Result<R>) -> Result<R> {
        self.do_connected(action)
    }

    pub fn lease_count(&self) -> usize {
        self.leases.get()
    }

    pub fn is_open(&self) -> bool {
        self.connection
            .try_borrow()
            .map(|c| c.is_open())
            .unwrap_or(true)
    }

    /// Whether the connection is open because this manager opened it.
    pub fn opened_connection(&self) -> bool {
        self.opened_connection.get()
    }

    /// Number of times this manager has physically opened the connection.
    pub fn physical_opens(&self) -> usize {
        self.physical_opens.get()
    }

    /// Prepared statements not yet finalized.
    pub fn open_statements(&self) -> usize {
        self.open_statements.get()
    }

    pub(crate) fn statement_prepared(&self) {
        self.open_statements.set(self.open_statements.get() + 1);
    }

    pub(crate) fn statement_finalized(&self) {
        self.open_statements.set(self.open_statements.get().saturating_sub(1));
    }
}

/// A claim on the manager's connection, released on drop.
#[derive(Debug)]
pub struct Lease<'m> {
    manager: &'m ConnectionManager,
    handle: Option<Ref<'m, Connection>>,
}

impl<'m> Lease<'m> {
    pub fn connection(&self) -> &Connection {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("lease used after release"),
        }
    }

    pub fn manager(&self) -> &'m ConnectionManager {
        self.manager
    }

    /// Release now, reporting any error from closing the connection.
    pub fn release(mut self) -> Result<()> {
        self.handle.take();
        let manager = self.manager;
        std::mem::forget(self);
        manager.exit()
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        self.handle.take();
        if let Err(err) = self.manager.exit() {
            log::warn!("error closing connection on lease release: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_manager() -> (ConnectionManager, NamedTempFile) {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        (ConnectionManager::new(SqliteConnection::new(path)), file)
    }

    #[test]
    fn opens_on_first_enter_and_closes_on_last_exit() {
        let (manager, _file) = temp_manager();
        assert!(!manager.is_open());
        manager.enter().unwrap();
        manager.enter().unwrap();
        assert!(manager.is_open());
        assert!(manager.opened_connection());
        manager.exit().unwrap();
        assert!(manager.is_open());
        manager.exit().unwrap();
        assert!(!manager.is_open());
        assert_eq!(manager.lease_count(), 0);
        assert_eq!(manager.physical_opens(), 1);
    }

    #[test]
    fn leaves_a_handed_in_connection_open() {
        let file = NamedTempFile::new().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let open = Connection::open(&path).unwrap();
        let manager = ConnectionManager::new(SqliteConnection::from_open(path, open));
        {
            let lease = manager.lease().unwrap();
            assert!(!manager.opened_connection());
            lease.connection().execute_batch("SELECT 1").unwrap();
        }
        assert_eq!(manager.lease_count(), 0);
        assert!(manager.is_open());
        assert_eq!(manager.physical_opens(), 0);
    }

    #[test]
    #[should_panic(expected = "released with none held")]
    fn exit_without_enter_is_a_programming_error() {
        let (manager, _file) = temp_manager();
        let _ = manager.exit();
    }

    #[test]
    fn do_connected_releases_when_the_action_fails() {
        let (manager, _file) = temp_manager();
        let result: Result<()> = manager.do_connected(|lease| {
            assert_eq!(lease.manager().lease_count(), 1);
            Err(Error::CursorClosed)
        });
        assert!(matches!(result, Err(Error::CursorClosed)));
        assert_eq!(manager.lease_count(), 0);
        assert!(!manager.is_open());
    }

    #[test]
    fn nested_spans_share_one_open() {
        let (manager, _file) = temp_manager();
        manager
            .do_transacted(|_| {
                manager.do_connected(|inner| {
                    assert_eq!(manager.lease_count(), 2);
                    inner.connection().execute_batch("CREATE TABLE t (x INTEGER)")?;
                    Ok(())
                })
            })
            .unwrap();
        assert_eq!(manager.physical_opens(), 1);
        assert!(!manager.is_open());
    }

    #[test]
    fn missing_path_fails_to_open() {
        let manager = ConnectionManager::new(SqliteConnection::new(""));
        assert!(matches!(manager.lease(), Err(Error::Configuration(_))));
        assert_eq!(manager.lease_count(), 0);
    }
}
