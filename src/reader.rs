//! Row readers: the narrow contract the executor uses to walk a result set.
//!
//! # Intention
//!
//! - Classify each cell into a [`NativeClass`] before anything asks for a
//!   typed value.
//! - Provide best-effort typed getters that follow SQLite's own column
//!   accessor rules (numeric prefixes of text, truncation of reals, zero for
//!   NULL), so a reader can be swapped without changing projection code.

use chrono::NaiveDateTime;
use fallible_streaming_iterator::FallibleStreamingIterator;
use rusqlite::types::ValueRef;
use rusqlite::{Row, Rows};

use crate::error::{Error, Result};
use crate::value::{
    parse_date_time, ticks_to_date_time, Guid, NativeClass, NativeValue, Value,
};

/// Position of a reader within its result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Unread,
    Positioned,
    Exhausted,
    Closed,
}

/// A forward-only cursor over the rows of one executed statement.
pub trait RowReader {
    /// Number of columns, fixed for the lifetime of the statement.
    fn field_count(&self) -> usize;

    fn state(&self) -> ReaderState;

    /// Whether date-times are stored as ticks (INTEGER) rather than TEXT.
    fn store_date_time_as_ticks(&self) -> bool;

    /// Value of `ordinal` in the current row.
    fn value(&self, ordinal: usize) -> Result<NativeValue<'_>>;

    /// Move to the next row. Returns `false` once the result set is exhausted.
    fn advance(&mut self) -> Result<bool>;

    /// Release the engine-side cursor. Safe to call more than once.
    fn close(&mut self);

    fn native_class_of(&self, ordinal: usize) -> Result<NativeClass> {
        Ok(self.value(ordinal)?.class())
    }

    /// Raw bytes of a TEXT or BLOB cell, `None` for other classes. Text is
    /// returned as stored, whether or not it is valid UTF-8.
    fn raw_bytes(&self, ordinal: usize) -> Result<Option<&[u8]>> {
        Ok(match self.value(ordinal)? {
            NativeValue::Text(t) => Some(t.as_bytes()),
            NativeValue::Blob(b) => Some(b),
            _ => None,
        })
    }

    fn is_null(&self, ordinal: usize) -> Result<bool> {
        Ok(self.native_class_of(ordinal)? == NativeClass::Null)
    }

    fn get_i64(&self, ordinal: usize) -> Result<i64> {
        Ok(match self.value(ordinal)? {
            NativeValue::Null => 0,
            NativeValue::Integer(i) => i,
            NativeValue::Real(r) => r as i64,
            NativeValue::Text(t) => integer_prefix(t),
            NativeValue::Blob(b) => integer_prefix(&String::from_utf8_lossy(b)),
        })
    }

    /// Low 32 bits of the integer value, like `sqlite3_column_int`.
    fn get_i32(&self, ordinal: usize) -> Result<i32> {
        Ok(self.get_i64(ordinal)? as i32)
    }

    fn get_i16(&self, ordinal: usize) -> Result<i16> {
        Ok(self.get_i32(ordinal)? as i16)
    }

    fn get_byte(&self, ordinal: usize) -> Result<u8> {
        Ok(self.get_i32(ordinal)? as u8)
    }

    /// Character stored as its UTF-16 code unit.
    fn get_char(&self, ordinal: usize) -> Result<char> {
        let unit = self.get_i32(ordinal)? as u16;
        char::from_u32(u32::from(unit)).ok_or_else(|| Error::conversion(unit, "char"))
    }

    fn get_f64(&self, ordinal: usize) -> Result<f64> {
        Ok(match self.value(ordinal)? {
            NativeValue::Null => 0.0,
            NativeValue::Integer(i) => i as f64,
            NativeValue::Real(r) => r,
            NativeValue::Text(t) => real_prefix(t),
            NativeValue::Blob(b) => real_prefix(&String::from_utf8_lossy(b)),
        })
    }

    fn get_f32(&self, ordinal: usize) -> Result<f32> {
        Ok(self.get_f64(ordinal)? as f32)
    }

    /// NUMERIC columns come back from SQLite as REAL.
    fn get_decimal(&self, ordinal: usize) -> Result<f64> {
        self.get_f64(ordinal)
    }

    fn get_string(&self, ordinal: usize) -> Result<String> {
        if let Some(bytes) = self.raw_bytes(ordinal)? {
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }
        Ok(match self.value(ordinal)? {
            NativeValue::Null => String::new(),
            NativeValue::Integer(i) => i.to_string(),
            NativeValue::Real(r) => real_to_text(r),
            NativeValue::Text(t) => t.to_owned(),
            NativeValue::Blob(b) => String::from_utf8_lossy(b).into_owned(),
        })
    }

    fn get_blob(&self, ordinal: usize) -> Result<Vec<u8>> {
        if let Some(bytes) = self.raw_bytes(ordinal)? {
            return Ok(bytes.to_vec());
        }
        Ok(match self.value(ordinal)? {
            NativeValue::Null => Vec::new(),
            NativeValue::Blob(b) => b.to_vec(),
            NativeValue::Text(t) => t.as_bytes().to_vec(),
            NativeValue::Integer(i) => i.to_string().into_bytes(),
            NativeValue::Real(r) => real_to_text(r).into_bytes(),
        })
    }

    fn get_date_time(&self, ordinal: usize) -> Result<NaiveDateTime> {
        if self.store_date_time_as_ticks() {
            ticks_to_date_time(self.get_i64(ordinal)?)
        } else {
            parse_date_time(&self.get_string(ordinal)?)
        }
    }

    fn get_guid(&self, ordinal: usize) -> Result<Guid> {
        match self.value(ordinal)? {
            NativeValue::Blob(b) => Guid::from_slice(b),
            NativeValue::Text(t) => t.parse(),
            other => Err(Error::InvalidGuid(other.to_string())),
        }
    }
}

/// Integer prefix of `text` the way SQLite reads one: leading whitespace and
/// a sign are accepted, parsing stops at the first non-digit, no digits is 0.
pub(crate) fn integer_prefix(text: &str) -> i64 {
    let text = text.trim_start();
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let mut value: i64 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(byte - b'0');
        value = value.saturating_mul(10);
        value = if negative {
            value.saturating_sub(digit)
        } else {
            value.saturating_add(digit)
        };
    }
    value
}

/// Longest prefix of `text` that reads as a real number, 0.0 if none does.
pub(crate) fn real_prefix(text: &str) -> f64 {
    let text = text.trim_start();
    let bytes = text.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-' | b'+')) {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start {
        return 0.0;
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'-' | b'+')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    text[..end].parse().unwrap_or(0.0)
}

/// Reals keep a fractional part when rendered, as SQLite prints them.
pub(crate) fn real_to_text(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

fn check_ordinal(ordinal: usize, count: usize) -> Result<()> {
    if ordinal >= count {
        return Err(Error::ColumnOutOfRange { ordinal, count });
    }
    Ok(())
}

/// Reader over a statement being stepped by SQLite.
///
/// Closing drops the cursor, which resets the statement; the statement
/// itself is finalized by whoever prepared it.
pub struct SqliteDataReader<'stmt> {
    rows: Option<Rows<'stmt>>,
    field_count: usize,
    state: ReaderState,
    store_date_time_as_ticks: bool,
}

impl<'stmt> SqliteDataReader<'stmt> {
    pub fn new(rows: Rows<'stmt>, field_count: usize, store_date_time_as_ticks: bool) -> Self {
        Self {
            rows: Some(rows),
            field_count,
            state: ReaderState::Unread,
            store_date_time_as_ticks,
        }
    }

    fn current_row(&self) -> Result<&Row<'stmt>> {
        match self.state {
            ReaderState::Positioned => self
                .rows
                .as_ref()
                .and_then(|rows| rows.get())
                .ok_or(Error::NoCurrentRow),
            ReaderState::Closed => Err(Error::CursorClosed),
            ReaderState::Unread | ReaderState::Exhausted => Err(Error::NoCurrentRow),
        }
    }
}

impl RowReader for SqliteDataReader<'_> {
    fn field_count(&self) -> usize {
        self.field_count
    }

    fn state(&self) -> ReaderState {
        self.state
    }

    fn store_date_time_as_ticks(&self) -> bool {
        self.store_date_time_as_ticks
    }

    fn value(&self, ordinal: usize) -> Result<NativeValue<'_>> {
        check_ordinal(ordinal, self.field_count)?;
        let row = self.current_row()?;
        NativeValue::from_value_ref(row.get_ref(ordinal)?)
    }

    fn native_class_of(&self, ordinal: usize) -> Result<NativeClass> {
        check_ordinal(ordinal, self.field_count)?;
        Ok(self.current_row()?.get_ref(ordinal)?.data_type().into())
    }

    fn raw_bytes(&self, ordinal: usize) -> Result<Option<&[u8]>> {
        check_ordinal(ordinal, self.field_count)?;
        Ok(match self.current_row()?.get_ref(ordinal)? {
            ValueRef::Text(bytes) | ValueRef::Blob(bytes) => Some(bytes),
            _ => None,
        })
    }

    fn advance(&mut self) -> Result<bool> {
        let rows = match (&mut self.rows, self.state) {
            (Some(rows), ReaderState::Unread | ReaderState::Positioned) => rows,
            _ => return Ok(false),
        };
        if let Err(err) = rows.advance() {
            self.state = ReaderState::Exhausted;
            return Err(err.into());
        }
        if rows.get().is_some() {
            self.state = ReaderState::Positioned;
            Ok(true)
        } else {
            self.state = ReaderState::Exhausted;
            Ok(false)
        }
    }

    fn close(&mut self) {
        if self.rows.take().is_some() {
            log::trace!("sqlite reader closed");
        }
        self.state = ReaderState::Closed;
    }
}

/// Reader over rows already copied out of the engine.
#[derive(Debug)]
pub struct BufferedReader {
    field_count: usize,
    pending: std::vec::IntoIter<Vec<Value>>,
    current: Option<Vec<Value>>,
    state: ReaderState,
    store_date_time_as_ticks: bool,
}

impl BufferedReader {
    pub fn new(field_count: usize, rows: Vec<Vec<Value>>, store_date_time_as_ticks: bool) -> Self {
        Self {
            field_count,
            pending: rows.into_iter(),
            current: None,
            state: ReaderState::Unread,
            store_date_time_as_ticks,
        }
    }

    /// Drain `source` into memory and close it, freeing the engine cursor
    /// before any projection work starts.
    pub fn load(source: &mut dyn RowReader) -> Result<Self> {
        let field_count = source.field_count();
        let mut rows = Vec::new();
        let drained = (|| -> Result<()> {
            while source.advance()? {
                let row = (0..field_count)
                    .map(|i| match source.value(i) {
                        Ok(v) => Ok(v.to_owned_value()),
                        // Text that is not valid UTF-8 is kept, decoded lossily.
                        Err(Error::Conversion { .. }) => source.get_string(i).map(Value::Text),
                        Err(err) => Err(err),
                    })
                    .collect::<Result<Vec<_>>>()?;
                rows.push(row);
            }
            Ok(())
        })();
        source.close();
        drained?;
        log::trace!("buffered {} rows", rows.len());
        Ok(Self::new(
            field_count,
            rows,
            source.store_date_time_as_ticks(),
        ))
    }
}

impl RowReader for BufferedReader {
    fn field_count(&self) -> usize {
        self.field_count
    }

    fn state(&self) -> ReaderState {
        self.state
    }

    fn store_date_time_as_ticks(&self) -> bool {
        self.store_date_time_as_ticks
    }

    fn value(&self, ordinal: usize) -> Result<NativeValue<'_>> {
        check_ordinal(ordinal, self.field_count)?;
        match (self.state, &self.current) {
            (ReaderState::Positioned, Some(row)) => row
                .get(ordinal)
                .map(Value::as_native)
                .ok_or(Error::ColumnOutOfRange {
                    ordinal,
                    count: row.len(),
                }),
            (ReaderState::Closed, _) => Err(Error::CursorClosed),
            _ => Err(Error::NoCurrentRow),
        }
    }

    fn advance(&mut self) -> Result<bool> {
        if matches!(self.state, ReaderState::Exhausted | ReaderState::Closed) {
            return Ok(false);
        }
        self.current = self.pending.next();
        self.state = if self.current.is_some() {
            ReaderState::Positioned
        } else {
            ReaderState::Exhausted
        };
        Ok(self.current.is_some())
    }

    fn close(&mut self) {
        self.current = None;
        self.pending = Vec::new().into_iter();
        self.state = ReaderState::Closed;
    }
}
