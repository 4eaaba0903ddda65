//! Native SQLite values and the small set of value types built on top of them.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Timelike};
use rusqlite::types::{ToSql, ToSqlOutput, Type, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Storage class SQLite reports for a single cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeClass {
    Null,
    Integer,
    Real,
    Text,
    Blob,
}

impl From<Type> for NativeClass {
    fn from(ty: Type) -> Self {
        match ty {
            Type::Null => NativeClass::Null,
            Type::Integer => NativeClass::Integer,
            Type::Real => NativeClass::Real,
            Type::Text => NativeClass::Text,
            Type::Blob => NativeClass::Blob,
        }
    }
}

impl fmt::Display for NativeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NativeClass::Null => "NULL",
            NativeClass::Integer => "INTEGER",
            NativeClass::Real => "REAL",
            NativeClass::Text => "TEXT",
            NativeClass::Blob => "BLOB",
        };
        f.write_str(name)
    }
}

/// A cell of the current row, borrowed from the reader that produced it.
///
/// The borrow ends when the reader advances, which is what keeps callers from
/// holding on to column data the engine has already invalidated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NativeValue<'a> {
    Null,
    Integer(i64),
    Real(f64),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl<'a> NativeValue<'a> {
    /// Borrow a value from a rusqlite row. Text that is not valid UTF-8 is a
    /// conversion error rather than a lossy copy.
    pub fn from_value_ref(value: ValueRef<'a>) -> Result<Self> {
        Ok(match value {
            ValueRef::Null => NativeValue::Null,
            ValueRef::Integer(i) => NativeValue::Integer(i),
            ValueRef::Real(r) => NativeValue::Real(r),
            ValueRef::Text(t) => NativeValue::Text(
                std::str::from_utf8(t)
                    .map_err(|_| Error::conversion(format!("TEXT {:?}", t), "str"))?,
            ),
            ValueRef::Blob(b) => NativeValue::Blob(b),
        })
    }

    pub fn class(&self) -> NativeClass {
        match self {
            NativeValue::Null => NativeClass::Null,
            NativeValue::Integer(_) => NativeClass::Integer,
            NativeValue::Real(_) => NativeClass::Real,
            NativeValue::Text(_) => NativeClass::Text,
            NativeValue::Blob(_) => NativeClass::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, NativeValue::Null)
    }

    pub fn to_owned_value(&self) -> Value {
        match *self {
            NativeValue::Null => Value::Null,
            NativeValue::Integer(i) => Value::Integer(i),
            NativeValue::Real(r) => Value::Real(r),
            NativeValue::Text(t) => Value::Text(t.to_owned()),
            NativeValue::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl fmt::Display for NativeValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeValue::Null => f.write_str("NULL"),
            NativeValue::Integer(i) => write!(f, "INTEGER {}", i),
            NativeValue::Real(r) => write!(f, "REAL {}", r),
            NativeValue::Text(t) => write!(f, "TEXT '{}'", t),
            NativeValue::Blob(b) => write!(f, "BLOB x'{}'", hex::encode(b)),
        }
    }
}

/// Owned SQLite value, used for parameter bindings and buffered rows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn as_native(&self) -> NativeValue<'_> {
        match self {
            Value::Null => NativeValue::Null,
            Value::Integer(i) => NativeValue::Integer(*i),
            Value::Real(r) => NativeValue::Real(*r),
            Value::Text(t) => NativeValue::Text(t),
            Value::Blob(b) => NativeValue::Blob(b),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Encode a date-time the way the connection stores them: as ticks in an
    /// INTEGER, or as ISO-8601 TEXT. Fails for date-times beyond the tick range.
    pub fn from_date_time(value: NaiveDateTime, as_ticks: bool) -> Result<Self> {
        if as_ticks {
            Ok(Value::Integer(date_time_to_ticks(&value)?))
        } else {
            Ok(Value::Text(value.format(DATE_TIME_STORAGE_FORMAT).to_string()))
        }
    }
}

/// Rendering used by the command log: the bare value, without a class prefix.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(t) => f.write_str(t),
            Value::Blob(b) => write!(f, "x'{}'", hex::encode(b)),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(t) => ValueRef::Text(t.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

macro_rules! value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Integer(i64::from(v))
                }
            }
        )*
    };
}

value_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Real(f64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<char> for Value {
    fn from(v: char) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Value::Blob(v.to_vec())
    }
}

impl From<Guid> for Value {
    fn from(v: Guid) -> Self {
        Value::Text(v.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// 128-bit identifier, stored as hyphenated TEXT or as a 16-byte BLOB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct Guid([u8; 16]);

impl Guid {
    pub const NIL: Guid = Guid([0; 16]);

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Guid(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 16] = bytes
            .try_into()
            .map_err(|_| Error::InvalidGuid(format!("{} bytes", bytes.len())))?;
        Ok(Guid(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for Guid {
    type Err = Error;

    /// Accepts 32 hex digits, optionally hyphenated and wrapped in braces.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
        let digits: String = trimmed.chars().filter(|c| *c != '-').collect();
        if digits.len() != 32 {
            return Err(Error::InvalidGuid(s.to_string()));
        }
        let bytes = hex::decode(&digits).map_err(|_| Error::InvalidGuid(s.to_string()))?;
        Guid::from_slice(&bytes)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{}-{}-{}-{}-{}",
            hex::encode(&b[0..4]),
            hex::encode(&b[4..6]),
            hex::encode(&b[6..8]),
            hex::encode(&b[8..10]),
            hex::encode(&b[10..16])
        )
    }
}

/// Ticks are 100 ns intervals since 0001-01-01T00:00:00.
pub const TICKS_PER_MICROSECOND: i64 = 10;

const DATE_TIME_STORAGE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

const DATE_TIME_PARSE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Midnight of 0001-01-01, the zero point for ticks and the default date-time.
pub fn min_date_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(NaiveDateTime::MIN)
}

pub fn ticks_to_date_time(ticks: i64) -> Result<NaiveDateTime> {
    let micros = chrono::Duration::microseconds(ticks / TICKS_PER_MICROSECOND);
    let nanos = chrono::Duration::nanoseconds((ticks % TICKS_PER_MICROSECOND) * 100);
    min_date_time()
        .checked_add_signed(micros)
        .and_then(|dt| dt.checked_add_signed(nanos))
        .ok_or_else(|| Error::InvalidDateTime(format!("{} ticks", ticks)))
}

/// Ticks for `value`. An `i64` of ticks reaches about the year 29228.
pub fn date_time_to_ticks(value: &NaiveDateTime) -> Result<i64> {
    let out_of_range = || Error::InvalidDateTime(format!("{} is outside the tick range", value));
    let micros = value
        .signed_duration_since(min_date_time())
        .num_microseconds()
        .ok_or_else(out_of_range)?;
    let sub_micro = i64::from(value.nanosecond() % 1_000) / 100;
    micros
        .checked_mul(TICKS_PER_MICROSECOND)
        .and_then(|ticks| ticks.checked_add(sub_micro))
        .ok_or_else(out_of_range)
}

/// Parse the textual date-time forms SQLite's date functions produce, plus
/// RFC 3339 with an offset (normalized to UTC) and bare dates.
pub fn parse_date_time(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();
    for format in DATE_TIME_PARSE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.naive_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::InvalidDateTime(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guid_parses_hyphenated_and_braced_forms() {
        let text = "0f8fad5b-d9cb-469f-a165-70867728950e";
        let guid: Guid = text.parse().unwrap();
        assert_eq!(guid.to_string(), text);
        let braced: Guid = "{0F8FAD5B-D9CB-469F-A165-70867728950E}".parse().unwrap();
        assert_eq!(braced, guid);
        assert!("not-a-guid".parse::<Guid>().is_err());
    }

    #[test]
    fn ticks_match_known_instants() {
        // 2000-01-01T00:00:00 is 630822816000000000 ticks.
        let dt = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(date_time_to_ticks(&dt).unwrap(), 630_822_816_000_000_000);
        assert_eq!(ticks_to_date_time(630_822_816_000_000_000).unwrap(), dt);
        assert_eq!(ticks_to_date_time(0).unwrap(), min_date_time());
    }

    #[test]
    fn date_time_text_forms() {
        let expected = NaiveDate::from_ymd_opt(2021, 3, 4)
            .unwrap()
            .and_hms_opt(5, 6, 7)
            .unwrap();
        assert_eq!(parse_date_time("2021-03-04 05:06:07").unwrap(), expected);
        assert_eq!(parse_date_time("2021-03-04T05:06:07").unwrap(), expected);
        assert_eq!(parse_date_time("2021-03-04T05:06:07+00:00").unwrap(), expected);
        assert_eq!(
            parse_date_time("2021-03-04").unwrap(),
            expected.date().and_hms_opt(0, 0, 0).unwrap()
        );
        assert!(parse_date_time("yesterday").is_err());
    }

    #[test]
    fn date_times_past_the_tick_range_are_rejected() {
        let far = NaiveDate::from_ymd_opt(30000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert!(matches!(date_time_to_ticks(&far), Err(Error::InvalidDateTime(_))));
        assert!(matches!(Value::from_date_time(far, true), Err(Error::InvalidDateTime(_))));
        assert!(matches!(Value::from_date_time(far, false), Ok(Value::Text(_))));

        let late = NaiveDate::from_ymd_opt(10001, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let ticks = date_time_to_ticks(&late).unwrap();
        assert_eq!(ticks_to_date_time(ticks).unwrap(), late);
    }

    #[test]
    fn text_storage_round_trips() {
        let dt = NaiveDate::from_ymd_opt(1999, 12, 31)
            .unwrap()
            .and_hms_milli_opt(23, 59, 58, 250)
            .unwrap();
        match Value::from_date_time(dt, false).unwrap() {
            Value::Text(t) => assert_eq!(parse_date_time(&t).unwrap(), dt),
            other => panic!("expected text, got {:?}", other),
        }
        assert_eq!(
            Value::from_date_time(dt, true).unwrap(),
            Value::Integer(date_time_to_ticks(&dt).unwrap())
        );
    }

    #[test]
    fn options_bind_as_null() {
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::Text("a".into()));
        assert_eq!(Value::from(true), Value::Integer(1));
    }
}
