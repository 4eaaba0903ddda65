//! Mapping between abstract relational types and SQLite declarations.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Engine-independent relational type kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    BigInt,
    Binary,
    Bit,
    Char,
    DateTime,
    Decimal,
    Float,
    Image,
    Int,
    Money,
    NChar,
    NText,
    NVarChar,
    Real,
    UniqueIdentifier,
    SmallDateTime,
    SmallInt,
    SmallMoney,
    Text,
    Timestamp,
    TinyInt,
    VarBinary,
    VarChar,
    Variant,
    Xml,
    Udt,
    Structured,
    Date,
    Time,
    DateTime2,
    DateTimeOffset,
}

impl SqlType {
    pub const ALL: [SqlType; 31] = [
        SqlType::BigInt,
        SqlType::Binary,
        SqlType::Bit,
        SqlType::Char,
        SqlType::DateTime,
        SqlType::Decimal,
        SqlType::Float,
        SqlType::Image,
        SqlType::Int,
        SqlType::Money,
        SqlType::NChar,
        SqlType::NText,
        SqlType::NVarChar,
        SqlType::Real,
        SqlType::UniqueIdentifier,
        SqlType::SmallDateTime,
        SqlType::SmallInt,
        SqlType::SmallMoney,
        SqlType::Text,
        SqlType::Timestamp,
        SqlType::TinyInt,
        SqlType::VarBinary,
        SqlType::VarChar,
        SqlType::Variant,
        SqlType::Xml,
        SqlType::Udt,
        SqlType::Structured,
        SqlType::Date,
        SqlType::Time,
        SqlType::DateTime2,
        SqlType::DateTimeOffset,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SqlType::BigInt => "BigInt",
            SqlType::Binary => "Binary",
            SqlType::Bit => "Bit",
            SqlType::Char => "Char",
            SqlType::DateTime => "DateTime",
            SqlType::Decimal => "Decimal",
            SqlType::Float => "Float",
            SqlType::Image => "Image",
            SqlType::Int => "Int",
            SqlType::Money => "Money",
            SqlType::NChar => "NChar",
            SqlType::NText => "NText",
            SqlType::NVarChar => "NVarChar",
            SqlType::Real => "Real",
            SqlType::UniqueIdentifier => "UniqueIdentifier",
            SqlType::SmallDateTime => "SmallDateTime",
            SqlType::SmallInt => "SmallInt",
            SqlType::SmallMoney => "SmallMoney",
            SqlType::Text => "Text",
            SqlType::Timestamp => "Timestamp",
            SqlType::TinyInt => "TinyInt",
            SqlType::VarBinary => "VarBinary",
            SqlType::VarChar => "VarChar",
            SqlType::Variant => "Variant",
            SqlType::Xml => "Xml",
            SqlType::Udt => "Udt",
            SqlType::Structured => "Structured",
            SqlType::Date => "Date",
            SqlType::Time => "Time",
            SqlType::DateTime2 => "DateTime2",
            SqlType::DateTimeOffset => "DateTimeOffset",
        }
    }

    /// Kinds whose size argument is a length.
    pub fn is_sized(&self) -> bool {
        matches!(
            self,
            SqlType::Binary
                | SqlType::Char
                | SqlType::Image
                | SqlType::NChar
                | SqlType::NText
                | SqlType::NVarChar
                | SqlType::Text
                | SqlType::VarBinary
                | SqlType::VarChar
                | SqlType::Xml
        )
    }

    /// Kinds whose size arguments are precision and scale.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            SqlType::Decimal
                | SqlType::Money
                | SqlType::SmallMoney
                | SqlType::Float
                | SqlType::Real
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Case-insensitive match against the kind names.
impl FromStr for SqlType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SqlType::ALL
            .iter()
            .copied()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownTypeName(s.to_string()))
    }
}

/// A column or parameter type: kind plus size arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeDescriptor {
    pub sql_type: SqlType,
    pub length: u32,
    pub precision: u16,
    pub scale: u16,
    pub not_null: bool,
}

impl TypeDescriptor {
    /// Length used for `(MAX)`.
    pub const MAX_LENGTH: u32 = i32::MAX as u32;

    pub fn new(sql_type: SqlType) -> Self {
        Self {
            sql_type,
            length: 0,
            precision: 0,
            scale: 0,
            not_null: false,
        }
    }

    pub fn with_length(mut self, length: u32) -> Self {
        self.length = length;
        self
    }

    pub fn with_precision(mut self, precision: u16, scale: u16) -> Self {
        self.precision = precision;
        self.scale = scale;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

impl From<SqlType> for TypeDescriptor {
    fn from(sql_type: SqlType) -> Self {
        TypeDescriptor::new(sql_type)
    }
}

/// SQLite's view of the abstract type kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteTypeSystem;

impl SqliteTypeSystem {
    pub fn new() -> Self {
        SqliteTypeSystem
    }

    /// Kind for a type name SQLite reports or a schema declares.
    pub fn classify(&self, type_name: &str) -> Result<SqlType> {
        let name = type_name.trim();
        let matches = |candidates: &[&str]| candidates.iter().any(|c| c.eq_ignore_ascii_case(name));
        if matches(&["TEXT", "CHAR", "CLOB", "VARYINGCHARACTER", "NATIONALVARYINGCHARACTER"]) {
            Ok(SqlType::VarChar)
        } else if matches(&["INT", "INTEGER"]) {
            Ok(SqlType::BigInt)
        } else if matches(&["BLOB"]) {
            Ok(SqlType::Binary)
        } else if matches(&["BOOLEAN"]) {
            Ok(SqlType::Bit)
        } else if matches(&["NUMERIC"]) {
            Ok(SqlType::Decimal)
        } else {
            name.parse()
        }
    }

    /// Column declaration for `descriptor`. Every kind yields something.
    pub fn declare(&self, descriptor: &TypeDescriptor, suppress_length: bool) -> String {
        let length = |keyword: &str| {
            if descriptor.length > 0 && !suppress_length {
                format!("{}({})", keyword, descriptor.length)
            } else {
                keyword.to_string()
            }
        };
        let precision = |keyword: &str| {
            if descriptor.precision != 0 {
                format!("{}({})", keyword, descriptor.precision)
            } else {
                keyword.to_string()
            }
        };
        match descriptor.sql_type {
            SqlType::BigInt | SqlType::SmallInt | SqlType::Int | SqlType::TinyInt => {
                "INTEGER".to_string()
            }
            SqlType::Bit => "BOOLEAN".to_string(),
            SqlType::SmallDateTime => "DATETIME".to_string(),
            SqlType::Char | SqlType::NChar => length("CHAR"),
            SqlType::Variant | SqlType::Binary | SqlType::Image | SqlType::UniqueIdentifier => {
                length("BLOB")
            }
            SqlType::Xml
            | SqlType::NText
            | SqlType::NVarChar
            | SqlType::Text
            | SqlType::VarBinary
            | SqlType::VarChar => length("TEXT"),
            SqlType::Decimal | SqlType::Money | SqlType::SmallMoney => precision("NUMERIC"),
            SqlType::Float | SqlType::Real => precision("FLOAT"),
            other => other.name().to_string(),
        }
    }

    /// Parse a declaration such as `VARCHAR(100)`, `DECIMAL(10, 2)`,
    /// `NVARCHAR(MAX)` or `INTEGER NOT NULL`.
    pub fn parse(&self, declaration: &str) -> Result<TypeDescriptor> {
        let invalid = || Error::InvalidTypeDeclaration(declaration.to_string());
        let mut rest = declaration.trim();
        let mut not_null = false;
        let upper = rest.to_ascii_uppercase();
        if let Some(stripped) = upper.strip_suffix("NOT NULL") {
            not_null = true;
            rest = rest[..stripped.len()].trim_end();
        }

        let (name, args) = match rest.find('(') {
            Some(open) => {
                let close = rest.rfind(')').filter(|c| *c > open).ok_or_else(invalid)?;
                if !rest[close + 1..].trim().is_empty() {
                    return Err(invalid());
                }
                let args: Vec<&str> = rest[open + 1..close].split(',').map(str::trim).collect();
                (&rest[..open], args)
            }
            None => (rest, Vec::new()),
        };
        let name: String = name.split_whitespace().collect();
        if name.is_empty() || args.len() > 2 {
            return Err(invalid());
        }

        let mut descriptor = TypeDescriptor::new(self.classify(&name)?);
        descriptor.not_null = not_null;
        let number = |arg: &str| arg.parse::<u32>().map_err(|_| invalid());
        match args.as_slice() {
            [] => {}
            [size] if size.eq_ignore_ascii_case("MAX") => {
                descriptor.length = TypeDescriptor::MAX_LENGTH;
            }
            [size] if descriptor.sql_type.is_sized() => {
                descriptor.length = number(*size)?;
            }
            [precision, scale @ ..] if descriptor.sql_type.is_numeric() => {
                descriptor.precision = u16::try_from(number(*precision)?).map_err(|_| invalid())?;
                if let Some(scale) = scale.first() {
                    descriptor.scale = u16::try_from(number(*scale)?).map_err(|_| invalid())?;
                }
            }
            // SQLite accepts and ignores arguments on other kinds, e.g. INT(11).
            _ => {}
        }
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// SQLite column affinity, derived from a declared type name.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Affinity {
        Integer,
        Text,
        Blob,
        Real,
        Numeric,
    }

    /// Affinity SQLite assigns to a column declared as `declaration`.
    fn column_affinity(declaration: &str) -> Affinity {
        let upper = declaration.to_ascii_uppercase();
        if upper.contains("INT") {
            Affinity::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            Affinity::Text
        } else if upper.contains("BLOB") || upper.trim().is_empty() {
            Affinity::Blob
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            Affinity::Real
        } else {
            Affinity::Numeric
        }
    }

    #[test]
    fn classify_engine_names() {
        let ts = SqliteTypeSystem::new();
        assert_eq!(ts.classify("integer").unwrap(), SqlType::BigInt);
        assert_eq!(ts.classify("INT").unwrap(), SqlType::BigInt);
        assert_eq!(ts.classify("clob").unwrap(), SqlType::VarChar);
        assert_eq!(ts.classify("NationalVaryingCharacter").unwrap(), SqlType::VarChar);
        assert_eq!(ts.classify("Blob").unwrap(), SqlType::Binary);
        assert_eq!(ts.classify("boolean").unwrap(), SqlType::Bit);
        assert_eq!(ts.classify("NUMERIC").unwrap(), SqlType::Decimal);
        assert_eq!(ts.classify("datetime").unwrap(), SqlType::DateTime);
        assert_eq!(ts.classify("uniqueidentifier").unwrap(), SqlType::UniqueIdentifier);
        assert!(matches!(ts.classify("JSONB"), Err(Error::UnknownTypeName(_))));
    }

    #[test]
    fn declare_sizes() {
        let ts = SqliteTypeSystem::new();
        let declare = |d: TypeDescriptor, suppress| ts.declare(&d, suppress);
        assert_eq!(declare(SqlType::TinyInt.into(), false), "INTEGER");
        assert_eq!(declare(SqlType::Bit.into(), false), "BOOLEAN");
        assert_eq!(declare(SqlType::SmallDateTime.into(), false), "DATETIME");
        assert_eq!(declare(TypeDescriptor::new(SqlType::NChar).with_length(10), false), "CHAR(10)");
        assert_eq!(declare(TypeDescriptor::new(SqlType::NChar).with_length(10), true), "CHAR");
        assert_eq!(declare(TypeDescriptor::new(SqlType::UniqueIdentifier).with_length(16), false), "BLOB(16)");
        assert_eq!(declare(TypeDescriptor::new(SqlType::NVarChar).with_length(40), false), "TEXT(40)");
        assert_eq!(declare(SqlType::VarBinary.into(), false), "TEXT");
        assert_eq!(declare(TypeDescriptor::new(SqlType::Money).with_precision(19, 4), true), "NUMERIC(19)");
        assert_eq!(declare(SqlType::Decimal.into(), false), "NUMERIC");
        assert_eq!(declare(TypeDescriptor::new(SqlType::Real).with_precision(24, 0), false), "FLOAT(24)");
        assert_eq!(declare(SqlType::DateTime.into(), false), "DateTime");
        assert_eq!(declare(SqlType::Timestamp.into(), false), "Timestamp");
    }

    #[test]
    fn declarations_classify_back_to_a_compatible_kind() {
        let ts = SqliteTypeSystem::new();
        for sql_type in SqlType::ALL {
            let descriptor = TypeDescriptor::new(sql_type).with_length(8).with_precision(10, 2);
            let declared = ts.declare(&descriptor, false);
            let keyword = declared.split('(').next().unwrap();
            let classified = ts.classify(keyword).unwrap();
            let redeclared = ts.declare(&TypeDescriptor::new(classified), true);
            assert_eq!(
                column_affinity(&redeclared),
                column_affinity(&declared),
                "{} declared as {} classified as {}",
                sql_type,
                declared,
                classified
            );
        }
        assert_eq!(ts.classify("INTEGER").unwrap(), SqlType::BigInt);
    }

    #[test]
    fn parse_declarations() {
        let ts = SqliteTypeSystem::new();
        let varchar = ts.parse("VarChar(100)").unwrap();
        assert_eq!(varchar.sql_type, SqlType::VarChar);
        assert_eq!(varchar.length, 100);

        let decimal = ts.parse("DECIMAL(10, 2) NOT NULL").unwrap();
        assert_eq!(decimal.sql_type, SqlType::Decimal);
        assert_eq!((decimal.precision, decimal.scale), (10, 2));
        assert!(decimal.not_null);

        let max = ts.parse("NVARCHAR(MAX)").unwrap();
        assert_eq!(max.length, TypeDescriptor::MAX_LENGTH);

        let national = ts.parse("NATIONAL VARYING CHARACTER(20)").unwrap();
        assert_eq!(national.sql_type, SqlType::VarChar);
        assert_eq!(national.length, 20);

        assert_eq!(ts.parse("integer").unwrap().sql_type, SqlType::BigInt);
        assert_eq!(ts.parse("INT(11)").unwrap().length, 0);
        assert!(ts.parse("TEXT(abc)").is_err());
        assert!(ts.parse("TEXT(10").is_err());
        assert!(ts.parse("").is_err());
    }

    #[test]
    fn affinity_rules() {
        assert_eq!(column_affinity("BIGINT"), Affinity::Integer);
        assert_eq!(column_affinity("NVARCHAR(20)"), Affinity::Text);
        assert_eq!(column_affinity(""), Affinity::Blob);
        assert_eq!(column_affinity("DOUBLE PRECISION"), Affinity::Real);
        assert_eq!(column_affinity("DATETIME"), Affinity::Numeric);
    }
}
