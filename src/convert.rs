//! Coercion of native SQLite values into the types a projector asks for.
//!
//! Every conversion is a match over the closed [`NativeValue`] taxonomy on one
//! side and a concrete Rust target on the other. NULL is the only input that
//! ever produces a default; any other value that does not fit is an error.

use chrono::NaiveDateTime;

use crate::error::{Error, Result};
use crate::value::{min_date_time, parse_date_time, ticks_to_date_time, Guid, NativeValue, Value};

/// A type a field can be materialized into.
pub trait Convert: Sized {
    /// Name used in conversion diagnostics.
    const TARGET: &'static str;

    /// Value produced for SQL NULL.
    fn default_value() -> Self;

    /// Convert a value. Callers normally go through [`TypeConverter::convert`],
    /// which handles NULL before this is reached.
    fn from_native(value: NativeValue<'_>, converter: &TypeConverter) -> Result<Self>;
}

/// Per-connection conversion settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeConverter {
    store_date_time_as_ticks: bool,
}

impl TypeConverter {
    pub fn new(store_date_time_as_ticks: bool) -> Self {
        Self {
            store_date_time_as_ticks,
        }
    }

    pub fn store_date_time_as_ticks(&self) -> bool {
        self.store_date_time_as_ticks
    }

    pub fn convert<T: Convert>(&self, value: NativeValue<'_>) -> Result<T> {
        if value.is_null() {
            return Ok(T::default_value());
        }
        T::from_native(value, self)
    }
}

/// Widest integer view of a value, for width-checked narrowing afterwards.
/// Reals round half to even; text must be a complete integer literal.
fn to_i128(value: NativeValue<'_>, target: &'static str) -> Result<i128> {
    match value {
        NativeValue::Integer(i) => Ok(i128::from(i)),
        NativeValue::Real(r) => {
            let rounded = r.round_ties_even();
            if rounded.is_finite() && rounded.abs() < 1.7e38 {
                Ok(rounded as i128)
            } else {
                Err(Error::conversion(value, target))
            }
        }
        NativeValue::Text(t) => t
            .trim()
            .parse::<i128>()
            .map_err(|_| Error::conversion(value, target)),
        NativeValue::Null | NativeValue::Blob(_) => Err(Error::conversion(value, target)),
    }
}

fn to_f64(value: NativeValue<'_>, target: &'static str) -> Result<f64> {
    match value {
        NativeValue::Integer(i) => Ok(i as f64),
        NativeValue::Real(r) => Ok(r),
        NativeValue::Text(t) => t
            .trim()
            .parse::<f64>()
            .map_err(|_| Error::conversion(value, target)),
        NativeValue::Null | NativeValue::Blob(_) => Err(Error::conversion(value, target)),
    }
}

macro_rules! convert_int {
    ($($ty:ty),*) => {
        $(
            impl Convert for $ty {
                const TARGET: &'static str = stringify!($ty);

                fn default_value() -> Self {
                    0
                }

                fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
                    let exact = match value {
                        NativeValue::Integer(i) => <$ty>::try_from(i).ok(),
                        _ => None,
                    };
                    if let Some(v) = exact {
                        return Ok(v);
                    }
                    let wide = to_i128(value, Self::TARGET)?;
                    <$ty>::try_from(wide).map_err(|_| Error::conversion(value, Self::TARGET))
                }
            }
        )*
    };
}

convert_int!(i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);

impl Convert for f64 {
    const TARGET: &'static str = "f64";

    fn default_value() -> Self {
        0.0
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        to_f64(value, Self::TARGET)
    }
}

impl Convert for f32 {
    const TARGET: &'static str = "f32";

    fn default_value() -> Self {
        0.0
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        to_f64(value, Self::TARGET).map(|v| v as f32)
    }
}

impl Convert for bool {
    const TARGET: &'static str = "bool";

    fn default_value() -> Self {
        false
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        match value {
            NativeValue::Integer(i) => Ok(i != 0),
            NativeValue::Real(r) => Ok(r != 0.0),
            NativeValue::Text(t) if t.trim().eq_ignore_ascii_case("true") => Ok(true),
            NativeValue::Text(t) if t.trim().eq_ignore_ascii_case("false") => Ok(false),
            _ => Err(Error::conversion(value, Self::TARGET)),
        }
    }
}

impl Convert for String {
    const TARGET: &'static str = "String";

    fn default_value() -> Self {
        String::new()
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        match value {
            NativeValue::Text(t) => Ok(t.to_owned()),
            NativeValue::Integer(i) => Ok(i.to_string()),
            NativeValue::Real(r) => Ok(r.to_string()),
            NativeValue::Null | NativeValue::Blob(_) => Err(Error::conversion(value, Self::TARGET)),
        }
    }
}

impl Convert for char {
    const TARGET: &'static str = "char";

    fn default_value() -> Self {
        '\0'
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        let converted = match value {
            NativeValue::Text(t) => {
                let mut chars = t.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Some(c),
                    _ => None,
                }
            }
            NativeValue::Integer(i) => u32::try_from(i).ok().and_then(char::from_u32),
            _ => None,
        };
        converted.ok_or_else(|| Error::conversion(value, Self::TARGET))
    }
}

impl Convert for Vec<u8> {
    const TARGET: &'static str = "Vec<u8>";

    fn default_value() -> Self {
        Vec::new()
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        match value {
            NativeValue::Blob(b) => Ok(b.to_vec()),
            _ => Err(Error::conversion(value, Self::TARGET)),
        }
    }
}

impl Convert for NaiveDateTime {
    const TARGET: &'static str = "NaiveDateTime";

    fn default_value() -> Self {
        min_date_time()
    }

    fn from_native(value: NativeValue<'_>, converter: &TypeConverter) -> Result<Self> {
        match value {
            NativeValue::Text(t) => parse_date_time(t),
            NativeValue::Integer(ticks) if converter.store_date_time_as_ticks() => {
                ticks_to_date_time(ticks)
            }
            _ => Err(Error::conversion(value, Self::TARGET)),
        }
    }
}

impl Convert for Guid {
    const TARGET: &'static str = "Guid";

    fn default_value() -> Self {
        Guid::NIL
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        match value {
            NativeValue::Text(t) => t.parse(),
            NativeValue::Blob(b) => Guid::from_slice(b),
            _ => Err(Error::conversion(value, Self::TARGET)),
        }
    }
}

impl Convert for Value {
    const TARGET: &'static str = "Value";

    fn default_value() -> Self {
        Value::Null
    }

    fn from_native(value: NativeValue<'_>, _: &TypeConverter) -> Result<Self> {
        Ok(value.to_owned_value())
    }
}

impl<T: Convert> Convert for Option<T> {
    const TARGET: &'static str = T::TARGET;

    fn default_value() -> Self {
        None
    }

    fn from_native(value: NativeValue<'_>, converter: &TypeConverter) -> Result<Self> {
        if value.is_null() {
            return Ok(None);
        }
        T::from_native(value, converter).map(Some)
    }
}

/// An enumeration stored by symbolic name (TEXT) or by ordinal (INTEGER).
///
/// Ordinals are not checked against the declared members, so a type
/// implementing this must be able to hold any value of its `Repr`. Declare
/// one with [`sql_enum!`](crate::sql_enum).
pub trait SqlEnum: Copy + Convert {
    /// Underlying integer type.
    type Repr: Convert + Copy + PartialEq + 'static;

    /// Declared members, as (name, ordinal).
    const MEMBERS: &'static [(&'static str, Self::Repr)];

    fn from_repr(repr: Self::Repr) -> Self;

    fn to_repr(&self) -> Self::Repr;

    /// Declared name for this value, if it is a member.
    fn name(&self) -> Option<&'static str> {
        let repr = self.to_repr();
        Self::MEMBERS
            .iter()
            .find(|(_, ordinal)| *ordinal == repr)
            .map(|(name, _)| *name)
    }
}

/// Shared body of [`Convert::from_native`] for [`SqlEnum`] types.
pub fn convert_enum<E: SqlEnum>(value: NativeValue<'_>, converter: &TypeConverter) -> Result<E> {
    match value {
        NativeValue::Text(name) => E::MEMBERS
            .iter()
            .find(|(member, _)| *member == name)
            .map(|(_, ordinal)| E::from_repr(*ordinal))
            .ok_or_else(|| Error::UnknownEnumName {
                name: name.to_string(),
                target: E::TARGET,
            }),
        NativeValue::Integer(_) | NativeValue::Real(_) => {
            let repr = E::Repr::from_native(value, converter).map_err(|_| Error::conversion(value, E::TARGET))?;
            Ok(E::from_repr(repr))
        }
        NativeValue::Null | NativeValue::Blob(_) => Err(Error::conversion(value, E::TARGET)),
    }
}

/// Declare an integer-backed enumeration that converts from its member names
/// and from any ordinal of its underlying type.
///
/// ```
/// rust_sqlite_provider::sql_enum! {
///     pub struct Color: i32 {
///         RED = 1,
///         GREEN = 2,
///     }
/// }
///
/// assert_eq!(Color::RED.0, 1);
/// ```
#[macro_export]
macro_rules! sql_enum {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident : $repr:ty {
            $( $(#[$member_meta:meta])* $member:ident = $ordinal:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis struct $name(pub $repr);

        #[allow(non_upper_case_globals)]
        impl $name {
            $( $(#[$member_meta])* pub const $member: $name = $name($ordinal); )*
        }

        impl $crate::convert::Convert for $name {
            const TARGET: &'static str = stringify!($name);

            fn default_value() -> Self {
                $name(0)
            }

            fn from_native(
                value: $crate::value::NativeValue<'_>,
                converter: &$crate::convert::TypeConverter,
            ) -> $crate::error::Result<Self> {
                $crate::convert::convert_enum(value, converter)
            }
        }

        impl $crate::convert::SqlEnum for $name {
            type Repr = $repr;

            const MEMBERS: &'static [(&'static str, $repr)] = &[
                $( (stringify!($member), $ordinal) ),*
            ];

            fn from_repr(repr: $repr) -> Self {
                $name(repr)
            }

            fn to_repr(&self) -> $repr {
                self.0
            }
        }

        impl ::std::convert::From<$name> for $crate::value::Value {
            fn from(v: $name) -> Self {
                $crate::value::Value::from(v.0)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    crate::sql_enum! {
        struct Shade: u8 {
            Light = 1,
            Dark = 2,
        }
    }

    crate::sql_enum! {
        struct Priority: i64 {
            LOW = -1,
            HIGH = 10,
        }
    }

    fn ticks() -> TypeConverter {
        TypeConverter::new(true)
    }

    #[test]
    fn null_yields_the_default_for_every_target() {
        let c = ticks();
        assert_eq!(c.convert::<i32>(NativeValue::Null).unwrap(), 0);
        assert_eq!(c.convert::<u64>(NativeValue::Null).unwrap(), 0);
        assert_eq!(c.convert::<f64>(NativeValue::Null).unwrap(), 0.0);
        assert!(!c.convert::<bool>(NativeValue::Null).unwrap());
        assert_eq!(c.convert::<String>(NativeValue::Null).unwrap(), "");
        assert_eq!(c.convert::<char>(NativeValue::Null).unwrap(), '\0');
        assert!(c.convert::<Vec<u8>>(NativeValue::Null).unwrap().is_empty());
        assert_eq!(c.convert::<Option<i32>>(NativeValue::Null).unwrap(), None);
        assert_eq!(c.convert::<Guid>(NativeValue::Null).unwrap(), Guid::NIL);
        assert_eq!(c.convert::<Value>(NativeValue::Null).unwrap(), Value::Null);
        assert_eq!(
            c.convert::<NaiveDateTime>(NativeValue::Null).unwrap(),
            min_date_time()
        );
        assert_eq!(c.convert::<Shade>(NativeValue::Null).unwrap(), Shade(0));
    }

    #[test]
    fn integers_narrow_with_range_checks() {
        let c = ticks();
        assert_eq!(c.convert::<i32>(NativeValue::Integer(5)).unwrap(), 5);
        assert_eq!(c.convert::<i64>(NativeValue::Integer(i64::MIN)).unwrap(), i64::MIN);
        assert_eq!(c.convert::<u8>(NativeValue::Integer(255)).unwrap(), 255);
        assert!(matches!(
            c.convert::<u8>(NativeValue::Integer(256)),
            Err(Error::Conversion { target: "u8", .. })
        ));
        assert!(c.convert::<u32>(NativeValue::Integer(-1)).is_err());
        assert_eq!(c.convert::<i64>(NativeValue::Text(" 42 ")).unwrap(), 42);
        assert_eq!(
            c.convert::<u64>(NativeValue::Text("18446744073709551615")).unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn reals_round_half_to_even() {
        let c = ticks();
        assert_eq!(c.convert::<i32>(NativeValue::Real(2.5)).unwrap(), 2);
        assert_eq!(c.convert::<i32>(NativeValue::Real(3.5)).unwrap(), 4);
        assert_eq!(c.convert::<i32>(NativeValue::Real(-1.2)).unwrap(), -1);
        assert!(c.convert::<i32>(NativeValue::Real(f64::NAN)).is_err());
        assert!(c.convert::<i8>(NativeValue::Real(1e6)).is_err());
    }

    #[test]
    fn unconvertible_values_are_errors_not_defaults() {
        let c = ticks();
        assert!(matches!(
            c.convert::<i32>(NativeValue::Text("abc")),
            Err(Error::Conversion { .. })
        ));
        assert!(c.convert::<f64>(NativeValue::Blob(&[1, 2])).is_err());
        assert!(c.convert::<bool>(NativeValue::Text("maybe")).is_err());
        assert!(c.convert::<String>(NativeValue::Blob(&[0])).is_err());
        assert!(c.convert::<Vec<u8>>(NativeValue::Text("x")).is_err());
        assert!(c.convert::<char>(NativeValue::Text("xy")).is_err());
        assert!(c.convert::<Option<i32>>(NativeValue::Text("x")).is_err());
    }

    #[test]
    fn representation_changes() {
        let c = ticks();
        assert_eq!(c.convert::<f64>(NativeValue::Integer(3)).unwrap(), 3.0);
        assert_eq!(c.convert::<f32>(NativeValue::Text("1.5")).unwrap(), 1.5);
        assert_eq!(c.convert::<String>(NativeValue::Integer(7)).unwrap(), "7");
        assert_eq!(c.convert::<String>(NativeValue::Real(0.5)).unwrap(), "0.5");
        assert!(c.convert::<bool>(NativeValue::Integer(2)).unwrap());
        assert!(!c.convert::<bool>(NativeValue::Real(0.0)).unwrap());
        assert!(c.convert::<bool>(NativeValue::Text("TRUE")).unwrap());
        assert_eq!(c.convert::<char>(NativeValue::Integer(97)).unwrap(), 'a');
        assert_eq!(c.convert::<char>(NativeValue::Text("z")).unwrap(), 'z');
        assert_eq!(
            c.convert::<Option<i64>>(NativeValue::Integer(9)).unwrap(),
            Some(9)
        );
        assert_eq!(
            c.convert::<Value>(NativeValue::Text("t")).unwrap(),
            Value::Text("t".into())
        );
    }

    #[test]
    fn enums_parse_names_exactly() {
        let c = ticks();
        assert_eq!(c.convert::<Shade>(NativeValue::Text("Dark")).unwrap(), Shade::Dark);
        assert!(matches!(
            c.convert::<Shade>(NativeValue::Text("dark")),
            Err(Error::UnknownEnumName { target: "Shade", .. })
        ));
        assert_eq!(Shade::Dark.name(), Some("Dark"));
        assert_eq!(Shade(9).name(), None);
    }

    #[test]
    fn enum_ordinals_change_width_without_membership_checks() {
        let c = ticks();
        // i64 column into a u8-backed enum: narrowed, not rejected for width.
        assert_eq!(c.convert::<Shade>(NativeValue::Integer(2)).unwrap(), Shade::Dark);
        assert_eq!(c.convert::<Shade>(NativeValue::Integer(77)).unwrap(), Shade(77));
        assert!(c.convert::<Shade>(NativeValue::Integer(300)).is_err());
        assert_eq!(c.convert::<Priority>(NativeValue::Integer(-1)).unwrap(), Priority::LOW);
        assert_eq!(c.convert::<Priority>(NativeValue::Real(10.0)).unwrap(), Priority::HIGH);
        assert!(c.convert::<Priority>(NativeValue::Blob(&[])).is_err());
        assert_eq!(Value::from(Shade::Light), Value::Integer(1));
    }

    #[test]
    fn date_times_depend_on_storage() {
        let expected = NaiveDate::from_ymd_opt(2000, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let as_ticks = NativeValue::Integer(630_822_816_000_000_000);
        assert_eq!(ticks().convert::<NaiveDateTime>(as_ticks).unwrap(), expected);
        assert!(TypeConverter::new(false)
            .convert::<NaiveDateTime>(as_ticks)
            .is_err());
        assert_eq!(
            TypeConverter::new(false)
                .convert::<NaiveDateTime>(NativeValue::Text("2000-01-01 00:00:00"))
                .unwrap(),
            expected
        );
    }
}
