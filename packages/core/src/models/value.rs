//! Typed Values
//!
//! Index entries and link attributes hold exactly one of three typed values:
//! text, an arbitrary-precision decimal, or a UTC instant. [`ToValue`] is the
//! single conversion point from Rust values into that representation; it also
//! fixes the storage column a field is filtered and sorted on.
//!
//! # Conversion rules
//!
//! - integers, floats and decimals become [`Value::Numeric`]
//! - zoned date-times become [`Value::Timestamp`] in UTC
//! - naive date-times resolve in the local zone, naive dates at start of day
//! - a bare time of day is anchored to 2000-01-01 in the local zone, so times
//!   of day compare with each other but not with real instants
//! - strings, chars and booleans become [`Value::Text`]
//! - `None` becomes no value (no index row is written)

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage column a value lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Text,
    Numeric,
    Timestamp,
}

impl ValueKind {
    /// Column name shared by `record_index` and `record_link`
    pub fn column(self) -> &'static str {
        match self {
            ValueKind::Text => "text_value",
            ValueKind::Numeric => "numeric_value",
            ValueKind::Timestamp => "timestamp_value",
        }
    }
}

/// A typed index or attribute value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Value {
    Text(String),
    Numeric(Decimal),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Text(_) => ValueKind::Text,
            Value::Numeric(_) => ValueKind::Numeric,
            Value::Timestamp(_) => ValueKind::Timestamp,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Value::Numeric(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Timestamp(instant) => Some(*instant),
            _ => None,
        }
    }

    /// Bind form for the value's column
    ///
    /// Integral decimals bind as INTEGER so equality against stored integers is
    /// exact; other decimals bind as REAL. Timestamps bind as epoch milliseconds.
    pub(crate) fn to_sql(&self) -> libsql::Value {
        match self {
            Value::Text(text) => libsql::Value::Text(text.clone()),
            Value::Numeric(number) => decimal_to_sql(*number),
            Value::Timestamp(instant) => libsql::Value::Integer(instant.timestamp_millis()),
        }
    }

    /// Read a stored value back from its column
    pub(crate) fn from_sql(kind: ValueKind, raw: libsql::Value) -> Option<Value> {
        match (kind, raw) {
            (_, libsql::Value::Null) => None,
            (ValueKind::Text, libsql::Value::Text(text)) => Some(Value::Text(text)),
            (ValueKind::Text, libsql::Value::Integer(i)) => Some(Value::Text(i.to_string())),
            (ValueKind::Text, libsql::Value::Real(f)) => Some(Value::Text(f.to_string())),
            (ValueKind::Numeric, libsql::Value::Integer(i)) => {
                Some(Value::Numeric(Decimal::from(i)))
            }
            (ValueKind::Numeric, libsql::Value::Real(f)) => {
                Decimal::from_f64(f).map(Value::Numeric)
            }
            (ValueKind::Numeric, libsql::Value::Text(text)) => {
                text.parse::<Decimal>().ok().map(Value::Numeric)
            }
            (ValueKind::Timestamp, libsql::Value::Integer(ms)) => {
                Utc.timestamp_millis_opt(ms).single().map(Value::Timestamp)
            }
            _ => None,
        }
    }

    /// First non-null of the text, numeric and timestamp columns
    pub(crate) fn from_columns(
        text: libsql::Value,
        numeric: libsql::Value,
        timestamp: libsql::Value,
    ) -> Option<Value> {
        Value::from_sql(ValueKind::Text, text)
            .or_else(|| Value::from_sql(ValueKind::Numeric, numeric))
            .or_else(|| Value::from_sql(ValueKind::Timestamp, timestamp))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(text) => f.write_str(text),
            Value::Numeric(number) => write!(f, "{}", number),
            Value::Timestamp(instant) => write!(f, "{}", instant.to_rfc3339()),
        }
    }
}

fn decimal_to_sql(number: Decimal) -> libsql::Value {
    if number.fract().is_zero() {
        if let Some(integer) = number.to_i64() {
            return libsql::Value::Integer(integer);
        }
    }
    match number.to_f64() {
        Some(real) => libsql::Value::Real(real),
        None => libsql::Value::Text(number.to_string()),
    }
}

/// Resolve a local wall-clock time in the process's zone
///
/// Ambiguous times (DST fold) take the earlier instant; times inside a DST gap
/// fall back to reading the wall clock as UTC.
fn local_timestamp(wall_clock: NaiveDateTime) -> DateTime<Utc> {
    Local
        .from_local_datetime(&wall_clock)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&wall_clock))
}

/// Conversion into an index or attribute [`Value`]
pub trait ToValue {
    /// Column this type is stored in
    const KIND: ValueKind;

    fn to_value(&self) -> Option<Value>;
}

macro_rules! integer_to_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ToValue for $ty {
                const KIND: ValueKind = ValueKind::Numeric;

                fn to_value(&self) -> Option<Value> {
                    Some(Value::Numeric(Decimal::from(*self)))
                }
            }
        )*
    };
}

integer_to_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToValue for f64 {
    const KIND: ValueKind = ValueKind::Numeric;

    /// NaN and infinities have no decimal form and are not indexed.
    fn to_value(&self) -> Option<Value> {
        Decimal::from_f64(*self).map(Value::Numeric)
    }
}

impl ToValue for f32 {
    const KIND: ValueKind = ValueKind::Numeric;

    fn to_value(&self) -> Option<Value> {
        Decimal::from_f32(*self).map(Value::Numeric)
    }
}

impl ToValue for Decimal {
    const KIND: ValueKind = ValueKind::Numeric;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Numeric(*self))
    }
}

impl ToValue for str {
    const KIND: ValueKind = ValueKind::Text;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Text(self.to_string()))
    }
}

impl ToValue for String {
    const KIND: ValueKind = ValueKind::Text;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Text(self.clone()))
    }
}

impl ToValue for char {
    const KIND: ValueKind = ValueKind::Text;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Text(self.to_string()))
    }
}

impl ToValue for bool {
    const KIND: ValueKind = ValueKind::Text;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Text(self.to_string()))
    }
}

impl<Tz: TimeZone> ToValue for DateTime<Tz> {
    const KIND: ValueKind = ValueKind::Timestamp;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Timestamp(self.with_timezone(&Utc)))
    }
}

impl ToValue for NaiveDateTime {
    const KIND: ValueKind = ValueKind::Timestamp;

    fn to_value(&self) -> Option<Value> {
        Some(Value::Timestamp(local_timestamp(*self)))
    }
}

impl ToValue for NaiveDate {
    const KIND: ValueKind = ValueKind::Timestamp;

    fn to_value(&self) -> Option<Value> {
        self.and_hms_opt(0, 0, 0)
            .map(|start| Value::Timestamp(local_timestamp(start)))
    }
}

impl ToValue for NaiveTime {
    const KIND: ValueKind = ValueKind::Timestamp;

    fn to_value(&self) -> Option<Value> {
        let anchor = NaiveDate::from_ymd_opt(2000, 1, 1)?;
        Some(Value::Timestamp(local_timestamp(anchor.and_time(*self))))
    }
}

impl<T: ToValue> ToValue for Option<T> {
    const KIND: ValueKind = T::KIND;

    fn to_value(&self) -> Option<Value> {
        self.as_ref().and_then(ToValue::to_value)
    }
}

impl<T: ToValue + ?Sized> ToValue for &T {
    const KIND: ValueKind = T::KIND;

    fn to_value(&self) -> Option<Value> {
        (**self).to_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_integers_become_decimals() {
        assert_eq!(42i32.to_value(), Some(Value::Numeric(Decimal::from(42))));
        assert_eq!(7u64.to_value(), Some(Value::Numeric(Decimal::from(7))));
        assert_eq!(<i32 as ToValue>::KIND, ValueKind::Numeric);
    }

    #[test]
    fn test_float_conversion() {
        let value = 2.5f64.to_value().unwrap();
        assert_eq!(value.as_decimal(), Decimal::from_f64(2.5));
        assert_eq!(f64::NAN.to_value(), None);
    }

    #[test]
    fn test_text_conversion() {
        assert_eq!("abc".to_value(), Some(Value::Text("abc".into())));
        assert_eq!(true.to_value(), Some(Value::Text("true".into())));
        assert_eq!(<String as ToValue>::KIND, ValueKind::Text);
    }

    #[test]
    fn test_none_has_no_value() {
        let missing: Option<i32> = None;
        assert_eq!(missing.to_value(), None);
        assert_eq!(<Option<i32> as ToValue>::KIND, ValueKind::Numeric);
    }

    #[test]
    fn test_zoned_datetime_is_normalized_to_utc() {
        let offset = chrono::FixedOffset::east_opt(2 * 3600).unwrap();
        let zoned = offset.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();

        let value = zoned.to_value().unwrap();
        assert_eq!(value.as_timestamp().unwrap().hour(), 10);
    }

    #[test]
    fn test_time_of_day_is_anchored() {
        let morning = NaiveTime::from_hms_opt(8, 30, 0).unwrap().to_value().unwrap();
        let evening = NaiveTime::from_hms_opt(20, 0, 0).unwrap().to_value().unwrap();

        assert!(morning < evening);
        let expected = local_timestamp(
            NaiveDate::from_ymd_opt(2000, 1, 1)
                .unwrap()
                .and_hms_opt(8, 30, 0)
                .unwrap(),
        );
        assert_eq!(morning.as_timestamp(), Some(expected));
    }

    #[test]
    fn test_date_is_start_of_local_day() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let expected = local_timestamp(date.and_hms_opt(0, 0, 0).unwrap());
        assert_eq!(date.to_value(), Some(Value::Timestamp(expected)));
    }

    #[test]
    fn test_decimal_binding() {
        assert!(matches!(
            decimal_to_sql(Decimal::from(30)),
            libsql::Value::Integer(30)
        ));
        assert!(matches!(
            decimal_to_sql(Decimal::new(15, 1)),
            libsql::Value::Real(r) if r == 1.5
        ));
    }

    #[test]
    fn test_columns_read_first_non_null() {
        let value = Value::from_columns(
            libsql::Value::Null,
            libsql::Value::Integer(5),
            libsql::Value::Null,
        );
        assert_eq!(value, Some(Value::Numeric(Decimal::from(5))));

        let none = Value::from_columns(
            libsql::Value::Null,
            libsql::Value::Null,
            libsql::Value::Null,
        );
        assert_eq!(none, None);
    }

    #[test]
    fn test_timestamp_round_trips_through_storage_form() {
        let instant = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
        let stored = Value::Timestamp(instant).to_sql();
        assert_eq!(
            Value::from_sql(ValueKind::Timestamp, stored),
            Some(Value::Timestamp(instant))
        );
    }
}
