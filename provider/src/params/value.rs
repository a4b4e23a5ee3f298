//! Typed parameter values and their database type tags.

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeDelta};
use common::models::ParameterEcho;
use serde_json::Value;
use url::Url;
use uuid::Uuid;

/// Largest magnitude a 96-bit decimal mantissa can hold.
const DECIMAL_MAX_INTEGER: &str = "79228162514264337593543950335";
const DECIMAL_MAX_DIGITS: usize = 29;

/// Database type tag carried next to every bound value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbTypeTag {
    String,
    Guid,
    Int32,
    Int64,
    UInt64,
    Decimal,
    Double,
    Boolean,
    DateTimeOffset,
    DateTime,
    Date,
    Time,
    Binary,
}

impl DbTypeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbTypeTag::String => "String",
            DbTypeTag::Guid => "Guid",
            DbTypeTag::Int32 => "Int32",
            DbTypeTag::Int64 => "Int64",
            DbTypeTag::UInt64 => "UInt64",
            DbTypeTag::Decimal => "Decimal",
            DbTypeTag::Double => "Double",
            DbTypeTag::Boolean => "Boolean",
            DbTypeTag::DateTimeOffset => "DateTimeOffset",
            DbTypeTag::DateTime => "DateTime",
            DbTypeTag::Date => "Date",
            DbTypeTag::Time => "Time",
            DbTypeTag::Binary => "Binary",
        }
    }
}

impl fmt::Display for DbTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact decimal literal, kept in its textual form.
///
/// Accepts an optional sign, digits and an optional fraction, with at most
/// 29 significant digits and an integer part no larger than
/// `79228162514264337593543950335`. Exponents are not accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decimal(String);

impl Decimal {
    pub fn parse(s: &str) -> Option<Self> {
        let (negative, unsigned) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (integer, fraction) = match unsigned.split_once('.') {
            Some((i, f)) => (i, f),
            None => (unsigned, ""),
        };
        if integer.is_empty() && fraction.is_empty() {
            return None;
        }
        if !integer.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let significant_integer = integer.trim_start_matches('0');
        if significant_integer.len() > DECIMAL_MAX_DIGITS
            || (significant_integer.len() == DECIMAL_MAX_DIGITS && significant_integer > DECIMAL_MAX_INTEGER)
        {
            return None;
        }
        let digits = if significant_integer.is_empty() {
            fraction.trim_start_matches('0').len()
        } else {
            significant_integer.len() + fraction.len()
        };
        if digits > DECIMAL_MAX_DIGITS {
            return None;
        }

        let integer = if significant_integer.is_empty() { "0" } else { significant_integer };
        let mut text = String::with_capacity(s.len() + 1);
        if negative {
            text.push('-');
        }
        text.push_str(integer);
        if !fraction.is_empty() {
            text.push('.');
            text.push_str(fraction);
        }
        Some(Decimal(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Nearest double; used where a driver has no exact decimal binding.
    pub fn to_f64(&self) -> f64 {
        self.0.parse().unwrap_or_default()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A value produced by type inference.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    String(String),
    Guid(Uuid),
    Int32(i32),
    Int64(i64),
    UInt64(u64),
    Decimal(Decimal),
    Double(f64),
    Boolean(bool),
    DateTimeOffset(DateTime<FixedOffset>),
    DateTime(NaiveDateTime),
    Date(NaiveDate),
    Duration(TimeDelta),
    Binary(Vec<u8>),
    Uri(Url),
}

impl ParamValue {
    /// Database type tag for this value. Nulls and URIs travel as strings.
    pub fn db_type(&self) -> DbTypeTag {
        match self {
            ParamValue::Null | ParamValue::String(_) | ParamValue::Uri(_) => DbTypeTag::String,
            ParamValue::Guid(_) => DbTypeTag::Guid,
            ParamValue::Int32(_) => DbTypeTag::Int32,
            ParamValue::Int64(_) => DbTypeTag::Int64,
            ParamValue::UInt64(_) => DbTypeTag::UInt64,
            ParamValue::Decimal(_) => DbTypeTag::Decimal,
            ParamValue::Double(_) => DbTypeTag::Double,
            ParamValue::Boolean(_) => DbTypeTag::Boolean,
            ParamValue::DateTimeOffset(_) => DbTypeTag::DateTimeOffset,
            ParamValue::DateTime(_) => DbTypeTag::DateTime,
            ParamValue::Date(_) => DbTypeTag::Date,
            ParamValue::Duration(_) => DbTypeTag::Time,
            ParamValue::Binary(_) => DbTypeTag::Binary,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    /// Canonical text for values bound as strings.
    pub fn to_text(&self) -> Option<String> {
        let text = match self {
            ParamValue::Null => return None,
            ParamValue::String(s) => s.clone(),
            ParamValue::Guid(g) => g.hyphenated().to_string(),
            ParamValue::Int32(v) => v.to_string(),
            ParamValue::Int64(v) => v.to_string(),
            ParamValue::UInt64(v) => v.to_string(),
            ParamValue::Decimal(d) => d.to_string(),
            ParamValue::Double(v) => v.to_string(),
            ParamValue::Boolean(v) => v.to_string(),
            ParamValue::DateTimeOffset(v) => v.to_rfc3339(),
            ParamValue::DateTime(v) => v.format("%Y-%m-%d %H:%M:%S%.f").to_string(),
            ParamValue::Date(v) => v.format("%Y-%m-%d").to_string(),
            ParamValue::Duration(v) => format_clock(*v),
            ParamValue::Binary(b) => BASE64.encode(b),
            ParamValue::Uri(u) => u.to_string(),
        };
        Some(text)
    }

    /// JSON rendering used in parameter echoes.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Null => Value::Null,
            ParamValue::Int32(v) => Value::from(*v),
            ParamValue::Int64(v) => Value::from(*v),
            ParamValue::UInt64(v) => Value::from(*v),
            ParamValue::Double(v) => Value::from(*v),
            ParamValue::Boolean(v) => Value::Bool(*v),
            other => other.to_text().map(Value::String).unwrap_or(Value::Null),
        }
    }
}

/// Renders a duration as `[-][d.]hh:mm:ss[.fffffff]`.
fn format_clock(delta: TimeDelta) -> String {
    let sign = if delta < TimeDelta::zero() { "-" } else { "" };
    let delta = delta.abs();
    let total = delta.num_seconds();
    let (days, hours, minutes, seconds) = (total / 86_400, total / 3_600 % 24, total / 60 % 60, total % 60);
    let ticks = delta.subsec_nanos() / 100;

    let mut out = String::from(sign);
    if days > 0 {
        out.push_str(&format!("{}.", days));
    }
    out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
    if ticks > 0 {
        out.push_str(&format!(".{:07}", ticks));
    }
    out
}

/// A named, typed parameter ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    /// Name including the leading `@`.
    pub name: String,
    pub value: ParamValue,
    pub db_type: DbTypeTag,
}

impl BoundParameter {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        let db_type = value.db_type();
        Self {
            name: name.into(),
            value,
            db_type,
        }
    }

    pub fn echo(&self) -> ParameterEcho {
        ParameterEcho {
            name: self.name.clone(),
            db_type: self.db_type.to_string(),
            value: self.value.to_json(),
        }
    }
}
