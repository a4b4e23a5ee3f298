//! Scalar type inference.
//!
//! A raw string runs through a fixed cascade of recognizers; the first one
//! that accepts the text decides the type. The order matters: numeric
//! recognizers run before the boolean and hex ones, so `1`, `0` and `10`
//! always come out as integers.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;
use uuid::Uuid;

use super::value::{Decimal, ParamValue};

type Recognizer = fn(&str) -> Option<ParamValue>;

/// Inference cascade, in priority order.
const CASCADE: &[(&str, Recognizer)] = &[
    ("quoted", quoted),
    ("guid", guid),
    ("numeric", numeric),
    ("datetime", date_time),
    ("duration", duration),
    ("boolean", obvious_boolean),
    ("hex", hex_bytes),
    ("residual_boolean", residual_boolean),
    ("email", email),
    ("uri", uri),
    ("base64", base64_bytes),
];

/// Doubles beyond this magnitude are rejected so that long digit runs fall
/// through to the unsigned and textual recognizers.
const DOUBLE_LIMIT: f64 = 1e15;

/// Epoch values at or above this are milliseconds, below are seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

const SECONDS_PER_DAY: f64 = 86_400.0;

const TRUE_KEYWORDS: [&str; 4] = ["true", "yes", "y", "on"];
const FALSE_KEYWORDS: [&str; 4] = ["false", "no", "n", "off"];

const URI_SCHEMES: [&str; 9] = ["http", "https", "ftp", "ftps", "sftp", "ws", "wss", "file", "mailto"];

/// Formats carrying an explicit UTC offset.
const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f %:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// ISO layouts without an offset; read as UTC.
const UTC_ASSUMED_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

/// Common culture layouts with a time part.
const NAIVE_FORMATS: [&str; 10] = [
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%d-%b-%Y %H:%M:%S",
    "%b %d, %Y %H:%M:%S",
];

const DATE_FORMATS: [&str; 10] = [
    "%Y-%m-%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%d-%b-%Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %B %Y",
];

static CLOCK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(-)?(?:(\d+)\.)?(\d{1,2}):(\d{1,2})(?::(\d{1,2})(?:\.(\d{1,7}))?)?$")
        .expect("clock pattern is valid")
});

static SHORTHAND_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+(?:\.\d+)?)\s*([smhd])$").expect("duration shorthand pattern is valid")
});

static BARE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?\.)+[A-Za-z]{2,}(?::\d{1,5})?(?:/\S*)?$")
        .expect("domain pattern is valid")
});

static BASE64_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9+/]+={0,2}$").expect("base64 pattern is valid")
});

/// All-letter tokens shorter than this are treated as words, not base64.
const BASE64_WORD_LIMIT: usize = 16;

/// Infers the type of a single trimmed value.
pub fn infer_scalar(raw: &str) -> ParamValue {
    let value = raw.trim();
    for (name, recognize) in CASCADE {
        if let Some(inferred) = recognize(value) {
            tracing::trace!(recognizer = *name, "parameter type inferred");
            return inferred;
        }
    }
    ParamValue::String(value.to_string())
}

fn quoted(s: &str) -> Option<ParamValue> {
    let bytes = s.as_bytes();
    if bytes.len() < 2 {
        return None;
    }
    let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
    if first == last && (first == b'"' || first == b'\'') {
        return Some(ParamValue::String(s[1..s.len() - 1].to_string()));
    }
    None
}

fn guid(s: &str) -> Option<ParamValue> {
    match s.len() {
        32 | 36 | 38 => Uuid::try_parse(s).ok().map(ParamValue::Guid),
        _ => None,
    }
}

fn numeric(s: &str) -> Option<ParamValue> {
    if let Ok(v) = s.parse::<i32>() {
        return Some(ParamValue::Int32(v));
    }
    if let Some(d) = Decimal::parse(s) {
        return Some(ParamValue::Decimal(d));
    }
    // Decimal accepts every plain integer in i64 range, so this only keeps
    // the cascade complete.
    if let Ok(v) = s.parse::<i64>() {
        return Some(ParamValue::Int64(v));
    }
    if let Ok(v) = s.parse::<f64>() {
        if (v.is_finite() && v.abs() < DOUBLE_LIMIT) || is_special_float(s) {
            return Some(ParamValue::Double(v));
        }
    }
    s.parse::<u64>().ok().map(ParamValue::UInt64)
}

fn is_special_float(s: &str) -> bool {
    matches!(
        s.to_lowercase().as_str(),
        "nan" | "infinity" | "+infinity" | "-infinity"
    )
}

fn date_time(s: &str) -> Option<ParamValue> {
    offset_date_time(s)
        .or_else(|| naive_date_time(s))
        .or_else(|| date_only(s))
}

fn offset_date_time(s: &str) -> Option<ParamValue> {
    if let Ok(v) = DateTime::parse_from_rfc3339(s) {
        return Some(ParamValue::DateTimeOffset(v));
    }
    for format in OFFSET_FORMATS {
        if let Ok(v) = DateTime::parse_from_str(s, format) {
            return Some(ParamValue::DateTimeOffset(v));
        }
    }
    for format in UTC_ASSUMED_FORMATS {
        if let Ok(v) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ParamValue::DateTimeOffset(v.and_utc().fixed_offset()));
        }
    }
    DateTime::parse_from_rfc2822(s).ok().map(ParamValue::DateTimeOffset)
}

fn naive_date_time(s: &str) -> Option<ParamValue> {
    for format in NAIVE_FORMATS {
        if let Ok(v) = NaiveDateTime::parse_from_str(s, format) {
            return Some(ParamValue::DateTime(v));
        }
    }
    let epoch = s.parse::<i64>().ok()?;
    let instant = if epoch.abs() >= EPOCH_MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(epoch)
    } else {
        DateTime::from_timestamp(epoch, 0)
    };
    instant.map(|v| ParamValue::DateTime(v.naive_utc()))
}

fn date_only(s: &str) -> Option<ParamValue> {
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(s, format).ok())
        .map(ParamValue::Date)
}

fn duration(s: &str) -> Option<ParamValue> {
    clock_duration(s)
        .or_else(|| {
            humantime::parse_duration(s)
                .ok()
                .and_then(|d| TimeDelta::from_std(d).ok())
        })
        .or_else(|| {
            let seconds = s.parse::<f64>().ok()?;
            (0.0..=SECONDS_PER_DAY)
                .contains(&seconds)
                .then(|| TimeDelta::milliseconds((seconds * 1000.0).round() as i64))
        })
        .or_else(|| shorthand_duration(s))
        .map(ParamValue::Duration)
}

fn clock_duration(s: &str) -> Option<TimeDelta> {
    let caps = CLOCK_PATTERN.captures(s)?;
    let number = |i: usize| -> Option<i64> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse().ok())
    };
    let (days, hours, minutes, seconds) = (number(2)?, number(3)?, number(4)?, number(5)?);
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }
    let nanos = match caps.get(6) {
        Some(m) => format!("{:0<9}", m.as_str()).parse::<i64>().ok()?,
        None => 0,
    };
    let delta = TimeDelta::try_days(days)?
        .checked_add(&TimeDelta::try_hours(hours)?)?
        .checked_add(&TimeDelta::try_minutes(minutes)?)?
        .checked_add(&TimeDelta::try_seconds(seconds)?)?
        .checked_add(&TimeDelta::nanoseconds(nanos))?;
    Some(if caps.get(1).is_some() { -delta } else { delta })
}

fn shorthand_duration(s: &str) -> Option<TimeDelta> {
    let caps = SHORTHAND_DURATION.captures(s)?;
    let amount: f64 = caps[1].parse().ok()?;
    let unit_seconds = match caps[2].to_ascii_lowercase().as_str() {
        "s" => 1.0,
        "m" => 60.0,
        "h" => 3_600.0,
        _ => SECONDS_PER_DAY,
    };
    let millis = amount * unit_seconds * 1000.0;
    (millis < i64::MAX as f64).then(|| TimeDelta::milliseconds(millis.round() as i64))
}

fn obvious_boolean(s: &str) -> Option<ParamValue> {
    let lower = s.to_lowercase();
    if TRUE_KEYWORDS.contains(&lower.as_str()) {
        Some(ParamValue::Boolean(true))
    } else if FALSE_KEYWORDS.contains(&lower.as_str()) {
        Some(ParamValue::Boolean(false))
    } else {
        None
    }
}

fn hex_bytes(s: &str) -> Option<ParamValue> {
    let prefixed = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .or_else(|| s.strip_prefix('#'));
    let digits = match prefixed {
        Some(rest) if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_hexdigit()) => {
            if rest.len() % 2 == 1 {
                format!("0{}", rest)
            } else {
                rest.to_string()
            }
        }
        Some(_) => return None,
        None if s.len() >= 2 && s.len() % 2 == 0 && s.bytes().all(|b| b.is_ascii_hexdigit()) => {
            s.to_string()
        }
        None => return None,
    };
    decode_hex(&digits).map(ParamValue::Binary)
}

fn decode_hex(digits: &str) -> Option<Vec<u8>> {
    digits
        .as_bytes()
        .chunks(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(pair, 16).ok()
        })
        .collect()
}

fn residual_boolean(s: &str) -> Option<ParamValue> {
    match s {
        "1" => Some(ParamValue::Boolean(true)),
        "0" => Some(ParamValue::Boolean(false)),
        _ => obvious_boolean(s),
    }
}

/// `@` at neither end, with a `.` somewhere after it.
fn email(s: &str) -> Option<ParamValue> {
    let at = s.find('@')?;
    let domain = &s[at + 1..];
    (at > 0 && !domain.is_empty() && domain.contains('.')).then(|| ParamValue::String(s.to_string()))
}

fn uri(s: &str) -> Option<ParamValue> {
    if let Ok(url) = Url::parse(s) {
        if URI_SCHEMES.contains(&url.scheme()) {
            return Some(ParamValue::Uri(url));
        }
    }
    if BARE_DOMAIN.is_match(s) {
        return Url::parse(&format!("https://{}", s)).ok().map(ParamValue::Uri);
    }
    None
}

fn base64_bytes(s: &str) -> Option<ParamValue> {
    if s.len() < 4 || s.len() % 4 != 0 || !BASE64_PATTERN.is_match(s) {
        return None;
    }
    if s.len() < BASE64_WORD_LIMIT && s.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    BASE64.decode(s).ok().map(ParamValue::Binary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_quoted_wins() {
        assert_eq!(infer_scalar("'42'"), ParamValue::String("42".into()));
        assert_eq!(infer_scalar("\"true\""), ParamValue::String("true".into()));
    }

    #[test]
    fn test_guid_forms() {
        let dashed = "6f9619ff-8b86-d011-b42d-00c04fc964ff";
        let expected = ParamValue::Guid(Uuid::parse_str(dashed).unwrap());
        assert_eq!(infer_scalar(dashed), expected);
        assert_eq!(infer_scalar("6f9619ff8b86d011b42d00c04fc964ff"), expected);
        assert_eq!(infer_scalar("{6f9619ff-8b86-d011-b42d-00c04fc964ff}"), expected);
    }

    #[test]
    fn test_numeric_cascade() {
        assert_eq!(infer_scalar("42"), ParamValue::Int32(42));
        assert_eq!(infer_scalar("-7"), ParamValue::Int32(-7));
        assert_eq!(infer_scalar("0"), ParamValue::Int32(0));
        assert_eq!(infer_scalar("1"), ParamValue::Int32(1));
        assert_eq!(infer_scalar("12.50"), ParamValue::Decimal(Decimal::parse("12.50").unwrap()));
        assert_eq!(
            infer_scalar("9000000000"),
            ParamValue::Decimal(Decimal::parse("9000000000").unwrap())
        );
        assert_eq!(infer_scalar("1.5e3"), ParamValue::Double(1500.0));
        assert!(matches!(infer_scalar("NaN"), ParamValue::Double(v) if v.is_nan()));
        assert_eq!(infer_scalar("-Infinity"), ParamValue::Double(f64::NEG_INFINITY));
    }

    #[test]
    fn test_huge_exponent_is_not_double() {
        assert!(!matches!(infer_scalar("1e400"), ParamValue::Double(_)));
        assert!(!matches!(infer_scalar("1e20"), ParamValue::Double(_)));
    }

    #[test]
    fn test_offset_date_times() {
        match infer_scalar("2024-01-15T10:30:00+02:00") {
            ParamValue::DateTimeOffset(v) => {
                assert_eq!(v.offset().local_minus_utc(), 7200);
                assert_eq!(v.hour(), 10);
            }
            other => panic!("unexpected {other:?}"),
        }
        match infer_scalar("2024-01-15 10:30:00") {
            ParamValue::DateTimeOffset(v) => assert_eq!(v.offset().local_minus_utc(), 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_naive_and_date_only() {
        match infer_scalar("01/15/2024 10:30:00") {
            ParamValue::DateTime(v) => assert_eq!((v.month(), v.day(), v.hour()), (1, 15, 10)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            infer_scalar("2024-01-15"),
            ParamValue::Date(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap())
        );
        assert_eq!(
            infer_scalar("25/12/2024"),
            ParamValue::Date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap())
        );
    }

    #[test]
    fn test_epoch_threshold() {
        assert_eq!(
            naive_date_time("1700000000"),
            Some(ParamValue::DateTime(DateTime::from_timestamp(1_700_000_000, 0).unwrap().naive_utc()))
        );
        assert_eq!(
            naive_date_time("1700000000000"),
            Some(ParamValue::DateTime(
                DateTime::from_timestamp_millis(1_700_000_000_000).unwrap().naive_utc()
            ))
        );
    }

    #[test]
    fn test_durations() {
        assert_eq!(infer_scalar("10:30"), ParamValue::Duration(TimeDelta::minutes(630)));
        assert_eq!(
            infer_scalar("1.02:03:04"),
            ParamValue::Duration(TimeDelta::seconds(86_400 + 2 * 3_600 + 3 * 60 + 4))
        );
        assert_eq!(infer_scalar("-00:00:05.5"), ParamValue::Duration(-TimeDelta::milliseconds(5_500)));
        assert_eq!(infer_scalar("90min"), ParamValue::Duration(TimeDelta::minutes(90)));
        assert_eq!(infer_scalar("1.5H"), ParamValue::Duration(TimeDelta::minutes(90)));
    }

    #[test]
    fn test_clock_rejects_out_of_range() {
        assert!(clock_duration("24:00").is_none());
        assert!(clock_duration("10:60").is_none());
    }

    #[test]
    fn test_clock_overflow_falls_through() {
        assert!(clock_duration("106751991167.23:00").is_none());
        assert!(clock_duration("106751991167.23:59:59").is_none());
        assert!(!matches!(infer_scalar("106751991167.23:00"), ParamValue::Duration(_)));
        assert!(!matches!(infer_scalar("-106751991167.23:59:59.9999999"), ParamValue::Duration(_)));
    }

    #[test]
    fn test_numeric_before_boolean() {
        assert_eq!(infer_scalar("true"), ParamValue::Boolean(true));
        assert_eq!(infer_scalar("OFF"), ParamValue::Boolean(false));
        assert_eq!(infer_scalar("10"), ParamValue::Int32(10));
        assert_eq!(residual_boolean("1"), Some(ParamValue::Boolean(true)));
    }

    #[test]
    fn test_hex() {
        assert_eq!(infer_scalar("0xDEADBEEF"), ParamValue::Binary(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(infer_scalar("#ff0000"), ParamValue::Binary(vec![0xff, 0, 0]));
        assert_eq!(infer_scalar("0xABC"), ParamValue::Binary(vec![0x0a, 0xbc]));
        assert_eq!(infer_scalar("cafe"), ParamValue::Binary(vec![0xca, 0xfe]));
    }

    #[test]
    fn test_email_stays_string() {
        assert_eq!(
            infer_scalar("jane.doe@example.com"),
            ParamValue::String("jane.doe@example.com".into())
        );
        assert_eq!(email("user@host."), Some(ParamValue::String("user@host.".into())));
        assert!(email("@example.com").is_none());
        assert!(email("user@").is_none());
        assert!(email("user@localhost").is_none());
    }

    #[test]
    fn test_uri() {
        assert_eq!(
            infer_scalar("https://example.com/a?b=1"),
            ParamValue::Uri(Url::parse("https://example.com/a?b=1").unwrap())
        );
        assert_eq!(
            infer_scalar("www.example.com/path"),
            ParamValue::Uri(Url::parse("https://www.example.com/path").unwrap())
        );
        assert_eq!(infer_scalar("javascript:alert(1)"), ParamValue::String("javascript:alert(1)".into()));
    }

    #[test]
    fn test_base64() {
        assert_eq!(infer_scalar("SGVsbG8h"), ParamValue::Binary(b"Hello!".to_vec()));
        assert_eq!(infer_scalar("test"), ParamValue::String("test".into()));
        assert_eq!(infer_scalar("password"), ParamValue::String("password".into()));
    }

    #[test]
    fn test_fallback_trims() {
        assert_eq!(infer_scalar("  hello world  "), ParamValue::String("hello world".into()));
    }
}
