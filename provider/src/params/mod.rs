//! Parameter type inference.
//!
//! Turns the loosely typed `name -> text` maps callers send into typed
//! [`BoundParameter`]s, and rewrites `@name` markers in SQL text into the
//! positional placeholders of the target dialect.

pub mod rewrite;
pub mod scalar;
pub mod value;

use std::collections::{BTreeMap, HashMap};

use common::{AppError, AppResult};
use serde_json::Value;

pub use rewrite::{rewrite_placeholders, PlaceholderStyle, RewrittenSql};
pub use scalar::infer_scalar;
pub use value::{BoundParameter, DbTypeTag, Decimal, ParamValue};

/// Prefix every bound parameter name carries.
pub const PARAMETER_MARKER: char = '@';

const NULL_TOKENS: [&str; 3] = ["null", "nil", "undefined"];

/// Converts raw parameter maps into typed parameters.
pub struct ParameterTypeInferencer;

impl ParameterTypeInferencer {
    /// Binds every entry of `raw`, in name order.
    ///
    /// # Arguments
    /// * `raw` - Parameter names (with or without `@`) mapped to their text.
    ///
    /// # Errors
    /// `AppError::Validation` for a blank name or for two names that
    /// normalize to the same marker.
    pub fn bind(raw: &HashMap<String, Option<String>>) -> AppResult<Vec<BoundParameter>> {
        let mut normalized = BTreeMap::new();
        for (name, value) in raw {
            let name = Self::normalize_name(name)?;
            if normalized.insert(name.clone(), value.as_deref()).is_some() {
                return Err(AppError::Validation(format!("duplicate parameter {}", name)));
            }
        }

        let mut bound = Vec::with_capacity(normalized.len());
        for (name, value) in normalized {
            Self::bind_entry(&name, value, &mut bound);
        }
        Ok(bound)
    }

    /// Same as [`bind`](Self::bind) for an optional map.
    pub fn bind_optional(raw: Option<&HashMap<String, Option<String>>>) -> AppResult<Vec<BoundParameter>> {
        raw.map_or_else(|| Ok(Vec::new()), Self::bind)
    }

    /// Normalizes a parameter name to carry exactly one leading `@`.
    ///
    /// # Errors
    /// `AppError::Validation` if the name is blank once markers are stripped.
    pub fn normalize_name(name: &str) -> AppResult<String> {
        let bare = name.trim().trim_start_matches(PARAMETER_MARKER).trim();
        if bare.is_empty() {
            return Err(AppError::Validation("parameter name must not be blank".into()));
        }
        Ok(format!("{}{}", PARAMETER_MARKER, bare))
    }

    fn bind_entry(name: &str, raw: Option<&str>, out: &mut Vec<BoundParameter>) {
        let text = match raw.map(str::trim) {
            Some(text) if !is_null_token(text) => text,
            _ => {
                out.push(BoundParameter::new(name, ParamValue::Null));
                return;
            }
        };

        if let Some(elements) = json_array(text) {
            if elements.is_empty() {
                // An empty list still needs one marker so `IN (@ids)` stays valid.
                out.push(BoundParameter::new(name, ParamValue::Null));
                return;
            }
            for (i, element) in elements.iter().enumerate() {
                out.push(BoundParameter::new(expanded_name(name, i), infer_json(element)));
            }
            return;
        }

        if is_csv(text) {
            for (i, part) in text.split(',').enumerate() {
                out.push(BoundParameter::new(expanded_name(name, i), infer_element(part)));
            }
            return;
        }

        out.push(BoundParameter::new(name, infer_scalar(text)));
    }
}

/// Name of the `index`-th element of an expanded list parameter.
pub fn expanded_name(name: &str, index: usize) -> String {
    format!("{}_{}", name, index)
}

fn is_null_token(text: &str) -> bool {
    text.is_empty() || NULL_TOKENS.iter().any(|t| text.eq_ignore_ascii_case(t))
}

fn json_array(text: &str) -> Option<Vec<Value>> {
    if !(text.starts_with('[') && text.ends_with(']')) {
        return None;
    }
    serde_json::from_str(text).ok()
}

fn is_csv(text: &str) -> bool {
    let hex_prefixed = text.starts_with("0x") || text.starts_with("0X");
    text.contains(',') && !text.contains('"') && !text.contains('\'') && !hex_prefixed
}

fn infer_element(part: &str) -> ParamValue {
    let part = part.trim();
    if is_null_token(part) {
        ParamValue::Null
    } else {
        infer_scalar(part)
    }
}

fn infer_json(element: &Value) -> ParamValue {
    match element {
        Value::Null => ParamValue::Null,
        Value::Bool(b) => ParamValue::Boolean(*b),
        Value::String(s) => infer_element(s),
        Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                ParamValue::Int64(v)
            } else if let Some(d) = Decimal::parse(&n.to_string()) {
                ParamValue::Decimal(d)
            } else {
                n.as_f64().map_or(ParamValue::Null, ParamValue::Double)
            }
        }
        nested @ (Value::Array(_) | Value::Object(_)) => ParamValue::String(nested.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(entries: &[(&str, Option<&str>)]) -> HashMap<String, Option<String>> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.map(str::to_string)))
            .collect()
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(ParameterTypeInferencer::normalize_name("id").unwrap(), "@id");
        assert_eq!(ParameterTypeInferencer::normalize_name("@@id ").unwrap(), "@id");
        assert!(matches!(
            ParameterTypeInferencer::normalize_name(" @ "),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_blank_name_rejected() {
        let params = raw(&[("", Some("1"))]);
        assert!(ParameterTypeInferencer::bind(&params).is_err());
    }

    #[test]
    fn test_duplicate_after_normalization_rejected() {
        let params = raw(&[("id", Some("1")), ("@id", Some("2"))]);
        assert!(matches!(
            ParameterTypeInferencer::bind(&params),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_null_tokens() {
        let params = raw(&[
            ("a", None),
            ("b", Some("")),
            ("c", Some("   ")),
            ("d", Some("null")),
            ("e", Some("NULL")),
            ("f", Some("nil")),
            ("g", Some("undefined")),
        ]);
        let bound = ParameterTypeInferencer::bind(&params).unwrap();
        assert_eq!(bound.len(), 7);
        for p in bound {
            assert_eq!(p.value, ParamValue::Null, "{}", p.name);
            assert_ne!(p.value, ParamValue::String("null".into()));
            assert_eq!(p.db_type, DbTypeTag::String);
        }
    }

    #[test]
    fn test_oversized_clock_value_binds_without_panic() {
        let bound = ParameterTypeInferencer::bind(&raw(&[("d", Some("106751991167.23:59:59"))])).unwrap();
        assert_eq!(bound.len(), 1);
        assert!(!matches!(bound[0].value, ParamValue::Duration(_)));
    }

    #[test]
    fn test_entries_processed_in_name_order() {
        let params = raw(&[("zeta", Some("1")), ("alpha", Some("2")), ("mid", Some("3"))]);
        let names: Vec<_> = ParameterTypeInferencer::bind(&params)
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(names, vec!["@alpha", "@mid", "@zeta"]);
    }

    #[test]
    fn test_json_array_expansion() {
        let params = raw(&[("ids", Some(r#"[1, "2", 2.5, true, null, {"a":1}]"#))]);
        let bound = ParameterTypeInferencer::bind(&params).unwrap();
        let names: Vec<_> = bound.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@ids_0", "@ids_1", "@ids_2", "@ids_3", "@ids_4", "@ids_5"]);
        assert_eq!(bound[0].value, ParamValue::Int64(1));
        assert_eq!(bound[1].value, ParamValue::Int32(2));
        assert_eq!(bound[2].value, ParamValue::Decimal(Decimal::parse("2.5").unwrap()));
        assert_eq!(bound[3].value, ParamValue::Boolean(true));
        assert_eq!(bound[4].value, ParamValue::Null);
        assert_eq!(bound[5].value, ParamValue::String(r#"{"a":1}"#.into()));
    }

    #[test]
    fn test_empty_json_array_binds_single_null() {
        let bound = ParameterTypeInferencer::bind(&raw(&[("ids", Some("[]"))])).unwrap();
        assert_eq!(bound, vec![BoundParameter::new("@ids", ParamValue::Null)]);
    }

    #[test]
    fn test_csv_expansion() {
        let bound = ParameterTypeInferencer::bind(&raw(&[("ids", Some("3, 4,five"))])).unwrap();
        assert_eq!(bound.len(), 3);
        assert_eq!(bound[0], BoundParameter::new("@ids_0", ParamValue::Int32(3)));
        assert_eq!(bound[1], BoundParameter::new("@ids_1", ParamValue::Int32(4)));
        assert_eq!(bound[2], BoundParameter::new("@ids_2", ParamValue::String("five".into())));
    }

    #[test]
    fn test_quoted_text_with_comma_is_scalar() {
        let bound = ParameterTypeInferencer::bind(&raw(&[("name", Some("'Doe, Jane'"))])).unwrap();
        assert_eq!(bound, vec![BoundParameter::new("@name", ParamValue::String("Doe, Jane".into()))]);
    }

    #[test]
    fn test_scalar_binding() {
        let bound = ParameterTypeInferencer::bind(&raw(&[("@id", Some(" 42 "))])).unwrap();
        assert_eq!(bound, vec![BoundParameter::new("@id", ParamValue::Int32(42))]);
        assert_eq!(bound[0].db_type, DbTypeTag::Int32);
    }
}
