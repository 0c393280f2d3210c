// Coercion Rules
//
// Maps a declared SQL type to the conversion applied to a value before it is
// written to a placeholder.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;

use crate::common::{DataValue, SqlType};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M:%S"];
const TIMESTAMP_FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

/// Converts a non-null value into the representation bound for one SQL type
pub trait CoercionRule: Send + Sync {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String>;
}

impl<F> CoercionRule for F
where
    F: Fn(DataValue) -> Result<DataValue, String> + Send + Sync,
{
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        self(value)
    }
}

/// Whole numbers, optionally range-checked
pub struct IntegerRule {
    pub min: i64,
    pub max: i64,
}

impl CoercionRule for IntegerRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        let n = match value {
            DataValue::Integer(i) => i,
            DataValue::Float(f) => whole_number(f, self)?,
            DataValue::Boolean(b) => if b { 1 } else { 0 },
            DataValue::Text(s) => s.trim().parse::<i64>().map_err(|e| format!("'{}' is not an integer: {}", s, e))?,
            other => return Err(format!("cannot convert {} to an integer", other.type_label())),
        };
        if n < self.min || n > self.max {
            return Err(format!("{} is out of range [{}, {}]", n, self.min, self.max));
        }
        Ok(DataValue::Integer(n))
    }
}

/// A float converts only when it is whole and inside the rule's range. The
/// check runs before the cast since `as i64` saturates.
fn whole_number(f: f64, rule: &IntegerRule) -> Result<i64, String> {
    if !f.is_finite() || f.fract() != 0.0 {
        return Err(format!("{} is not a whole number", f));
    }
    // Exclusive upper bound: i64::MAX as f64 already rounds up to 2^63
    if f < rule.min as f64 || f >= rule.max as f64 + 1.0 {
        return Err(format!("{} is out of range [{}, {}]", f, rule.min, rule.max));
    }
    Ok(f as i64)
}

pub struct FloatRule;

impl CoercionRule for FloatRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        match value {
            DataValue::Float(f) => Ok(DataValue::Float(f)),
            DataValue::Integer(i) => Ok(DataValue::Float(i as f64)),
            DataValue::Text(s) => s
                .trim()
                .parse::<f64>()
                .map(DataValue::Float)
                .map_err(|e| format!("'{}' is not a number: {}", s, e)),
            other => Err(format!("cannot convert {} to a float", other.type_label())),
        }
    }
}

/// Character data, optionally with a maximum length in characters
pub struct TextRule {
    pub max_len: Option<usize>,
}

impl CoercionRule for TextRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        let s = match value {
            DataValue::Text(s) | DataValue::Date(s) | DataValue::Time(s) | DataValue::Timestamp(s) => s,
            DataValue::Integer(i) => i.to_string(),
            DataValue::Float(f) => f.to_string(),
            DataValue::Boolean(b) => b.to_string(),
            DataValue::Blob(b) => hex::encode(b),
            DataValue::Null => return Ok(DataValue::Null),
        };
        if let Some(max) = self.max_len {
            let len = s.chars().count();
            if len > max {
                return Err(format!("length {} exceeds {}", len, max));
            }
        }
        Ok(DataValue::Text(s))
    }
}

pub struct BooleanRule;

impl CoercionRule for BooleanRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        match value {
            DataValue::Boolean(b) => Ok(DataValue::Boolean(b)),
            DataValue::Integer(i) => Ok(DataValue::Boolean(i != 0)),
            DataValue::Text(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(DataValue::Boolean(true)),
                "false" | "f" | "0" => Ok(DataValue::Boolean(false)),
                _ => Err(format!("'{}' is not a boolean", s)),
            },
            other => Err(format!("cannot convert {} to a boolean", other.type_label())),
        }
    }
}

pub struct DateRule;

impl CoercionRule for DateRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        let s = match value {
            DataValue::Date(s) | DataValue::Text(s) => s,
            DataValue::Timestamp(ts) => parse_timestamp(&ts)?.date().format(DATE_FORMAT).to_string(),
            other => return Err(format!("cannot convert {} to a date", other.type_label())),
        };
        NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| format!("'{}' is not a date: {}", s, e))?;
        Ok(DataValue::Date(s))
    }
}

pub struct TimeRule;

impl CoercionRule for TimeRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        let s = match value {
            DataValue::Time(s) | DataValue::Text(s) => s,
            other => return Err(format!("cannot convert {} to a time", other.type_label())),
        };
        if TIME_FORMATS.iter().any(|f| NaiveTime::parse_from_str(&s, f).is_ok()) {
            Ok(DataValue::Time(s))
        } else {
            Err(format!("'{}' is not a time", s))
        }
    }
}

pub struct TimestampRule;

impl CoercionRule for TimestampRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        match value {
            DataValue::Timestamp(s) | DataValue::Text(s) => {
                parse_timestamp(&s)?;
                Ok(DataValue::Timestamp(s))
            }
            DataValue::Date(d) => {
                NaiveDate::parse_from_str(&d, DATE_FORMAT).map_err(|e| format!("'{}' is not a date: {}", d, e))?;
                Ok(DataValue::Timestamp(format!("{} 00:00:00", d)))
            }
            other => Err(format!("cannot convert {} to a timestamp", other.type_label())),
        }
    }
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, String> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(s, f).ok())
        .ok_or_else(|| format!("'{}' is not a timestamp", s))
}

/// Binary data, accepting raw bytes or hex-encoded text
pub struct BinaryRule;

impl CoercionRule for BinaryRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        match value {
            DataValue::Blob(b) => Ok(DataValue::Blob(b)),
            DataValue::Text(s) => hex::decode(&s)
                .map(DataValue::Blob)
                .map_err(|e| format!("'{}' is not hex encoded: {}", s, e)),
            other => Err(format!("cannot convert {} to binary", other.type_label())),
        }
    }
}

/// Leaves the value untouched; the driver decides how to bind it
pub struct PassThroughRule;

impl CoercionRule for PassThroughRule {
    fn coerce(&self, value: DataValue) -> Result<DataValue, String> {
        Ok(value)
    }
}

static DEFAULT_REGISTRY: Lazy<Arc<TypeRegistry>> = Lazy::new(|| Arc::new(TypeRegistry::new()));

/// Lookup table from declared SQL type to coercion rule
#[derive(Clone)]
pub struct TypeRegistry {
    rules: HashMap<SqlType, Arc<dyn CoercionRule>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Registry with a rule for every built-in SQL type
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(SqlType::SmallInt, IntegerRule { min: i16::MIN as i64, max: i16::MAX as i64 });
        registry.register(SqlType::Integer, IntegerRule { min: i32::MIN as i64, max: i32::MAX as i64 });
        registry.register(SqlType::BigInt, IntegerRule { min: i64::MIN, max: i64::MAX });
        registry.register(SqlType::Float, FloatRule);
        registry.register(SqlType::Double, FloatRule);
        registry.register(SqlType::Char, TextRule { max_len: None });
        registry.register(SqlType::Varchar, TextRule { max_len: None });
        registry.register(SqlType::Text, TextRule { max_len: None });
        registry.register(SqlType::Boolean, BooleanRule);
        registry.register(SqlType::Date, DateRule);
        registry.register(SqlType::Time, TimeRule);
        registry.register(SqlType::Timestamp, TimestampRule);
        registry.register(SqlType::Blob, BinaryRule);
        registry.register(SqlType::Other, PassThroughRule);
        registry
    }

    /// Registry with no rules at all
    pub fn empty() -> Self {
        TypeRegistry { rules: HashMap::new() }
    }

    /// Shared registry holding only the built-in rules
    pub fn shared_default() -> Arc<TypeRegistry> {
        DEFAULT_REGISTRY.clone()
    }

    /// Add or replace the rule for `sql_type`
    pub fn register(&mut self, sql_type: SqlType, rule: impl CoercionRule + 'static) {
        self.rules.insert(sql_type, Arc::new(rule));
    }

    pub fn resolve(&self, sql_type: &SqlType) -> Option<&dyn CoercionRule> {
        self.rules.get(sql_type).map(|r| r.as_ref())
    }

    pub fn supports(&self, sql_type: &SqlType) -> bool {
        self.rules.contains_key(sql_type)
    }

    pub fn types(&self) -> impl Iterator<Item = &SqlType> {
        self.rules.keys()
    }
}
