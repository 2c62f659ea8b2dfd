//! Record and value types
//!
//! Core data structures for the import pipeline: untyped field values as
//! produced by upstream parsers, ordered records, and the destination
//! column types they are coerced into at bind time.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};

/// A raw field value from an upstream parser.
///
/// No types are assumed beyond string/number/boolean/null; the destination
/// column decides how a value is actually bound.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// NULL / missing value
    Null,

    /// Text value
    Text(String),

    /// Integer value
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// Boolean value
    Boolean(bool),
}

impl FieldValue {
    /// Check if this is a NULL value
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// The value as text, for pattern checks and id handling.
    /// NULL has no text form.
    pub fn as_text(&self) -> Option<String> {
        match self {
            FieldValue::Null => None,
            FieldValue::Text(s) => Some(s.clone()),
            FieldValue::Integer(i) => Some(i.to_string()),
            FieldValue::Float(f) => Some(f.to_string()),
            FieldValue::Boolean(b) => Some(b.to_string()),
        }
    }

    /// Convert a JSON scalar into a field value.
    ///
    /// Objects and arrays are serialized to their JSON text form; the
    /// destination column (json/jsonb/text) re-parses them server-side.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::Bool(b) => FieldValue::Boolean(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else {
                    FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => FieldValue::Text(s.clone()),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

/// An ordered mapping from column name to raw value, one per input row.
///
/// The column set may vary row-to-row within one import; the engine unions
/// record columns against the destination schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Append a field, keeping insertion order
    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    /// Look up a field by name
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Iterate fields in insertion order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a JSON object (one NDJSON line)
    pub fn from_json_object(obj: &serde_json::Map<String, serde_json::Value>) -> Self {
        let mut record = Record::new();
        for (name, value) in obj {
            record.push(name.clone(), FieldValue::from_json(value));
        }
        record
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Destination column types relevant to binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Varchar(Option<usize>),
    Char(Option<usize>),
    Boolean,
    Date,
    Timestamp,
    TimestampTz,
    Json,
    Jsonb,
    Uuid,
    Unknown(String),
}

impl DataType {
    /// SQL type name usable as an explicit cast target (`$n::<name>`).
    ///
    /// Length-parameterized text types cast to plain `text`; the assignment
    /// cast to the destination column re-applies the length check.
    pub fn cast_name(&self) -> &'static str {
        match self {
            DataType::SmallInt => "smallint",
            DataType::Integer => "integer",
            DataType::BigInt => "bigint",
            DataType::Real => "real",
            DataType::Double => "double precision",
            DataType::Numeric => "numeric",
            DataType::Text | DataType::Varchar(_) | DataType::Char(_) => "text",
            DataType::Boolean => "boolean",
            DataType::Date => "date",
            DataType::Timestamp => "timestamp",
            DataType::TimestampTz => "timestamptz",
            DataType::Json => "json",
            DataType::Jsonb => "jsonb",
            DataType::Uuid => "uuid",
            DataType::Unknown(_) => "text",
        }
    }

    /// Map `format_type()` output to a DataType.
    ///
    /// `format_type()` returns strings like "integer", "character varying(255)",
    /// "numeric(10,2)", "timestamp with time zone", etc.
    pub fn from_sql_name(type_name: &str) -> DataType {
        // Parameterized types: extract base name and optional params
        let (base, params) = if let Some(paren_pos) = type_name.find('(') {
            let base = type_name[..paren_pos].trim();
            let params_str = &type_name[paren_pos + 1..type_name.len() - 1];
            (base, Some(params_str))
        } else {
            (type_name.trim(), None)
        };

        match base {
            "smallint" => DataType::SmallInt,
            "integer" => DataType::Integer,
            "bigint" => DataType::BigInt,
            "real" => DataType::Real,
            "double precision" => DataType::Double,
            "numeric" => DataType::Numeric,
            "text" | "name" => DataType::Text,
            "character varying" => {
                let len = params.and_then(|p| p.parse::<usize>().ok());
                DataType::Varchar(len)
            }
            "character" => {
                let len = params.and_then(|p| p.parse::<usize>().ok());
                DataType::Char(len)
            }
            "boolean" => DataType::Boolean,
            "date" => DataType::Date,
            "timestamp without time zone" => DataType::Timestamp,
            "timestamp with time zone" => DataType::TimestampTz,
            "json" => DataType::Json,
            "jsonb" => DataType::Jsonb,
            "uuid" => DataType::Uuid,
            other => DataType::Unknown(other.to_string()),
        }
    }
}

/// Bind a raw field value against whatever type the prepared statement
/// reports for its parameter slot.
///
/// `accepts` is unconditionally true: the coercion happens inside `to_sql`,
/// where a value that cannot be represented in the destination type becomes
/// a bind error instead of a panic.
impl ToSql for FieldValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            FieldValue::Null => Ok(IsNull::Yes),
            FieldValue::Text(s) => text_to_sql(s, ty, out),
            FieldValue::Integer(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*i).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                _ => i.to_string().to_sql(ty, out),
            },
            FieldValue::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::NUMERIC => Decimal::from_f64_retain(*f)
                    .ok_or_else(|| conversion_error(&f.to_string(), "numeric"))?
                    .to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 if f.fract() == 0.0 => {
                    FieldValue::Integer(*f as i64).to_sql(ty, out)
                }
                _ => f.to_string().to_sql(ty, out),
            },
            FieldValue::Boolean(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => b.to_string().to_sql(ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Coerce a text value into the parameter's wire type
fn text_to_sql(
    s: &str,
    ty: &Type,
    out: &mut BytesMut,
) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
    let trimmed = s.trim();
    match *ty {
        Type::INT2 => trimmed.parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => trimmed.parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => trimmed.parse::<i64>()?.to_sql(ty, out),
        Type::FLOAT4 => trimmed.parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => trimmed.parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_str(trimmed)?.to_sql(ty, out),
        Type::BOOL => parse_bool(trimmed)
            .ok_or_else(|| conversion_error(trimmed, "boolean"))?
            .to_sql(ty, out),
        Type::UUID => uuid::Uuid::parse_str(trimmed)?.to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(trimmed)
            .ok_or_else(|| conversion_error(trimmed, "timestamp"))?
            .to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamptz(trimmed)
            .ok_or_else(|| conversion_error(trimmed, "timestamptz"))?
            .to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            let value: serde_json::Value = serde_json::from_str(trimmed)
                .unwrap_or_else(|_| serde_json::Value::String(s.to_string()));
            value.to_sql(ty, out)
        }
        _ => s.to_sql(ty, out),
    }
}

fn conversion_error(value: &str, target: &str) -> Box<dyn std::error::Error + Sync + Send> {
    // Truncate so a rejected value cannot flood the error chain
    let shown: String = value.chars().take(32).collect();
    format!("cannot convert '{}' to {}", shown, target).into()
}

/// Lenient boolean parsing for text inputs ("true", "t", "1", "yes", ...)
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" | "y" | "on" => Some(true),
        "f" | "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Parse common timestamp spellings into a naive timestamp
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Parse common timestamp spellings into UTC
fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    parse_timestamp(s).map(|naive| naive.and_utc())
}

/// Append one field to a COPY text-format line.
///
/// Escaping per the PostgreSQL text COPY rules: backslash, tab, newline and
/// carriage return are escaped; NULL is rendered as `\N`.
pub fn append_copy_field(out: &mut String, value: &FieldValue) {
    match value {
        FieldValue::Null => out.push_str("\\N"),
        FieldValue::Text(s) => copy_escape_into(out, s),
        FieldValue::Integer(i) => out.push_str(&i.to_string()),
        FieldValue::Float(f) => out.push_str(&f.to_string()),
        FieldValue::Boolean(b) => out.push_str(if *b { "t" } else { "f" }),
    }
}

fn copy_escape_into(out: &mut String, field: &str) {
    for c in field.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(c),
        }
    }
}
