//! Statement-related data models.
//!
//! This module defines the parameter, bind and request types accepted by the
//! facade, and the record shapes it returns.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::str::FromStr;

/// Default row limit for row-fetch queries.
pub const DEFAULT_ROW_LIMIT: u32 = 100;

/// One result row: column name to value, in the server's column order.
pub type Record = serde_json::Map<String, JsonValue>;

/// Values of OUT and IN OUT binds after a procedure call, keyed by bind name.
pub type OutBinds = serde_json::Map<String, JsonValue>;

/// A scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }

    /// Interpret a command-line literal.
    ///
    /// `null`, `true`/`false`, integers and floats map to their variants;
    /// anything else is a string. Wrap a value in single quotes to force a
    /// string (`'42'`).
    pub fn parse_literal(raw: &str) -> Self {
        if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
            return Self::String(raw[1..raw.len() - 1].to_string());
        }
        if raw.eq_ignore_ascii_case("null") {
            return Self::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Self::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Self::Bool(false);
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Self::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            if v.is_finite() {
                return Self::Float(v);
            }
        }
        Self::String(raw.to_string())
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Statement parameters: bound by position or by `:name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<QueryParam>),
    Named(HashMap<String, QueryParam>),
}

impl Params {
    /// Build positional parameters.
    pub fn positional<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<QueryParam>,
    {
        Self::Positional(values.into_iter().map(Into::into).collect())
    }

    /// Build named parameters. A leading `:` on a name is ignored.
    pub fn named<I, K, T>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, T)>,
        K: Into<String>,
        T: Into<QueryParam>,
    {
        Self::Named(
            values
                .into_iter()
                .map(|(k, v)| (strip_colon(k.into()), v.into()))
                .collect(),
        )
    }

    /// Number of supplied values.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(values) => values.len(),
            Self::Named(values) => values.len(),
        }
    }

    /// Check if no values were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

impl From<Vec<QueryParam>> for Params {
    fn from(values: Vec<QueryParam>) -> Self {
        Self::Positional(values)
    }
}

impl From<HashMap<String, QueryParam>> for Params {
    fn from(values: HashMap<String, QueryParam>) -> Self {
        Self::Named(values)
    }
}

fn strip_colon(name: String) -> String {
    match name.strip_prefix(':') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Declared type of an output bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindType {
    Integer,
    Float,
    Text,
    Boolean,
    Binary,
}

impl BindType {
    /// Coerce a value returned by the driver to the declared type.
    ///
    /// Values that cannot be converted are returned unchanged; NULL stays NULL.
    pub fn coerce(&self, value: JsonValue) -> JsonValue {
        match (self, value) {
            (_, JsonValue::Null) => JsonValue::Null,
            (Self::Integer, JsonValue::Number(n)) => match n.as_i64() {
                Some(i) => JsonValue::from(i),
                None => match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                        JsonValue::from(f as i64)
                    }
                    _ => JsonValue::Number(n),
                },
            },
            (Self::Integer, JsonValue::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => JsonValue::from(i),
                Err(_) => JsonValue::String(s),
            },
            (Self::Float, JsonValue::Number(n)) => n
                .as_f64()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Number(n)),
            (Self::Float, JsonValue::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::String(s)),
            (Self::Text, JsonValue::Number(n)) => JsonValue::String(n.to_string()),
            (Self::Text, JsonValue::Bool(b)) => JsonValue::String(b.to_string()),
            (Self::Boolean, JsonValue::Number(n)) => match n.as_i64() {
                Some(0) => JsonValue::Bool(false),
                Some(1) => JsonValue::Bool(true),
                _ => JsonValue::Number(n),
            },
            (Self::Boolean, JsonValue::String(s)) => match s.trim().to_ascii_lowercase().as_str()
            {
                "true" | "t" | "1" => JsonValue::Bool(true),
                "false" | "f" | "0" => JsonValue::Bool(false),
                _ => JsonValue::String(s),
            },
            (_, other) => other,
        }
    }
}

impl FromStr for BindType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "integer" | "int" | "number" | "bigint" => Ok(Self::Integer),
            "float" | "double" | "real" => Ok(Self::Float),
            "text" | "string" | "varchar" => Ok(Self::Text),
            "boolean" | "bool" => Ok(Self::Boolean),
            "binary" | "bytes" | "blob" => Ok(Self::Binary),
            other => Err(format!("Unknown bind type: {other}")),
        }
    }
}

/// A procedure bind: input literal or a typed output descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "dir")]
pub enum Bind {
    In { value: QueryParam },
    Out { r#type: BindType },
    InOut { r#type: BindType, value: QueryParam },
}

impl Bind {
    /// IN bind.
    pub fn input(value: impl Into<QueryParam>) -> Self {
        Self::In {
            value: value.into(),
        }
    }

    /// OUT bind of the declared type.
    pub fn output(bind_type: BindType) -> Self {
        Self::Out { r#type: bind_type }
    }

    /// IN OUT bind of the declared type with its initial value.
    pub fn in_out(bind_type: BindType, value: impl Into<QueryParam>) -> Self {
        Self::InOut {
            r#type: bind_type,
            value: value.into(),
        }
    }

    /// Whether the bind's value is returned after the call.
    pub fn is_output(&self) -> bool {
        !matches!(self, Self::In { .. })
    }

    /// The value sent to the server, if any.
    pub fn input_value(&self) -> Option<&QueryParam> {
        match self {
            Self::In { value } | Self::InOut { value, .. } => Some(value),
            Self::Out { .. } => None,
        }
    }

    /// Declared output type.
    pub fn bind_type(&self) -> Option<BindType> {
        match self {
            Self::In { .. } => None,
            Self::Out { r#type } | Self::InOut { r#type, .. } => Some(*r#type),
        }
    }
}

impl FromStr for Bind {
    type Err = String;

    /// Parse `out:<type>`, `inout:<type>:<value>` or a plain IN literal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix("out:") {
            return Ok(Self::output(rest.parse()?));
        }
        if let Some(rest) = s.strip_prefix("inout:") {
            let (ty, value) = rest
                .split_once(':')
                .ok_or_else(|| "IN OUT bind must be inout:<type>:<value>".to_string())?;
            return Ok(Self::in_out(ty.parse()?, QueryParam::parse_literal(value)));
        }
        Ok(Self::input(QueryParam::parse_literal(
            s.strip_prefix("in:").unwrap_or(s),
        )))
    }
}

/// Procedure binds, by position or by name.
#[derive(Debug, Clone, PartialEq)]
pub enum BindVars {
    Positional(Vec<Bind>),
    /// Insertion order is kept
    Named(Vec<(String, Bind)>),
}

impl BindVars {
    /// Build named binds. A leading `:` on a name is ignored.
    pub fn named<I, K>(binds: I) -> Self
    where
        I: IntoIterator<Item = (K, Bind)>,
        K: Into<String>,
    {
        Self::Named(
            binds
                .into_iter()
                .map(|(k, b)| (strip_colon(k.into()), b))
                .collect(),
        )
    }

    /// Number of binds supplied.
    pub fn len(&self) -> usize {
        match self {
            Self::Positional(binds) => binds.len(),
            Self::Named(binds) => binds.len(),
        }
    }

    /// Check if no binds were supplied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BindVars {
    fn default() -> Self {
        Self::Positional(Vec::new())
    }
}

/// Execution shape of a row-producing statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementMode {
    /// Materialize at most `row_limit` rows.
    #[default]
    RowFetch,
    /// Fetch one row at a time until the cursor is exhausted.
    CursorStream,
    /// Select from a set-returning function, then stream.
    TableFunction,
}

/// A row-producing statement addressed to a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementRequest {
    pub sql: String,
    #[serde(default)]
    pub params: Params,
    /// Only used in row-fetch mode. Default: 100
    #[serde(default)]
    pub row_limit: Option<u32>,
    #[serde(default)]
    pub mode: StatementMode,
    /// Pool alias. Default: "default"
    #[serde(default)]
    pub alias: Option<String>,
}

impl StatementRequest {
    /// Create a row-fetch request with default options.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::default(),
            row_limit: None,
            mode: StatementMode::RowFetch,
            alias: None,
        }
    }

    /// Set the parameters.
    pub fn with_params(mut self, params: impl Into<Params>) -> Self {
        self.params = params.into();
        self
    }

    /// Set the row limit.
    pub fn with_row_limit(mut self, limit: u32) -> Self {
        self.row_limit = Some(limit);
        self
    }

    /// Set the execution mode.
    pub fn with_mode(mut self, mode: StatementMode) -> Self {
        self.mode = mode;
        self
    }

    /// Target a named pool.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Get the effective row limit.
    pub fn effective_limit(&self) -> u32 {
        self.row_limit.unwrap_or(DEFAULT_ROW_LIMIT)
    }
}

/// A stored procedure call addressed to a pool.
#[derive(Debug, Clone)]
pub struct ProcedureRequest {
    /// Call fragment such as `my_proc(:i, :io, :o)`
    pub sql: String,
    pub binds: BindVars,
    pub alias: Option<String>,
}

impl ProcedureRequest {
    pub fn new(sql: impl Into<String>, binds: BindVars) -> Self {
        Self {
            sql: sql.into(),
            binds,
            alias: None,
        }
    }

    /// Target a named pool.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }
}
