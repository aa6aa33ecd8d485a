//! Explicit payload schemas and the validator pass applied to inbound bodies.
//!
//! A [`PayloadSchema`] lists every field a payload may carry. Validation
//! rejects undeclared fields, coerces scalar strings into the declared type
//! before checking constraints, and collects every failure instead of
//! stopping at the first one.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Pseudo field name used for failures that concern the body as a whole.
pub const BODY_FIELD: &str = "$body";

/// Declared type of a payload field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
    /// Any JSON value, passed through untouched.
    Any,
}

impl FieldKind {
    fn describe(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Integer => "an integer",
            Self::Number => "a number",
            Self::Boolean => "a boolean",
            Self::StringList => "an array of strings",
            Self::Any => "a JSON value",
        }
    }
}

/// Single field definition within a schema.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Length bounds for strings, item-count bounds for lists.
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    /// Inclusive numeric bounds for integers and numbers.
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldDef {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            min_len: None,
            max_len: None,
            min: None,
            max: None,
        }
    }

    #[must_use]
    pub const fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::String)
    }

    #[must_use]
    pub const fn integer(name: &'static str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    #[must_use]
    pub const fn number(name: &'static str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    #[must_use]
    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    #[must_use]
    pub const fn string_list(name: &'static str) -> Self {
        Self::new(name, FieldKind::StringList)
    }

    #[must_use]
    pub const fn any(name: &'static str) -> Self {
        Self::new(name, FieldKind::Any)
    }

    #[must_use]
    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub const fn length(mut self, min: usize, max: usize) -> Self {
        self.min_len = Some(min);
        self.max_len = Some(max);
        self
    }

    #[must_use]
    pub const fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// Machine-readable reason for a field failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldErrorCode {
    UnknownField,
    MissingField,
    InvalidType,
    TooShort,
    TooLong,
    OutOfRange,
    InvalidBody,
}

/// One failing field in a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub code: FieldErrorCode,
    pub message: String,
}

impl FieldError {
    #[must_use]
    pub fn new(field: impl Into<String>, code: FieldErrorCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }

    /// Failure that concerns the body as a whole (not JSON, not an object).
    #[must_use]
    pub fn body(message: impl Into<String>) -> Self {
        Self::new(BODY_FIELD, FieldErrorCode::InvalidBody, message)
    }
}

/// Schema definition for an inbound payload.
#[derive(Debug, Clone)]
pub struct PayloadSchema {
    pub fields: Vec<FieldDef>,
}

impl PayloadSchema {
    #[must_use]
    pub fn new(fields: Vec<FieldDef>) -> Self {
        Self { fields }
    }

    fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates a JSON body, returning the coerced object on success.
    ///
    /// # Errors
    ///
    /// Returns every [`FieldError`] found, in field order: undeclared fields
    /// first (in body order), then declared fields in schema order.
    pub fn validate(&self, body: Value) -> Result<Map<String, Value>, Vec<FieldError>> {
        let Value::Object(input) = body else {
            return Err(vec![FieldError::body("request body must be a JSON object")]);
        };

        let mut errors: Vec<FieldError> = input
            .keys()
            .filter(|key| self.field(key).is_none())
            .map(|key| {
                FieldError::new(
                    key.clone(),
                    FieldErrorCode::UnknownField,
                    format!("property {key} should not exist"),
                )
            })
            .collect();

        let mut output = Map::new();
        for def in &self.fields {
            match input.get(def.name) {
                None | Some(Value::Null) => {
                    if def.required {
                        errors.push(FieldError::new(
                            def.name,
                            FieldErrorCode::MissingField,
                            format!("{} is required", def.name),
                        ));
                    }
                }
                Some(value) => match check_field(def, value) {
                    Ok(coerced) => {
                        output.insert(def.name.to_string(), coerced);
                    }
                    Err(mut field_errors) => errors.append(&mut field_errors),
                },
            }
        }

        if errors.is_empty() {
            Ok(output)
        } else {
            Err(errors)
        }
    }
}

fn invalid_type(field: &str, kind: FieldKind) -> FieldError {
    FieldError::new(
        field,
        FieldErrorCode::InvalidType,
        format!("{field} must be {}", kind.describe()),
    )
}

fn coerce(def: &FieldDef, value: &Value) -> Option<Value> {
    match (def.kind, value) {
        (FieldKind::String, Value::String(_))
        | (FieldKind::Boolean, Value::Bool(_))
        | (FieldKind::Number, Value::Number(_)) => Some(value.clone()),
        (FieldKind::Integer, Value::Number(n)) => {
            n.as_i64().map(|i| Value::Number(Number::from(i)))
        }
        (FieldKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .map(|i| Value::Number(Number::from(i))),
        (FieldKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        (FieldKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (FieldKind::StringList, Value::Array(_)) | (FieldKind::Any, _) => Some(value.clone()),
        _ => None,
    }
}

fn check_field(def: &FieldDef, value: &Value) -> Result<Value, Vec<FieldError>> {
    let Some(coerced) = coerce(def, value) else {
        return Err(vec![invalid_type(def.name, def.kind)]);
    };

    let mut errors = Vec::new();
    if def.kind == FieldKind::Any {
        return Ok(coerced);
    }
    match &coerced {
        Value::String(s) => check_len(def, s.chars().count(), "characters", &mut errors),
        Value::Number(n) => {
            if let Some(v) = n.as_f64() {
                check_range(def, v, &mut errors);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                if !item.is_string() {
                    errors.push(FieldError::new(
                        format!("{}[{index}]", def.name),
                        FieldErrorCode::InvalidType,
                        format!("each value in {} must be a string", def.name),
                    ));
                }
            }
            check_len(def, items.len(), "items", &mut errors);
        }
        _ => {}
    }

    if errors.is_empty() {
        Ok(coerced)
    } else {
        Err(errors)
    }
}

fn check_len(def: &FieldDef, len: usize, unit: &str, errors: &mut Vec<FieldError>) {
    if let Some(min) = def.min_len {
        if len < min {
            errors.push(FieldError::new(
                def.name,
                FieldErrorCode::TooShort,
                format!("{} must contain at least {min} {unit}", def.name),
            ));
        }
    }
    if let Some(max) = def.max_len {
        if len > max {
            errors.push(FieldError::new(
                def.name,
                FieldErrorCode::TooLong,
                format!("{} must contain at most {max} {unit}", def.name),
            ));
        }
    }
}

fn check_range(def: &FieldDef, value: f64, errors: &mut Vec<FieldError>) {
    let below = def.min.is_some_and(|min| value < min);
    let above = def.max.is_some_and(|max| value > max);
    if below || above {
        let message = match (def.min, def.max) {
            (Some(min), Some(max)) => format!("{} must be between {min} and {max}", def.name),
            (Some(min), None) => format!("{} must not be less than {min}", def.name),
            (None, Some(max)) => format!("{} must not be greater than {max}", def.name),
            (None, None) => unreachable!("range failure without bounds"),
        };
        errors.push(FieldError::new(def.name, FieldErrorCode::OutOfRange, message));
    }
}

/// A payload type with an explicit schema.
///
/// Implementors return a schema that lists exactly the fields their serde
/// representation accepts.
pub trait Validate: DeserializeOwned {
    fn schema() -> &'static PayloadSchema;
}

/// Runs the validator pass and then decodes the coerced object.
///
/// # Errors
///
/// Returns the collected field errors; a decode failure after a successful
/// validation is reported against [`BODY_FIELD`].
pub fn decode<T: Validate>(body: Value) -> Result<T, Vec<FieldError>> {
    let object = T::schema().validate(body)?;
    serde_json::from_value(Value::Object(object)).map_err(|e| vec![FieldError::body(e.to_string())])
}
