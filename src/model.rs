//! Public models: data-transfer objects an action may return directly.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A value that can stand in for a data response.
///
/// The fields become the response data; the template, if any, is used when
/// the controller did not pick one.
pub trait PublicModel: Send {
    fn fields(&self) -> Result<Map<String, Value>>;

    fn template(&self) -> Option<String> {
        None
    }
}

/// Serializes `model` into a field mapping.
///
/// ```rust
/// use serde::Serialize;
/// use tessera::model::{fields_of, PublicModel};
///
/// #[derive(Serialize)]
/// struct User { id: u32, name: String }
///
/// impl PublicModel for User {
///     fn fields(&self) -> tessera::Result<serde_json::Map<String, serde_json::Value>> {
///         fields_of(self)
///     }
///     fn template(&self) -> Option<String> { Some("user".into()) }
/// }
/// ```
pub fn fields_of(model: &impl Serialize) -> Result<Map<String, Value>> {
    match serde_json::to_value(model)? {
        Value::Object(map) => Ok(map),
        other => Err(Error::internal(format!(
            "public model must serialize to a mapping, got {}",
            kind_name(&other)
        ))),
    }
}

pub(crate) fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null      => "null",
        Value::Bool(_)   => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_)  => "a list",
        Value::Object(_) => "a mapping",
    }
}
