use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Opaque structured value produced by a step or carried by an event
///
/// The engine never looks inside a payload; only its position in the
/// instance history matters. Serializes as the bare JSON value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(pub Value);

impl Payload {
    /// Create a new payload from a JSON value
    #[inline]
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// Create a null payload
    #[inline]
    pub fn null() -> Self {
        Self(Value::Null)
    }

    /// Get the inner JSON value
    #[inline]
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Take ownership of the inner JSON value
    #[inline]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Check if the payload is null
    #[inline]
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// Look up a nested value with a JSON pointer (`/a/b/0`)
    pub fn pointer(&self, pointer: &str) -> Option<&Value> {
        self.0.pointer(pointer)
    }

    /// Serialize any value into a payload
    pub fn from_serializable<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self(serde_json::to_value(value)?))
    }

    /// Deserialize the payload into a concrete type
    pub fn to<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.0.clone())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl From<&str> for Payload {
    fn from(value: &str) -> Self {
        Self(Value::String(value.to_string()))
    }
}

impl From<String> for Payload {
    fn from(value: String) -> Self {
        Self(Value::String(value))
    }
}
