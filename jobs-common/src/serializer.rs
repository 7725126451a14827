use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors raised converting between a typed value and its wire bytes.
///
/// The core only depends on this trait, never on a concrete wire format; the
/// job processor and handler registry are generic over `Serializer` so a
/// caller can swap in a different format without touching the engine.
#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("failed to serialize value: {0}")]
    Serialize(String),
    #[error("failed to deserialize payload: {0}")]
    Deserialize(String),
}

pub trait Serializer: Send + Sync {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializeError>;
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializeError>;
}

/// The default serializer used by every binary in this workspace.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializeError> {
        serde_json::to_vec(value).map_err(|error| SerializeError::Serialize(error.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializeError> {
        serde_json::from_slice(bytes).map_err(|error| SerializeError::Deserialize(error.to_string()))
    }
}
