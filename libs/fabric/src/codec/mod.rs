use serde::{de::DeserializeOwned, Serialize};

use crate::error::Result;

pub mod json;

pub use self::json::JsonCodec;

/// Codec trait for the text frames carried by a duplex connection
pub trait Codec: Send + Sync {
    /// Encode a value into a text frame
    fn encode<T: Serialize>(&self, value: &T) -> Result<String>;

    /// Decode a text frame into a value
    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T>;
}
