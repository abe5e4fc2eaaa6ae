use serde::{de::DeserializeOwned, Serialize};

use crate::codec::Codec;
use crate::error::Result;

/// JSON text frames
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize>(&self, value: &T) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, text: &str) -> Result<T> {
        Ok(serde_json::from_str(text)?)
    }
}
