//! Opt-in JSON body codec backing the client's `auto_json` option. The
//! engine core stays pure bytes; this is the one injectable codec the
//! crate ships a concrete `serde_json`-backed default for, rather than
//! leaving embedders to reinvent it.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::StompError;

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A codec for frame bodies whose `content-type` is `application/json`.
pub trait JsonCodec {
    fn encode_json<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, StompError>;
    fn decode_json<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, StompError>;
}

/// Default [`JsonCodec`] backed by `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SerdeJsonCodec;

impl JsonCodec for SerdeJsonCodec {
    fn encode_json<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, StompError> {
        serde_json::to_vec(value).map_err(|e| StompError::application(format!("JSON encode failed: {e}")))
    }

    fn decode_json<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, StompError> {
        serde_json::from_slice(bytes).map_err(|e| StompError::application(format!("JSON decode failed: {e}")))
    }
}
