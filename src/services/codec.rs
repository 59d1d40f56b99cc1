//! URL-safe base64 (`-` and `_` in place of `+` and `/`, padding kept).

use base64::{Engine as _, engine::general_purpose};

use crate::errors::Result;

pub fn encode(bytes: impl AsRef<[u8]>) -> String {
    general_purpose::URL_SAFE.encode(bytes)
}

pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    Ok(general_purpose::URL_SAFE.decode(encoded)?)
}
