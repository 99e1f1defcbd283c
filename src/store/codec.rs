use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::model::game_state::GameState;
use crate::model::save_record::CompressedPayload;
use crate::store::error::StoreError;

/// JSON, zlib-deflated, base64 encoded.
pub fn compress_state(state: &GameState) -> Result<CompressedPayload, StoreError> {
    let json = serde_json::to_vec(state)?;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let deflated = encoder.finish()?;

    Ok(CompressedPayload {
        compressed: true,
        data: STANDARD.encode(deflated),
    })
}

/// Inverse of [`compress_state`]. Also accepts the legacy shape where the
/// state was stored as plain JSON. Anything else is `Corrupt`.
pub fn decompress_state(payload: &serde_json::Value) -> Result<GameState, StoreError> {
    let compressed = payload
        .get("compressed")
        .and_then(|c| c.as_bool())
        .unwrap_or(false);

    if !compressed {
        return serde_json::from_value(payload.clone())
            .map_err(|e| StoreError::Corrupt(format!("legacy payload: {e}")));
    }

    let data = payload
        .get("data")
        .and_then(|d| d.as_str())
        .ok_or_else(|| StoreError::Corrupt("compressed payload has no data".into()))?;

    let deflated = STANDARD
        .decode(data.trim())
        .map_err(|e| StoreError::Corrupt(format!("base64: {e}")))?;

    let mut json = String::new();
    ZlibDecoder::new(deflated.as_slice())
        .read_to_string(&mut json)
        .map_err(|e| StoreError::Corrupt(format!("inflate: {e}")))?;

    serde_json::from_str(&json).map_err(|e| StoreError::Corrupt(format!("state json: {e}")))
}
