//! Part wire format.
//!
//! ```text
//! METADATA:{"original_filename":"a.bin","part_index":0,"total_parts":3}
//! CONTENT:
//! <standard base64, no line wrapping>
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::PartError;
use super::naming;

const METADATA_PREFIX: &str = "METADATA:";
const CONTENT_MARKER: &str = "CONTENT:\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartMetadata {
    pub original_filename: String,
    pub part_index: u32,
    pub total_parts: u32,
}

/// Lenient view of the header: older writers omitted `part_index`.
#[derive(Deserialize)]
struct RawMetadata {
    original_filename: Option<String>,
    part_index: Option<u32>,
    total_parts: u32,
}

pub fn encode(meta: &PartMetadata, payload: &[u8]) -> Result<String, PartError> {
    let header = serde_json::to_string(meta)?;
    let body = STANDARD.encode(payload);
    let mut out = String::with_capacity(
        METADATA_PREFIX.len() + header.len() + 1 + CONTENT_MARKER.len() + body.len(),
    );
    out.push_str(METADATA_PREFIX);
    out.push_str(&header);
    out.push('\n');
    out.push_str(CONTENT_MARKER);
    out.push_str(&body);
    Ok(out)
}

/// Decode a part whose header must carry `part_index`.
#[cfg(test)]
pub fn decode(text: &str) -> Result<(PartMetadata, Vec<u8>), PartError> {
    decode_inner(text, None)
}

/// Decode a part fetched from `object_name`, falling back to the
/// `.part<N>.txt` suffix when the header lacks `part_index`.
pub fn decode_named(
    text: &str,
    object_name: &str,
) -> Result<(PartMetadata, Vec<u8>), PartError> {
    decode_inner(text, Some(object_name))
}

/// Decode raw object bytes as fetched from the remote.
pub fn decode_bytes(
    raw: &[u8],
    object_name: &str,
) -> Result<(PartMetadata, Vec<u8>), PartError> {
    let text = std::str::from_utf8(raw).map_err(|_| PartError::NotText)?;
    decode_named(text, object_name)
}

fn decode_inner(
    text: &str,
    object_name: Option<&str>,
) -> Result<(PartMetadata, Vec<u8>), PartError> {
    let rest = text
        .strip_prefix(METADATA_PREFIX)
        .ok_or(PartError::MissingMetadata)?;
    let (header, rest) = rest.split_once('\n').ok_or(PartError::MissingMetadata)?;
    let raw: RawMetadata = serde_json::from_str(header)?;

    let body_start = rest
        .find(CONTENT_MARKER)
        .ok_or(PartError::MissingContentMarker)?
        + CONTENT_MARKER.len();
    let body = rest[body_start..].trim_end();
    let payload = STANDARD.decode(body)?;

    let part_index = match raw.part_index {
        Some(i) => i,
        None => object_name
            .and_then(naming::trailing_part_index)
            .ok_or_else(|| {
                PartError::MissingIndex(object_name.unwrap_or_default().to_string())
            })?,
    };

    // Only the single part of an empty file may be empty; anything else is
    // a truncated transfer.
    if payload.is_empty() && raw.total_parts > 1 {
        return Err(PartError::EmptyPayload {
            index: part_index,
            total: raw.total_parts,
        });
    }

    let original_filename = raw.original_filename.unwrap_or_else(|| {
        object_name
            .and_then(|n| n.rsplit_once(".part").map(|(base, _)| base.to_string()))
            .unwrap_or_default()
    });

    Ok((
        PartMetadata {
            original_filename,
            part_index,
            total_parts: raw.total_parts,
        },
        payload,
    ))
}
