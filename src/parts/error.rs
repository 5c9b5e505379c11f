use thiserror::Error;

/// A part object could not be decoded.
///
/// Every variant is treated as possibly transient by the fetcher: a truncated
/// transfer looks the same as real corruption until the fetch is retried.
#[derive(Error, Debug)]
pub enum PartError {
    #[error("missing METADATA: header line")]
    MissingMetadata,

    #[error("unparseable part metadata: {0}")]
    BadMetadata(#[from] serde_json::Error),

    #[error("part metadata has no part_index and none could be parsed from {0:?}")]
    MissingIndex(String),

    #[error("missing CONTENT: marker")]
    MissingContentMarker,

    #[error("invalid base64 payload: {0}")]
    BadPayload(#[from] base64::DecodeError),

    #[error("empty payload in part {index} of {total}")]
    EmptyPayload { index: u32, total: u32 },

    #[error("part object is not valid UTF-8")]
    NotText,

    #[error("{size} bytes need more than {max} parts of {part_size} bytes", max = u32::MAX)]
    TooManyParts { size: u64, part_size: u64 },
}
