//! Chunked transport for messages larger than a single gRPC message.
//!
//! A serialized message is split into frames of at most `chunk_size` bytes.
//! Every frame repeats the total serialized size:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────┬────────────────┐
//! │ data[0..4M]          │ data[4M..8M]         │ data[8M..10M]  │
//! │ total_size = 10M     │ total_size = 10M     │ total_size=10M │
//! └──────────────────────┴──────────────────────┴────────────────┘
//! ```
//!
//! A chunk sequence is valid iff all frames agree on `total_size` and their
//! concatenated data is exactly `total_size` bytes long.

use bytes::{Bytes, BytesMut};
use prost::Message;
use spotkit_proto::DataChunk;
use tracing::trace;

use crate::error::{codes, Result, Status};

/// Default frame size (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Serialize `message` and split it into default-sized frames.
pub fn encode<M: Message>(message: &M) -> Vec<DataChunk> {
    encode_with_chunk_size(message, DEFAULT_CHUNK_SIZE)
}

/// Serialize `message` and split it into frames of at most `chunk_size` bytes.
pub fn encode_with_chunk_size<M: Message>(message: &M, chunk_size: usize) -> Vec<DataChunk> {
    encode_bytes(Bytes::from(message.encode_to_vec()), chunk_size)
}

/// Split already-serialized bytes into frames.
///
/// An empty payload still yields exactly one frame with no data. A zero
/// `chunk_size` is treated as 1.
pub fn encode_bytes(payload: Bytes, chunk_size: usize) -> Vec<DataChunk> {
    let chunk_size = chunk_size.max(1);
    let total_size = payload.len() as u64;

    if payload.is_empty() {
        return vec![DataChunk {
            total_size: 0,
            data: Bytes::new(),
        }];
    }

    let chunks: Vec<DataChunk> = (0..payload.len())
        .step_by(chunk_size)
        .map(|start| {
            let end = (start + chunk_size).min(payload.len());
            DataChunk {
                total_size,
                data: payload.slice(start..end),
            }
        })
        .collect();

    trace!(total_size, chunks = chunks.len(), "Encoded message into chunks");
    chunks
}

/// Reassemble the serialized bytes from a chunk sequence.
///
/// An empty sequence decodes to an empty payload. Never returns a partially
/// assembled payload.
pub fn decode(chunks: &[DataChunk]) -> Result<Bytes> {
    let Some(first) = chunks.first() else {
        return Ok(Bytes::new());
    };
    let total_size = first.total_size;

    if let Some((index, chunk)) = chunks
        .iter()
        .enumerate()
        .find(|(_, chunk)| chunk.total_size != total_size)
    {
        return Err(Status::chunking(
            codes::chunking::INCONSISTENT_TOTAL_SIZE,
            format!(
                "Chunk {} reports total size {}, first chunk reported {}",
                index, chunk.total_size, total_size
            ),
        ));
    }

    let received: u64 = chunks.iter().map(|chunk| chunk.data.len() as u64).sum();
    if received != total_size {
        return Err(Status::chunking(
            codes::chunking::SIZE_MISMATCH,
            format!(
                "Chunks carry {} bytes, declared total size is {}",
                received, total_size
            ),
        ));
    }

    if let [only] = chunks {
        return Ok(only.data.clone());
    }

    let mut payload = BytesMut::with_capacity(received as usize);
    for chunk in chunks {
        payload.extend_from_slice(&chunk.data);
    }
    Ok(payload.freeze())
}

/// Reassemble a chunk sequence and parse it as `M`.
pub fn decode_message<M: Message + Default>(chunks: &[DataChunk]) -> Result<M> {
    let payload = decode(chunks)?;
    M::decode(payload).map_err(|e| {
        Status::chunking(
            codes::chunking::PARSE_FAILED,
            format!("Reassembled payload is not a valid message: {}", e),
        )
    })
}
