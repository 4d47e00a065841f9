//! Typed messages and the session seam
//!
//! The websocket transport is an external collaborator: the core hands
//! it typed messages through an [`EventSink`] and never sees a socket.
//! The payload framing helpers produce the binary containers the
//! transport prepends to its serialized messages.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{CompressionType, Frame, TileId};

/// One rendered raster tile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterTileData {
    pub file_id: i32,
    pub channel: i32,
    pub stokes: i32,
    pub tile: TileId,
    pub compression_type: CompressionType,
    pub precision: u32,
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
    pub nan_encodings: Vec<i32>,
}

/// Frame synchronization marker; `end_sync` is set on the marker that
/// follows the last tile of a frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterTileSync {
    pub file_id: i32,
    pub channel: i32,
    pub stokes: i32,
    pub end_sync: bool,
}

/// Messages the core emits toward the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    RasterTileData(RasterTileData),
    RasterTileSync(RasterTileSync),
}

/// StartAnimation request as decoded by the dispatcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAnimationMessage {
    pub file_id: i32,
    pub first: Frame,
    pub last: Frame,
    pub start: Frame,
    pub delta: Frame,
    pub frame_rate: i32,
    pub looping: bool,
    pub reverse_at_end: bool,
    pub always_wait: bool,
    /// Encoded tile identifiers to render each frame
    pub tiles: Vec<i32>,
    pub compression_type: CompressionType,
    pub compression_quality: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnimationFlowControlMessage {
    pub file_id: i32,
    pub received_frame: Frame,
    pub animation_id: i32,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopAnimationMessage {
    pub file_id: i32,
    pub end_frame: Frame,
}

/// Sink for outgoing messages; implemented by the transport
pub trait EventSink: Send + Sync {
    fn send_message(&self, message: ServerMessage);
}

/// Sink that collects messages in memory, for tests and the demo binary
#[derive(Default)]
pub struct VecSink {
    messages: Mutex<Vec<ServerMessage>>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Drains and returns everything sent so far
    pub fn take(&self) -> Vec<ServerMessage> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl EventSink for VecSink {
    fn send_message(&self, message: ServerMessage) {
        self.messages.lock().push(message);
    }
}

/// Reusable per-session buffer for framing tile payloads.
///
/// Grows to the largest payload seen and is reused for every frame, so
/// steady-state streaming does not allocate.
#[derive(Default)]
pub struct PayloadScratch {
    buffer: Vec<u8>,
}

impl PayloadScratch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames a compressed tile:
    /// `[u32 compressed_size][bytes][i32 rle_count][i32 runs…]`,
    /// little-endian
    pub fn frame_compressed_payload(&mut self, compressed: &[u8], nan_runs: &[i32]) -> &[u8] {
        self.buffer.clear();
        self.buffer
            .extend_from_slice(&(compressed.len() as u32).to_le_bytes());
        self.buffer.extend_from_slice(compressed);
        self.buffer
            .extend_from_slice(&(nan_runs.len() as i32).to_le_bytes());
        for run in nan_runs {
            self.buffer.extend_from_slice(&run.to_le_bytes());
        }
        &self.buffer
    }

    /// Frames an uncompressed tile: `[u32 byte_count][f32…]` with no RLE
    pub fn frame_raw_payload(&mut self, values: &[f32]) -> &[u8] {
        self.buffer.clear();
        self.buffer
            .extend_from_slice(&((values.len() * 4) as u32).to_le_bytes());
        for value in values {
            self.buffer.extend_from_slice(&value.to_le_bytes());
        }
        &self.buffer
    }
}
