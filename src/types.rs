//! Core data types for cubekit

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Edge length of a cached tile in pixels
pub const TILE_SIZE: usize = 256;

/// Identifies a tile by its pixel origin within the image.
///
/// Origins are multiples of [`TILE_SIZE`]. A key on the far edge of the
/// image still addresses a full-size tile; pixels beyond the image extent
/// are NaN-filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileKey {
    pub x: i64,
    pub y: i64,
}

impl TileKey {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A (channel, stokes) pair selecting a 2-D plane of an N-D cube.
///
/// In the animation context the same pair is called a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frame {
    pub channel: i32,
    pub stokes: i32,
}

impl Frame {
    pub fn new(channel: i32, stokes: i32) -> Self {
        Self { channel, stokes }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[channel {}, stokes {}]", self.channel, self.stokes)
    }
}

/// Represents image plane dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    /// Width in pixels
    pub width: u64,
    /// Height in pixels
    pub height: u64,
}

impl Dimensions {
    /// Creates new dimensions
    pub fn new(width: u64, height: u64) -> Self {
        Self { width, height }
    }

    /// Returns the total number of pixels
    pub fn pixel_count(&self) -> u64 {
        self.width * self.height
    }
}

/// Compression applied to raster tile payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionType {
    /// Raw little-endian f32 values
    None,
    /// Fixed-precision 2-D float compression with a NaN run-length sidecar
    Zfp,
}

impl CompressionType {
    /// Creates a compression type from its wire tag
    pub fn from_tag(value: u32) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Zfp),
            _ => None,
        }
    }

    /// Returns the wire tag for this compression type
    pub fn tag(&self) -> u32 {
        match self {
            CompressionType::None => 0,
            CompressionType::Zfp => 1,
        }
    }

    /// Returns the name of this compression type
    pub fn name(&self) -> &'static str {
        match self {
            CompressionType::None => "None",
            CompressionType::Zfp => "ZFP",
        }
    }
}

const TILE_MIP_BITS: u32 = 4;
const TILE_COORD_BITS: u32 = 12;
const TILE_COORD_MASK: i32 = (1 << TILE_COORD_BITS) - 1;
const TILE_MIP_MASK: i32 = (1 << TILE_MIP_BITS) - 1;

/// A decoded 32-bit tile identifier.
///
/// The packed form is `layer | y | x | mip` from high bits to low:
/// 4 bits of layer, 12 bits of y, 12 bits of x, 4 bits of mip, so the
/// (x, y) pair is recoverable with a fixed shift and mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileId {
    pub layer: i32,
    pub x: i32,
    pub y: i32,
    pub mip: i32,
}

impl TileId {
    pub fn new(layer: i32, x: i32, y: i32, mip: i32) -> Self {
        Self { layer, x, y, mip }
    }

    /// Packs this identifier into its 32-bit wire form.
    ///
    /// Returns `None` when any field exceeds its bit budget.
    pub fn encode(&self) -> Option<i32> {
        if self.layer < 0
            || self.layer > TILE_MIP_MASK
            || self.x < 0
            || self.x > TILE_COORD_MASK
            || self.y < 0
            || self.y > TILE_COORD_MASK
            || self.mip < 0
            || self.mip > TILE_MIP_MASK
        {
            return None;
        }
        Some(
            (self.layer << (TILE_MIP_BITS + 2 * TILE_COORD_BITS))
                | (self.y << (TILE_MIP_BITS + TILE_COORD_BITS))
                | (self.x << TILE_MIP_BITS)
                | self.mip,
        )
    }

    /// Unpacks a 32-bit tile identifier
    pub fn decode(encoded: i32) -> Self {
        Self {
            layer: (encoded >> (TILE_MIP_BITS + 2 * TILE_COORD_BITS)) & TILE_MIP_MASK,
            y: (encoded >> (TILE_MIP_BITS + TILE_COORD_BITS)) & TILE_COORD_MASK,
            x: (encoded >> TILE_MIP_BITS) & TILE_COORD_MASK,
            mip: encoded & TILE_MIP_MASK,
        }
    }

    /// The pixel-space cache key addressed by this identifier
    pub fn key(&self) -> TileKey {
        TileKey::new(self.x as i64 * TILE_SIZE as i64, self.y as i64 * TILE_SIZE as i64)
    }
}

/// Cooperative cancellation flag shared between a controller and its workers
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Clears the flag so the token can be reused
    pub fn reset(&self) {
        self.flag.store(false, Ordering::Release);
    }
}
