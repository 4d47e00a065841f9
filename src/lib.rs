//! cubekit - streaming core for large astronomical image cubes
//!
//! cubekit serves interactive views of N-dimensional image cubes: raster
//! tiles sliced from a (channel, stokes) plane through a bounded LRU
//! cache, fixed-precision compression that preserves NaN masks exactly,
//! NaN-aware Gaussian smoothing, multi-level contour extraction, a
//! columnar catalog engine, and flow-controlled animation playback. File
//! format decoding and the websocket transport are external
//! collaborators, reached through the [`loader::FileLoader`] and
//! [`session::EventSink`] seams.
//!
//! # Examples
//!
//! ## Serving tiles from a cube
//!
//! ```
//! use parking_lot::Mutex;
//! use cubekit::{Dimensions, MemoryLoader, TileCache, TileKey};
//!
//! let dims = Dimensions::new(256, 256);
//! let loader = MemoryLoader::new(vec![0.0; 256 * 256], dims, 1, 1)?;
//! let cache = TileCache::new(8)?;
//! let image_mutex = Mutex::new(());
//!
//! let tile = cache.get(TileKey::new(0, 0), &loader, &image_mutex)?;
//! assert_eq!(tile.len(), 256 * 256);
//! # Ok::<(), cubekit::Error>(())
//! ```
//!
//! ## Compressing a block without losing its NaN mask
//!
//! ```
//! use cubekit::compression;
//!
//! let mut block = vec![1.0, f32::NAN, f32::NAN, 2.0];
//! let (bytes, nan_runs) = compression::compress_tile(&mut block, 4, 1, 16)?;
//!
//! let restored = compression::decompress_tile(&bytes, 4, 1, 16, &nan_runs)?;
//! assert!(restored[1].is_nan());
//! assert_eq!(restored[3], 2.0);
//! # Ok::<(), cubekit::Error>(())
//! ```

pub mod animation;
pub mod cache;
pub mod compression;
pub mod config;
pub mod contouring;
pub mod error;
pub mod loader;
pub mod render;
pub mod session;
pub mod smoothing;
pub mod table;
pub mod threading;
pub mod types;

pub use animation::{AnimationController, AnimationSpec, AnimationState, FrameRenderer};
pub use cache::{CachedTile, TileCache};
pub use config::CoreConfig;
pub use contouring::{trace_contours, ContourLevel};
pub use error::{Error, Result};
pub use loader::{FileLoader, MemoryLoader, PlaneSlice, RawCubeLoader};
pub use render::{RenderSettings, TileRenderer};
pub use session::{EventSink, PayloadScratch, ServerMessage, VecSink};
pub use smoothing::gaussian_smooth;
pub use table::{Table, TableView};
pub use threading::{QueuingRwMutex, ThreadingManager};
pub use types::{
    CancelToken, CompressionType, Dimensions, Frame, TileId, TileKey, TILE_SIZE,
};
