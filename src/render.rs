//! Per-frame tile rendering
//!
//! The dataflow behind every "show frame" request: the cache produces
//! tiles (loading through the file loader on misses), an optional
//! Gaussian smooth shrinks them, the compressor encodes them, and the
//! session sink receives one message per tile plus sync markers. Tiles
//! within a frame may be emitted in any order; the end-sync marker is
//! always last.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::animation::FrameRenderer;
use crate::cache::TileCache;
use crate::compression;
use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::loader::FileLoader;
use crate::session::{
    EventSink, RasterTileData, RasterTileSync, ServerMessage, StartAnimationMessage,
};
use crate::smoothing;
use crate::types::{CancelToken, CompressionType, Frame, TileId, TILE_SIZE};

/// How rendered tiles are post-processed before emission
#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub compression: CompressionType,
    pub precision: u32,
    /// Smooth each tile with this factor before encoding
    pub smoothing_factor: Option<usize>,
    pub temp_buffer_mb: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            compression: CompressionType::Zfp,
            precision: 16,
            smoothing_factor: None,
            temp_buffer_mb: smoothing::SMOOTHING_TEMP_BUFFER_SIZE_MB,
        }
    }
}

/// Renders the tile set of one client view, frame by frame
pub struct TileRenderer {
    file_id: i32,
    loader: Arc<dyn FileLoader>,
    cache: Arc<TileCache>,
    image_mutex: Arc<Mutex<()>>,
    sink: Arc<dyn EventSink>,
    tiles: Vec<TileId>,
    settings: RenderSettings,
}

impl TileRenderer {
    pub fn new(
        file_id: i32,
        loader: Arc<dyn FileLoader>,
        cache: Arc<TileCache>,
        image_mutex: Arc<Mutex<()>>,
        sink: Arc<dyn EventSink>,
        tiles: Vec<TileId>,
        settings: RenderSettings,
    ) -> Self {
        Self {
            file_id,
            loader,
            cache,
            image_mutex,
            sink,
            tiles,
            settings,
        }
    }

    /// Builds a renderer for a StartAnimation request, decoding its
    /// packed tile identifiers
    pub fn from_start_message(
        message: &StartAnimationMessage,
        loader: Arc<dyn FileLoader>,
        cache: Arc<TileCache>,
        image_mutex: Arc<Mutex<()>>,
        sink: Arc<dyn EventSink>,
        config: &CoreConfig,
    ) -> Self {
        let tiles = message.tiles.iter().map(|&id| TileId::decode(id)).collect();
        let settings = RenderSettings {
            compression: message.compression_type,
            precision: message.compression_quality,
            smoothing_factor: None,
            temp_buffer_mb: config.smoothing_temp_buffer_mb,
        };
        Self::new(
            message.file_id,
            loader,
            cache,
            image_mutex,
            sink,
            tiles,
            settings,
        )
    }

    fn send_sync(&self, frame: Frame, end_sync: bool) {
        self.sink
            .send_message(ServerMessage::RasterTileSync(RasterTileSync {
                file_id: self.file_id,
                channel: frame.channel,
                stokes: frame.stokes,
                end_sync,
            }));
    }

    fn encode_raw(values: &[f32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(values.len() * 4);
        for value in values {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}

impl FrameRenderer for TileRenderer {
    fn render_frame(&self, frame: Frame, cancel: &CancelToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.cache.reset(frame.channel, frame.stokes);

        let keys: Vec<_> = self.tiles.iter().map(|tile| tile.key()).collect();
        let mut fetched = HashMap::new();
        self.cache.get_multiple(
            &keys,
            self.loader.as_ref(),
            &self.image_mutex,
            &mut fetched,
        )?;

        self.send_sync(frame, false);

        for tile_id in &self.tiles {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let tile = fetched.get(&tile_id.key()).ok_or_else(|| {
                Error::Invariant(format!("tile {} missing after fetch", tile_id.key()))
            })?;

            let (width, height, mut block) = match self.settings.smoothing_factor {
                Some(factor) => {
                    let apron = factor.saturating_sub(1);
                    if TILE_SIZE <= 2 * apron {
                        return Err(Error::InvalidParameter(format!(
                            "smoothing factor {} too large for {} pixel tiles",
                            factor, TILE_SIZE
                        )));
                    }
                    let out_size = TILE_SIZE - 2 * apron;
                    let mut smoothed = vec![0.0f32; out_size * out_size];
                    if !smoothing::gaussian_smooth(
                        tile,
                        &mut smoothed,
                        TILE_SIZE,
                        TILE_SIZE,
                        factor,
                        self.settings.temp_buffer_mb,
                    ) {
                        return Err(Error::InvalidParameter(format!(
                            "cannot smooth tile with factor {}",
                            factor
                        )));
                    }
                    (out_size, out_size, smoothed)
                }
                None => (TILE_SIZE, TILE_SIZE, tile.to_vec()),
            };

            let (data, nan_encodings, precision) = match self.settings.compression {
                CompressionType::Zfp => {
                    let (bytes, runs) =
                        compression::compress_tile(&mut block, width, height, self.settings.precision)?;
                    (bytes, runs, self.settings.precision)
                }
                CompressionType::None => (Self::encode_raw(&block), Vec::new(), 0),
            };

            self.sink
                .send_message(ServerMessage::RasterTileData(RasterTileData {
                    file_id: self.file_id,
                    channel: frame.channel,
                    stokes: frame.stokes,
                    tile: *tile_id,
                    compression_type: self.settings.compression,
                    precision,
                    width,
                    height,
                    data,
                    nan_encodings,
                }));
        }

        self.send_sync(frame, true);
        Ok(())
    }
}
