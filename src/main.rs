use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use cubekit::loader::PlaneSlice;
use cubekit::session::PayloadScratch;
use cubekit::{
    trace_contours, AnimationController, AnimationSpec, AnimationState, CoreConfig, Dimensions,
    FileLoader, Frame, MemoryLoader, RenderSettings, Result, ServerMessage, TileCache, TileId,
    ThreadingManager, TileRenderer, VecSink, TILE_SIZE,
};

/// A drifting Gaussian blob per channel, with a blanked corner
fn synthesize_cube(dims: Dimensions, channels: i32) -> Result<MemoryLoader> {
    let plane = dims.pixel_count() as usize;
    let mut data = Vec::with_capacity(plane * channels as usize);

    for channel in 0..channels {
        let cx = dims.width as f64 / 2.0 + channel as f64 * 8.0;
        let cy = dims.height as f64 / 2.0;
        for y in 0..dims.height {
            for x in 0..dims.width {
                if x < 32 && y < 32 {
                    data.push(f32::NAN);
                    continue;
                }
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let value = (-(dx * dx + dy * dy) / 5000.0).exp();
                data.push(value as f32);
            }
        }
    }

    MemoryLoader::new(data, dims, channels, 1)
}

fn main() -> Result<()> {
    env_logger::init();
    println!("cubekit demo - streaming a synthetic cube\n");

    let config = CoreConfig::default();
    let dims = Dimensions::new(2 * TILE_SIZE as u64, 2 * TILE_SIZE as u64);
    let channels = 8;
    let file_id = 1;

    let loader = Arc::new(synthesize_cube(dims, channels)?);
    let cache = Arc::new(TileCache::new(config.tile_cache_capacity)?);
    let image_mutex = Arc::new(Mutex::new(()));
    let sink = Arc::new(VecSink::new());

    let tiles = vec![
        TileId::new(0, 0, 0, 0),
        TileId::new(0, 1, 0, 0),
        TileId::new(0, 0, 1, 0),
        TileId::new(0, 1, 1, 0),
    ];

    println!(
        "Cube: {}x{} pixels, {} channels, {} tiles per frame",
        dims.width,
        dims.height,
        channels,
        tiles.len()
    );

    let renderer = Arc::new(TileRenderer::new(
        file_id,
        loader.clone(),
        cache,
        image_mutex,
        sink.clone(),
        tiles,
        RenderSettings::default(),
    ));

    println!("\n--- Animating channels 0..{} at 20 fps ---", channels - 1);
    let controller = AnimationController::new(config.clone());
    controller.start_animation(
        AnimationSpec {
            file_id,
            first: Frame::new(0, 0),
            last: Frame::new(channels - 1, 0),
            start: Frame::new(0, 0),
            delta: Frame::new(1, 0),
            frame_rate: 20,
            looping: false,
            reverse_at_end: false,
            always_wait: false,
        },
        renderer,
    )?;

    while controller.state(file_id) != AnimationState::Idle {
        thread::sleep(Duration::from_millis(20));
    }

    let messages = sink.take();
    let mut tile_count = 0;
    let mut sync_count = 0;
    let mut compressed_bytes = 0;
    let mut scratch = PayloadScratch::new();
    let mut framed_bytes = 0;
    for message in &messages {
        match message {
            ServerMessage::RasterTileData(tile) => {
                tile_count += 1;
                compressed_bytes += tile.data.len();
                framed_bytes += scratch
                    .frame_compressed_payload(&tile.data, &tile.nan_encodings)
                    .len();
            }
            ServerMessage::RasterTileSync(_) => sync_count += 1,
        }
    }
    let raw_bytes = tile_count * TILE_SIZE * TILE_SIZE * 4;
    println!("Emitted {} tile messages, {} sync markers", tile_count, sync_count);
    println!(
        "Compressed {} KB to {} KB ({} KB framed) at 16 bits per value",
        raw_bytes / 1024,
        compressed_bytes / 1024,
        framed_bytes / 1024
    );

    println!("\n--- Contouring channel 0 ---");
    let mut plane = vec![f32::NAN; dims.pixel_count() as usize];
    loader.get_slice(
        &PlaneSlice {
            x: 0,
            y: 0,
            width: dims.width,
            height: dims.height,
            channel: 0,
            stokes: 0,
        },
        &mut plane,
    )?;

    let workers = ThreadingManager::new(0)?;
    let levels = [0.25, 0.5, 0.75];
    let mut contour_plane = plane.clone();
    let contours = workers.install(|| {
        trace_contours(
            &mut contour_plane,
            dims.width as usize,
            dims.height as usize,
            1.0,
            0.0,
            &levels,
        )
    });
    for level in &contours {
        println!(
            "Level {:.2}: {} vertices in {} polylines",
            level.level,
            level.vertices.len() / 2,
            level.indices.len()
        );
    }

    println!("\n--- Smoothing channel 0 with factor 4 ---");
    let factor = 4;
    let out_width = dims.width as usize - 2 * (factor - 1);
    let out_height = dims.height as usize - 2 * (factor - 1);
    let mut smoothed = vec![0.0f32; out_width * out_height];
    if cubekit::gaussian_smooth(
        &plane,
        &mut smoothed,
        dims.width as usize,
        dims.height as usize,
        factor,
        config.smoothing_temp_buffer_mb,
    ) {
        let center = smoothed[(out_height / 2) * out_width + out_width / 2];
        println!(
            "Smoothed to {}x{}; center value {:.4}",
            out_width, out_height, center
        );
    }

    Ok(())
}
