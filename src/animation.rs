//! Flow-controlled animation playback
//!
//! Each animated file gets a dedicated playback thread that renders one
//! frame per tick, paced to the requested frame rate and throttled by
//! client acknowledgements: the server never runs more than the flow
//! window ahead of the last frame the client confirmed.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use dashmap::DashMap;

use crate::config::CoreConfig;
use crate::error::{Error, Result};
use crate::types::{CancelToken, Frame};

/// Parameters of a StartAnimation request
#[derive(Debug, Clone)]
pub struct AnimationSpec {
    pub file_id: i32,
    pub first: Frame,
    pub last: Frame,
    pub start: Frame,
    pub delta: Frame,
    pub frame_rate: i32,
    pub looping: bool,
    pub reverse_at_end: bool,
    /// Wait for the previous frame's acknowledgement before each frame
    pub always_wait: bool,
}

impl AnimationSpec {
    /// Time between frame emissions at the requested rate
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros((1.0e6 / self.frame_rate.max(1) as f64) as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationState {
    Idle,
    Playing,
    Stopping,
}

const STATE_IDLE: u8 = 0;
const STATE_PLAYING: u8 = 1;
const STATE_STOPPING: u8 = 2;

fn state_from_u8(value: u8) -> AnimationState {
    match value {
        STATE_PLAYING => AnimationState::Playing,
        STATE_STOPPING => AnimationState::Stopping,
        _ => AnimationState::Idle,
    }
}

/// Renders and emits one (channel, stokes) frame.
///
/// Implementations observe the cancel token between work items; a
/// `Cancelled` result drops the frame without a warning.
pub trait FrameRenderer: Send + Sync {
    fn render_frame(&self, frame: Frame, cancel: &CancelToken) -> Result<()>;
}

enum ControlEvent {
    FlowControl { received_frame: Frame },
    Stop { end_frame: Option<Frame> },
}

struct AnimationShared {
    state: AtomicU8,
    waiting_flow_event: AtomicBool,
    cancel: CancelToken,
}

struct AnimationHandle {
    control_tx: Sender<ControlEvent>,
    shared: Arc<AnimationShared>,
    join: Option<JoinHandle<()>>,
}

/// Distance between two frames along the playback axis
fn flow_gap(current: Frame, received: Frame, delta: Frame) -> i64 {
    if delta.channel != 0 {
        (current.channel - received.channel).abs() as i64
    } else if delta.stokes != 0 {
        (current.stokes - received.stokes).abs() as i64
    } else {
        0
    }
}

fn reflect_high(value: i32, last: i32) -> i32 {
    if value > last {
        last - (value - last)
    } else {
        value
    }
}

fn reflect_low(value: i32, first: i32) -> i32 {
    if value < first {
        first + (first - value)
    } else {
        value
    }
}

fn wrap_high(value: i32, first: i32, last: i32) -> i32 {
    if value > last {
        first + (value - last - 1)
    } else {
        value
    }
}

fn wrap_low(value: i32, first: i32, last: i32) -> i32 {
    if value < first {
        last - (first - value - 1)
    } else {
        value
    }
}

/// Computes the frame after `current`, handling end-of-range semantics.
/// Returns None when playback should stop after the current frame.
fn advance(
    current: Frame,
    delta: Frame,
    going_forward: &mut bool,
    spec: &AnimationSpec,
) -> Option<Frame> {
    let mut next = if *going_forward {
        Frame::new(current.channel + delta.channel, current.stokes + delta.stokes)
    } else {
        Frame::new(current.channel - delta.channel, current.stokes - delta.stokes)
    };

    if *going_forward {
        if next.channel > spec.last.channel || next.stokes > spec.last.stokes {
            if spec.reverse_at_end {
                *going_forward = false;
                next.channel = reflect_high(next.channel, spec.last.channel);
                next.stokes = reflect_high(next.stokes, spec.last.stokes);
            } else if spec.looping {
                next.channel = wrap_high(next.channel, spec.first.channel, spec.last.channel);
                next.stokes = wrap_high(next.stokes, spec.first.stokes, spec.last.stokes);
            } else {
                if current == spec.last {
                    return None;
                }
                next.channel = next.channel.min(spec.last.channel);
                next.stokes = next.stokes.min(spec.last.stokes);
            }
        }
    } else if next.channel < spec.first.channel || next.stokes < spec.first.stokes {
        if spec.reverse_at_end {
            *going_forward = true;
            next.channel = reflect_low(next.channel, spec.first.channel);
            next.stokes = reflect_low(next.stokes, spec.first.stokes);
        } else if spec.looping {
            next.channel = wrap_low(next.channel, spec.first.channel, spec.last.channel);
            next.stokes = wrap_low(next.stokes, spec.first.stokes, spec.last.stokes);
        } else {
            if current == spec.first {
                return None;
            }
            next.channel = next.channel.max(spec.first.channel);
            next.stokes = next.stokes.max(spec.first.stokes);
        }
    }

    Some(next)
}

fn run_animation(
    spec: AnimationSpec,
    renderer: Arc<dyn FrameRenderer>,
    shared: Arc<AnimationShared>,
    control_rx: Receiver<ControlEvent>,
    config: CoreConfig,
) {
    let frame_interval = spec.frame_interval();
    let flow_window = config.flow_window(spec.frame_rate) as i64;
    let flow_wait = Duration::from_millis(config.flow_wait_ms.max(1));

    // Negative deltas play backwards with a positive step
    let (delta, mut going_forward) = if spec.delta.channel < 0 || spec.delta.stokes < 0 {
        (Frame::new(-spec.delta.channel, -spec.delta.stokes), false)
    } else {
        (spec.delta, true)
    };

    let mut current = spec.start;
    let mut last_flow_frame = spec.start;
    let mut frames_emitted: u32 = 0;
    let t_start = Instant::now();

    'playback: loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        // Apply any acknowledgements that arrived while rendering
        loop {
            match control_rx.try_recv() {
                Ok(ControlEvent::FlowControl { received_frame }) => {
                    last_flow_frame = received_frame;
                }
                Ok(ControlEvent::Stop { end_frame }) => {
                    if let Some(end_frame) = end_frame {
                        log::debug!("Animation on file {} stopped at {}", spec.file_id, end_frame);
                    }
                    break 'playback;
                }
                Err(_) => break,
            }
        }

        // Stall while the flow window is saturated
        loop {
            let gap = flow_gap(current, last_flow_frame, delta);
            let saturated = gap >= flow_window;
            let awaiting_ack = spec.always_wait && frames_emitted > 0 && gap > 0;
            if !saturated && !awaiting_ack {
                break;
            }
            shared
                .waiting_flow_event
                .store(true, Ordering::Release);
            match control_rx.recv_timeout(flow_wait) {
                Ok(ControlEvent::FlowControl { received_frame }) => {
                    last_flow_frame = received_frame;
                }
                Ok(ControlEvent::Stop { .. }) => break 'playback,
                Err(RecvTimeoutError::Timeout) => {
                    if shared.cancel.is_cancelled() {
                        break 'playback;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break 'playback,
            }
        }
        shared.waiting_flow_event.store(false, Ordering::Release);

        match renderer.render_frame(current, &shared.cancel) {
            Ok(()) => {}
            Err(Error::Cancelled) => break,
            Err(e) => log::warn!("Skipping frame {} of file {}: {}", current, spec.file_id, e),
        }
        frames_emitted += 1;

        // Pace the next emission; an overrun schedules it immediately
        let deadline = t_start + frame_interval * frames_emitted;
        loop {
            let now = Instant::now();
            if now >= deadline || shared.cancel.is_cancelled() {
                break;
            }
            match control_rx.recv_timeout(deadline - now) {
                Ok(ControlEvent::FlowControl { received_frame }) => {
                    last_flow_frame = received_frame;
                }
                Ok(ControlEvent::Stop { .. }) => break 'playback,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break 'playback,
            }
        }

        match advance(current, delta, &mut going_forward, &spec) {
            Some(next) => current = next,
            None => break,
        }
    }

    shared.state.store(STATE_IDLE, Ordering::Release);
}

/// Per-session registry of running animations, one playback thread per
/// file
pub struct AnimationController {
    config: CoreConfig,
    animations: DashMap<i32, AnimationHandle>,
}

impl AnimationController {
    pub fn new(config: CoreConfig) -> Self {
        Self {
            config,
            animations: DashMap::new(),
        }
    }

    /// Starts playback for a file, replacing any animation already
    /// running on it
    pub fn start_animation(
        &self,
        spec: AnimationSpec,
        renderer: Arc<dyn FrameRenderer>,
    ) -> Result<()> {
        if spec.frame_rate <= 0 {
            return Err(Error::InvalidParameter(format!(
                "frame rate {} must be positive",
                spec.frame_rate
            )));
        }
        if spec.first.channel > spec.last.channel || spec.first.stokes > spec.last.stokes {
            return Err(Error::InvalidParameter(format!(
                "animation range {} .. {} is empty",
                spec.first, spec.last
            )));
        }
        let in_range = |frame: Frame| {
            frame.channel >= spec.first.channel
                && frame.channel <= spec.last.channel
                && frame.stokes >= spec.first.stokes
                && frame.stokes <= spec.last.stokes
        };
        if !in_range(spec.start) {
            return Err(Error::InvalidParameter(format!(
                "start frame {} outside {} .. {}",
                spec.start, spec.first, spec.last
            )));
        }

        self.stop_animation(spec.file_id, None);

        let shared = Arc::new(AnimationShared {
            state: AtomicU8::new(STATE_PLAYING),
            waiting_flow_event: AtomicBool::new(false),
            cancel: CancelToken::new(),
        });
        let (control_tx, control_rx) = unbounded();

        let file_id = spec.file_id;
        let thread_shared = Arc::clone(&shared);
        let config = self.config.clone();
        let join = thread::Builder::new()
            .name(format!("animation-{}", file_id))
            .spawn(move || run_animation(spec, renderer, thread_shared, control_rx, config))
            .map_err(Error::Io)?;

        self.animations.insert(
            file_id,
            AnimationHandle {
                control_tx,
                shared,
                join: Some(join),
            },
        );
        Ok(())
    }

    /// Delivers a client acknowledgement; relaxing the window resumes a
    /// stalled animation
    pub fn on_flow_control(&self, file_id: i32, received_frame: Frame) -> bool {
        match self.animations.get(&file_id) {
            Some(handle) => handle
                .control_tx
                .send(ControlEvent::FlowControl { received_frame })
                .is_ok(),
            None => false,
        }
    }

    /// Stops and joins the animation on a file, if any
    pub fn stop_animation(&self, file_id: i32, end_frame: Option<Frame>) {
        if let Some((_, mut handle)) = self.animations.remove(&file_id) {
            handle.shared.state.store(STATE_STOPPING, Ordering::Release);
            handle.shared.cancel.cancel();
            let _ = handle.control_tx.send(ControlEvent::Stop { end_frame });
            if let Some(join) = handle.join.take() {
                let _ = join.join();
            }
        }
    }

    /// Stops every animation; used on file close and session end
    pub fn stop_all(&self) {
        let file_ids: Vec<i32> = self.animations.iter().map(|entry| *entry.key()).collect();
        for file_id in file_ids {
            self.stop_animation(file_id, None);
        }
    }

    pub fn state(&self, file_id: i32) -> AnimationState {
        match self.animations.get(&file_id) {
            Some(handle) => state_from_u8(handle.shared.state.load(Ordering::Acquire)),
            None => AnimationState::Idle,
        }
    }

    /// Whether the animation is stalled waiting for an acknowledgement
    pub fn is_waiting_flow(&self, file_id: i32) -> bool {
        self.animations
            .get(&file_id)
            .map(|handle| handle.shared.waiting_flow_event.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl Drop for AnimationController {
    fn drop(&mut self) {
        self.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn coerce(renderer: &Arc<RecordingRenderer>) -> Arc<dyn FrameRenderer> {
        Arc::clone(renderer) as Arc<dyn FrameRenderer>
    }

    struct RecordingRenderer {
        frames: Mutex<Vec<Frame>>,
        fail_on_channel: Option<i32>,
    }

    impl RecordingRenderer {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                fail_on_channel: None,
            })
        }

        fn failing_on(channel: i32) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                fail_on_channel: Some(channel),
            })
        }

        fn channels(&self) -> Vec<i32> {
            self.frames.lock().iter().map(|f| f.channel).collect()
        }
    }

    impl FrameRenderer for RecordingRenderer {
        fn render_frame(&self, frame: Frame, _cancel: &CancelToken) -> Result<()> {
            if self.fail_on_channel == Some(frame.channel) {
                return Err(Error::ResourceMissing("tile off image".to_string()));
            }
            self.frames.lock().push(frame);
            Ok(())
        }
    }

    fn spec(first: i32, last: i32, start: i32, delta: i32, rate: i32) -> AnimationSpec {
        AnimationSpec {
            file_id: 0,
            first: Frame::new(first, 0),
            last: Frame::new(last, 0),
            start: Frame::new(start, 0),
            delta: Frame::new(delta, 0),
            frame_rate: rate,
            looping: false,
            reverse_at_end: false,
            always_wait: false,
        }
    }

    fn wait_for_idle(controller: &AnimationController, file_id: i32, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        while controller.state(file_id) != AnimationState::Idle {
            assert!(Instant::now() < deadline, "animation did not finish");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_forward_playback_emits_in_order() {
        // S5: first 0, last 24, start 1, delta 1 emits channels 1..=24
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();
        controller
            .start_animation(spec(0, 24, 1, 1, 200), coerce(&renderer))
            .unwrap();

        wait_for_idle(&controller, 0, Duration::from_secs(5));
        assert_eq!(renderer.channels(), (1..=24).collect::<Vec<_>>());
    }

    #[test]
    fn test_pacing_respects_frame_rate() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();
        let t_start = Instant::now();
        controller
            .start_animation(spec(0, 3, 0, 1, 20), coerce(&renderer))
            .unwrap();

        wait_for_idle(&controller, 0, Duration::from_secs(5));
        // 4 frames at 20 fps: the last emission cannot land before 3
        // intervals have passed
        assert!(t_start.elapsed() >= Duration::from_millis(3 * 50));
        assert_eq!(renderer.channels(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_looping_wraps_to_first() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();
        let mut looping = spec(0, 3, 0, 1, 200);
        looping.looping = true;
        controller
            .start_animation(looping, coerce(&renderer))
            .unwrap();

        while renderer.channels().len() < 6 {
            thread::sleep(Duration::from_millis(5));
        }
        controller.stop_animation(0, Some(Frame::new(0, 0)));

        let channels = renderer.channels();
        assert_eq!(&channels[..6], &[0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn test_reverse_at_end_reflects() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();
        let mut bouncing = spec(0, 3, 0, 1, 200);
        bouncing.reverse_at_end = true;
        controller
            .start_animation(bouncing, coerce(&renderer))
            .unwrap();

        while renderer.channels().len() < 8 {
            thread::sleep(Duration::from_millis(5));
        }
        controller.stop_animation(0, None);

        let channels = renderer.channels();
        assert_eq!(&channels[..8], &[0, 1, 2, 3, 2, 1, 0, 1]);
    }

    #[test]
    fn test_stop_animation_halts_playback() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();
        let mut looping = spec(0, 100, 0, 1, 200);
        looping.looping = true;
        controller
            .start_animation(looping, coerce(&renderer))
            .unwrap();

        thread::sleep(Duration::from_millis(50));
        controller.stop_animation(0, None);
        assert_eq!(controller.state(0), AnimationState::Idle);

        let after_stop = renderer.channels().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(renderer.channels().len(), after_stop);
    }

    #[test]
    fn test_failed_frame_is_skipped() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::failing_on(2);
        controller
            .start_animation(spec(0, 4, 0, 1, 200), coerce(&renderer))
            .unwrap();

        wait_for_idle(&controller, 0, Duration::from_secs(5));
        assert_eq!(renderer.channels(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_always_wait_blocks_until_ack() {
        let config = CoreConfig {
            flow_wait_ms: 10,
            ..Default::default()
        };
        let controller = AnimationController::new(config);
        let renderer = RecordingRenderer::new();
        let mut waiting = spec(0, 10, 0, 1, 100);
        waiting.always_wait = true;
        controller
            .start_animation(waiting, coerce(&renderer))
            .unwrap();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(renderer.channels(), vec![0]);
        assert!(controller.is_waiting_flow(0));
        assert_eq!(controller.state(0), AnimationState::Playing);

        // Acknowledge the frame the server is waiting on
        assert!(controller.on_flow_control(0, Frame::new(1, 0)));
        thread::sleep(Duration::from_millis(100));
        assert_eq!(renderer.channels(), vec![0, 1]);

        controller.stop_animation(0, None);
    }

    #[test]
    fn test_flow_window_saturation_stalls() {
        let config = CoreConfig {
            flow_window_constant: 1,
            flow_window_scaler: 1,
            flow_wait_ms: 10,
            ..Default::default()
        };
        let controller = AnimationController::new(config);
        let renderer = RecordingRenderer::new();

        // Window is 1 * 1 * 3 = 3 frames; without acks the server stops
        // 3 frames ahead of the start frame
        controller
            .start_animation(spec(0, 50, 0, 1, 3), coerce(&renderer))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !controller.is_waiting_flow(0) {
            assert!(Instant::now() < deadline, "never stalled on flow window");
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(renderer.channels(), vec![0, 1, 2]);

        // Catching the client up to frame 2 re-opens the window
        assert!(controller.on_flow_control(0, Frame::new(2, 0)));
        let deadline = Instant::now() + Duration::from_secs(5);
        while renderer.channels().len() < 4 {
            assert!(Instant::now() < deadline, "did not resume after ack");
            thread::sleep(Duration::from_millis(10));
        }

        controller.stop_animation(0, None);
    }

    #[test]
    fn test_invalid_spec_rejected() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();

        let mut bad_rate = spec(0, 10, 0, 1, 0);
        bad_rate.frame_rate = 0;
        assert!(controller
            .start_animation(bad_rate, coerce(&renderer))
            .is_err());

        let bad_start = spec(0, 10, 20, 1, 5);
        assert!(controller
            .start_animation(bad_start, coerce(&renderer))
            .is_err());

        let empty_range = spec(10, 0, 5, 1, 5);
        assert!(controller
            .start_animation(empty_range, coerce(&renderer))
            .is_err());
    }

    #[test]
    fn test_negative_delta_plays_backwards() {
        let controller = AnimationController::new(CoreConfig::default());
        let renderer = RecordingRenderer::new();
        controller
            .start_animation(spec(0, 5, 5, -1, 200), coerce(&renderer))
            .unwrap();

        wait_for_idle(&controller, 0, Duration::from_secs(5));
        assert_eq!(renderer.channels(), vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_advance_clamps_overshoot() {
        let spec = spec(0, 24, 0, 10, 5);
        let mut forward = true;
        // 20 + 10 overshoots; the final frame clamps to last, then stops
        let next = advance(Frame::new(20, 0), Frame::new(10, 0), &mut forward, &spec);
        assert_eq!(next, Some(Frame::new(24, 0)));
        let done = advance(Frame::new(24, 0), Frame::new(10, 0), &mut forward, &spec);
        assert_eq!(done, None);
    }
}
