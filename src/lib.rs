#![deny(missing_docs)]

//! Real-time relay engine for a virtual audio output device.
//!
//! Applications write to the virtual device believing it is hardware; the
//! host hands those buffers to the ingest path, which stores them into an
//! absolute-frame-addressed ring buffer. The physical output device's
//! driver pulls from the relay path at its own clock and buffer size; a
//! zero-timestamp clock fed by the device's observed rate scalar keeps the
//! two independently clocked streams from drifting apart. A background
//! binding manager supervises which physical device the relay targets.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::clock::ZeroTimestampClock;
use crate::device::{BindingStatus, DeviceBindingManager, OutputHost};
use crate::ring::AudioRingBuffer;
use crate::settings::SettingsStore;

/// Zero-timestamp clock driven by the physical device's rate scalar.
pub mod clock;
/// Developer-facing control API and TUI console.
pub mod control;
/// Physical output device binding lifecycle.
pub mod device;
/// Test signals and waveform comparison helpers.
pub mod probe;
/// Absolute-frame-addressed ring buffer.
pub mod ring;
/// Persisted driver configuration.
pub mod settings;

/// C entry points for the host audio server shim.
#[cfg(target_os = "macos")]
pub mod bridge;


/// Interleaved channel count of the virtual stream.
pub const CHANNELS: usize = 2;

/// Sample rates the virtual device advertises.
pub const SUPPORTED_SAMPLE_RATES: [f64; 7] = [
    22_050.0, 44_100.0, 48_000.0, 88_200.0, 96_000.0, 176_400.0, 192_000.0,
];

/// Nominal sample rate before any configuration change.
pub const DEFAULT_SAMPLE_RATE: f64 = 44_100.0;

/// Frames between successive zero timestamps.
pub const ZERO_TIMESTAMP_PERIOD_FRAMES: u32 = 16_384;

/// Capacity of the relay ring buffer in frames, comfortably above the
/// largest expected IO cycle plus drift.
pub const RING_CAPACITY_FRAMES: u32 = 88_200;

/// Default IO buffer size requested from the physical output device.
pub const DEFAULT_OUTPUT_BUFFER_FRAMES: u32 = 512;

/// Smallest configurable output buffer size.
pub const MIN_OUTPUT_BUFFER_FRAMES: u32 = 4;

/// UID the virtual device registers under; never a valid relay target.
pub const VIRTUAL_DEVICE_UID: &str = "RelayAudioDevice_UID";

/// Bottom of the volume control range in decibels.
pub const VOLUME_MIN_DB: f32 = -25.0;

/// Top of the volume control range in decibels.
pub const VOLUME_MAX_DB: f32 = 0.0;

const WORK_BUFFER_FRAMES: usize = ZERO_TIMESTAMP_PERIOD_FRAMES as usize * 2;
const OVERRUN_WARN_INTERVAL: Duration = Duration::from_secs(5);

static LOG_BUFFER: Lazy<Mutex<VecDeque<String>>> =
    Lazy::new(|| Mutex::new(VecDeque::with_capacity(64)));
static TRACING_INIT: Once = Once::new();
static ACTIVE_DRIVER: Lazy<RwLock<Option<Arc<RelayDriver>>>> = Lazy::new(|| RwLock::new(None));

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

pub(crate) fn push_log(line: impl Into<String>) {
    let mut guard = LOG_BUFFER.lock();
    guard.push_back(line.into());
    while guard.len() > 256 {
        guard.pop_front();
    }
}

/// Pop the oldest buffered diagnostic line, if any.
pub fn pop_log() -> Option<String> {
    LOG_BUFFER.lock().pop_front()
}

/// Error enumeration surfaced on the non-real-time request paths.
#[derive(thiserror::Error, Debug)]
pub enum DriverError {
    /// An IO start/stop would overflow or underflow the client count.
    #[error("illegal io running transition")]
    IllegalOperation,
    /// The requested sample rate is not in the supported set.
    #[error("unsupported sample rate: {0}")]
    UnsupportedSampleRate(f64),
    /// The requested channel layout is not the fixed stereo format.
    #[error("unsupported channel count {0}, only stereo is supported")]
    UnsupportedChannels(u32),
}

/// Timing information the physical device's driver supplies with each
/// pull cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleTime {
    /// Sample time of the first output frame of this cycle.
    pub sample_time: f64,
    /// Host tick count at the cycle boundary.
    pub host_time: u64,
    /// Measured deviation of the device clock from nominal.
    pub rate_scalar: f64,
}

/// Convert a linear volume control value to a gain factor.
///
/// Zero below the control range or when muted, unity at or above the
/// top, and an exponential decibel curve in between.
pub fn volume_factor(volume: f32, muted: bool) -> f32 {
    if muted || volume <= 0.0 {
        0.0
    } else if volume >= 1.0 {
        1.0
    } else {
        10f32.powf((volume * (VOLUME_MAX_DB - VOLUME_MIN_DB) + VOLUME_MIN_DB) / 10.0)
    }
}

/// Decibel position a volume control value is advertised at.
pub fn volume_scalar_to_db(volume: f32) -> f32 {
    VOLUME_MIN_DB + volume.clamp(0.0, 1.0) * (VOLUME_MAX_DB - VOLUME_MIN_DB)
}

/// Inverse of [`volume_scalar_to_db`], clamped to the control range.
pub fn volume_db_to_scalar(db: f32) -> f32 {
    ((db - VOLUME_MIN_DB) / (VOLUME_MAX_DB - VOLUME_MIN_DB)).clamp(0.0, 1.0)
}

/// Global driver state behind the coarse state lock. Held only while
/// reading or writing these primitive fields, never across device calls
/// or buffer access.
struct DriverState {
    sample_rate: f64,
    channels: u32,
    volume_l: f32,
    volume_r: f32,
    mute: bool,
    expose_controls: bool,
    io_running: u64,
}

#[derive(Clone, Copy)]
struct IngestMark {
    frame_time: f64,
    buffer_frames: u32,
}

/// Everything the ingest and relay callbacks share, behind one short-held
/// mutex.
struct IoState {
    ring: AudioRingBuffer,
    last_ingest: Option<IngestMark>,
    sample_delta: Option<f64>,
    final_frame_time: Option<f64>,
    ingest_cycle_count: u32,
}

/// Scratch owned by the relay cycle; a distinct lock so gain application
/// happens outside the IO mutex.
struct RelayScratch {
    work: Vec<f32>,
    last_overrun_warning: Option<Instant>,
}

/// Physical-device attributes the relay callback reads without locking.
/// Mutated only while the bound device is stopped.
struct BindingParams {
    sample_rate_bits: AtomicU64,
    buffer_frames: AtomicU32,
    safety_offset: AtomicU32,
}

impl BindingParams {
    fn new() -> Self {
        Self {
            sample_rate_bits: AtomicU64::new(0f64.to_bits()),
            buffer_frames: AtomicU32::new(0),
            safety_offset: AtomicU32::new(0),
        }
    }

    fn set(&self, sample_rate: f64, buffer_frames: u32, safety_offset: u32) {
        self.sample_rate_bits
            .store(sample_rate.to_bits(), Ordering::Relaxed);
        self.buffer_frames.store(buffer_frames, Ordering::Relaxed);
        self.safety_offset.store(safety_offset, Ordering::Relaxed);
    }

    fn clear(&self) {
        self.set(0.0, 0, 0);
    }

    fn sample_rate(&self) -> f64 {
        f64::from_bits(self.sample_rate_bits.load(Ordering::Relaxed))
    }

    fn buffer_frames(&self) -> u32 {
        self.buffer_frames.load(Ordering::Relaxed)
    }

    fn safety_offset(&self) -> u32 {
        self.safety_offset.load(Ordering::Relaxed)
    }
}

struct FetchOutcome {
    overrun: bool,
    start_frame: f64,
    window_start: i64,
    window_end: i64,
    ended: bool,
}

/// The relay core: ring buffer, clock, and the two real-time callbacks.
pub struct RelayEngine {
    state: Mutex<DriverState>,
    clock: ZeroTimestampClock,
    io: Mutex<IoState>,
    relay: Mutex<RelayScratch>,
    binding: BindingParams,
    relay_cycles: AtomicU64,
    overruns: AtomicU64,
}

impl RelayEngine {
    /// Create an engine running at `sample_rate` with an empty ring.
    pub fn new(sample_rate: f64) -> Self {
        Self {
            state: Mutex::new(DriverState {
                sample_rate,
                channels: CHANNELS as u32,
                volume_l: 1.0,
                volume_r: 1.0,
                mute: false,
                expose_controls: true,
                io_running: 0,
            }),
            clock: ZeroTimestampClock::new(sample_rate),
            io: Mutex::new(IoState {
                ring: AudioRingBuffer::new(CHANNELS, RING_CAPACITY_FRAMES),
                last_ingest: None,
                sample_delta: None,
                final_frame_time: None,
                ingest_cycle_count: 0,
            }),
            relay: Mutex::new(RelayScratch {
                work: vec![0.0; WORK_BUFFER_FRAMES * CHANNELS],
                last_overrun_warning: None,
            }),
            binding: BindingParams::new(),
            relay_cycles: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
        }
    }

    /// Clear the ring and all ingest/relay synchronization state. Runs on
    /// IO start, device rebind, and sample-rate mismatch recovery.
    pub fn reset_input_data(&self) {
        debug!("resetting ingest/relay sync state");
        let mut io = self.io.lock();
        io.ring.clear();
        io.last_ingest = None;
        io.sample_delta = None;
        io.final_frame_time = None;
    }

    /// A client started IO. The first start anchors the device timeline.
    pub fn start_io(&self) -> Result<(), DriverError> {
        debug!("start io");
        self.reset_input_data();

        let mut state = self.state.lock();
        match state.io_running {
            u64::MAX => Err(DriverError::IllegalOperation),
            0 => {
                state.io_running = 1;
                self.clock.anchor(clock::host_time_now());
                Ok(())
            }
            running => {
                state.io_running = running + 1;
                Ok(())
            }
        }
    }

    /// A client stopped IO. Marks the final ingested frame so the relay
    /// drains and falls silent instead of replaying stale data.
    pub fn stop_io(&self) -> Result<(), DriverError> {
        debug!("stop io");
        {
            let mut io = self.io.lock();
            if let Some(mark) = io.last_ingest {
                io.final_frame_time = Some(mark.frame_time + f64::from(mark.buffer_frames));
            }
        }

        let mut state = self.state.lock();
        match state.io_running {
            0 => Err(DriverError::IllegalOperation),
            running => {
                state.io_running = running - 1;
                Ok(())
            }
        }
    }

    /// Ingest callback: store a block of interleaved stereo samples at the
    /// host-assigned sample time.
    pub fn write_mix(&self, samples: &[f32], frame_count: u32, sample_time: f64) {
        let needed = frame_count as usize * CHANNELS;
        if frame_count == 0 || samples.len() < needed {
            return;
        }

        let mut io = self.io.lock();
        if !io.ring.store(&samples[..needed], frame_count, sample_time as i64) {
            debug!(frame_count, "ingest block larger than ring capacity, dropped");
            return;
        }
        io.last_ingest = Some(IngestMark {
            frame_time: sample_time,
            buffer_frames: frame_count,
        });
        io.ingest_cycle_count += 1;
    }

    /// Relay callback: fetch the aligned frame range, apply volume/mute,
    /// and accumulate into `output` (interleaved, `output_channels` wide).
    ///
    /// Runs on the physical device's real-time thread: no allocation, no
    /// unbounded locks, and every failure degrades to silence. Channels
    /// beyond the mapped count are left untouched.
    pub fn relay_pull(
        &self,
        output: &mut [f32],
        output_channels: u32,
        frame_count: u32,
        cycle: &CycleTime,
    ) {
        self.clock.note_rate_scalar(cycle.rate_scalar);
        self.relay_cycles.fetch_add(1, Ordering::Relaxed);

        let device_rate = self.binding.sample_rate();
        let device_buffer_frames = self.binding.buffer_frames();
        let safety_offset = self.binding.safety_offset();

        let (engine_rate, input_channels, volume_l, volume_r, mute, controls) = {
            let state = self.state.lock();
            (
                state.sample_rate,
                state.channels as usize,
                state.volume_l,
                state.volume_r,
                state.mute,
                state.expose_controls,
            )
        };

        let frames = frame_count as usize;
        let out_channels = output_channels as usize;
        if frames == 0 || out_channels == 0 || output.len() < frames * out_channels {
            return;
        }

        let mut relay = self.relay.lock();
        let needed = frames * input_channels;
        if needed > relay.work.len() {
            // Real-time path must not reallocate; skip oversized cycles.
            return;
        }

        let outcome = {
            let mut io = self.io.lock();
            io.ingest_cycle_count = 0;

            let Some(mark) = io.last_ingest else {
                return;
            };
            if device_rate != engine_rate {
                // Expected transient while a coordinated rate change settles.
                trace!(device_rate, engine_rate, "mismatched sample rate, skipping cycle");
                return;
            }

            let delta = match io.sample_delta {
                Some(delta) => delta,
                None => {
                    // Anchor reads far enough behind writes to cover both
                    // devices' buffering latency.
                    let target_frame_time = mark.frame_time
                        - f64::from(mark.buffer_frames)
                        - f64::from(device_buffer_frames)
                        - f64::from(safety_offset);
                    let delta = target_frame_time - cycle.sample_time;
                    debug!(delta, "recalculated ingest/relay sample delta");
                    io.sample_delta = Some(delta);
                    delta
                }
            };

            let start_frame = cycle.sample_time + delta;
            if let Some(final_frame_time) = io.final_frame_time {
                if start_frame >= final_frame_time {
                    return;
                }
            }

            let overrun = io
                .ring
                .fetch(&mut relay.work[..needed], frame_count, start_frame as i64);
            FetchOutcome {
                overrun,
                start_frame,
                window_start: io.ring.start_frame(),
                window_end: io.ring.end_frame(),
                ended: io.final_frame_time.is_some(),
            }
        };

        if outcome.overrun && !outcome.ended && outcome.start_frame as i64 >= outcome.window_start {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            let now = Instant::now();
            let should_warn = relay
                .last_overrun_warning
                .is_none_or(|at| now.duration_since(at) > OVERRUN_WARN_INTERVAL);
            if should_warn {
                relay.last_overrun_warning = Some(now);
                warn!(
                    start_frame = outcome.start_frame,
                    window_start = outcome.window_start,
                    window_end = outcome.window_end,
                    "relay read past ingested audio"
                );
                push_log(format!(
                    "relay overrun at frame {:.0} (window {}..{})",
                    outcome.start_frame, outcome.window_start, outcome.window_end
                ));
            }
        }

        let (factor_l, factor_r) = if controls {
            (volume_factor(volume_l, mute), volume_factor(volume_r, mute))
        } else {
            (1.0, 1.0)
        };

        let mapped = out_channels.min(input_channels);
        for channel in 0..mapped {
            let factor = if channel == 0 { factor_l } else { factor_r };
            let mut src = channel;
            let mut dst = channel;
            for _ in 0..frames {
                output[dst] += relay.work[src] * factor;
                src += input_channels;
                dst += out_channels;
            }
        }
    }

    /// Zero-timestamp query from the host. Callable any time after IO
    /// start; before the first cycle it returns the anchored state.
    pub fn zero_timestamp(&self) -> clock::ZeroTimestamp {
        self.clock.next_zero_timestamp(clock::host_time_now())
    }

    /// Apply a confirmed sample-rate configuration change.
    pub fn perform_configuration_change(&self, sample_rate: f64) -> Result<(), DriverError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(DriverError::UnsupportedSampleRate(sample_rate));
        }
        {
            let mut state = self.state.lock();
            state.sample_rate = sample_rate;
        }
        self.clock.set_sample_rate(sample_rate);
        debug!(sample_rate, "sample rate changed");
        Ok(())
    }

    /// Record the bound device's attributes for the relay callback.
    /// Must only be called while the bound device is stopped.
    pub fn configure_binding(&self, sample_rate: f64, buffer_frames: u32, safety_offset: u32) {
        self.binding.set(sample_rate, buffer_frames, safety_offset);
    }

    /// Forget the bound device's attributes; subsequent relay cycles
    /// produce silence. Must only be called while the device is stopped.
    pub fn clear_binding(&self) {
        self.binding.clear();
    }

    /// Nominal sample rate of the virtual device.
    pub fn sample_rate(&self) -> f64 {
        self.state.lock().sample_rate
    }

    /// Set one channel's volume control value (clamped to `0.0..=1.0`).
    /// Returns `false` for a channel outside the stereo pair.
    pub fn set_volume(&self, channel: usize, value: f32) -> bool {
        let value = value.clamp(0.0, 1.0);
        let mut state = self.state.lock();
        match channel {
            0 => state.volume_l = value,
            1 => state.volume_r = value,
            _ => return false,
        }
        true
    }

    /// Volume control value of one channel, `None` outside the pair.
    pub fn volume(&self, channel: usize) -> Option<f32> {
        let state = self.state.lock();
        match channel {
            0 => Some(state.volume_l),
            1 => Some(state.volume_r),
            _ => None,
        }
    }

    /// Set the master mute state.
    pub fn set_mute(&self, mute: bool) {
        self.state.lock().mute = mute;
    }

    /// Master mute state.
    pub fn mute(&self) -> bool {
        self.state.lock().mute
    }

    /// Enable or disable the volume/mute control policy. When disabled the
    /// relay applies unity gain.
    pub fn set_expose_controls(&self, expose: bool) {
        self.state.lock().expose_controls = expose;
    }

    /// Number of clients currently running IO.
    pub fn io_running(&self) -> u64 {
        self.state.lock().io_running
    }

    /// The current ingest→relay frame offset, if computed this session.
    pub fn sample_delta(&self) -> Option<f64> {
        self.io.lock().sample_delta
    }

    /// Ingest callbacks observed since the last relay cycle.
    pub fn ingest_cycle_count(&self) -> u32 {
        self.io.lock().ingest_cycle_count
    }

    /// Total relay cycles processed.
    pub fn relay_cycle_count(&self) -> u64 {
        self.relay_cycles.load(Ordering::Relaxed)
    }

    /// Unexpected overruns observed (reads past ingested audio).
    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// The engine's zero-timestamp clock.
    pub fn clock(&self) -> &ZeroTimestampClock {
        &self.clock
    }
}

/// Aggregated driver status snapshot used by control surfaces.
#[derive(Clone, Debug)]
pub struct RelayStatus {
    /// Display name of the virtual device.
    pub device_name: String,
    /// Nominal sample rate of the virtual device in Hertz.
    pub sample_rate: f64,
    /// Volume control value of the left channel.
    pub volume_l: f32,
    /// Volume control value of the right channel.
    pub volume_r: f32,
    /// Left channel volume in decibels.
    pub volume_l_db: f32,
    /// Right channel volume in decibels.
    pub volume_r_db: f32,
    /// Master mute state.
    pub mute: bool,
    /// Whether volume/mute controls are applied.
    pub controls_exposed: bool,
    /// Clients currently running IO.
    pub io_running: u64,
    /// Relay latency implied by the negotiated buffer, in milliseconds.
    pub latency_ms: f32,
    /// Ingest→relay frame offset for this session, once computed.
    pub sample_delta: Option<f64>,
    /// Ingest callbacks observed since the last relay cycle.
    pub ingest_cycles: u32,
    /// Total relay cycles processed.
    pub relay_cycles: u64,
    /// Unexpected overruns observed.
    pub overruns: u64,
    /// Clock drift estimate in parts per million.
    pub drift_ppm: f32,
    /// State of the physical device binding.
    pub binding: BindingStatus,
}

/// The assembled driver: engine, binding manager, and settings.
pub struct RelayDriver {
    engine: Arc<RelayEngine>,
    manager: DeviceBindingManager,
    settings: Arc<SettingsStore>,
}

impl RelayDriver {
    /// Wire up an engine and binding manager against `host`, applying the
    /// persisted settings.
    pub fn new(host: Arc<dyn OutputHost>, settings: SettingsStore) -> Arc<Self> {
        init_tracing();
        let settings = Arc::new(settings);
        let initial = settings.get();

        let engine = Arc::new(RelayEngine::new(DEFAULT_SAMPLE_RATE));
        engine.set_expose_controls(initial.expose_controls);

        let manager = DeviceBindingManager::new(engine.clone(), host, settings.clone());
        Arc::new(Self {
            engine,
            manager,
            settings,
        })
    }

    /// The relay engine.
    pub fn engine(&self) -> &Arc<RelayEngine> {
        &self.engine
    }

    /// The binding manager.
    pub fn manager(&self) -> &DeviceBindingManager {
        &self.manager
    }

    /// The settings store.
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// The plugin host confirmed a previously requested sample-rate
    /// change: apply it and re-run rate matching.
    pub fn perform_configuration_change(&self, sample_rate: f64) -> Result<(), DriverError> {
        self.engine.perform_configuration_change(sample_rate)?;
        self.manager.match_sample_rate();
        Ok(())
    }

    /// The plugin host denied a requested configuration change. Nothing to
    /// clean up; the binding stays stopped until the next rate event.
    pub fn abort_configuration_change(&self, sample_rate: f64) {
        debug!(sample_rate, "configuration change aborted by host");
    }

    /// Aggregate status snapshot.
    pub fn status(&self) -> RelayStatus {
        let settings = self.settings.get();
        let binding = self.manager.status();
        let sample_rate = self.engine.sample_rate();
        let volume_l = self.engine.volume(0).unwrap_or(0.0);
        let volume_r = self.engine.volume(1).unwrap_or(0.0);

        let latency_ms = match &binding {
            BindingStatus::Bound {
                buffer_frames,
                sample_rate,
                ..
            } if *sample_rate > 0.0 => (*buffer_frames as f32 / *sample_rate as f32) * 1_000.0,
            _ => 0.0,
        };

        RelayStatus {
            device_name: settings.device_name,
            sample_rate,
            volume_l,
            volume_r,
            volume_l_db: volume_scalar_to_db(volume_l),
            volume_r_db: volume_scalar_to_db(volume_r),
            mute: self.engine.mute(),
            controls_exposed: settings.expose_controls,
            io_running: self.engine.io_running(),
            latency_ms,
            sample_delta: self.engine.sample_delta(),
            ingest_cycles: self.engine.ingest_cycle_count(),
            relay_cycles: self.engine.relay_cycle_count(),
            overruns: self.engine.overrun_count(),
            drift_ppm: ((self.engine.clock().average_rate_ratio() - 1.0) * 1_000_000.0) as f32,
            binding,
        }
    }

    /// Tear down the binding and stop the background worker.
    pub fn shutdown(&self) {
        self.manager.shutdown();
    }
}

/// Install `driver` as the process-wide active driver for control
/// surfaces and the C bridge.
pub fn install_active_driver(driver: Arc<RelayDriver>) {
    *ACTIVE_DRIVER.write() = Some(driver);
}

/// Remove the process-wide active driver.
pub fn clear_active_driver() {
    *ACTIVE_DRIVER.write() = None;
}

/// The process-wide active driver, if one is installed.
pub fn active_driver() -> Option<Arc<RelayDriver>> {
    ACTIVE_DRIVER.read().clone()
}

/// Status of the active driver, if one is installed.
pub fn driver_status() -> Option<RelayStatus> {
    active_driver().map(|driver| driver.status())
}
