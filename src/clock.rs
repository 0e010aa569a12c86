//! Host-time / sample-time reconciliation for the virtual device timeline.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

#[cfg(target_os = "macos")]
use mach::mach_time::{mach_absolute_time, mach_timebase_info, mach_timebase_info_data_t};
#[cfg(target_os = "macos")]
use once_cell::sync::Lazy;

use crate::ZERO_TIMESTAMP_PERIOD_FRAMES;

/// Rate-scalar samples accumulated per query window before further samples
/// are skipped; reaching the cap means the device is idling.
const RATE_SCALAR_SAMPLE_CAP: u32 = 10_000;

/// Periodic anchor mapping the virtual device's sample counter to host time.
#[derive(Debug, Clone, Copy)]
pub struct ZeroTimestamp {
    /// Sample time of the period boundary, always a whole multiple of the
    /// ring buffer period.
    pub sample_time: f64,
    /// Host tick count corresponding to `sample_time`.
    pub host_time: u64,
    /// Timeline seed. Constant: the timeline never resets mid-stream.
    pub seed: u64,
}

struct ClockInner {
    anchor_host_time: u64,
    timestamp_count: u64,
    elapsed_ticks: f64,
    rate_scalar_sum: f64,
    rate_scalar_samples: u32,
}

/// Zero-timestamp generator for the virtual device.
///
/// The physical output device reports its measured clock deviation (rate
/// scalar) every relay cycle. Averaging those reports and folding the
/// average into the tick stride of each zero-timestamp period keeps the
/// virtual timeline tracking the physical clock instead of drifting away
/// from it.
///
/// All fields are behind a dedicated lock, distinct from the engine's
/// state lock: the accumulator is fed from the relay thread while the
/// timestamp query arrives from the host concurrently.
pub struct ZeroTimestampClock {
    inner: Mutex<ClockInner>,
    host_ticks_per_frame_bits: AtomicU64,
}

impl ZeroTimestampClock {
    /// Create a clock for `sample_rate`, anchored at the current host time.
    pub fn new(sample_rate: f64) -> Self {
        let clock = Self {
            inner: Mutex::new(ClockInner {
                anchor_host_time: host_time_now(),
                timestamp_count: 0,
                elapsed_ticks: 0.0,
                rate_scalar_sum: 0.0,
                rate_scalar_samples: 0,
            }),
            host_ticks_per_frame_bits: AtomicU64::new(0),
        };
        clock.set_sample_rate(sample_rate);
        clock
    }

    /// Recompute the tick stride after a nominal sample rate change.
    pub fn set_sample_rate(&self, sample_rate: f64) {
        let ticks_per_frame = host_tick_frequency() / sample_rate;
        self.host_ticks_per_frame_bits
            .store(ticks_per_frame.to_bits(), Ordering::Relaxed);
    }

    /// Host ticks per frame at the current nominal rate.
    pub fn host_ticks_per_frame(&self) -> f64 {
        f64::from_bits(self.host_ticks_per_frame_bits.load(Ordering::Relaxed))
    }

    /// Re-anchor the timeline at `now`. Called when the first IO client
    /// starts; resets the period counter and the rate accumulator.
    pub fn anchor(&self, now: u64) {
        let mut inner = self.inner.lock();
        inner.anchor_host_time = now;
        inner.timestamp_count = 0;
        inner.elapsed_ticks = 0.0;
        inner.rate_scalar_sum = 0.0;
        inner.rate_scalar_samples = 0;
    }

    /// Record one relay cycle's observed rate scalar.
    pub fn note_rate_scalar(&self, rate_scalar: f64) {
        let mut inner = self.inner.lock();
        if inner.rate_scalar_samples < RATE_SCALAR_SAMPLE_CAP {
            inner.rate_scalar_sum += rate_scalar;
            inner.rate_scalar_samples += 1;
        }
    }

    /// Average rate ratio over the current accumulation window, `1.0`
    /// before any relay cycle has reported.
    pub fn average_rate_ratio(&self) -> f64 {
        let inner = self.inner.lock();
        if inner.rate_scalar_samples > 0 {
            inner.rate_scalar_sum / f64::from(inner.rate_scalar_samples)
        } else {
            1.0
        }
    }

    /// Compute the zero timestamp for the next IO cycle boundary.
    ///
    /// Sample time advances in whole ring-buffer periods. The host-tick
    /// stride of each period is scaled by the averaged rate scalar, and the
    /// timeline advances by one period when the candidate next boundary is
    /// at or before `now`. The accumulator resets on every query. Both
    /// returned times are monotonically non-decreasing.
    pub fn next_zero_timestamp(&self, now: u64) -> ZeroTimestamp {
        let mut inner = self.inner.lock();

        let rate_ratio = if inner.rate_scalar_samples > 0 {
            inner.rate_scalar_sum / f64::from(inner.rate_scalar_samples)
        } else {
            1.0
        };

        let ticks_per_period =
            self.host_ticks_per_frame() * f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES) * rate_ratio;
        let next_host_time =
            inner.anchor_host_time + (inner.elapsed_ticks + ticks_per_period) as u64;

        if next_host_time <= now {
            inner.timestamp_count += 1;
            inner.elapsed_ticks += ticks_per_period;
        }

        let timestamp = ZeroTimestamp {
            sample_time: inner.timestamp_count as f64 * f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES),
            host_time: inner.anchor_host_time + inner.elapsed_ticks as u64,
            seed: 1,
        };

        inner.rate_scalar_sum = 0.0;
        inner.rate_scalar_samples = 0;

        timestamp
    }
}

#[cfg(target_os = "macos")]
fn timebase() -> (u64, u64) {
    static TIMEBASE: Lazy<(u64, u64)> = Lazy::new(|| unsafe {
        let mut info = mach_timebase_info_data_t::default();
        mach_timebase_info(&mut info);
        (info.numer as u64, info.denom as u64)
    });
    *TIMEBASE
}

/// Host clock frequency in ticks per second.
pub fn host_tick_frequency() -> f64 {
    #[cfg(target_os = "macos")]
    {
        let (numer, denom) = timebase();
        (denom as f64 / numer as f64) * 1_000_000_000.0
    }
    #[cfg(not(target_os = "macos"))]
    {
        1_000_000_000.0
    }
}

/// Current host time in ticks.
pub fn host_time_now() -> u64 {
    #[cfg(target_os = "macos")]
    {
        unsafe { mach_absolute_time() }
    }
    #[cfg(not(target_os = "macos"))]
    {
        use once_cell::sync::Lazy;
        static EPOCH: Lazy<std::time::Instant> = Lazy::new(std::time::Instant::now);
        EPOCH.elapsed().as_nanos() as u64
    }
}
