use relay_kit::ZERO_TIMESTAMP_PERIOD_FRAMES;
use relay_kit::clock::{ZeroTimestampClock, host_tick_frequency};

const SAMPLE_RATE: f64 = 48_000.0;

fn ticks_per_period() -> f64 {
    host_tick_frequency() / SAMPLE_RATE * f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES)
}

#[test]
fn timestamps_never_decrease() {
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(0);

    // Arbitrary rate-scalar reports and irregular query spacing.
    let mut seed = 0x9e37_79b9u64;
    let mut rand = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as u64
    };

    let mut now = 0u64;
    let mut last_sample_time = f64::NEG_INFINITY;
    let mut last_host_time = 0u64;

    for _ in 0..500 {
        for _ in 0..(rand() % 8) {
            let scalar = 0.98 + (rand() % 1000) as f64 / 25_000.0;
            clock.note_rate_scalar(scalar);
        }
        now += rand() % (ticks_per_period() as u64 * 2);

        let timestamp = clock.next_zero_timestamp(now);
        assert!(
            timestamp.sample_time >= last_sample_time,
            "sample time regressed: {} -> {}",
            last_sample_time,
            timestamp.sample_time
        );
        assert!(
            timestamp.host_time >= last_host_time,
            "host time regressed: {} -> {}",
            last_host_time,
            timestamp.host_time
        );
        assert_eq!(timestamp.seed, 1);
        last_sample_time = timestamp.sample_time;
        last_host_time = timestamp.host_time;
    }
}

#[test]
fn sample_time_is_a_period_multiple() {
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(0);

    let mut now = 0u64;
    for _ in 0..50 {
        now += ticks_per_period() as u64 + 1;
        let timestamp = clock.next_zero_timestamp(now);
        let periods = timestamp.sample_time / f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES);
        assert_eq!(periods.fract(), 0.0, "sample time {} is not a period multiple", timestamp.sample_time);
    }
}

#[test]
fn advances_one_period_per_query_at_most() {
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(0);

    // Host time is far ahead; each query may only catch up one period.
    let far = ticks_per_period() as u64 * 10;
    for expected_periods in 1..=5u64 {
        let timestamp = clock.next_zero_timestamp(far);
        assert_eq!(
            timestamp.sample_time,
            expected_periods as f64 * f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES)
        );
    }
}

#[test]
fn anchored_clock_reports_initial_state() {
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(1_000_000);

    // Before the first period elapses the query returns the anchor.
    let timestamp = clock.next_zero_timestamp(1_000_000);
    assert_eq!(timestamp.sample_time, 0.0);
    assert_eq!(timestamp.host_time, 1_000_000);
}

#[test]
fn rate_accumulator_resets_on_query() {
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(0);

    clock.note_rate_scalar(1.02);
    clock.note_rate_scalar(1.02);
    clock.note_rate_scalar(1.02);
    assert!((clock.average_rate_ratio() - 1.02).abs() < 1e-12);

    let _ = clock.next_zero_timestamp(0);
    assert_eq!(clock.average_rate_ratio(), 1.0);
}

#[test]
fn rate_ratio_scales_the_period_stride() {
    // A slow device (ratio > 1) stretches the host-time stride of each
    // period, so a nominal-length wait does not yet advance the timeline.
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(0);
    clock.note_rate_scalar(1.05);

    let nominal = ticks_per_period() as u64 + 1;
    let timestamp = clock.next_zero_timestamp(nominal);
    assert_eq!(timestamp.sample_time, 0.0, "stretched period advanced early");

    // At nominal rate the same wait does advance.
    let clock = ZeroTimestampClock::new(SAMPLE_RATE);
    clock.anchor(0);
    let timestamp = clock.next_zero_timestamp(nominal);
    assert_eq!(
        timestamp.sample_time,
        f64::from(ZERO_TIMESTAMP_PERIOD_FRAMES)
    );
}
