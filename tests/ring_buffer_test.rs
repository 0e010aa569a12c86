use std::collections::HashMap;

use relay_kit::ring::AudioRingBuffer;

const CHANNELS: usize = 2;
const CAPACITY: u32 = 64;

fn frame_value(frame: i64) -> [f32; 2] {
    [frame as f32 * 0.5, frame as f32 * 0.5 + 0.25]
}

fn frames(range: std::ops::Range<i64>) -> Vec<f32> {
    let mut out = Vec::with_capacity(range.clone().count() * CHANNELS);
    for frame in range {
        out.extend_from_slice(&frame_value(frame));
    }
    out
}

#[test]
fn round_trip_returns_exact_pattern() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    let data = frames(100..140);
    assert!(ring.store(&data, 40, 100));

    let mut out = vec![0.0f32; 40 * CHANNELS];
    let overrun = ring.fetch(&mut out, 40, 100);
    assert!(!overrun, "fully valid fetch must not flag silence");
    assert_eq!(out, data);
}

#[test]
fn store_larger_than_capacity_is_rejected() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    let data = frames(0..(CAPACITY as i64 + 1));
    assert!(!ring.store(&data, CAPACITY + 1, 0));
    assert_eq!(ring.start_frame(), ring.end_frame());
}

#[test]
fn fetch_outside_window_is_all_zeros() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    assert!(ring.store(&frames(100..120), 20, 100));

    // Entirely before the window.
    let mut out = vec![7.0f32; 10 * CHANNELS];
    assert!(ring.fetch(&mut out, 10, 50));
    assert!(out.iter().all(|&s| s == 0.0));

    // Entirely after the window.
    let mut out = vec![7.0f32; 10 * CHANNELS];
    assert!(ring.fetch(&mut out, 10, 200));
    assert!(out.iter().all(|&s| s == 0.0));
}

#[test]
fn gap_between_stores_reads_as_silence() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    assert!(ring.store(&frames(0..10), 10, 0));
    assert!(ring.store(&frames(20..30), 10, 20));

    let mut out = vec![7.0f32; 10 * CHANNELS];
    let overrun = ring.fetch(&mut out, 10, 10);
    assert!(!overrun, "the gap is inside the valid window");
    assert!(out.iter().all(|&s| s == 0.0));

    // The stored ranges survive around the gap.
    let mut out = vec![0.0f32; 10 * CHANNELS];
    assert!(!ring.fetch(&mut out, 10, 20));
    assert_eq!(out, frames(20..30));
}

#[test]
fn partial_fetch_zero_fills_and_flags() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    assert!(ring.store(&frames(100..120), 20, 100));

    // Head before the window.
    let mut out = vec![7.0f32; 10 * CHANNELS];
    assert!(ring.fetch(&mut out, 10, 95));
    assert!(out[..5 * CHANNELS].iter().all(|&s| s == 0.0));
    assert_eq!(&out[5 * CHANNELS..], &frames(100..105)[..]);

    // Tail past the window.
    let mut out = vec![7.0f32; 10 * CHANNELS];
    assert!(ring.fetch(&mut out, 10, 115));
    assert_eq!(&out[..5 * CHANNELS], &frames(115..120)[..]);
    assert!(out[5 * CHANNELS..].iter().all(|&s| s == 0.0));
}

#[test]
fn window_never_wider_than_capacity() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    let mut next = 0i64;
    for _ in 0..50 {
        let count = 24u32;
        assert!(ring.store(&frames(next..next + i64::from(count)), count, next));
        assert!(ring.end_frame() - ring.start_frame() <= i64::from(CAPACITY));
        next += i64::from(count);
    }

    // Evicted frames read as silence and flag the overrun.
    let mut out = vec![7.0f32; 8 * CHANNELS];
    assert!(ring.fetch(&mut out, 8, 0));
    assert!(out.iter().all(|&s| s == 0.0));

    // The newest capacity's worth survives intact.
    let start = ring.start_frame();
    let mut out = vec![0.0f32; CAPACITY as usize * CHANNELS];
    assert!(!ring.fetch(&mut out, CAPACITY, start));
    assert_eq!(out, frames(start..start + i64::from(CAPACITY)));
}

#[test]
fn distant_store_clears_stale_data() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    assert!(ring.store(&frames(0..32), 32, 0));

    // A store a full capacity past the end resets everything.
    let jump = 32 + i64::from(CAPACITY);
    assert!(ring.store(&frames(jump..jump + 16), 16, jump));
    assert_eq!(ring.start_frame(), jump);
    assert_eq!(ring.end_frame(), jump + 16);

    let mut out = vec![7.0f32; 32 * CHANNELS];
    assert!(ring.fetch(&mut out, 32, 0));
    assert!(out.iter().all(|&s| s == 0.0));
}

/// Non-wrapping reference model with the same window semantics.
struct ModelRing {
    capacity: i64,
    start: i64,
    end: i64,
    data: HashMap<i64, [f32; 2]>,
}

impl ModelRing {
    fn new(capacity: i64) -> Self {
        Self {
            capacity,
            start: 0,
            end: 0,
            data: HashMap::new(),
        }
    }

    fn store(&mut self, payload: &[[f32; 2]], start_frame: i64) {
        let end_frame = start_frame + payload.len() as i64;
        if start_frame >= self.end + self.capacity {
            self.data.clear();
            self.start = 0;
            self.end = 0;
        }
        if self.start == self.end {
            self.start = start_frame;
            self.end = end_frame;
        } else {
            if end_frame <= self.start {
                return;
            }
            if start_frame > self.end {
                for frame in self.end..start_frame {
                    self.data.insert(frame, [0.0; 2]);
                }
            }
            if end_frame > self.end {
                self.end = end_frame;
            }
            if self.end - self.capacity > self.start {
                self.start = self.end - self.capacity;
            }
        }
        for (index, value) in payload.iter().enumerate() {
            let frame = start_frame + index as i64;
            if frame >= self.start {
                self.data.insert(frame, *value);
            }
        }
    }

    fn fetch(&self, count: usize, start_frame: i64) -> (Vec<f32>, bool) {
        let mut out = Vec::with_capacity(count * CHANNELS);
        let mut silence = false;
        for frame in start_frame..start_frame + count as i64 {
            if frame < self.start || frame >= self.end {
                silence = true;
                out.extend_from_slice(&[0.0, 0.0]);
            } else {
                out.extend_from_slice(&self.data.get(&frame).copied().unwrap_or([0.0; 2]));
            }
        }
        (out, silence)
    }
}

#[test]
fn wraparound_matches_reference_model() {
    let mut ring = AudioRingBuffer::new(CHANNELS, CAPACITY);
    let mut model = ModelRing::new(i64::from(CAPACITY));

    // Deterministic pseudo-random walk of stores and fetches, sized so
    // stores repeatedly straddle the storage boundary.
    let mut seed = 0x2545_f491u64;
    let mut rand = move || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (seed >> 33) as i64
    };

    let mut cursor = 0i64;
    for _ in 0..400 {
        let count = 1 + (rand() % 40);
        let jitter = rand() % 20 - 6;
        let start = (cursor + jitter).max(0);
        cursor = start + count;

        let payload: Vec<[f32; 2]> = (start..start + count).map(frame_value).collect();
        let flat: Vec<f32> = payload.iter().flatten().copied().collect();
        assert!(ring.store(&flat, count as u32, start));
        model.store(&payload, start);

        let fetch_count = 1 + (rand() % 50) as usize;
        let fetch_start = (cursor - rand() % 80).max(0);
        let mut out = vec![7.0f32; fetch_count * CHANNELS];
        let overrun = ring.fetch(&mut out, fetch_count as u32, fetch_start);
        let (expected, expected_silence) = model.fetch(fetch_count, fetch_start);

        assert_eq!(out, expected, "fetch [{fetch_start}, +{fetch_count}) diverged");
        assert_eq!(overrun, expected_silence, "silence flag diverged at [{fetch_start}, +{fetch_count})");
    }
}
