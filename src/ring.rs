//! Absolute-frame-addressed circular store between the ingest and relay paths.

/// Circular audio buffer addressed by monotonically increasing frame numbers.
///
/// Unlike an index-based queue, stores and fetches name the absolute frame
/// range they touch. Only the storage offset wraps (modulo capacity); the
/// frame indices themselves are unbounded signed 64-bit values. The buffer
/// retains at most the newest `capacity_frames` frames ever stored as the
/// valid window `[start_frame, end_frame)`; anything outside that window
/// reads back as silence.
///
/// The buffer performs no internal locking. The ingest and relay callbacks
/// run on different real-time threads, so the owning engine serializes all
/// access through one short-held mutex.
pub struct AudioRingBuffer {
    storage: Vec<f32>,
    samples_per_frame: usize,
    capacity_frames: i64,
    start_frame: i64,
    end_frame: i64,
    /// Sample offset of `start_frame` within `storage`.
    start_offset: usize,
}

impl AudioRingBuffer {
    /// Allocate a buffer holding `capacity_frames` frames of
    /// `samples_per_frame` samples each, zeroed and with an empty window.
    pub fn new(samples_per_frame: usize, capacity_frames: u32) -> Self {
        Self {
            storage: vec![0.0; capacity_frames as usize * samples_per_frame],
            samples_per_frame,
            capacity_frames: i64::from(capacity_frames),
            start_frame: 0,
            end_frame: 0,
            start_offset: 0,
        }
    }

    /// Zero the storage and reset the valid window to empty.
    pub fn clear(&mut self) {
        self.storage.fill(0.0);
        self.start_frame = 0;
        self.end_frame = 0;
        self.start_offset = 0;
    }

    /// Total capacity in frames.
    pub fn capacity_frames(&self) -> u32 {
        self.capacity_frames as u32
    }

    /// First frame of the valid window.
    pub fn start_frame(&self) -> i64 {
        self.start_frame
    }

    /// One past the last frame of the valid window.
    pub fn end_frame(&self) -> i64 {
        self.end_frame
    }

    /// Store `frame_count` frames of `data` at absolute frame `start_frame`.
    ///
    /// Returns `false` only when `frame_count` exceeds the total capacity.
    /// A store landing a full capacity or more past the current end clears
    /// the buffer first: everything retained is too far in the past to
    /// matter. A store ahead of the current end zero-fills the skipped gap;
    /// the window start advances (evicting the oldest frames) whenever the
    /// new end would make the window wider than the capacity. Stores
    /// entirely before the retained window are dropped.
    pub fn store(&mut self, data: &[f32], frame_count: u32, start_frame: i64) -> bool {
        if i64::from(frame_count) > self.capacity_frames {
            return false;
        }
        if frame_count == 0 {
            return true;
        }

        let end_frame = start_frame + i64::from(frame_count);
        let total_samples = frame_count as usize * self.samples_per_frame;

        if start_frame >= self.end_frame + self.capacity_frames {
            // Writing more than one full buffer ahead; everything retained
            // is now too far in the past.
            self.clear();
        }

        if self.start_frame == self.end_frame {
            // Empty window; the new data defines it.
            self.start_offset = 0;
            self.start_frame = start_frame;
            self.end_frame = end_frame;
            self.storage[..total_samples].copy_from_slice(&data[..total_samples]);
            return true;
        }

        if end_frame <= self.start_frame {
            // Entirely older than anything retained.
            return true;
        }

        if end_frame > self.end_frame {
            if start_frame > self.end_frame {
                // Skipping frames; zero the range being skipped.
                self.zero_range(self.end_frame, start_frame);
            }
            self.end_frame = end_frame;

            let new_start = self.end_frame - self.capacity_frames;
            if new_start > self.start_frame {
                let advance = (new_start - self.start_frame) as usize * self.samples_per_frame;
                self.start_offset = (self.start_offset + advance) % self.storage.len();
                self.start_frame = new_start;
            }
        }

        // Everything is lined up; copy the payload, clamped to the window.
        let copy_start = start_frame.max(self.start_frame);
        let skip = (copy_start - start_frame) as usize * self.samples_per_frame;
        self.copy_in(&data[skip..total_samples], copy_start, end_frame);
        true
    }

    /// Fetch `frame_count` frames starting at absolute frame `start_frame`
    /// into `out`.
    ///
    /// Portions of the request before the valid window (never written or
    /// already evicted) or after it (not yet written) are zero-filled.
    /// Returns `true` when any silence was substituted, `false` only when
    /// the entire request was satisfied from valid data.
    pub fn fetch(&self, out: &mut [f32], frame_count: u32, start_frame: i64) -> bool {
        let spf = self.samples_per_frame;
        let total_samples = frame_count as usize * spf;
        let out = &mut out[..total_samples];
        if frame_count == 0 {
            return false;
        }

        let request_start = start_frame;
        let mut start_frame = start_frame;
        let mut end_frame = start_frame + i64::from(frame_count);

        if end_frame < self.start_frame || start_frame >= self.end_frame {
            out.fill(0.0);
            return true;
        }

        let mut silence_substituted = false;

        if start_frame < self.start_frame {
            let head = (self.start_frame - start_frame) as usize * spf;
            out[..head].fill(0.0);
            start_frame = self.start_frame;
            silence_substituted = true;
        }

        if end_frame > self.end_frame {
            let tail_from = (self.end_frame - request_start) as usize * spf;
            out[tail_from..].fill(0.0);
            end_frame = self.end_frame;
            silence_substituted = true;
        }

        if start_frame == end_frame {
            return true;
        }

        let dst_from = (start_frame - request_start) as usize * spf;
        let dst_to = (end_frame - request_start) as usize * spf;
        self.copy_out(&mut out[dst_from..dst_to], start_frame, end_frame);
        silence_substituted
    }

    /// Storage sample offset of `frame`. Callers only pass frames within
    /// one capacity of the window start.
    fn sample_offset(&self, frame: i64) -> usize {
        let ahead = (frame - self.start_frame) as usize * self.samples_per_frame;
        (self.start_offset + ahead) % self.storage.len()
    }

    fn copy_in(&mut self, data: &[f32], from_frame: i64, to_frame: i64) {
        if to_frame <= from_frame {
            return;
        }
        let offset0 = self.sample_offset(from_frame);
        let offset1 = self.sample_offset(to_frame);
        if offset0 < offset1 {
            self.storage[offset0..offset1].copy_from_slice(data);
        } else {
            let head = self.storage.len() - offset0;
            self.storage[offset0..].copy_from_slice(&data[..head]);
            self.storage[..offset1].copy_from_slice(&data[head..]);
        }
    }

    fn copy_out(&self, out: &mut [f32], from_frame: i64, to_frame: i64) {
        let offset0 = self.sample_offset(from_frame);
        let offset1 = self.sample_offset(to_frame);
        if offset0 < offset1 {
            out.copy_from_slice(&self.storage[offset0..offset1]);
        } else {
            let head = self.storage.len() - offset0;
            out[..head].copy_from_slice(&self.storage[offset0..]);
            out[head..].copy_from_slice(&self.storage[..offset1]);
        }
    }

    fn zero_range(&mut self, from_frame: i64, to_frame: i64) {
        if to_frame <= from_frame {
            return;
        }
        let offset0 = self.sample_offset(from_frame);
        let offset1 = self.sample_offset(to_frame);
        if offset0 < offset1 {
            self.storage[offset0..offset1].fill(0.0);
        } else {
            self.storage[offset0..].fill(0.0);
            self.storage[..offset1].fill(0.0);
        }
    }
}
