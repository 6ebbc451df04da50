//! Frame-count based progress reporting

/// Callback receiving progress in [0, 1]
pub type ProgressCallback = Box<dyn Fn(f32) + Send + 'static>;

/// Turns processed-frame counts into a clamped, non-decreasing fraction
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total_frames: u64,
    last: f32,
}

impl ProgressReporter {
    pub fn new(total_frames: u64, callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            total_frames,
            last: 0.0,
        }
    }

    /// Fraction for `processed` frames, without reporting it
    pub fn fraction(&self, processed: u64) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (processed as f32 / self.total_frames as f32).min(1.0)
    }

    /// Report progress after `processed` frames
    ///
    /// Returns the value delivered, which never goes below the last one.
    pub fn frame_processed(&mut self, processed: u64) -> f32 {
        let value = self.fraction(processed).max(self.last);
        self.emit(value)
    }

    /// Report completion after the output has been finalized
    pub fn complete(&mut self) -> f32 {
        self.emit(1.0)
    }

    fn emit(&mut self, value: f32) -> f32 {
        self.last = value;
        if let Some(callback) = &self.callback {
            callback(value);
        }
        value
    }
}
