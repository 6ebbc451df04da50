//! In-memory media collaborators
//!
//! [`SyntheticSource`] generates frames and audio packets on demand and
//! [`RecordingMuxer`] keeps everything written to it. Both are used for
//! dry runs and for exercising the pipeline without ffmpeg.

use super::{
    AudioPassthroughConfig, AudioTrackReader, MediaDemuxer, MediaMuxer, MediaWriter, OpenedSource,
    VideoCodecConfig, VideoTrackReader,
};
use crate::error::TrackKind;
use crate::frame::{BitDepth, EncodedSample, PlaneFrame, VideoFrame};
use crate::planner::InputVideoProperties;
use crate::{SuperviewError, SuperviewResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Content of generated frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FramePattern {
    /// Every sample of a plane has the same value
    Flat { y: u16, u: u16, v: u16 },
    /// Luma ramps left to right, chroma is neutral
    Gradient,
}

/// Source that fabricates its tracks
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    pub width: u32,
    pub height: u32,
    pub depth: BitDepth,
    pub frame_rate: f64,
    pub frame_count: u64,
    /// Duration reported in the properties; defaults to the length of
    /// the generated track so the frame estimate is exact
    pub reported_duration: Option<Duration>,
    pub bitrate: u64,
    pub pattern: FramePattern,
    pub audio_packets: u64,
    pub has_video: bool,
    pub has_audio: bool,
    /// Fail the video reader when this frame index is requested
    pub fail_video_at: Option<u64>,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32, frame_rate: f64, frame_count: u64) -> Self {
        Self {
            width,
            height,
            depth: BitDepth::Eight,
            frame_rate,
            frame_count,
            reported_duration: None,
            bitrate: 4_000_000,
            pattern: FramePattern::Gradient,
            audio_packets: frame_count,
            has_video: true,
            has_audio: true,
            fail_video_at: None,
        }
    }

    pub fn with_pattern(mut self, pattern: FramePattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_depth(mut self, depth: BitDepth) -> Self {
        self.depth = depth;
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.has_audio = false;
        self
    }

    pub fn without_video(mut self) -> Self {
        self.has_video = false;
        self
    }

    pub fn failing_at(mut self, frame: u64) -> Self {
        self.fail_video_at = Some(frame);
        self
    }

    pub fn with_reported_duration(mut self, duration: Duration) -> Self {
        self.reported_duration = Some(duration);
        self
    }

    pub fn properties(&self) -> InputVideoProperties {
        let duration = self
            .reported_duration
            .unwrap_or_else(|| Duration::from_secs_f64(self.frame_count as f64 / self.frame_rate));
        InputVideoProperties {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            bitrate: self.bitrate,
            duration,
            depth: self.depth,
        }
    }

    /// Frame `index` as the video reader would produce it
    pub fn frame(&self, index: u64) -> VideoFrame {
        let planes = match self.pattern {
            FramePattern::Flat { y, u, v } => {
                PlaneFrame::filled(self.width, self.height, self.depth, y, u, v)
            }
            FramePattern::Gradient => {
                let max = self.depth.max_value() as u32;
                let mid = (max + 1) / 2;
                let mut frame =
                    PlaneFrame::filled(self.width, self.height, self.depth, 0, mid as u16, mid as u16);
                let span = self.width.saturating_sub(1).max(1);
                for (i, sample) in frame.luma.iter_mut().enumerate() {
                    let x = (i as u32) % self.width;
                    *sample = ((x * max) / span).min(max) as u16;
                }
                frame
            }
        };
        VideoFrame {
            planes,
            presentation_time: Duration::from_secs_f64(index as f64 / self.frame_rate),
        }
    }

    /// Audio packet `index` as the audio reader would produce it
    pub fn audio_packet(index: u64) -> EncodedSample {
        EncodedSample {
            data: vec![(index % 256) as u8; 32],
            presentation_time: Some(Duration::from_millis(index * 20)),
        }
    }
}

struct SyntheticVideoReader {
    source: SyntheticSource,
    next: u64,
}

#[async_trait]
impl VideoTrackReader for SyntheticVideoReader {
    async fn next_video_frame(&mut self) -> SuperviewResult<Option<VideoFrame>> {
        if self.next >= self.source.frame_count {
            return Ok(None);
        }
        if self.source.fail_video_at == Some(self.next) {
            return Err(SuperviewError::ReaderFailure(format!(
                "Synthetic decode failure at frame {}",
                self.next
            )));
        }
        let frame = self.source.frame(self.next);
        self.next += 1;
        Ok(Some(frame))
    }
}

struct SyntheticAudioReader {
    packets: u64,
    next: u64,
}

#[async_trait]
impl AudioTrackReader for SyntheticAudioReader {
    async fn next_audio_sample(&mut self) -> SuperviewResult<Option<EncodedSample>> {
        if self.next >= self.packets {
            return Ok(None);
        }
        let packet = SyntheticSource::audio_packet(self.next);
        self.next += 1;
        Ok(Some(packet))
    }
}

#[async_trait]
impl MediaDemuxer for SyntheticSource {
    async fn open_for_reading(&self, path: &Path) -> SuperviewResult<OpenedSource> {
        if !self.has_video {
            return Err(SuperviewError::MissingTrack(TrackKind::Video));
        }
        if !self.has_audio {
            return Err(SuperviewError::MissingTrack(TrackKind::Audio));
        }

        tracing::debug!("Opened synthetic source for {:?}", path);

        Ok(OpenedSource {
            video: Box::new(SyntheticVideoReader {
                source: self.clone(),
                next: 0,
            }),
            audio: Box::new(SyntheticAudioReader {
                packets: self.audio_packets,
                next: 0,
            }),
            properties: self.properties(),
            audio_config: AudioPassthroughConfig {
                codec: "aac".to_string(),
                sample_rate: 48_000,
                channels: 2,
            },
        })
    }
}

/// Everything a [`RecordingMuxer`] writer received
#[derive(Debug, Default)]
pub struct Recording {
    pub video_config: Option<VideoCodecConfig>,
    pub audio_config: Option<AudioPassthroughConfig>,
    pub frames: Vec<VideoFrame>,
    pub audio: Vec<EncodedSample>,
    /// Times a readiness check answered "not ready"
    pub not_ready_polls: u64,
    pub video_finished: bool,
    pub audio_finished: bool,
    pub finished: bool,
    pub aborted: bool,
}

/// Muxer whose writers record appended samples in memory
#[derive(Debug, Clone, Default)]
pub struct RecordingMuxer {
    recording: Arc<Mutex<Recording>>,
    /// Every Nth readiness check reports not ready (0 = always ready)
    busy_every: u64,
    fail_video_at: Option<u64>,
    fail_audio_at: Option<u64>,
    fail_finish: bool,
}

impl RecordingMuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report not-ready on every `n`th readiness check of each stream
    pub fn with_busy_every(mut self, n: u64) -> Self {
        self.busy_every = n;
        self
    }

    /// Reject the video frame with this index
    pub fn failing_video_at(mut self, frame: u64) -> Self {
        self.fail_video_at = Some(frame);
        self
    }

    /// Reject the audio sample with this index
    pub fn failing_audio_at(mut self, sample: u64) -> Self {
        self.fail_audio_at = Some(sample);
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    /// Shared view of what has been written
    pub fn recording(&self) -> Arc<Mutex<Recording>> {
        self.recording.clone()
    }
}

#[async_trait]
impl MediaMuxer for RecordingMuxer {
    async fn open_for_writing(
        &self,
        path: &Path,
        video: &VideoCodecConfig,
        audio: &AudioPassthroughConfig,
    ) -> SuperviewResult<Box<dyn MediaWriter>> {
        {
            let mut recording = lock(&self.recording);
            *recording = Recording::default();
            recording.video_config = Some(video.clone());
            recording.audio_config = Some(audio.clone());
        }
        tracing::debug!("Recording writer opened for {:?}", path);

        Ok(Box::new(RecordingWriter {
            recording: self.recording.clone(),
            busy_every: self.busy_every,
            fail_video_at: self.fail_video_at,
            fail_audio_at: self.fail_audio_at,
            fail_finish: self.fail_finish,
            video_polls: Default::default(),
            audio_polls: Default::default(),
        }))
    }
}

fn lock(recording: &Mutex<Recording>) -> MutexGuard<'_, Recording> {
    recording.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct RecordingWriter {
    recording: Arc<Mutex<Recording>>,
    busy_every: u64,
    fail_video_at: Option<u64>,
    fail_audio_at: Option<u64>,
    fail_finish: bool,
    video_polls: AtomicU64,
    audio_polls: AtomicU64,
}

impl RecordingWriter {
    fn ready(&self, polls: &AtomicU64) -> bool {
        if self.busy_every == 0 {
            return true;
        }
        let poll = polls.fetch_add(1, Ordering::Relaxed) + 1;
        if poll % self.busy_every == 0 {
            lock(&self.recording).not_ready_polls += 1;
            return false;
        }
        true
    }
}

#[async_trait]
impl MediaWriter for RecordingWriter {
    fn is_video_ready(&self) -> bool {
        self.ready(&self.video_polls)
    }

    fn is_audio_ready(&self) -> bool {
        self.ready(&self.audio_polls)
    }

    async fn append_video(&mut self, frame: VideoFrame) -> SuperviewResult<()> {
        let mut recording = lock(&self.recording);
        if recording.video_finished {
            return Err(SuperviewError::WriterFailure(
                "Video appended after finish".to_string(),
            ));
        }
        if self.fail_video_at == Some(recording.frames.len() as u64) {
            return Err(SuperviewError::WriterFailure(format!(
                "Writer rejected frame {}",
                recording.frames.len()
            )));
        }
        recording.frames.push(frame);
        Ok(())
    }

    async fn append_audio(&mut self, sample: EncodedSample) -> SuperviewResult<()> {
        let mut recording = lock(&self.recording);
        if recording.audio_finished {
            return Err(SuperviewError::WriterFailure(
                "Audio appended after finish".to_string(),
            ));
        }
        if self.fail_audio_at == Some(recording.audio.len() as u64) {
            return Err(SuperviewError::WriterFailure(format!(
                "Writer rejected audio sample {}",
                recording.audio.len()
            )));
        }
        recording.audio.push(sample);
        Ok(())
    }

    async fn finish_video(&mut self) -> SuperviewResult<()> {
        lock(&self.recording).video_finished = true;
        Ok(())
    }

    async fn finish_audio(&mut self) -> SuperviewResult<()> {
        lock(&self.recording).audio_finished = true;
        Ok(())
    }

    async fn finish(&mut self) -> SuperviewResult<()> {
        let mut recording = lock(&self.recording);
        if !recording.video_finished || !recording.audio_finished {
            return Err(SuperviewError::WriterFailure(
                "Finish called before both streams ended".to_string(),
            ));
        }
        if self.fail_finish {
            return Err(SuperviewError::WriterFailure(
                "Container finalization failed".to_string(),
            ));
        }
        recording.finished = true;
        Ok(())
    }

    async fn abort(&mut self) {
        lock(&self.recording).aborted = true;
    }
}
