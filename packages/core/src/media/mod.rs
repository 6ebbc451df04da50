//! Container demuxing and muxing collaborators
//!
//! The pipeline only talks to media through these traits. [`memory`]
//! provides synthetic sources and a recording writer; the `encoding`
//! feature adds ffmpeg-backed implementations in `ffmpeg`.

#[cfg(feature = "encoding")]
pub mod ffmpeg;
pub mod memory;

use crate::config::ConvertSettings;
use crate::frame::{BitDepth, EncodedSample, VideoFrame};
use crate::planner::{InputVideoProperties, OutputPlan};
use crate::SuperviewResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Video codec for the output track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264/AVC - widely compatible
    #[default]
    H264,
    /// H.265/HEVC - required for 10-bit output
    H265,
}

impl VideoCodec {
    /// ffmpeg encoder name
    pub fn as_encoder(&self, hardware_accel: bool) -> &'static str {
        match (self, hardware_accel) {
            (VideoCodec::H264, true) if cfg!(target_os = "macos") => "h264_videotoolbox",
            (VideoCodec::H265, true) if cfg!(target_os = "macos") => "hevc_videotoolbox",
            (VideoCodec::H264, true) => "h264_nvenc",
            (VideoCodec::H265, true) => "hevc_nvenc",
            (VideoCodec::H264, false) => "libx264",
            (VideoCodec::H265, false) => "libx265",
        }
    }
}

impl std::fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoCodec::H264 => write!(f, "H.264"),
            VideoCodec::H265 => write!(f, "H.265"),
        }
    }
}

/// Encoder configuration for the output video track
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCodecConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second
    pub bitrate: u64,
    pub frame_rate: f64,
    pub depth: BitDepth,
    pub hardware_accel: bool,
    pub preset: String,
}

impl VideoCodecConfig {
    /// Encoder settings for a planned conversion
    ///
    /// 10-bit sources are always encoded as H.265 so depth is preserved.
    pub fn for_plan(plan: &OutputPlan, input: &InputVideoProperties, settings: &ConvertSettings) -> Self {
        let codec = match plan.depth {
            BitDepth::Ten => VideoCodec::H265,
            BitDepth::Eight => settings.video_codec,
        };
        Self {
            codec,
            width: plan.output_width,
            height: plan.output_height,
            bitrate: plan.target_bitrate,
            frame_rate: input.frame_rate,
            depth: plan.depth,
            hardware_accel: settings.hardware_accel,
            preset: settings.encoder_preset.clone(),
        }
    }
}

/// Description of the audio track copied to the output unchanged
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AudioPassthroughConfig {
    /// Codec name as reported by the source, e.g. "aac"
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Decoded video track of an open source
#[async_trait]
pub trait VideoTrackReader: Send {
    /// Next frame in presentation order, `None` at end of stream
    async fn next_video_frame(&mut self) -> SuperviewResult<Option<VideoFrame>>;
}

/// Encoded audio track of an open source
#[async_trait]
pub trait AudioTrackReader: Send {
    /// Next sample in presentation order, `None` at end of stream
    async fn next_audio_sample(&mut self) -> SuperviewResult<Option<EncodedSample>>;
}

/// Everything a conversion needs from an opened input
pub struct OpenedSource {
    pub video: Box<dyn VideoTrackReader>,
    pub audio: Box<dyn AudioTrackReader>,
    pub properties: InputVideoProperties,
    pub audio_config: AudioPassthroughConfig,
}

#[async_trait]
pub trait MediaDemuxer: Send + Sync {
    /// Open `path` for reading; fails with `MissingTrack` unless the
    /// source has both a video and an audio track
    async fn open_for_reading(&self, path: &Path) -> SuperviewResult<OpenedSource>;
}

#[async_trait]
pub trait MediaMuxer: Send + Sync {
    async fn open_for_writing(
        &self,
        path: &Path,
        video: &VideoCodecConfig,
        audio: &AudioPassthroughConfig,
    ) -> SuperviewResult<Box<dyn MediaWriter>>;
}

/// Output container accepting a video and an audio stream
///
/// Readiness is the back-pressure signal: callers only append to a stream
/// that reports ready, and wait otherwise.
#[async_trait]
pub trait MediaWriter: Send {
    fn is_video_ready(&self) -> bool;

    fn is_audio_ready(&self) -> bool;

    async fn append_video(&mut self, frame: VideoFrame) -> SuperviewResult<()>;

    async fn append_audio(&mut self, sample: EncodedSample) -> SuperviewResult<()>;

    /// No more video will be appended
    async fn finish_video(&mut self) -> SuperviewResult<()>;

    /// No more audio will be appended
    async fn finish_audio(&mut self) -> SuperviewResult<()>;

    /// Finalize the container after both streams are finished
    async fn finish(&mut self) -> SuperviewResult<()>;

    /// Stop writing and discard partial output
    async fn abort(&mut self);
}
