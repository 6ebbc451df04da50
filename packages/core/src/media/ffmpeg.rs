//! Demuxer and muxer built on the ffmpeg sidecar binaries
//!
//! Video is decoded to raw NV12/P010 over a pipe and the audio track is
//! stream-copied as Matroska bytes over a second pipe. The writer encodes
//! video into a temporary file, collects audio into another, and muxes
//! both into the output on `finish`.

use super::{
    AudioPassthroughConfig, AudioTrackReader, MediaDemuxer, MediaMuxer, MediaWriter, OpenedSource,
    VideoCodec, VideoCodecConfig, VideoTrackReader,
};
use crate::error::TrackKind;
use crate::frame::{raw_frame_size, BitDepth, EncodedSample, PlaneFrame, VideoFrame};
use crate::planner::InputVideoProperties;
use crate::{SuperviewError, SuperviewResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const AUDIO_CHUNK_SIZE: usize = 64 * 1024;

/// Ensure ffmpeg is available, download if needed
pub fn ensure_ffmpeg() -> SuperviewResult<()> {
    use ffmpeg_sidecar::download::auto_download;

    if ffmpeg_sidecar::command::ffmpeg_is_installed() {
        tracing::debug!("FFmpeg is already installed");
        return Ok(());
    }

    tracing::info!("FFmpeg not found, downloading...");
    auto_download()
        .map_err(|e| SuperviewError::SetupFailure(format!("Failed to download FFmpeg: {}", e)))?;

    tracing::info!("FFmpeg downloaded successfully");
    Ok(())
}

async fn ensure_ffmpeg_async() -> SuperviewResult<()> {
    tokio::task::spawn_blocking(ensure_ffmpeg)
        .await
        .map_err(|e| SuperviewError::SetupFailure(format!("FFmpeg check panicked: {}", e)))?
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    avg_frame_rate: Option<String>,
    r_frame_rate: Option<String>,
    bit_rate: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    channels: Option<u16>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Track information read from ffprobe
#[derive(Debug, Clone, PartialEq)]
pub struct ProbedSource {
    pub video: Option<InputVideoProperties>,
    pub audio: Option<AudioPassthroughConfig>,
}

fn parse_frame_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn rotation_degrees(stream: &ProbeStream) -> i64 {
    stream
        .side_data_list
        .iter()
        .find_map(|s| s.rotation)
        .map(|r| r.round() as i64)
        .or_else(|| stream.tags.get("rotate").and_then(|r| r.parse().ok()))
        .unwrap_or(0)
}

/// 10-bit formats are the planar `*p10le`/`*p10be` family and semi-planar `p010`
fn depth_for_pixel_format(pix_fmt: &str) -> BitDepth {
    if pix_fmt.contains("p10") || pix_fmt.starts_with("p010") {
        BitDepth::Ten
    } else {
        BitDepth::Eight
    }
}

/// Parse `ffprobe -show_streams -show_format` JSON output
pub fn parse_probe(json: &str) -> SuperviewResult<ProbedSource> {
    let probe: ProbeOutput = serde_json::from_str(json)?;
    let container_duration = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok());

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .map(|stream| -> SuperviewResult<InputVideoProperties> {
            let (mut width, mut height) = match (stream.width, stream.height) {
                (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
                _ => {
                    return Err(SuperviewError::ReaderFailure(
                        "Video stream has no dimensions".to_string(),
                    ))
                }
            };
            if rotation_degrees(stream).rem_euclid(180) == 90 {
                std::mem::swap(&mut width, &mut height);
            }

            let frame_rate = stream
                .avg_frame_rate
                .as_deref()
                .and_then(parse_frame_rate)
                .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate))
                .ok_or_else(|| {
                    SuperviewError::ReaderFailure("Video stream has no frame rate".to_string())
                })?;

            let duration = stream
                .duration
                .as_deref()
                .and_then(|d| d.parse::<f64>().ok())
                .or(container_duration)
                .filter(|d| d.is_finite() && *d >= 0.0)
                .unwrap_or(0.0);

            let depth = stream
                .pix_fmt
                .as_deref()
                .map(depth_for_pixel_format)
                .unwrap_or(BitDepth::Eight);

            Ok(InputVideoProperties {
                width,
                height,
                frame_rate,
                bitrate: stream
                    .bit_rate
                    .as_deref()
                    .and_then(|b| b.parse().ok())
                    .unwrap_or(0),
                duration: Duration::from_secs_f64(duration),
                depth,
            })
        })
        .transpose()?;

    let audio = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"))
        .map(|stream| AudioPassthroughConfig {
            codec: stream.codec_name.clone().unwrap_or_default(),
            sample_rate: stream
                .sample_rate
                .as_deref()
                .and_then(|r| r.parse().ok())
                .unwrap_or(0),
            channels: stream.channels.unwrap_or(0),
        });

    Ok(ProbedSource { video, audio })
}

fn path_arg(path: &Path) -> SuperviewResult<String> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| SuperviewError::Configuration(format!("Path is not valid UTF-8: {:?}", path)))
}

fn spawn_stderr_drain(child: &mut Child) -> Option<JoinHandle<String>> {
    child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut text = String::new();
            let _ = stderr.read_to_string(&mut text).await;
            text
        })
    })
}

/// Wait for a child to exit, returning its stderr on failure
async fn wait_for_exit(
    child: &mut Child,
    stderr: &mut Option<JoinHandle<String>>,
) -> Result<(), String> {
    let status = child.wait().await.map_err(|e| e.to_string())?;
    if status.success() {
        return Ok(());
    }
    let text = match stderr.take() {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    };
    Err(format!("{} ({})", text.trim(), status))
}

fn ffmpeg_command(args: &[String]) -> Command {
    let mut cmd = Command::new(ffmpeg_sidecar::paths::ffmpeg_path());
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Read until `buf` is full or the stream ends; returns bytes read
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Decoder arguments writing raw frames of `input` to stdout
///
/// The output cadence is pinned to the probed rate so frame `n` really
/// belongs at `n / frame_rate`, which is how the reader stamps it.
pub fn decoder_args(input: &str, properties: &InputVideoProperties) -> Vec<String> {
    vec![
        "-v".into(),
        "error".into(),
        "-i".into(),
        input.into(),
        "-map".into(),
        "0:v:0".into(),
        "-fps_mode".into(),
        "cfr".into(),
        "-r".into(),
        properties.frame_rate.to_string(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        properties.depth.raw_pixel_format().into(),
        "pipe:1".into(),
    ]
}

/// Demuxer probing with ffprobe and decoding with ffmpeg
#[derive(Debug, Clone, Default)]
pub struct FfmpegDemuxer;

impl FfmpegDemuxer {
    pub fn new() -> Self {
        Self
    }

    async fn probe(&self, input: &str) -> SuperviewResult<ProbedSource> {
        let output = Command::new(ffmpeg_sidecar::ffprobe::ffprobe_path())
            .args([
                "-v",
                "error",
                "-print_format",
                "json",
                "-show_streams",
                "-show_format",
                input,
            ])
            .output()
            .await
            .map_err(|e| SuperviewError::ReaderFailure(format!("Failed to run ffprobe: {}", e)))?;

        if !output.status.success() {
            return Err(SuperviewError::ReaderFailure(format!(
                "ffprobe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait]
impl MediaDemuxer for FfmpegDemuxer {
    async fn open_for_reading(&self, path: &Path) -> SuperviewResult<OpenedSource> {
        ensure_ffmpeg_async().await?;
        let input = path_arg(path)?;

        let probed = self.probe(&input).await?;
        let properties = probed
            .video
            .ok_or(SuperviewError::MissingTrack(TrackKind::Video))?;
        let audio_config = probed
            .audio
            .ok_or(SuperviewError::MissingTrack(TrackKind::Audio))?;

        let video_args = decoder_args(&input, &properties);
        let audio_args: Vec<String> = [
            "-v",
            "error",
            "-i",
            input.as_str(),
            "-map",
            "0:a:0",
            "-c:a",
            "copy",
            "-f",
            "matroska",
            "pipe:1",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let video = PipeReader::spawn(&video_args, "video decoder")?;
        let audio = PipeReader::spawn(&audio_args, "audio copier")?;

        tracing::info!(
            "Opened {:?}: {}x{} @ {:.3} fps, {} bps, {:?}, audio {} {} Hz",
            path,
            properties.width,
            properties.height,
            properties.frame_rate,
            properties.bitrate,
            properties.depth,
            audio_config.codec,
            audio_config.sample_rate
        );

        Ok(OpenedSource {
            video: Box::new(FfmpegVideoReader {
                frame_size: raw_frame_size(properties.width, properties.height, properties.depth),
                width: properties.width,
                height: properties.height,
                depth: properties.depth,
                frame_rate: properties.frame_rate,
                index: 0,
                pipe: video,
            }),
            audio: Box::new(FfmpegAudioReader { pipe: audio }),
            properties,
            audio_config,
        })
    }
}

/// ffmpeg child streaming to stdout
struct PipeReader {
    label: &'static str,
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
    done: bool,
}

impl PipeReader {
    fn spawn(args: &[String], label: &'static str) -> SuperviewResult<Self> {
        let mut child = ffmpeg_command(args).spawn().map_err(|e| {
            SuperviewError::ReaderFailure(format!("Failed to start {}: {}", label, e))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            SuperviewError::ReaderFailure(format!("Failed to get {} stdout", label))
        })?;
        let stderr = spawn_stderr_drain(&mut child);
        Ok(Self {
            label,
            child,
            stdout,
            stderr,
            done: false,
        })
    }

    async fn end_of_stream(&mut self) -> SuperviewResult<()> {
        self.done = true;
        wait_for_exit(&mut self.child, &mut self.stderr)
            .await
            .map_err(|e| SuperviewError::ReaderFailure(format!("{} failed: {}", self.label, e)))
    }
}

struct FfmpegVideoReader {
    pipe: PipeReader,
    frame_size: usize,
    width: u32,
    height: u32,
    depth: BitDepth,
    frame_rate: f64,
    index: u64,
}

#[async_trait]
impl VideoTrackReader for FfmpegVideoReader {
    async fn next_video_frame(&mut self) -> SuperviewResult<Option<VideoFrame>> {
        if self.pipe.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; self.frame_size];
        let filled = read_full(&mut self.pipe.stdout, &mut buf)
            .await
            .map_err(|e| SuperviewError::ReaderFailure(format!("Failed to read frame: {}", e)))?;

        if filled == 0 {
            self.pipe.end_of_stream().await?;
            tracing::debug!("Video decoder finished after {} frames", self.index);
            return Ok(None);
        }
        if filled < self.frame_size {
            return Err(SuperviewError::ReaderFailure(format!(
                "Truncated frame {}: {} of {} bytes",
                self.index, filled, self.frame_size
            )));
        }

        let planes = PlaneFrame::from_raw(&buf, self.width, self.height, self.depth)?;
        let presentation_time = Duration::from_secs_f64(self.index as f64 / self.frame_rate);
        self.index += 1;

        Ok(Some(VideoFrame {
            planes,
            presentation_time,
        }))
    }
}

struct FfmpegAudioReader {
    pipe: PipeReader,
}

#[async_trait]
impl AudioTrackReader for FfmpegAudioReader {
    async fn next_audio_sample(&mut self) -> SuperviewResult<Option<EncodedSample>> {
        if self.pipe.done {
            return Ok(None);
        }

        let mut buf = vec![0u8; AUDIO_CHUNK_SIZE];
        let n = self
            .pipe
            .stdout
            .read(&mut buf)
            .await
            .map_err(|e| SuperviewError::ReaderFailure(format!("Failed to read audio: {}", e)))?;

        if n == 0 {
            self.pipe.end_of_stream().await?;
            return Ok(None);
        }

        buf.truncate(n);
        Ok(Some(EncodedSample {
            data: buf,
            presentation_time: None,
        }))
    }
}

/// Encoder arguments reading raw frames from stdin into `output`
pub fn encoder_args(config: &VideoCodecConfig, output: &str) -> Vec<String> {
    let encoder = config.codec.as_encoder(config.hardware_accel);
    let mut args: Vec<String> = vec![
        "-v".into(),
        "error".into(),
        "-f".into(),
        "rawvideo".into(),
        "-pix_fmt".into(),
        config.depth.raw_pixel_format().into(),
        "-video_size".into(),
        format!("{}x{}", config.width, config.height),
        "-framerate".into(),
        config.frame_rate.to_string(),
        "-i".into(),
        "pipe:0".into(),
        "-c:v".into(),
        encoder.into(),
    ];

    if !config.hardware_accel {
        args.extend(["-preset".into(), config.preset.clone()]);
    }

    args.extend([
        "-b:v".into(),
        config.bitrate.to_string(),
        "-maxrate".into(),
        (config.bitrate * 3 / 2).to_string(),
        "-bufsize".into(),
        (config.bitrate * 2).to_string(),
    ]);

    let pix_fmt = match (config.depth, config.hardware_accel) {
        (BitDepth::Eight, _) => "yuv420p",
        (BitDepth::Ten, false) => "yuv420p10le",
        (BitDepth::Ten, true) => "p010le",
    };
    args.extend(["-pix_fmt".into(), pix_fmt.into()]);

    if config.codec == VideoCodec::H265 {
        args.extend(["-tag:v".into(), "hvc1".into()]);
    }

    args.extend(["-an".into(), "-y".into(), output.to_string()]);
    args
}

/// Muxer encoding with ffmpeg
#[derive(Debug, Clone)]
pub struct FfmpegMuxer {
    queue_depth: usize,
}

impl FfmpegMuxer {
    pub fn new(queue_depth: usize) -> Self {
        Self {
            queue_depth: queue_depth.max(1),
        }
    }
}

#[async_trait]
impl MediaMuxer for FfmpegMuxer {
    async fn open_for_writing(
        &self,
        path: &Path,
        video: &VideoCodecConfig,
        audio: &AudioPassthroughConfig,
    ) -> SuperviewResult<Box<dyn MediaWriter>> {
        ensure_ffmpeg_async().await?;

        let video_temp = path.with_extension("video.mp4");
        let audio_temp = path.with_extension("audio.mka");

        let args = encoder_args(video, &path_arg(&video_temp)?);
        let mut child = ffmpeg_command(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|e| SuperviewError::WriterFailure(format!("Failed to start FFmpeg: {}", e)))?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            SuperviewError::WriterFailure("Failed to get FFmpeg stdin".to_string())
        })?;
        let stderr = spawn_stderr_drain(&mut child);

        let (frames, mut queue) = mpsc::channel::<Vec<u8>>(self.queue_depth);
        let feeder = tokio::spawn(async move {
            while let Some(bytes) = queue.recv().await {
                stdin.write_all(&bytes).await.map_err(|e| {
                    SuperviewError::WriterFailure(format!("Failed to write frame: {}", e))
                })?;
            }
            stdin.shutdown().await.map_err(|e| {
                SuperviewError::WriterFailure(format!("Failed to close encoder input: {}", e))
            })?;
            Ok(())
        });

        let audio_file = tokio::fs::File::create(&audio_temp).await.map_err(|e| {
            SuperviewError::WriterFailure(format!("Failed to create audio temp file: {}", e))
        })?;

        tracing::info!(
            "Video encoder started: {}x{} @ {} fps, codec: {}, {} bps, audio passthrough: {}",
            video.width,
            video.height,
            video.frame_rate,
            video.codec.as_encoder(video.hardware_accel),
            video.bitrate,
            audio.codec
        );

        Ok(Box::new(FfmpegWriter {
            output: path.to_path_buf(),
            video_temp,
            audio_temp,
            width: video.width,
            height: video.height,
            encoder: Some(child),
            encoder_stderr: stderr,
            frames: Some(frames),
            feeder: Some(feeder),
            audio_file: Some(audio_file),
            last_pts: None,
            frame_count: 0,
            video_finished: false,
            audio_finished: false,
            muxing_started: false,
        }))
    }
}

struct FfmpegWriter {
    output: PathBuf,
    video_temp: PathBuf,
    audio_temp: PathBuf,
    width: u32,
    height: u32,
    encoder: Option<Child>,
    encoder_stderr: Option<JoinHandle<String>>,
    frames: Option<mpsc::Sender<Vec<u8>>>,
    feeder: Option<JoinHandle<SuperviewResult<()>>>,
    audio_file: Option<tokio::fs::File>,
    last_pts: Option<Duration>,
    frame_count: u64,
    video_finished: bool,
    audio_finished: bool,
    /// Set once `output` may have been written by this writer
    muxing_started: bool,
}

impl FfmpegWriter {
    async fn remove_temp_files(&self) {
        for path in [&self.video_temp, &self.audio_temp] {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp file {:?}: {}", path, e);
                }
            }
        }
    }

    async fn mux(&self) -> SuperviewResult<()> {
        let args = [
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            path_arg(&self.video_temp)?,
            "-i".to_string(),
            path_arg(&self.audio_temp)?,
            "-map".to_string(),
            "0:v:0".to_string(),
            "-map".to_string(),
            "1:a:0".to_string(),
            "-c".to_string(),
            "copy".to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-y".to_string(),
            path_arg(&self.output)?,
        ];

        let output = ffmpeg_command(&args)
            .output()
            .await
            .map_err(|e| SuperviewError::WriterFailure(format!("Muxing failed: {}", e)))?;

        if !output.status.success() {
            return Err(SuperviewError::WriterFailure(format!(
                "Muxing failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        tracing::info!("Muxing complete: {:?}", self.output);
        Ok(())
    }
}

#[async_trait]
impl MediaWriter for FfmpegWriter {
    fn is_video_ready(&self) -> bool {
        self.frames.as_ref().is_some_and(|tx| tx.capacity() > 0)
    }

    fn is_audio_ready(&self) -> bool {
        self.audio_file.is_some()
    }

    async fn append_video(&mut self, frame: VideoFrame) -> SuperviewResult<()> {
        if frame.planes.width != self.width || frame.planes.height != self.height {
            return Err(SuperviewError::WriterFailure(format!(
                "Frame is {}x{}, encoder expects {}x{}",
                frame.planes.width, frame.planes.height, self.width, self.height
            )));
        }
        if self.last_pts.is_some_and(|last| frame.presentation_time < last) {
            return Err(SuperviewError::WriterFailure(format!(
                "Frame {} goes back in time",
                self.frame_count
            )));
        }

        let frames = self
            .frames
            .as_ref()
            .ok_or_else(|| SuperviewError::WriterFailure("Video already finished".to_string()))?;
        frames
            .send(frame.planes.to_raw())
            .await
            .map_err(|_| SuperviewError::WriterFailure("Encoder stopped accepting frames".to_string()))?;

        self.last_pts = Some(frame.presentation_time);
        self.frame_count += 1;
        if self.frame_count % 100 == 0 {
            tracing::debug!("Queued {} frames for encoding", self.frame_count);
        }
        Ok(())
    }

    async fn append_audio(&mut self, sample: EncodedSample) -> SuperviewResult<()> {
        let file = self
            .audio_file
            .as_mut()
            .ok_or_else(|| SuperviewError::WriterFailure("Audio already finished".to_string()))?;
        file.write_all(&sample.data).await.map_err(|e| {
            SuperviewError::WriterFailure(format!("Failed to write audio: {}", e))
        })
    }

    async fn finish_video(&mut self) -> SuperviewResult<()> {
        // Closing the queue lets the feeder drain and close stdin
        self.frames.take();

        if let Some(feeder) = self.feeder.take() {
            feeder.await.map_err(|e| {
                SuperviewError::WriterFailure(format!("Encoder feeder panicked: {}", e))
            })??;
        }

        if let Some(mut encoder) = self.encoder.take() {
            wait_for_exit(&mut encoder, &mut self.encoder_stderr)
                .await
                .map_err(|e| SuperviewError::WriterFailure(format!("Encoder failed: {}", e)))?;
        }

        self.video_finished = true;
        tracing::info!("Video encoding finished: {} frames", self.frame_count);
        Ok(())
    }

    async fn finish_audio(&mut self) -> SuperviewResult<()> {
        if let Some(mut file) = self.audio_file.take() {
            file.flush().await.map_err(|e| {
                SuperviewError::WriterFailure(format!("Failed to flush audio: {}", e))
            })?;
        }
        self.audio_finished = true;
        Ok(())
    }

    async fn finish(&mut self) -> SuperviewResult<()> {
        if !self.video_finished || !self.audio_finished {
            return Err(SuperviewError::WriterFailure(
                "Finish called before both streams ended".to_string(),
            ));
        }
        self.muxing_started = true;
        let result = self.mux().await;
        self.remove_temp_files().await;
        result
    }

    async fn abort(&mut self) {
        self.frames.take();
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
        self.audio_file.take();
        if let Some(mut encoder) = self.encoder.take() {
            let _ = encoder.start_kill();
            let _ = encoder.wait().await;
        }
        self.remove_temp_files().await;
        if self.muxing_started {
            if let Err(e) = tokio::fs::remove_file(&self.output).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove partial output {:?}: {}", self.output, e);
                }
            }
        }
        tracing::info!("Writer aborted, partial output discarded");
    }
}

impl Drop for FfmpegWriter {
    fn drop(&mut self) {
        if let Some(encoder) = &mut self.encoder {
            let _ = encoder.start_kill();
        }
        let _ = std::fs::remove_file(&self.video_temp);
        let _ = std::fs::remove_file(&self.audio_temp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PORTRAIT_HDR: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "hevc",
                "codec_type": "video",
                "width": 3840,
                "height": 2160,
                "pix_fmt": "yuv420p10le",
                "r_frame_rate": "60/1",
                "avg_frame_rate": "60000/1001",
                "duration": "12.345",
                "bit_rate": "60000000",
                "side_data_list": [
                    { "side_data_type": "Display Matrix", "rotation": -90 }
                ]
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "channels": 2
            }
        ],
        "format": { "duration": "12.400000", "bit_rate": "61000000" }
    }"#;

    #[test]
    fn test_parse_probe_rotated_ten_bit() {
        let probed = parse_probe(PORTRAIT_HDR).unwrap();
        let video = probed.video.unwrap();
        assert_eq!((video.width, video.height), (2160, 3840));
        assert_eq!(video.depth, BitDepth::Ten);
        assert!((video.frame_rate - 59.94).abs() < 0.01);
        assert_eq!(video.bitrate, 60_000_000);
        assert_eq!(video.duration, Duration::from_secs_f64(12.345));

        let audio = probed.audio.unwrap();
        assert_eq!(audio.codec, "aac");
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_parse_probe_without_audio_or_bitrate() {
        let json = r#"{
            "streams": [
                {
                    "codec_type": "video",
                    "width": 1440,
                    "height": 1080,
                    "pix_fmt": "yuvj420p",
                    "avg_frame_rate": "0/0",
                    "r_frame_rate": "30/1",
                    "tags": { "rotate": "180" }
                }
            ],
            "format": { "duration": "10.0" }
        }"#;
        let probed = parse_probe(json).unwrap();
        let video = probed.video.unwrap();
        assert_eq!((video.width, video.height), (1440, 1080));
        assert_eq!(video.depth, BitDepth::Eight);
        assert_eq!(video.frame_rate, 30.0);
        assert_eq!(video.bitrate, 0);
        assert_eq!(video.estimated_total_frames(), 300);
        assert!(probed.audio.is_none());
    }

    #[test]
    fn test_parse_probe_without_video() {
        let json = r#"{ "streams": [ { "codec_type": "audio", "codec_name": "opus" } ] }"#;
        let probed = parse_probe(json).unwrap();
        assert!(probed.video.is_none());
        assert_eq!(probed.audio.unwrap().codec, "opus");
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_encoder_args_ten_bit_hevc() {
        let config = VideoCodecConfig {
            codec: VideoCodec::H265,
            width: 3840,
            height: 2160,
            bitrate: 8_000_000,
            frame_rate: 59.94,
            depth: BitDepth::Ten,
            hardware_accel: false,
            preset: "slow".to_string(),
        };
        let args = encoder_args(&config, "out.video.mp4");
        let joined = args.join(" ");
        assert!(joined.contains("-pix_fmt p010le -video_size 3840x2160 -framerate 59.94"));
        assert!(joined.contains("-c:v libx265 -preset slow -b:v 8000000"));
        assert!(joined.contains("-pix_fmt yuv420p10le -tag:v hvc1"));
        assert_eq!(args.last().map(String::as_str), Some("out.video.mp4"));
    }

    #[test]
    fn test_encoder_args_hardware_skips_preset() {
        let config = VideoCodecConfig {
            codec: VideoCodec::H264,
            width: 1920,
            height: 1080,
            bitrate: 5_000_000,
            frame_rate: 30.0,
            depth: BitDepth::Eight,
            hardware_accel: true,
            preset: "medium".to_string(),
        };
        let args = encoder_args(&config, "out.video.mp4");
        assert!(!args.contains(&"-preset".to_string()));
        assert!(args.contains(&"yuv420p".to_string()));
        assert!(args.contains(&"nv12".to_string()));
    }

    #[test]
    fn test_pixel_format_depth() {
        assert_eq!(depth_for_pixel_format("yuv420p10le"), BitDepth::Ten);
        assert_eq!(depth_for_pixel_format("yuv422p10be"), BitDepth::Ten);
        assert_eq!(depth_for_pixel_format("p010le"), BitDepth::Ten);
        assert_eq!(depth_for_pixel_format("yuv410p"), BitDepth::Eight);
        assert_eq!(depth_for_pixel_format("yuvj420p"), BitDepth::Eight);
    }

    #[test]
    fn test_decoder_args_pin_probed_rate() {
        let probed = parse_probe(PORTRAIT_HDR).unwrap();
        let video = probed.video.unwrap();
        let args = decoder_args("in.mov", &video);
        let joined = args.join(" ");
        assert!(joined.contains(&format!("-fps_mode cfr -r {}", video.frame_rate)));
        assert!(!joined.contains("-r 60 "));
        assert!(joined.ends_with("-f rawvideo -pix_fmt p010le pipe:1"));
    }

    fn idle_writer(dir: &Path, output: &Path) -> FfmpegWriter {
        FfmpegWriter {
            output: output.to_path_buf(),
            video_temp: dir.join("out.video.mp4"),
            audio_temp: dir.join("out.audio.mka"),
            width: 16,
            height: 16,
            encoder: None,
            encoder_stderr: None,
            frames: None,
            feeder: None,
            audio_file: None,
            last_pts: None,
            frame_count: 0,
            video_finished: false,
            audio_finished: false,
            muxing_started: false,
        }
    }

    #[tokio::test]
    async fn test_abort_keeps_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("precious.mp4");
        std::fs::write(&output, b"existing").unwrap();
        std::fs::write(dir.path().join("out.video.mp4"), b"partial").unwrap();

        let mut writer = idle_writer(dir.path(), &output);
        writer.abort().await;

        assert_eq!(std::fs::read(&output).unwrap(), b"existing");
        assert!(!dir.path().join("out.video.mp4").exists());
    }

    #[tokio::test]
    async fn test_abort_after_mux_removes_output() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        std::fs::write(&output, b"half muxed").unwrap();

        let mut writer = idle_writer(dir.path(), &output);
        writer.muxing_started = true;
        writer.abort().await;

        assert!(!output.exists());
    }
}
