//! End-to-end conversions against in-memory media and the CPU runtime
//!
//! These tests cover the whole path from opening a source to finalizing
//! the output: planning, the transform stages, both pump loops,
//! back-pressure, progress and the teardown path on failure.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use superview_core::media::memory::{FramePattern, RecordingMuxer, SyntheticSource};
use superview_core::media::VideoCodec;
use superview_core::{
    BitDepth, ConvertSettings, Converter, CpuRuntime, Orientation, PipelineStage, ProgressCallback,
    QualityTier, SuperviewError, TrackKind, TransformMode,
};

fn settings() -> ConvertSettings {
    ConvertSettings {
        writer_poll_interval_ms: 1,
        ..Default::default()
    }
}

fn converter(source: SyntheticSource, muxer: &RecordingMuxer) -> Converter<CpuRuntime> {
    Converter::new(
        CpuRuntime::new(),
        Box::new(source),
        Box::new(muxer.clone()),
        settings(),
    )
    .unwrap()
}

fn progress_sink() -> (ProgressCallback, Arc<Mutex<Vec<f32>>>) {
    let values = Arc::new(Mutex::new(Vec::new()));
    let sink = values.clone();
    (Box::new(move |p| sink.lock().unwrap().push(p)), values)
}

/// 4:3 source widened to 720p
#[tokio::test]
async fn test_wide_conversion_end_to_end() {
    let source = SyntheticSource::new(960, 720, 30.0, 12);
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source.clone(), &muxer);

    let report = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        (report.plan.output_width, report.plan.output_height),
        (1280, 720)
    );
    assert_eq!(report.plan.modes(), vec![TransformMode::RemapStretch]);
    assert_eq!(report.video_frames, 12);
    assert_eq!(report.audio_samples, 12);

    let recording = muxer.recording();
    let recording = recording.lock().unwrap();
    assert!(recording.finished);
    assert!(!recording.aborted);
    assert_eq!(recording.frames.len(), 12);

    for (index, frame) in recording.frames.iter().enumerate() {
        assert_eq!((frame.planes.width, frame.planes.height), (1280, 720));
        assert_eq!(
            frame.presentation_time,
            source.frame(index as u64).presentation_time
        );
    }

    // Center column maps nearly 1:1, edges come from the source edges
    let frame = &recording.frames[0].planes;
    let input = source.frame(0).planes;
    assert_eq!(frame.luma_at(0, 0), input.luma_at(0, 0));
    assert_eq!(frame.luma_at(1279, 0), input.luma_at(959, 0));

    let config = recording.video_config.as_ref().unwrap();
    assert_eq!(config.codec, VideoCodec::H264);
    assert_eq!((config.width, config.height), (1280, 720));
    assert_eq!(config.bitrate, report.plan.target_bitrate);
}

#[tokio::test]
async fn test_audio_passes_through_unchanged() {
    let source = SyntheticSource::new(96, 72, 25.0, 5);
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap();

    let recording = muxer.recording();
    let recording = recording.lock().unwrap();
    let expected: Vec<_> = (0..5).map(SyntheticSource::audio_packet).collect();
    assert_eq!(recording.audio, expected);
    assert_eq!(recording.audio_config.as_ref().unwrap().codec, "aac");
}

#[tokio::test]
async fn test_progress_is_monotonic_and_ends_at_one() {
    // The reported duration overestimates the frame count, so progress
    // only reaches 1.0 on completion
    let source = SyntheticSource::new(96, 72, 30.0, 9).with_reported_duration(Duration::from_secs(1));
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);
    let (callback, values) = progress_sink();

    converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            Some(callback),
        )
        .await
        .unwrap();

    let values = values.lock().unwrap();
    assert_eq!(values.len(), 10);
    assert!(values.windows(2).all(|w| w[0] <= w[1]));
    assert!(values[8] < 1.0);
    assert_eq!(*values.last().unwrap(), 1.0);
}

#[tokio::test]
async fn test_progress_clamps_when_estimate_is_short() {
    let source =
        SyntheticSource::new(96, 72, 30.0, 6).with_reported_duration(Duration::from_millis(100));
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);
    let (callback, values) = progress_sink();

    converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            Some(callback),
        )
        .await
        .unwrap();

    let values = values.lock().unwrap();
    assert!(values.iter().all(|&p| (0.0..=1.0).contains(&p)));
    assert_eq!(values[2], 1.0);
}

#[tokio::test]
async fn test_back_pressure_never_drops_frames() {
    let source = SyntheticSource::new(96, 72, 30.0, 20);
    let muxer = RecordingMuxer::new().with_busy_every(3);
    let mut converter = converter(source, &muxer);

    let report = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap();

    let recording = muxer.recording();
    let recording = recording.lock().unwrap();
    assert!(recording.not_ready_polls > 0);
    assert_eq!(recording.frames.len(), 20);
    assert_eq!(recording.audio.len(), 20);
    assert_eq!(report.video_frames, 20);
    assert!(recording
        .frames
        .windows(2)
        .all(|w| w[0].presentation_time < w[1].presentation_time));
}

/// Square 10-bit source to portrait: downscale first, then widen vertically
#[tokio::test]
async fn test_ten_bit_flat_source_through_two_stages() {
    let source = SyntheticSource::new(960, 960, 30.0, 3)
        .with_depth(BitDepth::Ten)
        .with_pattern(FramePattern::Flat {
            y: 640,
            u: 300,
            v: 800,
        });
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    let report = converter
        .convert(
            Path::new("in.mov"),
            Path::new("out.mov"),
            Orientation::Tall,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        report.plan.modes(),
        vec![TransformMode::Downscale, TransformMode::RemapStretch]
    );
    assert_eq!(report.plan.stages[0].width, 720);
    assert_eq!(report.plan.stages[0].height, 720);

    let recording = muxer.recording();
    let recording = recording.lock().unwrap();
    assert_eq!(recording.video_config.as_ref().unwrap().codec, VideoCodec::H265);
    for frame in &recording.frames {
        assert_eq!((frame.planes.width, frame.planes.height), (720, 1280));
        assert_eq!(frame.planes.depth, BitDepth::Ten);
        assert!(frame.planes.luma.iter().all(|&v| v == 640));
        assert!(frame.planes.chroma.chunks_exact(2).all(|c| c == [300, 800]));
    }
}

#[tokio::test]
async fn test_missing_audio_track_fails_before_writing() {
    let source = SyntheticSource::new(96, 72, 30.0, 3).without_audio();
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    let err = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd1080,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        SuperviewError::MissingTrack(TrackKind::Audio)
    ));
    assert_eq!(err.context().unwrap().stage, PipelineStage::Setup);
    assert!(muxer.recording().lock().unwrap().video_config.is_none());
}

#[tokio::test]
async fn test_writer_failure_aborts_output() {
    let source = SyntheticSource::new(96, 72, 30.0, 8);
    let muxer = RecordingMuxer::new().failing_video_at(3);
    let mut converter = converter(source, &muxer);
    let (callback, values) = progress_sink();

    let err = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            Some(callback),
        )
        .await
        .unwrap_err();

    assert!(matches!(err.root(), SuperviewError::WriterFailure(_)));
    let context = err.context().unwrap();
    assert_eq!(context.stage, PipelineStage::Encode);
    assert_eq!(context.frame, Some(3));

    let recording = muxer.recording();
    let recording = recording.lock().unwrap();
    assert!(recording.aborted);
    assert!(!recording.finished);
    assert_eq!(recording.frames.len(), 3);
    assert!(values.lock().unwrap().iter().all(|&p| p < 1.0));
}

#[tokio::test]
async fn test_reader_failure_is_reported_with_frame() {
    let source = SyntheticSource::new(96, 72, 30.0, 8).failing_at(5);
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    let err = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err.root(), SuperviewError::ReaderFailure(_)));
    assert_eq!(err.context().unwrap().stage, PipelineStage::Decode);
    assert_eq!(err.context().unwrap().frame, Some(5));
    assert!(muxer.recording().lock().unwrap().aborted);
}

#[tokio::test]
async fn test_cancelled_conversion_discards_output() {
    let source = SyntheticSource::new(96, 72, 30.0, 8);
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    let handle = converter.cancel_handle();
    handle.cancel();

    let err = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap_err();

    assert!(err.is_cancellation());
    assert!(muxer.recording().lock().unwrap().aborted);

    // The flag is cleared once the cancelled run has been torn down
    assert!(!handle.is_cancelled());
    converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap();
    assert!(muxer.recording().lock().unwrap().finished);
}

#[tokio::test]
async fn test_plan_without_converting() {
    let source = SyntheticSource::new(1440, 1080, 30.0, 300);
    let muxer = RecordingMuxer::new();
    let converter = converter(source, &muxer);

    let plan = converter
        .plan(Path::new("in.mp4"), Orientation::Wide, QualityTier::Hd1080)
        .await
        .unwrap();

    assert_eq!((plan.output_width, plan.output_height), (1920, 1080));
    assert_eq!(plan.modes(), vec![TransformMode::RemapStretch]);
    assert_eq!(plan.estimated_total_frames, 300);
    assert!(muxer.recording().lock().unwrap().video_config.is_none());
}

#[tokio::test]
async fn test_audio_failure_stops_video_and_is_reported() {
    let source = SyntheticSource::new(96, 72, 30.0, 400);
    let muxer = RecordingMuxer::new().failing_audio_at(2);
    let mut converter = converter(source, &muxer);

    let err = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err.root(), SuperviewError::WriterFailure(_)));
    assert_eq!(err.context().unwrap().stage, PipelineStage::Audio);

    let recording = muxer.recording();
    let recording = recording.lock().unwrap();
    assert!(recording.frames.len() < 400);
    assert_eq!(recording.audio.len(), 2);
    assert!(recording.aborted);
    assert!(!recording.finished);
}

#[tokio::test]
async fn test_output_may_not_overwrite_input() {
    let source = SyntheticSource::new(96, 72, 30.0, 3);
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    let err = converter
        .convert(
            Path::new("clip.mp4"),
            Path::new("clip.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err.root(), SuperviewError::Configuration(_)));
    assert_eq!(err.context().unwrap().stage, PipelineStage::Setup);

    // Different spellings of an existing file are caught too
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("clip.mp4");
    std::fs::write(&input, b"source").unwrap();
    let output = dir.path().join(".").join("clip.mp4");

    let err = converter
        .convert(&input, &output, Orientation::Wide, QualityTier::Hd720, None)
        .await
        .unwrap_err();
    assert!(matches!(err.root(), SuperviewError::Configuration(_)));
    assert_eq!(std::fs::read(&input).unwrap(), b"source");
    assert!(muxer.recording().lock().unwrap().video_config.is_none());
}

#[tokio::test]
async fn test_cancel_is_cleared_when_setup_fails() {
    let source = SyntheticSource::new(96, 72, 30.0, 3).without_audio();
    let muxer = RecordingMuxer::new();
    let mut converter = converter(source, &muxer);

    let handle = converter.cancel_handle();
    handle.cancel();

    let err = converter
        .convert(
            Path::new("in.mp4"),
            Path::new("out.mp4"),
            Orientation::Wide,
            QualityTier::Hd720,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        SuperviewError::MissingTrack(TrackKind::Audio)
    ));
    assert!(!handle.is_cancelled());
}
