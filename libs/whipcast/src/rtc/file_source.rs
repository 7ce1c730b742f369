// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::{CaptureFormat, Result, WhipcastError};
use crate::negotiation::{CaptureSource, MediaSample, SampleSink};
use bytes::Bytes;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use webrtc::media::io::h264_reader::{H264Reader, NAL, NalUnitType};

const READER_CAPACITY: usize = 1_048_576;

// ============================================================================
// ACCESS UNITS
// ============================================================================

/// NAL units of one coded picture, with the parameter sets and SEI ahead of it.
#[derive(Debug, Default)]
struct AccessUnit {
    nals: Vec<Bytes>,
    has_picture: bool,
}

impl AccessUnit {
    /// Only the last sample advances the RTP clock, so every NAL of the unit
    /// shares one timestamp.
    fn into_samples(self, frame_duration: Duration) -> Vec<MediaSample> {
        let last = self.nals.len().saturating_sub(1);
        let advance = if self.has_picture {
            frame_duration
        } else {
            Duration::ZERO
        };
        self.nals
            .into_iter()
            .enumerate()
            .map(|(index, data)| MediaSample {
                data,
                duration: if index == last { advance } else { Duration::ZERO },
            })
            .collect()
    }
}

fn is_slice(unit_type: NalUnitType) -> bool {
    matches!(
        unit_type,
        NalUnitType::CodedSliceNonIdr | NalUnitType::CodedSliceIdr
    )
}

/// `first_mb_in_slice` is ue(v); a leading 1 bit encodes 0.
fn is_first_slice(nal: &NAL) -> bool {
    nal.data.get(1).is_some_and(|byte| byte & 0x80 != 0)
}

fn opens_access_unit(unit_type: NalUnitType) -> bool {
    matches!(
        unit_type,
        NalUnitType::AUD
            | NalUnitType::SPS
            | NalUnitType::PPS
            | NalUnitType::SEI
            | NalUnitType::SpsExt
    )
}

/// Groups a NAL stream into access units.
#[derive(Debug, Default)]
struct AccessUnitAssembler {
    current: AccessUnit,
}

impl AccessUnitAssembler {
    /// Returns the previous unit once `nal` starts a new one.
    fn push(&mut self, nal: NAL) -> Option<AccessUnit> {
        let starts_new = self.current.has_picture
            && if is_slice(nal.unit_type) {
                is_first_slice(&nal)
            } else {
                opens_access_unit(nal.unit_type)
            };
        let completed = starts_new.then(|| std::mem::take(&mut self.current));

        self.current.has_picture |= is_slice(nal.unit_type);
        self.current.nals.push(nal.data.freeze());
        completed
    }

    fn finish(&mut self) -> Option<AccessUnit> {
        let unit = std::mem::take(&mut self.current);
        (!unit.nals.is_empty()).then_some(unit)
    }
}

// ============================================================================
// FILE SOURCE
// ============================================================================

/// Loops an Annex-B H.264 elementary stream, paced at the capture frame rate.
///
/// The stream is sent as encoded; the requested resolution is informational.
pub struct H264FileSource {
    path: PathBuf,
    fps: Arc<AtomicU32>,
    task: Option<JoinHandle<()>>,
}

impl H264FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(WhipcastError::Configuration(format!(
                "Not found file : {}",
                path.display()
            )));
        }
        Ok(Self {
            path,
            fps: Arc::new(AtomicU32::new(30)),
            task: None,
        })
    }

    fn frame_duration(fps: &AtomicU32) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(fps.load(Ordering::Relaxed).max(1)))
    }

    /// Sends one unit and waits out its frame time. Returns whether it held a picture.
    async fn send(unit: AccessUnit, fps: &AtomicU32, sink: &dyn SampleSink) -> bool {
        let has_picture = unit.has_picture;
        let frame_duration = Self::frame_duration(fps);
        for sample in unit.into_samples(frame_duration) {
            sink.push_sample(sample);
        }
        if has_picture {
            tokio::time::sleep(frame_duration).await;
        }
        has_picture
    }

    async fn pump(path: PathBuf, fps: Arc<AtomicU32>, sink: Arc<dyn SampleSink>) {
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) => {
                tracing::error!("[H264FileSource] Failed to read {}: {}", path.display(), e);
                return;
            }
        };

        let mut loops: u64 = 0;
        loop {
            let mut reader = H264Reader::new(Cursor::new(contents.as_slice()), READER_CAPACITY);
            let mut assembler = AccessUnitAssembler::default();
            let mut frames: u64 = 0;

            while let Ok(nal) = reader.next_nal() {
                if let Some(unit) = assembler.push(nal) {
                    frames += u64::from(Self::send(unit, &fps, sink.as_ref()).await);
                }
            }
            if let Some(unit) = assembler.finish() {
                frames += u64::from(Self::send(unit, &fps, sink.as_ref()).await);
            }

            if frames == 0 {
                tracing::error!(
                    "[H264FileSource] No pictures in {}, stopping",
                    path.display()
                );
                return;
            }
            loops += 1;
            tracing::debug!(
                "[H264FileSource] Reached end of {} ({} frames), loop {}",
                path.display(),
                frames,
                loops
            );
        }
    }
}

impl CaptureSource for H264FileSource {
    fn start_capture(&mut self, format: CaptureFormat, sink: Arc<dyn SampleSink>) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            WhipcastError::Configuration(format!("File capture needs a Tokio runtime: {}", e))
        })?;

        self.fps.store(format.fps, Ordering::Relaxed);
        tracing::info!(
            "[H264FileSource] Streaming {} at {}fps",
            self.path.display(),
            format.fps
        );
        self.task = Some(runtime.spawn(Self::pump(self.path.clone(), self.fps.clone(), sink)));
        Ok(())
    }

    fn stop_capture(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn change_format(&mut self, format: CaptureFormat) -> Result<()> {
        self.fps.store(format.fps, Ordering::Relaxed);
        Ok(())
    }

    fn dispose(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
