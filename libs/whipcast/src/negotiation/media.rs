// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use crate::core::{CaptureFormat, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// One encoded media unit (an access unit for video, a frame for audio).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    pub data: Bytes,
    pub duration: Duration,
}

/// Consumer of captured samples: the engine's outgoing track or a local preview.
pub trait SampleSink: Send + Sync {
    fn push_sample(&self, sample: MediaSample);
}

/// Device or file producing samples for one track.
pub trait CaptureSource: Send {
    fn start_capture(&mut self, format: CaptureFormat, sink: Arc<dyn SampleSink>) -> Result<()>;

    fn stop_capture(&mut self) -> Result<()>;

    fn change_format(&mut self, format: CaptureFormat) -> Result<()>;

    fn dispose(&mut self);
}

/// External collaborators handed to the controller when the connection is created.
#[derive(Default)]
pub struct MediaSources {
    /// Local preview. Receives every video sample alongside the engine.
    pub local_sink: Option<Arc<dyn SampleSink>>,
    pub video: Option<Box<dyn CaptureSource>>,
    pub audio: Option<Box<dyn CaptureSource>>,
}

impl MediaSources {
    pub fn video(source: impl CaptureSource + 'static) -> Self {
        Self {
            video: Some(Box::new(source)),
            ..Default::default()
        }
    }

    pub fn with_local_sink(mut self, sink: Arc<dyn SampleSink>) -> Self {
        self.local_sink = Some(sink);
        self
    }

    pub fn with_audio(mut self, source: impl CaptureSource + 'static) -> Self {
        self.audio = Some(Box::new(source));
        self
    }
}

/// Fans video samples out to the engine and, until detached, the local preview.
pub(crate) struct TeeSink {
    engine: Arc<dyn SampleSink>,
    preview: Mutex<Option<Arc<dyn SampleSink>>>,
}

impl TeeSink {
    pub(crate) fn new(engine: Arc<dyn SampleSink>, preview: Option<Arc<dyn SampleSink>>) -> Self {
        Self {
            engine,
            preview: Mutex::new(preview),
        }
    }

    /// Gives up the preview; later samples only reach the engine.
    pub(crate) fn detach_preview(&self) {
        self.preview.lock().take();
    }
}

impl SampleSink for TeeSink {
    fn push_sample(&self, sample: MediaSample) {
        let preview = self.preview.lock().clone();
        if let Some(preview) = preview {
            preview.push_sample(sample.clone());
        }
        self.engine.push_sample(sample);
    }
}
