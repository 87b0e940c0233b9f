use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::traits::Format;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Device already initialized: deinitialize it before opening again")]
    AlreadyInitialized,

    #[error("Device not initialized")]
    NotInitialized,

    #[error("Cannot open '{path}': {source}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Unsupported capability: {0}")]
    UnsupportedCapability(String),

    #[error("Driver returned format {actual}, requested {requested}")]
    FormatMismatch { requested: Format, actual: Format },

    #[error("Buffer allocation failed: {reason}")]
    Allocation {
        reason: String,
        #[source]
        source: Option<io::Error>,
    },

    #[error("Failed to start streaming: {0}")]
    StreamStart(#[source] io::Error),

    #[error("Trying to get another frame without releasing already obtained frame")]
    FrameAlreadyHeld,

    #[error("Trying to release a frame that was never obtained")]
    NoFrameHeld,

    #[error("Could not get frame after {retries} retries ({timeout:?} each)")]
    CaptureTimeout { retries: u32, timeout: Duration },

    #[error("Teardown failed: {}", TeardownList(.0))]
    Teardown(Vec<TeardownFailure>),

    /// 重新入队失败，帧仍然处于 held 状态
    #[error("Failed to queue buffer {index} for re-capture: {source}")]
    Requeue {
        index: u32,
        #[source]
        source: io::Error,
    },

    #[error("Image pipeline error: {0}")]
    Pipeline(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Capture worker for camera #{0} panicked")]
    WorkerPanicked(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CaptureError {
    pub fn allocation(reason: impl Into<String>, source: Option<io::Error>) -> Self {
        Self::Allocation {
            reason: reason.into(),
            source,
        }
    }

    /// 调用方用错了 acquire/release 协议
    pub fn is_protocol_misuse(&self) -> bool {
        matches!(self, Self::FrameAlreadyHeld | Self::NoFrameHeld)
    }

    /// initialize 阶段的失败 (已回滚的部分分配)
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Open { .. }
                | Self::UnsupportedCapability(_)
                | Self::FormatMismatch { .. }
                | Self::Allocation { .. }
                | Self::StreamStart(_)
        )
    }
}

/// 拆除流程中的单个步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
    StreamOff,
    ReleaseBuffers,
    FreeBuffer(u32),
    Close,
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamOff => write!(f, "stream off"),
            Self::ReleaseBuffers => write!(f, "release device buffers"),
            Self::FreeBuffer(index) => write!(f, "free buffer {}", index),
            Self::Close => write!(f, "close device"),
        }
    }
}

#[derive(Debug)]
pub struct TeardownFailure {
    pub step: TeardownStep,
    pub source: io::Error,
}

impl TeardownFailure {
    pub fn new(step: TeardownStep, source: io::Error) -> Self {
        Self { step, source }
    }
}

struct TeardownList<'a>(&'a [TeardownFailure]);

impl fmt::Display for TeardownList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", failure.step, failure.source)?;
        }
        Ok(())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
