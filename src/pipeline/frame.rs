//! Frame acquisition boundary.
//!
//! The pipeline never talks to a camera, file or peer stream directly; it
//! consumes any [`FrameSource`] implementation. The shipped [`LoopSource`]
//! replays an in-memory frame sequence and backs tests and demos; live
//! camera and peer-streamed sources are host-provided.

use log::debug;
use serde::Serialize;

use crate::{ImageBuffer, Result};

/// Connection lifecycle of a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    New,
    Connected,
    Stopped,
    Failed,
}

/// Source health counters for the host's debug overlay.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    pub fps: f32,
    pub connection_state: ConnectionState,
    pub last_error: Option<String>,
}

/// A provider of decoded RGBA video frames.
///
/// `initialize` and `start` are the only operations allowed to fail in a
/// way the host must surface to the user (camera permission denied, file
/// missing); everything after that degrades to "no frame this cycle".
pub trait FrameSource {
    /// Acquires the underlying resource. Must be called before `start`.
    fn initialize(&mut self) -> Result<()>;

    /// Begins producing frames.
    fn start(&mut self) -> Result<()>;

    /// Stops producing frames. Idempotent.
    fn stop(&mut self);

    /// Current frame dimensions; may change between calls (device rotation,
    /// stream renegotiation). Zero means no frame is available yet.
    fn dimensions(&self) -> (u32, u32);

    fn stats(&self) -> SourceStats;

    /// Copies the current frame into `dst` (RGBA, tightly packed).
    ///
    /// Returns `false` when the source is not playable yet, mirroring a
    /// video element with fewer than two buffered frames.
    fn capture_into(&mut self, dst: &mut [u8]) -> bool;
}

/// Reusable RGBA frame storage. Reallocates only when the source
/// dimensions change, never per frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    fn fit(&mut self, width: u32, height: u32) {
        if self.width != width || self.height != height {
            debug!("frame buffer resized to {width}x{height}");
            self.data.resize(width as usize * height as usize * 4, 0);
            self.width = width;
            self.height = height;
        }
    }

    fn as_image(&self) -> ImageBuffer<'_> {
        ImageBuffer {
            data: &self.data,
            width: self.width,
            height: self.height,
        }
    }
}

/// Pulls still frames out of a [`FrameSource`] into an owned, reused
/// buffer.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buffer: FrameBuffer,
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures the source's current frame, or `None` when the source has
    /// no playable frame or reports zero dimensions.
    pub fn extract<S: FrameSource + ?Sized>(&mut self, source: &mut S) -> Option<ImageBuffer<'_>> {
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        self.buffer.fit(width, height);
        source
            .capture_into(&mut self.buffer.data)
            .then(|| self.buffer.as_image())
    }
}

/// Deterministic looping playback over pre-recorded RGBA frames.
///
/// Like a `<video>` element, it is not playable until at least two frames
/// are buffered.
pub struct LoopSource {
    frames: Vec<Vec<u8>>,
    width: u32,
    height: u32,
    cursor: usize,
    state: ConnectionState,
}

impl LoopSource {
    /// `frames` must each be `width * height * 4` bytes.
    pub fn new(width: u32, height: u32, frames: Vec<Vec<u8>>) -> Self {
        debug_assert!(frames
            .iter()
            .all(|f| f.len() == width as usize * height as usize * 4));
        Self {
            frames,
            width,
            height,
            cursor: 0,
            state: ConnectionState::New,
        }
    }

    /// A source that repeats one frame forever (buffered twice so it is
    /// immediately playable).
    pub fn repeating(width: u32, height: u32, frame: Vec<u8>) -> Self {
        Self::new(width, height, vec![frame.clone(), frame])
    }
}

impl FrameSource for LoopSource {
    fn initialize(&mut self) -> Result<()> {
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn stop(&mut self) {
        self.state = ConnectionState::Stopped;
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            fps: 0.0,
            connection_state: self.state,
            last_error: None,
        }
    }

    fn capture_into(&mut self, dst: &mut [u8]) -> bool {
        if self.state != ConnectionState::Connected || self.frames.len() < 2 {
            return false;
        }
        let frame = &self.frames[self.cursor];
        self.cursor = (self.cursor + 1) % self.frames.len();
        dst.copy_from_slice(frame);
        true
    }
}
