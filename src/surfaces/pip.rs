//! Picture-in-picture surface
//!
//! The countdown is painted onto an offscreen canvas at a fixed frame rate
//! and streamed into a floating video window. An inaudible tone keeps the
//! media session alive so the host does not throttle a "silent" video; it
//! must stay unmuted, only quiet.
//!
//! Hosts embed [`PipSurface`] with their own [`MediaBackend`]; the terminal
//! client has no video window to float.

use std::time::Duration;

use tracing::{debug, info};

use crate::{client::TimerView, error::SurfaceError, utils::format_countdown};

pub const CANVAS_WIDTH: u32 = 320;
pub const CANVAS_HEIGHT: u32 = 180;
pub const FRAMES_PER_SECOND: u32 = 10;
pub const TONE_FREQUENCY_HZ: f32 = 1.0;
pub const TONE_GAIN: f32 = 0.001;

const BACKGROUND: &str = "#1e1e2e";
const FOREGROUND: &str = "#ffffff";
const MUTED: &str = "#a6adc8";
const DONE: &str = "#a6e3a1";

/// Keep-alive audio track parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToneTrack {
    pub frequency_hz: f32,
    pub gain: f32,
    pub muted: bool,
}

impl ToneTrack {
    pub fn keep_alive() -> Self {
        Self {
            frequency_hz: TONE_FREQUENCY_HZ,
            gain: TONE_GAIN,
            muted: false,
        }
    }
}

/// One drawing instruction for a frame
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    Fill { color: &'static str },
    Text {
        text: String,
        x: u32,
        y: u32,
        size: u32,
        color: &'static str,
    },
}

/// Frame layout for `view`
pub fn layout(view: &TimerView) -> Vec<DrawOp> {
    let mut ops = vec![DrawOp::Fill { color: BACKGROUND }];
    let center = CANVAS_WIDTH / 2;

    if view.completed {
        ops.push(DrawOp::Text {
            text: "Break time".to_string(),
            x: center,
            y: 90,
            size: 36,
            color: DONE,
        });
    } else {
        ops.push(DrawOp::Text {
            text: format_countdown(view.time_left_ms),
            x: center,
            y: 80,
            size: 56,
            color: if view.is_running { FOREGROUND } else { MUTED },
        });
    }
    if !view.subtask_title.is_empty() {
        ops.push(DrawOp::Text {
            text: view.subtask_title.clone(),
            x: center,
            y: 130,
            size: 16,
            color: MUTED,
        });
    }
    if !view.task_title.is_empty() {
        ops.push(DrawOp::Text {
            text: view.task_title.clone(),
            x: center,
            y: 155,
            size: 12,
            color: MUTED,
        });
    }
    ops
}

/// Offscreen canvas that feeds the video stream
pub trait Canvas: Send {
    fn draw(&mut self, ops: &[DrawOp]) -> Result<(), SurfaceError>;
}

/// Host media capabilities needed for picture-in-picture
pub trait MediaBackend: Send {
    type Canvas: Canvas;

    /// Whether the host can float a video window at all
    fn supports_pip(&self) -> bool;

    fn create_canvas(&mut self, width: u32, height: u32, fps: u32) -> Result<Self::Canvas, SurfaceError>;

    fn start_tone(&mut self, tone: ToneTrack) -> Result<(), SurfaceError>;

    fn enter_pip(&mut self) -> Result<(), SurfaceError>;

    /// Stop the stream, the tone and the floating window
    fn release(&mut self);
}

/// Floating video surface; renders at a fixed frame rate
pub struct PipSurface<B: MediaBackend> {
    backend: B,
    canvas: Option<B::Canvas>,
}

impl<B: MediaBackend> PipSurface<B> {
    /// Set up canvas, tone and window.
    ///
    /// Fails with `Unsupported` on hosts without the capability. Partial setup
    /// is released before returning an error.
    pub fn open(mut backend: B) -> Result<Self, SurfaceError> {
        if !backend.supports_pip() {
            return Err(SurfaceError::Unsupported("picture-in-picture"));
        }

        let setup = backend
            .create_canvas(CANVAS_WIDTH, CANVAS_HEIGHT, FRAMES_PER_SECOND)
            .and_then(|canvas| {
                backend.start_tone(ToneTrack::keep_alive())?;
                backend.enter_pip()?;
                Ok(canvas)
            });

        match setup {
            Ok(canvas) => {
                info!("Picture-in-picture window opened");
                Ok(Self {
                    backend,
                    canvas: Some(canvas),
                })
            }
            Err(e) => {
                backend.release();
                Err(e)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.canvas.is_some()
    }
}

impl<B> super::Surface for PipSurface<B>
where
    B: MediaBackend + 'static,
    B::Canvas: 'static,
{
    fn name(&self) -> &'static str {
        "pip"
    }

    fn render(&mut self, view: &TimerView) -> Result<(), SurfaceError> {
        match self.canvas.as_mut() {
            Some(canvas) => canvas.draw(&layout(view)),
            None => Err(SurfaceError::Media("picture-in-picture already closed".into())),
        }
    }

    fn frame_interval(&self) -> Option<Duration> {
        Some(Duration::from_millis(1000 / u64::from(FRAMES_PER_SECOND)))
    }

    fn close(&mut self) {
        if self.canvas.take().is_some() {
            self.backend.release();
            debug!("Picture-in-picture resources released");
        }
    }
}
