//! The seam between the desktop session and the windowing system.
//!
//! [`DesktopSession`](crate::desktop::DesktopSession) only ever talks to the
//! display, the renderer, the sound player and the process launcher through
//! [`Host`]. The X11 implementation lives in [`crate::x11`]; tests drive the
//! session with a scripted fake.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::config::IconRecord;
use crate::signal::Signal;

pub use crate::sound::SoundCue;

pub type WindowId = u32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// What an icon currently shows. Starts from the record; icon hooks mutate it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IconFace {
    pub caption: String,
    pub message: String,
    pub icon: PathBuf,
    pub hover: Option<PathBuf>,
    pub stamp: Option<PathBuf>,
    pub status: Option<PathBuf>,
}

impl IconFace {
    pub fn from_record(record: &IconRecord) -> Self {
        Self {
            caption: record.caption.clone(),
            message: record.message.clone(),
            icon: record.icon.clone(),
            hover: record.icon_hover.clone(),
            stamp: record.icon_stamp.clone(),
            status: record.icon_status.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IconLook {
    #[default]
    Normal,
    Hover,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DesktopEvent {
    ButtonPress { window: WindowId, time: u32 },
    ButtonRelease { window: WindowId, time: u32 },
    Motion { window: WindowId },
    Enter { window: WindowId },
    Leave { window: WindowId },
    Expose { window: WindowId },
    Signal { window: WindowId, signal: Signal },
    /// A new top-level application window was mapped.
    AppWindowMapped,
    /// The pending startup notification ran past its deadline.
    StartupTimeout,
    Other,
}

pub trait Host {
    fn screen_size(&self) -> (i32, i32);

    fn create_control_window(&mut self) -> Result<WindowId>;
    fn create_icon_window(&mut self, name: &str, rect: Rect) -> Result<WindowId>;
    fn destroy_window(&mut self, window: WindowId);
    fn draw_icon(
        &mut self,
        window: WindowId,
        record: &IconRecord,
        face: &IconFace,
        look: IconLook,
    ) -> Result<()>;

    /// A mapped window whose class or name matches `app_id`.
    fn find_app_window(&mut self, app_id: &str) -> Option<WindowId>;
    fn maximize_window(&mut self, window: WindowId) -> Result<()>;

    /// Fire-and-forget `/bin/sh -c command` in its own session.
    fn spawn(&mut self, command: &str) -> Result<()>;
    /// Run `/bin/sh -c command` to completion and return its stdout.
    fn run_capture(&mut self, command: &str) -> Result<String>;

    fn play_sound(&mut self, cue: SoundCue);
    fn startup_begin(&mut self, name: &str);
    fn startup_end(&mut self);

    /// Returns whether the overlay is now shown.
    fn toggle_overlay(&mut self) -> Result<bool>;

    fn next_event(&mut self) -> Result<DesktopEvent>;
}
