//! kdesk: desktop icons, wallpaper and screen saver for a plain X11 session.
//!
//! The binary in `main.rs` wires [`desktop::DesktopSession`] to the X server
//! through [`x11::X11Host`] and to the `.kdeskrc`/`.lnk` files through
//! [`config::ConfigStore`].

pub mod background;
pub mod checks;
pub mod cli;
pub mod click;
pub mod config;
pub mod desktop;
pub mod grid;
pub mod hook;
pub mod host;
pub mod icon;
pub mod launcher;
pub mod logging;
pub mod metrics;
pub mod signal;
pub mod sound;
pub mod ssaver;
pub mod x11;
