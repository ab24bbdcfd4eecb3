//! Client side of the signal channel: find a running instance's windows and
//! talk to it.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    AtomEnum, ClientMessageEvent, ConnectionExt as _, EventMask, Window,
};

use crate::signal::{Signal, CONTROL_WINDOW_NAME};

/// WM_NAME prefix of icon windows; the icon name follows it.
pub const ICON_WINDOW_PREFIX: &str = "KdeskIcon:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IconGeometry {
    pub icon_name: String,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    NotRunning,
}

pub fn window_name<C: Connection>(conn: &C, window: Window) -> Option<String> {
    let reply = conn
        .get_property(false, window, AtomEnum::WM_NAME, AtomEnum::ANY, 0, 1024)
        .ok()?
        .reply()
        .ok()?;
    if reply.value.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&reply.value).into_owned())
}

/// Top-level windows plus their direct children.
pub fn candidate_windows<C: Connection>(conn: &C, root: Window) -> Result<Vec<Window>> {
    let mut out = Vec::new();
    for top in conn.query_tree(root)?.reply()?.children {
        out.push(top);
        if let Ok(cookie) = conn.query_tree(top) {
            if let Ok(tree) = cookie.reply() {
                out.extend(tree.children);
            }
        }
    }
    Ok(out)
}

fn find_named<C: Connection>(conn: &C, root: Window, wanted: impl Fn(&str) -> bool) -> Result<Option<Window>> {
    Ok(candidate_windows(conn, root)?
        .into_iter()
        .find(|&w| window_name(conn, w).is_some_and(|name| wanted(&name))))
}

pub fn find_control_window<C: Connection>(conn: &C, root: Window) -> Result<Option<Window>> {
    find_named(conn, root, |name| name == CONTROL_WINDOW_NAME)
}

pub fn is_running<C: Connection>(conn: &C, root: Window) -> Result<bool> {
    Ok(find_control_window(conn, root)?.is_some())
}

pub fn send_signal<C: Connection>(conn: &C, root: Window, signal: &Signal) -> Result<Delivery> {
    let Some(target) = find_control_window(conn, root)? else {
        return Ok(Delivery::NotRunning);
    };
    // Atoms are interned by the running instance; a missing one means it is not there.
    let atom = conn
        .intern_atom(true, signal.atom_name().as_bytes())?
        .reply()
        .context("interning signal atom")?
        .atom;
    if atom == x11rb::NONE {
        return Ok(Delivery::NotRunning);
    }
    let event = ClientMessageEvent::new(8, target, atom, signal.payload());
    conn.send_event(false, target, EventMask::NO_EVENT, event)?;
    conn.flush()?;
    debug!(signal = signal.atom_name(), window = target, "signal sent");
    Ok(Delivery::Sent)
}

pub fn icon_geometry<C: Connection>(conn: &C, root: Window, icon_name: &str) -> Result<Option<IconGeometry>> {
    let wanted = format!("{ICON_WINDOW_PREFIX}{icon_name}");
    let Some(window) = find_named(conn, root, |name| name == wanted)? else {
        return Ok(None);
    };
    let geom = conn.get_geometry(window)?.reply()?;
    let origin = conn.translate_coordinates(window, root, 0, 0)?.reply()?;
    Ok(Some(IconGeometry {
        icon_name: icon_name.to_string(),
        x: i32::from(origin.dst_x),
        y: i32::from(origin.dst_y),
        width: u32::from(geom.width),
        height: u32::from(geom.height),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_serializes_with_icon_name() {
        let g = IconGeometry {
            icon_name: "chromium".into(),
            x: 10,
            y: 20,
            width: 128,
            height: 150,
        };
        assert_eq!(
            serde_json::to_string(&g).unwrap(),
            r#"{"icon_name":"chromium","x":10,"y":20,"width":128,"height":150}"#
        );
    }
}
