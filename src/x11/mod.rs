//! X11 implementation of [`Host`].
//!
//! One connection serves the whole session: icon windows, the control
//! window, the root background, the blur overlay and the startup cursor.

pub mod control;
pub mod font;
pub mod render;

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{
    Atom, AtomEnum, BackPixmap, ChangeWindowAttributesAux, ClientMessageEvent, CloseDown,
    ConfigureWindowAux, ConnectionExt as _, CreateGCAux, CreateWindowAux, Cursor, EventMask,
    Gcontext, ImageFormat, MapState, Pixmap, PropMode, StackMode, Window, WindowClass,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;
use x11rb::COPY_DEPTH_FROM_PARENT;

use crate::background;
use crate::config::{IconRecord, Settings};
use crate::host::{DesktopEvent, Host, IconFace, IconLook, Rect, SoundCue, WindowId};
use crate::launcher;
use crate::signal::{Signal, CONTROL_WINDOW_NAME};
use crate::sound::SoundPlayer;

use self::control::ICON_WINDOW_PREFIX;
use self::font::TextStyle;
use self::render::{FaceLayout, ImageCache, PixelOrder};

pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const STARTUP_POLL: Duration = Duration::from_millis(50);
const OVERLAY_MAP_TRIES: u32 = 20;
const OVERLAY_MAP_WAIT: Duration = Duration::from_millis(25);

// Glyphs of the standard X cursor font.
const XC_LEFT_PTR: u16 = 68;
const XC_HAND2: u16 = 60;
const XC_WATCH: u16 = 150;

x11rb::atom_manager! {
    pub Atoms: AtomsCookie {
        KSIG_FINISH,
        KSIG_RELOAD,
        KSIG_RELOAD_ICONS,
        KSIG_ICON_ALERT,
        KSIG_BLUR,
        _NET_WM_STATE,
        _NET_WM_STATE_MAXIMIZED_VERT,
        _NET_WM_STATE_MAXIMIZED_HORZ,
        _NET_ACTIVE_WINDOW,
        _XROOTPMAP_ID,
        ESETROOT_PMAP_ID,
    }
}

struct Cursors {
    normal: Cursor,
    hand: Cursor,
    watch: Cursor,
}

struct Overlay {
    window: Window,
    image: RgbaImage,
}

pub struct X11Host {
    conn: RustConnection,
    display: String,
    root: Window,
    size: (i32, i32),
    depth: u8,
    order: PixelOrder,
    atoms: Atoms,
    signal_atoms: HashMap<Atom, &'static str>,
    gc: Gcontext,
    cursors: Cursors,
    hand_cursor: bool,
    wallpaper: Option<RgbaImage>,
    background: Option<Pixmap>,
    images: ImageCache,
    text: Option<TextStyle>,
    title_gap: i32,
    sound: SoundPlayer,
    icon_windows: HashMap<Window, Rect>,
    startup_deadline: Option<Instant>,
    overlay: Option<Overlay>,
}

impl X11Host {
    pub fn connect(display: Option<&str>) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(display).context("cannot open the X display")?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let size = (
            i32::from(screen.width_in_pixels),
            i32::from(screen.height_in_pixels),
        );
        let depth = screen.root_depth;
        let order = PixelOrder::from_server(conn.setup().image_byte_order);

        let atoms = Atoms::new(&conn)?.reply().context("interning atoms")?;
        let signal_atoms = HashMap::from([
            (atoms.KSIG_FINISH, crate::signal::KSIG_FINISH),
            (atoms.KSIG_RELOAD, crate::signal::KSIG_RELOAD),
            (atoms.KSIG_RELOAD_ICONS, crate::signal::KSIG_RELOAD_ICONS),
            (atoms.KSIG_ICON_ALERT, crate::signal::KSIG_ICON_ALERT),
            (atoms.KSIG_BLUR, crate::signal::KSIG_BLUR),
        ]);

        let gc = conn.generate_id()?;
        conn.create_gc(gc, root, &CreateGCAux::new())?;

        let font = conn.generate_id()?;
        conn.open_font(font, b"cursor")?;
        let glyph = |shape: u16| -> Result<Cursor> {
            let id = conn.generate_id()?;
            conn.create_glyph_cursor(id, font, font, shape, shape + 1, 0, 0, 0, 0xffff, 0xffff, 0xffff)?;
            Ok(id)
        };
        let cursors = Cursors {
            normal: glyph(XC_LEFT_PTR)?,
            hand: glyph(XC_HAND2)?,
            watch: glyph(XC_WATCH)?,
        };
        conn.close_font(font)?;

        conn.change_window_attributes(
            root,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::SUBSTRUCTURE_NOTIFY),
        )?;
        conn.flush()?;

        let display_name = display
            .map(str::to_string)
            .or_else(|| std::env::var("DISPLAY").ok())
            .unwrap_or_default();
        info!(display = %display_name, width = size.0, height = size.1, depth, "connected to X server");

        Ok(Self {
            conn,
            display: display_name,
            root,
            size,
            depth,
            order,
            atoms,
            signal_atoms,
            gc,
            cursors,
            hand_cursor: false,
            wallpaper: None,
            background: None,
            images: ImageCache::default(),
            text: None,
            title_gap: 0,
            sound: SoundPlayer::disabled(),
            icon_windows: HashMap::new(),
            startup_deadline: None,
            overlay: None,
        })
    }

    pub fn conn(&self) -> &RustConnection {
        &self.conn
    }

    pub fn root(&self) -> Window {
        self.root
    }

    pub fn display(&self) -> &str {
        &self.display
    }

    pub fn sound(&self) -> &SoundPlayer {
        &self.sound
    }

    /// Pick up fonts, sounds and cursor choice; called again on every reload.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.text = TextStyle::from_settings(settings);
        self.title_gap = settings.get_int("icontitlegap").max(0) as i32;
        self.hand_cursor = settings.get_bool("mousehovericon");
        self.sound = SoundPlayer::from_settings(settings, &self.display);
        self.images.clear();
    }

    /// Stretch the configured wallpaper over the root window. With `retain`
    /// the pixmap outlives this connection.
    pub fn paint_background(&mut self, settings: &Settings, retain: bool) -> Result<()> {
        let (w, h) = self.size;
        let Some(path) = background::choose_wallpaper(settings, w, h) else {
            warn!("no wallpaper configured");
            return Ok(());
        };
        let img = background::load_wallpaper(&path, w as u32, h as u32)?;

        let pixmap = self.conn.generate_id()?;
        self.conn
            .create_pixmap(self.depth, pixmap, self.root, w as u16, h as u16)?;
        render::put_rgba(&self.conn, pixmap, self.gc, self.depth, self.order, &img, 0, 0)?;
        self.conn.change_window_attributes(
            self.root,
            &ChangeWindowAttributesAux::new().background_pixmap(pixmap),
        )?;
        self.conn.clear_area(false, self.root, 0, 0, 0, 0)?;
        for atom in [self.atoms._XROOTPMAP_ID, self.atoms.ESETROOT_PMAP_ID] {
            self.conn
                .change_property32(PropMode::REPLACE, self.root, atom, AtomEnum::PIXMAP, &[pixmap])?;
        }
        if retain {
            self.conn.set_close_down_mode(CloseDown::RETAIN_PERMANENT)?;
        } else if let Some(old) = self.background.replace(pixmap) {
            self.conn.free_pixmap(old)?;
        }
        self.conn.flush()?;
        info!(file = %path.display(), retain, "wallpaper painted");
        self.wallpaper = Some(img);
        Ok(())
    }

    fn set_name(&self, window: Window, name: &str) -> Result<()> {
        self.conn.change_property8(
            PropMode::REPLACE,
            window,
            AtomEnum::WM_NAME,
            AtomEnum::STRING,
            name.as_bytes(),
        )?;
        Ok(())
    }

    fn set_root_cursor(&self, cursor: Cursor) {
        let result = self
            .conn
            .change_window_attributes(self.root, &ChangeWindowAttributesAux::new().cursor(cursor))
            .map_err(anyhow::Error::from)
            .and_then(|_| self.conn.flush().map_err(anyhow::Error::from));
        if let Err(err) = result {
            debug!("cannot change root cursor: {err:#}");
        }
    }

    fn caption_height(&self) -> i32 {
        self.text.as_ref().map_or(0, TextStyle::caption_height)
    }

    fn window_matches(&self, window: Window, app_id: &str) -> bool {
        let class = self
            .conn
            .get_property(false, window, AtomEnum::WM_CLASS, AtomEnum::STRING, 0, 1024)
            .ok()
            .and_then(|c| c.reply().ok())
            .map(|r| r.value)
            .unwrap_or_default();
        let class_hit = class
            .split(|&b| b == 0)
            .filter(|part| !part.is_empty())
            .any(|part| String::from_utf8_lossy(part).eq_ignore_ascii_case(app_id));
        class_hit
            || control::window_name(&self.conn, window).is_some_and(|n| n.eq_ignore_ascii_case(app_id))
    }

    fn is_viewable(&self, window: Window) -> bool {
        self.conn
            .get_window_attributes(window)
            .ok()
            .and_then(|c| c.reply().ok())
            .is_some_and(|a| a.map_state == MapState::VIEWABLE)
    }

    fn screen_snapshot(&self, rect: Rect) -> Option<RgbaImage> {
        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.root,
                rect.x as i16,
                rect.y as i16,
                rect.width as u16,
                rect.height as u16,
                !0,
            )
            .ok()?
            .reply()
            .ok()?;
        render::from_wire(&reply.data, rect.width as u32, rect.height as u32, self.order)
    }

    fn show_overlay(&mut self) -> Result<()> {
        let rect = background::overlay_rect(self.size.0, self.size.1);
        let mut image = match self.screen_snapshot(rect) {
            Some(img) => img,
            None => {
                debug!("screen snapshot unavailable, dimming the wallpaper");
                render::backdrop(self.wallpaper.as_ref(), rect)
            }
        };
        background::dim(&mut image);

        let window = self.conn.generate_id()?;
        self.conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            self.root,
            rect.x as i16,
            rect.y as i16,
            rect.width as u16,
            rect.height as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new()
                .override_redirect(1)
                .event_mask(EventMask::EXPOSURE),
        )?;
        self.set_name(window, background::BLUR_WINDOW_NAME)?;
        self.conn.map_window(window)?;
        self.conn.flush()?;

        let mut mapped = false;
        for _ in 0..OVERLAY_MAP_TRIES {
            if self.is_viewable(window) {
                mapped = true;
                break;
            }
            std::thread::sleep(OVERLAY_MAP_WAIT);
        }
        if !mapped {
            self.conn.destroy_window(window)?;
            self.conn.flush()?;
            bail!("blur overlay did not map in time");
        }
        render::put_rgba(&self.conn, window, self.gc, self.depth, self.order, &image, 0, 0)?;
        self.conn.flush()?;
        self.overlay = Some(Overlay { window, image });
        Ok(())
    }

    fn translate(&mut self, event: Event) -> Option<DesktopEvent> {
        match event {
            Event::ButtonPress(e) => Some(DesktopEvent::ButtonPress {
                window: e.event,
                time: e.time,
            }),
            Event::ButtonRelease(e) => Some(DesktopEvent::ButtonRelease {
                window: e.event,
                time: e.time,
            }),
            Event::MotionNotify(e) => Some(DesktopEvent::Motion { window: e.event }),
            Event::EnterNotify(e) => Some(DesktopEvent::Enter { window: e.event }),
            Event::LeaveNotify(e) => Some(DesktopEvent::Leave { window: e.event }),
            Event::Expose(e) if e.count == 0 => {
                if let Some(overlay) = self.overlay.as_ref().filter(|o| o.window == e.window) {
                    if let Err(err) = render::put_rgba(
                        &self.conn,
                        overlay.window,
                        self.gc,
                        self.depth,
                        self.order,
                        &overlay.image,
                        0,
                        0,
                    ) {
                        debug!("overlay repaint failed: {err:#}");
                    }
                    return None;
                }
                Some(DesktopEvent::Expose { window: e.window })
            }
            Event::ClientMessage(e) if e.format == 8 => {
                let name = *self.signal_atoms.get(&e.type_)?;
                match Signal::decode(name, &e.data.as_data8()) {
                    Ok(signal) => Some(DesktopEvent::Signal {
                        window: e.window,
                        signal,
                    }),
                    Err(err) => {
                        warn!(signal = name, "undecodable signal: {err}");
                        None
                    }
                }
            }
            Event::MapNotify(e)
                if e.event == self.root
                    && !e.override_redirect
                    && !self.icon_windows.contains_key(&e.window) =>
            {
                Some(DesktopEvent::AppWindowMapped)
            }
            Event::Error(err) => {
                debug!(?err, "X error");
                None
            }
            _ => None,
        }
    }
}

impl Host for X11Host {
    fn screen_size(&self) -> (i32, i32) {
        self.size
    }

    fn create_control_window(&mut self) -> Result<WindowId> {
        let window = self.conn.generate_id()?;
        self.conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            self.root,
            -1,
            -1,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &CreateWindowAux::new().override_redirect(1),
        )?;
        self.set_name(window, CONTROL_WINDOW_NAME)?;
        self.conn.flush()?;
        Ok(window)
    }

    fn create_icon_window(&mut self, name: &str, rect: Rect) -> Result<WindowId> {
        let height = rect.height + self.caption_height() + self.title_gap;
        let window = self.conn.generate_id()?;
        let mut aux = CreateWindowAux::new()
            .override_redirect(1)
            .background_pixmap(u32::from(BackPixmap::PARENT_RELATIVE))
            .event_mask(
                EventMask::BUTTON_PRESS
                    | EventMask::BUTTON_RELEASE
                    | EventMask::POINTER_MOTION
                    | EventMask::EXPOSURE
                    | EventMask::ENTER_WINDOW
                    | EventMask::LEAVE_WINDOW,
            );
        if self.hand_cursor {
            aux = aux.cursor(self.cursors.hand);
        }
        self.conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            window,
            self.root,
            rect.x as i16,
            rect.y as i16,
            rect.width.max(1) as u16,
            height.max(1) as u16,
            0,
            WindowClass::INPUT_OUTPUT,
            0,
            &aux,
        )?;
        self.set_name(window, &format!("{ICON_WINDOW_PREFIX}{name}"))?;
        self.icon_windows.insert(window, rect);
        self.conn.map_window(window)?;
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::BELOW),
        )?;
        self.conn.flush()?;
        Ok(window)
    }

    fn destroy_window(&mut self, window: WindowId) {
        self.icon_windows.remove(&window);
        let result = self
            .conn
            .destroy_window(window)
            .map_err(anyhow::Error::from)
            .and_then(|_| self.conn.flush().map_err(anyhow::Error::from));
        if let Err(err) = result {
            debug!(window, "destroy failed: {err:#}");
        }
    }

    fn draw_icon(
        &mut self,
        window: WindowId,
        record: &IconRecord,
        face: &IconFace,
        look: IconLook,
    ) -> Result<()> {
        let Some(rect) = self.icon_windows.get(&window).copied() else {
            bail!("window {window} is not an icon");
        };
        let caption_height = self.caption_height();
        let layout = FaceLayout {
            record,
            face,
            look,
            rect,
            title_gap: self.title_gap,
        };
        let img = render::compose_face(
            &layout,
            self.wallpaper.as_ref(),
            &mut self.images,
            self.text.as_ref(),
            caption_height,
        );
        render::put_rgba(&self.conn, window, self.gc, self.depth, self.order, &img, 0, 0)?;
        self.conn.flush()?;
        Ok(())
    }

    fn find_app_window(&mut self, app_id: &str) -> Option<WindowId> {
        let windows = match control::candidate_windows(&self.conn, self.root) {
            Ok(w) => w,
            Err(err) => {
                warn!("cannot list windows: {err:#}");
                return None;
            }
        };
        windows.into_iter().find(|&w| {
            !self.icon_windows.contains_key(&w) && self.window_matches(w, app_id) && self.is_viewable(w)
        })
    }

    fn maximize_window(&mut self, window: WindowId) -> Result<()> {
        let mask = EventMask::SUBSTRUCTURE_REDIRECT | EventMask::SUBSTRUCTURE_NOTIFY;
        let state = ClientMessageEvent::new(
            32,
            window,
            self.atoms._NET_WM_STATE,
            [
                1,
                self.atoms._NET_WM_STATE_MAXIMIZED_VERT,
                self.atoms._NET_WM_STATE_MAXIMIZED_HORZ,
                1,
                0,
            ],
        );
        self.conn.send_event(false, self.root, mask, state)?;
        let activate = ClientMessageEvent::new(
            32,
            window,
            self.atoms._NET_ACTIVE_WINDOW,
            [1, x11rb::CURRENT_TIME, 0, 0, 0],
        );
        self.conn.send_event(false, self.root, mask, activate)?;
        self.conn.configure_window(
            window,
            &ConfigureWindowAux::new().stack_mode(StackMode::ABOVE),
        )?;
        self.conn.flush()?;
        info!(window, "running instance maximized");
        Ok(())
    }

    fn spawn(&mut self, command: &str) -> Result<()> {
        launcher::spawn_shell(command).map(|_| ())
    }

    fn run_capture(&mut self, command: &str) -> Result<String> {
        launcher::run_capture(command)
    }

    fn play_sound(&mut self, cue: SoundCue) {
        self.sound.play(cue);
    }

    fn startup_begin(&mut self, name: &str) {
        self.set_root_cursor(self.cursors.watch);
        self.startup_deadline = Some(Instant::now() + STARTUP_TIMEOUT);
        debug!(name, "startup notification begun");
    }

    fn startup_end(&mut self) {
        self.startup_deadline = None;
        self.set_root_cursor(self.cursors.normal);
    }

    fn toggle_overlay(&mut self) -> Result<bool> {
        if let Some(overlay) = self.overlay.take() {
            self.conn.destroy_window(overlay.window)?;
            self.conn.flush()?;
            return Ok(false);
        }
        self.show_overlay()?;
        Ok(true)
    }

    fn next_event(&mut self) -> Result<DesktopEvent> {
        loop {
            let event = match self.startup_deadline {
                Some(deadline) => match self.conn.poll_for_event()? {
                    Some(event) => event,
                    None if Instant::now() >= deadline => {
                        self.startup_deadline = None;
                        return Ok(DesktopEvent::StartupTimeout);
                    }
                    None => {
                        std::thread::sleep(STARTUP_POLL);
                        continue;
                    }
                },
                None => self.conn.wait_for_event()?,
            };
            if let Some(event) = self.translate(event) {
                return Ok(event);
            }
        }
    }
}
