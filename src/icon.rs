use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{IconRecord, Placement};
use crate::grid::{GridAllocator, GridCell, GridError};
use crate::host::{Host, IconFace, IconLook, Rect, WindowId};

#[derive(Debug, Error)]
pub enum IconError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("cannot create window for icon {name}: {reason}")]
    Window { name: String, reason: String },
}

/// Where a record lands on a `screen_w` × `screen_h` screen.
///
/// Grid records take a cell from `grid` (and keep it); the others are fixed.
pub fn resolve_rect(
    record: &IconRecord,
    screen_w: i32,
    screen_h: i32,
    grid: &mut GridAllocator,
) -> Result<(Rect, Option<GridCell>), GridError> {
    let (x, y, w, h) = (record.x, record.y, record.width, record.height);
    let rect = match record.placement {
        Placement::Grid => {
            let pos = grid.request_position(record.grid_hint)?;
            let g = grid.geometry();
            return Ok((
                Rect::new(pos.x, pos.y, g.cell_width, g.cell_height),
                Some(pos.cell),
            ));
        }
        Placement::TopLeft => Rect::new(x, y, w, h),
        Placement::TopRight => Rect::new(screen_w - (x + w), y, w, h),
        Placement::TopCentre => Rect::new(screen_w / 2 + x, y, w, h),
        Placement::BottomCentre => Rect::new(screen_w / 2 + x, screen_h + y, w, h),
    };
    Ok((rect, None))
}

// ── Entity ────────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct IconEntity {
    record: IconRecord,
    window: WindowId,
    rect: Rect,
    cell: Option<GridCell>,
    face: IconFace,
    look: IconLook,
}

impl IconEntity {
    pub fn create<H: Host>(
        host: &mut H,
        grid: &mut GridAllocator,
        record: &IconRecord,
    ) -> Result<Self, IconError> {
        let (screen_w, screen_h) = host.screen_size();
        let (rect, cell) = resolve_rect(record, screen_w, screen_h, grid)?;

        let window = match host.create_icon_window(record.name(), rect) {
            Ok(w) => w,
            Err(err) => {
                if let Some(cell) = cell {
                    grid.release_position(cell);
                }
                return Err(IconError::Window {
                    name: record.name().to_string(),
                    reason: format!("{err:#}"),
                });
            }
        };

        debug!(
            name = record.name(),
            window,
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            ?cell,
            "icon created"
        );

        Ok(Self {
            record: record.clone(),
            window,
            rect,
            cell,
            face: IconFace::from_record(record),
            look: IconLook::Normal,
        })
    }

    pub fn name(&self) -> &str {
        self.record.name()
    }

    pub fn record(&self) -> &IconRecord {
        &self.record
    }

    /// Point a surviving icon at its re-read record. The face is rebuilt from
    /// a changed record; returns whether it now looks different.
    pub fn rebind(&mut self, record: &IconRecord) -> bool {
        if *record == self.record {
            return false;
        }
        let face = IconFace::from_record(record);
        let changed = face != self.face;
        self.record = record.clone();
        self.face = face;
        debug!(name = self.name(), changed, "icon record updated");
        changed
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn cell(&self) -> Option<GridCell> {
        self.cell
    }

    pub fn face(&self) -> &IconFace {
        &self.face
    }

    pub fn look(&self) -> IconLook {
        self.look
    }

    // ── Drawing ───────────────────────────────────────────────────────────────

    pub fn draw<H: Host>(&mut self, host: &mut H, look: IconLook) {
        self.look = look;
        if let Err(err) = host.draw_icon(self.window, &self.record, &self.face, look) {
            warn!(name = self.name(), "drawing icon failed: {err:#}");
        }
    }

    pub fn redraw<H: Host>(&mut self, host: &mut H) {
        self.draw(host, self.look);
    }

    pub fn set_caption(&mut self, caption: impl Into<String>) {
        self.face.caption = caption.into();
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.face.message = message.into();
    }

    pub fn set_icon(&mut self, icon: impl Into<std::path::PathBuf>) {
        self.face.icon = icon.into();
    }

    pub fn set_icon_stamp(&mut self, stamp: impl Into<std::path::PathBuf>) {
        self.face.stamp = Some(stamp.into());
    }

    pub fn set_icon_status(&mut self, status: impl Into<std::path::PathBuf>) {
        self.face.status = Some(status.into());
    }

    // ── Launching ─────────────────────────────────────────────────────────────

    /// The already-running instance of a singleton app, if any.
    pub fn running_instance<H: Host>(&self, host: &mut H) -> Option<WindowId> {
        if !self.record.singleton {
            return None;
        }
        let app_id = self.record.app_id.as_deref().filter(|a| !a.is_empty())?;
        let found = host.find_app_window(app_id);
        if let Some(window) = found {
            debug!(name = self.name(), app_id, window, "singleton already running");
        }
        found
    }

    pub fn is_singleton_running<H: Host>(&self, host: &mut H) -> bool {
        self.running_instance(host).is_some()
    }

    /// Returns whether the command was spawned.
    pub fn launch<H: Host>(&self, host: &mut H) -> bool {
        if self.is_singleton_running(host) {
            info!(name = self.name(), "not starting app, singleton is running");
            return false;
        }
        info!(name = self.name(), command = %self.record.command, "launching");
        match host.spawn(&self.record.command) {
            Ok(()) => true,
            Err(err) => {
                warn!(name = self.name(), "spawn failed: {err:#}");
                false
            }
        }
    }

    /// Consumes the entity; its grid cell goes back to the allocator.
    pub fn destroy<H: Host>(self, host: &mut H, grid: &mut GridAllocator) {
        host.destroy_window(self.window);
        if let Some(cell) = self.cell {
            grid.release_position(cell);
        }
        debug!(name = self.name(), window = self.window, "icon destroyed");
    }
}
