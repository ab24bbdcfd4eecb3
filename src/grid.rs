//! Icon grid: hands out non-overlapping screen cells for grid-placed icons.
//!
//! The grid grows upward from the bottom of the screen: row 0 sits just above
//! the bottom margin, and each further row is one cell (plus gap) higher. The
//! allocator only tracks coordinates, never the icons occupying them.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Settings;

pub const DEFAULT_GRID_WIDTH: i32 = 128;
pub const DEFAULT_GRID_HEIGHT: i32 = 128;
pub const DEFAULT_ICON_HORZ_SPACE: i32 = 50;
pub const DEFAULT_ICON_VERT_SPACE: i32 = 25;

pub const MARGIN_TOP: i32 = 50;
pub const MARGIN_BOTTOM: i32 = 84;
pub const MAX_COLUMNS: i32 = 7;

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GridCell {
    pub column: i32,
    pub row: i32,
}

impl GridCell {
    pub const fn new(column: i32, row: i32) -> Self {
        Self { column, row }
    }
}

/// Cell size and spacing, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridGeometry {
    pub cell_width: i32,
    pub cell_height: i32,
    pub horizontal_gap: i32,
    pub vertical_gap: i32,
}

impl Default for GridGeometry {
    fn default() -> Self {
        Self {
            cell_width: DEFAULT_GRID_WIDTH,
            cell_height: DEFAULT_GRID_HEIGHT,
            horizontal_gap: DEFAULT_ICON_HORZ_SPACE,
            vertical_gap: DEFAULT_ICON_VERT_SPACE,
        }
    }
}

impl GridGeometry {
    /// Zero or missing settings fall back to the defaults.
    pub fn from_settings(settings: &Settings) -> Self {
        let pick = |key: &str, default: i32| match settings.get_int(key) {
            v if v > 0 => i32::try_from(v).unwrap_or(i32::MAX),
            _ => default,
        };
        Self {
            cell_width: pick("gridwidth", DEFAULT_GRID_WIDTH),
            cell_height: pick("gridheight", DEFAULT_GRID_HEIGHT),
            horizontal_gap: pick("icongaphorz", DEFAULT_ICON_HORZ_SPACE),
            vertical_gap: pick("icongapvert", DEFAULT_ICON_VERT_SPACE),
        }
    }
}

/// A granted grid request: pixel origin of the cell plus the logical cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPosition {
    pub x: i32,
    pub y: i32,
    pub cell: GridCell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GridError {
    #[error("icon grid is full")]
    GridFull,
}

// ── Allocator ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct GridAllocator {
    geometry: GridGeometry,
    columns: i32,
    rows: i32,
    origin_x: i32,
    origin_y: i32,
    occupied: Vec<GridCell>,
    is_full: bool,
}

impl GridAllocator {
    pub fn new(screen_width: i32, screen_height: i32, geometry: GridGeometry) -> Self {
        let step_x = geometry.cell_width + geometry.horizontal_gap;
        let columns = (screen_width / step_x.max(1)).clamp(0, MAX_COLUMNS);
        let rows = ((screen_height - MARGIN_TOP - MARGIN_BOTTOM) / geometry.cell_height.max(1)).max(0);

        // Centre the whole row; the trailing gap is split between both ends.
        let origin_x = (screen_width - columns * step_x) / 2 + geometry.horizontal_gap / 2;
        let origin_y = screen_height - MARGIN_BOTTOM;

        debug!(
            columns,
            rows,
            origin_x,
            origin_y,
            cell_width = geometry.cell_width,
            cell_height = geometry.cell_height,
            "icon grid created"
        );

        Self {
            geometry,
            columns,
            rows,
            origin_x,
            origin_y,
            occupied: Vec::new(),
            is_full: false,
        }
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    pub fn columns(&self) -> i32 {
        self.columns
    }

    pub fn rows(&self) -> i32 {
        self.rows
    }

    /// True once any request has overflowed the grid. Never reset by releases.
    pub fn is_full(&self) -> bool {
        self.is_full
    }

    pub fn occupied(&self) -> &[GridCell] {
        &self.occupied
    }

    pub fn is_occupied(&self, cell: GridCell) -> bool {
        self.occupied.iter().any(|c| *c == cell)
    }

    fn in_bounds(&self, cell: GridCell) -> bool {
        (0..self.columns).contains(&cell.column) && (0..self.rows).contains(&cell.row)
    }

    /// Pixel origin of a cell. Does not check occupancy.
    pub fn pixel_position(&self, cell: GridCell) -> (i32, i32) {
        let x = self.origin_x
            + cell.column * (self.geometry.cell_width + self.geometry.horizontal_gap);
        let y = self.origin_y
            - (cell.row + 1) * (self.geometry.cell_height + self.geometry.vertical_gap);
        (x, y)
    }

    pub fn request_position(&mut self, hint: Option<GridCell>) -> Result<GridPosition, GridError> {
        if let Some(cell) = hint {
            if self.in_bounds(cell) && !self.is_occupied(cell) {
                return self.acquire(cell);
            }
            debug!(?cell, "grid hint unusable, scanning for a free cell");
        }

        for row in 0..self.rows {
            for column in 0..self.columns {
                let cell = GridCell::new(column, row);
                if !self.is_occupied(cell) {
                    return self.acquire(cell);
                }
            }
        }

        self.is_full = true;
        Err(GridError::GridFull)
    }

    fn acquire(&mut self, cell: GridCell) -> Result<GridPosition, GridError> {
        let (x, y) = self.pixel_position(cell);

        // Rows that would reach into the top margin are off-screen.
        if y <= MARGIN_TOP {
            self.is_full = true;
            return Err(GridError::GridFull);
        }

        self.occupied.push(cell);
        Ok(GridPosition { x, y, cell })
    }

    pub fn release_position(&mut self, cell: GridCell) -> bool {
        match self.occupied.iter().position(|c| *c == cell) {
            Some(idx) => {
                self.occupied.remove(idx);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry_10() -> GridGeometry {
        GridGeometry {
            cell_width: 128,
            cell_height: 128,
            horizontal_gap: 10,
            vertical_gap: 10,
        }
    }

    #[test]
    fn dimensions_follow_screen_and_clamp_columns() {
        let grid = GridAllocator::new(1280, 800, geometry_10());
        assert_eq!(grid.columns(), MAX_COLUMNS);
        assert_eq!(grid.rows(), 5);

        let narrow = GridAllocator::new(600, 800, geometry_10());
        assert_eq!(narrow.columns(), 4);
    }

    #[test]
    fn cells_grow_upward_from_bottom_margin() {
        let grid = GridAllocator::new(1280, 800, geometry_10());
        let (x0, y0) = grid.pixel_position(GridCell::new(0, 0));
        let (x1, y1) = grid.pixel_position(GridCell::new(1, 1));
        assert_eq!(y0, 800 - MARGIN_BOTTOM - 138);
        assert_eq!(x1 - x0, 138);
        assert_eq!(y0 - y1, 138);
    }

    #[test]
    fn row_is_horizontally_centred() {
        let grid = GridAllocator::new(1280, 800, geometry_10());
        let (left, _) = grid.pixel_position(GridCell::new(0, 0));
        let (right, _) = grid.pixel_position(GridCell::new(MAX_COLUMNS - 1, 0));
        let right_edge = right + 128;
        assert!((left - (1280 - right_edge)).abs() <= 1);
    }

    #[test]
    fn concurrent_cells_never_overlap() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        let mut seen = Vec::new();
        while let Ok(pos) = grid.request_position(None) {
            assert!(!seen.contains(&pos.cell));
            seen.push(pos.cell);
        }
        assert_eq!(seen.len(), grid.occupied().len());
    }

    #[test]
    fn released_cell_is_reused_before_higher_cells() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        for _ in 0..5 {
            grid.request_position(None).unwrap();
        }
        assert!(grid.release_position(GridCell::new(2, 0)));
        let pos = grid.request_position(None).unwrap();
        assert_eq!(pos.cell, GridCell::new(2, 0));
    }

    #[test]
    fn release_of_unknown_cell_reports_false() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        assert!(!grid.release_position(GridCell::new(3, 3)));
    }

    #[test]
    fn overflow_stops_at_top_margin() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        // Rows 0..=3 fit; row 4 would start at y=26, inside the top margin.
        for n in 0..28 {
            assert!(grid.request_position(None).is_ok(), "request {n} should fit");
            assert!(!grid.is_full());
        }
        assert_eq!(grid.request_position(None), Err(GridError::GridFull));
        assert!(grid.is_full());
        assert_eq!(grid.occupied().len(), 28);
    }

    #[test]
    fn hint_into_offscreen_row_fails_without_occupying() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        assert_eq!(
            grid.request_position(Some(GridCell::new(0, 4))),
            Err(GridError::GridFull)
        );
        assert!(grid.is_full());
        assert!(grid.occupied().is_empty());
    }

    #[test]
    fn is_full_survives_release() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        while grid.request_position(None).is_ok() {}
        assert!(grid.release_position(GridCell::new(0, 0)));
        assert!(grid.is_full());
        assert!(grid.request_position(None).is_ok());
        assert!(grid.is_full());
    }

    #[test]
    fn second_request_for_same_hint_falls_through() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        let first = grid.request_position(Some(GridCell::new(0, 0))).unwrap();
        let second = grid.request_position(Some(GridCell::new(0, 0))).unwrap();
        assert_eq!(first.cell, GridCell::new(0, 0));
        assert_eq!(second.cell, GridCell::new(1, 0));
    }

    #[test]
    fn invalid_hints_scan_from_the_start() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        let neg = grid.request_position(Some(GridCell::new(-1, -1))).unwrap();
        assert_eq!(neg.cell, GridCell::new(0, 0));
        let wide = grid.request_position(Some(GridCell::new(MAX_COLUMNS, 0))).unwrap();
        assert_eq!(wide.cell, GridCell::new(1, 0));
    }

    #[test]
    fn free_hint_is_honoured() {
        let mut grid = GridAllocator::new(1280, 800, geometry_10());
        let pos = grid.request_position(Some(GridCell::new(3, 2))).unwrap();
        assert_eq!(pos.cell, GridCell::new(3, 2));
        assert_eq!((pos.x, pos.y), grid.pixel_position(GridCell::new(3, 2)));
    }

    #[test]
    fn geometry_defaults_when_settings_are_zero() {
        let settings = Settings::parse("GridWidth: 0\nIconGapVert: 12\n");
        let g = GridGeometry::from_settings(&settings);
        assert_eq!(g.cell_width, DEFAULT_GRID_WIDTH);
        assert_eq!(g.cell_height, DEFAULT_GRID_HEIGHT);
        assert_eq!(g.horizontal_gap, DEFAULT_ICON_HORZ_SPACE);
        assert_eq!(g.vertical_gap, 12);
    }
}
