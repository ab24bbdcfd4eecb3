use fontdue::{Font, FontSettings};
use image::{Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{home_dir, Settings};

pub const DEFAULT_FONT_SIZE: f32 = 14.0;
const SUBTITLE_STEP: f32 = 2.0;
const FONT_DIRS: &[&str] = &["/usr/share/fonts", "/usr/local/share/fonts"];
const FONT_EXTENSIONS: &[&str] = &["ttf", "otf"];

pub fn parse_color(text: &str) -> Option<Rgba<u8>> {
    let text = text.trim();
    if let Some(hex) = text.strip_prefix('#') {
        if hex.len() != 6 {
            return None;
        }
        let v = u32::from_str_radix(hex, 16).ok()?;
        return Some(Rgba([(v >> 16) as u8, (v >> 8) as u8, v as u8, 255]));
    }
    let rgb = match text.to_ascii_lowercase().as_str() {
        "white" => [255, 255, 255],
        "black" => [0, 0, 0],
        "red" => [255, 0, 0],
        "green" => [0, 255, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "gray" | "grey" => [190, 190, 190],
        _ => return None,
    };
    Some(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

fn font_dirs() -> Vec<PathBuf> {
    let home = home_dir();
    let mut dirs: Vec<PathBuf> = FONT_DIRS.iter().map(PathBuf::from).collect();
    dirs.push(home.join(".fonts"));
    dirs.push(home.join(".local/share/fonts"));
    dirs
}

fn collect_fonts(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_fonts(&path, out);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| FONT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        {
            out.push(path);
        }
    }
}

fn squash(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Best file in `candidates` for a family name.
///
/// The stem must start with the family; bold files win when `bold` is set,
/// otherwise the plainest (shortest) stem does.
pub fn pick_font(candidates: &[PathBuf], family: &str, bold: bool) -> Option<PathBuf> {
    let family = squash(family);
    if family.is_empty() {
        return None;
    }
    let score = |path: &PathBuf| -> Option<(bool, usize)> {
        let stem = squash(path.file_stem()?.to_str()?);
        if !stem.starts_with(&family) {
            return None;
        }
        let is_bold = stem.contains("bold");
        Some((is_bold != bold, stem.len()))
    };
    candidates
        .iter()
        .filter_map(|p| score(p).map(|s| (s, p)))
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, p)| p.clone())
}

pub fn find_font(family: &str, bold: bool) -> Option<PathBuf> {
    let mut candidates = Vec::new();
    for dir in font_dirs() {
        collect_fonts(&dir, &mut candidates);
    }
    let found = pick_font(&candidates, family, bold);
    debug!(family, bold, scanned = candidates.len(), found = ?found, "font lookup");
    found
}

/// Caption and message text settings plus the loaded font.
pub struct TextStyle {
    font: Font,
    pub size: f32,
    pub subtitle_size: f32,
    pub color: Rgba<u8>,
    pub shadow: bool,
    pub shadow_color: Rgba<u8>,
    pub shadow_offset: (i32, i32),
}

impl TextStyle {
    pub fn from_font(font: Font, settings: &Settings) -> Self {
        let size = match settings.get_int("fontsize") {
            n if n > 0 => n as f32,
            _ => DEFAULT_FONT_SIZE,
        };
        let subtitle_size = match settings.get_int("subtitlefontsize") {
            n if n > 0 => n as f32,
            _ => (size - SUBTITLE_STEP).max(1.0),
        };
        let offset = |key: &str| match settings.get_int(key) {
            0 => 1,
            n => n as i32,
        };
        Self {
            font,
            size,
            subtitle_size,
            color: parse_color(settings.get_string("fontcolor")).unwrap_or(Rgba([255, 255, 255, 255])),
            shadow: settings.get_bool("shadow"),
            shadow_color: parse_color(settings.get_string("shadowcolor")).unwrap_or(Rgba([0, 0, 0, 255])),
            shadow_offset: (offset("shadowx"), offset("shadowy")),
        }
    }

    /// `None` (with a warning) when the configured font cannot be found or read.
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let family = settings.get_string("fontname");
        let bold = settings.get_bool("bold");
        let Some(path) = find_font(family, bold) else {
            warn!(family, "font not found, captions disabled");
            return None;
        };
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(err) => {
                warn!(file = %path.display(), "cannot read font, captions disabled: {err}");
                return None;
            }
        };
        match Font::from_bytes(data, FontSettings::default()) {
            Ok(font) => Some(Self::from_font(font, settings)),
            Err(err) => {
                warn!(file = %path.display(), "bad font file, captions disabled: {err}");
                None
            }
        }
    }

    pub fn line_height(&self, size: f32) -> i32 {
        match self.font.horizontal_line_metrics(size) {
            Some(m) => (m.ascent - m.descent).ceil() as i32,
            None => size.ceil() as i32,
        }
    }

    /// Height reserved below the icon image for the caption.
    pub fn caption_height(&self) -> i32 {
        self.line_height(self.size) + if self.shadow { self.shadow_offset.1.abs() } else { 0 }
    }

    pub fn text_width(&self, text: &str, size: f32) -> i32 {
        text.chars()
            .map(|c| self.font.metrics(c, size).advance_width)
            .sum::<f32>()
            .ceil() as i32
    }

    pub fn render(&self, text: &str, size: f32) -> Option<Caption> {
        let width = self.text_width(text, size);
        let height = self.line_height(size);
        if text.is_empty() || width <= 0 || height <= 0 {
            return None;
        }
        let ascent = self
            .font
            .horizontal_line_metrics(size)
            .map_or(size, |m| m.ascent)
            .round() as i32;

        let mut coverage = vec![0u8; (width * height) as usize];
        let mut pen = 0.0f32;
        for c in text.chars() {
            let (m, bitmap) = self.font.rasterize(c, size);
            let gx = pen.round() as i32 + m.xmin;
            let gy = ascent - (m.height as i32 + m.ymin);
            for row in 0..m.height as i32 {
                for col in 0..m.width as i32 {
                    let (x, y) = (gx + col, gy + row);
                    if x < 0 || y < 0 || x >= width || y >= height {
                        continue;
                    }
                    let value = bitmap[(row * m.width as i32 + col) as usize];
                    let cell = &mut coverage[(y * width + x) as usize];
                    *cell = (*cell).max(value);
                }
            }
            pen += m.advance_width;
        }
        Some(Caption {
            coverage,
            width,
            height,
            color: self.color,
            shadow_color: self.shadow_color,
            shadow_offset: self.shadow_offset,
        })
    }
}

/// A rasterised line of text ready to be drawn onto a face.
pub struct Caption {
    coverage: Vec<u8>,
    width: i32,
    height: i32,
    color: Rgba<u8>,
    shadow_color: Rgba<u8>,
    shadow_offset: (i32, i32),
}

impl Caption {
    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    fn paint(&self, canvas: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
        let (cw, ch) = (canvas.width() as i32, canvas.height() as i32);
        for row in 0..self.height {
            for col in 0..self.width {
                let (tx, ty) = (x + col, y + row);
                if tx < 0 || ty < 0 || tx >= cw || ty >= ch {
                    continue;
                }
                let a = u32::from(self.coverage[(row * self.width + col) as usize]);
                if a == 0 {
                    continue;
                }
                let d = canvas.get_pixel_mut(tx as u32, ty as u32);
                for c in 0..3 {
                    d[c] = ((u32::from(color[c]) * a + u32::from(d[c]) * (255 - a)) / 255) as u8;
                }
            }
        }
    }

    pub fn draw(&self, canvas: &mut RgbaImage, x: i32, y: i32, shadow: bool) {
        if shadow {
            let (sx, sy) = self.shadow_offset;
            self.paint(canvas, x + sx, y + sy, self.shadow_color);
        }
        self.paint(canvas, x, y, self.color);
    }
}
