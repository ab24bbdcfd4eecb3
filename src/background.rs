use anyhow::{Context, Result};
use image::{imageops::FilterType, RgbaImage};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Settings;
use crate::host::Rect;

/// Height of the taskbar strip the blur overlay leaves uncovered.
pub const TASKBAR_HEIGHT: i32 = 41;
pub const BLUR_WINDOW_NAME: &str = "KdeskBlur";

// ── Wallpaper ─────────────────────────────────────────────────────────────────

/// Medium-resolution file on narrow screens, else whichever of 4:3 and 16:9
/// is closer to the screen aspect.
pub fn choose_wallpaper(settings: &Settings, screen_w: i32, screen_h: i32) -> Option<PathBuf> {
    let medium_width = settings.get_int("screenmedreswidth");
    let key = if medium_width > 0 && i64::from(screen_w) < medium_width {
        "background.file-medium"
    } else {
        let ratio = screen_w as f32 / screen_h.max(1) as f32;
        let dist_4_3 = (ratio - 4.0 / 3.0).abs();
        let dist_16_9 = (ratio - 16.0 / 9.0).abs();
        if dist_4_3 < dist_16_9 {
            "background.file-4-3"
        } else {
            "background.file-16-9"
        }
    };
    let file = settings.get_string(key);
    debug!(key, file, screen_w, screen_h, "wallpaper chosen");
    (!file.is_empty()).then(|| PathBuf::from(file))
}

/// Load and stretch to exactly the screen size.
pub fn load_wallpaper(path: &Path, screen_w: u32, screen_h: u32) -> Result<RgbaImage> {
    let img = image::open(path)
        .with_context(|| format!("loading wallpaper {}", path.display()))?
        .into_rgba8();
    info!(
        file = %path.display(),
        from = ?img.dimensions(),
        to = ?(screen_w, screen_h),
        "wallpaper loaded"
    );
    if img.dimensions() == (screen_w, screen_h) {
        return Ok(img);
    }
    Ok(image::imageops::resize(&img, screen_w, screen_h, FilterType::Triangle))
}

pub fn startup_delay(settings: &Settings) -> Duration {
    Duration::from_millis(settings.get_int("background.delay").max(0) as u64)
}

// ── Blur overlay ──────────────────────────────────────────────────────────────

pub fn overlay_rect(screen_w: i32, screen_h: i32) -> Rect {
    Rect::new(0, 0, screen_w, (screen_h - TASKBAR_HEIGHT).max(1))
}

/// Darken a screen snapshot for the overlay: every colour channel / 3.
pub fn dim(img: &mut RgbaImage) {
    for px in img.pixels_mut() {
        px[0] /= 3;
        px[1] /= 3;
        px[2] /= 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn wallpapers() -> Settings {
        Settings::parse(
            "Background.File-4-3: /w/4-3.png\nBackground.File-16-9: /w/16-9.png\n\
             Background.File-medium: /w/medium.png\nScreenMedResWidth: 1024\n",
        )
    }

    #[test]
    fn wide_screen_gets_16_9() {
        assert_eq!(
            choose_wallpaper(&wallpapers(), 1920, 1080),
            Some(PathBuf::from("/w/16-9.png"))
        );
    }

    #[test]
    fn square_ish_screen_gets_4_3() {
        assert_eq!(
            choose_wallpaper(&wallpapers(), 1280, 1024),
            Some(PathBuf::from("/w/4-3.png"))
        );
    }

    #[test]
    fn narrow_screen_gets_medium() {
        assert_eq!(
            choose_wallpaper(&wallpapers(), 800, 600),
            Some(PathBuf::from("/w/medium.png"))
        );
    }

    #[test]
    fn unset_wallpaper_is_none() {
        assert_eq!(choose_wallpaper(&Settings::default(), 1920, 1080), None);
    }

    #[test]
    fn overlay_leaves_taskbar_visible() {
        assert_eq!(overlay_rect(1280, 800), Rect::new(0, 0, 1280, 759));
    }

    #[test]
    fn dim_divides_colour_but_keeps_alpha() {
        let mut img = RgbaImage::from_pixel(2, 1, Rgba([255, 90, 3, 200]));
        dim(&mut img);
        assert_eq!(img.get_pixel(1, 0), &Rgba([85, 30, 1, 200]));
    }

    #[test]
    fn stretched_wallpaper_matches_screen() {
        let path = std::env::temp_dir().join(format!("kdesk-wall-{}.png", std::process::id()));
        RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();
        let img = load_wallpaper(&path, 16, 9).unwrap();
        assert_eq!(img.dimensions(), (16, 9));
        let _ = std::fs::remove_file(path);
    }
}
