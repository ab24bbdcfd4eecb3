//! Icon face composition and pixel upload helpers.
//!
//! Everything here works on `image::RgbaImage` and is independent of the
//! X connection, apart from [`put_rgba`] which streams the final pixels.

use anyhow::{bail, Result};
use image::{imageops, Rgba, RgbaImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, Drawable, Gcontext, ImageFormat, ImageOrder};

use crate::config::{HAlign, IconRecord};
use crate::host::{IconFace, IconLook, Rect};
use crate::x11::font::{Caption, TextStyle};

/// Byte layout of a 32-bit ZPixmap pixel on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelOrder {
    /// Little-endian servers: B, G, R, X.
    Bgrx,
    /// Big-endian servers: X, R, G, B.
    Xrgb,
}

impl PixelOrder {
    pub fn from_server(order: ImageOrder) -> Self {
        if order == ImageOrder::MSB_FIRST {
            PixelOrder::Xrgb
        } else {
            PixelOrder::Bgrx
        }
    }
}

pub fn to_wire(img: &RgbaImage, order: PixelOrder) -> Vec<u8> {
    let mut out = Vec::with_capacity(img.as_raw().len());
    for px in img.pixels() {
        let [r, g, b, _] = px.0;
        match order {
            PixelOrder::Bgrx => out.extend_from_slice(&[b, g, r, 0]),
            PixelOrder::Xrgb => out.extend_from_slice(&[0, r, g, b]),
        }
    }
    out
}

pub fn from_wire(data: &[u8], width: u32, height: u32, order: PixelOrder) -> Option<RgbaImage> {
    let expected = width as usize * height as usize * 4;
    if data.len() < expected {
        return None;
    }
    let mut raw = Vec::with_capacity(expected);
    for px in data[..expected].chunks_exact(4) {
        let (r, g, b) = match order {
            PixelOrder::Bgrx => (px[2], px[1], px[0]),
            PixelOrder::Xrgb => (px[1], px[2], px[3]),
        };
        raw.extend_from_slice(&[r, g, b, 255]);
    }
    RgbaImage::from_raw(width, height, raw)
}

/// Row bands `(first_row, rows)` whose PutImage requests fit `max_request` bytes.
pub fn bands(height: u32, row_bytes: usize, max_request: usize) -> Vec<(u32, u32)> {
    const HEADER: usize = 24;
    let rows_per_band = (max_request.saturating_sub(HEADER) / row_bytes.max(1)).max(1) as u32;
    let mut out = Vec::new();
    let mut y = 0;
    while y < height {
        let rows = rows_per_band.min(height - y);
        out.push((y, rows));
        y += rows;
    }
    out
}

/// Upload `img` to `drawable` at `(x, y)` in as many requests as needed.
pub fn put_rgba<C: Connection>(
    conn: &C,
    drawable: Drawable,
    gc: Gcontext,
    depth: u8,
    order: PixelOrder,
    img: &RgbaImage,
    x: i16,
    y: i16,
) -> Result<()> {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return Ok(());
    }
    if w > u16::MAX as u32 || h > u16::MAX as u32 {
        bail!("image {w}x{h} too large for PutImage");
    }
    let data = to_wire(img, order);
    let row_bytes = w as usize * 4;
    for (row, rows) in bands(h, row_bytes, conn.maximum_request_bytes()) {
        let start = row as usize * row_bytes;
        let end = start + rows as usize * row_bytes;
        conn.put_image(
            ImageFormat::Z_PIXMAP,
            drawable,
            gc,
            w as u16,
            rows as u16,
            x,
            y + row as i16,
            0,
            depth,
            &data[start..end],
        )?;
    }
    Ok(())
}

// ── Compositing ───────────────────────────────────────────────────────────────

/// Source-over `src` onto `dst` at `(x, y)`, scaled by `opacity` (0..=255).
pub fn blend_over(dst: &mut RgbaImage, src: &RgbaImage, x: i32, y: i32, opacity: u8) {
    let (dw, dh) = (dst.width() as i32, dst.height() as i32);
    for (sx, sy, px) in src.enumerate_pixels() {
        let (tx, ty) = (x + sx as i32, y + sy as i32);
        if tx < 0 || ty < 0 || tx >= dw || ty >= dh {
            continue;
        }
        let alpha = u32::from(px[3]) * u32::from(opacity) / 255;
        if alpha == 0 {
            continue;
        }
        let d = dst.get_pixel_mut(tx as u32, ty as u32);
        for c in 0..3 {
            let blended = (u32::from(px[c]) * alpha + u32::from(d[c]) * (255 - alpha)) / 255;
            d[c] = blended as u8;
        }
        d[3] = d[3].max(alpha as u8);
    }
}

/// Crop of `background` under `rect`, or a flat dark fill without one.
pub fn backdrop(background: Option<&RgbaImage>, rect: Rect) -> RgbaImage {
    let (w, h) = (rect.width.max(1) as u32, rect.height.max(1) as u32);
    let mut out = RgbaImage::from_pixel(w, h, Rgba([32, 32, 32, 255]));
    if let Some(bg) = background {
        let (bw, bh) = (bg.width() as i32, bg.height() as i32);
        let x0 = rect.x.clamp(0, bw);
        let y0 = rect.y.clamp(0, bh);
        let x1 = (rect.x + rect.width).clamp(0, bw);
        let y1 = (rect.y + rect.height).clamp(0, bh);
        if x1 > x0 && y1 > y0 {
            let crop = imageops::crop_imm(bg, x0 as u32, y0 as u32, (x1 - x0) as u32, (y1 - y0) as u32)
                .to_image();
            imageops::replace(&mut out, &crop, i64::from(x0 - rect.x), i64::from(y0 - rect.y));
        }
    }
    out
}

/// Left edge of an image `image_w` wide inside a window `window_w` wide.
pub fn horizontal_offset(halign: HAlign, window_w: i32, image_w: i32) -> i32 {
    match halign {
        HAlign::Left => 0,
        HAlign::Right => (window_w - image_w).max(0),
    }
}

/// Loads images once per path; a failed load is remembered as `None`.
#[derive(Default)]
pub struct ImageCache {
    images: HashMap<PathBuf, Option<RgbaImage>>,
}

impl ImageCache {
    pub fn get(&mut self, path: &Path) -> Option<&RgbaImage> {
        self.images
            .entry(path.to_path_buf())
            .or_insert_with(|| match image::open(path) {
                Ok(img) => Some(img.into_rgba8()),
                Err(err) => {
                    debug!(file = %path.display(), "image load failed: {err}");
                    None
                }
            })
            .as_ref()
    }

    pub fn clear(&mut self) {
        self.images.clear();
    }
}

/// Everything needed to paint one icon window.
pub struct FaceLayout<'a> {
    pub record: &'a IconRecord,
    pub face: &'a IconFace,
    pub look: IconLook,
    /// The icon rectangle; the window is taller by the caption band.
    pub rect: Rect,
    pub title_gap: i32,
}

pub fn compose_face(
    layout: &FaceLayout<'_>,
    background: Option<&RgbaImage>,
    images: &mut ImageCache,
    text: Option<&TextStyle>,
    caption_height: i32,
) -> RgbaImage {
    let rect = layout.rect;
    let window = Rect::new(rect.x, rect.y, rect.width, rect.height + caption_height + layout.title_gap);
    let mut canvas = backdrop(background, window);

    let mut image_w = rect.width;
    let mut image_h = rect.height;
    if let Some(icon) = images.get(&layout.face.icon).cloned() {
        image_w = icon.width() as i32;
        image_h = icon.height() as i32;
        let subx = horizontal_offset(layout.record.halign, rect.width, image_w);

        let hover = match (layout.look, &layout.face.hover) {
            (IconLook::Hover, Some(path)) => images.get(path).cloned(),
            _ => None,
        };
        match hover {
            Some(hover) => {
                let (ox, oy) = (layout.record.hover_x_offset, layout.record.hover_y_offset);
                if layout.record.hover_transparent > 0 {
                    let mut mixed = icon.clone();
                    blend_over(&mut mixed, &hover, 0, 0, layout.record.hover_transparent);
                    blend_over(&mut canvas, &mixed, subx + ox, oy, 255);
                } else {
                    blend_over(&mut canvas, &hover, subx + ox, oy, 255);
                }
            }
            None => blend_over(&mut canvas, &icon, subx, 0, 255),
        }

        if let Some(stamp) = layout.face.stamp.as_deref().and_then(|p| images.get(p)).cloned() {
            let sy = image_h - stamp.height() as i32;
            blend_over(&mut canvas, &stamp, subx, sy.max(0), 255);
        }
        if let Some(status) = layout.face.status.as_deref().and_then(|p| images.get(p)).cloned() {
            let sx = subx + image_w - status.width() as i32;
            blend_over(&mut canvas, &status, sx.max(0), 0, 255);
        }

        if let Some(style) = text {
            draw_message(&mut canvas, style, layout, subx, image_w, image_h);
        }
    }

    if let Some(style) = text {
        if !layout.face.caption.is_empty() {
            if let Some(caption) = style.render(&layout.face.caption, style.size) {
                let cx = (rect.width - caption.width()) / 2;
                let cy = rect.height + layout.title_gap;
                caption.draw(&mut canvas, cx, cy, style.shadow);
            }
        }
    }
    debug!(
        name = layout.record.name(),
        look = ?layout.look,
        image_w,
        image_h,
        "icon face composed"
    );
    canvas
}

fn draw_message(
    canvas: &mut RgbaImage,
    style: &TextStyle,
    layout: &FaceLayout<'_>,
    subx: i32,
    image_w: i32,
    image_h: i32,
) {
    if layout.face.message.is_empty() {
        return;
    }
    let (first, second) = crate::config::split_message(&layout.face.message);
    let Some(line1) = style.render(first, style.size) else {
        return;
    };
    let y = image_h / 2 - line1.height();
    let place = |c: &Caption| {
        if subx > 0 {
            subx - c.width()
        } else {
            image_w + layout.title_gap
        }
    };
    line1.draw(canvas, place(&line1), y, style.shadow);
    if let Some(second) = second {
        if let Some(line2) = style.render(second, style.subtitle_size) {
            line2.draw(canvas, place(&line2), y + line1.height() + 5, style.shadow);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_order_follows_server_byte_order() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 255]));
        assert_eq!(to_wire(&img, PixelOrder::Bgrx), vec![3, 2, 1, 0]);
        assert_eq!(to_wire(&img, PixelOrder::Xrgb), vec![0, 1, 2, 3]);
        let back = from_wire(&[3, 2, 1, 0], 1, 1, PixelOrder::Bgrx).unwrap();
        assert_eq!(back.get_pixel(0, 0), &Rgba([1, 2, 3, 255]));
    }

    #[test]
    fn short_wire_buffer_is_rejected() {
        assert!(from_wire(&[0, 0, 0], 1, 1, PixelOrder::Bgrx).is_none());
    }

    #[test]
    fn bands_cover_every_row_within_the_limit() {
        let row_bytes = 1280 * 4;
        let bands = bands(800, row_bytes, 262_140);
        assert_eq!(bands.first(), Some(&(0, 51)));
        assert_eq!(bands.iter().map(|(_, r)| r).sum::<u32>(), 800);
        for (_, rows) in &bands {
            assert!(*rows as usize * row_bytes + 24 <= 262_140);
        }
    }

    #[test]
    fn tiny_request_limit_still_makes_progress() {
        assert_eq!(bands(3, 10_000, 100), vec![(0, 1), (1, 1), (2, 1)]);
    }

    #[test]
    fn blend_respects_alpha_and_opacity() {
        let mut dst = RgbaImage::from_pixel(2, 1, Rgba([0, 0, 0, 255]));
        let src = RgbaImage::from_pixel(1, 1, Rgba([255, 255, 255, 255]));
        blend_over(&mut dst, &src, 0, 0, 255);
        blend_over(&mut dst, &src, 1, 0, 51);
        assert_eq!(dst.get_pixel(0, 0)[0], 255);
        assert_eq!(dst.get_pixel(1, 0)[0], 51);
    }

    #[test]
    fn blend_clips_outside_destination() {
        let mut dst = RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]));
        let src = RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]));
        blend_over(&mut dst, &src, 1, -1, 255);
        assert_eq!(dst.get_pixel(1, 0)[0], 255);
        assert_eq!(dst.get_pixel(0, 0)[0], 0);
        assert_eq!(dst.get_pixel(1, 1)[0], 0);
    }

    #[test]
    fn backdrop_crops_wallpaper_and_pads_offscreen() {
        let mut bg = RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]));
        bg.put_pixel(9, 9, Rgba([200, 0, 0, 255]));
        let out = backdrop(Some(&bg), Rect::new(8, 8, 4, 4));
        assert_eq!(out.dimensions(), (4, 4));
        assert_eq!(out.get_pixel(1, 1)[0], 200);
        assert_eq!(out.get_pixel(3, 3)[0], 32);
    }

    #[test]
    fn right_aligned_images_hug_the_right_edge() {
        assert_eq!(horizontal_offset(HAlign::Left, 200, 64), 0);
        assert_eq!(horizontal_offset(HAlign::Right, 200, 64), 136);
        assert_eq!(horizontal_offset(HAlign::Right, 50, 64), 0);
    }
}
