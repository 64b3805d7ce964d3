//! Placeholder cards shown while the real conversion runs.
//!
//! The renderer is blocked on this call, so it has to be fast and it must
//! always hand back *some* file. [`generate_placeholder`] never returns an
//! error: when the nicely rendered card cannot be written it degrades to a
//! blank image, then to a blank image in the system temp dir, and finally to
//! an empty file.
//!
//! Text is drawn with a built-in 5×7 bitmap font (upper-case ASCII, digits,
//! a little punctuation). That keeps the card dependency-free apart from
//! `image` and avoids shipping a font file.

use crate::config::WORK_DIR_NAME;
use crate::error::HeicError;
use crate::paths::OutputLayout;
use image::{ImageFormat, Rgb, RgbImage};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const BACKGROUND: Rgb<u8> = Rgb([38, 40, 46]);
const BORDER: Rgb<u8> = Rgb([70, 74, 84]);
const ACCENT: Rgb<u8> = Rgb([88, 166, 255]);
const TEXT: Rgb<u8> = Rgb([230, 232, 236]);
const MUTED: Rgb<u8> = Rgb([150, 154, 162]);
const TRACK: Rgb<u8> = Rgb([58, 62, 70]);

/// How much of the progress bar is drawn filled.
const PROGRESS_FRACTION: f32 = 0.35;

/// Smallest card side [`generate_placeholder`] will draw.
pub const MIN_SIDE: u32 = 64;
/// Largest card side; keeps the bar arithmetic and the pixel buffer bounded.
pub const MAX_SIDE: u32 = 4096;

const GLYPH_W: u32 = 5;
const GLYPH_H: u32 = 7;

/// Write the "conversion in progress" card for `source` and return its path.
///
/// The path depends only on `source`, so repeated calls overwrite the same
/// file. The write goes through a temp file + rename; a renderer reading the
/// card concurrently never sees a half-written PNG. Each side is clamped to
/// `MIN_SIDE..=MAX_SIDE`.
pub fn generate_placeholder(
    source: &Path,
    layout: &OutputLayout,
    width: u32,
    height: u32,
) -> PathBuf {
    let width = width.clamp(MIN_SIDE, MAX_SIDE);
    let height = height.clamp(MIN_SIDE, MAX_SIDE);
    let target = layout.placeholder_path(source);
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match render_placeholder(&name, width, height)
        .and_then(|img| write_png(&img, &target))
    {
        Ok(()) => {
            debug!("Placeholder for {} → {}", source.display(), target.display());
            return target;
        }
        Err(e) => warn!("Placeholder for {} failed: {}", source.display(), e),
    }

    if write_png(&RgbImage::from_pixel(width, height, BACKGROUND), &target).is_ok() {
        return target;
    }

    let fallback = std::env::temp_dir().join(format!("{WORK_DIR_NAME}-blank.png"));
    if write_png(&RgbImage::from_pixel(1, 1, BACKGROUND), &fallback).is_ok() {
        return fallback;
    }
    if let Err(e) = std::fs::write(&fallback, b"") {
        warn!("Cannot write any placeholder (last try {}): {}", fallback.display(), e);
    }
    fallback
}

/// Draw the card: title, file name, hint, and a partly filled progress bar.
pub fn render_placeholder(name: &str, width: u32, height: u32) -> Result<RgbImage, HeicError> {
    if width == 0 || height == 0 || width > MAX_SIDE || height > MAX_SIDE {
        return Err(HeicError::Internal(format!(
            "placeholder size {width}x{height} is outside 1..={MAX_SIDE}"
        )));
    }

    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    draw_frame(&mut img, 2, BORDER);

    let scale = if width >= 300 && height >= 200 { 2 } else { 1 };
    let advance = (GLYPH_W + 1) * scale;
    let max_chars = (width.saturating_sub(4 * advance) / advance).max(3) as usize;

    draw_text_centered(&mut img, "CONVERTING", height * 22 / 100, scale, ACCENT);
    draw_text_centered(&mut img, &fit_name(name, max_chars), height * 40 / 100, scale, TEXT);
    draw_text_centered(&mut img, "PLEASE WAIT", height * 55 / 100, scale, MUTED);

    let bar_w = width * 70 / 100;
    let bar_h = (height / 25).max(4);
    let bar_x = (width - bar_w) / 2;
    let bar_y = height * 72 / 100;
    fill_rect(&mut img, bar_x, bar_y, bar_w, bar_h, TRACK);
    let filled = (bar_w as f32 * PROGRESS_FRACTION) as u32;
    fill_rect(&mut img, bar_x, bar_y, filled, bar_h, ACCENT);

    Ok(img)
}

fn write_png(img: &RgbImage, target: &Path) -> Result<(), HeicError> {
    let write_err = |source| HeicError::OutputWriteFailed {
        path: target.to_path_buf(),
        source,
    };

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(|e| HeicError::ImageEncodeFailed {
            path: target.to_path_buf(),
            detail: e.to_string(),
        })?;

    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir).map_err(write_err)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(&buf).map_err(write_err)?;
    tmp.persist(target).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Upper-case `name` and shorten it to `max` characters, ending in `..`.
fn fit_name(name: &str, max: usize) -> String {
    let upper: Vec<char> = name.chars().map(|c| c.to_ascii_uppercase()).collect();
    if upper.len() <= max {
        return upper.into_iter().collect();
    }
    let keep = max.saturating_sub(2);
    upper[..keep].iter().chain(['.', '.'].iter()).collect()
}

fn draw_text_centered(img: &mut RgbImage, text: &str, y: u32, scale: u32, color: Rgb<u8>) {
    let advance = (GLYPH_W + 1) * scale;
    let text_w = (text.chars().count() as u32 * advance).saturating_sub(scale);
    let mut x = img.width().saturating_sub(text_w) / 2;
    for c in text.chars() {
        draw_glyph(img, c, x, y, scale, color);
        x += advance;
    }
}

fn draw_glyph(img: &mut RgbImage, c: char, x: u32, y: u32, scale: u32, color: Rgb<u8>) {
    for (row, bits) in glyph(c).iter().enumerate() {
        for col in 0..GLYPH_W {
            if bits & (1 << (GLYPH_W - 1 - col)) != 0 {
                fill_rect(
                    img,
                    x + col * scale,
                    y + row as u32 * scale,
                    scale,
                    scale,
                    color,
                );
            }
        }
    }
}

fn draw_frame(img: &mut RgbImage, thickness: u32, color: Rgb<u8>) {
    let (w, h) = img.dimensions();
    fill_rect(img, 0, 0, w, thickness, color);
    fill_rect(img, 0, h.saturating_sub(thickness), w, thickness, color);
    fill_rect(img, 0, 0, thickness, h, color);
    fill_rect(img, w.saturating_sub(thickness), 0, thickness, h, color);
}

/// Fill a rectangle, clipped to the image.
fn fill_rect(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x_end = x.saturating_add(w).min(img.width());
    let y_end = y.saturating_add(h).min(img.height());
    for py in y.min(y_end)..y_end {
        for px in x.min(x_end)..x_end {
            img.put_pixel(px, py, color);
        }
    }
}

/// 5×7 glyph rows, most significant of the low five bits is the leftmost pixel.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '(' => [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02],
        ')' => [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08],
        ' ' => [0x00; 7],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}
