use std::io::Cursor;

use ab_glyph::{FontRef, InvalidFont, PxScale};
use image::{DynamicImage, ImageError, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use thiserror::Error;

use crate::database::HussarRecord;
use crate::messages::format_minutes;

// monospaced and covers Cyrillic handles
static FONT_DATA: &[u8] = include_bytes!("../../assets/DejaVuSansMono.ttf");

const FONT_SIZE: f32 = 20.0;
const LINE_HEIGHT: u32 = 24;
const MARGIN: u32 = 16;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("bundled font is unusable: {0}")]
    Font(#[from] InvalidFont),
    #[error("encoding failed: {0}")]
    Image(#[from] ImageError),
}

/// Fixed-width lines: a header, a ruler, one row per hussar.
pub fn format_table(records: &[HussarRecord]) -> Vec<String> {
    let mut lines = vec![
        format!("{:>12} | {:>8} | {:>6} | {}", "time_in_club", "attempts", "deaths", "hussar"),
        "-".repeat(44),
    ];
    lines.extend(records.iter().map(|r| {
        format!(
            "{:>12} | {:>8} | {:>6} | {}",
            format_minutes(r.total_time_in_club / 60),
            r.shot_counter,
            r.dead_counter,
            r.meta.handle()
        )
    }));
    lines
}

fn rasterize(lines: &[String]) -> Result<RgbImage, RenderError> {
    let font = FontRef::try_from_slice(FONT_DATA)?;
    let scale = PxScale::from(FONT_SIZE);

    let width = lines
        .iter()
        .map(|l| text_size(scale, &font, l).0)
        .max()
        .unwrap_or(0)
        + 2 * MARGIN;
    let height = lines.len() as u32 * LINE_HEIGHT + 2 * MARGIN;

    let mut image = RgbImage::from_pixel(width.max(1), height.max(1), Rgb([255, 255, 255]));
    for (i, line) in lines.iter().enumerate() {
        let y = MARGIN + i as u32 * LINE_HEIGHT;
        draw_text_mut(&mut image, Rgb([0, 0, 0]), MARGIN as i32, y as i32, scale, &font, line);
    }
    Ok(image)
}

/// Renders `lines` black on white and encodes the result as PNG.
pub fn render_png(lines: &[String]) -> Result<Vec<u8>, RenderError> {
    let image = rasterize(lines)?;
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(bytes)
}
