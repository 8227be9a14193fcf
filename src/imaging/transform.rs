use std::io::Cursor;
use ab_glyph::{Font, FontRef, PxScale, ScaleFont};
use anyhow::Result;
use image::codecs::gif::GifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, Frame, GenericImageView, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use tracing::debug;

use super::{CompressParams, OutputFormat, TextWatermarkParams, WatermarkParams};

static WATERMARK_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans-Bold.ttf");

/// Encodes `img` as `format`. `quality` only affects JPEG; WebP output is lossless.
pub fn encode(img: &DynamicImage, format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    match format {
        OutputFormat::Jpeg => {
            // jpeg has no alpha channel
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(encoder)?;
        }
        OutputFormat::Png => {
            let encoder = PngEncoder::new_with_quality(&mut buf, CompressionType::Best, PngFilter::Adaptive);
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)?;
        }
        OutputFormat::Webp => {
            let encoder = WebPEncoder::new_lossless(&mut buf);
            DynamicImage::ImageRgba8(img.to_rgba8()).write_with_encoder(encoder)?;
        }
        OutputFormat::Gif => {
            let mut encoder = GifEncoder::new(&mut buf);
            encoder.encode_frame(Frame::new(img.to_rgba8()))?;
        }
    }
    Ok(buf.into_inner())
}

/// Shrinks to fit `width` x `height` keeping the aspect ratio. Never enlarges.
fn fit_within(img: DynamicImage, width: Option<u32>, height: Option<u32>) -> DynamicImage {
    let (w, h) = img.dimensions();
    let max_w = width.filter(|v| *v > 0).unwrap_or(w).min(w);
    let max_h = height.filter(|v| *v > 0).unwrap_or(h).min(h);
    if max_w == w && max_h == h {
        return img;
    }
    img.resize(max_w, max_h, FilterType::Lanczos3)
}

/// Re-encodes an upload as JPEG, PNG or WebP following its extension. Anything
/// else, GIF included, becomes JPEG.
pub fn compress(bytes: &[u8], extension: &str, params: CompressParams) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let img = fit_within(img, params.width, params.height);
    let format = match OutputFormat::from_extension(extension) {
        Some(OutputFormat::Gif) | None => OutputFormat::Jpeg,
        Some(format) => format,
    };
    debug!("Compressing {}x{} image as {:?}", img.width(), img.height(), format);
    encode(&img, format, params.quality)
}

pub fn convert(bytes: &[u8], format: OutputFormat, quality: u8) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    encode(&img, format, quality)
}

/// Overlays `mark`, scaled relative to the base width, with reduced opacity.
pub fn watermark(base: &[u8], extension: &str, mark: &[u8], params: WatermarkParams) -> Result<Vec<u8>> {
    let mut canvas = image::load_from_memory(base)?.to_rgba8();
    let mark = image::load_from_memory(mark)?;

    let target_w = (canvas.width() as f32 * params.scale.clamp(0.01, 1.0)).round().max(1.0) as u32;
    let target_h = (mark.height() as f32 * target_w as f32 / mark.width().max(1) as f32)
        .round()
        .max(1.0) as u32;
    let mut mark = mark.resize_exact(target_w, target_h, FilterType::Lanczos3).to_rgba8();

    let opacity = params.opacity.clamp(0.0, 1.0);
    for pixel in mark.pixels_mut() {
        pixel[3] = (f32::from(pixel[3]) * opacity).round() as u8;
    }

    let (x, y) = params.gravity.origin(canvas.dimensions(), mark.dimensions());
    imageops::overlay(&mut canvas, &mark, x, y);

    let format = OutputFormat::from_extension(extension).unwrap_or(OutputFormat::Jpeg);
    encode(&DynamicImage::ImageRgba8(canvas), format, params.quality)
}

/// Draws `params.text` with the bundled bold font, tinted and faded by opacity.
pub fn watermark_text(base: &[u8], extension: &str, params: &TextWatermarkParams) -> Result<Vec<u8>> {
    let font = FontRef::try_from_slice(WATERMARK_FONT)?;
    let mut canvas = image::load_from_memory(base)?.to_rgba8();

    let scale = PxScale::from(params.font_size.clamp(4.0, 512.0));
    let (text_w, _) = text_size(scale, &font, &params.text);
    let line_h = font.as_scaled(scale).height().ceil() as u32;

    // coverage mask first, then colour it so glyph edges keep the text colour
    let mut mask = GrayImage::new(text_w.max(1) + 2, line_h.max(1));
    draw_text_mut(&mut mask, Luma([255u8]), 0, 0, scale, &font, &params.text);

    let opacity = params.opacity.clamp(0.0, 1.0);
    let [r, g, b] = params.color;
    let layer = RgbaImage::from_fn(mask.width(), mask.height(), |x, y| {
        let coverage = f32::from(mask.get_pixel(x, y)[0]);
        Rgba([r, g, b, (coverage * opacity).round() as u8])
    });

    let (x, y) = params.gravity.origin(canvas.dimensions(), layer.dimensions());
    debug!("Drawing {}x{} text watermark at ({}, {})", layer.width(), layer.height(), x, y);
    imageops::overlay(&mut canvas, &layer, x, y);

    let format = OutputFormat::from_extension(extension).unwrap_or(OutputFormat::Jpeg);
    encode(&DynamicImage::ImageRgba8(canvas), format, params.quality)
}

/// Cuts the centred square and masks everything outside its inscribed circle.
/// Always PNG so the corners stay transparent.
pub fn crop_round(bytes: &[u8]) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    let size = w.min(h);
    let mut square = img.crop_imm((w - size) / 2, (h - size) / 2, size, size).to_rgba8();

    let radius = size as f32 / 2.0;
    for (x, y, pixel) in square.enumerate_pixels_mut() {
        let dx = x as f32 + 0.5 - radius;
        let dy = y as f32 + 0.5 - radius;
        if dx * dx + dy * dy > radius * radius {
            pixel[3] = 0;
        }
    }

    encode(&DynamicImage::ImageRgba8(square), OutputFormat::Png, 100)
}

/// Cuts a rectangle, clamped to the image bounds.
pub fn crop_rect(bytes: &[u8], extension: &str, x: u32, y: u32, width: u32, height: u32) -> Result<Vec<u8>> {
    let img = image::load_from_memory(bytes)?;
    let (w, h) = img.dimensions();
    if x >= w || y >= h || width == 0 || height == 0 {
        return Err(anyhow::anyhow!("Crop area lies outside the image ({}x{})", w, h));
    }
    let cropped = img.crop_imm(x, y, width.min(w - x), height.min(h - y));
    let format = OutputFormat::from_extension(extension).unwrap_or(OutputFormat::Jpeg);
    encode(&cropped, format, 95)
}
