use std::str::FromStr;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod transform;

pub use transform::{compress, convert, crop_rect, crop_round, encode, watermark, watermark_text};

/// Encodings the image endpoints can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Gif,
}

impl OutputFormat {
    /// Picks the encoder matching a file extension, with or without the dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::Webp),
            "gif" => Some(Self::Gif),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::Webp => "webp",
            Self::Gif => "gif",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    /// Accepts only the canonical names the convert endpoint advertises.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::Webp),
            "gif" => Ok(Self::Gif),
            _ => Err(anyhow::anyhow!("Unsupported format, choose jpeg, png, webp or gif")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressParams {
    pub quality: u8,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

impl Default for CompressParams {
    fn default() -> Self {
        Self { quality: 80, width: None, height: None }
    }
}

/// Where a watermark is anchored on the base image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gravity {
    NorthWest,
    Center,
    SouthEast,
    /// Offsets in percent of the base image size.
    Custom { x: f32, y: f32 },
}

impl Gravity {
    /// Unknown positions fall back to the bottom-right corner.
    pub fn parse(position: &str, pos_x: Option<f32>, pos_y: Option<f32>) -> Self {
        match position {
            "topLeft" => Self::NorthWest,
            "center" => Self::Center,
            "custom" => Self::Custom {
                x: pos_x.unwrap_or(50.0),
                y: pos_y.unwrap_or(50.0),
            },
            _ => Self::SouthEast,
        }
    }

    /// Top-left corner of an overlay of `mark` size placed on a `base` sized image.
    pub fn origin(&self, base: (u32, u32), mark: (u32, u32)) -> (i64, i64) {
        let (bw, bh) = (i64::from(base.0), i64::from(base.1));
        let (mw, mh) = (i64::from(mark.0), i64::from(mark.1));
        match *self {
            Self::NorthWest => (0, 0),
            Self::Center => ((bw - mw) / 2, (bh - mh) / 2),
            Self::SouthEast => (bw - mw, bh - mh),
            Self::Custom { x, y } => (
                (x.clamp(0.0, 100.0) / 100.0 * bw as f32).round() as i64,
                (y.clamp(0.0, 100.0) / 100.0 * bh as f32).round() as i64,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkParams {
    pub gravity: Gravity,
    /// 0.0 (invisible) to 1.0 (opaque).
    pub opacity: f32,
    /// Watermark width as a fraction of the base image width.
    pub scale: f32,
    pub quality: u8,
}

impl Default for WatermarkParams {
    fn default() -> Self {
        Self {
            gravity: Gravity::SouthEast,
            opacity: 0.5,
            scale: 0.3,
            quality: 90,
        }
    }
}

/// Parameters for a text watermark drawn with the bundled font.
#[derive(Debug, Clone, PartialEq)]
pub struct TextWatermarkParams {
    pub text: String,
    pub gravity: Gravity,
    /// 0.0 (invisible) to 1.0 (opaque).
    pub opacity: f32,
    /// Glyph height in pixels.
    pub font_size: f32,
    pub color: [u8; 3],
    pub quality: u8,
}

impl TextWatermarkParams {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            gravity: Gravity::SouthEast,
            opacity: 0.5,
            font_size: 24.0,
            color: [255, 255, 255],
            quality: 90,
        }
    }
}

/// Parses `#rgb` or `#rrggbb`, with or without the leading `#`.
pub fn parse_hex_color(value: &str) -> Option<[u8; 3]> {
    let hex = value.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).ok();
    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                rgb[i] = channel(&format!("{}{}", c, c))?;
            }
            Some(rgb)
        }
        6 => Some([channel(&hex[0..2])?, channel(&hex[2..4])?, channel(&hex[4..6])?]),
        _ => None,
    }
}

/// Runs a CPU-bound image operation off the async runtime.
pub async fn run_blocking<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| anyhow::anyhow!("image worker stopped: {}", e))?
}
