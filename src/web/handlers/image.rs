use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::imaging::{self, CompressParams, Gravity, OutputFormat, TextWatermarkParams, WatermarkParams};
use crate::web::error::ApiError;
use crate::web::upload::{UploadForm, UploadedFile, IMAGE_UPLOAD, WATERMARK_UPLOAD};
use crate::AppContext;

/// Public URL prefix of the processed directory.
pub const PROCESSED_URL_PREFIX: &str = "/uploads/processed";

const NO_IMAGE: &str = "No image was uploaded";

pub fn image_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/compress", post(compress_image))
        .route("/watermark", post(watermark_image))
        .route("/crop", post(crop_image))
        .route("/convert", post(convert_image))
        .layer(DefaultBodyLimit::max(
            IMAGE_UPLOAD.max_bytes + WATERMARK_UPLOAD.max_bytes + 1024 * 1024,
        ))
        .with_state(ctx)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompressResponse {
    success: bool,
    message: String,
    original_size: usize,
    compressed_size: usize,
    saving_percent: String,
    url: String,
}

#[derive(Debug, Serialize)]
struct ImageResponse {
    success: bool,
    message: String,
    url: String,
}

impl ImageResponse {
    fn new(message: &str, url: String) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
            url,
        })
    }
}

async fn compress_image(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<CompressResponse>, ApiError> {
    let mut form = UploadForm::parse(&mut multipart, &ctx.config.temp_dir(), &[("image", IMAGE_UPLOAD)]).await?;
    let image = form.take_file("image").ok_or_else(|| ApiError::BadRequest(NO_IMAGE.to_string()))?;

    let params = CompressParams {
        quality: form.parse_field("quality").unwrap_or(80),
        width: form.parse_field("width"),
        height: form.parse_field("height"),
    };
    let result = compress(&ctx, &image, params).await;
    image.discard().await;
    result
}

async fn compress(
    ctx: &AppContext,
    image: &UploadedFile,
    params: CompressParams,
) -> Result<Json<CompressResponse>, ApiError> {
    let bytes = image.read().await?;
    let extension = image.extension();
    let compressed = imaging::run_blocking(move || imaging::compress(&bytes, &extension, params))
        .await
        .map_err(|e| ApiError::internal("Image compression failed", e))?;

    let name = format!("compressed_{}", image.stored_name);
    let url = save_processed(ctx, &name, &compressed).await?;

    info!("Compressed {}: {} -> {} bytes", image.original_name, image.size, compressed.len());
    Ok(Json(CompressResponse {
        success: true,
        message: "Image compressed".to_string(),
        original_size: image.size,
        compressed_size: compressed.len(),
        saving_percent: saving_percent(image.size, compressed.len()),
        url,
    }))
}

/// What gets stamped onto the base image.
enum Mark<'a> {
    Image(&'a UploadedFile, WatermarkParams),
    Text(TextWatermarkParams),
    // nothing usable was sent; the original is stored as is
    Unchanged,
}

async fn watermark_image(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, ApiError> {
    let mut form = UploadForm::parse(
        &mut multipart,
        &ctx.config.temp_dir(),
        &[("image", WATERMARK_UPLOAD), ("watermarkImage", WATERMARK_UPLOAD)],
    )
    .await?;
    let Some(image) = form.take_file("image") else {
        form.discard().await;
        return Err(ApiError::BadRequest(NO_IMAGE.to_string()));
    };
    let mark_file = form.take_file("watermarkImage");

    let gravity = Gravity::parse(
        form.field("position").unwrap_or("bottomRight"),
        form.parse_field("posX"),
        form.parse_field("posY"),
    );
    let opacity = form.parse_field::<f32>("opacity").unwrap_or(50.0) / 100.0;

    let mark = match (form.field("type"), form.field("text"), mark_file.as_ref()) {
        (Some("text"), Some(text), _) => Mark::Text(TextWatermarkParams {
            gravity,
            opacity,
            font_size: form.parse_field("fontSize").unwrap_or(24.0),
            color: form
                .field("color")
                .and_then(imaging::parse_hex_color)
                .unwrap_or([255, 255, 255]),
            ..TextWatermarkParams::new(text)
        }),
        (Some("image"), _, Some(file)) => Mark::Image(
            file,
            WatermarkParams {
                gravity,
                opacity,
                scale: form.parse_field::<f32>("imageSize").unwrap_or(30.0) / 100.0,
                ..WatermarkParams::default()
            },
        ),
        _ => Mark::Unchanged,
    };

    let result = watermark(&ctx, &image, mark).await;
    image.discard().await;
    if let Some(file) = mark_file {
        file.discard().await;
    }
    result
}

async fn watermark(ctx: &AppContext, image: &UploadedFile, mark: Mark<'_>) -> Result<Json<ImageResponse>, ApiError> {
    let bytes = image.read().await?;
    let extension = image.extension();
    let name = format!("watermark_{}", image.stored_name);

    let output = match mark {
        Mark::Image(file, params) => {
            let mark_bytes = file.read().await?;
            imaging::run_blocking(move || imaging::watermark(&bytes, &extension, &mark_bytes, params))
                .await
                .map_err(|e| ApiError::internal("Adding the watermark failed", e))?
        }
        Mark::Text(params) => {
            imaging::run_blocking(move || imaging::watermark_text(&bytes, &extension, &params))
                .await
                .map_err(|e| ApiError::internal("Adding the watermark failed", e))?
        }
        Mark::Unchanged => {
            debug!("No usable watermark for {}, storing the image unchanged", image.original_name);
            bytes
        }
    };

    let url = save_processed(ctx, &name, &output).await?;
    Ok(ImageResponse::new("Watermark added", url))
}

async fn crop_image(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, ApiError> {
    let mut form = UploadForm::parse(&mut multipart, &ctx.config.temp_dir(), &[("image", IMAGE_UPLOAD)]).await?;
    let image = form.take_file("image").ok_or_else(|| ApiError::BadRequest(NO_IMAGE.to_string()))?;

    let round = form.field("round") == Some("true");
    let area = match (
        form.parse_field::<u32>("x"),
        form.parse_field::<u32>("y"),
        form.parse_field::<u32>("width"),
        form.parse_field::<u32>("height"),
    ) {
        (Some(x), Some(y), Some(w), Some(h)) => Some((x, y, w, h)),
        _ => None,
    };

    let result = crop(&ctx, &image, round, area).await;
    image.discard().await;
    result
}

async fn crop(
    ctx: &AppContext,
    image: &UploadedFile,
    round: bool,
    area: Option<(u32, u32, u32, u32)>,
) -> Result<Json<ImageResponse>, ApiError> {
    let bytes = image.read().await?;
    let extension = image.extension();

    let (name, output) = if round {
        let stem = Path::new(&image.stored_name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let output = imaging::run_blocking(move || imaging::crop_round(&bytes))
            .await
            .map_err(|e| ApiError::internal("Image cropping failed", e))?;
        (format!("cropped_{}.png", stem), output)
    } else if let Some((x, y, w, h)) = area {
        let output = imaging::run_blocking(move || imaging::crop_rect(&bytes, &extension, x, y, w, h))
            .await
            .map_err(|e| ApiError::internal("Image cropping failed", e))?;
        (format!("cropped_{}", image.stored_name), output)
    } else {
        // already cropped by the client
        (format!("cropped_{}", image.stored_name), bytes)
    };

    let url = save_processed(ctx, &name, &output).await?;
    Ok(ImageResponse::new("Image cropped", url))
}

async fn convert_image(
    State(ctx): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> Result<Json<ImageResponse>, ApiError> {
    let mut form = UploadForm::parse(&mut multipart, &ctx.config.temp_dir(), &[("image", IMAGE_UPLOAD)]).await?;
    let image = form.take_file("image").ok_or_else(|| ApiError::BadRequest(NO_IMAGE.to_string()))?;

    let format = match form.field("format").map(str::parse::<OutputFormat>) {
        Some(Ok(format)) => format,
        Some(Err(e)) => {
            image.discard().await;
            return Err(ApiError::BadRequest(e.to_string()));
        }
        None => {
            image.discard().await;
            return Err(ApiError::BadRequest(
                "Unsupported format, choose jpeg, png, webp or gif".to_string(),
            ));
        }
    };
    let quality = form.parse_field("quality").unwrap_or(80);

    let result = convert(&ctx, &image, format, quality).await;
    image.discard().await;
    result
}

async fn convert(
    ctx: &AppContext,
    image: &UploadedFile,
    format: OutputFormat,
    quality: u8,
) -> Result<Json<ImageResponse>, ApiError> {
    let bytes = image.read().await?;
    let output = imaging::run_blocking(move || imaging::convert(&bytes, format, quality))
        .await
        .map_err(|e| ApiError::internal("Image conversion failed", e))?;

    let stem = Path::new(&image.stored_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = format!("converted_{}.{}", stem, format.extension());
    let url = save_processed(ctx, &name, &output).await?;
    Ok(ImageResponse::new("Image converted", url))
}

/// Writes a result into the processed directory and returns its public URL.
async fn save_processed(ctx: &AppContext, name: &str, bytes: &[u8]) -> Result<String, ApiError> {
    let dir = ctx.config.processed_dir();
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::internal("Failed to store the processed image", e))?;
    tokio::fs::write(dir.join(name), bytes)
        .await
        .map_err(|e| ApiError::internal("Failed to store the processed image", e))?;
    Ok(format!("{}/{}", PROCESSED_URL_PREFIX, name))
}

/// `(original - compressed) / original` in percent with two decimals. May be negative.
fn saving_percent(original: usize, compressed: usize) -> String {
    if original == 0 {
        return "0.00".to_string();
    }
    let saved = (original as f64 - compressed as f64) / original as f64 * 100.0;
    format!("{:.2}", saved)
}
