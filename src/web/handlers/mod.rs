use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use crate::AppContext;

pub mod file;
pub mod image;

pub fn router(ctx: Arc<AppContext>) -> Router {
    let processed_dir = ctx.config.processed_dir();

    Router::new()
        .nest("/api/file", file::file_router(ctx.clone()))
        .nest("/api/image", image::image_router(ctx))
        .nest_service(image::PROCESSED_URL_PREFIX, ServeDir::new(processed_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::schedule::SimulatedConverter;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "online-tools-test-boundary";
    const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

    #[derive(Default)]
    struct MultipartBody {
        bytes: Vec<u8>,
    }

    impl MultipartBody {
        fn text(mut self, name: &str, value: &str) -> Self {
            self.bytes.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    BOUNDARY, name, value
                )
                .as_bytes(),
            );
            self
        }

        fn file(mut self, name: &str, file_name: &str, content_type: &str, data: &[u8]) -> Self {
            self.bytes.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    BOUNDARY, name, file_name, content_type
                )
                .as_bytes(),
            );
            self.bytes.extend_from_slice(data);
            self.bytes.extend_from_slice(b"\r\n");
            self
        }

        fn into_request(mut self, uri: &str) -> Request<Body> {
            self.bytes.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(self.bytes))
                .unwrap()
        }
    }

    struct TestApp {
        _dir: TempDir,
        ctx: Arc<AppContext>,
        app: Router,
    }

    impl TestApp {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = AppConfig {
                upload_dir: dir.path().join("uploads"),
                log_dir: dir.path().join("logs"),
                ..AppConfig::default()
            };
            config.ensure_dirs().unwrap();
            let converter = SimulatedConverter::new(config.processed_dir())
                .with_timing(Duration::from_millis(5), Duration::from_millis(50));
            let ctx = Arc::new(AppContext::with_processor(config, Arc::new(converter)));
            let app = router(ctx.clone());
            Self { _dir: dir, ctx, app }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = response.into_body().collect().await.unwrap().to_bytes().to_vec();
            (status, headers, body)
        }

        async fn get(&self, uri: &str) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
            self.send(Request::builder().uri(uri).body(Body::empty()).unwrap()).await
        }

        async fn json(&self, request: Request<Body>) -> (StatusCode, Value) {
            let (status, _, body) = self.send(request).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        fn temp_files(&self) -> usize {
            std::fs::read_dir(self.ctx.config.temp_dir()).unwrap().count()
        }
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = ::image::DynamicImage::ImageRgb8(::image::RgbImage::from_pixel(
            width,
            height,
            ::image::Rgb([40, 120, 200]),
        ));
        crate::imaging::encode(&img, crate::imaging::OutputFormat::Png, 100).unwrap()
    }

    #[tokio::test]
    async fn test_convert_without_file_is_rejected() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .text("targetFormat", "pdf")
            .into_request("/api/file/convert");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "No file was uploaded");
    }

    #[tokio::test]
    async fn test_convert_without_format_discards_upload() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("file", "report.docx", DOCX, b"document")
            .into_request("/api/file/convert");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Target format is required");
        assert_eq!(app.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_convert_rejects_unsupported_type() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("file", "tool.exe", "application/x-msdownload", b"MZ")
            .text("targetFormat", "pdf")
            .into_request("/api/file/convert");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().starts_with("Unsupported file type"));
        assert_eq!(app.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_unknown_task_status_is_not_found() {
        let app = TestApp::new();
        let (status, _, body) = app.get("/api/file/status/task-missing").await;
        let body: Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Conversion task not found");
    }

    #[tokio::test]
    async fn test_download_rejects_traversal_and_missing_files() {
        let app = TestApp::new();

        let (status, _, _) = app.get("/api/file/download/..%2F..%2Fetc%2Fpasswd").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _, _) = app.get("/api/file/download/nothing-here.txt").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_convert_status_download_flow() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("file", "report.docx", DOCX, b"document body")
            .text("targetFormat", "txt")
            .into_request("/api/file/convert");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        let task_id = body["taskId"].as_str().unwrap().to_string();
        assert!(task_id.starts_with("task-"));

        let mut last = Value::Null;
        for _ in 0..200 {
            let (_, _, body) = app.get(&format!("/api/file/status/{}", task_id)).await;
            last = serde_json::from_slice(&body).unwrap();
            if last["status"] != "processing" {
                break;
            }
            assert!(last.get("downloadUrl").is_none());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last["status"], "completed");
        assert_eq!(last["progress"], 100);
        assert!(last.get("error").is_none());

        let url = last["downloadUrl"].as_str().unwrap();
        assert!(url.starts_with("/api/file/download/"));
        let (status, headers, bytes) = app.get(url).await;
        assert_eq!(status, StatusCode::OK);
        let disposition = headers[header::CONTENT_DISPOSITION].to_str().unwrap();
        assert!(disposition.contains("filename=\"report.txt\""));
        assert!(String::from_utf8(bytes).unwrap().starts_with("This is a simulated text conversion."));
        assert_eq!(app.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_image_convert_is_served_statically() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("image", "photo.png", "image/png", &png_bytes(12, 8))
            .text("format", "webp")
            .into_request("/api/image/convert");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::OK);
        let url = body["url"].as_str().unwrap();
        assert!(url.starts_with("/uploads/processed/converted_"));
        assert!(url.ends_with(".webp"));

        let (status, _, bytes) = app.get(url).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(::image::guess_format(&bytes).unwrap(), ::image::ImageFormat::WebP);
        assert_eq!(app.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_image_convert_rejects_unknown_format() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("image", "photo.png", "image/png", &png_bytes(4, 4))
            .text("format", "tiff")
            .into_request("/api/image/convert");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Unsupported format, choose jpeg, png, webp or gif");
    }

    #[tokio::test]
    async fn test_image_compress_reports_sizes() {
        let app = TestApp::new();
        let original = png_bytes(64, 32);
        let request = MultipartBody::default()
            .file("image", "banner.png", "image/png", &original)
            .text("width", "32")
            .into_request("/api/image/compress");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["originalSize"], original.len());
        assert!(body["compressedSize"].as_u64().unwrap() > 0);
        assert!(body["savingPercent"].as_str().unwrap().contains('.'));
        assert!(body["url"].as_str().unwrap().starts_with("/uploads/processed/compressed_"));
    }

    #[tokio::test]
    async fn test_image_round_crop_outputs_png() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("image", "avatar.png", "image/png", &png_bytes(30, 20))
            .text("round", "true")
            .into_request("/api/image/crop");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::OK);
        let url = body["url"].as_str().unwrap();
        assert!(url.ends_with(".png"));

        let (_, _, bytes) = app.get(url).await;
        let img = ::image::load_from_memory(&bytes).unwrap();
        assert_eq!((img.width(), img.height()), (20, 20));
    }

    #[tokio::test]
    async fn test_text_watermark_is_drawn() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .file("image", "photo.png", "image/png", &png_bytes(120, 60))
            .text("type", "text")
            .text("text", "TOOLS")
            .text("position", "topLeft")
            .text("opacity", "100")
            .text("fontSize", "20")
            .text("color", "#ff0")
            .into_request("/api/image/watermark");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::OK);
        let (_, _, bytes) = app.get(body["url"].as_str().unwrap()).await;
        let img = ::image::load_from_memory(&bytes).unwrap().to_rgba8();

        let touched: Vec<_> = img
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0 != [40, 120, 200, 255])
            .collect();
        assert!(!touched.is_empty());
        assert!(touched.iter().all(|(_, y, _)| *y < 30));
        assert!(touched.iter().any(|(_, _, p)| p.0 == [255, 255, 0, 255]));
    }

    #[tokio::test]
    async fn test_watermark_without_mark_keeps_original() {
        let app = TestApp::new();
        let original = png_bytes(10, 10);
        let request = MultipartBody::default()
            .file("image", "photo.png", "image/png", &original)
            .text("type", "image")
            .into_request("/api/image/watermark");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::OK);
        let (_, _, bytes) = app.get(body["url"].as_str().unwrap()).await;
        assert_eq!(bytes, original);
    }

    #[tokio::test]
    async fn test_watermark_base_image_is_capped_at_two_megabytes() {
        let app = TestApp::new();
        let oversized = vec![0u8; 2 * 1024 * 1024 + 1];
        let request = MultipartBody::default()
            .file("image", "huge.png", "image/png", &oversized)
            .text("type", "text")
            .text("text", "x")
            .into_request("/api/image/watermark");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["success"], false);
        assert_eq!(app.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_image_is_rejected() {
        let app = TestApp::new();
        let request = MultipartBody::default()
            .text("quality", "50")
            .into_request("/api/image/compress");

        let (status, body) = app.json(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No image was uploaded");
    }
}
