// src/handlers.rs
use std::collections::HashMap;
use std::io::{Cursor, Write};

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use futures::{StreamExt, TryStreamExt};
use qrcode::EcLevel;
use serde::{Deserialize, Serialize};
use serde_json::json;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Config;
use crate::error::ApiError;
use crate::qr::{self, OutputFormat, QrRequest, RenderedImage};

// Версии зависимостей для /health, синхронизированы с Cargo.toml
const DEPENDENCY_VERSIONS: [(&str, &str); 5] = [
    ("actix-web", "4.4"),
    ("qrcode", "0.14"),
    ("image", "0.24"),
    ("zip", "0.6"),
    ("base64", "0.21"),
];

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index))
        .route("/health", web::get().to(health))
        .route("/generate", web::get().to(generate_get))
        .route("/generate", web::post().to(generate_post))
        .route("/batch_generate", web::post().to(batch_generate))
        .route("/generate_with_logo", web::post().to(generate_with_logo))
        .route("/generate_artistic", web::post().to(generate_artistic));
}

#[derive(Serialize)]
struct ServerInfo {
    status: &'static str,
    message: &'static str,
    version: &'static str,
    health_check: &'static str,
    supported_formats: Vec<&'static str>,
}

async fn index() -> HttpResponse {
    HttpResponse::Ok().json(ServerInfo {
        status: "online",
        message: "QR Code Generator API is running",
        version: env!("CARGO_PKG_VERSION"),
        health_check: "/health",
        supported_formats: qr::SUPPORTED_FORMATS.to_vec(),
    })
}

async fn health(config: web::Data<Config>) -> Result<HttpResponse, ApiError> {
    // Самопроверка кодера
    qr::encode_symbol("test", Some(1), EcLevel::L)?;

    let dependencies: HashMap<&str, &str> = DEPENDENCY_VERSIONS.iter().copied().collect();

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "platform": format!("{} {}", std::env::consts::OS, std::env::consts::ARCH),
        "filesystem": {
            "data_dir": config.data_dir.display().to_string(),
            "data_dir_exists": config.data_dir.exists(),
            "write_test": config.write_test(),
        },
        "dependencies": dependencies,
    })))
}

#[derive(Debug, Deserialize)]
struct GenerateQuery {
    data: String,
    #[serde(default = "default_query_format")]
    format: String,
    filename: Option<String>,
    #[serde(default)]
    base64: bool,
}

fn default_query_format() -> String {
    "png".to_string()
}

// GET форма: стили фиксированы дефолтами
async fn generate_get(query: web::Query<GenerateQuery>) -> Result<HttpResponse, ApiError> {
    let q = query.into_inner();
    let req = QrRequest {
        data: q.data,
        format: q.format,
        filename: q.filename,
        base64: q.base64,
        ..QrRequest::default()
    };
    let rendered = qr::render(&req, None)?;
    Ok(shape_response(rendered, &req))
}

async fn generate_post(req: web::Json<QrRequest>) -> Result<HttpResponse, ApiError> {
    let req = req.into_inner();
    let rendered = qr::render(&req, None)?;
    Ok(shape_response(rendered, &req))
}

#[derive(Debug, Deserialize)]
struct BatchRequest {
    items: Vec<QrRequest>,
}

async fn batch_generate(req: web::Json<BatchRequest>) -> Result<HttpResponse, ApiError> {
    let items = req.into_inner().items;
    if items.is_empty() {
        return Err(ApiError::InvalidInput(
            "'items' must be a non-empty list of QR code requests.".to_string(),
        ));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut generated: usize = 0;
    let mut skipped: usize = 0;

    for (idx, item) in items.iter().enumerate() {
        // Невалидный элемент пропускаем, не роняя весь батч
        let rendered = match qr::render(item, None) {
            Ok(rendered) => rendered,
            Err(ApiError::InvalidInput(reason)) => {
                log::warn!("Skipping batch item {}: {}", idx + 1, reason);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let format = OutputFormat::parse(&item.format).unwrap_or(OutputFormat::Png);
        // Имя файла хранит исходную позицию, пропуски оставляют дыры
        let name = match &item.filename {
            Some(f) if !f.is_empty() => qr::download_name(f, format),
            _ => format!("qr_{}.{}", idx + 1, format.extension()),
        };
        writer.start_file(name, options)?;
        writer.write_all(&rendered.bytes)?;
        generated += 1;
    }

    let bytes = writer.finish()?.into_inner();
    log::info!("Batch archive: {} generated, {} skipped", generated, skipped);

    Ok(HttpResponse::Ok()
        .content_type("application/zip")
        .append_header(("Content-Disposition", "attachment; filename=qr_codes.zip"))
        .append_header(("x-generated-count", generated.to_string()))
        .append_header(("x-skipped-count", skipped.to_string()))
        .body(bytes))
}

async fn generate_with_logo(payload: Multipart) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload).await?;
    let req = QrRequest {
        data: form.text("data").unwrap_or_default(),
        box_size: form.parse_u32("box_size", 10)?,
        border: form.parse_u32("border", 4)?,
        fill_color: form.text_or("fill_color", "black"),
        back_color: form.text_or("back_color", "white"),
        version: Some(form.parse_i16("version", 1)?),
        // После наложения логотипа код должен оставаться сканируемым
        error_correction: "H".to_string(),
        format: form.text_or("format", "png"),
        filename: form.text("filename"),
        base64: form.parse_bool("base64", false)?,
    };
    let rendered = qr::render(&req, form.file("logo"))?;
    Ok(shape_response(rendered, &req))
}

async fn generate_artistic(payload: Multipart) -> Result<HttpResponse, ApiError> {
    let form = read_form(payload).await?;
    let rendered = qr::render_artistic(
        &form.text("data").unwrap_or_default(),
        &form.text_or("dark", "#000"),
        &form.text_or("light", "#fff"),
        form.parse_u32("border", 4)?,
        form.parse_u32("scale", 10)?,
        &form.text_or("error_correction", "L"),
        &form.text_or("format", "png"),
    )?;
    Ok(HttpResponse::Ok()
        .content_type(rendered.content_type)
        .body(rendered.bytes))
}

/// Либо сырые байты с media type и опциональным attachment-заголовком,
/// либо JSON конверт {base64, content_type}.
fn shape_response(rendered: RenderedImage, req: &QrRequest) -> HttpResponse {
    if req.base64 {
        let encoded = general_purpose::STANDARD.encode(&rendered.bytes);
        return HttpResponse::Ok().json(json!({
            "base64": encoded,
            "content_type": rendered.content_type,
        }));
    }

    let mut response = HttpResponse::Ok();
    response.content_type(rendered.content_type);
    if let Some(name) = req.filename.as_deref().filter(|n| !n.is_empty()) {
        let format = OutputFormat::parse(&req.format).unwrap_or(OutputFormat::Png);
        response.append_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", qr::download_name(name, format)),
        ));
    }
    response.body(rendered.bytes)
}

/// Собранные поля multipart формы. Текстовые и файловые части разделяются
/// по наличию filename в Content-Disposition.
#[derive(Default)]
struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
}

impl FormData {
    fn text(&self, name: &str) -> Option<String> {
        self.fields.get(name).cloned()
    }

    fn text_or(&self, name: &str, default: &str) -> String {
        self.fields
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    fn parse_u32(&self, name: &str, default: u32) -> Result<u32, ApiError> {
        match self.fields.get(name).map(|s| s.trim()) {
            None => Ok(default),
            Some("") => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                ApiError::Validation(format!("'{}' must be an integer, got '{}'", name, raw))
            }),
        }
    }

    fn parse_i16(&self, name: &str, default: i16) -> Result<i16, ApiError> {
        match self.fields.get(name).map(|s| s.trim()) {
            None => Ok(default),
            Some("") => Ok(default),
            Some(raw) => raw.parse().map_err(|_| {
                ApiError::Validation(format!("'{}' must be an integer, got '{}'", name, raw))
            }),
        }
    }

    fn parse_bool(&self, name: &str, default: bool) -> Result<bool, ApiError> {
        match self
            .fields
            .get(name)
            .map(|s| s.trim().to_ascii_lowercase())
            .as_deref()
        {
            None => Ok(default),
            Some("") => Ok(default),
            Some("1") | Some("true") | Some("on") | Some("yes") => Ok(true),
            Some("0") | Some("false") | Some("off") | Some("no") => Ok(false),
            Some(raw) => Err(ApiError::Validation(format!(
                "'{}' must be a boolean, got '{}'",
                name, raw
            ))),
        }
    }

    /// Пустая файловая часть (браузер без выбранного файла) — не файл.
    fn file(&self, name: &str) -> Option<&[u8]> {
        self.files
            .get(name)
            .filter(|b| !b.is_empty())
            .map(|b| b.as_slice())
    }
}

async fn read_form(mut payload: Multipart) -> Result<FormData, ApiError> {
    let mut form = FormData::default();
    while let Some(mut field) = payload.try_next().await.map_err(multipart_error)? {
        let (name, is_file) = {
            let disposition = field.content_disposition();
            (
                disposition.get_name().unwrap_or("").to_string(),
                disposition.get_filename().is_some(),
            )
        };
        let mut buf = Vec::new();
        while let Some(chunk) = field.next().await {
            buf.extend_from_slice(&chunk.map_err(multipart_error)?);
        }
        if is_file {
            form.files.insert(name, buf);
        } else {
            form.fields.insert(name, String::from_utf8_lossy(&buf).into_owned());
        }
    }
    Ok(form)
}

fn multipart_error(e: actix_multipart::MultipartError) -> ApiError {
    ApiError::Validation(format!("malformed multipart payload: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use image::{ImageBuffer, Rgba};

    fn test_config() -> Config {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
            },
            data_dir: std::env::temp_dir(),
        }
    }

    macro_rules! test_app {
        () => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new(test_config()))
                    .app_data(
                        web::JsonConfig::default().error_handler(crate::error::json_error_handler),
                    )
                    .app_data(
                        web::QueryConfig::default()
                            .error_handler(crate::error::query_error_handler),
                    )
                    .configure(configure),
            )
            .await
        };
    }

    const PNG_MAGIC: [u8; 4] = [0x89, 0x50, 0x4E, 0x47];

    fn multipart_payload(
        boundary: &str,
        fields: &[(&str, &str)],
        file: Option<(&str, &str, &[u8])>,
    ) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                    boundary, name, value
                )
                .as_bytes(),
            );
        }
        if let Some((name, filename, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    boundary, name, filename
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        body
    }

    #[actix_web::test]
    async fn index_reports_status() {
        let app = test_app!();
        let req = test::TestRequest::get().uri("/").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "online");
        assert_eq!(body["supported_formats"], json!(["png", "svg", "jpeg"]));
    }

    #[actix_web::test]
    async fn health_reports_filesystem_and_dependencies() {
        let app = test_app!();
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["filesystem"]["write_test"], "writable");
        assert_eq!(body["dependencies"]["qrcode"], "0.14");
        assert!(body["timestamp"].as_str().unwrap().contains('T'));
    }

    #[actix_web::test]
    async fn generate_get_returns_png() {
        let app = test_app!();
        let req = test::TestRequest::get().uri("/generate?data=hello").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "image/png"
        );
        let body = test::read_body(resp).await;
        assert_eq!(&body[..4], &PNG_MAGIC);
    }

    #[actix_web::test]
    async fn generate_get_empty_data_is_400() {
        let app = test_app!();
        let req = test::TestRequest::get().uri("/generate?data=").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("must not be empty"));
    }

    #[actix_web::test]
    async fn generate_get_unsupported_format_is_400() {
        let app = test_app!();
        let req = test::TestRequest::get()
            .uri("/generate?data=hello&format=bmp")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("png"));
    }

    #[actix_web::test]
    async fn generate_get_missing_data_is_422() {
        let app = test_app!();
        let req = test::TestRequest::get().uri("/generate").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_web::test]
    async fn base64_envelope_matches_raw_bytes() {
        let app = test_app!();

        let req = test::TestRequest::get().uri("/generate?data=hello").to_request();
        let raw = test::read_body(test::call_service(&app, req).await).await;

        let req = test::TestRequest::get()
            .uri("/generate?data=hello&base64=true")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["content_type"], "image/png");
        let decoded = general_purpose::STANDARD
            .decode(body["base64"].as_str().unwrap())
            .unwrap();
        assert_eq!(decoded, raw.to_vec());
    }

    #[actix_web::test]
    async fn generate_post_sets_attachment_filename() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/generate")
            .set_json(json!({ "data": "hello", "format": "png", "filename": "mycode" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-disposition").unwrap(),
            "attachment; filename=\"mycode.png\""
        );
    }

    #[actix_web::test]
    async fn generate_post_jpeg_and_svg() {
        let app = test_app!();

        let req = test::TestRequest::post()
            .uri("/generate")
            .set_json(json!({ "data": "hello", "format": "jpeg" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "image/jpeg"
        );
        let body = test::read_body(resp).await;
        assert_eq!(&body[..2], &[0xFF, 0xD8]);

        let req = test::TestRequest::post()
            .uri("/generate")
            .set_json(json!({ "data": "hello", "format": "svg" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "image/svg+xml"
        );
        let body = test::read_body(resp).await;
        assert!(body.starts_with(b"<?xml"));
    }

    #[actix_web::test]
    async fn generate_post_wrong_types_is_422() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/generate")
            .insert_header(("content-type", "application/json"))
            .set_payload(r#"{"data": "hello", "box_size": "big"}"#)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].is_string());
    }

    #[actix_web::test]
    async fn batch_skips_invalid_items_and_keeps_positions() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/batch_generate")
            .set_json(json!({ "items": [
                { "data": "first" },
                { "data": "" },
                { "data": "third", "filename": "third" }
            ] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "application/zip"
        );
        assert_eq!(resp.headers().get("x-generated-count").unwrap(), "2");
        assert_eq!(resp.headers().get("x-skipped-count").unwrap(), "1");

        let body = test::read_body(resp).await;
        let mut archive = zip::ZipArchive::new(Cursor::new(body.to_vec())).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["qr_1.png", "third.png"]);
    }

    #[actix_web::test]
    async fn batch_empty_items_is_400() {
        let app = test_app!();
        let req = test::TestRequest::post()
            .uri("/batch_generate")
            .set_json(json!({ "items": [] }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn logo_overlay_returns_png() {
        let app = test_app!();
        let logo = ImageBuffer::from_pixel(32, 32, Rgba([255, 0, 0, 255]));
        let logo_bytes = qr::encode_png(&logo).unwrap();
        let boundary = "qrtestboundary";
        let payload = multipart_payload(
            boundary,
            &[("data", "hello")],
            Some(("logo", "logo.png", &logo_bytes)),
        );
        let req = test::TestRequest::post()
            .uri("/generate_with_logo")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..4], &PNG_MAGIC);
    }

    #[actix_web::test]
    async fn logo_invalid_file_is_400() {
        let app = test_app!();
        let boundary = "qrtestboundary";
        let payload = multipart_payload(
            boundary,
            &[("data", "hello")],
            Some(("logo", "logo.png", b"not an image".as_slice())),
        );
        let req = test::TestRequest::post()
            .uri("/generate_with_logo")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Invalid logo image file.");
    }

    #[actix_web::test]
    async fn logo_svg_output_bypasses_overlay() {
        let app = test_app!();
        let logo = ImageBuffer::from_pixel(16, 16, Rgba([0, 255, 0, 255]));
        let logo_bytes = qr::encode_png(&logo).unwrap();
        let boundary = "qrtestboundary";
        let payload = multipart_payload(
            boundary,
            &[("data", "hello"), ("format", "svg")],
            Some(("logo", "logo.png", &logo_bytes)),
        );
        let req = test::TestRequest::post()
            .uri("/generate_with_logo")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get("content-type").unwrap(),
            "image/svg+xml"
        );
        let body = test::read_body(resp).await;
        assert!(body.starts_with(b"<?xml"));
    }

    #[actix_web::test]
    async fn artistic_renders_png_and_rejects_jpeg() {
        let app = test_app!();
        let boundary = "qrtestboundary";

        let payload = multipart_payload(
            boundary,
            &[("data", "hello"), ("dark", "#336699")],
            None,
        );
        let req = test::TestRequest::post()
            .uri("/generate_artistic")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        assert_eq!(&body[..4], &PNG_MAGIC);

        let payload = multipart_payload(
            boundary,
            &[("data", "hello"), ("format", "jpeg")],
            None,
        );
        let req = test::TestRequest::post()
            .uri("/generate_artistic")
            .insert_header((
                "content-type",
                format!("multipart/form-data; boundary={}", boundary),
            ))
            .set_payload(payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = test::read_body_json(resp).await;
        assert!(body["error"].as_str().unwrap().contains("PNG and SVG"));
    }
}
