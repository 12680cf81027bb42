// src/qr.rs
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, DynamicImage, ImageBuffer, ImageEncoder, Rgba, RgbaImage};
use qrcode::types::QrError;
use qrcode::{EcLevel, QrCode, Version};
use serde::Deserialize;

use crate::error::ApiError;

pub const SUPPORTED_FORMATS: [&str; 3] = ["png", "svg", "jpeg"];

/// Параметры одного QR кода. Общая форма для всех эндпоинтов генерации.
#[derive(Debug, Clone, Deserialize)]
pub struct QrRequest {
    pub data: String,
    #[serde(default = "default_box_size")]
    pub box_size: u32,
    #[serde(default = "default_border")]
    pub border: u32,
    #[serde(default = "default_fill_color")]
    pub fill_color: String,
    #[serde(default = "default_back_color")]
    pub back_color: String,
    // null => кодер сам подбирает минимальную версию
    #[serde(default = "default_version")]
    pub version: Option<i16>,
    #[serde(default = "default_error_correction")]
    pub error_correction: String,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub base64: bool,
}

fn default_box_size() -> u32 {
    10
}

fn default_border() -> u32 {
    4
}

fn default_fill_color() -> String {
    "black".to_string()
}

fn default_back_color() -> String {
    "white".to_string()
}

fn default_version() -> Option<i16> {
    Some(1)
}

fn default_error_correction() -> String {
    "L".to_string()
}

fn default_format() -> String {
    "png".to_string()
}

impl Default for QrRequest {
    fn default() -> Self {
        Self {
            data: String::new(),
            box_size: default_box_size(),
            border: default_border(),
            fill_color: default_fill_color(),
            back_color: default_back_color(),
            version: default_version(),
            error_correction: default_error_correction(),
            format: default_format(),
            filename: None,
            base64: false,
        }
    }
}

/// Готовое изображение: байты + media type. Живет в пределах одного запроса.
#[derive(Debug)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Svg,
    Jpeg,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Some(OutputFormat::Png),
            "svg" => Some(OutputFormat::Svg),
            "jpeg" => Some(OutputFormat::Jpeg),
            _ => None,
        }
    }

    pub fn media_type(self) -> &'static str {
        match self {
            OutputFormat::Png => "image/png",
            OutputFormat::Svg => "image/svg+xml",
            OutputFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

/// Неизвестные буквы откатываются на L — поведение исходного API.
pub fn ec_level(letter: &str) -> EcLevel {
    match letter.to_ascii_uppercase().as_str() {
        "M" => EcLevel::M,
        "Q" => EcLevel::Q,
        "H" => EcLevel::H,
        _ => EcLevel::L,
    }
}

pub fn ec_level_strict(letter: &str) -> Result<EcLevel, ApiError> {
    match letter.to_ascii_uppercase().as_str() {
        "L" => Ok(EcLevel::L),
        "M" => Ok(EcLevel::M),
        "Q" => Ok(EcLevel::Q),
        "H" => Ok(EcLevel::H),
        other => Err(ApiError::InvalidInput(format!(
            "Failed to generate QR code: unknown error correction level '{}'",
            other
        ))),
    }
}

/// Цвет по имени или в hex (#rgb, #rgba, #rrggbb, #rrggbbaa).
pub fn parse_color(spec: &str) -> Result<Rgba<u8>, ApiError> {
    let s = spec.trim();
    if let Some(hex) = s.strip_prefix('#') {
        return parse_hex(hex).ok_or_else(|| invalid_color(spec));
    }
    let rgb = match s.to_ascii_lowercase().as_str() {
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "red" => [255, 0, 0],
        "green" => [0, 128, 0],
        "blue" => [0, 0, 255],
        "yellow" => [255, 255, 0],
        "cyan" => [0, 255, 255],
        "magenta" => [255, 0, 255],
        "gray" | "grey" => [128, 128, 128],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        _ => return Err(invalid_color(spec)),
    };
    Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

fn invalid_color(spec: &str) -> ApiError {
    ApiError::InvalidInput(format!("Unrecognized color '{}'", spec))
}

fn parse_hex(hex: &str) -> Option<Rgba<u8>> {
    if !hex.is_ascii() {
        return None;
    }
    let channels: Vec<u8> = match hex.len() {
        3 | 4 => hex
            .chars()
            .map(|c| c.to_digit(16).map(|d| (d * 17) as u8))
            .collect::<Option<_>>()?,
        6 | 8 => (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).ok())
            .collect::<Option<_>>()?,
        _ => return None,
    };
    let alpha = if channels.len() == 4 { channels[3] } else { 255 };
    Some(Rgba([channels[0], channels[1], channels[2], alpha]))
}

/// Кодирует строку в QR символ. Если данные не помещаются в запрошенную
/// версию, кодер подбирает минимальную подходящую (auto-fit вверх).
pub fn encode_symbol(data: &str, version: Option<i16>, ec: EcLevel) -> Result<QrCode, QrError> {
    match version {
        Some(v) => match QrCode::with_version(data, Version::Normal(v), ec) {
            Err(QrError::DataTooLong) => QrCode::with_error_correction_level(data, ec),
            other => other,
        },
        None => QrCode::with_error_correction_level(data, ec),
    }
}

/// Растровый рендер: каждый темный модуль — квадрат box_size пикселей,
/// тихая зона в border модулей со всех сторон.
pub fn render_raster(
    code: &QrCode,
    box_size: u32,
    border: u32,
    fill: Rgba<u8>,
    back: Rgba<u8>,
) -> RgbaImage {
    let modules = code.width() as u32;
    let img_size = (modules + 2 * border) * box_size;
    let mut img: RgbaImage = ImageBuffer::from_pixel(img_size, img_size, back);

    for y in 0..modules {
        for x in 0..modules {
            if code[(x as usize, y as usize)] == qrcode::Color::Dark {
                for dy in 0..box_size {
                    for dx in 0..box_size {
                        let px = (border + x) * box_size + dx;
                        let py = (border + y) * box_size + dy;
                        img.put_pixel(px, py, fill);
                    }
                }
            }
        }
    }

    img
}

/// Векторный рендер того же символа: единичный квадрат на модуль,
/// viewBox в модулях, width/height в пикселях.
pub fn render_svg(code: &QrCode, box_size: u32, border: u32, dark: &str, light: &str) -> String {
    let modules = code.width() as u32;
    let dimension = modules + 2 * border;
    let pixels = dimension * box_size;
    let mut result = String::new();
    result += "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n";
    result += &format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" version=\"1.1\" width=\"{1}\" height=\"{1}\" viewBox=\"0 0 {0} {0}\" stroke=\"none\">\n",
        dimension, pixels
    );
    result += &format!("\t<rect width=\"100%\" height=\"100%\" fill=\"{}\"/>\n", light);
    result += "\t<path d=\"";
    let mut first = true;
    for y in 0..modules {
        for x in 0..modules {
            if code[(x as usize, y as usize)] == qrcode::Color::Dark {
                if !first {
                    result += " ";
                }
                first = false;
                result += &format!("M{},{}h1v1h-1z", x + border, y + border);
            }
        }
    }
    result += &format!("\" fill=\"{}\"/>\n", dark);
    result += "</svg>\n";
    result
}

/// Накладывает логотип по центру: 1/6 короткой стороны, Lanczos,
/// альфа логотипа учитывается при смешивании.
pub fn overlay_logo(img: &mut RgbaImage, logo_bytes: &[u8]) -> Result<(), ApiError> {
    let logo = image::load_from_memory(logo_bytes)
        .map_err(|_| ApiError::InvalidInput("Invalid logo image file.".to_string()))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    let logo_size = width.min(height) / 6;
    if logo_size == 0 {
        return Ok(());
    }
    let logo = imageops::resize(&logo, logo_size, logo_size, FilterType::Lanczos3);
    let x = ((width - logo_size) / 2) as i64;
    let y = ((height - logo_size) / 2) as i64;
    imageops::overlay(img, &logo, x, y);
    Ok(())
}

pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ColorType::Rgba8,
    )?;
    Ok(bytes)
}

pub fn encode_jpeg(img: RgbaImage) -> Result<Vec<u8>, ApiError> {
    // JPEG не умеет альфу — сплющиваем в RGB перед кодированием
    let rgb = DynamicImage::ImageRgba8(img).to_rgb8();
    let mut bytes = Vec::new();
    let mut encoder = JpegEncoder::new(&mut bytes);
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
    Ok(bytes)
}

/// Проверка запроса до любой работы кодера. Возвращает разобранный формат.
pub fn validate(req: &QrRequest) -> Result<OutputFormat, ApiError> {
    if req.data.is_empty() {
        return Err(ApiError::InvalidInput("'data' must not be empty.".to_string()));
    }
    let format = OutputFormat::parse(&req.format).ok_or_else(|| {
        ApiError::InvalidInput(format!(
            "Unsupported format '{}'. Supported formats: {}.",
            req.format,
            SUPPORTED_FORMATS.join(", ")
        ))
    })?;
    if req.box_size == 0 {
        return Err(ApiError::InvalidInput(
            "'box_size' must be a positive integer.".to_string(),
        ));
    }
    if let Some(v) = req.version {
        if !(1..=40).contains(&v) {
            return Err(ApiError::InvalidInput(
                "'version' must be between 1 and 40.".to_string(),
            ));
        }
    }
    Ok(format)
}

/// Общий конвейер: валидация → символ → рендер → (логотип) → сериализация.
/// Логотип применяется только к растровым форматам; SVG рендерится из
/// голого символа заново.
pub fn render(req: &QrRequest, logo: Option<&[u8]>) -> Result<RenderedImage, ApiError> {
    let format = validate(req)?;
    let ec = ec_level(&req.error_correction);
    let code = encode_symbol(&req.data, req.version, ec)?;

    match format {
        OutputFormat::Svg => {
            parse_color(&req.fill_color)?;
            parse_color(&req.back_color)?;
            let svg = render_svg(&code, req.box_size, req.border, &req.fill_color, &req.back_color);
            Ok(RenderedImage {
                bytes: svg.into_bytes(),
                content_type: format.media_type(),
            })
        }
        OutputFormat::Png | OutputFormat::Jpeg => {
            let fill = parse_color(&req.fill_color)?;
            let back = parse_color(&req.back_color)?;
            let mut img = render_raster(&code, req.box_size, req.border, fill, back);
            if let Some(logo_bytes) = logo {
                overlay_logo(&mut img, logo_bytes)?;
            }
            let bytes = if format == OutputFormat::Jpeg {
                encode_jpeg(img)?
            } else {
                encode_png(&img)?
            };
            Ok(RenderedImage {
                bytes,
                content_type: format.media_type(),
            })
        }
    }
}

/// Стилизованный рендер: только png/svg, цвета и уровень коррекции
/// проверяются строго — отказ уходит клиенту как 400.
pub fn render_artistic(
    data: &str,
    dark: &str,
    light: &str,
    border: u32,
    scale: u32,
    error_correction: &str,
    format: &str,
) -> Result<RenderedImage, ApiError> {
    if data.is_empty() {
        return Err(ApiError::InvalidInput("'data' must not be empty.".to_string()));
    }
    let format = match format.to_ascii_lowercase().as_str() {
        "png" => OutputFormat::Png,
        "svg" => OutputFormat::Svg,
        _ => {
            return Err(ApiError::InvalidInput(
                "Only PNG and SVG formats are supported for artistic QR codes.".to_string(),
            ))
        }
    };
    if scale == 0 {
        return Err(ApiError::InvalidInput(
            "'scale' must be a positive integer.".to_string(),
        ));
    }
    let ec = ec_level_strict(error_correction)?;
    let code = QrCode::with_error_correction_level(data, ec)
        .map_err(|e| ApiError::InvalidInput(format!("Failed to generate QR code: {}", e)))?;

    match format {
        OutputFormat::Svg => {
            parse_color(dark)?;
            parse_color(light)?;
            let svg = render_svg(&code, scale, border, dark, light);
            Ok(RenderedImage {
                bytes: svg.into_bytes(),
                content_type: format.media_type(),
            })
        }
        _ => {
            let fill = parse_color(dark)?;
            let back = parse_color(light)?;
            let img = render_raster(&code, scale, border, fill, back);
            Ok(RenderedImage {
                bytes: encode_png(&img)?,
                content_type: OutputFormat::Png.media_type(),
            })
        }
    }
}

/// Дописывает каноничное расширение формата, если его еще нет.
/// Чужое расширение не заменяется, а дополняется.
pub fn download_name(filename: &str, format: OutputFormat) -> String {
    let ext = format!(".{}", format.extension());
    if filename.ends_with(&ext) {
        filename.to_string()
    } else {
        format!("{}{}", filename, ext)
    }
}
