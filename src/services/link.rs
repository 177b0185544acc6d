//! Builds the public download link for a file and its QR code.

use base64::{Engine as _, engine::general_purpose};
use qrcode::{EcLevel, QrCode, render::svg, types::QrError};
use uuid::Uuid;

/// Minimum edge length of the rendered QR image, in pixels.
const QR_MIN_DIMENSION: u32 = 240;

#[derive(Clone, Debug)]
pub struct LinkEncoder {
    base_url: String,
}

impl LinkEncoder {
    /// `base_url` is the externally visible origin, e.g. `https://share.example.com`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn download_url(&self, id: Uuid) -> String {
        format!("{}/download/{}", self.base_url, id)
    }

    /// Render `url` as an SVG QR code wrapped in a base64 `data:` URL.
    pub fn qr_data_url(&self, url: &str) -> Result<String, QrError> {
        let code = QrCode::with_error_correction_level(url.as_bytes(), EcLevel::L)?;
        let image = code
            .render::<svg::Color>()
            .min_dimensions(QR_MIN_DIMENSION, QR_MIN_DIMENSION)
            .dark_color(svg::Color("#000000"))
            .light_color(svg::Color("#ffffff"))
            .build();
        Ok(format!(
            "data:image/svg+xml;base64,{}",
            general_purpose::STANDARD.encode(image)
        ))
    }
}
