//! Plate recognition for images captured by gates that cannot read plates
//! themselves. Recognition runs in an external service.

use async_trait::async_trait;
use log::{debug, error};
use serde::Deserialize;

use toll_shared::model::Plate;

use crate::error::EngineError;

pub const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
pub const JPEG_MAGIC: &[u8] = &[0xff, 0xd8, 0xff];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl ImageFormat {
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        match content_type {
            "image/png" => Some(ImageFormat::Png),
            "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    pub fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            ImageFormat::Png => bytes.starts_with(PNG_MAGIC),
            ImageFormat::Jpeg => bytes.starts_with(JPEG_MAGIC),
        }
    }
}

#[async_trait]
pub trait PlateReader: Send + Sync {
    /// `Ok(None)` when the image was processed but no plate was found.
    async fn read_plate(
        &self,
        image: &[u8],
        format: ImageFormat,
    ) -> Result<Option<Plate>, EngineError>;
}

/// Used when no recognition service is configured.
pub struct DisabledPlateReader;

#[async_trait]
impl PlateReader for DisabledPlateReader {
    async fn read_plate(
        &self,
        _image: &[u8],
        _format: ImageFormat,
    ) -> Result<Option<Plate>, EngineError> {
        Err(EngineError::BadRequest(String::from(
            "plate recognition is not available",
        )))
    }
}

#[derive(Debug, Deserialize)]
struct RecognitionResponse {
    targa: Option<String>,
}

/// Posts the raw image to a recognition endpoint answering
/// `{ "targa": "AA111AA" }` or `{ "targa": null }`.
pub struct HttpPlateReader {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPlateReader {
    pub fn new(endpoint: impl Into<String>) -> Self {
        HttpPlateReader {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PlateReader for HttpPlateReader {
    async fn read_plate(
        &self,
        image: &[u8],
        format: ImageFormat,
    ) -> Result<Option<Plate>, EngineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, format.content_type())
            .body(image.to_vec())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                error!("Plate recognition request failed: {}", e);
                EngineError::Internal(format!("plate recognition failed: {e}"))
            })?;
        let body: RecognitionResponse = response
            .json()
            .await
            .map_err(|e| EngineError::Internal(format!("unreadable recognition response: {e}")))?;
        debug!("Recognition service answered {:?}", body.targa);

        match body.targa.map(|raw| raw.trim().to_uppercase()) {
            Some(raw) if !raw.is_empty() => raw
                .parse::<Plate>()
                .map(Some)
                .map_err(|e| EngineError::BadRequest(e.to_string())),
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_format_checks() {
        assert_eq!(ImageFormat::from_content_type("image/png"), Some(ImageFormat::Png));
        assert_eq!(ImageFormat::from_content_type("image/jpeg"), Some(ImageFormat::Jpeg));
        assert_eq!(ImageFormat::from_content_type("image/gif"), None);

        let mut png = PNG_MAGIC.to_vec();
        png.extend_from_slice(b"rest");
        assert!(ImageFormat::Png.matches(&png));
        assert!(!ImageFormat::Jpeg.matches(&png));
        assert!(ImageFormat::Jpeg.matches(&[0xff, 0xd8, 0xff, 0xe0]));
        assert!(!ImageFormat::Png.matches(b"GIF89a"));
    }

    #[tokio::test]
    async fn test_disabled_reader_rejects() {
        let result = DisabledPlateReader.read_plate(JPEG_MAGIC, ImageFormat::Jpeg).await;
        assert!(matches!(result, Err(EngineError::BadRequest(_))));
    }
}
