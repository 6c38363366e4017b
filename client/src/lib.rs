use chrono::{DateTime, Utc};
use log::{debug, error, info};
use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use toll_shared::messages::{
    ErrorEnvelope, FineQuery, PaymentCode, PaymentCodeDecoder, TransitCreated, TransitRequest,
};
use toll_shared::model::{FineReport, Role};

const USER_ID_HEADER: &str = "x-user-id";
const ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server answered {}: {}", .0.error.status_code, .0.error.message)]
    Api(ErrorEnvelope),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    InvalidArgument(String),
}

/// Talks to the toll server on behalf of one identity.
pub struct Client {
    http: reqwest::Client,
    base: String,
    user_id: i64,
    role: Role,
}

impl Client {
    pub fn new(address: &str, port: u16, user_id: i64, role: Role) -> Self {
        Client {
            http: reqwest::Client::new(),
            base: format!("http://{address}:{port}"),
            user_id,
            role,
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(USER_ID_HEADER, self.user_id.to_string())
            .header(ROLE_HEADER, self.role.as_str())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    pub async fn submit(&self, request: &TransitRequest) -> Result<TransitCreated, ClientError> {
        let response = self
            .request(self.http.post(self.url("/transiti")))
            .json(request)
            .send()
            .await?;
        decode(response).await
    }

    /// Sends a captured image. The server reads the plate and stamps the exit
    /// time on arrival.
    pub async fn submit_image(
        &self,
        image: &Path,
        entry_at: DateTime<Utc>,
    ) -> Result<TransitCreated, ClientError> {
        let mime = image_mime(image)?;
        let bytes = tokio::fs::read(image).await?;
        let file_name = image
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| String::from("capture"));
        debug!("Uploading {} ({} bytes, {})", file_name, bytes.len(), mime);

        let form = Form::new()
            .part("immagine", Part::bytes(bytes).file_name(file_name).mime_str(mime)?)
            .text("data_in", entry_at.to_rfc3339());
        let response = self
            .request(self.http.post(self.url("/transiti/immagine")))
            .multipart(form)
            .send()
            .await?;
        decode(response).await
    }

    pub async fn fines(&self, query: &FineQuery) -> Result<Vec<FineReport>, ClientError> {
        let response = self
            .request(self.http.get(self.url("/multe")))
            .query(&query.to_pairs())
            .send()
            .await?;
        decode(response).await
    }

    pub async fn document(&self, fine_id: i64) -> Result<Vec<u8>, ClientError> {
        let response = self
            .request(self.http.get(self.url(&format!("/multe/{fine_id}/bollettino"))))
            .send()
            .await?;
        let response = check(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn image_mime(path: &Path) -> Result<&'static str, ClientError> {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "png" => Ok("image/png"),
        "jpg" | "jpeg" => Ok("image/jpeg"),
        _ => Err(ClientError::InvalidArgument(format!(
            "{} is not a PNG or JPEG file",
            path.display()
        ))),
    }
}

/// Turns a non-success response into the server's error envelope.
async fn check(response: Response) -> Result<Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await?;
    match serde_json::from_slice::<ErrorEnvelope>(&body) {
        Ok(envelope) => {
            error!("Server answered {}: {}", status, envelope.error.message);
            Err(ClientError::Api(envelope))
        }
        Err(_) => Err(ClientError::InvalidArgument(format!(
            "unexpected {} response: {}",
            status,
            String::from_utf8_lossy(&body)
        ))),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    Ok(check(response).await?.json().await?)
}

/// Reads payment codes from a scanner stream until it closes. Anything
/// between codes is ignored; a malformed code stops the scan.
pub async fn scan<R: AsyncRead + Unpin>(input: R) -> Result<Vec<PaymentCode>, ClientError> {
    let mut reader = FramedRead::new(input, PaymentCodeDecoder {});
    let mut codes = vec![];

    while let Some(result) = reader.next().await {
        match result {
            Ok(code) => {
                info!("Scanned payment code for fine {}", code.fine_id);
                codes.push(code);
            }
            Err(e) => {
                error!("Error reading payment code {}", e);
                return Err(e.into());
            }
        }
    }
    Ok(codes)
}
