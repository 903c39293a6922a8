//! Google Drive sink: uploads the PDF into each recipient's own Drive.
//!
//! Uses the Drive v3 multipart upload (`multipart/related`: a JSON metadata
//! part followed by the PDF bytes) authenticated with the recipient's
//! credential from the [`CredentialBroker`].

use super::credentials::CredentialBroker;
use super::RecipientSink;
use crate::error::DeliveryError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::debug;

/// Drive v3 multipart upload endpoint.
pub const DEFAULT_UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/drive/v3/files?uploadType=multipart";

const BOUNDARY: &str = "scanit-drive-upload-boundary";

#[derive(Clone)]
pub struct DriveSink {
    broker: CredentialBroker,
    client: reqwest::Client,
    upload_url: String,
}

impl DriveSink {
    pub fn new(broker: CredentialBroker, client: reqwest::Client) -> Self {
        Self {
            broker,
            client,
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
        }
    }

    /// Upload somewhere other than Google's endpoint (a proxy, a test server).
    pub fn with_upload_url(mut self, url: impl Into<String>) -> Self {
        self.upload_url = url.into();
        self
    }
}

/// `multipart/related` body: metadata JSON, then the PDF.
fn multipart_body(title: &str, document: &[u8]) -> Vec<u8> {
    let metadata = json!({
        "name": format!("{title}.pdf"),
        "mimeType": "application/pdf",
    });

    let mut body = Vec::with_capacity(document.len() + 512);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{BOUNDARY}\r\nContent-Type: application/pdf\r\n\r\n").as_bytes(),
    );
    body.extend_from_slice(document);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[async_trait]
impl RecipientSink for DriveSink {
    async fn deliver(&self, recipient: &str, document: &[u8], title: &str) -> Result<(), DeliveryError> {
        let credential = self
            .broker
            .acquire(recipient, Utc::now())
            .await
            .map_err(|e| DeliveryError::Credentials {
                recipient: recipient.to_string(),
                detail: e.to_string(),
            })?;

        let failed = |detail: String| DeliveryError::UploadFailed {
            recipient: recipient.to_string(),
            detail,
        };

        let response = self
            .client
            .post(&self.upload_url)
            .bearer_auth(&credential.access_token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={BOUNDARY}"),
            )
            .body(multipart_body(title, document))
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {}", text.trim())));
        }
        debug!("Drive accepted '{}' for {}", title, recipient);
        Ok(())
    }
}
