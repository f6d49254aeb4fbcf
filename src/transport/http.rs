//! HTTP transport using reqwest.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part as FormPart};
use reqwest::{Client, Url};
use tracing::debug;

use super::{EncodedRequest, Part, RawResponse, Target, Transport, TransportError, TransportResult};
use crate::model::attachment::DEFAULT_KIND;

/// Path of the upload endpoint, relative to the configured base URL.
pub const UPLOAD_PATH: &str = "api/v1/upload";

/// Sends encoded requests as `multipart/form-data` POSTs.
///
/// The underlying client is created once and reused for every exchange, so
/// connections to the service are pooled. The timeout is applied per
/// request from the [`Target`].
///
/// # Example
///
/// ```no_run
/// use hippod_client::transport::HttpTransport;
///
/// let transport = HttpTransport::new()?;
/// # Ok::<(), hippod_client::transport::TransportError>(())
/// ```
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with a fresh connection pool.
    pub fn new() -> TransportResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("hippod-client/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wraps an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        target: &Target,
        request: EncodedRequest,
    ) -> TransportResult<RawResponse> {
        let url = upload_url(&target.url)?;
        debug!(
            "POST {} ({} records, {} parts)",
            url,
            request.record_ids.len(),
            request.parts.len()
        );

        let form = build_form(request.parts)?;
        let response = self
            .client
            .post(url)
            .timeout(target.timeout)
            .multipart(form)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(map_reqwest_error)?;
        debug!("Service answered {} ({} bytes)", status, body.len());

        Ok(RawResponse {
            status,
            body: body.to_vec(),
        })
    }
}

/// Resolves the upload endpoint against the configured base URL.
///
/// A base without a trailing slash is treated as a directory, so both
/// `http://host/hippod` and `http://host/hippod/` resolve to
/// `http://host/hippod/api/v1/upload`.
pub fn upload_url(base: &Url) -> TransportResult<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(UPLOAD_PATH)
        .map_err(|e| TransportError::Encode(format!("invalid upload URL: {}", e)))
}

fn build_form(parts: Vec<Part>) -> TransportResult<Form> {
    let mut form = Form::new();
    for part in parts {
        form = match part {
            Part::Text {
                name,
                value,
                content_type,
            } => {
                let section = FormPart::text(value)
                    .mime_str(&content_type)
                    .map_err(|e| TransportError::Encode(e.to_string()))?;
                form.part(name, section)
            }
            Part::File {
                name,
                file_name,
                kind,
                content,
            } => {
                // Snippet kinds are not MIME types; the manifest still carries them.
                let mime = if is_mime_like(&kind) { kind.as_str() } else { DEFAULT_KIND };
                let section = FormPart::bytes(content)
                    .file_name(file_name)
                    .mime_str(mime)
                    .map_err(|e| TransportError::Encode(e.to_string()))?;
                form.part(name, section)
            }
        };
    }
    Ok(form)
}

fn is_mime_like(kind: &str) -> bool {
    match kind.split_once('/') {
        Some((ty, sub)) => {
            !ty.is_empty()
                && !sub.is_empty()
                && !sub.contains('/')
                && !kind.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else {
        TransportError::Connection(e.to_string())
    }
}
