//! Image uploads. Formats are checked locally before anything is sent to the
//! image host.

use chrono::Utc;
use parking_lot::Mutex;
use rocket::fs::TempFile;
use rocket::tokio::io::AsyncReadExt;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CloudinaryCredentials, Settings};
use crate::upstream::{self, UpstreamError};

pub const ALLOWED_FORMATS: &[&str] = &["png", "jpg", "jpeg"];

const SERVICE: &str = "image host";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file was provided")]
    Missing,
    #[error("Unsupported image format; allowed formats are {}", .allowed.join(", "))]
    UnsupportedFormat { allowed: Vec<String> },
    #[error("Image host rejected the upload: {0}")]
    Rejected(String),
    #[error(transparent)]
    Upstream(UpstreamError),
    #[error("Could not read the uploaded file")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    pub fn retryable(&self) -> bool {
        match self {
            UploadError::Upstream(e) => e.retryable(),
            _ => false,
        }
    }
}

impl From<UpstreamError> for UploadError {
    fn from(err: UpstreamError) -> UploadError {
        match err {
            UpstreamError::Rejected { status, message, .. } if status < 500 && status != 429 => {
                UploadError::Rejected(message)
            }
            other => UploadError::Upstream(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Image {
    pub file_name: String,
    pub format: String,
    pub bytes: Vec<u8>,
}

#[rocket::async_trait]
pub trait ImageHost: Send + Sync {
    /// Stores the image and returns its durable URL.
    async fn store(&self, image: Image) -> Result<String, UploadError>;
}

pub type SharedImageHost = Arc<dyn ImageHost>;

pub fn from_settings(settings: &Settings) -> reqwest::Result<SharedImageHost> {
    Ok(match &settings.cloudinary {
        Some(credentials) => Arc::new(Cloudinary {
            client: upstream::client(settings.upstream_timeout)?,
            timeout: settings.upstream_timeout,
            credentials: credentials.clone(),
        }),
        None => Arc::new(Unconfigured),
    })
}

/// Checks the file name extension and the declared content type against
/// `allowed`. Returns the normalised format.
pub fn check_format(
    file_name: Option<&str>,
    content_type: Option<&str>,
    allowed: &[&str],
) -> Result<String, UploadError> {
    let unsupported = || UploadError::UnsupportedFormat {
        allowed: allowed.iter().map(|s| s.to_string()).collect(),
    };
    let is_allowed = |format: &str| allowed.iter().any(|a| a.eq_ignore_ascii_case(format));

    let from_name = match file_name.and_then(|name| name.rsplit_once('.')) {
        Some((_, ext)) if is_allowed(ext) => Some(ext.to_ascii_lowercase()),
        Some(_) => return Err(unsupported()),
        None => None,
    };

    let from_type = match content_type.map(|ct| ct.trim().to_ascii_lowercase()) {
        Some(ct) if ct == "application/octet-stream" => None,
        Some(ct) => match ct.strip_prefix("image/") {
            Some(sub) if is_allowed(sub) => Some(sub.to_string()),
            _ => return Err(unsupported()),
        },
        None => None,
    };

    from_name.or(from_type).ok_or_else(unsupported)
}

/// Validates and reads an uploaded form file, then hands it to `host`.
pub async fn upload(host: &dyn ImageHost, file: &TempFile<'_>, allowed: &[&str]) -> Result<String, UploadError> {
    if file.len() == 0 {
        return Err(UploadError::Missing);
    }
    let raw_name = file
        .raw_name()
        .map(|name| name.dangerous_unsafe_unsanitized_raw().as_str().to_string());
    let content_type = file.content_type().map(|ct| format!("{}/{}", ct.top(), ct.sub()));
    let format = check_format(raw_name.as_deref(), content_type.as_deref(), allowed)?;

    let mut reader = Box::pin(file.open().await?);
    let mut bytes = Vec::with_capacity(file.len() as usize);
    reader.read_to_end(&mut bytes).await?;

    let file_name = file.name().unwrap_or("upload").to_string();
    let url = host.store(Image { file_name, format, bytes }).await?;
    tracing::info!(%url, "image stored");
    Ok(url)
}

pub struct Cloudinary {
    client: reqwest::Client,
    timeout: Duration,
    credentials: CloudinaryCredentials,
}

#[derive(Debug, Deserialize)]
struct CloudinaryResponse {
    secure_url: String,
}

/// Cloudinary request signature: the sorted `key=value` pairs joined with `&`,
/// followed by the API secret, hashed with SHA-256.
pub fn cloudinary_signature(params: &[(&str, String)], api_secret: &str) -> String {
    let mut sorted: Vec<&(&str, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");
    hex::encode(Sha256::digest(format!("{}{}", joined, api_secret).as_bytes()))
}

#[rocket::async_trait]
impl ImageHost for Cloudinary {
    async fn store(&self, image: Image) -> Result<String, UploadError> {
        let params = vec![
            ("allowed_formats", ALLOWED_FORMATS.join(",")),
            ("timestamp", Utc::now().timestamp().to_string()),
        ];
        let signature = cloudinary_signature(&params, &self.credentials.api_secret);

        let part = reqwest::multipart::Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(&format!("image/{}", image.format))
            .map_err(|e| UploadError::Rejected(e.to_string()))?;
        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("api_key", self.credentials.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256");
        for (key, value) in params {
            form = form.text(key, value);
        }

        let url = format!(
            "https://api.cloudinary.com/v1_1/{}/image/upload",
            self.credentials.cloud_name
        );
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, self.timeout, e))?;
        let response = upstream::check(SERVICE, response).await?;
        let body: CloudinaryResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::from_reqwest(SERVICE, self.timeout, e))?;
        Ok(body.secure_url)
    }
}

/// Used when no image host credentials are configured.
pub struct Unconfigured;

#[rocket::async_trait]
impl ImageHost for Unconfigured {
    async fn store(&self, _image: Image) -> Result<String, UploadError> {
        Err(UploadError::Upstream(UpstreamError::NotConfigured { service: SERVICE }))
    }
}

/// Keeps images in memory and hands out `memory://` URLs.
#[derive(Default)]
pub struct MemoryImageHost {
    stored: Mutex<Vec<Image>>,
}

impl MemoryImageHost {
    pub fn stored(&self) -> Vec<Image> {
        self.stored.lock().clone()
    }
}

#[rocket::async_trait]
impl ImageHost for MemoryImageHost {
    async fn store(&self, image: Image) -> Result<String, UploadError> {
        let mut stored = self.stored.lock();
        let url = format!("memory://images/{}/{}.{}", stored.len() + 1, image.file_name, image.format);
        stored.push(image);
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_allowed_extensions_case_insensitively() {
        assert_eq!(check_format(Some("cat.PNG"), None, ALLOWED_FORMATS).unwrap(), "png");
        assert_eq!(check_format(Some("cat.jpeg"), Some("image/jpeg"), ALLOWED_FORMATS).unwrap(), "jpeg");
        assert_eq!(check_format(None, Some("image/jpg"), ALLOWED_FORMATS).unwrap(), "jpg");
    }

    #[test]
    fn rejects_other_formats_before_upload() {
        assert!(matches!(
            check_format(Some("cat.gif"), Some("image/png"), ALLOWED_FORMATS),
            Err(UploadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            check_format(Some("cat.png"), Some("text/html"), ALLOWED_FORMATS),
            Err(UploadError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            check_format(Some("noextension"), None, ALLOWED_FORMATS),
            Err(UploadError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn octet_stream_defers_to_file_name() {
        assert_eq!(
            check_format(Some("me.jpg"), Some("application/octet-stream"), ALLOWED_FORMATS).unwrap(),
            "jpg"
        );
    }

    #[test]
    fn unsupported_message_lists_formats() {
        let err = check_format(Some("a.bmp"), None, ALLOWED_FORMATS).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported image format; allowed formats are png, jpg, jpeg");
    }

    #[test]
    fn signature_is_order_independent() {
        let a = cloudinary_signature(&[("timestamp", "1".into()), ("allowed_formats", "png".into())], "s");
        let b = cloudinary_signature(&[("allowed_formats", "png".into()), ("timestamp", "1".into())], "s");
        assert_eq!(a, b);
        let expected = hex::encode(Sha256::digest(b"allowed_formats=png&timestamp=1s"));
        assert_eq!(a, expected);
    }

    #[test]
    fn host_rejections_are_not_retryable() {
        let err = UploadError::from(UpstreamError::Rejected {
            service: SERVICE,
            status: 400,
            message: "Invalid image file".into(),
        });
        assert!(matches!(err, UploadError::Rejected(ref m) if m == "Invalid image file"));
        assert!(!err.retryable());

        let err = UploadError::from(UpstreamError::Timeout {
            service: SERVICE,
            timeout_secs: 5,
        });
        assert!(err.retryable());
    }

    #[rocket::async_test]
    async fn memory_host_returns_urls() {
        let host = MemoryImageHost::default();
        let url = host
            .store(Image {
                file_name: "cover".into(),
                format: "png".into(),
                bytes: vec![1, 2, 3],
            })
            .await
            .unwrap();
        assert_eq!(url, "memory://images/1/cover.png");
        assert_eq!(host.stored()[0].bytes, vec![1, 2, 3]);
    }

    #[rocket::async_test]
    async fn unconfigured_host_fails_without_network() {
        let err = Unconfigured
            .store(Image {
                file_name: "x".into(),
                format: "png".into(),
                bytes: vec![0],
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "image host is not configured");
    }
}
