use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const DEFAULT_MIME: &str = "image/png";

/// An image carried inline as base64, the way the model returns it and the
/// way it is persisted (as a `data:` URL).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            mime_type: if mime_type.trim().is_empty() {
                DEFAULT_MIME.to_string()
            } else {
                mime_type
            },
            data: data.into(),
        }
    }

    pub fn from_bytes(mime_type: &str, bytes: &[u8]) -> Self {
        Self::new(mime_type, BASE64.encode(bytes))
    }

    /// Parses `data:<mime>;base64,<payload>`.
    pub fn from_data_url(url: &str) -> Result<Self> {
        let Some(rest) = url.trim().strip_prefix("data:") else {
            bail!("not a data URL");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data URL has no payload");
        };
        let Some(mime_type) = header.strip_suffix(";base64") else {
            bail!("data URL is not base64 encoded");
        };
        if data.is_empty() {
            bail!("data URL payload is empty");
        }
        Ok(Self::new(mime_type, data))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn decode(&self) -> Result<Vec<u8>> {
        BASE64
            .decode(self.data.as_bytes())
            .context("inline image base64 decode failed")
    }

    pub fn extension(&self) -> &'static str {
        let lowered = self.mime_type.to_ascii_lowercase();
        if lowered.contains("jpeg") || lowered.contains("jpg") {
            return "jpg";
        }
        if lowered.contains("webp") {
            return "webp";
        }
        "png"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_round_trip_keeps_mime() -> Result<()> {
        let image = InlineImage::from_bytes("image/jpeg", b"\xff\xd8\xff");
        let parsed = InlineImage::from_data_url(&image.to_data_url())?;
        assert_eq!(parsed, image);
        assert_eq!(parsed.decode()?, b"\xff\xd8\xff");
        assert_eq!(parsed.extension(), "jpg");
        Ok(())
    }

    #[test]
    fn blank_mime_defaults_to_png() {
        let image = InlineImage::new("", "AAAA");
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.extension(), "png");
    }

    #[test]
    fn rejects_non_data_urls() {
        assert!(InlineImage::from_data_url("").is_err());
        assert!(InlineImage::from_data_url("https://example.com/a.png").is_err());
        assert!(InlineImage::from_data_url("data:image/png,raw").is_err());
        assert!(InlineImage::from_data_url("data:image/png;base64,").is_err());
    }
}
