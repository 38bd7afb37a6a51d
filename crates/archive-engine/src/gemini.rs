use std::time::Duration;

use anyhow::{bail, Context, Result};
use archive_contracts::inline_image::{InlineImage, DEFAULT_MIME};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response as HttpResponse};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::providers::{
    GenerationError, ImageProvider, ImageRequest, TextProvider, TextRequest,
};

/// Gemini `generateContent` over REST, for both image and text models.
pub(crate) struct GeminiProvider {
    api_base: String,
    api_key: Option<String>,
    http: HttpClient,
    timeout: Option<Duration>,
}

impl GeminiProvider {
    pub(crate) fn new(config: &EngineConfig) -> Result<Self> {
        // The blocking client otherwise caps every request at 30 s.
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.gemini_api_base.trim_end_matches('/').to_string(),
            api_key: config.gemini_api_key.clone(),
            http,
            timeout: config.request_timeout,
        })
    }

    fn api_key(&self) -> Result<&str> {
        match self.api_key.as_deref() {
            Some(key) => Ok(key),
            None => bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set"),
        }
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post(&self, endpoint: &str, payload: &Value) -> Result<HttpResponse> {
        let api_key = self.api_key()?;
        let mut request: RequestBuilder = self
            .http
            .post(endpoint)
            .header("x-goog-api-key", api_key)
            .json(payload);
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }
        Ok(request.send().map_err(reqwest::Error::without_url)?)
    }
}

impl ImageProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ImageRequest) -> Result<InlineImage> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = image_payload(&request.prompt, request.source.as_ref());
        let response = self.post(&endpoint, &payload)?;
        let body = response_json_or_error("Gemini", response)?;
        Ok(extract_first_image(&body)?)
    }
}

impl TextProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn complete(&self, request: &TextRequest) -> Result<String> {
        let endpoint = self.endpoint_for_model(&request.model);
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }],
            }],
        });
        let response = self.post(&endpoint, &payload)?;
        let body = response_json_or_error("Gemini", response)?;
        Ok(extract_text(&body))
    }
}

/// Source image first, then the instruction, and ask for image output only.
fn image_payload(prompt: &str, source: Option<&InlineImage>) -> Value {
    let mut parts = Vec::new();
    if let Some(source) = source {
        parts.push(json!({
            "inlineData": {
                "mimeType": source.mime_type,
                "data": source.data,
            }
        }));
    }
    parts.push(json!({ "text": prompt }));
    json!({
        "contents": [{
            "role": "user",
            "parts": parts,
        }],
        "generationConfig": {
            "responseModalities": ["IMAGE"],
        },
    })
}

fn first_candidate_parts(body: &Value) -> Vec<Value> {
    body.get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn extract_first_image(body: &Value) -> std::result::Result<InlineImage, GenerationError> {
    let parts = first_candidate_parts(body);
    if parts.is_empty() {
        return Err(GenerationError::no_content());
    }
    for part in parts {
        let Some(inline) = part
            .get("inlineData")
            .or_else(|| part.get("inline_data"))
            .and_then(Value::as_object)
        else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let mime_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MIME);
        return Ok(InlineImage::new(mime_type, data));
    }
    Err(GenerationError::no_image())
}

fn extract_text(body: &Value) -> String {
    first_candidate_parts(body)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<Vec<&str>>()
        .join("")
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(reqwest::Error::without_url)
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    use super::*;
    use crate::providers::GenerationErrorKind;

    const KEY: &str = "SECRET-KEY-123";

    fn provider() -> GeminiProvider {
        GeminiProvider::new(&EngineConfig {
            gemini_api_base: "https://example.test/v1beta/".to_string(),
            ..EngineConfig::default()
        })
        .unwrap()
    }

    fn keyed_provider(api_base: &str, timeout: Option<Duration>) -> Result<GeminiProvider> {
        GeminiProvider::new(&EngineConfig {
            gemini_api_base: api_base.to_string(),
            gemini_api_key: Some(KEY.to_string()),
            request_timeout: timeout,
            ..EngineConfig::default()
        })
    }

    fn text_request() -> TextRequest {
        TextRequest {
            model: "gemini-2.5-flash".to_string(),
            prompt: "hi".to_string(),
        }
    }

    fn http_response(status: &str, body: &str) -> String {
        format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
    }

    fn text_body(text: &str) -> String {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] }).to_string()
    }

    /// Accepts one connection, waits `delay`, answers with `response` and
    /// hands back the raw request it read.
    fn serve_once(delay: Duration, response: String) -> Result<(String, JoinHandle<String>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let api_base = format!("http://{}/v1beta", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return String::new();
            };
            let request = read_request(&mut stream);
            thread::sleep(delay);
            let _ = stream.write_all(response.as_bytes());
            request
        });
        Ok((api_base, handle))
    }

    fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let read = match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(read) => read,
            };
            raw.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&raw);
            let Some(head_end) = text.find("\r\n\r\n") else {
                continue;
            };
            let length = text[..head_end]
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if raw.len() >= head_end + 4 + length {
                break;
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() {
        let gemini = provider();
        assert_eq!(
            gemini.endpoint_for_model("gemini-2.5-flash-image"),
            "https://example.test/v1beta/models/gemini-2.5-flash-image:generateContent"
        );
        assert_eq!(
            gemini.endpoint_for_model(" models/gemini-2.5-flash "),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn edit_payload_puts_source_before_instruction() {
        let source = InlineImage::new("image/jpeg", "QUJD");
        let payload = image_payload("add snow", Some(&source));
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("QUJD"));
        assert_eq!(parts[1]["text"], json!("add snow"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE"])
        );
    }

    #[test]
    fn first_inline_image_wins_and_mime_defaults_to_png() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "here you go" },
                    { "inlineData": { "data": "AAAA" } },
                    { "inlineData": { "mimeType": "image/webp", "data": "BBBB" } }
                ]}
            }]
        });
        let image = extract_first_image(&body).unwrap();
        assert_eq!(image, InlineImage::new("image/png", "AAAA"));
    }

    #[test]
    fn missing_parts_and_missing_images_are_generation_errors() {
        let empty = json!({ "candidates": [] });
        assert_eq!(
            extract_first_image(&empty).unwrap_err().kind,
            GenerationErrorKind::NoContent
        );

        let text_only = json!({
            "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }]
        });
        assert_eq!(
            extract_first_image(&text_only).unwrap_err().kind,
            GenerationErrorKind::NoImage
        );
    }

    #[test]
    fn text_parts_are_joined() {
        let body = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Bat" }, { "text": "man" }] } }]
        });
        assert_eq!(extract_text(&body), "Batman");
        assert_eq!(extract_text(&json!({})), "");
    }

    #[test]
    fn calls_without_key_fail_before_any_request() {
        let err = provider().complete(&text_request()).unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn slow_responses_outlast_the_http_client_default_timeout() -> Result<()> {
        let (api_base, server) = serve_once(
            Duration::from_secs(32),
            http_response("200 OK", &text_body("Nature")),
        )?;
        let gemini = keyed_provider(&api_base, None)?;

        let answer = gemini.complete(&text_request())?;
        assert_eq!(answer, "Nature");
        let _ = server.join();
        Ok(())
    }

    #[test]
    fn configured_timeout_still_applies() -> Result<()> {
        let (api_base, _server) = serve_once(
            Duration::from_secs(3),
            http_response("200 OK", &text_body("late")),
        )?;
        let gemini = keyed_provider(&api_base, Some(Duration::from_millis(200)))?;

        let err = gemini.complete(&text_request()).unwrap_err();
        assert!(err
            .downcast_ref::<reqwest::Error>()
            .is_some_and(reqwest::Error::is_timeout));
        Ok(())
    }

    #[test]
    fn api_key_travels_in_a_header() -> Result<()> {
        let (api_base, server) =
            serve_once(Duration::ZERO, http_response("200 OK", &text_body("ok")))?;
        keyed_provider(&api_base, None)?.complete(&text_request())?;

        let request = server
            .join()
            .map_err(|_| anyhow::anyhow!("server thread panicked"))?;
        let request_line = request.lines().next().unwrap_or_default();
        assert!(request_line.starts_with("POST /v1beta/models/gemini-2.5-flash:generateContent"));
        assert!(!request_line.contains(KEY));
        assert!(request
            .to_ascii_lowercase()
            .contains(&format!("x-goog-api-key: {}", KEY.to_ascii_lowercase())));
        Ok(())
    }

    #[test]
    fn transport_errors_do_not_expose_the_key() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let api_base = format!("http://{}/v1beta", listener.local_addr()?);
        drop(listener);

        let err = keyed_provider(&api_base, None)?
            .complete(&text_request())
            .unwrap_err();
        let message = format!("{err:#}");
        assert!(!message.contains(KEY), "{message}");
        assert!(!message.contains("generateContent"), "{message}");
        Ok(())
    }

    #[test]
    fn http_errors_carry_status_and_truncated_body() -> Result<()> {
        let long_body = "x".repeat(600);
        let (api_base, _server) = serve_once(
            Duration::ZERO,
            http_response("500 Internal Server Error", &long_body),
        )?;

        let err = keyed_provider(&api_base, None)?
            .complete(&text_request())
            .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Gemini request failed (500): "), "{message}");
        assert!(message.ends_with(&format!("{}…", "x".repeat(512))));
        assert!(!message.contains(&"x".repeat(513)));
        Ok(())
    }

    #[test]
    fn non_json_success_bodies_are_rejected() -> Result<()> {
        let (api_base, _server) =
            serve_once(Duration::ZERO, http_response("200 OK", "<html>oops</html>"))?;

        let err = keyed_provider(&api_base, None)?
            .complete(&text_request())
            .unwrap_err();
        assert!(err.to_string().contains("invalid JSON payload"));
        Ok(())
    }
}
