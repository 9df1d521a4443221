//! # Text Recognition
//!
//! Sends the prepared image to a vision-capable chat-completions endpoint and
//! returns the transcribed text.
//!
//! ## Request Policy
//!
//! - 60 second timeout per request
//! - up to 3 retries on timeouts, connection failures and HTTP 429/500/502/503/504
//! - exponential backoff of 1s, 2s, 4s between attempts
//! - at most 10 requests per 60 seconds across all workers
//!
//! A response body carrying an `error` field is a remote error even when the
//! status is 200.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use serde_json::{Value, json};

use crate::config::{PipelineLimits, ProviderConfig};
use crate::core::RateLimiter;
use crate::error::{OcrError, OcrResult, Retryable};

/// Instruction sent alongside every image.
pub const OCR_PROMPT: &str = "Please extract all text from this image. \
If it contains handwriting, transcribe it as accurately as possible. \
Return only the extracted text, without any additional commentary.";

/// Turns a base64 JPEG into text.
pub trait Recognizer: Send + Sync {
    fn recognize(&self, image_base64: &str, model: &str) -> OcrResult<String>;
}

/// Chat-completions client for the configured provider.
///
/// The blocking HTTP client is built per call, on the worker thread that uses
/// it, so it is never created or dropped inside the async runtime.
#[derive(Debug, Clone)]
pub struct HttpRecognizer {
    provider: ProviderConfig,
    timeout: Duration,
    max_retries: u32,
    backoff_base: Duration,
    limiter: Arc<RateLimiter>,
}

impl HttpRecognizer {
    pub fn new(provider: ProviderConfig, limits: &PipelineLimits) -> Self {
        Self {
            provider,
            timeout: limits.request_timeout,
            max_retries: limits.max_request_retries,
            backoff_base: Duration::from_secs(1),
            limiter: Arc::new(RateLimiter::new(limits.rate_limit_calls, limits.rate_window)),
        }
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn provider(&self) -> &ProviderConfig {
        &self.provider
    }

    fn request_body(image_base64: &str, model: &str) -> Value {
        json!({
            "model": model,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": OCR_PROMPT },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", image_base64) }
                    }
                ]
            }]
        })
    }

    fn client(&self) -> OcrResult<Client> {
        Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| OcrError::network("build HTTP client", e))
    }

    fn send_once(&self, client: &Client, body: &Value) -> OcrResult<String> {
        self.limiter.acquire();
        let response = client
            .post(&self.provider.api_url)
            .bearer_auth(&self.provider.api_key)
            .json(body)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status().as_u16();
        let text = response.text().map_err(|e| self.transport_error(e))?;
        parse_completion(status, &text)
    }

    fn transport_error(&self, error: reqwest::Error) -> OcrError {
        if error.is_timeout() {
            OcrError::timeout("recognition request", self.timeout.as_millis() as u64)
        } else {
            OcrError::network(format!("{} request", self.provider.name()), error)
        }
    }
}

impl Recognizer for HttpRecognizer {
    fn recognize(&self, image_base64: &str, model: &str) -> OcrResult<String> {
        let body = Self::request_body(image_base64, model);
        let client = self.client()?;
        tracing::info!(provider = self.provider.name(), model, "Sending recognition request");

        let mut attempt = 0u32;
        loop {
            match self.send_once(&client, &body) {
                Ok(text) => {
                    tracing::info!(chars = text.len(), "Recognition completed");
                    return Ok(text);
                }
                Err(error) if error.is_retryable() && attempt < self.max_retries => {
                    let delay = self.backoff_base * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Recognition request failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(error) => {
                    tracing::error!(error = %error, "Recognition request failed");
                    return Err(error);
                }
            }
        }
    }
}

/// Interprets a chat-completions response.
pub fn parse_completion(status: u16, body: &str) -> OcrResult<String> {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if let Some(error) = parsed.as_ref().and_then(|v| v.get("error")) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        let status = (!(200..300).contains(&status)).then_some(status);
        return Err(OcrError::remote(status, message));
    }

    if !(200..300).contains(&status) {
        let snippet: String = body.chars().take(500).collect();
        return Err(OcrError::remote(Some(status), snippet));
    }

    let data = parsed.ok_or_else(|| OcrError::malformed("response body is not JSON"))?;
    let content = data
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| OcrError::malformed("missing choices[0].message.content"))?;
    Ok(content.trim().to_string())
}

/// Removes a fence wrapped around the whole response.
///
/// Only a leading line opening a fence and a final bare closing fence are
/// dropped; fenced blocks inside the text are kept.
pub fn strip_code_fence(text: &str) -> String {
    let text = text.trim();
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.first().is_some_and(|line| line.trim().starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|line| line.trim() == "```") {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Provider;
    use rstest::rstest;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn parses_message_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"  Buy milk\n"}}]}"#;
        assert_eq!(parse_completion(200, body).unwrap(), "Buy milk");
    }

    #[rstest]
    #[case(200, r#"{"error":{"message":"quota exceeded"}}"#, "remote")]
    #[case(401, r#"{"error":"bad key"}"#, "remote")]
    #[case(503, "upstream unavailable", "remote")]
    #[case(200, "<html>", "malformed_response")]
    #[case(200, r#"{"choices":[]}"#, "malformed_response")]
    fn classifies_failures(#[case] status: u16, #[case] body: &str, #[case] category: &str) {
        assert_eq!(parse_completion(status, body).unwrap_err().category(), category);
    }

    #[test]
    fn error_status_is_retryable_only_when_listed() {
        assert!(parse_completion(503, "busy").unwrap_err().is_retryable());
        assert!(!parse_completion(401, r#"{"error":"bad key"}"#).unwrap_err().is_retryable());
    }

    #[rstest]
    #[case("```markdown\nHello\n```", "Hello")]
    #[case("```\nA\n```mermaid\ngraph\n```\nB\n```", "A\n```mermaid\ngraph\n```\nB")]
    #[case("plain text", "plain text")]
    #[case("  ```\n  ", "")]
    fn strips_outer_fence(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(strip_code_fence(input), expected);
    }

    #[test]
    fn request_carries_prompt_and_image() {
        let body = HttpRecognizer::request_body("QUJD", "gpt-4o");
        assert_eq!(body["model"], "gpt-4o");
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["text"], OCR_PROMPT);
        assert_eq!(content[1]["image_url"]["url"], "data:image/jpeg;base64,QUJD");
    }

    /// Serves canned HTTP responses in order, one per connection.
    fn serve(responses: Vec<(u16, &'static str)>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/v1/chat/completions", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        std::thread::spawn(move || {
            for (status, body) in responses {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut content_length = 0usize;
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
                        break;
                    }
                    if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                        content_length = value.trim().parse().unwrap_or(0);
                    }
                }
                let mut request_body = vec![0u8; content_length];
                let _ = reader.read_exact(&mut request_body);
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (url, hits)
    }

    fn recognizer(url: String, retries: u32) -> HttpRecognizer {
        let provider = ProviderConfig {
            provider: Provider::OpenAi,
            api_url: url,
            api_key: "sk-test".to_string(),
            model: "gpt-4o".to_string(),
        };
        let limits = PipelineLimits {
            max_request_retries: retries,
            request_timeout: Duration::from_secs(5),
            ..PipelineLimits::default()
        };
        HttpRecognizer::new(provider, &limits).with_backoff_base(Duration::from_millis(10))
    }

    #[test]
    fn retries_transient_status_then_succeeds() {
        let (url, hits) = serve(vec![
            (503, r#"{"detail":"busy"}"#),
            (200, r#"{"choices":[{"message":{"content":"Hello board"}}]}"#),
        ]);
        let text = recognizer(url, 3).recognize("QUJD", "gpt-4o").unwrap();
        assert_eq!(text, "Hello board");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn gives_up_after_max_retries() {
        let (url, hits) = serve(vec![(429, "slow"), (429, "slow"), (429, "slow")]);
        let err = recognizer(url, 2).recognize("QUJD", "gpt-4o").unwrap_err();
        assert_eq!(err.category(), "remote");
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn does_not_retry_client_errors() {
        let (url, hits) = serve(vec![(401, r#"{"error":{"message":"bad key"}}"#), (200, "{}")]);
        let err = recognizer(url, 3).recognize("QUJD", "gpt-4o").unwrap_err();
        assert!(err.to_string().contains("bad key"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
