use anyhow::{Result, anyhow};
use bytes::Bytes;
use futures_util::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::config::Config;
use crate::providers::http_errors::api_request_error;

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<ChunkContent>,
}

#[derive(Debug, Deserialize)]
struct ChunkContent {
    #[serde(default)]
    parts: Vec<ChunkPart>,
}

#[derive(Debug, Deserialize)]
struct ChunkPart {
    #[serde(default)]
    text: String,
}

fn stream_url(base_url: &str, model: &str) -> String {
    format!(
        "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
        base_url.trim_end_matches('/'),
        model
    )
}

/// Issues a streaming generateContent request and returns the SSE response
/// wrapped as a stream of text deltas. Errors before the first byte (connect
/// failures, non-success status) surface here; mid-stream errors surface as
/// items of the returned stream.
pub async fn generate_stream(client: &Client, cfg: &Config, prompt: &str) -> Result<GeminiStream> {
    let api_url = stream_url(&cfg.api_base_url, &cfg.model);
    let body = GenerateContentRequest {
        contents: vec![Content {
            parts: vec![Part {
                text: prompt.to_string(),
            }],
        }],
    };
    debug!(
        api_url = %api_url,
        model = %cfg.model,
        prompt_len = prompt.len(),
        "sending gemini stream request"
    );

    let response = client
        .post(&api_url)
        .header("x-goog-api-key", &cfg.api_key)
        .json(&body)
        .send()
        .await
        .map_err(|err| {
            warn!(
                api_url = %api_url,
                model = %cfg.model,
                error = %err,
                "gemini request failed"
            );
            api_request_error(err, &api_url, cfg.request_timeout_secs)
        })?;

    if !response.status().is_success() {
        let status = response.status();
        let response_body = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        warn!(
            api_url = %api_url,
            model = %cfg.model,
            status = %status,
            response_body_len = response_body.len(),
            "gemini returned non-success status"
        );
        return Err(anyhow!(
            "Generation request failed with status {}: {}",
            status,
            response_body
        ));
    }

    Ok(GeminiStream::new(response))
}

/// Parses an `alt=sse` generateContent response incrementally. Each `data:`
/// line carries one JSON chunk; the candidate's part texts are concatenated
/// into one delta. Chunks with no text are skipped and never surface.
pub struct GeminiStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    buffer: String,
    transport_done: bool,
}

impl GeminiStream {
    fn new(response: reqwest::Response) -> Self {
        Self {
            inner: Box::pin(response.bytes_stream()),
            buffer: String::new(),
            transport_done: false,
        }
    }
}

fn parse_sse_line(line: &str) -> Result<Option<String>> {
    // SSE frames: `data:` lines carry payloads, everything else (blank
    // separators, comments, event names) is framing.
    let Some(payload) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let payload = payload.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return Ok(None);
    }

    let chunk: StreamChunk = serde_json::from_str(payload)
        .map_err(|err| anyhow!("Failed to parse stream chunk: {err}"))?;
    let text: String = chunk
        .candidates
        .first()
        .and_then(|candidate| candidate.content.as_ref())
        .map(|content| {
            content
                .parts
                .iter()
                .map(|part| part.text.as_str())
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        return Ok(None);
    }
    Ok(Some(text))
}

impl Stream for GeminiStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            // Drain complete lines already buffered before touching the
            // transport again; one chunk may carry several events.
            while let Some(newline_pos) = self.buffer.find('\n') {
                let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
                self.buffer.drain(..=newline_pos);
                match parse_sse_line(&line) {
                    Ok(Some(delta)) => return Poll::Ready(Some(Ok(delta))),
                    Ok(None) => continue,
                    Err(err) => return Poll::Ready(Some(Err(err))),
                }
            }

            if self.transport_done {
                // No newline left in the buffer, so the remainder is at most
                // one unterminated line.
                if !self.buffer.is_empty() {
                    let line = std::mem::take(&mut self.buffer);
                    match parse_sse_line(line.trim_end_matches('\r')) {
                        Ok(Some(delta)) => return Poll::Ready(Some(Ok(delta))),
                        Ok(None) => {}
                        Err(err) => return Poll::Ready(Some(Err(err))),
                    }
                }
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.buffer.push_str(text),
                    Err(err) => {
                        return Poll::Ready(Some(Err(anyhow!(
                            "Invalid UTF-8 in stream response: {err}"
                        ))));
                    }
                },
                Poll::Ready(Some(Err(err))) => {
                    return Poll::Ready(Some(Err(anyhow!("Stream transport error: {err}"))));
                }
                Poll::Ready(None) => self.transport_done = true,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use reqwest::Client;
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;

    use super::{generate_stream, parse_sse_line, stream_url};
    use crate::config::Config;

    /// Serves one canned SSE response body in a single write, then closes the
    /// connection.
    fn spawn_sse_server(body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
        let addr = listener.local_addr().expect("address should be available");
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept should succeed");
            let mut request = [0u8; 4096];
            let _ = stream.read(&mut request);
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n{body}"
            );
            stream
                .write_all(response.as_bytes())
                .expect("write should succeed");
        });
        addr
    }

    fn test_config(addr: SocketAddr) -> Config {
        Config {
            api_key: "test-key".to_string(),
            model: "gemini-test".to_string(),
            api_base_url: format!("http://{addr}"),
            request_timeout_secs: 5,
        }
    }

    async fn collect_deltas(addr: SocketAddr) -> Vec<String> {
        let client = Client::new();
        let cfg = test_config(addr);
        let mut stream = generate_stream(&client, &cfg, "task")
            .await
            .expect("stream should open");

        let mut deltas = Vec::new();
        while let Some(delta) = stream.next().await {
            deltas.push(delta.expect("delta should parse"));
        }
        deltas
    }

    #[tokio::test]
    async fn yields_every_event_when_one_chunk_holds_several() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Step 1\"}]}}]}\n",
            "\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" and 2\"}]}}]}\n",
            "\n",
        );
        let deltas = collect_deltas(spawn_sse_server(body)).await;
        assert_eq!(deltas, vec!["Step 1", " and 2"]);
    }

    #[tokio::test]
    async fn flushes_an_unterminated_final_event_at_stream_close() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Step 1\"}]}}]}\n",
            "\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\" and 2\"}]}}]}",
        );
        let deltas = collect_deltas(spawn_sse_server(body)).await;
        assert_eq!(deltas, vec!["Step 1", " and 2"]);
    }

    #[test]
    fn stream_url_trims_trailing_slash_and_names_model() {
        assert_eq!(
            stream_url("http://localhost:8080/", "gemini-1.5-flash-latest"),
            "http://localhost:8080/v1beta/models/gemini-1.5-flash-latest:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn parse_sse_line_extracts_candidate_text() {
        let line = r#"data: {"candidates":[{"content":{"parts":[{"text":"Step 1"}]}}]}"#;
        let delta = parse_sse_line(line).expect("line should parse");
        assert_eq!(delta.as_deref(), Some("Step 1"));
    }

    #[test]
    fn parse_sse_line_concatenates_multiple_parts() {
        let line =
            r#"data: {"candidates":[{"content":{"parts":[{"text":"Step "},{"text":"1"}]}}]}"#;
        let delta = parse_sse_line(line).expect("line should parse");
        assert_eq!(delta.as_deref(), Some("Step 1"));
    }

    #[test]
    fn parse_sse_line_skips_framing_and_empty_payloads() {
        assert_eq!(parse_sse_line("").expect("blank line"), None);
        assert_eq!(parse_sse_line(": keep-alive").expect("comment"), None);
        assert_eq!(parse_sse_line("data: [DONE]").expect("done marker"), None);
        let empty_chunk = r#"data: {"candidates":[{"content":{"parts":[{"text":""}]}}]}"#;
        assert_eq!(parse_sse_line(empty_chunk).expect("empty chunk"), None);
    }

    #[test]
    fn parse_sse_line_skips_chunks_without_content() {
        let finish_only = r#"data: {"candidates":[{"finishReason":"STOP"}]}"#;
        assert_eq!(parse_sse_line(finish_only).expect("finish chunk"), None);
    }

    #[test]
    fn parse_sse_line_reports_malformed_chunks() {
        let err = parse_sse_line("data: {not json").expect_err("malformed chunk should fail");
        assert!(
            err.to_string().contains("Failed to parse stream chunk"),
            "unexpected error: {err}"
        );
    }
}
