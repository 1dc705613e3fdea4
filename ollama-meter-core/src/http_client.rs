use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, MeterError};

/// One newline-delimited line of a streamed body (`\n` / `\r\n` stripped).
#[derive(Debug, Clone)]
pub struct BodyLine {
    pub line: String,
}

/// A boxed stream of `BodyLine` results.
pub type LineStreamBox =
    std::pin::Pin<Box<dyn futures_util::stream::Stream<Item = CoreResult<BodyLine>> + Send>>;

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| MeterError::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: concat!("ollama-meter/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// POST JSON and decode a JSON reply. Returns the body and the latency in ms.
    pub async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<(R, u32)> {
        let start = Instant::now();
        let resp = self.send(url, body, headers, "application/json").await?;
        let latency = start.elapsed().as_millis() as u32;
        let status = resp.status();

        let parsed = resp
            .json::<R>()
            .await
            .map_err(|e| MeterError::ProviderError {
                provider: "http".into(),
                code: status.as_u16().to_string(),
                message: format!("json decode error: {e}"),
            })?;
        Ok((parsed, latency))
    }

    /// POST JSON where the reply may be empty. An empty body decodes to `Value::Null`.
    pub async fn post_json_lenient<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<serde_json::Value> {
        let resp = self.send(url, body, headers, "application/json").await?;
        let status = resp.status();
        let bytes = resp
            .bytes()
            .await
            .map_err(|_| MeterError::ProviderUnavailable { provider: "http".into() })?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_slice(&bytes).map_err(|e| MeterError::ProviderError {
            provider: "http".into(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }

    /// POST JSON and return the reply body as a newline-delimited line stream.
    pub async fn post_ndjson_lines<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> CoreResult<LineStreamBox> {
        let resp = self.send(url, body, headers, "application/x-ndjson").await?;
        let byte_stream = resp.bytes_stream();
        let line_stream = LineStream::new(Box::pin(byte_stream));
        Ok(Box::pin(line_stream))
    }

    async fn send<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        accept: &str,
    ) -> CoreResult<reqwest::Response> {
        let mut req = self
            .inner
            .post(url)
            .json(body)
            .header("User-Agent", &self.user_agent)
            .header("Accept", accept);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }

        let resp = req
            .send()
            .await
            .map_err(|_e| MeterError::ProviderUnavailable {
                provider: "http".into(),
            })?;

        let status = resp.status();
        if !status.is_success() {
            let headers = resp.headers().clone();
            let ra = parse_retry_after(&headers);
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error("http", status, ra, &text));
        }
        Ok(resp)
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    if let Some(v) = headers.get("retry-after")
        && let Ok(s) = v.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Some(secs);
    }
    None
}

fn map_http_error(provider: &str, status: StatusCode, retry_after: Option<u64>, body: &str) -> MeterError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => MeterError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        s if s.is_server_error() => MeterError::ProviderUnavailable {
            provider: provider.to_string(),
        },
        s => MeterError::ProviderError {
            provider: provider.to_string(),
            code: s.as_u16().to_string(),
            message: truncate(body, 300),
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}

/// Internal line splitter over a bytes stream; yields `BodyLine`s separated by '\n'.
struct LineStream {
    inner: std::pin::Pin<
        Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
    >,
    buf: Vec<u8>,
    flushed_tail: bool,
}

impl LineStream {
    fn new(
        inner: std::pin::Pin<
            Box<dyn futures_util::stream::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>,
        >,
    ) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            flushed_tail: false,
        }
    }
}

impl futures_util::stream::Stream for LineStream {
    type Item = CoreResult<BodyLine>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        loop {
            // Split on raw bytes so multi-byte chars spanning chunks survive.
            if let Some(idx) = self.buf.iter().position(|b| *b == b'\n') {
                let mut raw: Vec<u8> = self.buf.drain(..=idx).collect();
                raw.pop();
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                let line = String::from_utf8_lossy(&raw).into_owned();
                return Poll::Ready(Some(Ok(BodyLine { line })));
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    self.buf.extend_from_slice(&chunk);
                    continue;
                }
                Poll::Ready(Some(Err(_e))) => {
                    return Poll::Ready(Some(Err(MeterError::ProviderUnavailable {
                        provider: "http".into(),
                    })));
                }
                Poll::Ready(None) => {
                    if !self.flushed_tail && !self.buf.is_empty() {
                        self.flushed_tail = true;
                        let raw = std::mem::take(&mut self.buf);
                        let line = String::from_utf8_lossy(&raw).into_owned();
                        return Poll::Ready(Some(Ok(BodyLine { line })));
                    } else {
                        return Poll::Ready(None);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
