//! The only impure edge a provider adapter touches (§11 of
//! `SPEC_FULL.md`): turns a pure `http::Request<Vec<u8>>` built by an
//! adapter's `*_request` function into a real network call via
//! `reqwest`, and turns vendor SSE byte streams into a lazy sequence of
//! frames a wire-translation module can fold into `StreamChunk`s. Every
//! adapter's `chat_request`/`parse_chat` pair stays pure and unit
//! testable (§11 "Test tooling"); only `execute` and `execute_stream`
//! touch a socket.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use helix_core::HelixError;
use std::time::Duration;

/// Converts a `reqwest::Error` into the closed `HelixError` taxonomy.
/// Timeouts and connect failures map onto the two kinds an adapter is
/// permitted to retry internally (§4.1); everything else surfaces as a
/// generic connection failure since `reqwest` gives no finer signal.
fn map_reqwest_error(err: reqwest::Error) -> HelixError {
    if err.is_timeout() {
        HelixError::Timeout
    } else {
        HelixError::ConnectionFailed(err.to_string())
    }
}

/// Executes a pure `http::Request` and returns a pure `http::Response`,
/// both carrying plain `Vec<u8>` bodies so adapter-level parsing stays
/// network-free and testable. `deadline` is the effective per-call
/// deadline already narrowed to `min(request, engine, adapter)` (§5);
/// passing `None` executes with only the client's own configured
/// timeout.
pub async fn execute(
    client: &reqwest::Client,
    request: http::Request<Vec<u8>>,
    deadline: Option<Duration>,
) -> Result<http::Response<Vec<u8>>, HelixError> {
    let (parts, body) = request.into_parts();
    let mut builder = client.request(parts.method, parts.uri.to_string());
    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }
    builder = builder.body(body);
    if let Some(deadline) = deadline {
        builder = builder.timeout(deadline);
    }

    let response = builder.send().await.map_err(map_reqwest_error)?;
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.bytes().await.map_err(map_reqwest_error)?;

    let mut builder = http::Response::builder().status(status);
    for (name, value) in headers.iter() {
        builder = builder.header(name, value);
    }
    builder
        .body(body.to_vec())
        .map_err(|e| HelixError::MalformedResponse(e.to_string()))
}

/// Opens a streaming (SSE) request and returns the raw byte stream,
/// chunked exactly as `reqwest` delivers them off the wire — no framing
/// applied yet, since vendors differ in how many SSE events land in one
/// poll. `frame_sse` below does the `\n\n`-delimited splitting every
/// vendor's SSE format shares.
pub async fn execute_stream(
    client: &reqwest::Client,
    request: http::Request<Vec<u8>>,
) -> Result<BoxStream<'static, Result<Bytes, HelixError>>, HelixError> {
    let (parts, body) = request.into_parts();
    let mut builder = client.request(parts.method, parts.uri.to_string());
    for (name, value) in parts.headers.iter() {
        builder = builder.header(name, value);
    }
    let response = builder
        .body(body)
        .send()
        .await
        .map_err(map_reqwest_error)?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.bytes().await.unwrap_or_default();
        return Err(crate::status_to_error(status, &body));
    }

    Ok(response.bytes_stream().map(|r| r.map_err(map_reqwest_error)).boxed())
}

/// Converts a non-2xx status into a `HelixError`, used identically by
/// every bespoke-wire adapter (OpenAI-wire vendors use
/// `helix_openai_wire::wire_http_error` instead, which additionally
/// parses the common `{"error":{"message"}}` envelope).
pub fn status_to_error(status: u16, body: &[u8]) -> HelixError {
    let message = String::from_utf8_lossy(body).to_string();
    match status {
        401 | 403 => HelixError::AuthFailed(message),
        429 => HelixError::RateLimited { retry_after_ms: None },
        400 | 404 => HelixError::BadRequest(message),
        500..=599 => HelixError::InternalProviderError(message),
        _ => HelixError::InternalProviderError(message),
    }
}

/// Incrementally splits a byte stream on blank-line (`\n\n`) SSE frame
/// boundaries, yielding each complete frame (sans the trailing blank
/// line) as it becomes available. Vendors occasionally split a single
/// frame across multiple TCP reads; this buffers until a full frame is
/// seen rather than assuming one frame per poll.
pub fn frame_sse(
    mut bytes: BoxStream<'static, Result<Bytes, HelixError>>,
) -> BoxStream<'static, Result<Vec<u8>, HelixError>> {
    async_stream::stream! {
        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(bytes) => {
                    buf.extend_from_slice(&bytes);
                    while let Some(pos) = find_double_newline(&buf) {
                        let frame = buf[..pos].to_vec();
                        let rest = buf[pos + 2..].to_vec();
                        buf = rest;
                        if !frame.is_empty() {
                            yield Ok(frame);
                        }
                    }
                }
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
        if !buf.is_empty() {
            yield Ok(buf);
        }
    }
    .boxed()
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn maps_429_to_rate_limited() {
        let err = status_to_error(429, b"slow down");
        assert!(matches!(err, HelixError::RateLimited { .. }));
    }

    #[test]
    fn maps_500_to_internal_provider_error() {
        let err = status_to_error(503, b"oops");
        assert!(matches!(err, HelixError::InternalProviderError(_)));
    }

    #[tokio::test]
    async fn frame_sse_splits_on_blank_lines_across_chunks() {
        let chunks: Vec<Result<Bytes, HelixError>> = vec![
            Ok(Bytes::from_static(b"data: {\"a\":1}\n")),
            Ok(Bytes::from_static(b"\ndata: {\"b\":2}\n\n")),
        ];
        let input = stream::iter(chunks).boxed();
        let mut framed = frame_sse(input);
        let first = framed.next().await.unwrap().unwrap();
        assert_eq!(String::from_utf8(first).unwrap(), "data: {\"a\":1}");
        let second = framed.next().await.unwrap().unwrap();
        assert_eq!(String::from_utf8(second).unwrap(), "data: {\"b\":2}");
        assert!(framed.next().await.is_none());
    }
}
