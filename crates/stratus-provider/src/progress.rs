//! Image pull progress.
//!
//! Runtimes report pull progress as newline-delimited JSON objects. A
//! line with an `error` field fails the pull. A line that is not JSON
//! (typically a truncated final message) is logged and skipped.

use bytes::{Buf, BytesMut};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::PullStream;
use crate::error::{ProviderError, ProviderResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Status(String),
    Error(String),
    Malformed(String),
}

#[derive(Deserialize)]
struct ProgressLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default, rename = "errorDetail")]
    error_detail: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: Option<String>,
}

/// Decode one progress line.
pub fn decode_line(line: &[u8]) -> Option<ProgressEvent> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    let event = match serde_json::from_str::<ProgressLine>(text) {
        Ok(ProgressLine {
            error: Some(error), ..
        }) => ProgressEvent::Error(error),
        Ok(ProgressLine {
            error_detail: Some(ErrorDetail {
                message: Some(message),
            }),
            ..
        }) => ProgressEvent::Error(message),
        Ok(line) => ProgressEvent::Status(line.status.unwrap_or_default()),
        Err(_) => ProgressEvent::Malformed(text.to_string()),
    };
    Some(event)
}

/// Consume a pull stream to its end.
///
/// Transport errors and `error` lines fail the pull; everything else,
/// including lines that are not JSON, lets it continue.
pub async fn follow_pull(image: &str, mut stream: PullStream) -> ProviderResult<()> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
        while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
            let line = buffer.split_to(pos + 1);
            handle(image, &line)?;
        }
    }
    if buffer.has_remaining() {
        handle(image, &buffer)?;
    }
    debug!(image, "pull finished");
    Ok(())
}

fn handle(image: &str, line: &[u8]) -> ProviderResult<()> {
    match decode_line(line) {
        Some(ProgressEvent::Error(message)) => Err(ProviderError::Pull {
            image: image.to_string(),
            message,
        }),
        Some(ProgressEvent::Malformed(text)) => {
            warn!(image, chunk = %text, "ignoring malformed pull progress");
            Ok(())
        }
        Some(ProgressEvent::Status(status)) => {
            debug!(image, %status, "pull progress");
            Ok(())
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn stream(chunks: Vec<&'static str>) -> PullStream {
        Box::pin(futures_util::stream::iter(
            chunks
                .into_iter()
                .map(|c| Ok::<_, ProviderError>(Bytes::from_static(c.as_bytes()))),
        ))
    }

    #[test]
    fn decodes_status_error_and_garbage() {
        assert_eq!(
            decode_line(br#"{"status":"Downloading","progress":"[==>  ]"}"#),
            Some(ProgressEvent::Status("Downloading".to_string()))
        );
        assert_eq!(
            decode_line(br#"{"errorDetail":{"message":"denied"},"error":"denied"}"#),
            Some(ProgressEvent::Error("denied".to_string()))
        );
        assert_eq!(
            decode_line(br#"{"errorDetail":{"message":"manifest unknown"}}"#),
            Some(ProgressEvent::Error("manifest unknown".to_string()))
        );
        assert_eq!(
            decode_line(b"{\"status\":\"Dow"),
            Some(ProgressEvent::Malformed("{\"status\":\"Dow".to_string()))
        );
        assert_eq!(decode_line(b"  \r\n"), None);
    }

    #[tokio::test]
    async fn truncated_final_chunk_still_succeeds() {
        let s = stream(vec![
            "{\"status\":\"Pulling from library/nginx\"}\n{\"status\":\"Down",
            "loading\"}\n",
            "{\"status\":\"Digest: sha256:ab",
        ]);
        follow_pull("nginx", s).await.unwrap();
    }

    #[tokio::test]
    async fn error_line_fails_the_pull() {
        let s = stream(vec![
            "{\"status\":\"Pulling\"}\n",
            "{\"error\":\"pull access denied\"}\n",
        ]);
        let err = follow_pull("private/app", s).await.unwrap_err();
        match err {
            ProviderError::Pull { image, message } => {
                assert_eq!(image, "private/app");
                assert_eq!(message, "pull access denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_stream_is_success() {
        follow_pull("nginx", stream(Vec::new())).await.unwrap();
    }
}
