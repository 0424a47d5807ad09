//! Newline-delimited JSON stream decoding.

use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::error::QueueError;

struct LineState<S> {
    inner: S,
    buf: Vec<u8>,
    done: bool,
}

fn parse_line(line: &[u8]) -> Option<Value> {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(value) => Some(value),
        Err(e) => {
            let preview: String = trimmed.chars().take(500).collect();
            warn!(error = %e, line = %preview, "Dropping malformed JSON line");
            None
        }
    }
}

/// Decode a byte stream into one JSON value per line.
///
/// Blank and malformed lines are dropped. A read error is yielded once and
/// ends the stream.
pub fn decode_lines<S, B, E>(bytes: S) -> impl Stream<Item = Result<Value, QueueError>>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<QueueError>,
{
    let state = LineState {
        inner: bytes,
        buf: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                if let Some(value) = parse_line(&line) {
                    return Some((Ok(value), st));
                }
                continue;
            }

            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                match parse_line(&rest) {
                    Some(value) => return Some((Ok(value), st)),
                    None => return None,
                }
            }

            match st.inner.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>, QueueError>> + Unpin {
        let items: Vec<Result<Vec<u8>, QueueError>> =
            parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        stream::iter(items)
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let values: Vec<Value> = decode_lines(chunks(&["{\"a\":", "1}\n{\"b\"", ":2}\n"]))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[tokio::test]
    async fn test_malformed_and_blank_lines_dropped() {
        let values: Vec<Value> = decode_lines(chunks(&["\n{oops}\n  \n{\"ok\":true}\n"]))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!({"ok": true})]);
    }

    #[tokio::test]
    async fn test_trailing_line_without_newline() {
        let values: Vec<Value> = decode_lines(chunks(&["{\"a\":1}\r\n{\"b\":2}"]))
            .map(|r| r.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[tokio::test]
    async fn test_read_error_ends_stream() {
        let items: Vec<Result<Vec<u8>, QueueError>> = vec![
            Ok(b"{\"a\":1}\n".to_vec()),
            Err(QueueError::Decode("connection reset".to_string())),
            Ok(b"{\"b\":2}\n".to_vec()),
        ];
        let results: Vec<Result<Value, QueueError>> =
            decode_lines(stream::iter(items)).collect().await;
        assert_eq!(results.len(), 2);
        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(QueueError::Decode(_))));
    }
}
