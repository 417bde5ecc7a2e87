//! Newline-delimited JSON stream processing for streamed webhook replies.
//!
//! The chat trigger writes one JSON frame per line:
//! ```text
//! {"type":"begin","metadata":{"nodeId":"agent","runIndex":0}}
//! {"type":"item","content":"Hel","metadata":{"nodeId":"agent","runIndex":0}}
//! {"type":"item","content":"lo","metadata":{"nodeId":"agent","runIndex":0}}
//! {"type":"end","metadata":{"nodeId":"agent","runIndex":0}}
//! ```

use bytes::{Bytes, BytesMut};
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use crate::transport::{StreamEvent, TransportError};

/// Extension trait for `reqwest::Response` to enable NDJSON streaming.
///
/// # Example
/// ```ignore
/// use webhook_chat::ndjson::NdjsonResponseExt;
///
/// let response = client.post(url).send().await?;
/// let mut events = response.ndjson_events();
/// while let Some(event) = events.next().await {
///     println!("{:?}", event?);
/// }
/// ```
pub trait NdjsonResponseExt {
    /// Convert the response into a stream of decoded stream events.
    fn ndjson_events(self) -> impl Stream<Item = Result<StreamEvent, TransportError>> + Send;
}

impl NdjsonResponseExt for reqwest::Response {
    fn ndjson_events(self) -> impl Stream<Item = Result<StreamEvent, TransportError>> + Send {
        events(self.bytes_stream())
    }
}

/// Decode a raw byte stream into stream events, one per non-empty line.
pub fn events<S, E>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent, TransportError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    lines(byte_stream).filter_map(|line| async move {
        match line {
            Ok(line) => parse_ndjson_line(&line).map(Ok),
            Err(e) => Some(Err(e)),
        }
    })
}

/// Split a raw byte stream into trimmed, non-empty lines.
///
/// Bytes are buffered until a full line is available so multi-byte
/// characters split across reads decode correctly. A trailing line without
/// a newline is emitted when the stream ends.
pub fn lines<S, E>(byte_stream: S) -> impl Stream<Item = Result<String, TransportError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<TransportError> + Send + 'static,
{
    stream::unfold(
        (Box::pin(byte_stream), BytesMut::new(), false),
        |(mut byte_stream, mut buffer, mut stream_ended)| async move {
            loop {
                // Process complete lines from buffer
                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let raw = buffer.split_to(pos + 1);
                    let line = String::from_utf8_lossy(&raw).trim().to_string();

                    if !line.is_empty() {
                        return Some((Ok(line), (byte_stream, buffer, stream_ended)));
                    }
                }

                if stream_ended {
                    if buffer.is_empty() {
                        return None;
                    }

                    let raw = buffer.split();
                    let line = String::from_utf8_lossy(&raw).trim().to_string();
                    if line.is_empty() {
                        return None;
                    }
                    return Some((Ok(line), (byte_stream, buffer, stream_ended)));
                }

                match byte_stream.next().await {
                    Some(Ok(chunk)) => buffer.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((Err(e.into()), (byte_stream, buffer, stream_ended)));
                    }
                    None => stream_ended = true,
                }
            }
        },
    )
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FrameMetadata {
    node_id: Option<String>,
    run_index: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Frame {
    Begin {
        #[serde(default)]
        metadata: FrameMetadata,
    },
    Item {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        metadata: FrameMetadata,
    },
    End {
        #[serde(default)]
        metadata: FrameMetadata,
    },
    Error {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        metadata: FrameMetadata,
    },
    #[serde(other)]
    Other,
}

/// Decode one line of the stream.
///
/// Lines that are not JSON frames are delivered as plain text chunks.
/// Lifecycle frames without a node id and unknown frame types yield `None`.
///
/// # Example
/// ```
/// use webhook_chat::ndjson::parse_ndjson_line;
/// use webhook_chat::transport::StreamEvent;
///
/// let event = parse_ndjson_line(r#"{"type":"item","content":"hi"}"#);
/// assert_eq!(
///     event,
///     Some(StreamEvent::Chunk { content: "hi".into(), node_id: None, run_index: None })
/// );
/// ```
pub fn parse_ndjson_line(line: &str) -> Option<StreamEvent> {
    let frame = match serde_json::from_str::<Frame>(line) {
        Ok(frame) => frame,
        Err(_) => {
            return Some(StreamEvent::Chunk {
                content: line.to_string(),
                node_id: None,
                run_index: None,
            });
        }
    };

    match frame {
        Frame::Begin { metadata } => match metadata.node_id {
            Some(node_id) => Some(StreamEvent::Begin {
                node_id,
                run_index: metadata.run_index,
            }),
            None => {
                debug!("begin frame without node id ignored");
                None
            }
        },
        Frame::Item { content, metadata } => Some(StreamEvent::Chunk {
            content: content.unwrap_or_default(),
            node_id: metadata.node_id,
            run_index: metadata.run_index,
        }),
        Frame::End { metadata } => match metadata.node_id {
            Some(node_id) => Some(StreamEvent::End {
                node_id,
                run_index: metadata.run_index,
            }),
            None => {
                debug!("end frame without node id ignored");
                None
            }
        },
        Frame::Error { content, metadata } => Some(StreamEvent::Error {
            content,
            node_id: metadata.node_id,
            run_index: metadata.run_index,
        }),
        Frame::Other => None,
    }
}
