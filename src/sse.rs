//! Incremental reader for `text/event-stream` chat replies.
//!
//! The backend writes one JSON object per `data: ` line. [`read_reply`] turns a
//! response body into a stream of [`StreamEvent`]s that always ends with exactly
//! one terminal item (`Done` or `Error`).

use crate::error::error_chain;
use crate::protocol::StreamEvent;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::collections::VecDeque;
use std::error::Error;
use std::pin::Pin;

const DATA_PREFIX: &str = "data: ";

/// Longest partial line kept while waiting for its `\n`.
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits raw body bytes into lines and decodes the `data: ` ones.
///
/// Bytes are buffered until a `\n` arrives, so a multi-byte character or a
/// JSON payload cut across chunks is only decoded once it is complete. A
/// partial line that outgrows `max_line_bytes` is dropped up to its newline.
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    max_line_bytes: usize,
    discarding: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line_bytes,
            discarding: false,
        }
    }

    /// Feeds a chunk and returns the events of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            if self.discarding {
                // Tail of an oversized line.
                self.discarding = false;
            } else if let Some(event) = parse_line(&self.buffer[start..end]) {
                events.push(event);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line_bytes {
            if !self.discarding {
                tracing::warn!(
                    limit = self.max_line_bytes,
                    "dropping oversized SSE line"
                );
            }
            self.buffer.clear();
            self.discarding = true;
        }

        events
    }

    /// Decodes whatever is left after the body ended without a final newline.
    pub fn finish(&mut self) -> Option<StreamEvent> {
        let rest = std::mem::take(&mut self.buffer);
        if std::mem::take(&mut self.discarding) {
            return None;
        }
        parse_line(&rest)
    }
}

fn parse_line(raw: &[u8]) -> Option<StreamEvent> {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    let line = String::from_utf8_lossy(raw);
    let payload = line.strip_prefix(DATA_PREFIX)?;

    match serde_json::from_str::<StreamEvent>(payload) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::warn!(error = %err, %line, "skipping malformed SSE event");
            None
        }
    }
}

struct ReplyReader<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<StreamEvent>,
    exhausted: bool,
}

impl<S, B, E> ReplyReader<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Error + 'static,
{
    async fn next_event(&mut self) -> StreamEvent {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return event;
            }
            if self.exhausted {
                tracing::debug!("reply body ended without a terminal event");
                return StreamEvent::Done;
            }

            match self.body.next().await {
                Some(Ok(chunk)) => {
                    let events = self.decoder.push(chunk.as_ref());
                    self.pending.extend(events);
                }
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "reply body read failed");
                    return StreamEvent::error(error_chain(&err));
                }
                None => {
                    self.exhausted = true;
                    self.pending.extend(self.decoder.finish());
                }
            }
        }
    }
}

/// Reads a chunked SSE body into reply events.
///
/// Tokens come out in receipt order. The first `done` or `error` payload ends
/// the stream and the rest of the body is never polled; a body that simply
/// runs out ends with an implicit `Done`, and a transport error while reading
/// ends it with `Error`.
pub fn read_reply<S, B, E>(body: S) -> BoxStream<'static, StreamEvent>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Error + Send + 'static,
{
    let reader = ReplyReader {
        body: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    stream::unfold(Some(reader), |reader| async move {
        let mut reader = reader?;
        let event = reader.next_event().await;
        let next = if event.is_terminal() { None } else { Some(reader) };
        Some((event, next))
    })
    .boxed()
}

/// A stream holding a single error, for failures before the body is reached.
pub fn failed_reply(message: impl Into<String>) -> BoxStream<'static, StreamEvent> {
    stream::once(futures::future::ready(StreamEvent::error(message))).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn token(content: &str) -> StreamEvent {
        StreamEvent::Token {
            content: content.to_string(),
        }
    }

    async fn collect(chunks: Vec<&'static str>) -> Vec<StreamEvent> {
        let body = stream::iter(chunks.into_iter().map(|c| Ok::<_, io::Error>(c.as_bytes())));
        read_reply(body).collect().await
    }

    #[tokio::test]
    async fn tokens_then_done() {
        let events = collect(vec![
            "data: {\"type\":\"token\",\"content\":\"A\"}\n\n",
            "data: {\"type\":\"token\",\"content\":\"B\"}\n\n",
            "data: {\"type\":\"done\"}\n\n",
        ])
        .await;

        assert_eq!(events, vec![token("A"), token("B"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn error_event_is_terminal() {
        let events = collect(vec![
            "data: {\"type\":\"token\",\"content\":\"partial\"}\n\n",
            "data: {\"type\":\"error\",\"content\":\"boom\"}\n\n",
            "data: {\"type\":\"done\"}\n\n",
        ])
        .await;

        assert_eq!(events, vec![token("partial"), StreamEvent::error("boom")]);
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let events = collect(vec![
            "data: {\"type\":\"token\",\"content\":\"A\"}\n\ndata: not-json\n\n",
            "data: {\"type\":\"token\",\"content\":\"B\"}\n\ndata: {\"type\":\"done\"}\n\n",
        ])
        .await;

        assert_eq!(events, vec![token("A"), token("B"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn end_of_body_is_implicit_done() {
        let events = collect(vec!["data: {\"type\":\"token\",\"content\":\"A\"}\n\n"]).await;
        assert_eq!(events, vec![token("A"), StreamEvent::Done]);

        let events = collect(vec![]).await;
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_decoded() {
        let events = collect(vec![
            "data: {\"type\":\"token\",\"content\":\"A\"}\n",
            "data: {\"type\":\"error\",\"content\":\"late\"}",
        ])
        .await;

        assert_eq!(events, vec![token("A"), StreamEvent::error("late")]);
    }

    #[tokio::test]
    async fn payload_split_across_chunks() {
        let events = collect(vec![
            "da",
            "ta: {\"type\":\"tok",
            "en\",\"content\":\"joined\"}\r",
            "\n\ndata: {\"type\":\"done\"}\r\n\r\n",
        ])
        .await;

        assert_eq!(events, vec![token("joined"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn multibyte_character_split_across_chunks() {
        let line = "data: {\"type\":\"token\",\"content\":\"привет ✓\"}\n".as_bytes();
        // Cut inside the two-byte "п".
        let cut = line.iter().position(|&b| b >= 0x80).unwrap() + 1;
        let chunks = vec![
            line[..cut].to_vec(),
            line[cut..].to_vec(),
            b"data: {\"type\":\"done\"}\n".to_vec(),
        ];
        let body = stream::iter(chunks.into_iter().map(Ok::<_, io::Error>));

        let events: Vec<_> = read_reply(body).collect().await;
        assert_eq!(events, vec![token("привет ✓"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn done_stops_reading_the_body() {
        let reads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reads);
        let body = stream::iter(vec![
            "data: {\"type\":\"done\"}\n",
            "data: {\"type\":\"token\",\"content\":\"ignored\"}\n",
            "data: {\"type\":\"token\",\"content\":\"ignored\"}\n",
        ])
        .map(move |chunk| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, io::Error>(chunk.as_bytes())
        });

        let events: Vec<_> = read_reply(body).collect().await;
        assert_eq!(events, vec![StreamEvent::Done]);
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_error_ends_stream() {
        let body = stream::iter(vec![
            Ok(b"data: {\"type\":\"token\",\"content\":\"A\"}\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
            Ok(b"data: {\"type\":\"token\",\"content\":\"B\"}\n".to_vec()),
        ]);

        let events: Vec<_> = read_reply(body).collect().await;
        assert_eq!(events, vec![token("A"), StreamEvent::error("connection reset")]);
    }

    #[test]
    fn oversized_partial_line_is_dropped() {
        let mut decoder = SseDecoder::with_max_line(16);

        assert!(decoder.push(b"data: {\"type\":\"token\",").is_empty());
        assert!(decoder.buffer.is_empty());
        // The rest of the oversized line is discarded; the next line parses.
        let events = decoder.push(b"\"content\":\"x\"}\ndata: {\"type\":\"done\"}\n");
        assert_eq!(events, vec![StreamEvent::Done]);
    }

    #[test]
    fn oversized_line_at_end_of_body_is_not_decoded() {
        let mut decoder = SseDecoder::with_max_line(8);
        assert!(decoder.push(b"data: {\"type\":\"done\"}").is_empty());
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn decoder_ignores_non_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\nevent: message\nid: 7\ndata:{\"type\":\"done\"}\n");
        // Only the exact "data: " prefix counts.
        assert!(events.is_empty());
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn failed_reply_yields_single_error() {
        let events: Vec<_> = failed_reply("Failed to send message: 500 Internal Server Error")
            .collect()
            .await;
        assert_eq!(
            events,
            vec![StreamEvent::error(
                "Failed to send message: 500 Internal Server Error"
            )]
        );
    }
}
