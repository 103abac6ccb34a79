//! Client side of share delivery
//!
//! A spawned task pulls the response body chunk by chunk, reports progress
//! over a channel, and parses the assembled text once the body ends. Every
//! run emits at most one `Start`, any number of `Progress`, then exactly one
//! of `Complete` or `Error`, unless it is cancelled first.

use std::fmt::Display;

use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const IDENTITY_HEADER: &str = "x-user-id";

const EVENT_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Start,
    Progress {
        /// Bytes received so far, including this chunk.
        received_bytes: u64,
        chunk: String,
    },
    Complete {
        value: Value,
        size: u64,
    },
    Error {
        message: String,
        details: Option<String>,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Complete { .. } | StreamEvent::Error { .. })
    }

    fn error(message: impl Into<String>, details: impl Display) -> Self {
        StreamEvent::Error {
            message: message.into(),
            details: Some(details.to_string()),
        }
    }
}

/// Receiving end of a running transfer.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Next signal, or `None` once the transfer is over or cancelled.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.events.recv() => event,
        }
    }

    /// Aborts the in-flight read. No signal is delivered afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the background task to release its resources.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Share stream task ended abnormally");
        }
    }
}

/// Consumes an already-open body stream in the background.
pub fn spawn_parse<S, B, E>(body: S) -> StreamHandle
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Display + Send,
{
    spawn(move |tx| async move {
        if send(&tx, StreamEvent::Start).await {
            consume(body, &tx).await;
        }
    })
}

/// Fetches `/shares/{share_code}` from `base_url` and consumes the body in
/// the background.
pub fn fetch_share(
    client: &reqwest::Client,
    base_url: &str,
    share_code: &str,
    identity: Option<&str>,
) -> StreamHandle {
    let url = format!(
        "{}/shares/{}",
        base_url.trim_end_matches('/'),
        urlencoding::encode(share_code)
    );
    let mut request = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json");
    if let Some(identity) = identity {
        request = request.header(IDENTITY_HEADER, identity);
    }

    spawn(move |tx| async move {
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                send(&tx, StreamEvent::error("request failed", e)).await;
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            send(
                &tx,
                StreamEvent::Error {
                    message: format!("request failed: {status}"),
                    details: Some(details),
                },
            )
            .await;
            return;
        }

        if send(&tx, StreamEvent::Start).await {
            consume(response.bytes_stream(), &tx).await;
        }
    })
}

fn spawn<F, Fut>(run: F) -> StreamHandle
where
    F: FnOnce(mpsc::Sender<StreamEvent>) -> Fut,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let (tx, events) = mpsc::channel(EVENT_BUFFER);
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let run = run(tx);

    let task = tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {
                tracing::debug!("Share stream cancelled, dropping partial body");
            }
            _ = run => {}
        }
    });

    StreamHandle {
        events,
        cancel,
        task,
    }
}

async fn consume<S, B, E>(body: S, tx: &mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = Utf8Decoder::default();
    let mut text = String::new();
    let mut received: u64 = 0;

    while let Some(item) = body.next().await {
        let bytes = match item {
            Ok(bytes) => bytes,
            Err(e) => {
                send(tx, StreamEvent::error("stream failed", e)).await;
                return;
            }
        };

        let bytes = bytes.as_ref();
        received += bytes.len() as u64;
        let chunk = decoder.decode(bytes);
        text.push_str(&chunk);

        let progress = StreamEvent::Progress {
            received_bytes: received,
            chunk,
        };
        if !send(tx, progress).await {
            return;
        }
    }

    text.push_str(&decoder.finish());

    let event = match serde_json::from_str::<Value>(&text) {
        Ok(value) => StreamEvent::Complete {
            value,
            size: received,
        },
        Err(e) => StreamEvent::error("failed to parse JSON", e),
    };
    send(tx, event).await;
}

/// Returns false once the receiver is gone.
async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    tx.send(event).await.is_ok()
}

/// Incremental UTF-8 decoder that holds back a multi-byte sequence split
/// across chunks and replaces invalid bytes with U+FFFD.
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);

        let mut out = String::new();
        let mut input = self.pending.as_slice();
        loop {
            match std::str::from_utf8(input) {
                Ok(valid) => {
                    out.push_str(valid);
                    input = &[];
                    break;
                }
                Err(e) => {
                    let (valid, rest) = input.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            input = &rest[len..];
                        }
                        None => {
                            input = rest;
                            break;
                        }
                    }
                }
            }
        }

        let consumed = self.pending.len() - input.len();
        self.pending.drain(..consumed);
        out
    }

    fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn chunks(parts: &[&[u8]]) -> Vec<Result<Vec<u8>, io::Error>> {
        parts.iter().map(|p| Ok(p.to_vec())).collect()
    }

    async fn drain(handle: &mut StreamHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            events.push(event);
        }
        events
    }

    #[test]
    fn decoder_joins_split_characters() {
        let text = "{\"name\":\"café ☕\"}";
        let bytes = text.as_bytes();
        let mut decoder = Utf8Decoder::default();

        let mut out = String::new();
        for byte in bytes {
            out.push_str(&decoder.decode(std::slice::from_ref(byte)));
        }
        out.push_str(&decoder.finish());
        assert_eq!(out, text);
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8Decoder::default();
        assert_eq!(decoder.decode(b"a\xffb"), "a\u{FFFD}b");
        assert_eq!(decoder.decode(b"\xe2\x98"), "");
        assert_eq!(decoder.finish(), "\u{FFFD}");
    }

    #[tokio::test]
    async fn successful_transfer_signal_order() {
        let body = "{\"greeting\":\"héllo\",\"n\":[1,2,3]}";
        let bytes = body.as_bytes();
        let (a, rest) = bytes.split_at(15);
        let (b, c) = rest.split_at(6);

        let mut handle = spawn_parse(futures::stream::iter(chunks(&[a, b, c])));
        let events = drain(&mut handle).await;

        assert_eq!(events.first(), Some(&StreamEvent::Start));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

        let mut last = 0;
        let mut text = String::new();
        for event in &events[1..events.len() - 1] {
            match event {
                StreamEvent::Progress {
                    received_bytes,
                    chunk,
                } => {
                    assert!(*received_bytes >= last);
                    last = *received_bytes;
                    text.push_str(chunk);
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(text, body);

        let expected: Value = serde_json::from_str(body).unwrap();
        assert_eq!(
            events.last(),
            Some(&StreamEvent::Complete {
                value: expected,
                size: bytes.len() as u64,
            })
        );
        handle.wait().await;
    }

    #[tokio::test]
    async fn invalid_json_ends_in_single_error() {
        let mut handle = spawn_parse(futures::stream::iter(chunks(&[b"{\"a\":", b" tru"])));
        let events = drain(&mut handle).await;

        assert_eq!(events[0], StreamEvent::Start);
        match events.last().unwrap() {
            StreamEvent::Error { message, details } => {
                assert_eq!(message, "failed to parse JSON");
                assert!(details.is_some());
            }
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }

    #[tokio::test]
    async fn stream_error_ends_in_single_error() {
        let items: Vec<Result<Vec<u8>, io::Error>> = vec![
            Ok(b"[1,".to_vec()),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(b"2]".to_vec()),
        ];
        let mut handle = spawn_parse(futures::stream::iter(items));
        let events = drain(&mut handle).await;

        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], StreamEvent::Progress { received_bytes: 3, .. }));
        assert_eq!(
            events[2],
            StreamEvent::Error {
                message: "stream failed".into(),
                details: Some("reset".into()),
            }
        );
    }

    #[tokio::test]
    async fn cancel_stops_signals_and_releases_task() {
        let head = futures::stream::iter(chunks(&[b"[1,2"]));
        let body = head.chain(futures::stream::pending());
        let mut handle = spawn_parse(body);

        assert_eq!(handle.next_event().await, Some(StreamEvent::Start));
        assert!(matches!(
            handle.next_event().await,
            Some(StreamEvent::Progress { .. })
        ));

        handle.cancel();
        assert_eq!(handle.next_event().await, None);
        assert_eq!(handle.next_event().await, None);
        handle.wait().await;
    }

    #[tokio::test]
    async fn unreachable_server_reports_error() {
        let client = reqwest::Client::new();
        let mut handle = fetch_share(&client, "http://127.0.0.1:9", "abcdefgh", None);
        let events = drain(&mut handle).await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { message, .. } if message == "request failed"));
    }
}
