//! HTTP streaming implementation of the change feed.
//!
//! The platform delivers row changes over a long-lived HTTP response in
//! SSE framing: events separated by blank lines, JSON payloads on `data:`
//! lines. The first event on a healthy stream is the subscription
//! confirmation; everything after is row changes.

use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use tokio::sync::mpsc;
use tracing::instrument;

use crate::config::TrackingConfig;

use super::feed::{ChangeEvent, ChangeFeed, FeedError, FeedMessage, FeedRequest};

/// Buffered messages per open feed before backpressure.
const FEED_CHANNEL_CAPACITY: usize = 64;

/// Change feed over the platform's streaming HTTP endpoint.
#[derive(Clone)]
pub struct HttpChangeFeed {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChangeFeed {
    /// Create a new streaming feed client.
    ///
    /// # Panics
    ///
    /// Panics if the anonymous key contains invalid header characters;
    /// configuration validation rejects such keys before this point.
    #[must_use]
    pub fn new(config: &TrackingConfig) -> Self {
        let anon_key = config.anon_key.expose_secret();

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(
            "apikey",
            HeaderValue::from_str(anon_key).expect("Invalid anon key for header"),
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            endpoint: config.realtime_endpoint(),
        }
    }
}

impl ChangeFeed for HttpChangeFeed {
    #[instrument(skip(self), fields(table = %request.table))]
    async fn open(
        &self,
        request: FeedRequest,
    ) -> Result<mpsc::Receiver<FeedMessage>, FeedError> {
        let mut query: Vec<(&str, String)> = vec![("table", request.table.clone())];
        if let Some(filter) = &request.filter {
            query.push(("user_id", format!("eq.{}", filter.user_id)));
        }

        let response = self
            .client
            .get(&self.endpoint)
            .query(&query)
            .send()
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Connect(format!(
                "HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        tokio::spawn(pump_stream(response, tx));
        Ok(rx)
    }
}

/// Read the response body and forward parsed feed messages.
///
/// Ends when the stream ends, the transport errors, or the receiver side
/// is dropped (unsubscribe releases the connection this way).
async fn pump_stream(response: reqwest::Response, tx: mpsc::Sender<FeedMessage>) {
    use futures::StreamExt;

    let mut buffer = String::new();
    let mut byte_stream = std::pin::pin!(response.bytes_stream());

    while let Some(chunk_result) = byte_stream.next().await {
        match chunk_result {
            Ok(chunk) => {
                let Ok(text) = std::str::from_utf8(&chunk) else {
                    tracing::warn!("Dropping non-UTF-8 chunk from change feed");
                    continue;
                };
                buffer.push_str(text);

                while let Some(event) = extract_sse_event(&mut buffer) {
                    if let Some(message) = parse_feed_event(&event)
                        && tx.send(message).await.is_err()
                    {
                        // Receiver gone: the subscription was released.
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Change feed transport error");
                let _ = tx
                    .send(FeedMessage::Closed {
                        reason: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }

    tracing::debug!("Change feed stream ended");
    let _ = tx
        .send(FeedMessage::Closed {
            reason: "stream ended".to_owned(),
        })
        .await;
}

/// Extract a complete SSE event from the buffer.
///
/// Returns `Some(event)` if a complete event was found (and removes it from
/// the buffer), or `None` if no complete event is available yet.
fn extract_sse_event(buffer: &mut String) -> Option<String> {
    // SSE events are separated by double newlines
    buffer.find("\n\n").map(|idx| {
        let event = buffer.get(..idx).unwrap_or_default().to_string();
        *buffer = buffer.get(idx + 2..).unwrap_or_default().to_string();
        event
    })
}

/// Wire shape of one feed event payload.
#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Confirmed,
    Change(ChangeEvent),
    Closed { reason: Option<String> },
}

/// Parse an SSE event string into a `FeedMessage`.
///
/// Keep-alive comments and unparseable payloads are skipped; a broken
/// single event must not tear down the whole stream.
fn parse_feed_event(event: &str) -> Option<FeedMessage> {
    if event.trim().is_empty() {
        return None;
    }

    let mut data_line = None;
    for line in event.lines() {
        if let Some(stripped) = line.strip_prefix("data: ") {
            data_line = Some(stripped);
        }
    }
    let data = data_line?;

    match serde_json::from_str::<WireEvent>(data) {
        Ok(WireEvent::Confirmed) => Some(FeedMessage::Confirmed),
        Ok(WireEvent::Change(event)) => Some(FeedMessage::Change(event)),
        Ok(WireEvent::Closed { reason }) => Some(FeedMessage::Closed {
            reason: reason.unwrap_or_else(|| "closed by server".to_owned()),
        }),
        Err(e) => {
            tracing::warn!(error = %e, "Skipping unparseable feed event");
            None
        }
    }
}
