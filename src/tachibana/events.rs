//! WebSocket event stream client
//!
//! Realtime notifications arrive over a WebSocket at the session's event
//! endpoint. Frames do not carry JSON: each frame is a flat record of
//! `key 0x02 value` fields separated by 0x01, with 0x03 separating
//! sub-values inside a value. Parsed records and stream errors are handed
//! to the consumer over capacity-1 channels, so a slow consumer exerts
//! backpressure on the socket instead of growing an unbounded queue.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use encoding_rs::SHIFT_JIS;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::common::channels::{create_event_channels, EventFields};
use crate::common::errors::{ClientError, Result};
use crate::tachibana::session::Session;

/// Field separator inside an event frame
const FIELD_SEP: u8 = 0x01;
/// Key/value separator inside a field
const KV_SEP: u8 = 0x02;
/// Sub-value separator inside a value
const SUB_SEP: u8 = 0x03;

/// Subprotocol the event endpoint requires on the handshake
const STREAM_SUBPROTOCOL: &str = "e-api-stream";

/// One instrument to receive events for
#[derive(Debug, Clone)]
pub struct SymbolSubscription {
    pub issue_code: String,
    pub market_code: String,
    /// Display-row slot the provider associates with the symbol
    pub row_no: u32,
}

/// What the event stream should carry
#[derive(Debug, Clone, Default)]
pub struct EventSubscription {
    /// Event category codes, e.g. price, news, order-execution notices
    pub event_categories: Vec<String>,
    pub symbols: Vec<SymbolSubscription>,
}

/// Client for the session's realtime event endpoint.
///
/// Holds at most one live connection; a second `connect` while one is
/// active is refused rather than silently replacing the stream.
pub struct EventStreamClient {
    is_connected: Arc<AtomicBool>,
    shutdown: watch::Sender<bool>,
}

impl Default for EventStreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStreamClient {
    pub fn new() -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            is_connected: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::SeqCst)
    }

    /// Connect to the session's event endpoint and start streaming.
    ///
    /// Returns one receiver for parsed event records and one for stream
    /// errors. The stream ends when the server closes, an error occurs, or
    /// [`close`](Self::close) is called.
    #[instrument(skip(self, session, subscription))]
    pub async fn connect(
        &self,
        session: &Session,
        subscription: &EventSubscription,
    ) -> Result<(mpsc::Receiver<EventFields>, mpsc::Receiver<ClientError>)> {
        if self
            .is_connected
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ClientError::WebSocket(
                "event stream already connected".to_string(),
            ));
        }
        self.shutdown.send_replace(false);

        let url = build_stream_url(&session.event_url, subscription)?;
        info!(%url, "connecting event stream");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ClientError::WebSocket(format!("handshake request: {}", e)))?;
        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            STREAM_SUBPROTOCOL
                .parse()
                .map_err(|_| ClientError::WebSocket("invalid subprotocol".to_string()))?,
        );
        if let Some(cookie) = session.cookie_header() {
            request.headers_mut().insert(
                COOKIE,
                cookie
                    .parse()
                    .map_err(|_| ClientError::WebSocket("invalid cookie header".to_string()))?,
            );
        }

        let (ws_stream, _response) = match connect_async(request).await {
            Ok(pair) => pair,
            Err(e) => {
                self.is_connected.store(false, Ordering::SeqCst);
                return Err(ClientError::WebSocket(e.to_string()));
            }
        };
        info!("event stream established");

        let (msg_tx, msg_rx, err_tx, err_rx) = create_event_channels();
        let (mut write, mut read) = ws_stream.split();
        let is_connected = self.is_connected.clone();
        let mut shutdown = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        // A dropped sender means close() can never arrive;
                        // treat it the same as an explicit close request.
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("event stream close requested");
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Binary(data))) => {
                                let fields = parse_event_frame(&data);
                                if fields.is_empty() {
                                    continue;
                                }
                                if msg_tx.send(fields).await.is_err() {
                                    debug!("event receiver dropped, stopping stream");
                                    break;
                                }
                            }
                            Some(Ok(Message::Text(text))) => {
                                let fields = parse_event_frame(text.as_bytes());
                                if fields.is_empty() {
                                    continue;
                                }
                                if msg_tx.send(fields).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                            Some(Ok(Message::Close(frame))) => {
                                info!(?frame, "event stream closed by server");
                                if let Some(frame) = &frame {
                                    if frame.code != CloseCode::Normal {
                                        let _ = err_tx
                                            .send(ClientError::WebSocket(format!(
                                                "server closed abnormally: {:?} ({})",
                                                frame.code, frame.reason
                                            )))
                                            .await;
                                    }
                                }
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "event stream read error");
                                let _ = err_tx.send(ClientError::WebSocket(e.to_string())).await;
                                break;
                            }
                            None => {
                                info!("event stream ended");
                                break;
                            }
                        }
                    }
                }
            }
            is_connected.store(false, Ordering::SeqCst);
        });

        Ok((msg_rx, err_rx))
    }

    /// Request the stream to close. Safe to call at any time, including
    /// when no connection is active or after a previous close.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

/// Build the event endpoint URL: the granted HTTP URL with the scheme
/// switched to WebSocket and the subscription rendered as query parameters
fn build_stream_url(event_url: &str, subscription: &EventSubscription) -> Result<Url> {
    let mut url = Url::parse(event_url)
        .map_err(|e| ClientError::WebSocket(format!("event url {}: {}", event_url, e)))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => other,
    }
    .to_string();
    url.set_scheme(&scheme)
        .map_err(|_| ClientError::WebSocket(format!("cannot derive ws scheme for {}", event_url)))?;

    let issue_codes: Vec<&str> = subscription
        .symbols
        .iter()
        .map(|s| s.issue_code.as_str())
        .collect();
    let market_codes: Vec<&str> = subscription
        .symbols
        .iter()
        .map(|s| s.market_code.as_str())
        .collect();
    let row_nos: Vec<String> = subscription
        .symbols
        .iter()
        .map(|s| s.row_no.to_string())
        .collect();

    url.query_pairs_mut()
        .append_pair("p_rid", "22")
        .append_pair("p_board_no", "1000")
        .append_pair("p_eno", "0")
        .append_pair("p_evt_cmd", &subscription.event_categories.join(","))
        .append_pair("p_issue_code", &issue_codes.join(","))
        .append_pair("p_mkt_code", &market_codes.join(","))
        .append_pair("p_gyou_no", &row_nos.join(","));
    Ok(url)
}

/// Parse one event frame into its key/value fields.
///
/// Fields are separated by 0x01, key from value by 0x02, and sub-values
/// inside a value by 0x03 (joined back with commas). Fields without a
/// key/value separator are skipped, not fatal: the provider occasionally
/// emits padding segments.
pub fn parse_event_frame(data: &[u8]) -> EventFields {
    let mut fields = BTreeMap::new();
    for record in data.split(|&b| b == FIELD_SEP) {
        if record.is_empty() {
            continue;
        }
        let Some(sep) = record.iter().position(|&b| b == KV_SEP) else {
            debug!(len = record.len(), "event field without separator skipped");
            continue;
        };
        let key = decode_text(&record[..sep]);
        if key.is_empty() {
            continue;
        }
        let value = record[sep + 1..]
            .split(|&b| b == SUB_SEP)
            .map(decode_text)
            .collect::<Vec<_>>()
            .join(",");
        fields.insert(key, value);
    }
    fields
}

fn decode_text(bytes: &[u8]) -> String {
    let (text, _, _) = SHIFT_JIS.decode(bytes);
    text.into_owned()
}
