//! Streaming master-data decoder
//!
//! The master endpoint answers one long-lived GET with an unbounded sequence
//! of back-to-back JSON objects: no enclosing array, no separators. Objects
//! are demultiplexed by their `sCLMID` discriminator into typed collections
//! until the `CLMEventDownloadComplete` sentinel arrives, which ends the
//! download immediately even if the underlying stream stays open. A stream
//! that closes without the sentinel is a truncated transfer, never a partial
//! success.
//!
//! Framing uses an incremental tokenizer that tracks brace depth, string
//! state and escapes, so a `}` inside a string value can never be mistaken
//! for an object boundary.

use encoding_rs::{CoderResult, Decoder, SHIFT_JIS};
use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{ClientError, Result};
use crate::tachibana::marshal::{from_map, to_flat_map};
use crate::tachibana::messages::{
    DateInfo, MasterDownloadRequest, OperationStatus, RequestEnvelope, StockMarketMaster,
    StockMaster, SystemStatus, TickRule, CLMID_DATE_INFO, CLMID_DOWNLOAD_COMPLETE,
    CLMID_MASTER_DOWNLOAD, CLMID_OPERATION_STATUS, CLMID_STOCK_MARKET_MASTER, CLMID_STOCK_MASTER,
    CLMID_SYSTEM_STATUS, CLMID_TICK_RULE,
};
use crate::tachibana::session::Session;

/// Which master record types to request; empty means everything
#[derive(Debug, Clone, Default)]
pub struct MasterSelector {
    pub targets: Vec<String>,
}

impl MasterSelector {
    /// Download every master the provider offers
    pub fn all() -> Self {
        Self::default()
    }

    pub fn of<I, S>(targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            targets: targets.into_iter().map(Into::into).collect(),
        }
    }
}

/// Typed collections filled by one download
#[derive(Debug, Default)]
pub struct MasterData {
    pub system_status: Option<SystemStatus>,
    pub operation_statuses: Vec<OperationStatus>,
    pub date_info: Vec<DateInfo>,
    pub tick_rules: Vec<TickRule>,
    pub stocks: Vec<StockMaster>,
    pub stock_markets: Vec<StockMarketMaster>,
    /// Objects carrying a discriminator this client does not collect
    pub unknown_records: u64,
}

/// Bulk master-data download client.
///
/// This is a single very large exchange, characteristically multi-minute:
/// it is deliberately outside the transport's retry wrapper, and any
/// overall timeout belongs to the caller.
#[derive(Debug, Clone, Default)]
pub struct MasterDataClient;

impl MasterDataClient {
    pub fn new() -> Self {
        Self
    }

    /// Download the selected masters through the session's master endpoint
    #[instrument(skip(self, session))]
    pub async fn download(
        &self,
        session: &Session,
        selector: &MasterSelector,
    ) -> Result<MasterData> {
        let request = MasterDownloadRequest {
            envelope: RequestEnvelope::new(CLMID_MASTER_DOWNLOAD, session.next_p_no()),
            target_clmid: selector.targets.join(","),
        };
        let params = to_flat_map(&request)?;
        let payload = serde_json::to_string(&params)
            .map_err(|e| ClientError::Marshal(format!("request payload: {}", e)))?;
        let query: String = url::form_urlencoded::byte_serialize(payload.as_bytes()).collect();

        let response = session
            .http()
            .get(format!("{}?{}", session.master_url, query))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            // Hard error: this call is not retried
            return Err(ClientError::Transport {
                attempts: 1,
                message: format!("master endpoint returned status {}", status),
            });
        }

        let mut decoder = SHIFT_JIS.new_decoder();
        let mut framer = JsonObjectFramer::new();
        let mut data = MasterData::default();
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ClientError::Protocol(format!("master stream read error: {}", e)))?;
            framer.push(&decode_chunk(&mut decoder, &chunk, false)?);

            while let Some(object) = framer.next_object()? {
                if dispatch_object(&object, &mut data)? {
                    info!(
                        stocks = data.stocks.len(),
                        stock_markets = data.stock_markets.len(),
                        tick_rules = data.tick_rules.len(),
                        "master download complete"
                    );
                    return Ok(data);
                }
            }
        }

        // Flush any decoder state; a well-formed stream ends on an object
        // boundary, so this only matters for diagnostics.
        framer.push(&decode_chunk(&mut decoder, &[], true)?);
        while let Some(object) = framer.next_object()? {
            if dispatch_object(&object, &mut data)? {
                return Ok(data);
            }
        }

        Err(ClientError::StreamTruncated(
            "stream closed before the download-complete sentinel".to_string(),
        ))
    }
}

/// Route one framed object into its typed collection.
/// Returns true when the object is the terminal sentinel.
fn dispatch_object(object: &str, data: &mut MasterData) -> Result<bool> {
    let value: Value = serde_json::from_str(object)
        .map_err(|e| ClientError::Protocol(format!("master object parse error: {}", e)))?;
    let Value::Object(map) = value else {
        return Err(ClientError::Protocol(
            "master record is not a JSON object".to_string(),
        ));
    };

    let Some(clmid) = map.get("sCLMID").and_then(Value::as_str) else {
        warn!("master record without sCLMID discriminator");
        data.unknown_records += 1;
        return Ok(false);
    };

    match clmid {
        CLMID_DOWNLOAD_COMPLETE => return Ok(true),
        CLMID_SYSTEM_STATUS => data.system_status = Some(from_map(&map)?),
        CLMID_OPERATION_STATUS => data.operation_statuses.push(from_map(&map)?),
        CLMID_DATE_INFO => data.date_info.push(from_map(&map)?),
        CLMID_TICK_RULE => data.tick_rules.push(from_map(&map)?),
        CLMID_STOCK_MASTER => data.stocks.push(from_map(&map)?),
        CLMID_STOCK_MARKET_MASTER => data.stock_markets.push(from_map(&map)?),
        other => {
            debug!(discriminator = other, "uncollected master record type");
            data.unknown_records += 1;
        }
    }
    Ok(false)
}

/// Decode one Shift-JIS chunk, carrying multi-byte state across chunks
fn decode_chunk(decoder: &mut Decoder, input: &[u8], last: bool) -> Result<String> {
    let capacity = decoder
        .max_utf8_buffer_length(input.len())
        .unwrap_or(input.len() * 3 + 16);
    let mut out = String::with_capacity(capacity);
    let (result, _read, had_errors) = decoder.decode_to_string(input, &mut out, last);
    if had_errors {
        return Err(ClientError::Protocol(
            "master stream is not valid Shift-JIS".to_string(),
        ));
    }
    debug_assert!(matches!(result, CoderResult::InputEmpty));
    Ok(out)
}

/// Incremental top-level JSON object framer.
///
/// Accumulates decoded text and yields each complete `{...}` object as soon
/// as its closing brace arrives. Incomplete trailing data stays buffered
/// until more bytes complete it.
#[derive(Debug, Default)]
struct JsonObjectFramer {
    buf: String,
    /// Next byte offset to scan
    pos: usize,
    /// Byte offset of the current object's opening brace
    start: Option<usize>,
    depth: u32,
    in_string: bool,
    escaped: bool,
}

impl JsonObjectFramer {
    fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, text: &str) {
        self.buf.push_str(text);
    }

    /// Yield the next complete object, or None if the buffer holds only an
    /// incomplete prefix. Structural bytes are all ASCII, so scanning byte
    /// offsets of the UTF-8 buffer is safe.
    fn next_object(&mut self) -> Result<Option<String>> {
        let bytes = self.buf.as_bytes();
        let mut i = self.pos;
        while i < bytes.len() {
            let b = bytes[i];
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
            } else {
                match b {
                    b'"' => self.in_string = true,
                    b'{' => {
                        if self.depth == 0 {
                            self.start = Some(i);
                        }
                        self.depth += 1;
                    }
                    b'}' => {
                        if self.depth == 0 {
                            return Err(ClientError::Protocol(
                                "unbalanced closing brace in master stream".to_string(),
                            ));
                        }
                        self.depth -= 1;
                        if self.depth == 0 {
                            let start = self.start.take().unwrap_or(0);
                            let object = self.buf[start..=i].to_string();
                            self.buf.drain(..=i);
                            self.pos = 0;
                            return Ok(Some(object));
                        }
                    }
                    // Bytes between objects (whitespace, newlines) are noise
                    _ => {}
                }
            }
            i += 1;
        }
        self.pos = bytes.len();
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tachibana::session::{Session, SessionRecord};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session_for(server: &MockServer) -> Session {
        Session::from_record(SessionRecord {
            result_code: "0".to_string(),
            result_text: String::new(),
            second_password: "second".to_string(),
            request_url: format!("{}/request/", server.uri()),
            master_url: format!("{}/master/", server.uri()),
            price_url: format!("{}/price/", server.uri()),
            event_url: format!("{}/event/", server.uri()),
            cookies: vec![],
            p_no: 0,
        })
        .unwrap()
    }

    const SENTINEL: &str = r#"{"sCLMID":"CLMEventDownloadComplete"}"#;

    #[tokio::test]
    async fn collects_typed_records_and_stops_at_sentinel() {
        let server = MockServer::start().await;
        let body = [
            r#"{"sCLMID":"CLMIssueMstKabu","sIssueCode":"7203","sIssueName":"Toyota"}"#,
            r#"{"sCLMID":"CLMIssueMstKabu","sIssueCode":"9984","sIssueName":"SoftBank"}"#,
            r#"{"sCLMID":"CLMIssueSizyouMstKabu","sIssueCode":"7203","sZyouzyouSizyou":"00"}"#,
            SENTINEL,
        ]
        .concat();
        Mock::given(method("GET"))
            .and(path("/master/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into_bytes()))
            .mount(&server)
            .await;

        let session = session_for(&server);
        let data = MasterDataClient::new()
            .download(&session, &MasterSelector::all())
            .await
            .unwrap();

        assert_eq!(data.stocks.len(), 2);
        assert_eq!(data.stocks[0].issue_code, "7203");
        assert_eq!(data.stock_markets.len(), 1);
        assert_eq!(data.unknown_records, 0);
    }

    #[tokio::test]
    async fn truncated_stream_is_an_error_not_partial_success() {
        let server = MockServer::start().await;
        let body = [
            r#"{"sCLMID":"CLMIssueMstKabu","sIssueCode":"7203"}"#,
            r#"{"sCLMID":"CLMIssueMstKabu","sIssueCode":"9984"}"#,
        ]
        .concat();
        Mock::given(method("GET"))
            .and(path("/master/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into_bytes()))
            .mount(&server)
            .await;

        let session = session_for(&server);
        let err = MasterDataClient::new()
            .download(&session, &MasterSelector::all())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::StreamTruncated(_)));
    }

    #[tokio::test]
    async fn non_success_status_is_a_hard_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/master/"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let session = session_for(&server);
        let err = MasterDataClient::new()
            .download(&session, &MasterSelector::all())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Transport { attempts: 1, .. }));
    }

    #[tokio::test]
    async fn unknown_discriminators_are_counted_not_fatal() {
        let server = MockServer::start().await;
        let body = [
            r#"{"sCLMID":"CLMFutureMst","sIssueCode":"NK225"}"#,
            SENTINEL,
        ]
        .concat();
        Mock::given(method("GET"))
            .and(path("/master/"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.into_bytes()))
            .mount(&server)
            .await;

        let session = session_for(&server);
        let data = MasterDataClient::new()
            .download(&session, &MasterSelector::all())
            .await
            .unwrap();
        assert_eq!(data.unknown_records, 1);
    }

    #[test]
    fn framer_yields_back_to_back_objects() {
        let mut framer = JsonObjectFramer::new();
        framer.push(r#"{"a":"1"}{"b":"2"}"#);
        assert_eq!(framer.next_object().unwrap().unwrap(), r#"{"a":"1"}"#);
        assert_eq!(framer.next_object().unwrap().unwrap(), r#"{"b":"2"}"#);
        assert!(framer.next_object().unwrap().is_none());
    }

    #[test]
    fn framer_waits_for_objects_split_across_chunks() {
        let mut framer = JsonObjectFramer::new();
        framer.push(r#"{"sIssueName":"Toy"#);
        assert!(framer.next_object().unwrap().is_none());
        framer.push(r#"ota","sCode":"7203"}"#);
        assert_eq!(
            framer.next_object().unwrap().unwrap(),
            r#"{"sIssueName":"Toyota","sCode":"7203"}"#
        );
    }

    #[test]
    fn framer_ignores_braces_inside_string_values() {
        let mut framer = JsonObjectFramer::new();
        framer.push(r#"{"sText":"a } inside \" and {"}{"next":"y"}"#);
        assert_eq!(
            framer.next_object().unwrap().unwrap(),
            r#"{"sText":"a } inside \" and {"}"#
        );
        assert_eq!(framer.next_object().unwrap().unwrap(), r#"{"next":"y"}"#);
    }

    #[test]
    fn framer_handles_nested_objects() {
        let mut framer = JsonObjectFramer::new();
        framer.push(r#"{"outer":{"inner":"v"}}"#);
        assert_eq!(
            framer.next_object().unwrap().unwrap(),
            r#"{"outer":{"inner":"v"}}"#
        );
    }

    #[test]
    fn framer_rejects_stray_closing_brace() {
        let mut framer = JsonObjectFramer::new();
        framer.push("}");
        assert!(framer.next_object().is_err());
    }
}
