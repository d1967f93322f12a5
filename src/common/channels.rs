//! Channel type definitions for the event stream hand-off

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use super::errors::ClientError;

/// Decoded key/value fields of one event frame
pub type EventFields = BTreeMap<String, String>;

/// Hand-off channel capacity. A capacity of one makes delivery a rendezvous:
/// a slow consumer backpressures the reader instead of being dropped.
pub const EVENT_CHANNEL_SIZE: usize = 1;

/// Create the message/error channel pair used by the event stream reader
pub fn create_event_channels() -> (
    mpsc::Sender<EventFields>,
    mpsc::Receiver<EventFields>,
    mpsc::Sender<ClientError>,
    mpsc::Receiver<ClientError>,
) {
    let (msg_tx, msg_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    let (err_tx, err_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
    (msg_tx, msg_rx, err_tx, err_rx)
}
