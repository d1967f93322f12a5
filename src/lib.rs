//! Tachibana Client Library
//!
//! A Rust client for the Tachibana Securities e-支店 trading API:
//! authenticated sessions, retried request exchanges, bulk master-data
//! downloads and the realtime WebSocket event stream.

pub mod common;
pub mod config;
pub mod tachibana;

// Re-export commonly used types
pub use common::channels::EventFields;
pub use common::errors::{ClientError, Result};
pub use config::types::AppConfig;
pub use tachibana::auth::AuthClient;
pub use tachibana::events::{EventStreamClient, EventSubscription, SymbolSubscription};
pub use tachibana::master::{MasterData, MasterDataClient, MasterSelector};
pub use tachibana::session::Session;
pub use tachibana::session_manager::{
    create_session_manager, Credentials, SessionManager, SessionPolicy,
};
pub use tachibana::transport::Transport;
