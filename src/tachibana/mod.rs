//! Tachibana e-支店 API client: transport, sessions, master data, events

pub mod auth;
pub mod events;
pub mod marshal;
pub mod master;
pub mod messages;
pub mod session;
pub mod session_manager;
pub mod transport;

pub use auth::AuthClient;
pub use events::{EventStreamClient, EventSubscription, SymbolSubscription};
pub use master::{MasterData, MasterDataClient, MasterSelector};
pub use session::{Session, SessionRecord};
pub use session_manager::{create_session_manager, Credentials, SessionManager, SessionPolicy};
pub use transport::Transport;
