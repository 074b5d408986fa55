//! duett-signaling – WebSocket Signaling-Relay
//!
//! Dieser Crate implementiert den Relay zwischen zwei Browser-Clients. Er
//! verwaltet die Bindung Name -> Verbindung, stellt Sitzungen her und
//! reicht Verhandlungsdaten unveraendert an genau die benannte Gegenseite
//! weiter.
//!
//! ## Architektur
//!
//! ```text
//! axum Router (SignalingServer)  GET / , GET /ws
//!     |
//!     v
//! ClientConnection (pro Verbindung ein Task)
//!     |  select!: Frames, Send-Queue, Ping, Timeout, Shutdown
//!     |
//!     v
//! MessageDispatcher
//!     |
//!     +-- login_handler  (Login, Benutzerliste)
//!     +-- relay_handler  (Offer, Answer, Decline, Candidate)
//!     +-- leave_handler  (Leave, Hangup, Verbindungsende, Ablauf)
//!
//! UserRegistry  – Wer ist angemeldet, wohin wird gesendet
//! SessionTable  – Sitzungen und offene Angebote
//! ```

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod server_state;
pub mod session;

// Bequeme Re-Exporte
pub use connection::ClientConnection;
pub use dispatcher::{DispatcherContext, MessageDispatcher};
pub use error::{SignalingError, SignalingResult};
pub use registry::{ClientSender, RegistryEvent, UserRegistry};
pub use server::SignalingServer;
pub use server_state::{SignalingConfig, SignalingState};
pub use session::{OffenesAngebot, SessionTable};
