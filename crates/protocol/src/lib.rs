//! duett-protocol – Signaling-Nachrichten
//!
//! Dieses Crate definiert alle JSON-Nachrichten, die zwischen Browser-Client
//! und Relay ueber den WebSocket-Kanal ausgetauscht werden.

pub mod control;

pub use control::{
    ClientNachricht, Eingang, Freigabe, ServerNachricht, GRUND_BESCHAEFTIGT, GRUND_GETRENNT,
    GRUND_OFFLINE, GRUND_ZEITUEBERSCHRITTEN, TYP_UNDEFINIERT,
};
