//! Handler fuer alle Signaling-Nachrichten
//!
//! Jeder Handler ist fuer eine Gruppe von Nachrichtentypen zustaendig
//! und hat Zugriff auf den gemeinsamen SignalingState.

pub mod leave_handler;
pub mod login_handler;
pub mod relay_handler;
