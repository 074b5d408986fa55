//! duett-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die Relay und Client
//! gemeinsam nutzen: Identitaeten, Sitzungs-Paarungen und den
//! zentralen Fehler-Enum.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{DuettError, Result};
pub use types::{Identitaet, Sitzung};
