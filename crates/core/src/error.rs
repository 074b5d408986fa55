//! Fehlertypen fuer Duett
//!
//! Zentraler Fehler-Enum fuer alles, was Relay und Client gemeinsam
//! betrifft. Untermodule definieren eigene Fehler und konvertieren via `#[from]`.

use thiserror::Error;

/// Globaler Result-Alias fuer Duett
pub type Result<T> = std::result::Result<T, DuettError>;

/// Gemeinsame Fehler im Duett-System
#[derive(Debug, Error)]
pub enum DuettError {
    // --- Identitaet ---
    #[error("Ungueltige Identitaet: {0}")]
    UngueltigeIdentitaet(String),

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    // --- Verbindung ---
    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl DuettError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }
}
