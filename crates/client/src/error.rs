//! Fehlertypen fuer den Client

use thiserror::Error;

/// Fehlertyp fuer den Duett-Client
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket-Verbindung zum Relay fehlgeschlagen oder getrennt
    #[error("Transportfehler: {0}")]
    Transport(String),

    /// Serialisierung einer Nachricht fehlgeschlagen
    #[error("Serialisierungsfehler: {0}")]
    Serialisierung(#[from] serde_json::Error),

    /// Kamera, Mikrofon oder Bildschirm nicht verfuegbar
    #[error("Medien nicht verfuegbar: {0}")]
    Medien(String),

    /// Verhandlungsobjekt konnte nicht erstellt werden oder fehlt
    #[error("Verbindungsfehler: {0}")]
    Verbindung(String),

    /// Beschreibung oder Kandidat wurde nicht angenommen
    #[error("Verhandlung fehlgeschlagen: {0}")]
    Verhandlung(String),

    /// Ungueltige Client-Konfiguration
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    /// Der Treiber laeuft nicht mehr
    #[error("Client wurde beendet")]
    Beendet,
}

impl ClientError {
    /// Erstellt einen Verhandlungsfehler
    pub fn verhandlung(msg: impl Into<String>) -> Self {
        Self::Verhandlung(msg.into())
    }
}

/// Result-Alias fuer den Client
pub type ClientResult<T> = Result<T, ClientError>;
