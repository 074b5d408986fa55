//! Fehlertypen fuer den Signaling-Service

use duett_core::{DuettError, Identitaet};
use thiserror::Error;

/// Fehlertyp fuer den Signaling-Service
#[derive(Debug, Error)]
pub enum SignalingError {
    /// IO-Fehler (Socket, Bind)
    #[error("IO-Fehler: {0}")]
    Io(#[from] std::io::Error),

    /// Fehler aus den gemeinsamen Typen (z.B. ungueltige Identitaet)
    #[error(transparent)]
    Duett(#[from] DuettError),

    /// Name ist bereits an eine andere Verbindung gebunden
    #[error("Name bereits vergeben: {0}")]
    NameVergeben(Identitaet),

    /// Verbindung hat sich noch nicht angemeldet
    #[error("Nicht angemeldet")]
    NichtAngemeldet,

    /// Verbindung ist bereits unter einem Namen angemeldet
    #[error("Bereits angemeldet als {0}")]
    BereitsAngemeldet(Identitaet),

    /// Ziel-Identitaet ist nicht registriert
    #[error("Benutzer nicht gefunden: {0}")]
    NichtGefunden(Identitaet),

    /// Ziel-Identitaet ist mit einer anderen Partei beschaeftigt
    #[error("Benutzer beschaeftigt: {0}")]
    Beschaeftigt(Identitaet),

    /// Antwort ohne offenes Angebot und ohne gemeinsame Sitzung
    #[error("Kein offenes Angebot von {0}")]
    KeinAngebot(Identitaet),

    /// Unbekannter oder unvollstaendiger Nachrichtentyp
    #[error("Unbekannter Befehl: {0}")]
    UnbekannterBefehl(String),

    /// Anruf an die eigene Identitaet
    #[error("Anruf an sich selbst nicht moeglich")]
    AnrufAnSichSelbst,

    /// Protokollfehler (z.B. Binaer-Frame)
    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    /// Server ist voll
    #[error("Server ist voll")]
    ServerVoll,

    /// Timeout (Keepalive)
    #[error("Timeout")]
    Timeout,

    /// Interner Fehler
    #[error("Interner Fehler: {0}")]
    Intern(String),
}

impl SignalingError {
    /// Erstellt einen internen Fehler
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Erstellt einen Protokollfehler
    pub fn protokoll(msg: impl Into<String>) -> Self {
        Self::Protokoll(msg.into())
    }
}

/// Result-Typ fuer den Signaling-Service
pub type SignalingResult<T> = Result<T, SignalingError>;
