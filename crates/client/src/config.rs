//! Client-Konfiguration
//!
//! Alle Felder haben Standardwerte, eine leere TOML-Datei ist gueltig.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{ClientError, ClientResult};

/// Konfiguration des Duett-Clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientKonfig {
    /// WebSocket-URL des Relays
    pub server_url: String,
    /// Discovery-Server fuer das Verhandlungsobjekt
    pub ice_server: Vec<String>,
    /// Sekunden bis ein unbeantwortetes Angebot abgebrochen wird
    pub angebot_timeout_sek: u64,
}

impl Default for ClientKonfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8443/ws".to_string(),
            ice_server: vec![
                "stun:stun.stunprotocol.org:3478".to_string(),
                "stun:stun.l.google.com:19302".to_string(),
            ],
            angebot_timeout_sek: 30,
        }
    }
}

impl ClientKonfig {
    /// Parst die Konfiguration aus einem TOML-String
    pub fn aus_toml(inhalt: &str) -> ClientResult<Self> {
        toml::from_str(inhalt).map_err(|e| ClientError::Konfiguration(e.to_string()))
    }

    /// Laedt die Konfiguration aus einer Datei, fehlende Datei ergibt Standardwerte
    pub fn laden(pfad: impl AsRef<Path>) -> ClientResult<Self> {
        let pfad = pfad.as_ref();
        if !pfad.exists() {
            tracing::debug!(pfad = %pfad.display(), "Keine Client-Konfiguration, nutze Standardwerte");
            return Ok(Self::default());
        }
        let inhalt = std::fs::read_to_string(pfad)
            .map_err(|e| ClientError::Konfiguration(format!("{}: {e}", pfad.display())))?;
        Self::aus_toml(&inhalt)
    }

    /// Angebots-Timeout als Duration
    pub fn angebot_timeout(&self) -> Duration {
        Duration::from_secs(self.angebot_timeout_sek)
    }
}
