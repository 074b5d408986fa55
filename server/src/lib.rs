//! duett-server – Bibliotheks-Root
//!
//! Verdrahtet Konfiguration, Metriken, Relay und Observability-Server und
//! stellt den Einstiegspunkt fuer Integrationstests bereit.

pub mod config;

use anyhow::Result;
use config::ServerConfig;
use duett_observability::{observability_server_starten, DuettMetriken, StatusQuelle};
use duett_signaling::{SignalingServer, SignalingState};
use std::sync::Arc;
use tokio::sync::watch;

/// Haelt den laufenden Server-Zustand zusammen
pub struct Server {
    pub config: ServerConfig,
}

impl Server {
    /// Erstellt einen neuen Server aus der gegebenen Konfiguration
    pub fn neu(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Metriken und Relay-Zustand anlegen
    /// 2. Observability-Server starten (falls aktiviert)
    /// 3. WebSocket-Relay starten
    /// 4. Auf Ctrl-C warten und alle Tasks ueber den Shutdown-Kanal beenden
    pub async fn starten(self) -> Result<()> {
        let bind_addr = self.config.bind_adresse()?;
        tracing::info!(
            server_name = %self.config.server.name,
            adresse = %bind_addr,
            "Server startet"
        );

        let metriken = DuettMetriken::neu()?;
        let state = SignalingState::neu(self.config.signaling_config(), metriken.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let observability = if self.config.observability.aktiviert {
            let obs_addr = self.config.observability_bind_adresse()?;
            let quelle: Arc<dyn StatusQuelle> = state.clone();
            let rx = shutdown_rx.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = observability_server_starten(obs_addr, metriken, quelle, rx).await {
                    tracing::error!(fehler = %e, "Observability-Server fehlgeschlagen");
                }
            }))
        } else {
            tracing::info!("Observability-Server deaktiviert");
            None
        };

        let relay = SignalingServer::neu(Arc::clone(&state), bind_addr);
        let mut relay_task = tokio::spawn(relay.starten(shutdown_rx));

        tracing::info!("Server laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        tokio::select! {
            ergebnis = tokio::signal::ctrl_c() => {
                ergebnis?;
                tracing::info!("Shutdown-Signal empfangen, Server wird beendet");
            }
            ergebnis = &mut relay_task => {
                // Relay endet nur bei Fehlern vorzeitig (z.B. Port belegt)
                let _ = shutdown_tx.send(true);
                ergebnis??;
                return Ok(());
            }
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = relay_task.await? {
            tracing::warn!(fehler = %e, "Relay mit Fehler beendet");
        }
        if let Some(task) = observability {
            let _ = task.await;
        }
        tracing::info!(
            verbindungen = state.verbindungen_anzahl(),
            "Server beendet"
        );
        Ok(())
    }
}
