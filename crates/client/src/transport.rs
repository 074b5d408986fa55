//! WebSocket-Transport zum Relay
//!
//! Ein Schreib- und ein Lese-Task entkoppeln den Socket vom Treiber.
//! Unbekannte Nachrichten werden verworfen, ein geschlossener Socket
//! schliesst den Eingangskanal.

use duett_protocol::{ClientNachricht, Eingang, ServerNachricht};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{ClientError, ClientResult};

/// Groesse der Kanaele zwischen Treiber und Socket-Tasks
const KANAL_GROESSE: usize = 64;

/// Verbindung zum Relay als Kanalpaar
pub struct Transport {
    /// Nachrichten an den Relay
    pub ausgang: mpsc::Sender<ClientNachricht>,
    /// Dekodierte Nachrichten vom Relay, `None` wenn getrennt
    pub eingang: mpsc::Receiver<ServerNachricht>,
}

impl Transport {
    /// Baut einen Transport aus vorhandenen Kanaelen
    pub fn aus_kanaelen(
        ausgang: mpsc::Sender<ClientNachricht>,
        eingang: mpsc::Receiver<ServerNachricht>,
    ) -> Self {
        Self { ausgang, eingang }
    }
}

/// Verbindet sich mit dem Relay unter `url`
pub async fn verbinden(url: &str) -> ClientResult<Transport> {
    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| ClientError::Transport(format!("{url}: {e}")))?;
    tracing::info!(url, "Mit Relay verbunden");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (ausgang_tx, mut ausgang_rx) = mpsc::channel::<ClientNachricht>(KANAL_GROESSE);
    let (eingang_tx, eingang_rx) = mpsc::channel::<ServerNachricht>(KANAL_GROESSE);

    // Schreib-Task: endet wenn der Treiber den Sender fallen laesst
    tokio::spawn(async move {
        while let Some(nachricht) = ausgang_rx.recv().await {
            let json = match nachricht.to_json() {
                Ok(j) => j,
                Err(e) => {
                    tracing::warn!(fehler = %e, "Nachricht nicht serialisierbar");
                    continue;
                }
            };
            if let Err(e) = ws_tx.send(Message::Text(json)).await {
                tracing::warn!(fehler = %e, "Senden an Relay fehlgeschlagen");
                break;
            }
        }
        let _ = ws_tx.close().await;
        tracing::debug!("Schreib-Task beendet");
    });

    // Lese-Task: endet mit dem Socket
    tokio::spawn(async move {
        while let Some(frame) = ws_rx.next().await {
            match frame {
                Ok(Message::Text(text)) => match ServerNachricht::aus_text(&text) {
                    Eingang::Nachricht(nachricht) => {
                        if eingang_tx.send(nachricht).await.is_err() {
                            break;
                        }
                    }
                    Eingang::Unbekannt { typ } => {
                        tracing::debug!(typ = %typ, "Unbekannte Nachricht vom Relay verworfen");
                    }
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(fehler = %e, "Lesefehler vom Relay");
                    break;
                }
            }
        }
        tracing::debug!("Lese-Task beendet");
    });

    Ok(Transport::aus_kanaelen(ausgang_tx, eingang_rx))
}
