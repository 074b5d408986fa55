//! Client-Connection – Verwaltet eine einzelne WebSocket-Verbindung
//!
//! Jede Verbindung bekommt eine `ClientConnection` in einem eigenen
//! tokio-Task. Eingehende Text-Frames werden nacheinander dispatcht, damit
//! die Reihenfolge pro Absender erhalten bleibt.
//!
//! ## Keepalive
//! - Server sendet alle `keepalive_sek` einen WebSocket-Ping
//! - Jeder eingehende Frame (auch Pong) zaehlt als Lebenszeichen
//! - Nach `verbindungs_timeout_sek` ohne Frame wird getrennt

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use duett_protocol::{ClientNachricht, ServerNachricht};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::dispatcher::{DispatcherContext, MessageDispatcher};
use crate::error::{SignalingError, SignalingResult};
use crate::registry::ClientSender;
use crate::server_state::{SignalingState, VerbindungsPlatz};

// ---------------------------------------------------------------------------
// ClientConnection
// ---------------------------------------------------------------------------

/// Verarbeitet eine einzelne WebSocket-Verbindung
pub struct ClientConnection {
    state: Arc<SignalingState>,
    peer_addr: SocketAddr,
    _platz: VerbindungsPlatz,
}

impl ClientConnection {
    /// Erstellt eine neue ClientConnection auf einem reservierten Platz
    pub fn neu(state: Arc<SignalingState>, peer_addr: SocketAddr, platz: VerbindungsPlatz) -> Self {
        Self {
            state,
            peer_addr,
            _platz: platz,
        }
    }

    /// Startet die Verbindungs-Verarbeitungsschleife
    ///
    /// Laeuft bis der Client trennt, das Timeout greift oder ein
    /// Shutdown-Signal eingeht. Danach werden alle Zustaende der
    /// Identitaet abgeraeumt.
    pub async fn verarbeiten(self, socket: WebSocket, mut shutdown_rx: watch::Receiver<bool>) {
        let peer_addr = self.peer_addr;
        let keepalive_intervall = Duration::from_secs(self.state.config.keepalive_sek.max(1));
        let timeout_dauer = Duration::from_secs(self.state.config.verbindungs_timeout_sek.max(1));

        let (mut ws_tx, mut ws_rx) = socket.split();

        // Ausgehende Nachrichten-Queue (andere Verbindungen -> WebSocket)
        let (sender, mut sende_rx) = ClientSender::neu(Uuid::new_v4());
        let mut ctx = DispatcherContext::neu(peer_addr, sender);
        let dispatcher = MessageDispatcher::neu(Arc::clone(&self.state));

        tracing::info!(peer = %peer_addr, verbindung = %ctx.verbindung_id, "Neue Verbindung");

        let mut letzter_empfang = Instant::now();
        let mut ping = tokio::time::interval_at(
            Instant::now() + keepalive_intervall,
            keepalive_intervall,
        );
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let timeout_zeitpunkt = letzter_empfang + timeout_dauer;

            tokio::select! {
                // Eingehender Frame vom Client
                frame = ws_rx.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            letzter_empfang = Instant::now();
                            let eingang = ClientNachricht::aus_text(&text);
                            if let Some(antwort) = dispatcher.dispatch(eingang, &mut ctx) {
                                if let Err(e) = senden(&mut ws_tx, &antwort).await {
                                    tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                    break;
                                }
                            }
                        }
                        Some(Ok(Message::Binary(_))) => {
                            letzter_empfang = Instant::now();
                            let fehler = ServerNachricht::error(
                                SignalingError::protokoll("Binaer-Frames werden nicht unterstuetzt").to_string(),
                            );
                            if let Err(e) = senden(&mut ws_tx, &fehler).await {
                                tracing::warn!(peer = %peer_addr, fehler = %e, "Senden fehlgeschlagen");
                                break;
                            }
                        }
                        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                            // axum beantwortet Pings selbst
                            letzter_empfang = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::info!(peer = %peer_addr, "Verbindung vom Client getrennt");
                            break;
                        }
                        Some(Err(e)) => {
                            tracing::warn!(peer = %peer_addr, fehler = %e, "Frame-Lesefehler");
                            break;
                        }
                    }
                }

                // Ausgehende Nachricht aus der Send-Queue
                Some(ausgehend) = sende_rx.recv() => {
                    if let Err(e) = senden(&mut ws_tx, &ausgehend).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Queue-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Keepalive-Ping
                _ = ping.tick() => {
                    if let Err(e) = ws_tx.send(Message::Ping(Vec::new())).await {
                        tracing::warn!(peer = %peer_addr, fehler = %e, "Ping-Senden fehlgeschlagen");
                        break;
                    }
                }

                // Inaktivitaet
                _ = tokio::time::sleep_until(timeout_zeitpunkt) => {
                    tracing::warn!(peer = %peer_addr, "Verbindungs-Timeout");
                    break;
                }

                // Shutdown-Signal
                Ok(()) = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!(peer = %peer_addr, "Shutdown-Signal – Verbindung wird getrennt");
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }

        // Cleanup beim Verbindungsende
        dispatcher.client_cleanup(&ctx);

        tracing::info!(peer = %peer_addr, verbindung = %ctx.verbindung_id, "Verbindungs-Task beendet");
    }
}

/// Serialisiert eine Nachricht und schreibt sie als Text-Frame
async fn senden(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    nachricht: &ServerNachricht,
) -> SignalingResult<()> {
    let json = nachricht
        .to_json()
        .map_err(|e| SignalingError::intern(format!("Serialisierung fehlgeschlagen: {e}")))?;
    ws_tx
        .send(Message::Text(json))
        .await
        .map_err(|e| SignalingError::intern(format!("WebSocket: {e}")))
}
