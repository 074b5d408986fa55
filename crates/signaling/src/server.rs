//! WebSocket-Listener – Bindet Socket, akzeptiert Upgrades
//!
//! Der `SignalingServer` stellt einen axum-Router mit `GET /` und `GET /ws`
//! bereit. Jedes Upgrade startet eine `ClientConnection` in einem eigenen
//! tokio-Task. Ein Hintergrund-Task beendet unbeantwortete Angebote.

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use duett_observability::timing_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::connection::ClientConnection;
use crate::handlers::leave_handler;
use crate::registry::RegistryEvent;
use crate::server_state::SignalingState;

/// Intervall des Angebots-Sweepers
const SWEEP_INTERVALL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct RouterState {
    state: Arc<SignalingState>,
    shutdown_rx: watch::Receiver<bool>,
}

/// WebSocket-Signaling-Server
pub struct SignalingServer {
    state: Arc<SignalingState>,
    bind_addr: SocketAddr,
}

impl SignalingServer {
    /// Erstellt einen neuen SignalingServer
    pub fn neu(state: Arc<SignalingState>, bind_addr: SocketAddr) -> Self {
        Self { state, bind_addr }
    }

    /// Gibt die Bind-Adresse zurueck
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Bindet den Socket und bedient Verbindungen
    ///
    /// Laeuft bis `shutdown_rx` ein `true`-Signal empfaengt.
    pub async fn starten(self, shutdown_rx: watch::Receiver<bool>) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        self.mit_listener_starten(listener, shutdown_rx).await
    }

    /// Bedient Verbindungen auf einem bereits gebundenen Listener
    pub async fn mit_listener_starten(
        self,
        listener: TcpListener,
        shutdown_rx: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let lokale_addr = listener.local_addr()?;
        tracing::info!(adresse = %lokale_addr, "WebSocket Signaling-Server gestartet");

        let sweeper = tokio::spawn(angebote_sweepen(
            Arc::clone(&self.state),
            shutdown_rx.clone(),
        ));
        let beobachter = tokio::spawn(registry_beobachten(
            Arc::clone(&self.state),
            shutdown_rx.clone(),
        ));

        let app = router(Arc::clone(&self.state), shutdown_rx.clone());
        let mut shutdown_serve = shutdown_rx;
        let ergebnis = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            while shutdown_serve.changed().await.is_ok() {
                if *shutdown_serve.borrow() {
                    break;
                }
            }
            tracing::info!("Signaling-Server: Shutdown-Signal empfangen");
        })
        .await;

        sweeper.abort();
        beobachter.abort();
        tracing::info!("WebSocket Signaling-Server gestoppt");
        ergebnis
    }
}

/// Baut den axum-Router des Relays
pub fn router(state: Arc<SignalingState>, shutdown_rx: watch::Receiver<bool>) -> Router {
    Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .layer(axum::middleware::from_fn(timing_middleware))
        .with_state(RouterState { state, shutdown_rx })
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(rs): State<RouterState>,
) -> Response {
    let platz = match rs.state.platz_reservieren() {
        Some(p) => p,
        None => {
            tracing::warn!(
                peer = %peer_addr,
                max = rs.state.config.max_clients,
                "Server voll – Verbindung abgelehnt"
            );
            return (StatusCode::SERVICE_UNAVAILABLE, "Server ist voll").into_response();
        }
    };

    let max_bytes = rs.state.config.max_nachricht_bytes;
    let verbindung = ClientConnection::neu(Arc::clone(&rs.state), peer_addr, platz);
    let shutdown_rx = rs.shutdown_rx.clone();

    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_upgrade(move |socket| verbindung.verarbeiten(socket, shutdown_rx))
}

/// Beendet periodisch abgelaufene Angebote
async fn angebote_sweepen(state: Arc<SignalingState>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut intervall = tokio::time::interval(SWEEP_INTERVALL);
    loop {
        tokio::select! {
            _ = intervall.tick() => {
                let jetzt = tokio::time::Instant::now();
                let anzahl = leave_handler::abgelaufene_angebote_beenden(jetzt, &state);
                if anzahl > 0 {
                    tracing::debug!(anzahl, "Abgelaufene Angebote beendet");
                }
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

/// Haelt die Client-Gauge anhand der Registry-Events aktuell
async fn registry_beobachten(state: Arc<SignalingState>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut events = state.registry.events_abonnieren();
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(RegistryEvent::Angemeldet { identitaet }) => {
                        tracing::trace!(name = %identitaet, "Registry: angemeldet");
                    }
                    Ok(RegistryEvent::Abgemeldet { identitaet }) => {
                        tracing::trace!(name = %identitaet, "Registry: abgemeldet");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::debug!(verpasst = n, "Registry-Events verpasst");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
                state.gauges_aktualisieren();
            }
            Ok(()) = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}
