//! Health-Check-Endpunkt fuer Duett
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime, angemeldeten Benutzern und
//! aktiven Sitzungen

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub online_users: usize,
    pub active_sessions: usize,
}

/// Liefert den Laufzeitzustand fuer den Health-Check
pub trait StatusQuelle: Send + Sync + 'static {
    /// Anzahl angemeldeter Benutzer
    fn online_anzahl(&self) -> usize;
    /// Anzahl aktiver Sitzungen
    fn sitzungen_anzahl(&self) -> usize;
    /// Ob der Relay noch Verbindungen annimmt
    fn nimmt_verbindungen_an(&self) -> bool {
        true
    }
}

/// Geteilter Zustand fuer den Health-Check-Handler
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Arc<Instant>,
    pub quelle: Arc<dyn StatusQuelle>,
}

impl HealthState {
    pub fn neu(quelle: Arc<dyn StatusQuelle>) -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            quelle,
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Erstellt die aktuelle Health-Antwort
    pub fn antwort(&self) -> HealthResponse {
        let status = if self.quelle.nimmt_verbindungen_an() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            online_users: self.quelle.online_anzahl(),
            active_sessions: self.quelle.sitzungen_anzahl(),
        }
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(quelle: Arc<dyn StatusQuelle>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(HealthState::neu(quelle))
}

/// `GET /health` – gibt den Serverstatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();

    let http_status = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK, // 200 auch bei degraded (Probe soll nicht failen)
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(response))
}
