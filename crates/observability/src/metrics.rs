//! Prometheus-kompatible Metriken fuer Duett
//!
//! Registrierte Metriken:
//! - `duett_connected_clients` – Gauge: Aktuell angemeldete Benutzer
//! - `duett_sessions_active` – Gauge: Aktive Zwei-Parteien-Sitzungen
//! - `duett_relayed_messages_total` – Counter: Weitergeleitete Nachrichten (type)
//! - `duett_rejected_logins_total` – Counter: Abgelehnte Logins
//! - `duett_expired_offers_total` – Counter: Abgelaufene Angebote

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Alle Duett-Prometheus-Metriken
///
/// Clone teilt die Registry und alle Metrik-Handles.
#[derive(Clone)]
pub struct DuettMetriken {
    pub registry: Arc<Registry>,

    pub connected_clients: IntGauge,
    pub sessions_active: IntGauge,
    pub relayed_messages_total: IntCounterVec,
    pub rejected_logins_total: IntCounter,
    pub expired_offers_total: IntCounter,
}

impl DuettMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let connected_clients = IntGauge::with_opts(Opts::new(
            "duett_connected_clients",
            "Anzahl aktuell angemeldeter Benutzer",
        ))?;
        registry.register(Box::new(connected_clients.clone()))?;

        let sessions_active = IntGauge::with_opts(Opts::new(
            "duett_sessions_active",
            "Anzahl aktiver Sitzungen",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        let relayed_messages_total = IntCounterVec::new(
            Opts::new(
                "duett_relayed_messages_total",
                "Gesamtanzahl weitergeleiteter Signaling-Nachrichten",
            ),
            &["type"],
        )?;
        registry.register(Box::new(relayed_messages_total.clone()))?;

        let rejected_logins_total = IntCounter::with_opts(Opts::new(
            "duett_rejected_logins_total",
            "Gesamtanzahl abgelehnter Logins",
        ))?;
        registry.register(Box::new(rejected_logins_total.clone()))?;

        let expired_offers_total = IntCounter::with_opts(Opts::new(
            "duett_expired_offers_total",
            "Gesamtanzahl unbeantworteter, abgelaufener Angebote",
        ))?;
        registry.register(Box::new(expired_offers_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            connected_clients,
            sessions_active,
            relayed_messages_total,
            rejected_logins_total,
            expired_offers_total,
        })
    }

    /// Zaehlt eine weitergeleitete Nachricht des gegebenen Typs
    pub fn weitergeleitet(&self, typ: &str) {
        self.relayed_messages_total.with_label_values(&[typ]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: DuettMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<DuettMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
