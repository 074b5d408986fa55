//! Gemeinsamer Server-Zustand fuer den Signaling-Service
//!
//! Haelt Registry, Sitzungstabelle und Metriken, die sicher zwischen
//! tokio-Tasks geteilt werden koennen.

use duett_observability::{DuettMetriken, StatusQuelle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::registry::UserRegistry;
use crate::session::SessionTable;

/// Konfiguration fuer den Signaling-Service
#[derive(Debug, Clone)]
pub struct SignalingConfig {
    /// Maximale gleichzeitige WebSocket-Verbindungen
    pub max_clients: u32,
    /// Keepalive-Intervall in Sekunden
    pub keepalive_sek: u64,
    /// Timeout fuer inaktive Verbindungen in Sekunden
    pub verbindungs_timeout_sek: u64,
    /// Frist fuer unbeantwortete Angebote in Sekunden
    pub angebot_timeout_sek: u64,
    /// Benutzerliste nach jedem Login/Logout an alle anderen senden
    pub benutzerliste_senden: bool,
    /// Maximale Groesse eines eingehenden Frames in Bytes
    pub max_nachricht_bytes: usize,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            max_clients: 512,
            keepalive_sek: 30,
            verbindungs_timeout_sek: 90,
            angebot_timeout_sek: 30,
            benutzerliste_senden: true,
            max_nachricht_bytes: 64 * 1024,
        }
    }
}

impl SignalingConfig {
    /// Frist fuer unbeantwortete Angebote
    pub fn angebot_timeout(&self) -> Duration {
        Duration::from_secs(self.angebot_timeout_sek)
    }
}

/// Gemeinsamer Server-Zustand (thread-safe, Arc-geteilt)
pub struct SignalingState {
    /// Server-Konfiguration
    pub config: Arc<SignalingConfig>,
    /// Angemeldete Benutzer und ihre Send-Queues
    pub registry: UserRegistry,
    /// Sitzungen und offene Angebote
    pub sitzungen: SessionTable,
    /// Prometheus-Metriken
    pub metriken: DuettMetriken,
    /// Offene WebSocket-Verbindungen (angemeldet oder nicht)
    verbindungen: AtomicUsize,
    /// Startzeitpunkt des Servers (fuer Uptime-Berechnung)
    pub start_time: Instant,
}

impl SignalingState {
    /// Erstellt einen neuen SignalingState
    pub fn neu(config: SignalingConfig, metriken: DuettMetriken) -> Arc<Self> {
        Arc::new(Self {
            config: Arc::new(config),
            registry: UserRegistry::neu(),
            sitzungen: SessionTable::neu(),
            metriken,
            verbindungen: AtomicUsize::new(0),
            start_time: Instant::now(),
        })
    }

    /// Gibt die Uptime in Sekunden zurueck
    pub fn uptime_sek(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Reserviert einen Verbindungsplatz
    ///
    /// `None` wenn `max_clients` erreicht ist. Der Platz wird frei, sobald
    /// das zurueckgegebene Handle gedroppt wird.
    pub fn platz_reservieren(self: &Arc<Self>) -> Option<VerbindungsPlatz> {
        let max = self.config.max_clients as usize;
        let vorher = self.verbindungen.fetch_add(1, Ordering::AcqRel);
        if vorher >= max {
            self.verbindungen.fetch_sub(1, Ordering::AcqRel);
            return None;
        }
        Some(VerbindungsPlatz {
            state: Arc::clone(self),
        })
    }

    /// Anzahl offener WebSocket-Verbindungen
    pub fn verbindungen_anzahl(&self) -> usize {
        self.verbindungen.load(Ordering::Acquire)
    }

    /// Aktualisiert die Gauges aus dem aktuellen Zustand
    pub fn gauges_aktualisieren(&self) {
        self.metriken
            .connected_clients
            .set(self.registry.online_anzahl() as i64);
        self.metriken
            .sessions_active
            .set(self.sitzungen.sitzungen_anzahl() as i64);
    }
}

impl StatusQuelle for SignalingState {
    fn online_anzahl(&self) -> usize {
        self.registry.online_anzahl()
    }

    fn sitzungen_anzahl(&self) -> usize {
        self.sitzungen.sitzungen_anzahl()
    }

    fn nimmt_verbindungen_an(&self) -> bool {
        self.verbindungen_anzahl() < self.config.max_clients as usize
    }
}

/// Belegter Verbindungsplatz, wird beim Drop freigegeben
pub struct VerbindungsPlatz {
    state: Arc<SignalingState>,
}

impl Drop for VerbindungsPlatz {
    fn drop(&mut self) {
        self.state.verbindungen.fetch_sub(1, Ordering::AcqRel);
    }
}
