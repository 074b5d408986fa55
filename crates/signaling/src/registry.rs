//! User-Registry – Identitaet -> Verbindung
//!
//! Haelt die Bindung jedes angemeldeten Namens an die Send-Queue seiner
//! Verbindung und die Menge der anwesenden Benutzer in Login-Reihenfolge.
//! Aenderungen werden als `RegistryEvent` an Beobachter verteilt.
//!
//! ## Senden
//! - An einen Benutzer: `an_user_senden`
//! - An alle ausser einem: `an_alle_ausser_senden`

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use duett_core::Identitaet;
use duett_protocol::ServerNachricht;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use crate::error::{SignalingError, SignalingResult};

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Groesse der Send-Queue pro Client
pub const SEND_QUEUE_GROESSE: usize = 64;

/// Groesse des Broadcast-Kanals fuer Registry-Events
const EVENT_KANAL_GROESSE: usize = 256;

// ---------------------------------------------------------------------------
// ClientSender
// ---------------------------------------------------------------------------

/// Handle auf die Send-Queue einer Verbindung
#[derive(Clone, Debug)]
pub struct ClientSender {
    pub verbindung_id: Uuid,
    pub tx: mpsc::Sender<ServerNachricht>,
}

impl ClientSender {
    /// Erstellt eine neue Send-Queue und gibt Handle und Empfaenger zurueck
    pub fn neu(verbindung_id: Uuid) -> (Self, mpsc::Receiver<ServerNachricht>) {
        let (tx, rx) = mpsc::channel(SEND_QUEUE_GROESSE);
        (Self { verbindung_id, tx }, rx)
    }

    /// Sendet eine Nachricht nicht-blockierend an den Client
    ///
    /// Gibt `false` zurueck wenn die Queue voll oder geschlossen ist.
    pub fn senden(&self, nachricht: ServerNachricht) -> bool {
        match self.tx.try_send(nachricht) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(n)) => {
                tracing::warn!(
                    verbindung = %self.verbindung_id,
                    typ = n.typ(),
                    "Send-Queue voll – Nachricht verworfen"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(verbindung = %self.verbindung_id, "Send-Queue geschlossen (Client getrennt)");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Registry-Events
// ---------------------------------------------------------------------------

/// Events die die UserRegistry versendet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// Name wurde erfolgreich gebunden
    Angemeldet { identitaet: Identitaet },
    /// Bindung wurde entfernt
    Abgemeldet { identitaet: Identitaet },
}

// ---------------------------------------------------------------------------
// UserRegistry
// ---------------------------------------------------------------------------

struct Eintrag {
    sender: ClientSender,
    /// Laufende Nummer des Logins, bestimmt die Reihenfolge in `liste()`
    reihenfolge: u64,
}

/// Registry aller angemeldeten Benutzer
///
/// Thread-safe via Arc + DashMap. Clone teilt den inneren Zustand.
#[derive(Clone)]
pub struct UserRegistry {
    inner: Arc<UserRegistryInner>,
}

struct UserRegistryInner {
    clients: DashMap<Identitaet, Eintrag>,
    login_zaehler: AtomicU64,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl UserRegistry {
    /// Erstellt eine leere Registry
    pub fn neu() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_KANAL_GROESSE);
        Self {
            inner: Arc::new(UserRegistryInner {
                clients: DashMap::new(),
                login_zaehler: AtomicU64::new(0),
                event_tx,
            }),
        }
    }

    /// Bindet einen Namen an eine Verbindung
    ///
    /// Pruefen und Einfuegen geschehen unter derselben Shard-Sperre, zwei
    /// gleichzeitige Logins mit demselben Namen koennen nicht beide gewinnen.
    pub fn registrieren(&self, identitaet: Identitaet, sender: ClientSender) -> SignalingResult<()> {
        match self.inner.clients.entry(identitaet.clone()) {
            Entry::Occupied(_) => Err(SignalingError::NameVergeben(identitaet)),
            Entry::Vacant(frei) => {
                let reihenfolge = self.inner.login_zaehler.fetch_add(1, Ordering::Relaxed);
                frei.insert(Eintrag {
                    sender,
                    reihenfolge,
                });
                tracing::info!(name = %identitaet, "Benutzer angemeldet");
                let _ = self
                    .inner
                    .event_tx
                    .send(RegistryEvent::Angemeldet { identitaet });
                Ok(())
            }
        }
    }

    /// Gibt die Send-Queue eines angemeldeten Benutzers zurueck
    pub fn nachschlagen(&self, identitaet: &Identitaet) -> Option<ClientSender> {
        self.inner
            .clients
            .get(identitaet)
            .map(|e| e.sender.clone())
    }

    /// Entfernt eine Bindung
    ///
    /// Gibt `true` zurueck wenn der Name gebunden war.
    pub fn entfernen(&self, identitaet: &Identitaet) -> bool {
        if self.inner.clients.remove(identitaet).is_some() {
            tracing::info!(name = %identitaet, "Benutzer abgemeldet");
            let _ = self.inner.event_tx.send(RegistryEvent::Abgemeldet {
                identitaet: identitaet.clone(),
            });
            true
        } else {
            false
        }
    }

    /// Alle anwesenden Benutzer in Login-Reihenfolge
    pub fn liste(&self) -> Vec<Identitaet> {
        let mut eintraege: Vec<(u64, Identitaet)> = self
            .inner
            .clients
            .iter()
            .map(|e| (e.value().reihenfolge, e.key().clone()))
            .collect();
        eintraege.sort_by_key(|(reihenfolge, _)| *reihenfolge);
        eintraege.into_iter().map(|(_, id)| id).collect()
    }

    /// Prueft ob ein Name gebunden ist
    pub fn ist_angemeldet(&self, identitaet: &Identitaet) -> bool {
        self.inner.clients.contains_key(identitaet)
    }

    /// Sendet eine Nachricht an einen einzelnen Benutzer
    ///
    /// Gibt `true` zurueck wenn der Benutzer gefunden und die Nachricht eingereiht wurde.
    pub fn an_user_senden(&self, identitaet: &Identitaet, nachricht: ServerNachricht) -> bool {
        // Sender klonen, damit keine Shard-Sperre waehrend des Sendens gehalten wird
        match self.nachschlagen(identitaet) {
            Some(sender) => sender.senden(nachricht),
            None => {
                tracing::debug!(name = %identitaet, typ = nachricht.typ(), "Senden an unbekannten Benutzer");
                false
            }
        }
    }

    /// Sendet eine Nachricht an alle angemeldeten Benutzer ausser einem
    ///
    /// Gibt die Anzahl der erfolgreichen Sendungen zurueck.
    pub fn an_alle_ausser_senden(
        &self,
        ausgeschlossen: &Identitaet,
        nachricht: ServerNachricht,
    ) -> usize {
        let empfaenger: Vec<ClientSender> = self
            .inner
            .clients
            .iter()
            .filter(|e| e.key() != ausgeschlossen)
            .map(|e| e.value().sender.clone())
            .collect();

        empfaenger
            .iter()
            .filter(|sender| sender.senden(nachricht.clone()))
            .count()
    }

    /// Gibt die Anzahl der angemeldeten Benutzer zurueck
    pub fn online_anzahl(&self) -> usize {
        self.inner.clients.len()
    }

    /// Abonniert Registry-Events
    pub fn events_abonnieren(&self) -> broadcast::Receiver<RegistryEvent> {
        self.inner.event_tx.subscribe()
    }
}

impl Default for UserRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identitaet {
        Identitaet::neu(name).unwrap()
    }

    fn test_nachricht() -> ServerNachricht {
        ServerNachricht::Leave {}
    }

    #[tokio::test]
    async fn registrieren_und_senden() {
        let registry = UserRegistry::neu();
        let (sender, mut rx) = ClientSender::neu(Uuid::new_v4());

        registry.registrieren(id("alice"), sender).unwrap();
        assert!(registry.ist_angemeldet(&id("alice")));

        assert!(registry.an_user_senden(&id("alice"), test_nachricht()));
        let empfangen = rx.try_recv().expect("Nachricht muss vorhanden sein");
        assert_eq!(empfangen.typ(), "leave");
    }

    #[test]
    fn doppelter_name_wird_abgelehnt() {
        let registry = UserRegistry::neu();
        let (a, _rx_a) = ClientSender::neu(Uuid::new_v4());
        let (b, _rx_b) = ClientSender::neu(Uuid::new_v4());

        registry.registrieren(id("alice"), a.clone()).unwrap();
        let fehler = registry.registrieren(id("alice"), b).unwrap_err();
        assert!(matches!(fehler, SignalingError::NameVergeben(ref n) if n == &id("alice")));

        // Erste Bindung bleibt bestehen
        let gebunden = registry.nachschlagen(&id("alice")).unwrap();
        assert_eq!(gebunden.verbindung_id, a.verbindung_id);
        assert_eq!(registry.online_anzahl(), 1);
    }

    #[test]
    fn liste_in_login_reihenfolge() {
        let registry = UserRegistry::neu();
        let mut queues = Vec::new();
        for name in ["zoe", "alice", "mia"] {
            let (s, rx) = ClientSender::neu(Uuid::new_v4());
            queues.push(rx);
            registry.registrieren(id(name), s).unwrap();
        }
        assert_eq!(registry.liste(), vec![id("zoe"), id("alice"), id("mia")]);

        registry.entfernen(&id("alice"));
        assert_eq!(registry.liste(), vec![id("zoe"), id("mia")]);
    }

    #[test]
    fn name_nach_entfernen_wieder_frei() {
        let registry = UserRegistry::neu();
        let (a, _rx_a) = ClientSender::neu(Uuid::new_v4());
        let (b, _rx_b) = ClientSender::neu(Uuid::new_v4());

        registry.registrieren(id("alice"), a).unwrap();
        assert!(registry.entfernen(&id("alice")));
        assert!(!registry.entfernen(&id("alice")));
        assert!(registry.registrieren(id("alice"), b).is_ok());
    }

    #[tokio::test]
    async fn an_alle_ausser_senden() {
        let registry = UserRegistry::neu();
        let (a, mut rx_a) = ClientSender::neu(Uuid::new_v4());
        let (b, mut rx_b) = ClientSender::neu(Uuid::new_v4());
        let (c, mut rx_c) = ClientSender::neu(Uuid::new_v4());
        registry.registrieren(id("alice"), a).unwrap();
        registry.registrieren(id("bob"), b).unwrap();
        registry.registrieren(id("carol"), c).unwrap();

        let gesendet = registry.an_alle_ausser_senden(&id("alice"), test_nachricht());
        assert_eq!(gesendet, 2);
        assert!(rx_a.try_recv().is_err(), "Ausloeser darf nichts empfangen");
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_ok());
    }

    #[test]
    fn senden_an_unbekannten_benutzer() {
        let registry = UserRegistry::neu();
        assert!(!registry.an_user_senden(&id("niemand"), test_nachricht()));
    }

    #[test]
    fn volle_queue_verwirft() {
        let (sender, _rx) = ClientSender::neu(Uuid::new_v4());
        for _ in 0..SEND_QUEUE_GROESSE {
            assert!(sender.senden(test_nachricht()));
        }
        assert!(!sender.senden(test_nachricht()));
    }

    #[test]
    fn clone_teilt_inneren_state() {
        let r1 = UserRegistry::neu();
        let r2 = r1.clone();
        let (s, _rx) = ClientSender::neu(Uuid::new_v4());
        r1.registrieren(id("shared"), s).unwrap();
        assert!(r2.ist_angemeldet(&id("shared")));
    }

    #[tokio::test]
    async fn events_werden_versendet() {
        let registry = UserRegistry::neu();
        let mut events = registry.events_abonnieren();
        let (s, _rx) = ClientSender::neu(Uuid::new_v4());

        registry.registrieren(id("alice"), s).unwrap();
        registry.entfernen(&id("alice"));

        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Angemeldet { identitaet: id("alice") }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            RegistryEvent::Abgemeldet { identitaet: id("alice") }
        );
    }
}
