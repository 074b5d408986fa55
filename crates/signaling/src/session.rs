//! Sitzungstabelle – Paarungen und offene Angebote
//!
//! Eine Sitzung entsteht erst, wenn die Antwort des Angerufenen
//! weitergeleitet wird. Bis dahin existiert nur ein offenes Angebot mit
//! Frist. Beide leben in einer Tabelle hinter einer gemeinsamen Sperre, damit
//! Herstellen und Beenden mehrere Eintraege atomar aendern.

use duett_core::{Identitaet, Sitzung};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

/// Ein weitergeleitetes, noch unbeantwortetes Angebot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffenesAngebot {
    pub anrufer: Identitaet,
    pub angerufener: Identitaet,
    pub frist: Instant,
}

impl OffenesAngebot {
    fn betrifft(&self, identitaet: &Identitaet) -> bool {
        &self.anrufer == identitaet || &self.angerufener == identitaet
    }

    fn zwischen(&self, a: &Identitaet, b: &Identitaet) -> bool {
        (&self.anrufer == a && &self.angerufener == b)
            || (&self.anrufer == b && &self.angerufener == a)
    }

    /// Die jeweils andere Partei des Angebots
    pub fn gegenseite(&self, identitaet: &Identitaet) -> &Identitaet {
        if &self.anrufer == identitaet {
            &self.angerufener
        } else {
            &self.anrufer
        }
    }
}

#[derive(Default)]
struct Tabelle {
    /// Jede Sitzung steht unter beiden Identitaeten
    sitzungen: HashMap<Identitaet, Sitzung>,
    angebote: Vec<OffenesAngebot>,
}

impl Tabelle {
    /// Entfernt offene Angebote zwischen beiden sowie fruehere Sitzungen
    /// beider Parteien und traegt die neue Sitzung ein
    fn herstellen(&mut self, a: Identitaet, b: Identitaet) -> Sitzung {
        self.angebote.retain(|o| !o.zwischen(&a, &b));
        self.sitzung_entfernen(&a);
        self.sitzung_entfernen(&b);

        let sitzung = Sitzung::neu(a.clone(), b.clone());
        self.sitzungen.insert(a, sitzung.clone());
        self.sitzungen.insert(b, sitzung.clone());
        sitzung
    }

    fn sitzung_entfernen(&mut self, identitaet: &Identitaet) -> Option<Sitzung> {
        let sitzung = self.sitzungen.remove(identitaet)?;
        if let Some(peer) = sitzung.peer_von(identitaet) {
            self.sitzungen.remove(peer);
        }
        Some(sitzung)
    }
}

/// Tabelle aller Sitzungen und offenen Angebote
///
/// Clone teilt den inneren Zustand.
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<Tabelle>>,
}

impl SessionTable {
    /// Erstellt eine leere Tabelle
    pub fn neu() -> Self {
        Self::default()
    }

    /// Merkt ein Angebot vor
    ///
    /// Ein frueheres Angebot zwischen denselben Parteien wird ersetzt.
    pub fn angebot_vormerken(&self, anrufer: Identitaet, angerufener: Identitaet, frist: Instant) {
        let mut tabelle = self.inner.lock();
        tabelle
            .angebote
            .retain(|a| !a.zwischen(&anrufer, &angerufener));
        tabelle.angebote.push(OffenesAngebot {
            anrufer,
            angerufener,
            frist,
        });
    }

    /// Entfernt das Angebot zwischen zwei Parteien (in beiden Richtungen)
    pub fn angebot_entfernen(&self, a: &Identitaet, b: &Identitaet) -> Option<OffenesAngebot> {
        let mut tabelle = self.inner.lock();
        let pos = tabelle.angebote.iter().position(|o| o.zwischen(a, b))?;
        Some(tabelle.angebote.remove(pos))
    }

    /// Stellt die Sitzung zwischen `a` und `b` ohne Pruefung her
    pub fn sitzung_herstellen(&self, a: Identitaet, b: Identitaet) -> Sitzung {
        self.inner.lock().herstellen(a, b)
    }

    /// Nimmt die Antwort von `angerufener` an `anrufer` an
    ///
    /// Gelingt nur, wenn ein offenes Angebot von `anrufer` an `angerufener`
    /// vorliegt oder beide bereits eine Sitzung teilen (Neuverhandlung).
    /// Sonst bleibt die Tabelle unveraendert und es gibt `None`.
    pub fn antwort_annehmen(&self, angerufener: &Identitaet, anrufer: &Identitaet) -> Option<Sitzung> {
        let mut tabelle = self.inner.lock();
        let angebot_offen = tabelle
            .angebote
            .iter()
            .any(|o| &o.anrufer == anrufer && &o.angerufener == angerufener);
        let gemeinsame_sitzung = tabelle
            .sitzungen
            .get(angerufener)
            .is_some_and(|s| s.enthaelt(anrufer));
        if !angebot_offen && !gemeinsame_sitzung {
            return None;
        }
        Some(tabelle.herstellen(anrufer.clone(), angerufener.clone()))
    }

    /// Peer in der aktiven Sitzung
    pub fn peer_von(&self, identitaet: &Identitaet) -> Option<Identitaet> {
        let tabelle = self.inner.lock();
        tabelle
            .sitzungen
            .get(identitaet)
            .and_then(|s| s.peer_von(identitaet).cloned())
    }

    /// Aktive Sitzung oder offenes Angebot in einer der beiden Richtungen
    pub fn ist_beschaeftigt(&self, identitaet: &Identitaet) -> bool {
        let tabelle = self.inner.lock();
        tabelle.sitzungen.contains_key(identitaet)
            || tabelle.angebote.iter().any(|o| o.betrifft(identitaet))
    }

    /// Wie `ist_beschaeftigt`, aber Sitzungen und Angebote mit `partner` zaehlen nicht
    pub fn beschaeftigt_mit_anderem(&self, identitaet: &Identitaet, partner: &Identitaet) -> bool {
        let tabelle = self.inner.lock();
        let sitzung_mit_anderem = tabelle
            .sitzungen
            .get(identitaet)
            .is_some_and(|s| !s.enthaelt(partner));
        let angebot_mit_anderem = tabelle
            .angebote
            .iter()
            .any(|o| o.betrifft(identitaet) && !o.zwischen(identitaet, partner));
        sitzung_mit_anderem || angebot_mit_anderem
    }

    /// Beendet die Sitzung der Identitaet (egal welche Partei)
    pub fn beenden(&self, identitaet: &Identitaet) -> Option<Sitzung> {
        self.inner.lock().sitzung_entfernen(identitaet)
    }

    /// Entfernt alle offenen Angebote, an denen die Identitaet beteiligt ist
    pub fn angebote_entfernen(&self, identitaet: &Identitaet) -> Vec<OffenesAngebot> {
        let mut tabelle = self.inner.lock();
        let (entfernt, bleibend): (Vec<_>, Vec<_>) = std::mem::take(&mut tabelle.angebote)
            .into_iter()
            .partition(|o| o.betrifft(identitaet));
        tabelle.angebote = bleibend;
        entfernt
    }

    /// Entfernt und liefert alle Angebote, deren Frist verstrichen ist
    pub fn abgelaufene_angebote(&self, jetzt: Instant) -> Vec<OffenesAngebot> {
        let mut tabelle = self.inner.lock();
        let (abgelaufen, bleibend): (Vec<_>, Vec<_>) = std::mem::take(&mut tabelle.angebote)
            .into_iter()
            .partition(|o| o.frist <= jetzt);
        tabelle.angebote = bleibend;
        abgelaufen
    }

    /// Anzahl aktiver Sitzungen
    pub fn sitzungen_anzahl(&self) -> usize {
        self.inner.lock().sitzungen.len() / 2
    }

    /// Anzahl offener Angebote
    pub fn angebote_anzahl(&self) -> usize {
        self.inner.lock().angebote.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
