//! Kollaborateure des Treibers
//!
//! Medienzugriff und Verhandlungsobjekt sind plattformabhaengig (Browser,
//! native WebRTC-Bibliothek, Testattrappe). Der Treiber kennt sie nur ueber
//! diese Traits.

use async_trait::async_trait;
use duett_protocol::Freigabe;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::ClientResult;
use crate::negotiation::{Beschreibung, Ereignis, Kandidat, VerbindungsZustand};

/// Zugriff auf Kamera/Mikrofon oder Bildschirm
#[async_trait]
pub trait MedienQuelle: Send + Sync {
    /// Fordert die Medien der gewaehlten Freigabe-Art an
    async fn anfordern(&self, freigabe: Freigabe) -> ClientResult<()>;

    /// Gibt alle gehaltenen Medien frei
    async fn freigeben(&self);
}

/// Erstellt Verhandlungsobjekte
#[async_trait]
pub trait VerbindungsFabrik: Send + Sync {
    /// Erstellt ein Objekt mit den gegebenen Discovery-Servern
    ///
    /// Rueckmeldungen des Objekts gehen an `ereignisse`.
    async fn erstellen(
        &self,
        ice_server: Vec<String>,
        ereignisse: LokaleEreignisse,
    ) -> ClientResult<Arc<dyn PeerVerbindung>>;
}

/// Ein Verhandlungsobjekt (Peer-Verbindung)
#[async_trait]
pub trait PeerVerbindung: Send + Sync {
    async fn angebot_erstellen(&self) -> ClientResult<Beschreibung>;
    async fn antwort_erstellen(&self) -> ClientResult<Beschreibung>;
    async fn lokale_beschreibung_setzen(&self, beschreibung: Beschreibung) -> ClientResult<()>;
    async fn remote_beschreibung_setzen(&self, beschreibung: Beschreibung) -> ClientResult<()>;
    async fn kandidat_hinzufuegen(&self, kandidat: Kandidat) -> ClientResult<()>;
    async fn schliessen(&self);
}

// ---------------------------------------------------------------------------
// LokaleEreignisse
// ---------------------------------------------------------------------------

/// Rueckkanal eines Verhandlungsobjekts zum Treiber
///
/// Jede Meldung traegt die Generation des Objekts. Nach einem Abbau
/// verwirft die Zustandsmaschine sie, auch wenn das Objekt weiter meldet.
#[derive(Debug, Clone)]
pub struct LokaleEreignisse {
    generation: u64,
    tx: mpsc::UnboundedSender<Ereignis>,
}

impl LokaleEreignisse {
    pub fn neu(generation: u64, tx: mpsc::UnboundedSender<Ereignis>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Ein lokaler Kandidat wurde gefunden
    pub fn kandidat_gefunden(&self, kandidat: Kandidat) {
        self.melden(Ereignis::LokalerKandidat {
            generation: self.generation,
            kandidat,
        });
    }

    /// Eine Spur der Gegenseite ist eingetroffen
    pub fn spur_empfangen(&self) {
        self.melden(Ereignis::SpurEmpfangen {
            generation: self.generation,
        });
    }

    pub fn zustand_geaendert(&self, zustand: VerbindungsZustand) {
        self.melden(Ereignis::Verbindungszustand {
            generation: self.generation,
            zustand,
        });
    }

    fn melden(&self, ereignis: Ereignis) {
        if self.tx.send(ereignis).is_err() {
            tracing::trace!(generation = self.generation, "Treiber beendet, Meldung verworfen");
        }
    }
}
