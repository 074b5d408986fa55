//! Treiber – Fuehrt die Aktionen der Zustandsmaschine aus
//!
//! Der `Client` besitzt die `Verhandlung` und multiplext Benutzerbefehle,
//! Relay-Nachrichten, Abschluesse und Zeitgeber in einer Schleife. Keine
//! Aktion wird in der Schleife abgewartet: Medien, Objekterstellung und
//! Zeitgeber laufen in eigenen Tasks, Operationen auf dem Verhandlungsobjekt
//! in einem Worker pro Objekt, der sie strikt nacheinander ausfuehrt.
//!
//! ```text
//! ClientHandle --+
//! Relay ---------+--> Client::laufen --> Verhandlung::verarbeiten --> Aktionen
//! Abschluesse ---+                                                      |
//!      ^                                                                |
//!      +---------------- Tasks / Objekt-Worker <------------------------+
//! ```

use duett_core::Identitaet;
use duett_protocol::{ClientNachricht, Freigabe, ServerNachricht};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::collaborator::{LokaleEreignisse, MedienQuelle, PeerVerbindung, VerbindungsFabrik};
use crate::config::ClientKonfig;
use crate::error::{ClientError, ClientResult};
use crate::negotiation::{Aktion, Beschreibung, Ereignis, Hinweis, Kandidat, Verhandlung};
use crate::transport::Transport;

// ---------------------------------------------------------------------------
// ClientHandle
// ---------------------------------------------------------------------------

/// Befehlsschnittstelle fuer die Oberflaeche
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::UnboundedSender<Ereignis>,
}

impl ClientHandle {
    pub fn anmelden(&self, name: impl Into<String>, freigabe: Freigabe) -> ClientResult<()> {
        self.senden(Ereignis::Anmelden {
            name: name.into(),
            freigabe,
        })
    }

    pub fn anrufen(&self, ziel: Identitaet) -> ClientResult<()> {
        self.senden(Ereignis::Anrufen { ziel })
    }

    pub fn annehmen(&self) -> ClientResult<()> {
        self.senden(Ereignis::Annehmen)
    }

    pub fn ablehnen(&self) -> ClientResult<()> {
        self.senden(Ereignis::Ablehnen)
    }

    pub fn auflegen(&self) -> ClientResult<()> {
        self.senden(Ereignis::Auflegen)
    }

    /// Beendet das Gespraech, gibt die Medien frei und trennt vom Relay
    pub fn abmelden(&self) -> ClientResult<()> {
        self.senden(Ereignis::Abmelden)
    }

    pub fn medien_erneut_anfordern(&self) -> ClientResult<()> {
        self.senden(Ereignis::MedienErneutAnfordern)
    }

    fn senden(&self, ereignis: Ereignis) -> ClientResult<()> {
        self.tx.send(ereignis).map_err(|_| ClientError::Beendet)
    }
}

// ---------------------------------------------------------------------------
// Objekt-Worker
// ---------------------------------------------------------------------------

/// Operation auf dem Verhandlungsobjekt
enum Auftrag {
    AngebotErstellen,
    AntwortErstellen,
    LokaleBeschreibung(Beschreibung),
    RemoteBeschreibung(Beschreibung),
    Kandidat(Kandidat),
}

impl Auftrag {
    /// Abschluss-Ereignis fuer einen Auftrag, der nicht ausgefuehrt werden kann
    fn fehlgeschlagen(self, generation: u64, fehler: ClientError) -> Ereignis {
        match self {
            Auftrag::AngebotErstellen => Ereignis::AngebotErstellt {
                generation,
                ergebnis: Err(fehler),
            },
            Auftrag::AntwortErstellen => Ereignis::AntwortErstellt {
                generation,
                ergebnis: Err(fehler),
            },
            Auftrag::LokaleBeschreibung(_) => Ereignis::LokaleBeschreibungGesetzt {
                generation,
                ergebnis: Err(fehler),
            },
            Auftrag::RemoteBeschreibung(_) => Ereignis::RemoteBeschreibungGesetzt {
                generation,
                ergebnis: Err(fehler),
            },
            Auftrag::Kandidat(_) => Ereignis::KandidatAngewendet {
                generation,
                ergebnis: Err(fehler),
            },
        }
    }
}

/// Fuehrt die Auftraege eines Objekts nacheinander aus
///
/// Endet wenn der Treiber den Auftragskanal schliesst und schliesst dann
/// das Objekt.
async fn objekt_bedienen(
    generation: u64,
    objekt: Arc<dyn PeerVerbindung>,
    mut auftraege: mpsc::UnboundedReceiver<Auftrag>,
    ereignis_tx: mpsc::UnboundedSender<Ereignis>,
) {
    while let Some(auftrag) = auftraege.recv().await {
        let ereignis = match auftrag {
            Auftrag::AngebotErstellen => Ereignis::AngebotErstellt {
                generation,
                ergebnis: objekt.angebot_erstellen().await,
            },
            Auftrag::AntwortErstellen => Ereignis::AntwortErstellt {
                generation,
                ergebnis: objekt.antwort_erstellen().await,
            },
            Auftrag::LokaleBeschreibung(b) => Ereignis::LokaleBeschreibungGesetzt {
                generation,
                ergebnis: objekt.lokale_beschreibung_setzen(b).await,
            },
            Auftrag::RemoteBeschreibung(b) => Ereignis::RemoteBeschreibungGesetzt {
                generation,
                ergebnis: objekt.remote_beschreibung_setzen(b).await,
            },
            Auftrag::Kandidat(k) => Ereignis::KandidatAngewendet {
                generation,
                ergebnis: objekt.kandidat_hinzufuegen(k).await,
            },
        };
        if ereignis_tx.send(ereignis).is_err() {
            break;
        }
    }
    objekt.schliessen().await;
    tracing::debug!(generation, "Verhandlungsobjekt geschlossen");
}

/// Ergebnis einer Objekterstellung
struct ObjektFertig {
    generation: u64,
    ergebnis: ClientResult<Arc<dyn PeerVerbindung>>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Treiber der Verhandlung
pub struct Client {
    verhandlung: Verhandlung,
    ausgang: Option<mpsc::Sender<ClientNachricht>>,
    eingang: mpsc::Receiver<ServerNachricht>,
    medien: Arc<dyn MedienQuelle>,
    fabrik: Arc<dyn VerbindungsFabrik>,
    /// Auftragskanal des aktuellen Objekts
    objekt: Option<(u64, mpsc::UnboundedSender<Auftrag>)>,
    ereignis_tx: mpsc::UnboundedSender<Ereignis>,
    ereignis_rx: mpsc::UnboundedReceiver<Ereignis>,
    objekt_tx: mpsc::UnboundedSender<ObjektFertig>,
    objekt_rx: mpsc::UnboundedReceiver<ObjektFertig>,
    hinweis_tx: mpsc::UnboundedSender<Hinweis>,
    laeuft: bool,
}

impl Client {
    /// Startet den Treiber in einem eigenen Task
    ///
    /// Gibt die Befehlsschnittstelle, den Hinweis-Kanal fuer die Oberflaeche
    /// und den Task zurueck. Der Task endet nach `abmelden` oder wenn der
    /// Relay die Verbindung trennt.
    pub fn starten(
        konfig: &ClientKonfig,
        transport: Transport,
        medien: Arc<dyn MedienQuelle>,
        fabrik: Arc<dyn VerbindungsFabrik>,
    ) -> (ClientHandle, mpsc::UnboundedReceiver<Hinweis>, JoinHandle<()>) {
        let (ereignis_tx, ereignis_rx) = mpsc::unbounded_channel();
        let (objekt_tx, objekt_rx) = mpsc::unbounded_channel();
        let (hinweis_tx, hinweis_rx) = mpsc::unbounded_channel();

        let handle = ClientHandle {
            tx: ereignis_tx.clone(),
        };
        let client = Self {
            verhandlung: Verhandlung::neu(konfig),
            ausgang: Some(transport.ausgang),
            eingang: transport.eingang,
            medien,
            fabrik,
            objekt: None,
            ereignis_tx,
            ereignis_rx,
            objekt_tx,
            objekt_rx,
            hinweis_tx,
            laeuft: true,
        };

        (handle, hinweis_rx, tokio::spawn(client.laufen()))
    }

    async fn laufen(mut self) {
        tracing::debug!("Client-Treiber gestartet");
        while self.laeuft {
            let ereignis = tokio::select! {
                Some(ereignis) = self.ereignis_rx.recv() => ereignis,
                Some(fertig) = self.objekt_rx.recv() => self.objekt_uebernehmen(fertig),
                nachricht = self.eingang.recv() => match nachricht {
                    Some(n) => Ereignis::Server(n),
                    None => {
                        self.laeuft = false;
                        Ereignis::TransportGetrennt
                    }
                },
            };

            for aktion in self.verhandlung.verarbeiten(ereignis) {
                self.ausfuehren(aktion).await;
            }
        }
        tracing::debug!("Client-Treiber beendet");
    }

    /// Uebernimmt ein fertiges Objekt, sofern es noch aktuell ist
    fn objekt_uebernehmen(&mut self, fertig: ObjektFertig) -> Ereignis {
        let generation = fertig.generation;
        let ergebnis = match fertig.ergebnis {
            Ok(objekt) if generation == self.verhandlung.generation() => {
                let (auftrag_tx, auftrag_rx) = mpsc::unbounded_channel();
                tokio::spawn(objekt_bedienen(
                    generation,
                    objekt,
                    auftrag_rx,
                    self.ereignis_tx.clone(),
                ));
                self.objekt = Some((generation, auftrag_tx));
                Ok(())
            }
            Ok(objekt) => {
                // Inzwischen abgebaut
                tokio::spawn(async move { objekt.schliessen().await });
                Ok(())
            }
            Err(e) => Err(e),
        };
        Ereignis::VerbindungErstellt {
            generation,
            ergebnis,
        }
    }

    async fn ausfuehren(&mut self, aktion: Aktion) {
        tracing::trace!(?aktion, "Aktion");
        match aktion {
            Aktion::Senden(nachricht) => {
                if let Some(ausgang) = &self.ausgang {
                    if ausgang.send(nachricht).await.is_err() {
                        tracing::warn!("Transport geschlossen, Nachricht verworfen");
                    }
                }
            }
            Aktion::MedienAnfordern {
                generation,
                freigabe,
            } => {
                let medien = Arc::clone(&self.medien);
                let tx = self.ereignis_tx.clone();
                tokio::spawn(async move {
                    let ergebnis = medien.anfordern(freigabe).await;
                    let _ = tx.send(Ereignis::MedienErhalten {
                        generation,
                        ergebnis,
                    });
                });
            }
            Aktion::MedienFreigeben => {
                let medien = Arc::clone(&self.medien);
                tokio::spawn(async move { medien.freigeben().await });
            }
            Aktion::VerbindungErstellen {
                generation,
                ice_server,
            } => {
                let fabrik = Arc::clone(&self.fabrik);
                let lokale = LokaleEreignisse::neu(generation, self.ereignis_tx.clone());
                let tx = self.objekt_tx.clone();
                tokio::spawn(async move {
                    let ergebnis = fabrik.erstellen(ice_server, lokale).await;
                    let _ = tx.send(ObjektFertig {
                        generation,
                        ergebnis,
                    });
                });
            }
            Aktion::AngebotErstellen { generation } => {
                self.beauftragen(generation, Auftrag::AngebotErstellen)
            }
            Aktion::AntwortErstellen { generation } => {
                self.beauftragen(generation, Auftrag::AntwortErstellen)
            }
            Aktion::LokaleBeschreibungSetzen {
                generation,
                beschreibung,
            } => self.beauftragen(generation, Auftrag::LokaleBeschreibung(beschreibung)),
            Aktion::RemoteBeschreibungSetzen {
                generation,
                beschreibung,
            } => self.beauftragen(generation, Auftrag::RemoteBeschreibung(beschreibung)),
            Aktion::KandidatHinzufuegen {
                generation,
                kandidat,
            } => self.beauftragen(generation, Auftrag::Kandidat(kandidat)),
            Aktion::VerbindungSchliessen { generation } => {
                // Kanal schliessen beendet den Worker, der Worker schliesst das Objekt
                if matches!(&self.objekt, Some((g, _)) if *g == generation) {
                    self.objekt = None;
                }
            }
            Aktion::ZeitgeberStarten { generation, dauer } => {
                let tx = self.ereignis_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(dauer).await;
                    let _ = tx.send(Ereignis::AngebotZeitueberschritten { generation });
                });
            }
            Aktion::TransportSchliessen => {
                self.ausgang = None;
                self.laeuft = false;
            }
            Aktion::Melden(hinweis) => {
                let _ = self.hinweis_tx.send(hinweis);
            }
        }
    }

    /// Reiht einen Auftrag beim Objekt der Generation ein
    fn beauftragen(&self, generation: u64, auftrag: Auftrag) {
        let auftrag = match &self.objekt {
            Some((g, tx)) if *g == generation => match tx.send(auftrag) {
                Ok(()) => return,
                Err(mpsc::error::SendError(a)) => a,
            },
            _ => auftrag,
        };
        let fehler = ClientError::Verbindung("Kein Verhandlungsobjekt".into());
        let _ = self
            .ereignis_tx
            .send(auftrag.fehlgeschlagen(generation, fehler));
    }
}
