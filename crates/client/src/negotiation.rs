//! Verhandlungs-Zustandsmaschine des Clients
//!
//! `Verhandlung` kennt weder Sockets noch Tasks: Jede Eingabe ist ein
//! `Ereignis`, jede Reaktion eine Liste von `Aktion`en, die der Treiber
//! ausfuehrt. Ergebnisse asynchroner Operationen kommen wieder als Ereignis
//! zurueck, markiert mit der Generation des Verhandlungsobjekts, das sie
//! ausgeloest hat.
//!
//! ## Phasen
//! ```text
//! Idle -> Registriert -> MedienBereit -> Anbietend | Antwortend -> Verbunden
//!                            ^                                        |
//!                            +----------------- Abbau ----------------+
//! ```
//!
//! ## Kandidaten
//! Eingehende Kandidaten werden gepuffert, bis die Remote-Beschreibung
//! angenommen ist, und dann genau einmal in Ankunftsreihenfolge angewendet.
//! Lokale Kandidaten werden gepuffert, bis die Gegenseite vom Gespraech weiss,
//! beim Anrufer also bis das Angebot gesendet ist. So erreicht kein Kandidat
//! den Angerufenen vor dem Angebot.

use duett_core::Identitaet;
use duett_protocol::{ClientNachricht, Freigabe, ServerNachricht};
use serde_json::value::RawValue;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::ClientKonfig;
use crate::error::{ClientError, ClientResult};

/// Undurchsichtige Sitzungsbeschreibung (Angebot oder Antwort)
pub type Beschreibung = Box<RawValue>;

/// Undurchsichtiger Verbindungskandidat
pub type Kandidat = Box<RawValue>;

// ---------------------------------------------------------------------------
// Phasen
// ---------------------------------------------------------------------------

/// Teilschritte des Anrufers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anbieten {
    /// Angebot wird erstellt
    Erstellen,
    /// Angebot wird als lokale Beschreibung gesetzt
    LokalSetzen,
    /// Angebot ist gesendet, Antwort steht aus
    Warten,
    /// Antwort wird als Remote-Beschreibung gesetzt
    RemoteSetzen,
}

/// Teilschritte des Angerufenen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Antworten {
    /// Angebot liegt vor, Benutzer hat noch nicht entschieden
    Klingelt,
    /// Angebot wird als Remote-Beschreibung gesetzt
    RemoteSetzen,
    /// Antwort wird erstellt
    Erstellen,
    /// Antwort wird als lokale Beschreibung gesetzt
    LokalSetzen,
}

/// Phase der Verhandlung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Registriert,
    MedienBereit,
    Anbietend(Anbieten),
    Antwortend(Antworten),
    Verbunden,
}

impl Phase {
    /// Ein Peer ist zugeordnet
    pub fn im_gespraech(&self) -> bool {
        matches!(
            self,
            Phase::Anbietend(_) | Phase::Antwortend(_) | Phase::Verbunden
        )
    }
}

/// Zustand des Verhandlungsobjekts, wie ihn das Objekt selbst meldet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbindungsZustand {
    Neu,
    Verbindend,
    Verbunden,
    Getrennt,
    Fehlgeschlagen,
    Geschlossen,
}

// ---------------------------------------------------------------------------
// Ereignisse und Aktionen
// ---------------------------------------------------------------------------

/// Eingaben der Zustandsmaschine
#[derive(Debug)]
pub enum Ereignis {
    // --- Benutzer ---
    Anmelden { name: String, freigabe: Freigabe },
    Anrufen { ziel: Identitaet },
    Annehmen,
    Ablehnen,
    Auflegen,
    Abmelden,
    MedienErneutAnfordern,

    // --- Relay ---
    Server(ServerNachricht),
    TransportGetrennt,

    // --- Abschluesse asynchroner Operationen ---
    MedienErhalten {
        generation: u64,
        ergebnis: ClientResult<()>,
    },
    VerbindungErstellt {
        generation: u64,
        ergebnis: ClientResult<()>,
    },
    AngebotErstellt {
        generation: u64,
        ergebnis: ClientResult<Beschreibung>,
    },
    AntwortErstellt {
        generation: u64,
        ergebnis: ClientResult<Beschreibung>,
    },
    LokaleBeschreibungGesetzt {
        generation: u64,
        ergebnis: ClientResult<()>,
    },
    RemoteBeschreibungGesetzt {
        generation: u64,
        ergebnis: ClientResult<()>,
    },
    KandidatAngewendet {
        generation: u64,
        ergebnis: ClientResult<()>,
    },

    // --- Rueckmeldungen des Verhandlungsobjekts ---
    LokalerKandidat { generation: u64, kandidat: Kandidat },
    SpurEmpfangen { generation: u64 },
    Verbindungszustand {
        generation: u64,
        zustand: VerbindungsZustand,
    },

    // --- Zeitgeber ---
    AngebotZeitueberschritten { generation: u64 },
}

impl Ereignis {
    /// Generation, mit der das Ereignis markiert ist
    pub fn generation(&self) -> Option<u64> {
        match self {
            Ereignis::MedienErhalten { generation, .. }
            | Ereignis::VerbindungErstellt { generation, .. }
            | Ereignis::AngebotErstellt { generation, .. }
            | Ereignis::AntwortErstellt { generation, .. }
            | Ereignis::LokaleBeschreibungGesetzt { generation, .. }
            | Ereignis::RemoteBeschreibungGesetzt { generation, .. }
            | Ereignis::KandidatAngewendet { generation, .. }
            | Ereignis::LokalerKandidat { generation, .. }
            | Ereignis::SpurEmpfangen { generation }
            | Ereignis::Verbindungszustand { generation, .. }
            | Ereignis::AngebotZeitueberschritten { generation } => Some(*generation),
            _ => None,
        }
    }
}

/// Ausgaben der Zustandsmaschine, ausgefuehrt vom Treiber
#[derive(Debug, Clone)]
pub enum Aktion {
    /// Nachricht an den Relay
    Senden(ClientNachricht),
    MedienAnfordern { generation: u64, freigabe: Freigabe },
    MedienFreigeben,
    VerbindungErstellen { generation: u64, ice_server: Vec<String> },
    AngebotErstellen { generation: u64 },
    AntwortErstellen { generation: u64 },
    LokaleBeschreibungSetzen { generation: u64, beschreibung: Beschreibung },
    RemoteBeschreibungSetzen { generation: u64, beschreibung: Beschreibung },
    KandidatHinzufuegen { generation: u64, kandidat: Kandidat },
    VerbindungSchliessen { generation: u64 },
    ZeitgeberStarten { generation: u64, dauer: Duration },
    TransportSchliessen,
    /// Hinweis an die Oberflaeche
    Melden(Hinweis),
}

/// Hinweise an die Oberflaeche
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hinweis {
    Angemeldet { benutzer: Vec<Identitaet> },
    LoginAbgelehnt { name: String, grund: Option<String> },
    Benutzerliste(Vec<Identitaet>),
    MedienBereit,
    MedienFehler(String),
    /// Verhandlungsobjekt steht, Anrufe sind moeglich
    AnrufBereit,
    EingehenderAnruf { von: Identitaet },
    /// Angebot wurde automatisch abgelehnt (beschaeftigt oder ohne Medien)
    AnrufAbgewiesen { von: Identitaet },
    Abgelehnt { von: Identitaet, grund: Option<String> },
    Zeitueberschreitung { ziel: Identitaet },
    Verbunden { peer: Identitaet },
    RemoteSpur,
    GespraechBeendet { peer: Identitaet },
    Fehler(String),
    ServerFehler(String),
    TransportGetrennt,
}

// ---------------------------------------------------------------------------
// Verhandlung
// ---------------------------------------------------------------------------

/// Zustandsmaschine eines Clients
pub struct Verhandlung {
    ice_server: Vec<String>,
    angebot_timeout: Duration,
    phase: Phase,
    /// Eigene Identitaet nach erfolgreichem Login
    name: Option<Identitaet>,
    /// Gesendeter Login, dessen Antwort aussteht
    login: Option<(String, Freigabe)>,
    freigabe: Freigabe,
    /// Generation des aktuellen Verhandlungsobjekts
    generation: u64,
    objekt_vorhanden: bool,
    objekt_bereit: bool,
    peer: Option<Identitaet>,
    remote_gesetzt: bool,
    /// Empfangenes Angebot (klingelt) oder lokale Beschreibung vor dem Senden
    beschreibung: Option<Beschreibung>,
    eingehende_kandidaten: VecDeque<Kandidat>,
    ausgehende_kandidaten: Vec<Kandidat>,
}

impl Verhandlung {
    /// Erstellt eine Verhandlung in Phase `Idle`
    pub fn neu(konfig: &ClientKonfig) -> Self {
        Self {
            ice_server: konfig.ice_server.clone(),
            angebot_timeout: konfig.angebot_timeout(),
            phase: Phase::Idle,
            name: None,
            login: None,
            freigabe: Freigabe::Medien,
            generation: 0,
            objekt_vorhanden: false,
            objekt_bereit: false,
            peer: None,
            remote_gesetzt: false,
            beschreibung: None,
            eingehende_kandidaten: VecDeque::new(),
            ausgehende_kandidaten: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn name(&self) -> Option<&Identitaet> {
        self.name.as_ref()
    }

    pub fn peer(&self) -> Option<&Identitaet> {
        self.peer.as_ref()
    }

    /// Anzahl eingehender Kandidaten, die auf die Remote-Beschreibung warten
    pub fn wartende_kandidaten(&self) -> usize {
        self.eingehende_kandidaten.len()
    }

    /// Verarbeitet ein Ereignis und gibt die auszufuehrenden Aktionen zurueck
    pub fn verarbeiten(&mut self, ereignis: Ereignis) -> Vec<Aktion> {
        let mut aktionen = Vec::new();

        if let Some(generation) = ereignis.generation() {
            if generation != self.generation {
                tracing::debug!(
                    generation,
                    aktuell = self.generation,
                    "Veraltetes Ergebnis verworfen"
                );
                return aktionen;
            }
        }

        match ereignis {
            Ereignis::Anmelden { name, freigabe } => self.anmelden(name, freigabe, &mut aktionen),
            Ereignis::Anrufen { ziel } => self.anrufen(ziel, &mut aktionen),
            Ereignis::Annehmen => self.annehmen(&mut aktionen),
            Ereignis::Ablehnen => self.ablehnen(&mut aktionen),
            Ereignis::Auflegen => self.auflegen(&mut aktionen),
            Ereignis::Abmelden => self.abmelden(&mut aktionen),
            Ereignis::MedienErneutAnfordern => self.medien_erneut_anfordern(&mut aktionen),

            Ereignis::Server(nachricht) => self.server_nachricht(nachricht, &mut aktionen),
            Ereignis::TransportGetrennt => {
                tracing::warn!(phase = ?self.phase, "Verbindung zum Relay verloren");
                self.login = None;
                self.abbauen(true, &mut aktionen);
                self.name = None;
                aktionen.push(Aktion::Melden(Hinweis::TransportGetrennt));
            }

            Ereignis::MedienErhalten { ergebnis, .. } => self.medien_erhalten(ergebnis, &mut aktionen),
            Ereignis::VerbindungErstellt { ergebnis, .. } => {
                self.verbindung_erstellt(ergebnis, &mut aktionen)
            }
            Ereignis::AngebotErstellt { ergebnis, .. } => self.angebot_erstellt(ergebnis, &mut aktionen),
            Ereignis::AntwortErstellt { ergebnis, .. } => self.antwort_erstellt(ergebnis, &mut aktionen),
            Ereignis::LokaleBeschreibungGesetzt { ergebnis, .. } => {
                self.lokale_beschreibung_gesetzt(ergebnis, &mut aktionen)
            }
            Ereignis::RemoteBeschreibungGesetzt { ergebnis, .. } => {
                self.remote_beschreibung_gesetzt(ergebnis, &mut aktionen)
            }
            Ereignis::KandidatAngewendet { ergebnis, .. } => {
                // Einzelne Kandidaten duerfen scheitern
                if let Err(e) = ergebnis {
                    tracing::warn!(fehler = %e, "Kandidat nicht angewendet");
                }
            }

            Ereignis::LokalerKandidat { kandidat, .. } => self.lokaler_kandidat(kandidat, &mut aktionen),
            Ereignis::SpurEmpfangen { .. } => {
                if self.phase.im_gespraech() {
                    aktionen.push(Aktion::Melden(Hinweis::RemoteSpur));
                }
            }
            Ereignis::Verbindungszustand { zustand, .. } => {
                tracing::debug!(?zustand, phase = ?self.phase, "Verbindungszustand");
                if zustand == VerbindungsZustand::Fehlgeschlagen && self.phase.im_gespraech() {
                    self.fehlschlag(
                        ClientError::verhandlung("Verbindung fehlgeschlagen"),
                        &mut aktionen,
                    );
                }
            }

            Ereignis::AngebotZeitueberschritten { .. } => {
                if self.phase == Phase::Anbietend(Anbieten::Warten) {
                    if let Some(ziel) = self.peer.clone() {
                        tracing::info!(ziel = %ziel, "Angebot unbeantwortet, breche ab");
                        aktionen.push(Aktion::Senden(ClientNachricht::Leave {
                            name: Some(ziel.clone()),
                        }));
                        aktionen.push(Aktion::Melden(Hinweis::Zeitueberschreitung { ziel }));
                        self.abbauen(false, &mut aktionen);
                    }
                }
            }
        }

        aktionen
    }

    // -----------------------------------------------------------------------
    // Anmeldung und Medien
    // -----------------------------------------------------------------------

    fn anmelden(&mut self, name: String, freigabe: Freigabe, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::Idle || self.login.is_some() {
            aktionen.push(Aktion::Melden(Hinweis::Fehler("Bereits angemeldet".into())));
            return;
        }
        self.login = Some((name.clone(), freigabe));
        aktionen.push(Aktion::Senden(ClientNachricht::Login {
            name,
            share: Some(freigabe),
        }));
    }

    fn login_ergebnis(
        &mut self,
        success: bool,
        benutzer: Option<Vec<Identitaet>>,
        share: Option<Freigabe>,
        message: Option<String>,
        aktionen: &mut Vec<Aktion>,
    ) {
        let Some((name, freigabe)) = self.login.take() else {
            tracing::debug!("Login-Antwort ohne ausstehenden Login ignoriert");
            return;
        };

        if !success {
            tracing::info!(name = %name, "Login abgelehnt");
            aktionen.push(Aktion::Melden(Hinweis::LoginAbgelehnt { name, grund: message }));
            return;
        }

        tracing::info!(name = %name, "Angemeldet");
        self.name = Identitaet::neu(name).ok();
        self.freigabe = share.unwrap_or(freigabe);
        self.phase = Phase::Registriert;
        aktionen.push(Aktion::Melden(Hinweis::Angemeldet {
            benutzer: benutzer.unwrap_or_default(),
        }));
        aktionen.push(Aktion::MedienAnfordern {
            generation: self.generation,
            freigabe: self.freigabe,
        });
    }

    fn medien_erhalten(&mut self, ergebnis: ClientResult<()>, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::Registriert {
            return;
        }
        match ergebnis {
            Ok(()) => {
                self.phase = Phase::MedienBereit;
                aktionen.push(Aktion::Melden(Hinweis::MedienBereit));
                self.neues_objekt(aktionen);
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Medien nicht verfuegbar");
                aktionen.push(Aktion::Melden(Hinweis::MedienFehler(e.to_string())));
            }
        }
    }

    fn medien_erneut_anfordern(&mut self, aktionen: &mut Vec<Aktion>) {
        match self.phase {
            Phase::Registriert => aktionen.push(Aktion::MedienAnfordern {
                generation: self.generation,
                freigabe: self.freigabe,
            }),
            // Verhandlungsobjekt fehlt nach einem Fehlschlag
            Phase::MedienBereit if !self.objekt_bereit => {
                if self.objekt_vorhanden {
                    aktionen.push(Aktion::VerbindungSchliessen {
                        generation: self.generation,
                    });
                }
                self.neues_objekt(aktionen);
            }
            _ => tracing::debug!(phase = ?self.phase, "Nichts erneut anzufordern"),
        }
    }

    fn neues_objekt(&mut self, aktionen: &mut Vec<Aktion>) {
        self.generation += 1;
        self.objekt_vorhanden = true;
        self.objekt_bereit = false;
        aktionen.push(Aktion::VerbindungErstellen {
            generation: self.generation,
            ice_server: self.ice_server.clone(),
        });
    }

    fn verbindung_erstellt(&mut self, ergebnis: ClientResult<()>, aktionen: &mut Vec<Aktion>) {
        match ergebnis {
            Ok(()) => {
                self.objekt_bereit = true;
                aktionen.push(Aktion::Melden(Hinweis::AnrufBereit));
            }
            Err(e) => {
                tracing::warn!(fehler = %e, "Verhandlungsobjekt nicht erstellt");
                self.objekt_vorhanden = false;
                aktionen.push(Aktion::Melden(Hinweis::Fehler(e.to_string())));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Anrufer
    // -----------------------------------------------------------------------

    fn anrufen(&mut self, ziel: Identitaet, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::MedienBereit || !self.objekt_bereit {
            aktionen.push(Aktion::Melden(Hinweis::Fehler(
                "Nicht bereit fuer einen Anruf".into(),
            )));
            return;
        }
        if self.name.as_ref() == Some(&ziel) {
            aktionen.push(Aktion::Melden(Hinweis::Fehler(
                "Anruf an sich selbst nicht moeglich".into(),
            )));
            return;
        }

        tracing::info!(ziel = %ziel, "Rufe an");
        self.phase = Phase::Anbietend(Anbieten::Erstellen);
        self.peer_setzen(ziel, aktionen);
        aktionen.push(Aktion::AngebotErstellen {
            generation: self.generation,
        });
    }

    fn angebot_erstellt(&mut self, ergebnis: ClientResult<Beschreibung>, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::Anbietend(Anbieten::Erstellen) {
            return;
        }
        match ergebnis {
            Ok(angebot) => {
                self.phase = Phase::Anbietend(Anbieten::LokalSetzen);
                self.beschreibung = Some(angebot.clone());
                aktionen.push(Aktion::LokaleBeschreibungSetzen {
                    generation: self.generation,
                    beschreibung: angebot,
                });
            }
            Err(e) => self.fehlschlag(e, aktionen),
        }
    }

    // -----------------------------------------------------------------------
    // Angerufener
    // -----------------------------------------------------------------------

    fn angebot_empfangen(&mut self, angebot: Beschreibung, von: Identitaet, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::MedienBereit || self.peer.is_some() {
            tracing::info!(von = %von, phase = ?self.phase, "Angebot automatisch abgelehnt");
            aktionen.push(Aktion::Senden(ClientNachricht::Decline { name: von.clone() }));
            aktionen.push(Aktion::Melden(Hinweis::AnrufAbgewiesen { von }));
            return;
        }

        tracing::info!(von = %von, "Eingehender Anruf");
        self.phase = Phase::Antwortend(Antworten::Klingelt);
        self.beschreibung = Some(angebot);
        self.peer_setzen(von.clone(), aktionen);
        aktionen.push(Aktion::Melden(Hinweis::EingehenderAnruf { von }));
    }

    fn annehmen(&mut self, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::Antwortend(Antworten::Klingelt) {
            aktionen.push(Aktion::Melden(Hinweis::Fehler("Kein eingehender Anruf".into())));
            return;
        }
        if !self.objekt_bereit {
            aktionen.push(Aktion::Melden(Hinweis::Fehler(
                "Verbindung noch nicht bereit".into(),
            )));
            return;
        }
        let Some(angebot) = self.beschreibung.take() else {
            self.fehlschlag(ClientError::verhandlung("Angebot fehlt"), aktionen);
            return;
        };
        self.phase = Phase::Antwortend(Antworten::RemoteSetzen);
        aktionen.push(Aktion::RemoteBeschreibungSetzen {
            generation: self.generation,
            beschreibung: angebot,
        });
    }

    fn ablehnen(&mut self, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::Antwortend(Antworten::Klingelt) {
            return;
        }
        if let Some(peer) = self.peer.take() {
            tracing::info!(von = %peer, "Anruf abgelehnt");
            aktionen.push(Aktion::Senden(ClientNachricht::Decline { name: peer }));
        }
        // Verhandlungsobjekt war unbenutzt und bleibt bestehen
        self.beschreibung = None;
        self.eingehende_kandidaten.clear();
        self.ausgehende_kandidaten.clear();
        self.phase = Phase::MedienBereit;
    }

    fn antwort_erstellt(&mut self, ergebnis: ClientResult<Beschreibung>, aktionen: &mut Vec<Aktion>) {
        if self.phase != Phase::Antwortend(Antworten::Erstellen) {
            return;
        }
        match ergebnis {
            Ok(antwort) => {
                self.phase = Phase::Antwortend(Antworten::LokalSetzen);
                self.beschreibung = Some(antwort.clone());
                aktionen.push(Aktion::LokaleBeschreibungSetzen {
                    generation: self.generation,
                    beschreibung: antwort,
                });
            }
            Err(e) => self.fehlschlag(e, aktionen),
        }
    }

    // -----------------------------------------------------------------------
    // Beschreibungen
    // -----------------------------------------------------------------------

    fn lokale_beschreibung_gesetzt(&mut self, ergebnis: ClientResult<()>, aktionen: &mut Vec<Aktion>) {
        if !matches!(
            self.phase,
            Phase::Anbietend(Anbieten::LokalSetzen) | Phase::Antwortend(Antworten::LokalSetzen)
        ) {
            return;
        }
        if let Err(e) = ergebnis {
            self.fehlschlag(e, aktionen);
            return;
        }
        let (Some(peer), Some(beschreibung)) = (self.peer.clone(), self.beschreibung.take()) else {
            self.fehlschlag(ClientError::verhandlung("Beschreibung fehlt"), aktionen);
            return;
        };

        if self.phase == Phase::Anbietend(Anbieten::LokalSetzen) {
            // Erst jetzt ist das Angebot verbindlich
            aktionen.push(Aktion::Senden(ClientNachricht::Offer {
                name: peer,
                offer: beschreibung,
            }));
            self.phase = Phase::Anbietend(Anbieten::Warten);
            aktionen.push(Aktion::ZeitgeberStarten {
                generation: self.generation,
                dauer: self.angebot_timeout,
            });
            self.ausgehende_kandidaten_senden(aktionen);
        } else {
            aktionen.push(Aktion::Senden(ClientNachricht::Answer {
                name: peer.clone(),
                answer: beschreibung,
            }));
            self.phase = Phase::Verbunden;
            tracing::info!(peer = %peer, "Verbunden");
            aktionen.push(Aktion::Melden(Hinweis::Verbunden { peer }));
        }
    }

    fn remote_beschreibung_gesetzt(&mut self, ergebnis: ClientResult<()>, aktionen: &mut Vec<Aktion>) {
        if !matches!(
            self.phase,
            Phase::Anbietend(Anbieten::RemoteSetzen) | Phase::Antwortend(Antworten::RemoteSetzen)
        ) {
            return;
        }
        if let Err(e) = ergebnis {
            self.fehlschlag(e, aktionen);
            return;
        }

        self.kandidaten_anwenden(aktionen);

        if self.phase == Phase::Anbietend(Anbieten::RemoteSetzen) {
            self.phase = Phase::Verbunden;
            if let Some(peer) = self.peer.clone() {
                tracing::info!(peer = %peer, "Verbunden");
                aktionen.push(Aktion::Melden(Hinweis::Verbunden { peer }));
            }
        } else {
            self.phase = Phase::Antwortend(Antworten::Erstellen);
            aktionen.push(Aktion::AntwortErstellen {
                generation: self.generation,
            });
        }
    }

    // -----------------------------------------------------------------------
    // Kandidaten
    // -----------------------------------------------------------------------

    fn kandidat_empfangen(&mut self, kandidat: Kandidat, aktionen: &mut Vec<Aktion>) {
        if !self.phase.im_gespraech() {
            tracing::debug!(phase = ?self.phase, "Kandidat ausserhalb eines Gespraechs verworfen");
            return;
        }
        if self.remote_gesetzt {
            aktionen.push(Aktion::KandidatHinzufuegen {
                generation: self.generation,
                kandidat,
            });
        } else {
            self.eingehende_kandidaten.push_back(kandidat);
        }
    }

    /// Leert die Warteschlange in Ankunftsreihenfolge, genau einmal
    fn kandidaten_anwenden(&mut self, aktionen: &mut Vec<Aktion>) {
        self.remote_gesetzt = true;
        let generation = self.generation;
        aktionen.extend(
            self.eingehende_kandidaten
                .drain(..)
                .map(|kandidat| Aktion::KandidatHinzufuegen { generation, kandidat }),
        );
    }

    fn lokaler_kandidat(&mut self, kandidat: Kandidat, aktionen: &mut Vec<Aktion>) {
        if self.phase == Phase::Idle {
            return;
        }
        self.ausgehende_kandidaten.push(kandidat);
        self.ausgehende_kandidaten_senden(aktionen);
    }

    /// Sendet gepufferte lokale Kandidaten, sobald die Gegenseite vom
    /// Gespraech weiss
    fn ausgehende_kandidaten_senden(&mut self, aktionen: &mut Vec<Aktion>) {
        if !self.peer_kontaktiert() {
            return;
        }
        let Some(peer) = &self.peer else {
            return;
        };
        for kandidat in self.ausgehende_kandidaten.drain(..) {
            aktionen.push(Aktion::Senden(ClientNachricht::Candidate {
                name: Some(peer.clone()),
                candidate: kandidat,
            }));
        }
    }

    fn peer_setzen(&mut self, peer: Identitaet, aktionen: &mut Vec<Aktion>) {
        self.peer = Some(peer);
        self.ausgehende_kandidaten_senden(aktionen);
    }

    // -----------------------------------------------------------------------
    // Relay-Nachrichten
    // -----------------------------------------------------------------------

    fn server_nachricht(&mut self, nachricht: ServerNachricht, aktionen: &mut Vec<Aktion>) {
        match nachricht {
            ServerNachricht::Login {
                success,
                all_users,
                share,
                message,
            } => self.login_ergebnis(success, all_users, share, message, aktionen),
            ServerNachricht::Offer { offer, name } => self.angebot_empfangen(offer, name, aktionen),
            ServerNachricht::Answer { answer } => {
                if self.phase != Phase::Anbietend(Anbieten::Warten) {
                    tracing::debug!(phase = ?self.phase, "Unerwartete Antwort verworfen");
                    return;
                }
                self.phase = Phase::Anbietend(Anbieten::RemoteSetzen);
                aktionen.push(Aktion::RemoteBeschreibungSetzen {
                    generation: self.generation,
                    beschreibung: answer,
                });
            }
            ServerNachricht::Decline { name, message } => {
                let Phase::Anbietend(_) = self.phase else {
                    return;
                };
                let Some(peer) = self.peer.clone() else {
                    return;
                };
                if name.as_ref().is_some_and(|n| n != &peer) {
                    return;
                }
                tracing::info!(von = %peer, grund = ?message, "Anruf abgelehnt");
                aktionen.push(Aktion::Melden(Hinweis::Abgelehnt {
                    von: peer,
                    grund: message,
                }));
                self.abbauen(false, aktionen);
            }
            ServerNachricht::Candidate { candidate } => self.kandidat_empfangen(candidate, aktionen),
            ServerNachricht::Leave {} | ServerNachricht::Hangup {} => {
                if let Some(peer) = self.peer.clone() {
                    tracing::info!(peer = %peer, "Gegenseite hat aufgelegt");
                    aktionen.push(Aktion::Melden(Hinweis::GespraechBeendet { peer }));
                    self.abbauen(false, aktionen);
                }
            }
            ServerNachricht::Users { users } => {
                aktionen.push(Aktion::Melden(Hinweis::Benutzerliste(users)));
            }
            ServerNachricht::Error { message } => {
                tracing::warn!(message = %message, "Fehler vom Relay");
                aktionen.push(Aktion::Melden(Hinweis::ServerFehler(message)));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Abbau
    // -----------------------------------------------------------------------

    fn auflegen(&mut self, aktionen: &mut Vec<Aktion>) {
        if !self.phase.im_gespraech() {
            return;
        }
        if self.peer_kontaktiert() {
            if let Some(peer) = &self.peer {
                tracing::info!(peer = %peer, "Lege auf");
                aktionen.push(Aktion::Senden(ClientNachricht::Leave {
                    name: Some(peer.clone()),
                }));
            }
        }
        self.abbauen(false, aktionen);
    }

    fn abmelden(&mut self, aktionen: &mut Vec<Aktion>) {
        if self.phase == Phase::Idle && self.login.is_none() {
            return;
        }
        if self.peer_kontaktiert() {
            if let Some(peer) = &self.peer {
                aktionen.push(Aktion::Senden(ClientNachricht::Leave {
                    name: Some(peer.clone()),
                }));
            }
        }
        self.login = None;
        self.abbauen(true, aktionen);
        self.name = None;
        aktionen.push(Aktion::TransportSchliessen);
    }

    /// Die Gegenseite weiss bereits vom Gespraech
    fn peer_kontaktiert(&self) -> bool {
        matches!(
            self.phase,
            Phase::Anbietend(Anbieten::Warten | Anbieten::RemoteSetzen)
                | Phase::Antwortend(_)
                | Phase::Verbunden
        )
    }

    /// Meldet einen Fehlschlag und kehrt nach `MedienBereit` zurueck
    fn fehlschlag(&mut self, fehler: ClientError, aktionen: &mut Vec<Aktion>) {
        tracing::warn!(fehler = %fehler, phase = ?self.phase, "Verhandlung fehlgeschlagen");
        aktionen.push(Aktion::Melden(Hinweis::Fehler(fehler.to_string())));
        if self.peer_kontaktiert() {
            if let Some(peer) = &self.peer {
                aktionen.push(Aktion::Senden(ClientNachricht::Leave {
                    name: Some(peer.clone()),
                }));
            }
        }
        self.abbauen(false, aktionen);
    }

    /// Schliesst das Verhandlungsobjekt und setzt den Gespraechszustand zurueck
    ///
    /// Mit `nach_idle` werden auch die Medien freigegeben, sonst entsteht ein
    /// frisches Objekt in `MedienBereit`. Wiederholter Abbau ist wirkungslos.
    fn abbauen(&mut self, nach_idle: bool, aktionen: &mut Vec<Aktion>) {
        if nach_idle {
            if self.phase == Phase::Idle {
                return;
            }
        } else if !self.phase.im_gespraech() {
            return;
        }

        if self.objekt_vorhanden {
            aktionen.push(Aktion::VerbindungSchliessen {
                generation: self.generation,
            });
        }
        self.objekt_vorhanden = false;
        self.objekt_bereit = false;
        self.peer = None;
        self.beschreibung = None;
        self.remote_gesetzt = false;
        self.eingehende_kandidaten.clear();
        self.ausgehende_kandidaten.clear();

        if nach_idle {
            // Alte Rueckmeldungen abkoppeln
            self.generation += 1;
            self.phase = Phase::Idle;
            aktionen.push(Aktion::MedienFreigeben);
        } else {
            self.phase = Phase::MedienBereit;
            self.neues_objekt(aktionen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identitaet {
        Identitaet::neu(name).unwrap()
    }

    fn roh(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_string()).unwrap()
    }

    /// Verhandlung in `MedienBereit` mit fertigem Verhandlungsobjekt
    fn bereit(name: &str) -> Verhandlung {
        let mut v = Verhandlung::neu(&ClientKonfig::default());
        v.verarbeiten(Ereignis::Anmelden {
            name: name.into(),
            freigabe: Freigabe::Medien,
        });
        v.verarbeiten(Ereignis::Server(ServerNachricht::Login {
            success: true,
            all_users: Some(vec![id(name)]),
            share: Some(Freigabe::Medien),
            message: None,
        }));
        let g = v.generation();
        v.verarbeiten(Ereignis::MedienErhalten {
            generation: g,
            ergebnis: Ok(()),
        });
        let g = v.generation();
        v.verarbeiten(Ereignis::VerbindungErstellt {
            generation: g,
            ergebnis: Ok(()),
        });
        assert_eq!(v.phase(), Phase::MedienBereit);
        v
    }

    /// Anrufer bis kurz vor Eingang der Antwort
    fn angebot_gesendet(von: &str, an: &str) -> Verhandlung {
        let mut v = bereit(von);
        v.verarbeiten(Ereignis::Anrufen { ziel: id(an) });
        let g = v.generation();
        v.verarbeiten(Ereignis::AngebotErstellt {
            generation: g,
            ergebnis: Ok(roh(r#"{"sdp":"o"}"#)),
        });
        v.verarbeiten(Ereignis::LokaleBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        assert_eq!(v.phase(), Phase::Anbietend(Anbieten::Warten));
        v
    }

    fn verbunden_als_anrufer() -> Verhandlung {
        let mut v = angebot_gesendet("alice", "bob");
        let g = v.generation();
        v.verarbeiten(Ereignis::Server(ServerNachricht::Answer {
            answer: roh(r#"{"sdp":"a"}"#),
        }));
        v.verarbeiten(Ereignis::RemoteBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        assert_eq!(v.phase(), Phase::Verbunden);
        v
    }

    fn kandidat(text: &str) -> Ereignis {
        Ereignis::Server(ServerNachricht::Candidate { candidate: roh(text) })
    }

    fn angewendete_kandidaten(aktionen: &[Aktion]) -> Vec<String> {
        aktionen
            .iter()
            .filter_map(|a| match a {
                Aktion::KandidatHinzufuegen { kandidat, .. } => Some(kandidat.get().to_string()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn login_fordert_medien_an() {
        let mut v = Verhandlung::neu(&ClientKonfig::default());
        let a = v.verarbeiten(Ereignis::Anmelden {
            name: "alice".into(),
            freigabe: Freigabe::Bildschirm,
        });
        assert!(matches!(
            &a[..],
            [Aktion::Senden(ClientNachricht::Login { name, share: Some(Freigabe::Bildschirm) })] if name == "alice"
        ));

        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::Login {
            success: true,
            all_users: Some(vec![id("alice"), id("bob")]),
            share: Some(Freigabe::Bildschirm),
            message: None,
        }));
        assert_eq!(v.phase(), Phase::Registriert);
        assert_eq!(v.name(), Some(&id("alice")));
        assert!(matches!(
            &a[0],
            Aktion::Melden(Hinweis::Angemeldet { benutzer }) if benutzer.len() == 2
        ));
        assert!(matches!(
            a[1],
            Aktion::MedienAnfordern { freigabe: Freigabe::Bildschirm, .. }
        ));
    }

    #[test]
    fn abgelehnter_login_bleibt_idle() {
        let mut v = Verhandlung::neu(&ClientKonfig::default());
        v.verarbeiten(Ereignis::Anmelden {
            name: "alice".into(),
            freigabe: Freigabe::Medien,
        });
        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::login_abgelehnt(Some(
            "Name bereits vergeben: alice".into(),
        ))));
        assert_eq!(v.phase(), Phase::Idle);
        assert!(matches!(
            &a[..],
            [Aktion::Melden(Hinweis::LoginAbgelehnt { name, grund: Some(_) })] if name == "alice"
        ));

        // Neuer Versuch ist moeglich
        let a = v.verarbeiten(Ereignis::Anmelden {
            name: "alina".into(),
            freigabe: Freigabe::Medien,
        });
        assert!(matches!(a[0], Aktion::Senden(ClientNachricht::Login { .. })));
    }

    #[test]
    fn medienfehler_und_neuer_versuch() {
        let mut v = Verhandlung::neu(&ClientKonfig::default());
        v.verarbeiten(Ereignis::Anmelden {
            name: "alice".into(),
            freigabe: Freigabe::Medien,
        });
        v.verarbeiten(Ereignis::Server(ServerNachricht::Login {
            success: true,
            all_users: None,
            share: None,
            message: None,
        }));
        let g = v.generation();
        let a = v.verarbeiten(Ereignis::MedienErhalten {
            generation: g,
            ergebnis: Err(ClientError::Medien("keine Kamera".into())),
        });
        assert_eq!(v.phase(), Phase::Registriert);
        assert!(matches!(&a[..], [Aktion::Melden(Hinweis::MedienFehler(_))]));

        let a = v.verarbeiten(Ereignis::MedienErneutAnfordern);
        assert!(matches!(a[..], [Aktion::MedienAnfordern { .. }]));

        let a = v.verarbeiten(Ereignis::MedienErhalten {
            generation: g,
            ergebnis: Ok(()),
        });
        assert_eq!(v.phase(), Phase::MedienBereit);
        assert!(matches!(
            &a[..],
            [Aktion::Melden(Hinweis::MedienBereit), Aktion::VerbindungErstellen { ice_server, .. }]
                if ice_server.len() == 2
        ));
    }

    #[test]
    fn angebot_wird_erst_nach_lokaler_beschreibung_gesendet() {
        let mut v = bereit("alice");
        let g = v.generation();

        let a = v.verarbeiten(Ereignis::Anrufen { ziel: id("bob") });
        assert!(matches!(&a[..], [Aktion::AngebotErstellen { generation }] if *generation == g));

        let a = v.verarbeiten(Ereignis::AngebotErstellt {
            generation: g,
            ergebnis: Ok(roh(r#"{"sdp":"o"}"#)),
        });
        assert!(matches!(a[..], [Aktion::LokaleBeschreibungSetzen { .. }]));
        assert!(!a.iter().any(|x| matches!(x, Aktion::Senden(_))));

        let a = v.verarbeiten(Ereignis::LokaleBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        match &a[..] {
            [Aktion::Senden(ClientNachricht::Offer { name, offer }), Aktion::ZeitgeberStarten { dauer, .. }] => {
                assert_eq!(name, &id("bob"));
                assert_eq!(offer.get(), r#"{"sdp":"o"}"#);
                assert_eq!(*dauer, Duration::from_secs(30));
            }
            andere => panic!("Unerwartete Aktionen: {andere:?}"),
        }
    }

    /// Kandidat 1 vor, Kandidat 2 waehrend des Setzens der Antwort
    #[test]
    fn anrufer_wendet_kandidaten_in_reihenfolge_an() {
        let mut v = angebot_gesendet("alice", "bob");
        let g = v.generation();

        assert!(v.verarbeiten(kandidat(r#"{"c":1}"#)).is_empty());
        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::Answer {
            answer: roh(r#"{"sdp":"a"}"#),
        }));
        assert!(matches!(a[..], [Aktion::RemoteBeschreibungSetzen { .. }]));
        assert!(v.verarbeiten(kandidat(r#"{"c":2}"#)).is_empty());
        assert_eq!(v.wartende_kandidaten(), 2);

        let a = v.verarbeiten(Ereignis::RemoteBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        assert_eq!(angewendete_kandidaten(&a), vec![r#"{"c":1}"#, r#"{"c":2}"#]);
        assert!(matches!(a.last(), Some(Aktion::Melden(Hinweis::Verbunden { peer })) if peer == &id("bob")));
        assert_eq!(v.wartende_kandidaten(), 0);

        // Danach direkt
        let a = v.verarbeiten(kandidat(r#"{"c":3}"#));
        assert_eq!(angewendete_kandidaten(&a), vec![r#"{"c":3}"#]);
    }

    #[test]
    fn angerufener_wendet_kandidaten_in_reihenfolge_an() {
        let mut v = bereit("bob");
        let g = v.generation();

        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::Offer {
            offer: roh(r#"{"sdp":"o"}"#),
            name: id("alice"),
        }));
        assert_eq!(v.phase(), Phase::Antwortend(Antworten::Klingelt));
        assert_eq!(
            a.last().map(|x| matches!(x, Aktion::Melden(Hinweis::EingehenderAnruf { von }) if von == &id("alice"))),
            Some(true)
        );

        assert!(v.verarbeiten(kandidat(r#"{"c":1}"#)).is_empty());
        let a = v.verarbeiten(Ereignis::Annehmen);
        assert!(matches!(
            &a[..],
            [Aktion::RemoteBeschreibungSetzen { beschreibung, .. }] if beschreibung.get() == r#"{"sdp":"o"}"#
        ));
        assert!(v.verarbeiten(kandidat(r#"{"c":2}"#)).is_empty());

        let a = v.verarbeiten(Ereignis::RemoteBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        assert_eq!(angewendete_kandidaten(&a), vec![r#"{"c":1}"#, r#"{"c":2}"#]);
        assert!(matches!(a.last(), Some(Aktion::AntwortErstellen { .. })));

        let a = v.verarbeiten(Ereignis::AntwortErstellt {
            generation: g,
            ergebnis: Ok(roh(r#"{"sdp":"a"}"#)),
        });
        assert!(matches!(a[..], [Aktion::LokaleBeschreibungSetzen { .. }]));

        let a = v.verarbeiten(Ereignis::LokaleBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        assert!(matches!(
            &a[0],
            Aktion::Senden(ClientNachricht::Answer { name, answer }) if name == &id("alice") && answer.get() == r#"{"sdp":"a"}"#
        ));
        assert_eq!(v.phase(), Phase::Verbunden);
    }

    #[test]
    fn lokale_kandidaten_folgen_dem_angebot() {
        let mut v = bereit("alice");
        let g = v.generation();

        assert!(v
            .verarbeiten(Ereignis::LokalerKandidat {
                generation: g,
                kandidat: roh(r#"{"l":1}"#),
            })
            .is_empty());

        let a = v.verarbeiten(Ereignis::Anrufen { ziel: id("bob") });
        assert!(matches!(a[..], [Aktion::AngebotErstellen { .. }]));
        v.verarbeiten(Ereignis::AngebotErstellt {
            generation: g,
            ergebnis: Ok(roh(r#"{"sdp":"o"}"#)),
        });
        // Waehrend die lokale Beschreibung gesetzt wird
        assert!(v
            .verarbeiten(Ereignis::LokalerKandidat {
                generation: g,
                kandidat: roh(r#"{"l":2}"#),
            })
            .is_empty());

        let a = v.verarbeiten(Ereignis::LokaleBeschreibungGesetzt {
            generation: g,
            ergebnis: Ok(()),
        });
        let gesendet: Vec<String> = a
            .iter()
            .filter_map(|x| match x {
                Aktion::Senden(ClientNachricht::Offer { .. }) => Some("offer".to_string()),
                Aktion::Senden(ClientNachricht::Candidate { name: Some(n), candidate }) => {
                    assert_eq!(n, &id("bob"));
                    Some(candidate.get().to_string())
                }
                _ => None,
            })
            .collect();
        assert_eq!(gesendet, vec!["offer", r#"{"l":1}"#, r#"{"l":2}"#]);

        let a = v.verarbeiten(Ereignis::LokalerKandidat {
            generation: g,
            kandidat: roh(r#"{"l":3}"#),
        });
        assert!(matches!(&a[..], [Aktion::Senden(ClientNachricht::Candidate { .. })]));
    }

    #[test]
    fn angerufener_sendet_kandidaten_sofort() {
        let mut v = bereit("bob");
        let g = v.generation();
        v.verarbeiten(Ereignis::Server(ServerNachricht::Offer {
            offer: roh("{}"),
            name: id("alice"),
        }));
        let a = v.verarbeiten(Ereignis::LokalerKandidat {
            generation: g,
            kandidat: roh(r#"{"l":1}"#),
        });
        assert!(matches!(
            &a[..],
            [Aktion::Senden(ClientNachricht::Candidate { name: Some(n), .. })] if n == &id("alice")
        ));
    }

    /// Reicht die Relay-Nachrichten aus `aktionen` in Reihenfolge an `an` weiter
    fn zustellen(aktionen: &[Aktion], an: &mut Verhandlung) -> Vec<Aktion> {
        let mut ergebnis = Vec::new();
        for aktion in aktionen {
            let nachricht = match aktion {
                Aktion::Senden(ClientNachricht::Offer { name: _, offer }) => ServerNachricht::Offer {
                    offer: offer.clone(),
                    name: id("alice"),
                },
                Aktion::Senden(ClientNachricht::Candidate { candidate, .. }) => ServerNachricht::Candidate {
                    candidate: candidate.clone(),
                },
                _ => continue,
            };
            ergebnis.extend(an.verarbeiten(Ereignis::Server(nachricht)));
        }
        ergebnis
    }

    /// Ein Kandidat, den der Anrufer vor dem Versand des Angebots findet,
    /// geht beim Angerufenen nicht verloren
    #[test]
    fn frueher_kandidat_des_anrufers_kommt_an() {
        let mut anrufer = bereit("alice");
        let mut angerufener = bereit("bob");
        let ga = anrufer.generation();
        let gb = angerufener.generation();

        zustellen(&anrufer.verarbeiten(Ereignis::Anrufen { ziel: id("bob") }), &mut angerufener);
        zustellen(
            &anrufer.verarbeiten(Ereignis::AngebotErstellt {
                generation: ga,
                ergebnis: Ok(roh(r#"{"sdp":"o"}"#)),
            }),
            &mut angerufener,
        );
        let c0 = anrufer.verarbeiten(Ereignis::LokalerKandidat {
            generation: ga,
            kandidat: roh(r#"{"c":0}"#),
        });
        zustellen(&c0, &mut angerufener);
        assert_eq!(angerufener.phase(), Phase::MedienBereit);

        zustellen(
            &anrufer.verarbeiten(Ereignis::LokaleBeschreibungGesetzt {
                generation: ga,
                ergebnis: Ok(()),
            }),
            &mut angerufener,
        );
        assert_eq!(angerufener.phase(), Phase::Antwortend(Antworten::Klingelt));
        zustellen(
            &anrufer.verarbeiten(Ereignis::LokalerKandidat {
                generation: ga,
                kandidat: roh(r#"{"c":1}"#),
            }),
            &mut angerufener,
        );
        assert_eq!(angerufener.wartende_kandidaten(), 2);

        angerufener.verarbeiten(Ereignis::Annehmen);
        let a = angerufener.verarbeiten(Ereignis::RemoteBeschreibungGesetzt {
            generation: gb,
            ergebnis: Ok(()),
        });
        assert_eq!(angewendete_kandidaten(&a), vec![r#"{"c":0}"#, r#"{"c":1}"#]);
    }

    #[test]
    fn veraltete_ergebnisse_werden_ignoriert() {
        let mut v = verbunden_als_anrufer();
        let alt = v.generation();

        v.verarbeiten(Ereignis::Auflegen);
        assert_ne!(v.generation(), alt);

        assert!(v
            .verarbeiten(Ereignis::AngebotErstellt {
                generation: alt,
                ergebnis: Ok(roh("{}")),
            })
            .is_empty());
        assert!(v
            .verarbeiten(Ereignis::LokalerKandidat {
                generation: alt,
                kandidat: roh("{}"),
            })
            .is_empty());
        assert!(v
            .verarbeiten(Ereignis::Verbindungszustand {
                generation: alt,
                zustand: VerbindungsZustand::Fehlgeschlagen,
            })
            .is_empty());
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn abbau_ist_idempotent() {
        let mut v = verbunden_als_anrufer();
        let g = v.generation();

        let a = v.verarbeiten(Ereignis::Auflegen);
        assert!(matches!(
            &a[..],
            [
                Aktion::Senden(ClientNachricht::Leave { name: Some(n) }),
                Aktion::VerbindungSchliessen { generation },
                Aktion::VerbindungErstellen { .. },
            ] if n == &id("bob") && *generation == g
        ));
        assert_eq!(v.phase(), Phase::MedienBereit);
        assert!(v.peer().is_none());

        assert!(v.verarbeiten(Ereignis::Auflegen).is_empty());
        assert!(v.verarbeiten(Ereignis::Server(ServerNachricht::Leave {})).is_empty());
        assert!(v.verarbeiten(Ereignis::Server(ServerNachricht::Hangup {})).is_empty());
    }

    #[test]
    fn leave_der_gegenseite_baut_ab() {
        let mut v = verbunden_als_anrufer();
        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::Leave {}));
        assert!(matches!(&a[0], Aktion::Melden(Hinweis::GespraechBeendet { peer }) if peer == &id("bob")));
        // Keine Nachricht zurueck an den Relay
        assert!(!a.iter().any(|x| matches!(x, Aktion::Senden(_))));
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn beschaeftigt_lehnt_automatisch_ab() {
        let mut v = verbunden_als_anrufer();
        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::Offer {
            offer: roh("{}"),
            name: id("carol"),
        }));
        assert!(matches!(
            &a[0],
            Aktion::Senden(ClientNachricht::Decline { name }) if name == &id("carol")
        ));
        assert_eq!(v.phase(), Phase::Verbunden);
        assert_eq!(v.peer(), Some(&id("bob")));
    }

    #[test]
    fn ohne_medien_wird_abgelehnt() {
        let mut v = Verhandlung::neu(&ClientKonfig::default());
        v.verarbeiten(Ereignis::Anmelden {
            name: "bob".into(),
            freigabe: Freigabe::Medien,
        });
        v.verarbeiten(Ereignis::Server(ServerNachricht::Login {
            success: true,
            all_users: None,
            share: None,
            message: None,
        }));
        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::Offer {
            offer: roh("{}"),
            name: id("alice"),
        }));
        assert!(matches!(&a[0], Aktion::Senden(ClientNachricht::Decline { .. })));
        assert_eq!(v.phase(), Phase::Registriert);
    }

    #[test]
    fn ablehnen_bleibt_medien_bereit() {
        let mut v = bereit("bob");
        let g = v.generation();
        v.verarbeiten(Ereignis::Server(ServerNachricht::Offer {
            offer: roh("{}"),
            name: id("alice"),
        }));
        v.verarbeiten(kandidat(r#"{"c":1}"#));

        let a = v.verarbeiten(Ereignis::Ablehnen);
        assert!(matches!(
            &a[..],
            [Aktion::Senden(ClientNachricht::Decline { name })] if name == &id("alice")
        ));
        assert_eq!(v.phase(), Phase::MedienBereit);
        assert_eq!(v.generation(), g);
        assert_eq!(v.wartende_kandidaten(), 0);

        // Nachzuegler werden verworfen
        assert!(v.verarbeiten(kandidat(r#"{"c":2}"#)).is_empty());
        assert_eq!(v.wartende_kandidaten(), 0);
    }

    #[test]
    fn decline_beendet_anruf() {
        let mut v = angebot_gesendet("alice", "bob");
        let a = v.verarbeiten(Ereignis::Server(ServerNachricht::decline_mit_grund(
            id("bob"),
            "busy",
        )));
        assert!(matches!(
            &a[0],
            Aktion::Melden(Hinweis::Abgelehnt { von, grund: Some(g) }) if von == &id("bob") && g == "busy"
        ));
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn zeitueberschreitung_sendet_leave() {
        let mut v = angebot_gesendet("alice", "bob");
        let g = v.generation();
        let a = v.verarbeiten(Ereignis::AngebotZeitueberschritten { generation: g });
        assert!(matches!(
            &a[0],
            Aktion::Senden(ClientNachricht::Leave { name: Some(n) }) if n == &id("bob")
        ));
        assert!(matches!(&a[1], Aktion::Melden(Hinweis::Zeitueberschreitung { .. })));
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn zeitgeber_nach_antwort_ist_wirkungslos() {
        let mut v = verbunden_als_anrufer();
        let g = v.generation();
        assert!(v
            .verarbeiten(Ereignis::AngebotZeitueberschritten { generation: g })
            .is_empty());
        assert_eq!(v.phase(), Phase::Verbunden);
    }

    #[test]
    fn fehlgeschlagene_beschreibung_kehrt_zurueck() {
        let mut v = angebot_gesendet("alice", "bob");
        let g = v.generation();
        v.verarbeiten(Ereignis::Server(ServerNachricht::Answer { answer: roh("{}") }));
        let a = v.verarbeiten(Ereignis::RemoteBeschreibungGesetzt {
            generation: g,
            ergebnis: Err(ClientError::verhandlung("kaputt")),
        });
        assert!(matches!(&a[0], Aktion::Melden(Hinweis::Fehler(_))));
        assert!(a
            .iter()
            .any(|x| matches!(x, Aktion::Senden(ClientNachricht::Leave { .. }))));
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn fehlgeschlagene_verbindung_baut_ab() {
        let mut v = verbunden_als_anrufer();
        let g = v.generation();
        let a = v.verarbeiten(Ereignis::Verbindungszustand {
            generation: g,
            zustand: VerbindungsZustand::Fehlgeschlagen,
        });
        assert!(a
            .iter()
            .any(|x| matches!(x, Aktion::VerbindungSchliessen { generation } if *generation == g)));
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn abmelden_gibt_alles_frei() {
        let mut v = verbunden_als_anrufer();
        let a = v.verarbeiten(Ereignis::Abmelden);
        assert!(matches!(a[0], Aktion::Senden(ClientNachricht::Leave { .. })));
        assert!(a.iter().any(|x| matches!(x, Aktion::MedienFreigeben)));
        assert!(matches!(a.last(), Some(Aktion::TransportSchliessen)));
        assert!(!a.iter().any(|x| matches!(x, Aktion::VerbindungErstellen { .. })));
        assert_eq!(v.phase(), Phase::Idle);
        assert!(v.name().is_none());

        assert!(v.verarbeiten(Ereignis::Abmelden).is_empty());
    }

    #[test]
    fn anruf_an_sich_selbst() {
        let mut v = bereit("alice");
        let a = v.verarbeiten(Ereignis::Anrufen { ziel: id("alice") });
        assert!(matches!(&a[..], [Aktion::Melden(Hinweis::Fehler(_))]));
        assert_eq!(v.phase(), Phase::MedienBereit);
    }

    #[test]
    fn transportverlust_fuehrt_nach_idle() {
        let mut v = verbunden_als_anrufer();
        let a = v.verarbeiten(Ereignis::TransportGetrennt);
        assert!(!a.iter().any(|x| matches!(x, Aktion::Senden(_))));
        assert!(matches!(a.last(), Some(Aktion::Melden(Hinweis::TransportGetrennt))));
        assert_eq!(v.phase(), Phase::Idle);
    }
}
