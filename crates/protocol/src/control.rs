//! Signaling-Protokoll (WebSocket, JSON)
//!
//! Definiert alle Nachrichten, die Browser-Clients und Relay ueber den
//! persistenten WebSocket-Kanal austauschen.
//!
//! ## Design
//! - Ein JSON-Objekt pro Text-Frame, Diskriminator ist das Feld `type`
//! - Verhandlungs-Payloads (`offer`, `answer`, `candidate`) bleiben als
//!   `RawValue` opak und werden byte-genau weitergereicht
//! - Dekodierung ist tolerant: kaputtes JSON wird zum leeren Objekt,
//!   unbekannte Typen landen in `Eingang::Unbekannt`

use duett_core::Identitaet;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

/// Platzhalter fuer einen fehlenden oder nicht-textuellen `type`
pub const TYP_UNDEFINIERT: &str = "undefined";

/// Ablehnungsgruende, die der Relay selbst in `decline.message` setzt
pub const GRUND_OFFLINE: &str = "offline";
pub const GRUND_BESCHAEFTIGT: &str = "busy";
pub const GRUND_ZEITUEBERSCHRITTEN: &str = "timeout";
pub const GRUND_GETRENNT: &str = "disconnected";

// ---------------------------------------------------------------------------
// Freigabe-Art
// ---------------------------------------------------------------------------

/// Was der Client freigibt: Kamera/Mikrofon oder Bildschirm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Freigabe {
    #[serde(rename = "m")]
    Medien,
    #[serde(rename = "s")]
    Bildschirm,
}

impl Freigabe {
    fn aus_kuerzel(kuerzel: &str) -> Option<Self> {
        match kuerzel {
            "m" => Some(Self::Medien),
            "s" => Some(Self::Bildschirm),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> Relay
// ---------------------------------------------------------------------------

/// Nachrichten die der Relay vom Client annimmt
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientNachricht {
    /// Unter einem Namen anmelden
    Login {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        share: Option<Freigabe>,
    },
    /// Anruf-Angebot an `name`
    Offer {
        name: Identitaet,
        offer: Box<RawValue>,
    },
    /// Antwort auf ein Angebot von `name`
    Answer {
        name: Identitaet,
        answer: Box<RawValue>,
    },
    /// Angebot von `name` ablehnen
    Decline { name: Identitaet },
    /// Netzwerkpfad-Kandidat fuer `name`
    Candidate {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<Identitaet>,
        candidate: Box<RawValue>,
    },
    /// Gespraech verlassen (Ziel explizit oder aus der Sitzung abgeleitet)
    Leave {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<Identitaet>,
    },
    /// Auflegen, semantisch wie `Leave`
    Hangup {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<Identitaet>,
    },
}

impl ClientNachricht {
    /// Diskriminator wie auf dem Draht
    pub fn typ(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Decline { .. } => "decline",
            Self::Candidate { .. } => "candidate",
            Self::Leave { .. } => "leave",
            Self::Hangup { .. } => "hangup",
        }
    }

    /// Dekodiert einen Text-Frame tolerant
    ///
    /// Nie ein Fehler: alles, was sich nicht als bekannte Nachricht lesen
    /// laesst, wird zu `Eingang::Unbekannt` mit dem gefundenen Typ.
    pub fn aus_text(text: &str) -> Eingang<Self> {
        let roh = RohNachricht::parsen(text);
        let typ = roh.typ();

        let nachricht = match typ.as_str() {
            "login" => roh.name_text().map(|name| Self::Login {
                name,
                share: roh.freigabe(),
            }),
            "offer" => match (roh.ziel(), roh.offer) {
                (Some(name), Some(offer)) => Some(Self::Offer { name, offer }),
                _ => None,
            },
            "answer" => match (roh.ziel(), roh.answer) {
                (Some(name), Some(answer)) => Some(Self::Answer { name, answer }),
                _ => None,
            },
            "decline" => roh.ziel().map(|name| Self::Decline { name }),
            "candidate" => {
                let name = roh.ziel();
                roh.candidate.map(|candidate| Self::Candidate { name, candidate })
            }
            "leave" => Some(Self::Leave { name: roh.ziel() }),
            "hangup" => Some(Self::Hangup { name: roh.ziel() }),
            _ => None,
        };

        match nachricht {
            Some(n) => Eingang::Nachricht(n),
            None => Eingang::Unbekannt { typ },
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Relay -> Client
// ---------------------------------------------------------------------------

/// Nachrichten die der Relay an Clients sendet
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerNachricht {
    /// Ergebnis eines Logins
    Login {
        success: bool,
        #[serde(rename = "allUsers", skip_serializing_if = "Option::is_none")]
        all_users: Option<Vec<Identitaet>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        share: Option<Freigabe>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Weitergeleitetes Angebot, `name` ist der Anrufer
    Offer { offer: Box<RawValue>, name: Identitaet },
    /// Weitergeleitete Antwort
    Answer { answer: Box<RawValue> },
    /// Ablehnung (vom Peer oder vom Relay selbst, dann mit `message`)
    Decline {
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<Identitaet>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Weitergeleiteter Kandidat
    Candidate { candidate: Box<RawValue> },
    /// Peer hat das Gespraech verlassen
    Leave {},
    /// Peer hat aufgelegt
    Hangup {},
    /// Aktuelle Liste der angemeldeten Benutzer
    Users { users: Vec<Identitaet> },
    /// Fehlermeldung an den Absender
    Error { message: String },
}

impl ServerNachricht {
    /// Erstellt eine Fehlernachricht
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Erstellt eine Ablehnung im Namen des Relays
    pub fn decline_mit_grund(name: Identitaet, grund: impl Into<String>) -> Self {
        Self::Decline {
            name: Some(name),
            message: Some(grund.into()),
        }
    }

    /// Erstellt eine fehlgeschlagene Login-Antwort
    pub fn login_abgelehnt(message: Option<String>) -> Self {
        Self::Login {
            success: false,
            all_users: None,
            share: None,
            message,
        }
    }

    /// Diskriminator wie auf dem Draht
    pub fn typ(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Decline { .. } => "decline",
            Self::Candidate { .. } => "candidate",
            Self::Leave {} => "leave",
            Self::Hangup {} => "hangup",
            Self::Users { .. } => "users",
            Self::Error { .. } => "error",
        }
    }

    /// Dekodiert einen Text-Frame vom Relay tolerant
    pub fn aus_text(text: &str) -> Eingang<Self> {
        let roh = RohNachricht::parsen(text);
        let typ = roh.typ();

        let nachricht = match typ.as_str() {
            "login" => roh.success.map(|success| Self::Login {
                success,
                all_users: roh.identitaeten(roh.all_users.as_ref()),
                share: roh.freigabe(),
                message: roh.text(roh.message.as_ref()),
            }),
            "offer" => match (roh.ziel(), roh.offer) {
                (Some(name), Some(offer)) => Some(Self::Offer { offer, name }),
                _ => None,
            },
            "answer" => roh.answer.map(|answer| Self::Answer { answer }),
            "decline" => Some(Self::Decline {
                name: roh.ziel(),
                message: roh.text(roh.message.as_ref()),
            }),
            "candidate" => roh.candidate.map(|candidate| Self::Candidate { candidate }),
            "leave" => Some(Self::Leave {}),
            "hangup" => Some(Self::Hangup {}),
            "users" => roh
                .identitaeten(roh.users.as_ref())
                .map(|users| Self::Users { users }),
            "error" => Some(Self::Error {
                message: roh.text(roh.message.as_ref()).unwrap_or_default(),
            }),
            _ => None,
        };

        match nachricht {
            Some(n) => Eingang::Nachricht(n),
            None => Eingang::Unbekannt { typ },
        }
    }

    /// Serialisiert die Nachricht als JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Dekodier-Ergebnis
// ---------------------------------------------------------------------------

/// Ergebnis einer toleranten Dekodierung
#[derive(Debug, Clone)]
pub enum Eingang<T> {
    /// Bekannte, vollstaendige Nachricht
    Nachricht(T),
    /// Unbekannter Typ oder unvollstaendige Nachricht
    Unbekannt { typ: String },
}

/// Superset aller Felder, die auf dem Draht vorkommen
///
/// Ein normales Struct statt eines getaggten Enums, weil `RawValue`
/// nicht durch serdes Content-Puffer getaggter Enums hindurchkommt.
#[derive(Debug, Default, Deserialize)]
struct RohNachricht {
    #[serde(rename = "type", default)]
    typ: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<serde_json::Value>,
    #[serde(default)]
    share: Option<serde_json::Value>,
    #[serde(default)]
    offer: Option<Box<RawValue>>,
    #[serde(default)]
    answer: Option<Box<RawValue>>,
    #[serde(default)]
    candidate: Option<Box<RawValue>>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(rename = "allUsers", default)]
    all_users: Option<serde_json::Value>,
    #[serde(default)]
    users: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<serde_json::Value>,
}

impl RohNachricht {
    /// Nicht-Objekte und kaputtes JSON werden zum leeren Objekt
    fn parsen(text: &str) -> Self {
        serde_json::from_str(text).unwrap_or_else(|e| {
            tracing::debug!(fehler = %e, "Ungueltiges JSON, verwende leeres Objekt");
            Self::default()
        })
    }

    fn typ(&self) -> String {
        match &self.typ {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => TYP_UNDEFINIERT.to_string(),
        }
    }

    fn text(&self, wert: Option<&serde_json::Value>) -> Option<String> {
        match wert {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    fn name_text(&self) -> Option<String> {
        self.text(self.name.as_ref())
    }

    fn ziel(&self) -> Option<Identitaet> {
        self.name_text().and_then(|n| Identitaet::neu(n).ok())
    }

    fn freigabe(&self) -> Option<Freigabe> {
        self.text(self.share.as_ref())
            .and_then(|s| Freigabe::aus_kuerzel(&s))
    }

    fn identitaeten(&self, wert: Option<&serde_json::Value>) -> Option<Vec<Identitaet>> {
        match wert {
            Some(serde_json::Value::Array(eintraege)) => Some(
                eintraege
                    .iter()
                    .filter_map(|e| e.as_str())
                    .filter_map(|n| Identitaet::neu(n).ok())
                    .collect(),
            ),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
