//! Gemeinsame Identifikationstypen fuer Duett
//!
//! Identitaeten sind frei gewaehlte Anzeigenamen. Das Newtype-Pattern
//! verhindert Verwechslungen mit beliebigen Strings (Payloads, Typen).

use serde::{Deserialize, Serialize};

use crate::error::DuettError;

/// Maximale Laenge eines Anzeigenamens in Bytes
pub const MAX_NAME_LAENGE: usize = 64;

/// Eindeutiger Anzeigename eines angemeldeten Benutzers
///
/// Eindeutig nur unter den aktuell registrierten Benutzern; die Identitaet
/// lebt vom erfolgreichen Login bis zum Verbindungsende.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identitaet(String);

impl Identitaet {
    /// Erstellt eine Identitaet aus einem Namen
    ///
    /// Leere Namen und Namen ueber `MAX_NAME_LAENGE` werden abgelehnt.
    pub fn neu(name: impl Into<String>) -> Result<Self, DuettError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DuettError::UngueltigeIdentitaet("Name ist leer".into()));
        }
        if name.len() > MAX_NAME_LAENGE {
            return Err(DuettError::UngueltigeIdentitaet(format!(
                "Name laenger als {MAX_NAME_LAENGE} Bytes"
            )));
        }
        Ok(Self(name))
    }

    /// Gibt den Namen als &str zurueck
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identitaet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identitaet {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Paarung zweier Identitaeten in einem Gespraech
///
/// Ungeordnet: `Sitzung::neu(a, b) == Sitzung::neu(b, a)`.
#[derive(Debug, Clone, Eq)]
pub struct Sitzung {
    pub partei_a: Identitaet,
    pub partei_b: Identitaet,
}

impl Sitzung {
    /// Erstellt eine neue Paarung
    pub fn neu(partei_a: Identitaet, partei_b: Identitaet) -> Self {
        Self { partei_a, partei_b }
    }

    /// Prueft ob die Identitaet an dieser Sitzung beteiligt ist
    pub fn enthaelt(&self, identitaet: &Identitaet) -> bool {
        &self.partei_a == identitaet || &self.partei_b == identitaet
    }

    /// Gibt die jeweils andere Partei zurueck
    pub fn peer_von(&self, identitaet: &Identitaet) -> Option<&Identitaet> {
        if &self.partei_a == identitaet {
            Some(&self.partei_b)
        } else if &self.partei_b == identitaet {
            Some(&self.partei_a)
        } else {
            None
        }
    }
}

impl PartialEq for Sitzung {
    fn eq(&self, other: &Self) -> bool {
        (self.partei_a == other.partei_a && self.partei_b == other.partei_b)
            || (self.partei_a == other.partei_b && self.partei_b == other.partei_a)
    }
}
