//! duett-client – Verhandlung auf Client-Seite
//!
//! Die Zustandsmaschine in [`negotiation`] entscheidet, was passiert; der
//! [`driver`] fuehrt es aus. Medien und Verhandlungsobjekt werden ueber die
//! Traits in [`collaborator`] angebunden, der Relay ueber [`transport`].

pub mod collaborator;
pub mod config;
pub mod driver;
pub mod error;
pub mod negotiation;
pub mod transport;

// Re-Exporte
pub use collaborator::{LokaleEreignisse, MedienQuelle, PeerVerbindung, VerbindungsFabrik};
pub use config::ClientKonfig;
pub use driver::{Client, ClientHandle};
pub use error::{ClientError, ClientResult};
pub use negotiation::{
    Aktion, Anbieten, Antworten, Beschreibung, Ereignis, Hinweis, Kandidat, Phase,
    VerbindungsZustand, Verhandlung,
};
pub use transport::{verbinden, Transport};

pub use duett_protocol::Freigabe;
