//! Message-Dispatcher – Routet Signaling-Nachrichten an die Handler
//!
//! Der Dispatcher empfaengt dekodierte Nachrichten von einer
//! ClientConnection, bestimmt den Handler und gibt die Antwort an den
//! Absender zurueck. Nachrichten an andere gehen ueber deren Send-Queues.
//!
//! ## Zustandspruefung
//! - `login` ist immer erlaubt (zweiter Login wird abgelehnt)
//! - Alle anderen nur nach erfolgreichem Login

use duett_core::Identitaet;
use duett_protocol::{ClientNachricht, Eingang, ServerNachricht};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::SignalingError;
use crate::handlers::{leave_handler, login_handler, relay_handler};
use crate::registry::ClientSender;
use crate::server_state::SignalingState;

/// Dispatcher-Kontext – Informationen ueber die aktuelle Verbindung
pub struct DispatcherContext {
    /// Eindeutige ID der Verbindung (fuer Logs)
    pub verbindung_id: Uuid,
    /// Peer-Adresse
    pub peer_addr: SocketAddr,
    /// Angemeldete Identitaet (None vor dem Login)
    pub identitaet: Option<Identitaet>,
    /// Send-Queue dieser Verbindung, wird beim Login an den Namen gebunden
    pub sender: ClientSender,
}

impl DispatcherContext {
    /// Erstellt einen Kontext fuer eine frische Verbindung
    pub fn neu(peer_addr: SocketAddr, sender: ClientSender) -> Self {
        Self {
            verbindung_id: sender.verbindung_id,
            peer_addr,
            identitaet: None,
            sender,
        }
    }
}

/// Zentraler Message-Dispatcher
pub struct MessageDispatcher {
    state: Arc<SignalingState>,
}

impl MessageDispatcher {
    /// Erstellt einen neuen Dispatcher
    pub fn neu(state: Arc<SignalingState>) -> Self {
        Self { state }
    }

    /// Verarbeitet eine eingehende Nachricht und gibt die Antwort zurueck
    ///
    /// Gibt `None` zurueck wenn der Absender keine Antwort bekommt.
    pub fn dispatch(
        &self,
        eingang: Eingang<ClientNachricht>,
        ctx: &mut DispatcherContext,
    ) -> Option<ServerNachricht> {
        let nachricht = match eingang {
            Eingang::Nachricht(n) => n,
            Eingang::Unbekannt { typ } => {
                tracing::debug!(verbindung = %ctx.verbindung_id, typ = %typ, "Unbekannter Befehl");
                return Some(ServerNachricht::error(
                    SignalingError::UnbekannterBefehl(typ).to_string(),
                ));
            }
        };

        tracing::trace!(verbindung = %ctx.verbindung_id, typ = nachricht.typ(), "Nachricht empfangen");

        match nachricht {
            ClientNachricht::Login { name, share } => Some(login_handler::handle_login(
                name,
                share,
                ctx,
                &self.state,
            )),
            andere => match ctx.identitaet.clone() {
                Some(absender) => self.dispatch_angemeldet(andere, &absender),
                None => Some(ServerNachricht::error(
                    SignalingError::NichtAngemeldet.to_string(),
                )),
            },
        }
    }

    /// Routet Nachrichten die einen Login erfordern
    fn dispatch_angemeldet(
        &self,
        nachricht: ClientNachricht,
        absender: &Identitaet,
    ) -> Option<ServerNachricht> {
        match nachricht {
            ClientNachricht::Offer { name, offer } => {
                relay_handler::handle_offer(absender, name, offer, &self.state)
            }
            ClientNachricht::Answer { name, answer } => {
                relay_handler::handle_answer(absender, name, answer, &self.state)
            }
            ClientNachricht::Decline { name } => {
                relay_handler::handle_decline(absender, name, &self.state);
                None
            }
            ClientNachricht::Candidate { name, candidate } => {
                relay_handler::handle_candidate(absender, name, candidate, &self.state);
                None
            }
            ClientNachricht::Leave { name } => {
                leave_handler::handle_leave(absender, name, false, &self.state);
                None
            }
            ClientNachricht::Hangup { name } => {
                leave_handler::handle_leave(absender, name, true, &self.state);
                None
            }
            // Oben bereits behandelt
            ClientNachricht::Login { .. } => None,
        }
    }

    /// Bereinigt alle Ressourcen eines Clients beim Trennen
    pub fn client_cleanup(&self, ctx: &DispatcherContext) {
        if let Some(ref identitaet) = ctx.identitaet {
            leave_handler::verbindung_beendet(identitaet, &self.state);
            tracing::debug!(name = %identitaet, verbindung = %ctx.verbindung_id, "Client-Ressourcen bereinigt");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
