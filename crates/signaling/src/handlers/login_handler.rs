//! Login-Handler – Namen binden, Benutzerliste verteilen
//!
//! Ein Name ist eindeutig unter den aktuell angemeldeten Benutzern. Ein
//! fehlgeschlagener Login aendert keinen Zustand.

use duett_core::Identitaet;
use duett_protocol::{Freigabe, ServerNachricht};

use crate::dispatcher::DispatcherContext;
use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// Verarbeitet eine Login-Anfrage
///
/// Bei Erfolg wird die Identitaet im Verbindungskontext gespeichert und
/// allen anderen die neue Benutzerliste geschickt.
pub fn handle_login(
    name: String,
    share: Option<Freigabe>,
    ctx: &mut DispatcherContext,
    state: &SignalingState,
) -> ServerNachricht {
    if let Some(ref bisher) = ctx.identitaet {
        tracing::debug!(name = %bisher, "Zweiter Login auf derselben Verbindung abgelehnt");
        return ServerNachricht::login_abgelehnt(Some(
            SignalingError::BereitsAngemeldet(bisher.clone()).to_string(),
        ));
    }

    let identitaet = match Identitaet::neu(name) {
        Ok(id) => id,
        Err(e) => {
            state.metriken.rejected_logins_total.inc();
            tracing::debug!(peer = %ctx.peer_addr, fehler = %e, "Login mit ungueltigem Namen");
            return ServerNachricht::login_abgelehnt(Some(e.to_string()));
        }
    };

    if let Err(e) = state
        .registry
        .registrieren(identitaet.clone(), ctx.sender.clone())
    {
        state.metriken.rejected_logins_total.inc();
        tracing::warn!(name = %identitaet, peer = %ctx.peer_addr, "Login abgelehnt: Name vergeben");
        return ServerNachricht::login_abgelehnt(Some(e.to_string()));
    }

    ctx.identitaet = Some(identitaet.clone());
    state.gauges_aktualisieren();

    let alle = state.registry.liste();
    if state.config.benutzerliste_senden {
        state
            .registry
            .an_alle_ausser_senden(&identitaet, ServerNachricht::Users { users: alle.clone() });
    }

    ServerNachricht::Login {
        success: true,
        all_users: Some(alle),
        share,
        message: None,
    }
}
