//! Relay-Handler – Offer, Answer, Decline, Candidate
//!
//! Der Relay liest nur Typ und Ziel. Die Payloads werden unveraendert an
//! genau die benannte Ziel-Identitaet weitergereicht.

use duett_core::Identitaet;
use duett_protocol::{ServerNachricht, GRUND_BESCHAEFTIGT, GRUND_OFFLINE};
use serde_json::value::RawValue;
use tokio::time::Instant;

use crate::error::SignalingError;
use crate::server_state::SignalingState;

/// Leitet ein Angebot an den Angerufenen weiter
///
/// Lehnt im Namen des Relays ab, wenn das Ziel nicht angemeldet oder mit
/// einer anderen Partei beschaeftigt ist. Ein erneutes Angebot zwischen
/// denselben Parteien ist erlaubt.
pub fn handle_offer(
    absender: &Identitaet,
    ziel: Identitaet,
    offer: Box<RawValue>,
    state: &SignalingState,
) -> Option<ServerNachricht> {
    if &ziel == absender {
        return Some(ServerNachricht::error(
            SignalingError::AnrufAnSichSelbst.to_string(),
        ));
    }

    if !state.registry.ist_angemeldet(&ziel) {
        tracing::debug!(von = %absender, an = %ziel, "Angebot an unbekanntes Ziel");
        return Some(ServerNachricht::decline_mit_grund(ziel, GRUND_OFFLINE));
    }

    if state.sitzungen.beschaeftigt_mit_anderem(absender, &ziel) {
        return Some(ServerNachricht::error(
            SignalingError::Beschaeftigt(absender.clone()).to_string(),
        ));
    }

    if state.sitzungen.beschaeftigt_mit_anderem(&ziel, absender) {
        tracing::debug!(von = %absender, an = %ziel, "Angebot abgelehnt: Ziel beschaeftigt");
        return Some(ServerNachricht::decline_mit_grund(ziel, GRUND_BESCHAEFTIGT));
    }

    let frist = Instant::now() + state.config.angebot_timeout();
    state
        .sitzungen
        .angebot_vormerken(absender.clone(), ziel.clone(), frist);

    let weitergeleitet = state.registry.an_user_senden(
        &ziel,
        ServerNachricht::Offer {
            offer,
            name: absender.clone(),
        },
    );

    if !weitergeleitet {
        state.sitzungen.angebot_entfernen(absender, &ziel);
        return Some(ServerNachricht::decline_mit_grund(ziel, GRUND_OFFLINE));
    }

    state.metriken.weitergeleitet("offer");
    tracing::debug!(von = %absender, an = %ziel, "Angebot weitergeleitet");
    None
}

/// Leitet eine Antwort an den Anrufer weiter und stellt die Sitzung her
///
/// Nur eine Antwort auf ein offenes Angebot des Ziels oder innerhalb einer
/// bestehenden Sitzung wird angenommen. Jede andere bekommt `error` und
/// wird nicht weitergeleitet.
pub fn handle_answer(
    absender: &Identitaet,
    ziel: Identitaet,
    answer: Box<RawValue>,
    state: &SignalingState,
) -> Option<ServerNachricht> {
    if !state.registry.ist_angemeldet(&ziel) {
        return Some(ServerNachricht::error(
            SignalingError::NichtGefunden(ziel).to_string(),
        ));
    }

    let Some(sitzung) = state.sitzungen.antwort_annehmen(absender, &ziel) else {
        tracing::warn!(von = %absender, an = %ziel, "Antwort ohne offenes Angebot verworfen");
        return Some(ServerNachricht::error(
            SignalingError::KeinAngebot(ziel).to_string(),
        ));
    };
    state.gauges_aktualisieren();
    tracing::info!(a = %sitzung.partei_a, b = %sitzung.partei_b, "Sitzung hergestellt");

    if state
        .registry
        .an_user_senden(&ziel, ServerNachricht::Answer { answer })
    {
        state.metriken.weitergeleitet("answer");
    }
    None
}

/// Leitet eine Ablehnung an den Anrufer weiter
pub fn handle_decline(absender: &Identitaet, ziel: Identitaet, state: &SignalingState) {
    state.sitzungen.angebot_entfernen(absender, &ziel);

    let ablehnung = ServerNachricht::Decline {
        name: Some(absender.clone()),
        message: None,
    };
    if state.registry.an_user_senden(&ziel, ablehnung) {
        state.metriken.weitergeleitet("decline");
        tracing::debug!(von = %absender, an = %ziel, "Ablehnung weitergeleitet");
    }
}

/// Leitet einen Kandidaten weiter
///
/// Ohne explizites Ziel geht der Kandidat an den Sitzungs-Peer. Ohne
/// erreichbares Ziel wird er verworfen.
pub fn handle_candidate(
    absender: &Identitaet,
    ziel: Option<Identitaet>,
    candidate: Box<RawValue>,
    state: &SignalingState,
) {
    let ziel = match ziel.or_else(|| state.sitzungen.peer_von(absender)) {
        Some(z) => z,
        None => {
            tracing::debug!(von = %absender, "Kandidat ohne Ziel verworfen");
            return;
        }
    };

    if state
        .registry
        .an_user_senden(&ziel, ServerNachricht::Candidate { candidate })
    {
        state.metriken.weitergeleitet("candidate");
    } else {
        tracing::debug!(von = %absender, an = %ziel, "Kandidat fuer unbekanntes Ziel verworfen");
    }
}
