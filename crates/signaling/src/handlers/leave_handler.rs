//! Leave-Handler – Gespraech beenden, Verbindungsende, abgelaufene Angebote
//!
//! Alle Wege, auf denen eine Sitzung oder ein offenes Angebot endet, laufen
//! hier zusammen, damit die Gegenseite immer genau eine Nachricht bekommt.

use duett_core::Identitaet;
use duett_protocol::{ServerNachricht, GRUND_GETRENNT, GRUND_ZEITUEBERSCHRITTEN};
use tokio::time::Instant;

use crate::server_state::SignalingState;
use crate::session::OffenesAngebot;

/// Verarbeitet `leave` und `hangup`
///
/// Die Sitzung und offene Angebote des Absenders werden beendet, deren
/// Gegenseiten bekommen denselben Nachrichtentyp. Ein explizit genannter
/// Name ist nur gueltig, wenn er zu einer dieser Gegenseiten gehoert.
pub fn handle_leave(
    absender: &Identitaet,
    ziel: Option<Identitaet>,
    auflegen: bool,
    state: &SignalingState,
) {
    let sitzungs_peer = state
        .sitzungen
        .beenden(absender)
        .and_then(|s| s.peer_von(absender).cloned());
    let angebote = state.sitzungen.angebote_entfernen(absender);

    let mut empfaenger: Vec<Identitaet> = Vec::with_capacity(2);
    if let Some(peer) = sitzungs_peer {
        empfaenger.push(peer);
    }
    for angebot in &angebote {
        let gegenseite = angebot.gegenseite(absender);
        if !empfaenger.contains(gegenseite) {
            empfaenger.push(gegenseite.clone());
        }
    }

    if let Some(z) = ziel.filter(|z| !empfaenger.contains(z)) {
        // Auch nach Ablauf eines Angebots durch den Relay normal
        tracing::debug!(von = %absender, an = %z, "Leave an unbeteiligte Identitaet verworfen");
    }

    let typ = if auflegen { "hangup" } else { "leave" };
    for peer in &empfaenger {
        let nachricht = if auflegen {
            ServerNachricht::Hangup {}
        } else {
            ServerNachricht::Leave {}
        };
        if state.registry.an_user_senden(peer, nachricht) {
            state.metriken.weitergeleitet(typ);
        }
    }

    state.gauges_aktualisieren();
    tracing::debug!(von = %absender, typ, empfaenger = empfaenger.len(), "Gespraech verlassen");
}

/// Raeumt alle Zustaende einer getrennten Identitaet ab
///
/// Der Sitzungs-Peer bekommt `leave`, offene Angebote werden aufgeloest und
/// alle anderen bekommen die neue Benutzerliste.
pub fn verbindung_beendet(identitaet: &Identitaet, state: &SignalingState) {
    state.registry.entfernen(identitaet);

    if let Some(sitzung) = state.sitzungen.beenden(identitaet) {
        if let Some(peer) = sitzung.peer_von(identitaet) {
            tracing::info!(name = %identitaet, peer = %peer, "Peer getrennt, sende leave");
            state.registry.an_user_senden(peer, ServerNachricht::Leave {});
        }
    }

    let angebote = state.sitzungen.angebote_entfernen(identitaet);
    angebote_aufloesen(identitaet, &angebote, GRUND_GETRENNT, state);

    if state.config.benutzerliste_senden {
        state.registry.an_alle_ausser_senden(
            identitaet,
            ServerNachricht::Users {
                users: state.registry.liste(),
            },
        );
    }

    state.gauges_aktualisieren();
}

/// Beendet alle Angebote, deren Frist verstrichen ist
///
/// Der Anrufer bekommt `decline` mit Grund `timeout`, beim Angerufenen hoert
/// es mit `leave` auf zu klingeln. Gibt die Anzahl beendeter Angebote zurueck.
pub fn abgelaufene_angebote_beenden(jetzt: Instant, state: &SignalingState) -> usize {
    let abgelaufen = state.sitzungen.abgelaufene_angebote(jetzt);
    for angebot in &abgelaufen {
        tracing::info!(
            anrufer = %angebot.anrufer,
            angerufener = %angebot.angerufener,
            "Angebot unbeantwortet abgelaufen"
        );
        state.registry.an_user_senden(
            &angebot.anrufer,
            ServerNachricht::decline_mit_grund(angebot.angerufener.clone(), GRUND_ZEITUEBERSCHRITTEN),
        );
        state
            .registry
            .an_user_senden(&angebot.angerufener, ServerNachricht::Leave {});
        state.metriken.expired_offers_total.inc();
    }
    abgelaufen.len()
}

/// Benachrichtigt die Gegenseiten von Angeboten, die `wer` nicht mehr bedienen kann
fn angebote_aufloesen(
    wer: &Identitaet,
    angebote: &[OffenesAngebot],
    grund: &str,
    state: &SignalingState,
) {
    for angebot in angebote {
        if &angebot.anrufer == wer {
            // Angerufener hoert auf zu klingeln
            state
                .registry
                .an_user_senden(&angebot.angerufener, ServerNachricht::Leave {});
        } else {
            // Anrufer wartet vergeblich
            state.registry.an_user_senden(
                &angebot.anrufer,
                ServerNachricht::decline_mit_grund(wer.clone(), grund),
            );
        }
    }
}
