//! End-to-End-Tests fuer den Relay ueber echte WebSocket-Verbindungen

use duett_observability::DuettMetriken;
use duett_signaling::{SignalingConfig, SignalingServer, SignalingState};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WARTEZEIT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Hilfsfunktionen
// ---------------------------------------------------------------------------

struct TestServer {
    addr: SocketAddr,
    state: Arc<SignalingState>,
    _shutdown: watch::Sender<bool>,
}

async fn server_starten(config: SignalingConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = SignalingState::neu(config, DuettMetriken::neu().unwrap());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = SignalingServer::neu(Arc::clone(&state), addr);
    tokio::spawn(async move {
        server.mit_listener_starten(listener, shutdown_rx).await.unwrap();
    });

    TestServer {
        addr,
        state,
        _shutdown: shutdown_tx,
    }
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn verbinden(addr: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
        Self { ws }
    }

    async fn angemeldet(addr: SocketAddr, name: &str) -> Self {
        let mut c = Self::verbinden(addr).await;
        c.senden(json!({"type": "login", "name": name}).to_string()).await;
        let antwort = c.empfangen().await;
        assert_eq!(antwort["type"], "login");
        assert_eq!(antwort["success"], true, "Login von {name} fehlgeschlagen");
        c
    }

    async fn senden(&mut self, text: impl Into<String>) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    async fn empfangen_text(&mut self) -> String {
        let ergebnis = tokio::time::timeout(WARTEZEIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(t))) => return t,
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    andere => panic!("Unerwarteter Frame: {andere:?}"),
                }
            }
        })
        .await;
        ergebnis.expect("Keine Nachricht innerhalb der Wartezeit")
    }

    async fn empfangen(&mut self) -> Value {
        serde_json::from_str(&self.empfangen_text().await).unwrap()
    }

    /// Liest bis zur naechsten Nachricht des Typs, andere werden verworfen
    async fn empfangen_typ(&mut self, typ: &str) -> Value {
        loop {
            let n = self.empfangen().await;
            if n["type"] == typ {
                return n;
            }
        }
    }

    async fn nichts_empfangen(&mut self) {
        let ergebnis = tokio::time::timeout(Duration::from_millis(300), async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(t))) => return Some(t),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    _ => return None,
                }
            }
        })
        .await;
        if let Ok(Some(t)) = ergebnis {
            panic!("Unerwartete Nachricht: {t}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn login_listen_fuer_alice_und_bob() {
    let server = server_starten(SignalingConfig::default()).await;

    let mut alice = TestClient::verbinden(server.addr).await;
    alice.senden(r#"{"type":"login","name":"alice"}"#).await;
    let antwort = alice.empfangen().await;
    assert_eq!(antwort, json!({"type": "login", "success": true, "allUsers": ["alice"]}));

    let mut bob = TestClient::verbinden(server.addr).await;
    bob.senden(r#"{"type":"login","name":"bob","share":"s"}"#).await;
    let antwort = bob.empfangen().await;
    assert_eq!(
        antwort,
        json!({"type": "login", "success": true, "allUsers": ["alice", "bob"], "share": "s"})
    );

    let liste = alice.empfangen().await;
    assert_eq!(liste, json!({"type": "users", "users": ["alice", "bob"]}));
}

#[tokio::test]
async fn hoechstens_ein_login_pro_name() {
    let server = server_starten(SignalingConfig::default()).await;
    let _alice = TestClient::angemeldet(server.addr, "alice").await;

    let mut zweite = TestClient::verbinden(server.addr).await;
    zweite.senden(r#"{"type":"login","name":"alice"}"#).await;
    let antwort = zweite.empfangen().await;
    assert_eq!(antwort["type"], "login");
    assert_eq!(antwort["success"], false);
    assert!(antwort.get("allUsers").is_none());
    assert_eq!(server.state.registry.online_anzahl(), 1);
}

#[tokio::test]
async fn angebot_an_unbekanntes_ziel() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut alice = TestClient::angemeldet(server.addr, "alice").await;

    alice
        .senden(r#"{"type":"offer","name":"zed","offer":{"type":"offer","sdp":"v=0"}}"#)
        .await;
    let antwort = alice.empfangen().await;
    assert_eq!(antwort, json!({"type": "decline", "name": "zed", "message": "offline"}));
}

#[tokio::test]
async fn payload_wird_bytegenau_nur_an_ziel_weitergereicht() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut alice = TestClient::angemeldet(server.addr, "alice").await;
    let mut bob = TestClient::angemeldet(server.addr, "bob").await;
    let mut carol = TestClient::angemeldet(server.addr, "carol").await;

    // Listen-Updates abraeumen
    alice.empfangen_typ("users").await;
    alice.empfangen_typ("users").await;
    bob.empfangen_typ("users").await;

    let payload = r#"{ "sdp":"v=0\r\na=x", "type" : "offer", "n": 1.50, "z":[ ] }"#;
    alice
        .senden(format!(r#"{{"type":"offer","name":"bob","offer":{payload}}}"#))
        .await;

    let text = bob.empfangen_text().await;
    assert_eq!(text, format!(r#"{{"type":"offer","offer":{payload},"name":"alice"}}"#));
    carol.nichts_empfangen().await;

    bob.senden(format!(r#"{{"type":"candidate","name":"alice","candidate":{payload}}}"#))
        .await;
    let text = alice.empfangen_text().await;
    assert_eq!(text, format!(r#"{{"type":"candidate","candidate":{payload}}}"#));
    carol.nichts_empfangen().await;
}

#[tokio::test]
async fn trennung_sendet_leave_an_peer() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut alice = TestClient::angemeldet(server.addr, "alice").await;
    let mut bob = TestClient::angemeldet(server.addr, "bob").await;
    alice.empfangen_typ("users").await;

    alice.senden(r#"{"type":"offer","name":"bob","offer":{"sdp":"o"}}"#).await;
    assert_eq!(bob.empfangen().await["type"], "offer");
    bob.senden(r#"{"type":"answer","name":"alice","answer":{"sdp":"a"}}"#).await;
    assert_eq!(alice.empfangen().await, json!({"type": "answer", "answer": {"sdp": "a"}}));

    bob.ws.close(None).await.unwrap();

    assert_eq!(alice.empfangen().await, json!({"type": "leave"}));
    assert_eq!(alice.empfangen().await, json!({"type": "users", "users": ["alice"]}));
    assert_eq!(server.state.sitzungen.sitzungen_anzahl(), 0);
}

#[tokio::test]
async fn antwort_ohne_angebot_wird_abgewiesen() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut alice = TestClient::angemeldet(server.addr, "alice").await;
    let mut bob = TestClient::angemeldet(server.addr, "bob").await;
    let mut carol = TestClient::angemeldet(server.addr, "carol").await;
    alice.empfangen_typ("users").await;
    alice.empfangen_typ("users").await;
    bob.empfangen_typ("users").await;

    alice.senden(r#"{"type":"offer","name":"bob","offer":{"sdp":"o"}}"#).await;
    bob.empfangen_typ("offer").await;
    bob.senden(r#"{"type":"answer","name":"alice","answer":{"sdp":"a"}}"#).await;
    assert_eq!(alice.empfangen().await["type"], "answer");

    carol.senden(r#"{"type":"answer","name":"alice","answer":{"sdp":"x"}}"#).await;
    let antwort = carol.empfangen().await;
    assert_eq!(antwort["type"], "error");
    alice.nichts_empfangen().await;
    assert_eq!(
        server.state.sitzungen.peer_von(&duett_core::Identitaet::neu("alice").unwrap()),
        Some(duett_core::Identitaet::neu("bob").unwrap())
    );

    bob.ws.close(None).await.unwrap();
    assert_eq!(alice.empfangen().await, json!({"type": "leave"}));
}

#[tokio::test]
async fn zweites_angebot_an_beschaeftigtes_ziel() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut alice = TestClient::angemeldet(server.addr, "alice").await;
    let mut bob = TestClient::angemeldet(server.addr, "bob").await;
    let mut carol = TestClient::angemeldet(server.addr, "carol").await;

    alice.senden(r#"{"type":"offer","name":"bob","offer":{}}"#).await;
    bob.empfangen_typ("offer").await;

    carol.senden(r#"{"type":"offer","name":"bob","offer":{}}"#).await;
    let antwort = carol.empfangen().await;
    assert_eq!(antwort, json!({"type": "decline", "name": "bob", "message": "busy"}));
    bob.nichts_empfangen().await;
}

#[tokio::test]
async fn unbeantwortetes_angebot_laeuft_ab() {
    let config = SignalingConfig {
        angebot_timeout_sek: 1,
        ..Default::default()
    };
    let server = server_starten(config).await;
    let mut alice = TestClient::angemeldet(server.addr, "alice").await;
    let mut bob = TestClient::angemeldet(server.addr, "bob").await;
    alice.empfangen_typ("users").await;

    alice.senden(r#"{"type":"offer","name":"bob","offer":{}}"#).await;
    bob.empfangen_typ("offer").await;

    let antwort = alice.empfangen().await;
    assert_eq!(antwort, json!({"type": "decline", "name": "bob", "message": "timeout"}));
    assert_eq!(bob.empfangen().await, json!({"type": "leave"}));
}

#[tokio::test]
async fn unbekannter_typ_und_kaputtes_json() {
    let server = server_starten(SignalingConfig::default()).await;
    let mut c = TestClient::verbinden(server.addr).await;

    c.senden("das ist kein json").await;
    let antwort = c.empfangen().await;
    assert_eq!(antwort["type"], "error");
    assert!(antwort["message"].as_str().unwrap().contains("undefined"));

    c.senden(r#"{"type":"tanzen"}"#).await;
    let antwort = c.empfangen().await;
    assert!(antwort["message"].as_str().unwrap().contains("tanzen"));
}

#[tokio::test]
async fn volle_server_lehnen_upgrade_ab() {
    let config = SignalingConfig {
        max_clients: 1,
        ..Default::default()
    };
    let server = server_starten(config).await;
    let _erster = TestClient::verbinden(server.addr).await;

    let ergebnis = connect_async(format!("ws://{}/ws", server.addr)).await;
    match ergebnis {
        Err(tokio_tungstenite::tungstenite::Error::Http(antwort)) => {
            assert_eq!(antwort.status(), 503);
        }
        andere => panic!("Erwartet HTTP 503, erhalten: {:?}", andere.map(|_| ())),
    }
}
