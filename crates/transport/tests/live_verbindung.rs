//! Ende-zu-Ende-Tests des Live-Transports gegen einen lokalen WebSocket-Dienst

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use sternfunk_core::{EncodedChunk, LiveConfig, SessionId, TransportEvent};
use sternfunk_session::{SessionEvent, SessionEventKind, SessionTransport, TransportEvents};
use sternfunk_transport::LiveTransport;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

type DienstSocket = WebSocketStream<tokio::net::TcpStream>;

const WARTEZEIT: Duration = Duration::from_secs(5);

/// Lokaler Dienst; `ablauf` bekommt die Verbindung und einen Kanal fuer
/// alles, was der Client geschickt hat
async fn dienst_starten<F, Fut>(ablauf: F) -> (String, mpsc::UnboundedReceiver<Value>)
where
    F: FnOnce(DienstSocket, mpsc::UnboundedSender<Value>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        ablauf(ws, tx).await;
    });
    (format!("ws://{addr}/ws"), rx)
}

/// Naechster Client-Frame als JSON; Close wird als `{"close": true}` gemeldet
async fn lesen(ws: &mut DienstSocket) -> Option<Value> {
    while let Some(Ok(msg)) = ws.next().await {
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return Some(json!({"close": true})),
            _ => continue,
        }
    }
    None
}

fn config(endpoint: String, schluessel_env: &str) -> LiveConfig {
    std::env::set_var(schluessel_env, "test-schluessel");
    LiveConfig {
        endpoint,
        api_key_env: schluessel_env.into(),
        ..LiveConfig::default()
    }
}

fn oeffnen(config: &LiveConfig) -> (LiveTransport, mpsc::UnboundedReceiver<SessionEvent>, SessionId) {
    let id = SessionId::new();
    let (tx, rx) = mpsc::unbounded_channel();
    let mut transport = LiveTransport::new();
    transport
        .open(config, TransportEvents::new(id, tx))
        .expect("open sollte sofort gelingen");
    (transport, rx, id)
}

async fn ereignis(rx: &mut mpsc::UnboundedReceiver<SessionEvent>, id: SessionId) -> TransportEvent {
    let ev = tokio::time::timeout(WARTEZEIT, rx.recv())
        .await
        .expect("kein Ereignis innerhalb der Wartezeit")
        .expect("Ereignis-Kanal geschlossen");
    assert_eq!(ev.session, id);
    match ev.kind {
        SessionEventKind::Transport(t) => t,
        andere => panic!("unerwartetes Ereignis: {andere:?}"),
    }
}

async fn empfangen(rx: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(WARTEZEIT, rx.recv())
        .await
        .expect("Dienst hat nichts empfangen")
        .expect("Dienst beendet")
}

#[tokio::test]
async fn setup_audio_unterbrechung_und_lokales_schliessen() {
    let (endpoint, mut beim_dienst) = dienst_starten(|mut ws, tx| async move {
        let setup = lesen(&mut ws).await.unwrap();
        tx.send(setup).unwrap();
        ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
            .await
            .unwrap();

        let audio = lesen(&mut ws).await.unwrap();
        tx.send(audio).unwrap();
        let antwort = json!({"serverContent": {"modelTurn": {"parts": [
            {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AAABAA=="}}
        ]}}});
        ws.send(Message::Text(antwort.to_string())).await.unwrap();
        // Steuernachrichten kommen auch als Binary-Frame
        ws.send(Message::Binary(br#"{"serverContent":{"interrupted":true}}"#.to_vec()))
            .await
            .unwrap();

        while let Some(frame) = lesen(&mut ws).await {
            let ende = frame.get("close").is_some();
            tx.send(frame).unwrap();
            if ende {
                break;
            }
        }
    })
    .await;

    let config = config(endpoint, "STERNFUNK_TEST_LIVE_ABLAUF");
    let (mut transport, mut rx, id) = oeffnen(&config);

    let setup = empfangen(&mut beim_dienst).await;
    assert_eq!(setup["setup"]["model"], config.model_path());
    assert_eq!(setup["setup"]["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert_eq!(
        setup["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Zephyr"
    );
    assert_eq!(ereignis(&mut rx, id).await, TransportEvent::Open);
    assert!(transport.is_running());

    let sender = transport.sender().expect("Sender nach Open");
    sender.send(EncodedChunk::new("AAA=", 16_000, 1)).unwrap();
    let audio = empfangen(&mut beim_dienst).await;
    assert_eq!(
        audio["realtimeInput"]["mediaChunks"],
        json!([{"mimeType": "audio/pcm;rate=16000", "data": "AAA="}])
    );

    match ereignis(&mut rx, id).await {
        TransportEvent::Message(m) => {
            assert_eq!(m.audio, Some(EncodedChunk::new("AAABAA==", 24_000, 1)));
            assert!(!m.interrupted);
        }
        anderes => panic!("Audio erwartet, bekam {anderes:?}"),
    }
    match ereignis(&mut rx, id).await {
        TransportEvent::Message(m) => {
            assert!(m.audio.is_none());
            assert!(m.interrupted);
        }
        anderes => panic!("Unterbrechung erwartet, bekam {anderes:?}"),
    }

    transport.close();
    assert!(transport.sender().is_none());
    let ende = empfangen(&mut beim_dienst).await;
    assert_eq!(ende["realtimeInput"]["audioStreamEnd"], true);
    let schluss = empfangen(&mut beim_dienst).await;
    assert_eq!(schluss["close"], true);
}

#[tokio::test]
async fn dienst_schliesst_ergibt_close() {
    let (endpoint, _beim_dienst) = dienst_starten(|mut ws, _tx| async move {
        lesen(&mut ws).await.unwrap();
        ws.send(Message::Text(r#"{"setupComplete":{}}"#.into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();
        // Abschluss des Close-Handshakes abwarten
        while lesen(&mut ws).await.is_some() {}
    })
    .await;

    let config = config(endpoint, "STERNFUNK_TEST_LIVE_DIENST_SCHLIESST");
    let (_transport, mut rx, id) = oeffnen(&config);

    assert_eq!(ereignis(&mut rx, id).await, TransportEvent::Open);
    assert_eq!(ereignis(&mut rx, id).await, TransportEvent::Close);
}

#[tokio::test]
async fn schliessen_vor_setup_complete_ergibt_error() {
    let (endpoint, _beim_dienst) = dienst_starten(|mut ws, _tx| async move {
        lesen(&mut ws).await.unwrap();
        ws.close(None).await.unwrap();
        while lesen(&mut ws).await.is_some() {}
    })
    .await;

    let config = config(endpoint, "STERNFUNK_TEST_LIVE_VORZEITIG");
    let (transport, mut rx, id) = oeffnen(&config);

    assert!(matches!(ereignis(&mut rx, id).await, TransportEvent::Error(_)));
    assert!(transport.sender().is_none());
}

#[tokio::test]
async fn fehlermeldung_vor_setup_complete_ergibt_error() {
    let (endpoint, _beim_dienst) = dienst_starten(|mut ws, _tx| async move {
        lesen(&mut ws).await.unwrap();
        ws.send(Message::Text(
            r#"{"error":{"message":"API key not valid"}}"#.into(),
        ))
        .await
        .unwrap();
        while lesen(&mut ws).await.is_some() {}
    })
    .await;

    let config = config(endpoint, "STERNFUNK_TEST_LIVE_ABGELEHNT");
    let (_transport, mut rx, id) = oeffnen(&config);

    match ereignis(&mut rx, id).await {
        TransportEvent::Error(meldung) => assert!(meldung.contains("API key not valid")),
        anderes => panic!("Error erwartet, bekam {anderes:?}"),
    }
}

#[tokio::test]
async fn nicht_erreichbarer_dienst_ergibt_error() {
    // Port belegen und sofort freigeben: dort lauscht niemand mehr
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = config(format!("ws://{addr}/ws"), "STERNFUNK_TEST_LIVE_UNERREICHBAR");
    let (_transport, mut rx, id) = oeffnen(&config);

    assert!(matches!(ereignis(&mut rx, id).await, TransportEvent::Error(_)));
}
