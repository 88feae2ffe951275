use boardwalk_core::{Message, Notice, OutboundFrame, SessionIdentity};
use boardwalk_pier::{start, NotifyMode, RunningPier};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

async fn pier(notify: NotifyMode) -> RunningPier {
    start("127.0.0.1:0".parse().expect("addr"), notify)
        .await
        .expect("pier binds")
}

async fn connect(pier: &RunningPier) -> Client {
    let url = format!("ws://{}/ws", pier.addr);
    let (stream, _) = timeout(WAIT, connect_async(url.as_str()))
        .await
        .expect("connect timed out")
        .expect("websocket handshake");
    // Registration happens after the upgrade completes on the server side.
    let expected = pier.state.hub.len() + 1;
    timeout(WAIT, async {
        while pier.state.hub.len() < expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection registered");
    stream
}

async fn next_text(client: &mut Client) -> String {
    loop {
        let frame = timeout(WAIT, client.next())
            .await
            .expect("frame timed out")
            .expect("stream open")
            .expect("frame ok");
        if let WsMessage::Text(text) = frame {
            return text;
        }
    }
}

fn frame(id: &str, name: &str, body: &str) -> String {
    let identity = SessionIdentity::new(id).with_username(name);
    serde_json::to_string(&OutboundFrame::compose(&identity, body).with_client_msg_id("c-1"))
        .expect("frame json")
}

async fn snapshot_body(pier: &RunningPier) -> String {
    reqwest::get(format!("http://{}/api/messages", pier.addr))
        .await
        .expect("snapshot request")
        .text()
        .await
        .expect("snapshot body")
}

#[tokio::test]
async fn empty_log_serves_null() {
    let pier = pier(NotifyMode::Full).await;
    assert_eq!(snapshot_body(&pier).await.trim(), "null");

    let health: serde_json::Value = reqwest::get(format!("http://{}/healthz", pier.addr))
        .await
        .expect("health request")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["status"], "ok");
    pier.stop().await;
}

#[tokio::test]
async fn records_fan_out_to_everyone_including_sender() {
    let pier = pier(NotifyMode::Full).await;
    let mut alice = connect(&pier).await;
    let mut bob = connect(&pier).await;

    alice
        .send(WsMessage::Text(frame("u1", "alice", "hello")))
        .await
        .expect("send");

    for client in [&mut alice, &mut bob] {
        let record = Message::from_frame(&next_text(client).await).expect("record");
        assert_eq!(record.body, "hello");
        assert_eq!(record.author.id, "u1");
        assert_eq!(record.client_msg_id.as_deref(), Some("c-1"));
    }

    let snapshot = boardwalk_core::parse_snapshot(snapshot_body(&pier).await.as_bytes())
        .expect("snapshot parses");
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].author.username.as_deref(), Some("alice"));
    pier.stop().await;
}

#[tokio::test]
async fn malformed_frames_leave_connection_open() {
    let pier = pier(NotifyMode::Full).await;
    let mut client = connect(&pier).await;

    client
        .send(WsMessage::Text("definitely not json".into()))
        .await
        .expect("send garbage");
    client
        .send(WsMessage::Text(frame("u1", "alice", "   ")))
        .await
        .expect("send empty body");
    client
        .send(WsMessage::Text(frame("u1", "alice", "still here")))
        .await
        .expect("send valid");

    let record = Message::from_frame(&next_text(&mut client).await).expect("record");
    assert_eq!(record.body, "still here");
    assert_eq!(pier.state.log.len(), 1);
    pier.stop().await;
}

#[tokio::test]
async fn signal_mode_sends_change_notices() {
    let pier = pier(NotifyMode::Signal).await;
    let mut client = connect(&pier).await;

    client
        .send(WsMessage::Text(frame("u1", "alice", "one")))
        .await
        .expect("send");
    let notice: Notice = serde_json::from_str(&next_text(&mut client).await).expect("notice");
    assert_eq!(notice, Notice::Changed { total: 1 });
    pier.stop().await;
}
