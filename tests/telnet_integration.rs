use mudtap::config::Config;
use mudtap::error::ErrorCode;
use mudtap::session::GameSession;
use mudtap::stream::StreamMask;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;

const IAC: u8 = 0xff;
const DO: u8 = 0xfd;
const WILL: u8 = 0xfb;
const GA: u8 = 0xf9;
const OPT_TTYPE: u8 = 24;
const OPT_NAWS: u8 = 31;

const WAIT: Duration = Duration::from_secs(5);

async fn read_until(socket: &mut TcpStream, received: &mut Vec<u8>, done: impl Fn(&[u8]) -> bool) {
    let mut buf = [0u8; 256];
    while !done(received.as_slice()) {
        let n = socket.read(&mut buf).await.unwrap();
        assert!(n > 0, "client closed early");
        received.extend_from_slice(&buf[..n]);
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn config_for(port: u16) -> Config {
    let mut config = Config::default();
    config.game.host = "127.0.0.1".to_string();
    config.game.port = port;
    config.game.connect_timeout_ms = 5_000;
    config
}

#[tokio::test]
async fn telnet_session_publishes_classified_lines() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (ready_tx, ready_rx) = oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(&[IAC, DO, OPT_TTYPE, IAC, DO, OPT_NAWS])
            .await
            .unwrap();
        let mut negotiation = Vec::new();
        read_until(&mut socket, &mut negotiation, |bytes| {
            contains(bytes, &[IAC, WILL, OPT_TTYPE]) && contains(bytes, &[IAC, WILL, OPT_NAWS])
        })
        .await;

        ready_rx.await.unwrap();
        socket
            .write_all(b"\x1b[1mWelcome\x1b[0m to the realm\r\nHP:100> ")
            .await
            .unwrap();
        socket.write_all(&[IAC, GA]).await.unwrap();

        let mut command = Vec::new();
        read_until(&mut socket, &mut command, |bytes| contains(bytes, b"look\r\n")).await;
        socket
            .write_all(b"You see nothing special.\r\n")
            .await
            .unwrap();
        negotiation
    });

    let session = GameSession::connect(&config_for(addr.port())).await.unwrap();
    let streams = session.streams().clone();
    let stripped = streams.subscribe();
    let raw = streams.subscribe_to(StreamMask::DOWNSTREAM_RAW).unwrap();
    ready_tx.send(()).unwrap();

    let welcome = timeout(WAIT, streams.read(&stripped)).await.unwrap();
    assert_eq!(welcome.text(), "Welcome to the realm");
    let prompt = timeout(WAIT, streams.read(&stripped)).await.unwrap();
    assert_eq!(prompt.text(), "HP:100> ");
    let raw_welcome = timeout(WAIT, streams.read(&raw)).await.unwrap();
    assert_eq!(raw_welcome.text(), "\x1b[1mWelcome\x1b[0m to the realm");

    session.send("look").await.unwrap();
    let reply = timeout(WAIT, streams.read(&stripped)).await.unwrap();
    assert_eq!(reply.text(), "You see nothing special.");

    let commands = session.commands().snapshot();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].text(), "look");

    let negotiation = server_task.await.unwrap();
    assert!(contains(&negotiation, &[IAC, WILL, OPT_TTYPE]));
    assert!(contains(&negotiation, &[IAC, WILL, OPT_NAWS]));

    session.close().await.unwrap();
}

#[tokio::test]
async fn server_disconnect_flushes_partial_line_and_sets_eof() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (ready_tx, ready_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        ready_rx.await.unwrap();
        socket.write_all(b"Goodbye!\r\nConnection clo").await.unwrap();
    });

    let session = GameSession::connect(&config_for(addr.port())).await.unwrap();
    let consumer = session.streams().subscribe();
    ready_tx.send(()).unwrap();

    let first = timeout(WAIT, session.streams().read(&consumer)).await.unwrap();
    assert_eq!(first.text(), "Goodbye!");
    let last = timeout(WAIT, session.streams().read(&consumer)).await.unwrap();
    assert_eq!(last.text(), "Connection clo");

    timeout(WAIT, async {
        while !session.is_eof() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    let err = session.send("quit").await.unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::RemoteClosed));
}

#[tokio::test]
async fn connect_to_closed_port_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let err = match GameSession::connect(&config_for(port)).await {
        Ok(_) => panic!("connect should fail"),
        Err(err) => err,
    };
    assert_eq!(err.code(), Some(ErrorCode::ConnectFailed));
}
