//! MySQL client against an in-process fake server on a real TCP socket.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use indicator_core::mysql::packet::{encode_header, read_packet};
use indicator_core::mysql::{ConnectOptions, MysqlClient, MysqlError, native_password};

const SCRAMBLE: [u8; 20] = *b"0123456789abcdefghij";
const SWITCH_SCRAMBLE: [u8; 20] = *b"ABCDEFGHIJ0123456789";

#[derive(Clone, Copy)]
enum Behavior {
    Accept,
    SwitchThenAccept,
    Deny,
}

fn greeting() -> Vec<u8> {
    let mut p = vec![10];
    p.extend_from_slice(b"8.0.36\0");
    p.extend_from_slice(&7u32.to_le_bytes());
    p.extend_from_slice(&SCRAMBLE[..8]);
    p.push(0);
    p.extend_from_slice(&0xF7FFu16.to_le_bytes());
    p.push(255);
    p.extend_from_slice(&0x0002u16.to_le_bytes());
    p.extend_from_slice(&0x80FFu16.to_le_bytes());
    p.push(21);
    p.extend_from_slice(&[0; 10]);
    p.extend_from_slice(&SCRAMBLE[8..]);
    p.push(0);
    p.extend_from_slice(b"caching_sha2_password\0");
    p
}

fn error_packet(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut p = vec![0xFF];
    p.extend_from_slice(&code.to_le_bytes());
    p.push(b'#');
    p.extend_from_slice(state.as_bytes());
    p.extend_from_slice(message.as_bytes());
    p
}

async fn send(stream: &mut TcpStream, seq: u8, payload: &[u8]) {
    stream
        .write_all(&encode_header(payload.len(), seq))
        .await
        .unwrap();
    stream.write_all(payload).await.unwrap();
}

/// The length-prefixed auth response inside a handshake response.
fn auth_response(payload: &[u8]) -> &[u8] {
    let user_end = 32 + payload[32..].iter().position(|&b| b == 0).unwrap();
    let len = usize::from(payload[user_end + 1]);
    &payload[user_end + 2..user_end + 2 + len]
}

/// Serve one connection and return the queries it received.
async fn serve(listener: TcpListener, behavior: Behavior, password: &'static str) -> Vec<String> {
    let (mut stream, _) = listener.accept().await.unwrap();
    send(&mut stream, 0, &greeting()).await;

    let response = read_packet(&mut stream).await.unwrap();
    assert_eq!(response.seq, 1);
    match behavior {
        Behavior::Accept => {
            assert_eq!(
                auth_response(&response.payload),
                native_password(password.as_bytes(), &SCRAMBLE)
            );
            send(&mut stream, 2, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]).await;
        }
        Behavior::SwitchThenAccept => {
            let mut switch = vec![0xFE];
            switch.extend_from_slice(b"mysql_native_password\0");
            switch.extend_from_slice(&SWITCH_SCRAMBLE);
            switch.push(0);
            send(&mut stream, 2, &switch).await;

            let answer = read_packet(&mut stream).await.unwrap();
            assert_eq!(answer.seq, 3);
            assert_eq!(
                answer.payload,
                native_password(password.as_bytes(), &SWITCH_SCRAMBLE)
            );
            send(&mut stream, 4, &[0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00]).await;
        }
        Behavior::Deny => {
            let message = "Access denied for user 'sensors'@'10.0.0.2' (using password: YES)";
            send(&mut stream, 2, &error_packet(1045, "28000", message)).await;
            return Vec::new();
        }
    }

    let mut queries = Vec::new();
    while let Ok(packet) = read_packet(&mut stream).await {
        assert_eq!(packet.payload[0], 0x03);
        let sql = String::from_utf8(packet.payload[1..].to_vec()).unwrap();
        if sql.contains("missing_table") {
            send(
                &mut stream,
                1,
                &error_packet(1146, "42S02", "Table 'sensors.missing_table' doesn't exist"),
            )
            .await;
        } else {
            send(&mut stream, 1, &[0x00, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00]).await;
        }
        queries.push(sql);
    }
    queries
}

async fn start(behavior: Behavior) -> (ConnectOptions, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(serve(listener, behavior, "s3cret"));
    let options = ConnectOptions::new("127.0.0.1", port, "sensors", "s3cret")
        .database("sensors")
        .timeout(Duration::from_secs(5));
    (options, server)
}

#[tokio::test]
async fn test_connect_and_insert() {
    let (options, server) = start(Behavior::Accept).await;

    let mut client = MysqlClient::connect(&options).await.unwrap();
    assert_eq!(client.server_version(), "8.0.36");
    client
        .query("CREATE TABLE IF NOT EXISTS sensor_data (id INT)")
        .await
        .unwrap();
    client
        .query("INSERT INTO sensor_data (id) VALUES (1)")
        .await
        .unwrap();
    client.close().await;

    let queries = server.await.unwrap();
    assert_eq!(queries.len(), 2);
    assert!(queries[1].starts_with("INSERT INTO sensor_data"));
}

#[tokio::test]
async fn test_connect_with_auth_switch() {
    let (options, server) = start(Behavior::SwitchThenAccept).await;

    let mut client = MysqlClient::connect(&options).await.unwrap();
    client.query("SELECT 1").await.unwrap();
    client.close().await;

    assert_eq!(server.await.unwrap(), vec!["SELECT 1".to_string()]);
}

#[tokio::test]
async fn test_access_denied_reports_server_error() {
    let (options, server) = start(Behavior::Deny).await;

    let err = MysqlClient::connect(&options).await.unwrap_err();
    match err {
        MysqlError::Server { code, message } => {
            assert_eq!(code, 1045);
            assert!(message.starts_with("Access denied for user 'sensors'"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn test_query_error_keeps_connection_usable() {
    let (options, server) = start(Behavior::Accept).await;

    let mut client = MysqlClient::connect(&options).await.unwrap();
    let err = client
        .query("INSERT INTO missing_table VALUES (1)")
        .await
        .unwrap_err();
    assert_eq!(err.server_code(), Some(1146));
    client.query("SELECT 1").await.unwrap();
    client.close().await;

    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_connection_refused() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let options = ConnectOptions::new("127.0.0.1", port, "sensors", "pw")
        .timeout(Duration::from_secs(2));

    let err = MysqlClient::connect(&options).await.unwrap_err();
    assert!(matches!(err, MysqlError::Io(_)));
}
