//! Connection and query execution.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use super::auth::{NATIVE_PASSWORD_PLUGIN, native_password};
use super::handshake::{AuthReply, Greeting, handshake_response, parse_auth_reply, parse_error_packet};
use super::packet::{ERR_MARKER, Packet, read_packet, write_packet};
use super::{MysqlError, Result};

/// Bound applied to the connect and to every socket read and write.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Text query command.
pub const COM_QUERY: u8 = 0x03;

/// Where and as whom to connect.
#[derive(Clone)]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ConnectOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            password: password.into(),
            database: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Select a default database. An empty name means none.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        let database = database.into();
        self.database = (!database.is_empty()).then_some(database);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

async fn bounded<T>(
    duration: Duration,
    operation: &'static str,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| MysqlError::Timeout {
            operation,
            duration,
        })?
}

/// An authenticated connection.
///
/// Dropping the client closes the socket.
#[derive(Debug)]
pub struct MysqlClient<S = TcpStream> {
    stream: S,
    timeout: Duration,
    server_version: String,
}

impl MysqlClient<TcpStream> {
    /// Resolve, connect and authenticate.
    ///
    /// # Errors
    ///
    /// Any failure (DNS, connect, timeout, malformed greeting, rejected
    /// credentials) is returned as-is; the socket is closed.
    pub async fn connect(options: &ConnectOptions) -> Result<Self> {
        let addr = (options.host.as_str(), options.port);
        let stream = bounded(options.timeout, "connect", async {
            Ok(TcpStream::connect(addr).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}:{}", options.host, options.port);

        Self::handshake(stream, options).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> MysqlClient<S> {
    /// Authenticate over an already connected stream.
    pub async fn handshake(mut stream: S, options: &ConnectOptions) -> Result<Self> {
        let timeout = options.timeout;

        let greeting = bounded(timeout, "read greeting", read_packet(&mut stream)).await?;
        let greeting = Greeting::parse(&greeting.payload)?;
        debug!(
            "Server {} (protocol {}, capabilities 0x{:08X})",
            greeting.server_version, greeting.protocol_version, greeting.capabilities
        );

        let response = handshake_response(
            &options.user,
            &options.password,
            options.database.as_deref(),
            &greeting.scramble,
        );
        bounded(
            timeout,
            "send handshake response",
            write_packet(&mut stream, 1, &response),
        )
        .await?;

        let reply = bounded(timeout, "read auth result", read_packet(&mut stream)).await?;
        match parse_auth_reply(&reply.payload)? {
            AuthReply::Ok => {}
            AuthReply::Switch { method, scramble } => {
                if method != NATIVE_PASSWORD_PLUGIN {
                    warn!(
                        "Server requested auth method '{}', answering with {}",
                        method, NATIVE_PASSWORD_PLUGIN
                    );
                } else {
                    debug!("Server requested auth switch to {}", method);
                }

                let digest = if options.password.is_empty() {
                    Vec::new()
                } else {
                    native_password(options.password.as_bytes(), &scramble).to_vec()
                };
                bounded(
                    timeout,
                    "send auth switch response",
                    write_packet(&mut stream, reply.seq.wrapping_add(1), &digest),
                )
                .await?;

                let reply = bounded(timeout, "read auth result", read_packet(&mut stream)).await?;
                match parse_auth_reply(&reply.payload)? {
                    AuthReply::Ok => {}
                    AuthReply::Switch { .. } => {
                        return Err(MysqlError::UnexpectedResponse {
                            stage: "auth switch",
                            marker: 0xFE,
                        });
                    }
                }
            }
        }

        info!(
            "Authenticated to {} as {}",
            greeting.server_version, options.user
        );
        Ok(Self {
            stream,
            timeout,
            server_version: greeting.server_version,
        })
    }

    /// Version string from the server greeting.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Execute one statement with `COM_QUERY`.
    ///
    /// Any response other than an error packet counts as success; result
    /// sets are not read.
    ///
    /// # Errors
    ///
    /// [`MysqlError::Server`] with the server's code and message, or an I/O,
    /// timeout or framing error.
    pub async fn query(&mut self, sql: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(1 + sql.len());
        payload.push(COM_QUERY);
        payload.extend_from_slice(sql.as_bytes());

        bounded(
            self.timeout,
            "send query",
            write_packet(&mut self.stream, 0, &payload),
        )
        .await?;

        let response: Packet =
            bounded(self.timeout, "read query result", read_packet(&mut self.stream)).await?;
        if response.marker() == Some(ERR_MARKER) {
            return Err(parse_error_packet(&response.payload));
        }
        Ok(())
    }

    /// Shut the socket down.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Error closing connection: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mysql::handshake::tests::greeting_payload;
    use crate::mysql::packet::encode_header;
    use tokio::io::{AsyncReadExt, DuplexStream};

    const SCRAMBLE: [u8; 20] = *b"ABCDEFGHIJKLMNOPQRST";

    async fn send(server: &mut DuplexStream, seq: u8, payload: &[u8]) {
        server.write_all(&encode_header(payload.len(), seq)).await.unwrap();
        server.write_all(payload).await.unwrap();
    }

    fn options() -> ConnectOptions {
        ConnectOptions::new("localhost", 3306, "sensors", "secret")
            .database("air")
            .timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_handshake_ok() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            send(&mut server, 0, &greeting_payload(&SCRAMBLE)).await;
            let response = read_packet(&mut server).await.unwrap();
            assert_eq!(response.seq, 1);
            send(&mut server, 2, &[0x00, 0x00, 0x00, 0x02, 0x00]).await;
            response.payload
        });

        let client = MysqlClient::handshake(client_io, &options())
            .await
            .unwrap();
        assert_eq!(client.server_version(), "10.11.6-MariaDB");

        let response = server_task.await.unwrap();
        assert_eq!(
            response,
            handshake_response("sensors", "secret", Some("air"), &SCRAMBLE)
        );
    }

    #[tokio::test]
    async fn test_handshake_auth_switch() {
        let new_scramble = *b"zyxwvutsrqponmlkjihg";
        let (client_io, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            send(&mut server, 0, &greeting_payload(&SCRAMBLE)).await;
            read_packet(&mut server).await.unwrap();

            let mut switch = vec![0xFE];
            switch.extend_from_slice(b"mysql_native_password\0");
            switch.extend_from_slice(&new_scramble);
            switch.push(0);
            send(&mut server, 2, &switch).await;

            let answer = read_packet(&mut server).await.unwrap();
            send(&mut server, 4, &[0x00, 0x00, 0x00]).await;
            answer
        });

        MysqlClient::handshake(client_io, &options())
            .await
            .unwrap();

        let answer = server_task.await.unwrap();
        assert_eq!(answer.seq, 3);
        assert_eq!(answer.payload, native_password(b"secret", &new_scramble));
    }

    #[tokio::test]
    async fn test_handshake_access_denied() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            send(&mut server, 0, &greeting_payload(&SCRAMBLE)).await;
            read_packet(&mut server).await.unwrap();
            let mut err = vec![0xFF];
            err.extend_from_slice(&1045u16.to_le_bytes());
            err.extend_from_slice(b"#28000Access denied");
            send(&mut server, 2, &err).await;
        });

        let err = MysqlClient::handshake(client_io, &options())
            .await
            .unwrap_err();
        assert_eq!(err.server_code(), Some(1045));
        assert!(err.to_string().contains("Access denied"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out_on_silent_server() {
        let (client_io, _server) = tokio::io::duplex(4096);
        let err = MysqlClient::handshake(client_io, &options())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MysqlError::Timeout {
                operation: "read greeting",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let (client_io, mut server) = tokio::io::duplex(4096);
        let server_task = tokio::spawn(async move {
            send(&mut server, 0, &greeting_payload(&SCRAMBLE)).await;
            read_packet(&mut server).await.unwrap();
            send(&mut server, 2, &[0x00]).await;

            let query = read_packet(&mut server).await.unwrap();
            send(&mut server, 1, &[0x00, 0x01, 0x00]).await;

            let failing = read_packet(&mut server).await.unwrap();
            let mut err = vec![0xFF];
            err.extend_from_slice(&1146u16.to_le_bytes());
            err.extend_from_slice(b"#42S02Table 'air.x' doesn't exist");
            send(&mut server, 1, &err).await;

            let mut rest = Vec::new();
            server.read_to_end(&mut rest).await.unwrap();
            (query, failing, rest)
        });

        let mut client = MysqlClient::handshake(client_io, &options())
            .await
            .unwrap();
        client.query("INSERT INTO t VALUES (1)").await.unwrap();
        let err = client.query("INSERT INTO x VALUES (1)").await.unwrap_err();
        assert_eq!(err.server_code(), Some(1146));
        client.close().await;

        let (query, failing, rest) = server_task.await.unwrap();
        assert_eq!(query.seq, 0);
        assert_eq!(query.payload, b"\x03INSERT INTO t VALUES (1)");
        assert_eq!(failing.payload[0], COM_QUERY);
        assert!(rest.is_empty());
    }
}
