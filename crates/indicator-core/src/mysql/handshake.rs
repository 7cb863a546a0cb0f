//! Handshake v10 parsing, handshake response and auth result packets.

use bytes::{Buf, BufMut};

use super::auth::{NATIVE_PASSWORD_PLUGIN, SCRAMBLE_LEN, native_password};
use super::packet::{AUTH_SWITCH_MARKER, ERR_MARKER, OK_MARKER};
use super::{MysqlError, Result};

/// Base client capabilities, including `CLIENT_PROTOCOL_41` and
/// `CLIENT_SECURE_CONNECTION`.
pub const CLIENT_BASE_CAPABILITIES: u32 = 0x000F_A685;
pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;

/// Max packet size announced to the server (16 MiB).
pub const CLIENT_MAX_PACKET: u32 = 0x0100_0000;
/// `utf8mb4_general_ci`.
pub const CLIENT_CHARSET: u8 = 45;

const RESERVED_LEN: usize = 23;

/// The server's initial handshake packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    /// Auth challenge. Bytes past what the server sent stay zero.
    pub scramble: [u8; SCRAMBLE_LEN],
    pub capabilities: u32,
}

impl Greeting {
    /// Parse a handshake v10 payload.
    ///
    /// # Errors
    ///
    /// [`MysqlError::Server`] if the server greets with an error packet,
    /// [`MysqlError::Malformed`] if the packet is truncated.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.first() == Some(&ERR_MARKER) {
            return Err(parse_error_packet(payload));
        }

        let mut buf = payload;
        need(&buf, 1, "protocol version")?;
        let protocol_version = buf.get_u8();

        let Some(nul) = buf.iter().position(|&b| b == 0) else {
            return Err(MysqlError::malformed("greeting", "unterminated server version"));
        };
        let server_version = String::from_utf8_lossy(&buf[..nul]).into_owned();
        buf.advance(nul + 1);

        need(&buf, 4 + 8 + 1 + 2, "connection id, scramble and capabilities")?;
        let connection_id = buf.get_u32_le();
        let mut scramble = [0u8; SCRAMBLE_LEN];
        buf.copy_to_slice(&mut scramble[..8]);
        buf.advance(1); // filler
        let mut capabilities = u32::from(buf.get_u16_le());

        if buf.has_remaining() {
            need(&buf, 1 + 2 + 2 + 1 + 10, "extended capabilities")?;
            buf.advance(1); // charset
            buf.advance(2); // status flags
            capabilities |= u32::from(buf.get_u16_le()) << 16;
            let auth_data_len = buf.get_u8();
            buf.advance(10); // reserved

            if auth_data_len > 8 && buf.remaining() >= SCRAMBLE_LEN - 8 {
                buf.copy_to_slice(&mut scramble[8..]);
            }
        }

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            scramble,
            capabilities,
        })
    }
}

fn need(buf: &&[u8], n: usize, what: &str) -> Result<()> {
    if buf.remaining() < n {
        return Err(MysqlError::malformed(
            "greeting",
            format!("truncated before {what}"),
        ));
    }
    Ok(())
}

/// Client capability flags for a connection with or without a default
/// database.
#[must_use]
pub fn client_capabilities(with_database: bool) -> u32 {
    let mut caps = CLIENT_BASE_CAPABILITIES | CLIENT_PLUGIN_AUTH;
    if with_database {
        caps |= CLIENT_CONNECT_WITH_DB;
    }
    caps
}

/// Build the handshake response payload.
///
/// An empty password sends a zero-length auth response; an empty database
/// is treated as none.
#[must_use]
pub fn handshake_response(
    user: &str,
    password: &str,
    database: Option<&str>,
    scramble: &[u8; SCRAMBLE_LEN],
) -> Vec<u8> {
    let database = database.filter(|db| !db.is_empty());

    let mut buf = Vec::with_capacity(128);
    buf.put_u32_le(client_capabilities(database.is_some()));
    buf.put_u32_le(CLIENT_MAX_PACKET);
    buf.put_u8(CLIENT_CHARSET);
    buf.put_bytes(0, RESERVED_LEN);

    put_cstr(&mut buf, user);

    if password.is_empty() {
        buf.put_u8(0);
    } else {
        buf.put_u8(SCRAMBLE_LEN as u8);
        buf.put_slice(&native_password(password.as_bytes(), scramble));
    }

    if let Some(db) = database {
        put_cstr(&mut buf, db);
    }
    put_cstr(&mut buf, NATIVE_PASSWORD_PLUGIN);
    buf
}

fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

/// Server answer to a handshake response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthReply {
    Ok,
    /// The server asks to authenticate again with `method` and a fresh
    /// scramble.
    Switch {
        method: String,
        scramble: [u8; SCRAMBLE_LEN],
    },
}

/// Interpret an auth result payload.
///
/// # Errors
///
/// [`MysqlError::Server`] for an error packet,
/// [`MysqlError::UnexpectedResponse`] for any other marker.
pub fn parse_auth_reply(payload: &[u8]) -> Result<AuthReply> {
    match payload.first().copied() {
        Some(OK_MARKER) => Ok(AuthReply::Ok),
        Some(ERR_MARKER) => Err(parse_error_packet(payload)),
        Some(AUTH_SWITCH_MARKER) => {
            let rest = &payload[1..];
            let nul = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            let method = String::from_utf8_lossy(&rest[..nul]).into_owned();

            let data = rest.get(nul + 1..).unwrap_or_default();
            if data.len() < SCRAMBLE_LEN {
                return Err(MysqlError::malformed(
                    "auth switch",
                    format!("scramble of {} bytes", data.len()),
                ));
            }
            let mut scramble = [0u8; SCRAMBLE_LEN];
            scramble.copy_from_slice(&data[..SCRAMBLE_LEN]);
            Ok(AuthReply::Switch { method, scramble })
        }
        Some(marker) => Err(MysqlError::UnexpectedResponse {
            stage: "auth",
            marker,
        }),
        None => Err(MysqlError::malformed("auth result", "empty packet")),
    }
}

/// Decode an error packet: `0xFF`, LE16 code, `#` and a 5-byte SQL state,
/// then the message.
#[must_use]
pub fn parse_error_packet(payload: &[u8]) -> MysqlError {
    let code = match payload.get(1..3) {
        Some(&[lo, hi]) => u16::from_le_bytes([lo, hi]),
        _ => 0,
    };
    let message = payload
        .get(9..)
        .map(|m| String::from_utf8_lossy(m).into_owned())
        .unwrap_or_default();
    MysqlError::Server { code, message }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A handshake v10 payload as sent by MariaDB.
    pub(crate) fn greeting_payload(scramble: &[u8; 20]) -> Vec<u8> {
        let mut p = vec![10];
        p.extend_from_slice(b"10.11.6-MariaDB\0");
        p.extend_from_slice(&42u32.to_le_bytes());
        p.extend_from_slice(&scramble[..8]);
        p.push(0); // filler
        p.extend_from_slice(&0xF7FEu16.to_le_bytes());
        p.push(45); // charset
        p.extend_from_slice(&2u16.to_le_bytes()); // status
        p.extend_from_slice(&0x81BFu16.to_le_bytes());
        p.push(21); // auth data length
        p.extend_from_slice(&[0; 10]);
        p.extend_from_slice(&scramble[8..]);
        p.push(0);
        p.extend_from_slice(b"mysql_native_password\0");
        p
    }

    #[test]
    fn test_parse_greeting() {
        let scramble: [u8; 20] = std::array::from_fn(|i| b'a' + i as u8);
        let greeting = Greeting::parse(&greeting_payload(&scramble)).unwrap();
        assert_eq!(greeting.protocol_version, 10);
        assert_eq!(greeting.server_version, "10.11.6-MariaDB");
        assert_eq!(greeting.connection_id, 42);
        assert_eq!(greeting.scramble, scramble);
        assert_eq!(greeting.capabilities, 0x81BF_F7FE);
    }

    #[test]
    fn test_parse_short_greeting_keeps_first_scramble_part() {
        let mut p = vec![10];
        p.extend_from_slice(b"5.0\0");
        p.extend_from_slice(&1u32.to_le_bytes());
        p.extend_from_slice(b"12345678");
        p.push(0);
        p.extend_from_slice(&0x0200u16.to_le_bytes());

        let greeting = Greeting::parse(&p).unwrap();
        assert_eq!(&greeting.scramble[..8], b"12345678");
        assert_eq!(&greeting.scramble[8..], &[0; 12]);
        assert_eq!(greeting.capabilities, 0x0200);
    }

    #[test]
    fn test_parse_truncated_greeting() {
        assert!(matches!(
            Greeting::parse(&[10, b'5', 0, 1, 2]),
            Err(MysqlError::Malformed { .. })
        ));
        assert!(matches!(
            Greeting::parse(&[10, b'5', b'.']),
            Err(MysqlError::Malformed { .. })
        ));
        assert!(matches!(Greeting::parse(&[]), Err(MysqlError::Malformed { .. })));
    }

    #[test]
    fn test_greeting_error_packet() {
        let mut p = vec![0xFF];
        p.extend_from_slice(&1040u16.to_le_bytes());
        p.extend_from_slice(b"#08004Too many connections");
        let err = Greeting::parse(&p).unwrap_err();
        assert_eq!(err.server_code(), Some(1040));
        assert!(err.to_string().contains("Too many connections"));
    }

    #[test]
    fn test_handshake_response_layout() {
        let scramble = [7u8; 20];
        let payload = handshake_response("sensors", "secret", Some("air"), &scramble);

        let caps = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        assert_eq!(caps, 0x000F_A685 | 0x0008_0000 | 0x08);
        assert_eq!(&payload[4..8], &[0x00, 0x00, 0x00, 0x01]);
        assert_eq!(payload[8], 45);
        assert!(payload[9..32].iter().all(|&b| b == 0));
        assert_eq!(&payload[32..40], b"sensors\0");
        assert_eq!(payload[40], 20);
        assert_eq!(&payload[41..61], &native_password(b"secret", &scramble));
        assert_eq!(&payload[61..65], b"air\0");
        assert_eq!(&payload[65..], b"mysql_native_password\0");
    }

    #[test]
    fn test_handshake_response_without_password_or_database() {
        let payload = handshake_response("u", "", Some(""), &[0; 20]);
        let caps = u32::from_le_bytes(payload[0..4].try_into().unwrap());
        assert_eq!(caps & CLIENT_CONNECT_WITH_DB, 0);
        assert_eq!(&payload[32..35], b"u\0\0");
        assert_eq!(&payload[35..], b"mysql_native_password\0");
    }

    #[test]
    fn test_parse_auth_switch() {
        let mut p = vec![0xFE];
        p.extend_from_slice(b"mysql_native_password\0");
        p.extend_from_slice(b"ABCDEFGHIJKLMNOPQRST");
        p.push(0);
        assert_eq!(
            parse_auth_reply(&p).unwrap(),
            AuthReply::Switch {
                method: "mysql_native_password".into(),
                scramble: *b"ABCDEFGHIJKLMNOPQRST",
            }
        );
    }

    #[test]
    fn test_parse_auth_error() {
        let mut p = vec![0xFF];
        p.extend_from_slice(&1045u16.to_le_bytes());
        p.extend_from_slice(b"#28000Access denied");
        let err = parse_auth_reply(&p).unwrap_err();
        assert!(matches!(
            err,
            MysqlError::Server { code: 1045, ref message } if message == "Access denied"
        ));
    }

    #[test]
    fn test_parse_auth_unexpected_marker() {
        assert!(matches!(
            parse_auth_reply(&[0x01]),
            Err(MysqlError::UnexpectedResponse { marker: 0x01, .. })
        ));
        assert!(parse_auth_reply(&[]).is_err());
        assert_eq!(parse_auth_reply(&[0x00, 0, 0, 2, 0]).unwrap(), AuthReply::Ok);
    }

    #[test]
    fn test_short_error_packet() {
        assert!(matches!(
            parse_error_packet(&[0xFF]),
            MysqlError::Server { code: 0, ref message } if message.is_empty()
        ));
    }
}
