//! Relay wire format.
//!
//! Every message starts with a one byte opcode and ends with [`ETX`]. There is no
//! length prefix, so a reader accumulates bytes up to and including `ETX` before
//! looking at the opcode.
//!
//! ```text
//! CreateSession        [0x3C][len][uid..][0x00][ipv4 x4][0x00][port be16][ETX]
//! ConnRequest          [0x3E][len][peer id..][ETX]
//! ConnRequestResponse  [0x3F][status][len][peer id..][ETX]
//! InitHolepunch v4     [0x40][0x00][ipv4 x4][port be16][ETX]
//! InitHolepunch v6     [0x40][0x01][4 x be16 groups][port be16][ETX]
//! ```

use crate::error::{Error, Result};
use crate::peer::PeerAddress;
use std::net::{IpAddr, Ipv4Addr};

pub const CREATE_SESSION: u8 = 0x3C;
pub const CREATE_SESSION_RESPONSE: u8 = 0x3D;
pub const CONN_REQUEST: u8 = 0x3E;
pub const CONN_REQUEST_RESPONSE: u8 = 0x3F;
pub const INIT_HOLEPUNCH: u8 = 0x40;
pub const INIT_CONN: u8 = 0x41;

/// Frame terminator.
pub const ETX: u8 = 0x03;
pub const NAK: u8 = 21;
pub const ACK: u8 = 6;

const FAMILY_V4: u8 = 0;
const FAMILY_V6: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    CreateSession {
        uid: String,
        local_ip: Ipv4Addr,
        local_port: u16,
    },
    ConnRequest {
        peer_id: String,
    },
    ConnRequestResponse {
        acknowledged: bool,
        peer_id: String,
    },
    InitHolepunch {
        peer: PeerAddress,
    },
}

impl Message {
    pub fn opcode(&self) -> u8 {
        match self {
            Message::CreateSession { .. } => CREATE_SESSION,
            Message::ConnRequest { .. } => CONN_REQUEST,
            Message::ConnRequestResponse { .. } => CONN_REQUEST_RESPONSE,
            Message::InitHolepunch { .. } => INIT_HOLEPUNCH,
        }
    }

    /// Encodes the message as one `ETX` terminated frame.
    pub fn encode(&self) -> Result<Vec<u8>> {
        match self {
            Message::CreateSession {
                uid,
                local_ip,
                local_port,
            } => create_session(uid, *local_ip, *local_port),
            Message::ConnRequest { peer_id } => conn_request(peer_id),
            Message::ConnRequestResponse {
                acknowledged,
                peer_id,
            } => {
                let status = if *acknowledged { ACK } else { NAK };
                let mut buf = vec![CONN_REQUEST_RESPONSE, status];
                put_str(&mut buf, peer_id)?;
                buf.push(ETX);
                Ok(buf)
            }
            Message::InitHolepunch { peer } => Ok(init_holepunch(peer)),
        }
    }

    /// Decodes one frame. Opcodes this side never interprets are a framing error.
    pub fn decode(frame: &[u8]) -> Result<Self> {
        match opcode(frame)? {
            CREATE_SESSION => parse_create_session(frame),
            CONN_REQUEST => {
                let peer_id = get_str(frame, 1)?;
                Ok(Message::ConnRequest { peer_id })
            }
            CONN_REQUEST_RESPONSE => {
                let (peer_id, acknowledged) = parse_conn_request_response(frame)?;
                Ok(Message::ConnRequestResponse {
                    acknowledged,
                    peer_id,
                })
            }
            INIT_HOLEPUNCH => Ok(Message::InitHolepunch {
                peer: parse_init_holepunch(frame)?,
            }),
            op => Err(Error::framing(format!("unknown opcode {:#04x}", op))),
        }
    }
}

pub fn opcode(frame: &[u8]) -> Result<u8> {
    frame
        .first()
        .copied()
        .ok_or_else(|| Error::framing("empty frame"))
}

/// Length a frame must reach before its `ETX` counts as the terminator.
///
/// Binary fields may contain a byte equal to `ETX`. For the variable-size frames this
/// side reads, the header tells how long the frame really is. Returns `None` for
/// opcodes without a known layout.
pub fn frame_len(frame: &[u8]) -> Option<usize> {
    match *frame.first()? {
        CONN_REQUEST_RESPONSE => match frame.get(2) {
            Some(&len) => Some(4 + len as usize),
            None => Some(3),
        },
        INIT_HOLEPUNCH => match frame.get(1) {
            Some(&FAMILY_V6) => Some(13),
            Some(_) => Some(9),
            None => Some(2),
        },
        _ => None,
    }
}

pub fn create_session(uid: &str, local_ip: Ipv4Addr, local_port: u16) -> Result<Vec<u8>> {
    let mut buf = vec![CREATE_SESSION];
    put_str(&mut buf, uid)?;
    buf.push(0);
    buf.extend_from_slice(&local_ip.octets());
    buf.push(0);
    buf.extend_from_slice(&local_port.to_be_bytes());
    buf.push(ETX);
    Ok(buf)
}

pub fn conn_request(peer_id: &str) -> Result<Vec<u8>> {
    let mut buf = vec![CONN_REQUEST];
    put_str(&mut buf, peer_id)?;
    buf.push(ETX);
    Ok(buf)
}

pub fn init_holepunch(peer: &PeerAddress) -> Vec<u8> {
    let mut buf = vec![INIT_HOLEPUNCH];
    match peer.ip() {
        IpAddr::V4(ip) => {
            buf.push(FAMILY_V4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.push(FAMILY_V6);
            for g in &ip.segments()[..4] {
                buf.extend_from_slice(&g.to_be_bytes());
            }
        }
    }
    buf.extend_from_slice(&peer.port().to_be_bytes());
    buf.push(ETX);
    buf
}

/// Returns the peer id and whether the relay acknowledged the request.
///
/// Any status other than [`NAK`] counts as an acknowledgement.
pub fn parse_conn_request_response(frame: &[u8]) -> Result<(String, bool)> {
    let status = *frame
        .get(1)
        .ok_or_else(|| Error::framing("conn request response without status"))?;
    let peer_id = get_str(frame, 2)?;
    Ok((peer_id, status != NAK))
}

pub fn parse_init_holepunch(frame: &[u8]) -> Result<PeerAddress> {
    let family = *frame
        .get(1)
        .ok_or_else(|| Error::framing("init holepunch without family"))?;

    if family == FAMILY_V6 {
        let b = slice(frame, 2, 10)?;
        let groups = [
            u16::from_be_bytes([b[0], b[1]]),
            u16::from_be_bytes([b[2], b[3]]),
            u16::from_be_bytes([b[4], b[5]]),
            u16::from_be_bytes([b[6], b[7]]),
        ];
        Ok(PeerAddress::v6(groups, port_at(frame, 10)?))
    } else {
        let b = slice(frame, 2, 6)?;
        let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
        Ok(PeerAddress::v4(ip, port_at(frame, 6)?))
    }
}

fn parse_create_session(frame: &[u8]) -> Result<Message> {
    let uid = get_str(frame, 1)?;
    let at = 2 + uid.len() + 1;
    let b = slice(frame, at, at + 4)?;
    let local_ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
    let local_port = port_at(frame, at + 5)?;

    Ok(Message::CreateSession {
        uid,
        local_ip,
        local_port,
    })
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    let len = u8::try_from(s.len()).map_err(|_| Error::IdentifierTooLong { len: s.len() })?;
    buf.push(len);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Reads a string whose one byte length sits at `at`.
fn get_str(frame: &[u8], at: usize) -> Result<String> {
    let len = *frame
        .get(at)
        .ok_or_else(|| Error::framing("missing length byte"))? as usize;
    let b = slice(frame, at + 1, at + 1 + len)?;
    String::from_utf8(b.to_vec()).map_err(|_| Error::framing("identifier is not utf-8"))
}

fn port_at(frame: &[u8], at: usize) -> Result<u16> {
    let b = slice(frame, at, at + 2)?;
    Ok(u16::from_be_bytes([b[0], b[1]]))
}

fn slice(frame: &[u8], from: usize, to: usize) -> Result<&[u8]> {
    frame.get(from..to).ok_or_else(|| {
        Error::framing(format!(
            "frame of {} bytes too short, need {}",
            frame.len(),
            to
        ))
    })
}
