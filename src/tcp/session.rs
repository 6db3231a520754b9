use crate::error::{Error, Result};
use crate::peer::PeerAddress;
use crate::proto::{self, CONN_REQUEST_RESPONSE, ETX, INIT_HOLEPUNCH};
use std::io::{self, ErrorKind};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    select,
    sync::mpsc::Sender,
};
use tokio_util::sync::CancellationToken;

/// Longest frame accepted from the relay before giving up on finding its `ETX`.
pub(crate) const MAX_FRAME: usize = 1500;

/// Reads `ETX` terminated frames from the relay.
///
/// An `ETX` byte inside an address or port does not end a frame: reading goes on
/// until the frame reaches the length its header announces.
pub(crate) struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub(crate) fn new(r: R) -> Self {
        Self {
            inner: BufReader::new(r),
            buf: Vec::with_capacity(64),
        }
    }

    /// Returns the next frame including its trailing `ETX`.
    pub(crate) async fn next_frame(&mut self) -> Result<&[u8]> {
        self.buf.clear();
        loop {
            let room = (MAX_FRAME - self.buf.len()) as u64;
            let n = (&mut self.inner)
                .take(room)
                .read_until(ETX, &mut self.buf)
                .await
                .map_err(Error::RelayConnectionLost)?;

            if n == 0 || self.buf.last() != Some(&ETX) {
                if self.buf.len() >= MAX_FRAME {
                    return Err(Error::framing(format!(
                        "no frame end within {} bytes",
                        MAX_FRAME
                    )));
                }
                return Err(Error::RelayConnectionLost(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "relay closed the connection",
                )));
            }

            match proto::frame_len(&self.buf) {
                Some(need) if self.buf.len() < need => {
                    log::trace!("ETX inside frame at {}, need {}", self.buf.len(), need)
                }
                _ => break,
            }
        }

        Ok(&self.buf)
    }
}

/// Relay read/dispatch loop.
///
/// Acknowledged connection requests go to `acks`, peer addresses to `peers`.
/// Returns `Ok` only when cancelled. A lost connection ends the loop with
/// `RelayConnectionLost`, a malformed frame with `Framing`.
pub(crate) async fn run<R: AsyncRead + Unpin>(
    r: R,
    acks: Sender<()>,
    peers: Sender<PeerAddress>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut frames = FrameReader::new(r);

    loop {
        let frame = select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            f = frames.next_frame() => f?,
        };

        match frame[0] {
            CONN_REQUEST_RESPONSE => {
                let (peer_id, acknowledged) = proto::parse_conn_request_response(frame)?;
                log::debug!("conn request for {} acknowledged: {}", peer_id, acknowledged);
                if acknowledged {
                    let _ = acks.try_send(());
                }
            }
            INIT_HOLEPUNCH => {
                let peer = proto::parse_init_holepunch(frame)?;
                log::debug!("init holepunch to {}", peer);

                select! {
                    biased;
                    _ = cancel.cancelled() => return Ok(()),
                    r = peers.send(peer) => if r.is_err() {
                        log::debug!("holepunch task gone, dropping {}", peer);
                    },
                }
            }
            op => log::trace!("ignoring opcode {:#04x}", op),
        }
    }
}
