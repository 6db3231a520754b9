use crate::error::{Error, Result};
use crate::proto;
use std::time::Duration;
use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::mpsc::Receiver,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, PartialEq)]
enum State {
    Idle,
    Active(String),
    Stopped,
}

/// Sends `ConnRequest` for the latest target and resends it every `period`
/// until the relay acknowledges it.
///
/// A new target replaces the old one and restarts the resend timer. Once an
/// acknowledgement arrives nothing is written again. Write failures end the task
/// with [`Error::RelayConnectionLost`].
pub(crate) async fn run<W: AsyncWrite + Unpin>(
    mut w: W,
    mut targets: Receiver<String>,
    mut acks: Receiver<()>,
    period: Duration,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = State::Idle;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let peer_id = select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            Some(()) = acks.recv(), if state != State::Stopped => {
                if let State::Active(ref peer_id) = state {
                    log::debug!("stop requesting {}", peer_id);
                    state = State::Stopped;
                }
                continue;
            }
            Some(peer_id) = targets.recv() => {
                if state == State::Stopped {
                    log::debug!("already acknowledged, ignoring target {}", peer_id);
                    continue;
                }
                ticker.reset();
                state = State::Active(peer_id.clone());
                peer_id
            }
            _ = ticker.tick(), if matches!(state, State::Active(_)) => match state {
                State::Active(ref peer_id) => peer_id.clone(),
                _ => continue,
            },
        };

        let frame = match proto::conn_request(&peer_id) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("cannot request {}: {}", peer_id, e);
                state = State::Idle;
                continue;
            }
        };

        log::trace!("conn request {}", peer_id);
        select! {
            biased;
            _ = cancel.cancelled() => return Ok(()),
            r = write_frame(&mut w, &frame) => r.map_err(Error::RelayConnectionLost)?,
        }
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, frame: &[u8]) -> std::io::Result<()> {
    w.write_all(frame).await?;
    w.flush().await
}
