//! TCP hole punching.
//!
//! use [`Holepunch`] to register with the relay and race an inbound accept against
//! outbound dials to the peer address the relay reports.

mod client;
mod dial;
mod listen;
mod request;
mod session;

pub use client::Holepunch;

use std::future::Future;
use std::io::Result;
use std::net::SocketAddr;
use tokio::{net::TcpSocket, sync::mpsc::Sender, task::JoinSet};
use tokio_util::sync::CancellationToken;

/// Creates a socket with SO_REUSEADDR (and SO_REUSEPORT on unix) bound to `local_addr`.
///
/// The listener, the relay connection and every peer dial share one local port, so
/// every socket of a session goes through here.
pub(crate) fn bind(local_addr: SocketAddr) -> Result<TcpSocket> {
    let s = match local_addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }?;

    s.set_reuseaddr(true)?;
    #[cfg(unix)]
    s.set_reuseport(true)?;
    s.bind(local_addr)?;

    Ok(s)
}

/// Hands a connection to the single-slot ready channel without waiting.
///
/// Returns false when the slot is taken or nobody listens any more; the
/// connection is dropped, which closes it.
pub(crate) fn publish<C>(ready: &Sender<C>, conn: C, from: &str) -> bool {
    match ready.try_send(conn) {
        Ok(()) => true,
        Err(_) => {
            log::warn!("closing {} connection, another one won", from);
            false
        }
    }
}

/// The tasks of one connect call, sharing one cancellation token.
pub(crate) struct Tasks {
    cancel: CancellationToken,
    set: JoinSet<()>,
}

impl Tasks {
    pub(crate) fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            set: JoinSet::new(),
        }
    }

    pub(crate) fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        log::trace!("start {}", name);
        self.set.spawn(async move {
            task.await;
            log::debug!("exit {}", name);
        });
    }

    /// Cancels every task and waits for all of them to finish.
    pub(crate) async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(r) = self.set.join_next().await {
            if let Err(e) = r {
                log::warn!("task failed: {}", e);
            }
        }
    }
}
