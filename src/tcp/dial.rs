use super::{bind, publish};
use crate::peer::PeerAddress;
use std::future::Future;
use std::io::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::{
    net::TcpStream,
    select,
    sync::mpsc::{Receiver, Sender},
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

/// One outbound connection attempt.
pub(crate) trait Dialer: Send + Sync + 'static {
    type Conn: Send + 'static;

    fn dial(&self, addr: SocketAddr) -> impl Future<Output = Result<Self::Conn>> + Send;
}

/// Dials from the session's shared local port so the peer's simultaneous open
/// meets the same endpoint the relay observed.
pub(crate) struct ReuseDialer {
    pub(crate) local_addr: SocketAddr,
    pub(crate) timeout: Duration,
}

impl Dialer for ReuseDialer {
    type Conn = TcpStream;

    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream> {
        let s = bind(self.local_addr)?;
        timeout(self.timeout, s.connect(addr))
            .await
            .map_err(|_| Error::new(ErrorKind::TimedOut, "connect timed out"))?
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Retry {
    pub(crate) interval: Duration,
    /// Attempts per target before waiting for a newer address.
    pub(crate) max_attempts: Option<u32>,
}

enum Target {
    Idle,
    Targeting { peer: PeerAddress, attempts: u32 },
}

/// Dials the latest reported peer address until a connection is made.
///
/// Failed attempts are retried every `retry.interval` against the same target.
/// A newer address replaces the target, even mid-dial, and restarts the interval. The first
/// connection is published on `ready` and ends the task.
pub(crate) async fn run<D: Dialer>(
    dialer: D,
    mut peers: Receiver<PeerAddress>,
    ready: Sender<D::Conn>,
    retry: Retry,
    cancel: CancellationToken,
) {
    let mut target = Target::Idle;
    let mut ticker = interval_at(Instant::now() + retry.interval, retry.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut newer: Option<PeerAddress> = None;

    loop {
        let next = match newer.take() {
            Some(peer) => Some(peer),
            None => select! {
                biased;
                _ = cancel.cancelled() => return,
                Some(peer) = peers.recv() => Some(peer),
                _ = ticker.tick(), if matches!(target, Target::Targeting { .. }) => None,
            },
        };
        if let Some(peer) = next {
            log::debug!("holepunch target {}", peer);
            ticker.reset();
            target = Target::Targeting { peer, attempts: 0 };
        }

        let (peer, attempts) = match &mut target {
            Target::Targeting { peer, attempts } => {
                *attempts += 1;
                (*peer, *attempts)
            }
            Target::Idle => continue,
        };

        log::debug!("dial {} (attempt {})", peer, attempts);
        let r = select! {
            biased;
            _ = cancel.cancelled() => return,
            Some(next) = peers.recv() => {
                log::debug!("abandoning dial to {} for {}", peer, next);
                newer = Some(next);
                continue;
            }
            r = dialer.dial(peer.socket_addr()) => r,
        };

        match r {
            Ok(conn) => {
                log::info!("holepunch to {} succeeded", peer);
                publish(&ready, conn, "outbound");
                return;
            }
            Err(e) => {
                log::debug!("dial {} failed: {}", peer, e);
                if retry.max_attempts.is_some_and(|max| attempts >= max) {
                    log::warn!("giving up on {} after {} attempts", peer, attempts);
                    target = Target::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};
    use tokio::{
        sync::mpsc::channel,
        task::{spawn, JoinHandle},
        time::sleep,
    };

    const INTERVAL: Duration = Duration::from_secs(2);

    /// Fails the first `failures` dials, then succeeds with the attempt number.
    /// Dials to port `hang` never complete.
    #[derive(Clone, Default)]
    struct FakeDialer {
        failures: u32,
        hang: Option<u16>,
        calls: Arc<Mutex<Vec<(Instant, SocketAddr)>>>,
    }

    impl FakeDialer {
        fn calls(&self) -> Vec<(Instant, SocketAddr)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Dialer for FakeDialer {
        type Conn = usize;

        async fn dial(&self, addr: SocketAddr) -> Result<usize> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((Instant::now(), addr));
                calls.len()
            };
            if self.hang == Some(addr.port()) {
                return std::future::pending().await;
            }
            if n as u32 <= self.failures {
                Err(Error::new(ErrorKind::ConnectionRefused, "refused"))
            } else {
                Ok(n)
            }
        }
    }

    fn peer(port: u16) -> PeerAddress {
        PeerAddress::v4(Ipv4Addr::new(203, 0, 113, 9), port)
    }

    fn start(
        dialer: FakeDialer,
        max_attempts: Option<u32>,
    ) -> (
        Sender<PeerAddress>,
        Receiver<usize>,
        CancellationToken,
        JoinHandle<()>,
    ) {
        let (peer_tx, peer_rx) = channel(4);
        let (ready_tx, ready_rx) = channel(1);
        let cancel = CancellationToken::new();
        let retry = Retry {
            interval: INTERVAL,
            max_attempts,
        };
        let t = spawn(run(dialer, peer_rx, ready_tx, retry, cancel.clone()));
        (peer_tx, ready_rx, cancel, t)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        const N: u32 = 4;
        let dialer = FakeDialer {
            failures: N,
            ..Default::default()
        };
        let (peer_tx, mut ready_rx, _cancel, t) = start(dialer.clone(), None);

        let t0 = Instant::now();
        peer_tx.send(peer(4000)).await.unwrap();

        assert_eq!(ready_rx.recv().await, Some(N as usize + 1));
        t.await.unwrap();

        let calls = dialer.calls();
        assert_eq!(calls.len(), N as usize + 1);
        for (i, (at, addr)) in calls.iter().enumerate() {
            assert_eq!(*at - t0, INTERVAL * i as u32);
            assert_eq!(*addr, peer(4000).socket_addr());
        }

        sleep(INTERVAL * 10).await;
        assert_eq!(dialer.calls().len(), N as usize + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_address_supersedes() {
        let dialer = FakeDialer {
            failures: 3,
            ..Default::default()
        };
        let (peer_tx, mut ready_rx, _cancel, t) = start(dialer.clone(), None);

        peer_tx.send(peer(4000)).await.unwrap();
        sleep(INTERVAL + Duration::from_millis(500)).await;
        let t1 = Instant::now();
        peer_tx.send(peer(5000)).await.unwrap();

        assert_eq!(ready_rx.recv().await, Some(4));
        t.await.unwrap();

        let calls = dialer.calls();
        assert_eq!(calls[0].1, peer(4000).socket_addr());
        assert_eq!(calls[1].1, peer(4000).socket_addr());
        assert_eq!(calls[2], (t1, peer(5000).socket_addr()));
        assert_eq!(calls[3], (t1 + INTERVAL, peer(5000).socket_addr()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_newer_address_interrupts_dial() {
        let dialer = FakeDialer {
            hang: Some(4000),
            ..Default::default()
        };
        let (peer_tx, mut ready_rx, _cancel, t) = start(dialer.clone(), None);

        peer_tx.send(peer(4000)).await.unwrap();
        sleep(INTERVAL * 3).await;
        let t1 = Instant::now();
        peer_tx.send(peer(5000)).await.unwrap();

        assert_eq!(ready_rx.recv().await, Some(2));
        t.await.unwrap();

        let calls = dialer.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1], (t1, peer(5000).socket_addr()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let dialer = FakeDialer {
            failures: u32::MAX,
            ..Default::default()
        };
        let (peer_tx, _ready_rx, cancel, t) = start(dialer.clone(), Some(3));

        peer_tx.send(peer(4000)).await.unwrap();
        sleep(INTERVAL * 10).await;
        assert_eq!(dialer.calls().len(), 3);

        // a fresh address gets a fresh budget
        peer_tx.send(peer(5000)).await.unwrap();
        sleep(INTERVAL * 10).await;
        assert_eq!(dialer.calls().len(), 6);

        cancel.cancel();
        t.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_retries() {
        let dialer = FakeDialer {
            failures: u32::MAX,
            ..Default::default()
        };
        let (peer_tx, mut ready_rx, cancel, t) = start(dialer.clone(), None);

        peer_tx.send(peer(4000)).await.unwrap();
        sleep(INTERVAL * 2).await;
        cancel.cancel();
        t.await.unwrap();

        let n = dialer.calls().len();
        sleep(INTERVAL * 5).await;
        assert_eq!(dialer.calls().len(), n);
        assert_eq!(ready_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_reuse_dialer_connects_from_local_port() {
        let listener = bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let local_addr = listener.local_addr().unwrap();
        let _listener = listener.listen(10).unwrap();

        let remote = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dialer = ReuseDialer {
            local_addr,
            timeout: Duration::from_secs(1),
        };
        let s = dialer.dial(remote.local_addr().unwrap()).await.unwrap();
        let (_, from) = remote.accept().await.unwrap();
        assert_eq!(from, s.local_addr().unwrap());
        assert_eq!(from.port(), local_addr.port());
    }
}
