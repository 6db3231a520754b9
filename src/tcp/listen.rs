use super::publish;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc::Sender,
};
use tokio_util::sync::CancellationToken;

/// Accepts at most one peer connection.
///
/// The listener is dropped on return, so anything still queued in its backlog
/// after cancellation is reset rather than left open.
pub(crate) async fn run(
    listener: TcpListener,
    ready: Sender<TcpStream>,
    cancel: CancellationToken,
) {
    if let Ok(addr) = listener.local_addr() {
        log::debug!("listening for peers at {}", addr);
    }

    select! {
        biased;
        _ = cancel.cancelled() => {}
        r = listener.accept() => match r {
            Ok((s, addr)) => {
                log::info!("accepted peer connection from {}", addr);
                publish(&ready, s, "inbound");
            }
            Err(e) => log::warn!("accept failed: {}", e),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{sync::mpsc::channel, task::spawn, time::timeout};

    #[tokio::test]
    async fn test_accept_publishes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = channel(1);
        let cancel = CancellationToken::new();
        let t = spawn(run(listener, tx, cancel.clone()));

        let c = TcpStream::connect(addr).await.unwrap();
        let s = rx.recv().await.unwrap();
        assert_eq!(s.peer_addr().unwrap(), c.local_addr().unwrap());

        timeout(Duration::from_secs(1), t).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_abandons_accept() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = channel(1);
        let cancel = CancellationToken::new();
        let t = spawn(run(listener, tx, cancel.clone()));

        cancel.cancel();
        timeout(Duration::from_secs(1), t).await.unwrap().unwrap();

        assert!(rx.recv().await.is_none());
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
