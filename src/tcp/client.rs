use super::dial::{self, Dialer, ReuseDialer, Retry};
use super::{bind, listen, request, session, Tasks};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::proto;
use std::io::{self, ErrorKind::Other};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::{
    io::AsyncWriteExt,
    net::{lookup_host, TcpStream},
    select,
    sync::mpsc::{channel, Receiver, Sender},
    time::timeout,
};

/// Tcp hole punching client
///
/// Registers with the relay under `uid`, asks it to introduce a peer, and returns
/// whichever direct connection shows up first: one the peer opens to our listener,
/// or one we open to the address the relay reports.
///
/// # example
/// ```no_run
/// use holepunch::{tcp::Holepunch, Config};
///
/// # async fn run() -> holepunch::Result<()> {
/// let h = Holepunch::new(Config::new("relay.example.com", 9000, "0.0.0.0", 5000, "alice"))?;
/// let s = h.connect("bob").await?;
/// # Ok(())
/// # }
/// ```
pub struct Holepunch {
    config: Config,
    local_ip: Ipv4Addr,
}

impl Holepunch {
    pub fn new(config: Config) -> Result<Self> {
        let ip: IpAddr = config
            .local_addr
            .parse()
            .map_err(|_| Error::AddressResolution {
                addr: config.local_addr.clone(),
                reason: "not an ip address".into(),
            })?;

        let local_ip = match ip {
            IpAddr::V4(ip) => ip,
            ip => return Err(Error::UnsupportedAddress(ip)),
        };

        if config.uid.len() > u8::MAX as usize {
            return Err(Error::IdentifierTooLong {
                len: config.uid.len(),
            });
        }

        Ok(Self { config, local_ip })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connects to `peer_id` through the relay.
    ///
    /// With an empty `peer_id` no introduction is requested; the call waits until
    /// some peer gets introduced to us. Every task started here has exited by
    /// the time this returns.
    pub async fn connect(&self, peer_id: &str) -> Result<TcpStream> {
        proto::conn_request(peer_id)?;
        let relay_addr = self.resolve_relay().await?;

        let listener = bind(SocketAddr::new(self.local_ip.into(), self.config.local_port))
            .map_err(Error::Bind)?;
        let local_addr = listener.local_addr().map_err(Error::Bind)?;
        let listener = listener.listen(1024).map_err(Error::Bind)?;

        let mut tasks = Tasks::new();
        let (ready_tx, mut ready_rx) = channel(1);
        let cancel = tasks.token();
        tasks.spawn("listen", listen::run(listener, ready_tx.clone(), cancel));

        let (target_tx, target_rx) = channel(1);
        if !peer_id.is_empty() {
            let _ = target_tx.try_send(peer_id.to_owned());
        }

        let mut fatal_rx = match self
            .start_session(local_addr, relay_addr, &mut tasks, target_rx, ready_tx)
            .await
        {
            Ok(rx) => rx,
            Err(e) => {
                tasks.shutdown().await;
                return Err(e);
            }
        };

        let r = self.wait(&mut ready_rx, &mut fatal_rx).await;
        tasks.shutdown().await;

        if let Ok(ref s) = r {
            if let Ok(addr) = s.peer_addr() {
                log::info!("connected to peer {}", addr);
            }
        }
        r
    }

    async fn resolve_relay(&self) -> Result<SocketAddr> {
        let host = self.config.relay_host.as_str();
        let port = self.config.relay_port;
        let err = |reason: String| Error::AddressResolution {
            addr: format!("{}:{}", host, port),
            reason,
        };

        lookup_host((host, port))
            .await
            .map_err(|e| err(e.to_string()))?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| err("no ipv4 address".into()))
    }

    /// Dials the relay from the listen port, sends `CreateSession` and starts
    /// the relay session, request and holepunch tasks.
    ///
    /// Returns the channel on which those tasks report a terminal error. A
    /// malformed relay frame stops the session task but is not terminal.
    async fn start_session(
        &self,
        local_addr: SocketAddr,
        relay_addr: SocketAddr,
        tasks: &mut Tasks,
        targets: Receiver<String>,
        ready: Sender<TcpStream>,
    ) -> Result<Receiver<Error>> {
        let relay = ReuseDialer {
            local_addr,
            timeout: self.config.dial_timeout,
        }
        .dial(relay_addr)
        .await
        .map_err(|source| Error::Dial {
            addr: relay_addr.to_string(),
            source,
        })?;
        log::debug!("connected to relay {} from {}", relay_addr, local_addr);

        let (r, mut w) = relay.into_split();
        let hello = proto::create_session(&self.config.uid, self.local_ip, local_addr.port())?;
        w.write_all(&hello)
            .await
            .map_err(Error::RelayConnectionLost)?;
        w.flush().await.map_err(Error::RelayConnectionLost)?;

        let (fatal_tx, fatal_rx) = channel(2);
        let (ack_tx, ack_rx) = channel(1);
        let (peer_tx, peer_rx) = channel(8);

        {
            let fatal = fatal_tx.clone();
            let cancel = tasks.token();
            tasks.spawn("relay session", async move {
                match session::run(r, ack_tx, peer_tx, cancel).await {
                    Ok(()) => {}
                    // the peer may still connect, or be dialed from an earlier report
                    Err(e @ Error::Framing { .. }) => {
                        log::warn!("relay session ended: {}", e);
                    }
                    Err(e) => {
                        log::debug!("relay session ended: {}", e);
                        let _ = fatal.try_send(e);
                    }
                }
            });
        }

        {
            let fatal = fatal_tx;
            let cancel = tasks.token();
            let period = self.config.request_interval;
            tasks.spawn("conn request", async move {
                if let Err(e) = request::run(w, targets, ack_rx, period, cancel).await {
                    log::debug!("conn request ended: {}", e);
                    let _ = fatal.try_send(e);
                }
            });
        }

        let dialer = ReuseDialer {
            local_addr,
            timeout: self.config.dial_timeout,
        };
        let retry = Retry {
            interval: self.config.dial_interval,
            max_attempts: self.config.max_dial_attempts,
        };
        let cancel = tasks.token();
        tasks.spawn("holepunch", dial::run(dialer, peer_rx, ready, retry, cancel));

        Ok(fatal_rx)
    }

    /// First connection wins; a relay failure or the deadline ends the wait.
    async fn wait(
        &self,
        ready: &mut Receiver<TcpStream>,
        fatal: &mut Receiver<Error>,
    ) -> Result<TcpStream> {
        let race = async {
            select! {
                biased;
                Some(s) = ready.recv() => Ok(s),
                Some(e) = fatal.recv() => Err(e),
                else => Err(Error::Io(io::Error::new(Other, "every connection task exited"))),
            }
        };

        match self.config.connect_timeout {
            Some(t) => timeout(t, race).await.unwrap_or(Err(Error::Timeout(t))),
            None => race.await,
        }
    }
}
