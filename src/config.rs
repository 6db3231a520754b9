use std::time::Duration;

/// Settings for one [`Holepunch`](crate::tcp::Holepunch).
///
/// `local_port` 0 lets the OS choose; the chosen port is then used for the
/// listener, the relay connection and every peer dial.
#[derive(Debug, Clone)]
pub struct Config {
    pub relay_host: String,
    pub relay_port: u16,
    pub local_addr: String,
    pub local_port: u16,
    pub uid: String,

    /// Resend interval for `ConnRequest`.
    pub request_interval: Duration,
    /// Retry interval for holepunch dials.
    pub dial_interval: Duration,
    /// Timeout of a single outbound connect, relay included.
    pub dial_timeout: Duration,
    /// Dial attempts per reported peer address, `None` for unbounded.
    pub max_dial_attempts: Option<u32>,
    /// Overall deadline for `connect`, `None` to wait forever.
    pub connect_timeout: Option<Duration>,
}

impl Config {
    pub fn new<H, A, U>(
        relay_host: H,
        relay_port: u16,
        local_addr: A,
        local_port: u16,
        uid: U,
    ) -> Self
    where
        H: Into<String>,
        A: Into<String>,
        U: Into<String>,
    {
        Self {
            relay_host: relay_host.into(),
            relay_port,
            local_addr: local_addr.into(),
            local_port,
            uid: uid.into(),
            request_interval: Duration::from_secs(3),
            dial_interval: Duration::from_secs(2),
            dial_timeout: Duration::from_secs(5),
            max_dial_attempts: Some(30),
            connect_timeout: None,
        }
    }
}
