//!TCP hole punching through a rendezvous relay.
//!
//!Two hosts behind NAT can not accept inbound connections from each other. A public relay
//!observes the external endpoint of both, and tells each side where the other one is.
//!Both sides then dial each other at roughly the same time (simultaneous open), which opens the
//!NAT mapping for the other side's packets.
//!
//!## How it works
//![`tcp::Holepunch::connect`] binds one local port and uses it for everything:
//!
//!- a listener waiting for the peer to dial in,
//!- the relay connection, which carries `CreateSession` and repeated `ConnRequest`,
//!- the outbound dials to whatever address the relay reports in `InitHolepunch`.
//!
//!The first connection produced by either the listener or the dialer is returned, and every
//!other task is cancelled and joined before `connect` returns.
//!
//!The implementation depends on socket option SO_REUSE_ADDR and SO_REUSE_PORT, so it is OS depends.
//!The OS should allow a listening socket and connecting sockets bound to the same port.
//!
//!## Feature flags
//!- `env_logger`, `structopt`: the `holepunch` command line client.

pub mod config;
pub mod error;
pub mod peer;
pub mod proto;
pub mod tcp;

pub use config::Config;
pub use error::{Error, Result};
pub use peer::PeerAddress;
