use holepunch::{tcp::Holepunch, Config};
use std::error::Error;
use std::time::Duration;
use structopt::StructOpt;
use tokio::io::{copy, split, stdin, stdout};

#[derive(StructOpt, Debug)]
#[structopt(name = "holepunch")]
struct Opt {
    #[structopt(long = "relay-host")]
    relay_host: String,

    #[structopt(long = "relay-port", default_value = "9000")]
    relay_port: u16,

    #[structopt(long = "local-addr", default_value = "0.0.0.0")]
    local_addr: String,

    #[structopt(long = "local-port", default_value = "0")]
    local_port: u16,

    #[structopt(long = "id")]
    id: String,

    /// Peer to connect to. Without it, wait for a peer to connect to us.
    #[structopt(long = "peer")]
    peer: Option<String>,

    /// Give up after this many seconds.
    #[structopt(long = "timeout")]
    timeout: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let opt: Opt = StructOpt::from_args();

    let mut config = Config::new(
        opt.relay_host,
        opt.relay_port,
        opt.local_addr,
        opt.local_port,
        opt.id,
    );
    config.connect_timeout = opt.timeout.map(Duration::from_secs);

    let h = Holepunch::new(config)?;
    let s = h.connect(opt.peer.as_deref().unwrap_or("")).await?;
    log::info!("peer connection {} -> {}", s.local_addr()?, s.peer_addr()?);

    let (mut r, mut w) = split(s);
    let (mut input, mut output) = (stdin(), stdout());
    tokio::select! {
        sent = copy(&mut input, &mut w) => { sent?; }
        received = copy(&mut r, &mut output) => { received?; }
    }

    Ok(())
}
