use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use burnbin_common::Url;
use clap::Parser;

#[derive(Parser, Debug)]
#[clap(version, about = "Self-destructing paste server")]
pub struct Opts {
    /// Address to listen on.
    #[clap(long, env = "BURNBIN_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,
    /// Directory of the RocksDB database.
    #[clap(long, env = "BURNBIN_DATABASE", default_value = "database")]
    pub database: PathBuf,
    /// Keep pastes in memory only. They are lost on restart.
    #[clap(long, env = "BURNBIN_IN_MEMORY")]
    pub in_memory: bool,
    /// Base of the links handed out on creation. Defaults to the request's
    /// `Host` header.
    #[clap(long, env = "BURNBIN_PUBLIC_URL")]
    pub public_url: Option<Url>,
    /// Seconds between sweeps that delete unreadable pastes.
    #[clap(long = "reclaim-interval", env = "BURNBIN_RECLAIM_INTERVAL", default_value_t = 300)]
    pub reclaim_interval_secs: u64,
}

impl Opts {
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }
}
