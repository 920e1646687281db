//! Command-line configuration.

use std::time::Duration;

use clap::Parser;

/// Configuration for a ring peer.
#[derive(Parser, Debug, Clone)]
#[command(name = "ringkv-node", about = "Chord-style ring key-value store peer")]
pub struct NodeConfig {
    /// TCP port to listen on (0 picks a free port).
    pub port: u16,

    /// IP of an existing ring member to join through.
    pub bootstrap_ip: Option<String>,

    /// Port of the bootstrap member.
    pub bootstrap_port: Option<u16>,

    /// Advertised IP. Defaults to the address of the active interface.
    #[arg(long)]
    pub host: Option<String>,

    /// Seconds between successor heartbeats.
    #[arg(long, default_value_t = 5.0)]
    pub heartbeat_interval_secs: f64,

    /// Seconds of predecessor silence before the pointer is cleared.
    #[arg(long, default_value_t = 15.0)]
    pub predecessor_timeout_secs: f64,
}

impl NodeConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.heartbeat_interval_secs)
            .unwrap_or(Duration::from_secs(5))
    }

    pub fn predecessor_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.predecessor_timeout_secs)
            .unwrap_or(Duration::from_secs(15))
    }

    /// The bootstrap endpoint, if one was given. Half a pair is an error.
    pub fn bootstrap(&self) -> anyhow::Result<Option<(String, u16)>> {
        match (&self.bootstrap_ip, self.bootstrap_port) {
            (Some(ip), Some(port)) => Ok(Some((ip.clone(), port))),
            (None, None) => Ok(None),
            _ => anyhow::bail!("bootstrap requires both an IP and a port"),
        }
    }
}

/// Find the IP of the active interface by "connecting" a UDP socket toward
/// a public address. No packet is sent; the OS just selects the source
/// address it would route from.
pub fn discover_local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = std::net::UdpSocket::bind("0.0.0.0:0")?;
        socket.connect(("8.8.8.8", 1))?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    probe().unwrap_or_else(|_| "127.0.0.1".to_string())
}
