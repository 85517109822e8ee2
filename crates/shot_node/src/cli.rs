//! Command-line arguments and console commands for the `shotnet` binary.

use std::path::PathBuf;

use clap::Parser;
use shot_network::{BootstrapPeer, NetworkConfig, NodeIdentity, PeerId};

/// Run a shotnet gossip node.
#[derive(Debug, Parser)]
#[command(name = "shotnet", version, about)]
pub struct Args {
    /// Node id advertised to the mesh. Random when omitted.
    #[arg(long)]
    pub id: Option<String>,

    /// Interface to listen on.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on. A random port in 50000-60000 when omitted.
    #[arg(long)]
    pub port: Option<u16>,

    /// JSON config file; command-line flags take precedence.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Peer to join through, as id@host:port. Repeatable.
    #[arg(long = "bootstrap", value_name = "ID@HOST:PORT")]
    pub bootstrap: Vec<BootstrapPeer>,

    /// Hop budget for messages this node originates.
    #[arg(long)]
    pub ttl: Option<u32>,

    /// Also write logs to a daily-rolling file in this directory.
    #[arg(long, value_name = "DIR")]
    pub log_dir: Option<PathBuf>,
}

impl Args {
    pub fn identity(&self) -> NodeIdentity {
        match &self.id {
            Some(id) => NodeIdentity::named(id.clone()),
            None => NodeIdentity::generate(),
        }
    }

    /// Config file (or defaults) with the command-line overrides applied.
    pub fn network_config(&self) -> NetworkConfig {
        let mut config = match &self.config {
            Some(path) => NetworkConfig::load_or_default(path),
            None => NetworkConfig::default(),
        };

        if let Some(host) = &self.host {
            config.listen_host = host.clone();
        }
        if self.port.is_some() {
            config.listen_port = self.port;
        }
        if let Some(ttl) = self.ttl {
            config.default_ttl = ttl;
        }
        for peer in &self.bootstrap {
            if !config.bootstrap_peers.contains(peer) {
                config.bootstrap_peers.push(peer.clone());
            }
        }
        config
    }
}

/// A line typed at the node console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Peers,
    Resources,
    Send { peer: PeerId, text: String },
    Share { resource_type: String, data: serde_json::Value },
    Quit,
    Chat(String),
    Empty,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Self::Empty);
        }
        if !line.starts_with('/') {
            return Ok(Self::Chat(line.to_string()));
        }

        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
        let rest = rest.trim();
        match command {
            "/peers" => Ok(Self::Peers),
            "/resources" => Ok(Self::Resources),
            "/quit" | "/exit" => Ok(Self::Quit),
            "/send" => {
                let (peer, text) = rest
                    .split_once(' ')
                    .ok_or_else(|| "usage: /send <peer> <text>".to_string())?;
                Ok(Self::Send {
                    peer: PeerId::from_string(peer),
                    text: text.trim().to_string(),
                })
            }
            "/share" => {
                let (resource_type, json) = rest.split_once(' ').unwrap_or((rest, "null"));
                if resource_type.is_empty() {
                    return Err("usage: /share <type> <json>".to_string());
                }
                let data = serde_json::from_str(json.trim())
                    .map_err(|e| format!("invalid JSON for /share: {e}"))?;
                Ok(Self::Share {
                    resource_type: resource_type.to_string(),
                    data,
                })
            }
            other => Err(format!("unknown command {other}")),
        }
    }
}
