//! Node Bootstrap Configuration
//!
//! Parses the command-line flags a node is started with and checks that they describe
//! a consistent cluster before anything is bound or spawned.

use super::types::NodeId;

use anyhow::{Context, Result, anyhow, bail};
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Offset between the UDP protocol port and the HTTP API port when `--http` is omitted.
pub const HTTP_PORT_OFFSET: u16 = 1000;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub local_id: NodeId,
    pub cluster_size: u32,
    /// Node that creates the token at bootstrap.
    pub initial_holder: NodeId,
    pub bind_addr: SocketAddr,
    pub peers: BTreeMap<NodeId, SocketAddr>,
    pub http_addr: Option<SocketAddr>,
    /// Number of demo jobs submitted right after startup.
    pub jobs: usize,
    pub verbose: bool,
}

impl ClusterConfig {
    /// Builds a configuration from flags (program name already stripped).
    ///
    /// Recognised flags: `--id`, `--size`, `--bind`, `--peer <id>=<addr>` (repeatable),
    /// `--holder`, `--http`, `--jobs`, `--verbose`. When `--size` is missing the cluster
    /// size is inferred as the number of peers plus one.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let mut local_id: Option<NodeId> = None;
        let mut cluster_size: Option<u32> = None;
        let mut initial_holder = NodeId(1);
        let mut bind_addr: Option<SocketAddr> = None;
        let mut peers = BTreeMap::new();
        let mut http_addr = None;
        let mut jobs = 0;
        let mut verbose = false;

        let mut i = 0;
        while i < args.len() {
            match args[i].as_str() {
                "--id" => {
                    local_id = Some(flag_value(args, i)?.parse().context("invalid --id")?);
                    i += 2;
                }
                "--size" => {
                    cluster_size = Some(flag_value(args, i)?.parse().context("invalid --size")?);
                    i += 2;
                }
                "--bind" => {
                    bind_addr = Some(flag_value(args, i)?.parse().context("invalid --bind")?);
                    i += 2;
                }
                "--peer" => {
                    let (id, addr) = parse_peer(flag_value(args, i)?)?;
                    if peers.insert(id, addr).is_some() {
                        bail!("peer {} given more than once", id);
                    }
                    i += 2;
                }
                "--holder" => {
                    initial_holder = flag_value(args, i)?.parse().context("invalid --holder")?;
                    i += 2;
                }
                "--http" => {
                    http_addr = Some(flag_value(args, i)?.parse().context("invalid --http")?);
                    i += 2;
                }
                "--jobs" => {
                    jobs = flag_value(args, i)?.parse().context("invalid --jobs")?;
                    i += 2;
                }
                "--verbose" => {
                    verbose = true;
                    i += 1;
                }
                other => {
                    tracing::warn!("Ignoring unknown argument {}", other);
                    i += 1;
                }
            }
        }

        let local_id = local_id.ok_or_else(|| anyhow!("--id is required"))?;
        let bind_addr = bind_addr.ok_or_else(|| anyhow!("--bind is required"))?;
        let cluster_size = cluster_size.unwrap_or(peers.len() as u32 + 1);

        let config = Self {
            local_id,
            cluster_size,
            initial_holder,
            bind_addr,
            peers,
            http_addr,
            jobs,
            verbose,
        };
        config.validate()?;

        Ok(config)
    }

    /// Checks that identities are in range and that every other member is reachable.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_size == 0 {
            bail!("cluster size must be at least 1");
        }
        if !self.local_id.is_member_of(self.cluster_size) {
            bail!(
                "local id {} is outside 1..={}",
                self.local_id.0,
                self.cluster_size
            );
        }
        if !self.initial_holder.is_member_of(self.cluster_size) {
            bail!(
                "initial holder {} is outside 1..={}",
                self.initial_holder.0,
                self.cluster_size
            );
        }

        for id in self.peers.keys() {
            if *id == self.local_id {
                bail!("peer list contains the local node {}", id);
            }
            if !id.is_member_of(self.cluster_size) {
                bail!("peer {} is outside 1..={}", id.0, self.cluster_size);
            }
        }

        for id in NodeId::all(self.cluster_size) {
            if id != self.local_id && !self.peers.contains_key(&id) {
                bail!("no address configured for {}", id);
            }
        }

        self.http_addr()?;

        Ok(())
    }

    pub fn is_initial_holder(&self) -> bool {
        self.local_id == self.initial_holder
    }

    /// HTTP API address: explicit `--http`, otherwise the bind address shifted by [`HTTP_PORT_OFFSET`].
    pub fn http_addr(&self) -> Result<SocketAddr> {
        if let Some(addr) = self.http_addr {
            return Ok(addr);
        }

        let port = self
            .bind_addr
            .port()
            .checked_add(HTTP_PORT_OFFSET)
            .ok_or_else(|| {
                anyhow!(
                    "bind port {} leaves no room for the HTTP port (+{}), pass --http",
                    self.bind_addr.port(),
                    HTTP_PORT_OFFSET
                )
            })?;

        Ok(SocketAddr::new(self.bind_addr.ip(), port))
    }
}

fn flag_value(args: &[String], i: usize) -> Result<&str> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| anyhow!("{} expects a value", args[i]))
}

/// Parses `<id>=<addr>`, e.g. `2=127.0.0.1:7002`.
fn parse_peer(value: &str) -> Result<(NodeId, SocketAddr)> {
    let (id, addr) = value
        .split_once('=')
        .ok_or_else(|| anyhow!("--peer expects <id>=<addr>, got {}", value))?;

    let id: NodeId = id.parse().context("invalid peer id")?;
    let addr: SocketAddr = addr.trim().parse().context("invalid peer address")?;

    Ok((id, addr))
}
