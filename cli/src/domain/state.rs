//! Desired and realized node state.
//!
//! [`DesiredState`] is derived from a snapshot; [`RealizedState`] is what a
//! node driver observed. Both are plain ordered collections so that the
//! delta between them is deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};
use uvn_common::KeyId;

use crate::domain::snapshot::{AgentSnapshot, VpnLink};

/// A kernel route towards a uvn network through a tunnel interface.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route {
    pub subnet: String,
    pub interface: String,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} dev {}", self.subnet, self.interface)
    }
}

/// What the node should look like.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Key id → public key material.
    pub keys: BTreeMap<KeyId, String>,
    /// Interface name → rendered tunnel configuration.
    pub configs: BTreeMap<String, String>,
    pub routes: BTreeSet<Route>,
    /// Interfaces that must be up.
    pub interfaces: BTreeSet<String>,
}

impl DesiredState {
    #[must_use]
    pub fn from_snapshot(snapshot: &AgentSnapshot) -> Self {
        let keys = snapshot
            .keys
            .iter()
            .map(|k| (k.id.clone(), k.public_key.clone()))
            .collect();
        let configs = snapshot
            .links
            .iter()
            .map(|link| (link.interface.clone(), render_link_config(snapshot, link)))
            .collect();
        let routes = snapshot
            .links
            .iter()
            .flat_map(|link| {
                snapshot.peer_lans(&link.peer).iter().map(|lan| Route {
                    subnet: lan.clone(),
                    interface: link.interface.clone(),
                })
            })
            .collect();
        let interfaces = snapshot.links.iter().map(|l| l.interface.clone()).collect();
        Self {
            keys,
            configs,
            routes,
            interfaces,
        }
    }
}

/// What a node driver observed.
///
/// `routes` and `interfaces` stay empty when only configuration was
/// observed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealizedState {
    /// Key id → installed public key material.
    pub keys: BTreeMap<KeyId, String>,
    /// Interface name → SHA-256 of the installed configuration file.
    pub configs: BTreeMap<String, String>,
    pub routes: BTreeSet<Route>,
    /// Interfaces currently up.
    pub interfaces: BTreeSet<String>,
}

/// Render the tunnel configuration file of one link.
///
/// Private key material is owned by the tunnel backend and never rendered.
#[must_use]
pub fn render_link_config(snapshot: &AgentSnapshot, link: &VpnLink) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "# uvn {} / cell {} / {} -> {}",
        snapshot.uvn.name, snapshot.cell, link.interface, link.peer
    );
    let _ = writeln!(out, "# generation {}", snapshot.version);
    out.push_str("[Interface]\n");
    let _ = writeln!(out, "Address = {}", link.address);
    if let Some(port) = link.listen_port {
        let _ = writeln!(out, "ListenPort = {port}");
    }
    out.push_str("\n[Peer]\n");
    if let Some(key) = snapshot.peer_key(&link.peer) {
        let _ = writeln!(out, "# {}", key.id.to_description());
        let _ = writeln!(out, "PublicKey = {}", key.public_key);
    }
    if let Some(endpoint) = &link.endpoint {
        let _ = writeln!(out, "Endpoint = {endpoint}");
    }
    let lans = snapshot.peer_lans(&link.peer);
    if !lans.is_empty() {
        let _ = writeln!(out, "AllowedIPs = {}", lans.join(", "));
    }
    out
}

/// SHA-256 hex digest of a configuration file's contents.
#[must_use]
pub fn digest(contents: &str) -> String {
    hex_encode(&Sha256::digest(contents.as_bytes()))
}

/// Encode bytes as lowercase hex string.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(char::from(HEX[(b >> 4) as usize]));
        out.push(char::from(HEX[(b & 0xf) as usize]));
    }
    out
}
