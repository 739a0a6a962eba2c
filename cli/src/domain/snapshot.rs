//! Agent snapshot: the declared target configuration of one cell.
//!
//! Snapshots are parsed from `agent.yaml`, validated once, and never
//! mutated afterwards. A newer configuration always produces a new value.

use std::collections::BTreeSet;
use std::fmt;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uvn_common::{CellRecord, KeyId, KeyKind, ParticleRecord, UvnRecord};

use crate::domain::error::SnapshotError;

/// Version marker of a snapshot.
///
/// Ordered by `generation` first; two snapshots with equal versions are
/// treated as the same configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotVersion {
    pub generation: u64,
    pub registry_id: String,
}

impl fmt::Display for SnapshotVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.registry_id, self.generation)
    }
}

/// Public key material a cell must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyMaterial {
    pub id: KeyId,
    pub public_key: String,
}

/// A tunnel interface towards one peer (another cell or the uvn root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpnLink {
    pub interface: String,
    pub peer: String,
    /// Local address of the interface, in CIDR notation.
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
}

/// Declared configuration of one cell at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub version: SnapshotVersion,
    pub uvn: UvnRecord,
    /// Name of the cell this agent runs on.
    pub cell: String,
    #[serde(default)]
    pub cells: Vec<CellRecord>,
    #[serde(default)]
    pub particles: Vec<ParticleRecord>,
    #[serde(default)]
    pub keys: Vec<KeyMaterial>,
    #[serde(default)]
    pub links: Vec<VpnLink>,
}

impl AgentSnapshot {
    /// Parse and validate a snapshot document.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is malformed or the snapshot is invalid.
    pub fn from_yaml(text: &str) -> Result<Self> {
        let snapshot: Self = serde_yaml::from_str(text).context("parsing agent snapshot")?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Check the internal consistency of the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the first [`SnapshotError`] found.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.local_cell().is_none() {
            return Err(SnapshotError::UnknownLocalCell(self.cell.clone()));
        }
        let mut interfaces = BTreeSet::new();
        for link in &self.links {
            if !interfaces.insert(link.interface.as_str()) {
                return Err(SnapshotError::DuplicateInterface(link.interface.clone()));
            }
            if link.peer != self.uvn.name && self.find_cell(&link.peer).is_none() {
                return Err(SnapshotError::UnknownPeer {
                    interface: link.interface.clone(),
                    peer: link.peer.clone(),
                });
            }
            if self.peer_key(&link.peer).is_none() {
                return Err(SnapshotError::MissingPeerKey(link.peer.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn local_cell(&self) -> Option<&CellRecord> {
        self.find_cell(&self.cell)
    }

    #[must_use]
    pub fn find_cell(&self, name: &str) -> Option<&CellRecord> {
        self.cells.iter().find(|c| c.name == name)
    }

    /// Key material identifying a link peer: the root key for the uvn
    /// itself, the cell key otherwise.
    #[must_use]
    pub fn peer_key(&self, peer: &str) -> Option<&KeyMaterial> {
        let kind = if peer == self.uvn.name {
            KeyKind::Root
        } else {
            KeyKind::Cell
        };
        self.keys
            .iter()
            .find(|k| k.id.matches(Some(kind), None, Some(peer)))
    }

    /// Networks reachable through a link peer.
    #[must_use]
    pub fn peer_lans(&self, peer: &str) -> &[String] {
        self.find_cell(peer)
            .map(|c| c.allowed_lans.as_slice())
            .unwrap_or_default()
    }
}
