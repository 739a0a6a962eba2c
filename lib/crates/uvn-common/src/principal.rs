//! Principal records of a uvn: the network root, its cells, its particles,
//! and the users that own them.

use serde::{Deserialize, Serialize};

/// A human or account that owns uvn objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
}

/// The network root authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UvnRecord {
    pub name: String,
    pub owner: UserRecord,
}

/// A node of the network running a full agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRecord {
    pub name: String,
    pub owner: UserRecord,
    /// Public address other cells use to reach this one, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Local networks (CIDR) this cell attaches to the uvn.
    #[serde(default)]
    pub allowed_lans: Vec<String>,
}

/// An end-user endpoint connecting into the network through a cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticleRecord {
    pub name: String,
    pub owner: UserRecord,
}

/// Any principal known to the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Uvn(UvnRecord),
    Cell(CellRecord),
    Particle(ParticleRecord),
    User(UserRecord),
}

impl Principal {
    /// Short human label used in diagnostics.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Uvn(u) => format!("uvn {}", u.name),
            Self::Cell(c) => format!("cell {}", c.name),
            Self::Particle(p) => format!("particle {}", p.name),
            Self::User(u) => format!("user {}", u.email),
        }
    }
}

impl From<UvnRecord> for Principal {
    fn from(value: UvnRecord) -> Self {
        Self::Uvn(value)
    }
}

impl From<CellRecord> for Principal {
    fn from(value: CellRecord) -> Self {
        Self::Cell(value)
    }
}

impl From<ParticleRecord> for Principal {
    fn from(value: ParticleRecord) -> Self {
        Self::Particle(value)
    }
}

impl From<UserRecord> for Principal {
    fn from(value: UserRecord) -> Self {
        Self::User(value)
    }
}
