pub mod config;
pub mod key_id;
pub mod principal;

pub use config::AgentSettings;
pub use key_id::{IdentityError, KeyId, KeyKind, KeyRecord};
pub use principal::{CellRecord, ParticleRecord, Principal, UserRecord, UvnRecord};
