//! Key identities.
//!
//! A [`KeyId`] names a key by the kind of principal it belongs to, the
//! owner of that principal, and the principal itself. Key ids can be
//! embedded in free text (a PGP uid comment, a PEM header, a file) as a
//! parenthesised record and recovered from it, so the key store needs no
//! separate index.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::principal::Principal;

/// Errors produced while building or parsing key identities.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid key kind '{0}': expected one of ROOT, CELL, PARTICLE")]
    InvalidKeyKind(String),

    #[error("malformed key record: {0}")]
    MalformedRecord(String),

    #[error("malformed key description {description:?}: {reason}")]
    MalformedDescription {
        description: String,
        reason: String,
        #[source]
        cause: Option<Box<IdentityError>>,
    },

    #[error("unsupported principal for key issuance: {0}")]
    UnsupportedPrincipal(String),
}

impl IdentityError {
    fn malformed_description(description: &str, reason: &str) -> Self {
        Self::MalformedDescription {
            description: description.to_owned(),
            reason: reason.to_owned(),
            cause: None,
        }
    }
}

/// Kind of principal a key is issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyKind {
    Root,
    Cell,
    Particle,
}

impl KeyKind {
    /// Canonical upper-case name, as used in key records.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "ROOT",
            Self::Cell => "CELL",
            Self::Particle => "PARTICLE",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyKind {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ROOT" => Ok(Self::Root),
            "CELL" => Ok(Self::Cell),
            "PARTICLE" => Ok(Self::Particle),
            other => Err(IdentityError::InvalidKeyKind(other.to_owned())),
        }
    }
}

/// Structured form of a [`KeyId`].
///
/// Fields are optional so that a missing field is reported as
/// [`IdentityError::MalformedRecord`] instead of a generic decode error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Identity of a key: `(kind, owner, target)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "KeyRecord", into = "KeyRecord")]
pub struct KeyId {
    kind: KeyKind,
    owner: String,
    target: String,
}

impl KeyId {
    #[must_use]
    pub fn new(kind: KeyKind, owner: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            owner: owner.into(),
            target: target.into(),
        }
    }

    /// Build a key id from a textual kind.
    pub fn parse(kind: &str, owner: impl Into<String>, target: impl Into<String>) -> Result<Self, IdentityError> {
        Ok(Self::new(kind.parse()?, owner, target))
    }

    #[must_use]
    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Partial match: `None` accepts any value for that field.
    #[must_use]
    pub fn matches(&self, kind: Option<KeyKind>, owner: Option<&str>, target: Option<&str>) -> bool {
        kind.is_none_or(|k| k == self.kind)
            && owner.is_none_or(|o| o == self.owner)
            && target.is_none_or(|t| t == self.target)
    }

    #[must_use]
    pub fn serialize(&self) -> KeyRecord {
        KeyRecord {
            key_type: Some(self.kind.as_str().to_owned()),
            owner: Some(self.owner.clone()),
            target: Some(self.target.clone()),
        }
    }

    pub fn deserialize(record: KeyRecord) -> Result<Self, IdentityError> {
        let KeyRecord { key_type, owner, target } = record;
        let key_type = key_type.ok_or_else(|| IdentityError::MalformedRecord("missing key_type".into()))?;
        let owner = owner.ok_or_else(|| IdentityError::MalformedRecord("missing owner".into()))?;
        let target = target.ok_or_else(|| IdentityError::MalformedRecord("missing target".into()))?;
        let kind = key_type
            .parse()
            .map_err(|_| IdentityError::MalformedRecord(format!("unknown key_type '{key_type}'")))?;
        Ok(Self { kind, owner, target })
    }

    /// Render the key id as `({"key_type":..,"owner":..,"target":..})`.
    ///
    /// The record is JSON, so quotes and parentheses inside fields are
    /// escaped or enclosed and the outer delimiters stay unambiguous.
    #[must_use]
    pub fn to_description(&self) -> String {
        let record = serde_json::json!({
            "key_type": self.kind.as_str(),
            "owner": self.owner,
            "target": self.target,
        });
        format!("({record})")
    }

    /// Recover a key id from text containing `(<record>)`.
    ///
    /// Text before the first `(` and after the last `)` is ignored. The
    /// record may be JSON, a YAML block mapping, or a YAML flow mapping
    /// with or without braces.
    pub fn parse_description(description: &str) -> Result<Self, IdentityError> {
        let start = description
            .find('(')
            .ok_or_else(|| IdentityError::malformed_description(description, "missing '('"))?;
        let end = description
            .rfind(')')
            .ok_or_else(|| IdentityError::malformed_description(description, "missing ')'"))?;
        if end <= start {
            return Err(IdentityError::malformed_description(description, "')' precedes '('"));
        }

        parse_record(description[start + 1..end].trim())
            .and_then(Self::deserialize)
            .map_err(|cause| IdentityError::MalformedDescription {
                description: description.to_owned(),
                reason: "invalid key record".to_owned(),
                cause: Some(Box::new(cause)),
            })
    }

    /// Derive the key id issued for a registry principal.
    pub fn from_principal(principal: &Principal) -> Result<Self, IdentityError> {
        match principal {
            Principal::Uvn(uvn) => Ok(Self::new(KeyKind::Root, &uvn.owner.email, &uvn.name)),
            Principal::Cell(cell) => Ok(Self::new(KeyKind::Cell, &cell.owner.email, &cell.name)),
            Principal::Particle(particle) => {
                Ok(Self::new(KeyKind::Particle, &particle.owner.email, &particle.name))
            }
            other @ Principal::User(_) => Err(IdentityError::UnsupportedPrincipal(other.label())),
        }
    }
}

fn parse_record(body: &str) -> Result<KeyRecord, IdentityError> {
    if let Ok(record) = serde_json::from_str::<KeyRecord>(body) {
        return Ok(record);
    }
    if let Ok(record) = serde_yaml::from_str::<KeyRecord>(body) {
        return Ok(record);
    }
    let mapping = if body.starts_with('{') {
        body.to_owned()
    } else {
        format!("{{{body}}}")
    };
    serde_yaml::from_str::<KeyRecord>(&mapping).map_err(|e| IdentityError::MalformedRecord(e.to_string()))
}

impl TryFrom<KeyRecord> for KeyId {
    type Error = IdentityError;

    fn try_from(record: KeyRecord) -> Result<Self, Self::Error> {
        Self::deserialize(record)
    }
}

impl From<KeyId> for KeyRecord {
    fn from(id: KeyId) -> Self {
        id.serialize()
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.kind.as_str().to_ascii_lowercase(),
            self.owner,
            self.target
        )
    }
}
