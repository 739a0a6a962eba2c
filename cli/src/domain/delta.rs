//! Differences between desired and realized state, as corrective actions.

use std::fmt;

use uvn_common::KeyId;

use crate::domain::state::{DesiredState, RealizedState, Route, digest};

/// Which parts of the node a convergence call may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceMode {
    /// Everything, including routes and interface state.
    Full,
    /// Key material and configuration files only; live state is left alone.
    ConfigOnly,
}

impl ConvergenceMode {
    #[must_use]
    pub fn includes(self, category: DeltaCategory) -> bool {
        match self {
            Self::Full => true,
            Self::ConfigOnly => matches!(category, DeltaCategory::Identity | DeltaCategory::Config),
        }
    }
}

impl fmt::Display for ConvergenceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::ConfigOnly => f.write_str("config-only"),
        }
    }
}

/// Priority class of a corrective action. Lower classes are applied first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeltaCategory {
    Identity,
    Config,
    Routing,
    DataPlane,
}

/// One corrective action.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeltaItem {
    InstallKey { id: KeyId, public_key: String },
    RemoveKey { id: KeyId },
    WriteConfig { interface: String, contents: String },
    RemoveConfig { interface: String },
    AddRoute(Route),
    DelRoute(Route),
    LinkUp { interface: String },
    LinkDown { interface: String },
}

impl DeltaItem {
    #[must_use]
    pub fn category(&self) -> DeltaCategory {
        match self {
            Self::InstallKey { .. } | Self::RemoveKey { .. } => DeltaCategory::Identity,
            Self::WriteConfig { .. } | Self::RemoveConfig { .. } => DeltaCategory::Config,
            Self::AddRoute(_) | Self::DelRoute(_) => DeltaCategory::Routing,
            Self::LinkUp { .. } | Self::LinkDown { .. } => DeltaCategory::DataPlane,
        }
    }
}

impl fmt::Display for DeltaItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InstallKey { id, .. } => write!(f, "install key {id}"),
            Self::RemoveKey { id } => write!(f, "remove key {id}"),
            Self::WriteConfig { interface, .. } => write!(f, "write config {interface}"),
            Self::RemoveConfig { interface } => write!(f, "remove config {interface}"),
            Self::AddRoute(route) => write!(f, "add route {route}"),
            Self::DelRoute(route) => write!(f, "delete route {route}"),
            Self::LinkUp { interface } => write!(f, "bring up {interface}"),
            Self::LinkDown { interface } => write!(f, "bring down {interface}"),
        }
    }
}

/// Compute the corrective actions that move `realized` towards `desired`.
///
/// The result is sorted by category, then by item, so that an identical
/// pair of states always yields the same sequence.
#[must_use]
pub fn compute_delta(
    desired: &DesiredState,
    realized: &RealizedState,
    mode: ConvergenceMode,
) -> Vec<DeltaItem> {
    let mut items = Vec::new();

    for (id, public_key) in &desired.keys {
        if realized.keys.get(id) != Some(public_key) {
            items.push(DeltaItem::InstallKey {
                id: id.clone(),
                public_key: public_key.clone(),
            });
        }
    }
    for id in realized.keys.keys().filter(|id| !desired.keys.contains_key(*id)) {
        items.push(DeltaItem::RemoveKey { id: id.clone() });
    }

    for (interface, contents) in &desired.configs {
        if realized.configs.get(interface) != Some(&digest(contents)) {
            items.push(DeltaItem::WriteConfig {
                interface: interface.clone(),
                contents: contents.clone(),
            });
        }
    }
    for interface in realized.configs.keys().filter(|i| !desired.configs.contains_key(*i)) {
        items.push(DeltaItem::RemoveConfig {
            interface: interface.clone(),
        });
    }

    if mode.includes(DeltaCategory::Routing) {
        items.extend(
            desired
                .routes
                .difference(&realized.routes)
                .cloned()
                .map(DeltaItem::AddRoute),
        );
        items.extend(
            realized
                .routes
                .difference(&desired.routes)
                .cloned()
                .map(DeltaItem::DelRoute),
        );
    }

    if mode.includes(DeltaCategory::DataPlane) {
        items.extend(
            desired
                .interfaces
                .difference(&realized.interfaces)
                .map(|i| DeltaItem::LinkUp { interface: i.clone() }),
        );
        items.extend(
            realized
                .interfaces
                .difference(&desired.interfaces)
                .map(|i| DeltaItem::LinkDown { interface: i.clone() }),
        );
    }

    items.sort_by(|a, b| a.category().cmp(&b.category()).then_with(|| a.cmp(b)));
    items
}

/// Leading items of a sorted delta that share its highest-priority category.
#[must_use]
pub fn next_batch(delta: &[DeltaItem]) -> &[DeltaItem] {
    let Some(first) = delta.first() else {
        return delta;
    };
    let category = first.category();
    let len = delta.iter().take_while(|i| i.category() == category).count();
    &delta[..len]
}
