//! Infrastructure implementation of the `NodeDriver` port for Linux cells.
//!
//! Key material and tunnel configuration live as files under the agent
//! root. Routes and interface state are read and changed with `ip` and
//! `wg-quick`. In config-only mode no command is ever run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tracing::{debug, warn};
use uvn_common::KeyId;

use crate::application::ports::{ActionStatus, CommandRunner, NodeDriver};
use crate::domain::state::digest;
use crate::domain::{
    ActionFailure, AgentSnapshot, ConvergenceMode, DeltaItem, RealizedState, Route,
};
use crate::infra::fs::{AgentRoot, remove_if_exists, write_atomic};

/// Prefix of every tunnel interface the agent manages.
pub const INTERFACE_PREFIX: &str = "uvn-";

pub struct LinuxNode<R> {
    root: AgentRoot,
    runner: R,
}

impl<R: CommandRunner> LinuxNode<R> {
    pub fn new(root: AgentRoot, runner: R) -> Self {
        Self { root, runner }
    }

    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<String, ActionFailure> {
        let output = self
            .runner
            .run(program, args)
            .await
            .map_err(|e| classify(&e))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(ActionFailure::Retryable(format!(
                "{program} {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    async fn observe_routes(&self, managed: &BTreeSet<String>) -> Result<BTreeSet<Route>, ActionFailure> {
        let listing = self.run_checked("ip", &["-o", "route", "show"]).await?;
        Ok(parse_routes(&listing)
            .into_iter()
            .filter(|r| managed.contains(&r.interface))
            .collect())
    }

    async fn link_is_up(&self, interface: &str) -> Result<bool, ActionFailure> {
        let output = self
            .runner
            .run("ip", &["-o", "link", "show", "dev", interface])
            .await
            .map_err(|e| classify(&e))?;
        Ok(output.status.success() && link_flags_up(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn observe_interfaces(&self, managed: &BTreeSet<String>) -> Result<BTreeSet<String>, ActionFailure> {
        let probes = managed.iter().map(|i| async move { (i, self.link_is_up(i).await) });
        let mut up = BTreeSet::new();
        for (interface, result) in join_all(probes).await {
            if result? {
                up.insert(interface.clone());
            }
        }
        Ok(up)
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, ActionFailure>
    where
        T: Send + 'static,
        F: FnOnce(AgentRoot) -> Result<T> + Send + 'static,
    {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || op(root))
            .await
            .map_err(|e| ActionFailure::Retryable(format!("node task failed: {e}")))?
            .map_err(|e| classify(&e))
    }
}

impl<R: CommandRunner> NodeDriver for LinuxNode<R> {
    async fn observe(
        &self,
        snapshot: &AgentSnapshot,
        mode: ConvergenceMode,
    ) -> Result<RealizedState, ActionFailure> {
        let (keys, configs) = self
            .blocking(|root| Ok((read_keys(&root.peers_dir())?, read_configs(&root.vpn_dir())?)))
            .await?;

        let mut realized = RealizedState {
            keys,
            configs,
            ..RealizedState::default()
        };
        if mode == ConvergenceMode::ConfigOnly {
            return Ok(realized);
        }

        let managed: BTreeSet<String> = snapshot
            .links
            .iter()
            .map(|l| l.interface.clone())
            .chain(realized.configs.keys().cloned())
            .collect();
        let (routes, interfaces) = tokio::join!(
            self.observe_routes(&managed),
            self.observe_interfaces(&managed)
        );
        realized.routes = routes?;
        realized.interfaces = interfaces?;
        Ok(realized)
    }

    async fn apply(
        &self,
        snapshot: &AgentSnapshot,
        item: &DeltaItem,
    ) -> Result<ActionStatus, ActionFailure> {
        debug!(version = %snapshot.version, action = %item, "applying");
        match item {
            DeltaItem::InstallKey { id, public_key } => {
                let contents = format!("{}\n{public_key}\n", id.to_description());
                let name = key_file_name(id);
                self.blocking(move |root| {
                    write_atomic(&root.peers_dir().join(name), contents.as_bytes(), 0o644)
                })
                .await?;
            }
            DeltaItem::RemoveKey { id } => {
                let name = key_file_name(id);
                self.blocking(move |root| remove_if_exists(&root.peers_dir().join(name)))
                    .await?;
            }
            DeltaItem::WriteConfig {
                interface,
                contents,
            } => {
                let path = self.root.config_file(interface);
                let contents = contents.clone();
                self.blocking(move |_| write_atomic(&path, contents.as_bytes(), 0o600))
                    .await?;
            }
            DeltaItem::RemoveConfig { interface } => {
                let path = self.root.config_file(interface);
                self.blocking(move |_| remove_if_exists(&path)).await?;
            }
            DeltaItem::AddRoute(route) => {
                self.run_checked(
                    "ip",
                    &["route", "replace", &route.subnet, "dev", &route.interface],
                )
                .await?;
            }
            DeltaItem::DelRoute(route) => {
                self.run_checked("ip", &["route", "del", &route.subnet, "dev", &route.interface])
                    .await?;
            }
            DeltaItem::LinkUp { interface } => {
                let config = self.root.config_file(interface);
                let config = config.to_string_lossy();
                self.run_checked("wg-quick", &["up", &config]).await?;
            }
            DeltaItem::LinkDown { interface } => {
                self.run_checked("ip", &["link", "delete", "dev", interface])
                    .await?;
            }
        }
        Ok(ActionStatus::Applied)
    }
}

/// Missing tooling or insufficient privileges will not fix themselves.
fn classify(err: &anyhow::Error) -> ActionFailure {
    let permanent = err.chain().any(|cause| {
        cause.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            )
        })
    });
    let reason = format!("{err:#}");
    if permanent {
        ActionFailure::Fatal(reason)
    } else {
        ActionFailure::Retryable(reason)
    }
}

/// File name of an installed peer key: the kind, then a digest of the
/// full description so that distinct ids never share a file.
fn key_file_name(id: &KeyId) -> String {
    format!(
        "{}-{}.pub",
        id.kind().as_str().to_ascii_lowercase(),
        digest(&id.to_description())
    )
}

fn read_keys(dir: &Path) -> Result<BTreeMap<KeyId, String>> {
    let mut keys = BTreeMap::new();
    for path in list_files(dir, "pub")? {
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("reading key file {}", path.display()))?;
        let mut lines = text.lines();
        let (Some(description), Some(public_key)) = (lines.next(), lines.next()) else {
            warn!(path = %path.display(), "ignoring truncated key file");
            continue;
        };
        match KeyId::parse_description(description) {
            Ok(id) => {
                keys.insert(id, public_key.trim().to_owned());
            }
            Err(e) => warn!(path = %path.display(), error = %e, "ignoring unrecognized key file"),
        }
    }
    Ok(keys)
}

fn read_configs(dir: &Path) -> Result<BTreeMap<String, String>> {
    let mut configs = BTreeMap::new();
    for path in list_files(dir, "conf")? {
        let Some(interface) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if !interface.starts_with(INTERFACE_PREFIX) {
            continue;
        }
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config {}", path.display()))?;
        configs.insert(interface.to_owned(), digest(&contents));
    }
    Ok(configs)
}

fn list_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("listing {}", dir.display())),
    };
    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("listing {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|e| e == extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse `ip -o route show` output into routes bound to a device.
fn parse_routes(listing: &str) -> Vec<Route> {
    listing
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            let subnet = words.next()?;
            let interface = words.skip_while(|w| *w != "dev").nth(1)?;
            Some(Route {
                subnet: subnet.to_owned(),
                interface: interface.to_owned(),
            })
        })
        .collect()
}

/// Whether an `ip -o link show` line carries the `UP` flag.
fn link_flags_up(line: &str) -> bool {
    line.split_once('<')
        .and_then(|(_, rest)| rest.split_once('>'))
        .is_some_and(|(flags, _)| flags.split(',').any(|f| f == "UP"))
}
