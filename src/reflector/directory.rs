//! Reflector directory.
//!
//! Loads the M17 host file (JSON) from disk, keeps an address→designator
//! map and a per-slug module cache, and refreshes periodically. The session
//! core consumes only the read-only [`DirectoryLookup`] view.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Read-only lookups the session core needs from the directory.
pub trait DirectoryLookup: Send + Sync {
    /// Human designator (e.g. `M17-XYZ`) for a reflector address.
    fn lookup_designator(&self, addr: &str) -> Option<String>;

    /// Module letters available on the reflector identified by `slug`.
    fn fetch_modules(&self, slug: &str) -> Vec<String>;
}

/// One reflector as exposed on the HTTP directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReflectorInfo {
    pub designator: String,
    pub name: String,
    pub address: String,
    pub slug: String,
    pub legacy: bool,
}

#[derive(Debug, Deserialize)]
struct HostFile {
    #[serde(default)]
    reflectors: Vec<HostFileReflector>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct HostFileReflector {
    designator: String,
    name: String,
    ipv4: String,
    ipv6: String,
    domain: String,
    modules: String,
    port: u16,
    legacy: bool,
}

impl Default for HostFileReflector {
    fn default() -> Self {
        Self {
            designator: String::new(),
            name: String::new(),
            ipv4: String::new(),
            ipv6: String::new(),
            domain: String::new(),
            modules: String::new(),
            port: 0,
            legacy: false,
        }
    }
}

impl HostFileReflector {
    /// `host:port` with bracketed IPv6 literals; `None` without any host.
    fn address(&self) -> Option<String> {
        let host = if !self.ipv4.is_empty() {
            self.ipv4.clone()
        } else if !self.domain.is_empty() {
            self.domain.clone()
        } else if !self.ipv6.is_empty() {
            format!("[{}]", self.ipv6)
        } else {
            return None;
        };
        Some(format!("{}:{}", host, self.port))
    }

    fn module_letters(&self) -> Vec<String> {
        let mut mods: Vec<String> = self
            .modules
            .chars()
            .filter(char::is_ascii_uppercase)
            .map(String::from)
            .collect();
        mods.sort();
        mods
    }
}

#[derive(Default)]
struct DirectoryState {
    list: Vec<ReflectorInfo>,
    designators: HashMap<String, String>,
    modules: HashMap<String, Vec<String>>,
}

/// Host-file backed reflector directory.
pub struct DirectoryStore {
    host_file: Option<PathBuf>,
    state: RwLock<DirectoryState>,
    mod_time: Mutex<Option<SystemTime>>,
}

impl DirectoryStore {
    pub fn new(host_file: Option<PathBuf>) -> Self {
        if host_file.is_none() {
            warn!("no host file configured; reflector list will be empty");
        }
        Self {
            host_file,
            state: RwLock::new(DirectoryState::default()),
            mod_time: Mutex::new(None),
        }
    }

    /// Reload the host file when its modification time advanced.
    pub fn refresh(&self) -> Result<()> {
        let Some(path) = self.host_file.as_ref() else {
            return Ok(());
        };

        let meta = std::fs::metadata(path)?;
        let modified = meta.modified()?;
        {
            let last = self.mod_time.lock();
            if let Some(last) = *last {
                if modified <= last {
                    return Ok(());
                }
            }
        }

        let content = std::fs::read_to_string(path)?;
        let host_file: HostFile = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("invalid host file: {e}")))?;

        let mut next = DirectoryState::default();
        for r in &host_file.reflectors {
            let Some(addr) = r.address() else { continue };
            let slug = r.designator.to_lowercase();

            next.list.push(ReflectorInfo {
                designator: r.designator.clone(),
                name: r.name.clone(),
                address: addr.clone(),
                slug: slug.clone(),
                legacy: r.legacy,
            });
            next.designators.insert(addr, r.designator.clone());

            let mods = r.module_letters();
            if !mods.is_empty() {
                next.modules.insert(slug, mods);
            }
        }
        next.list.sort_by(|a, b| a.designator.cmp(&b.designator));

        let count = next.list.len();
        *self.state.write() = next;
        *self.mod_time.lock() = Some(modified);
        info!(count, "updated reflector list");
        Ok(())
    }

    /// Snapshot of the current directory listing.
    pub fn reflectors(&self) -> Vec<ReflectorInfo> {
        self.state.read().list.clone()
    }

    /// Load immediately, then refresh every `interval` until cancelled.
    pub fn spawn_refresh_task(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        if let Err(e) = self.refresh() {
            warn!(err = %e, "error loading host file");
        }

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await; // consume the immediate first tick
            loop {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if let Err(e) = self.refresh() {
                            warn!(err = %e, "error loading host file");
                        }
                    }
                }
            }
        })
    }
}

impl DirectoryLookup for DirectoryStore {
    fn lookup_designator(&self, addr: &str) -> Option<String> {
        self.state.read().designators.get(addr).cloned()
    }

    fn fetch_modules(&self, slug: &str) -> Vec<String> {
        self.state
            .read()
            .modules
            .get(slug)
            .cloned()
            .unwrap_or_default()
    }
}
