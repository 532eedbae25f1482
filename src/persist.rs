//! On-disk persistence for resolve results and service IPs
//!
//! Two JSON artifacts live under the platform user-cache directory, in
//! `alicloud_httpdns/<account_id>/`. Writes go through a temp file plus
//! atomic rename (except on Windows, where a rename over an open reader is
//! not reliable), serialized by a file mutex. Save requests coalesce so at
//! most one background save task runs per store.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::CacheEntry;

const RESOLVE_CACHE_FILE: &str = "resolve_cache.json";
const SERVICE_IP_FILE: &str = "service_ips.json";

/// Persisted service IP pools older than this are ignored on load
const SERVICE_IP_MAX_AGE_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct ResolveCacheData {
    records: HashMap<String, CacheEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceIpCacheData {
    ips: Vec<String>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct SaveFlags {
    saving: bool,
    pending: bool,
}

/// Disk tier backing the cache manager
#[derive(Debug)]
pub(crate) struct DiskStore {
    dir: PathBuf,
    /// Serializes file writes and the rename; loads bypass it
    file_lock: Mutex<()>,
    save_flags: Mutex<SaveFlags>,
}

impl DiskStore {
    /// Open the store under the platform user-cache directory
    pub fn open(account_id: &str) -> io::Result<Self> {
        let base = dirs::cache_dir().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "user cache directory unavailable")
        })?;
        Self::open_at(base.join("alicloud_httpdns").join(account_id))
    }

    /// Open the store at an explicit directory, creating it if needed
    pub fn open_at(dir: PathBuf) -> io::Result<Self> {
        create_dir_0755(&dir)?;
        Ok(Self {
            dir,
            file_lock: Mutex::new(()),
            save_flags: Mutex::new(SaveFlags::default()),
        })
    }

    /// Read the resolve cache, keeping only entries inside their grace
    /// period; returns the surviving records and the dropped count
    ///
    /// A missing or unparsable file yields an empty cache; parse failures
    /// are logged, never fatal.
    pub fn load_resolve_cache(&self, threshold: Duration) -> (HashMap<String, CacheEntry>, usize) {
        let path = self.dir.join(RESOLVE_CACHE_FILE);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("cannot read resolve cache file: {err}");
                }
                return (HashMap::new(), 0);
            }
        };

        let data: ResolveCacheData = match serde_json::from_slice(&raw) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("cannot parse resolve cache file, starting empty: {err}");
                return (HashMap::new(), 0);
            }
        };

        let now = Utc::now();
        let total = data.records.len();
        let records: HashMap<String, CacheEntry> = data
            .records
            .into_iter()
            .filter(|(_, entry)| !entry.is_persist_expired_at(now, threshold))
            .collect();
        let dropped = total - records.len();
        (records, dropped)
    }

    /// Queue a background save of the resolve cache
    ///
    /// If a save is already running the request is coalesced into it; the
    /// worker re-snapshots the map before each write, so the final image on
    /// disk reflects at least the state at the time of the last request.
    pub fn schedule_resolve_save(
        self: &Arc<Self>,
        entries: &Arc<RwLock<HashMap<String, CacheEntry>>>,
    ) {
        {
            let mut flags = self.save_flags.lock().unwrap();
            if flags.saving {
                flags.pending = true;
                return;
            }
            flags.saving = true;
        }

        let store = Arc::clone(self);
        let entries = Arc::clone(entries);
        tokio::task::spawn_blocking(move || loop {
            store.save_resolve_cache_once(&entries);

            let mut flags = store.save_flags.lock().unwrap();
            if flags.pending {
                flags.pending = false;
                drop(flags);
                continue;
            }
            flags.saving = false;
            return;
        });
    }

    fn save_resolve_cache_once(&self, entries: &RwLock<HashMap<String, CacheEntry>>) {
        let records = entries.read().unwrap().clone();
        let data = ResolveCacheData { records };
        if let Err(err) = self.write_json(RESOLVE_CACHE_FILE, &data) {
            log::warn!("cannot save resolve cache: {err}");
        }
    }

    /// Load the persisted service IP pool; `None` when absent, unparsable,
    /// or older than 24 hours
    pub fn load_service_ips(&self) -> Option<(Vec<String>, DateTime<Utc>)> {
        let path = self.dir.join(SERVICE_IP_FILE);
        let raw = std::fs::read(path).ok()?;
        let data: ServiceIpCacheData = match serde_json::from_slice(&raw) {
            Ok(data) => data,
            Err(err) => {
                log::warn!("cannot parse service IP cache file: {err}");
                return None;
            }
        };

        if Utc::now().signed_duration_since(data.updated_at)
            > chrono::Duration::hours(SERVICE_IP_MAX_AGE_HOURS)
        {
            return None;
        }
        Some((data.ips, data.updated_at))
    }

    /// Write the service IP pool in the background with `updated_at = now`
    pub fn save_service_ips(self: &Arc<Self>, ips: Vec<String>) {
        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || {
            let data = ServiceIpCacheData {
                ips,
                updated_at: Utc::now(),
            };
            if let Err(err) = store.write_json(SERVICE_IP_FILE, &data) {
                log::warn!("cannot save service IPs: {err}");
            }
        });
    }

    fn write_json<T: Serialize>(&self, name: &str, data: &T) -> io::Result<()> {
        let payload = serde_json::to_vec(data)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

        let _guard = self.file_lock.lock().unwrap();
        let path = self.dir.join(name);

        if cfg!(windows) {
            // Renaming over a file another handle has open is not reliable
            // on Windows, so overwrite in place there.
            write_file_0600(&path, &payload)
        } else {
            let tmp = self.dir.join(format!("{name}.tmp"));
            write_file_0600(&tmp, &payload)?;
            std::fs::rename(&tmp, &path)
        }
    }

    #[cfg(test)]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn create_dir_0755(dir: &Path) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        std::fs::DirBuilder::new().recursive(true).mode(0o755).create(dir)
    }
    #[cfg(not(unix))]
    {
        std::fs::create_dir_all(dir)
    }
}

fn write_file_0600(path: &Path, payload: &[u8]) -> io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(payload)
}
