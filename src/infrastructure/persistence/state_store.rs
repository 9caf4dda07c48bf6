//! JSON persistence of the discovery/scan aggregate.
//!
//! Saves go to a temporary sibling file that is renamed over the target, so
//! a failure at any point leaves the previous file intact. An OS advisory
//! lock on a sibling file keeps two invocations from interleaving
//! load-modify-save; the kernel drops it when the holder exits, however it
//! exits.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::StateConfig;
use crate::domain::cluster::State;
use crate::error::{StoreError, StoreResult};

/// Filesystem operations used by the stores.
pub trait StateFs: Send + Sync {
    /// `Ok(None)` when the file does not exist.
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OsFs;

impl StateFs for OsFs {
    fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(contents)?;
        file.sync_all()
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)?;
        sync_parent(to)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Flush the directory entry so a completed rename survives power loss.
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `contents` to a temp sibling and rename it over `path`.
pub(crate) fn write_atomic<F: StateFs + ?Sized>(
    fs: &F,
    path: &Path,
    contents: &[u8],
) -> StoreResult<()> {
    let temp = sibling(path, ".tmp");
    fs.write(&temp, contents).map_err(|source| StoreError::Write {
        path: temp.display().to_string(),
        source,
    })?;

    if let Err(source) = fs.rename(&temp, path) {
        if let Err(e) = fs.remove(&temp) {
            debug!(path = %temp.display(), error = %e, "could not remove temp file");
        }
        return Err(StoreError::Rename {
            from: temp.display().to_string(),
            to: path.display().to_string(),
            source,
        });
    }
    Ok(())
}

/// Held while a command owns the state file. The lock file itself stays on
/// disk; only the lock on it is released.
#[derive(Debug)]
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => debug!(lock = %self.path.display(), "state lock released"),
            Err(e) => warn!(lock = %self.path.display(), error = %e, "failed to release state lock"),
        }
    }
}

pub struct StateStore<F: StateFs = OsFs> {
    path: PathBuf,
    fs: F,
    max_attempts: u32,
    base_delay: Duration,
}

impl StateStore<OsFs> {
    pub fn new(path: impl Into<PathBuf>, config: &StateConfig) -> Self {
        Self::with_fs(path, OsFs, config)
    }
}

impl<F: StateFs> StateStore<F> {
    pub fn with_fs(path: impl Into<PathBuf>, fs: F, config: &StateConfig) -> Self {
        Self {
            path: path.into(),
            fs,
            max_attempts: config.save_max_attempts.max(1),
            base_delay: config.save_base_delay(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the advisory lock. Fails fast when a live invocation holds it; a
    /// lock file left behind by a killed process is simply reused.
    pub fn lock(&self) -> StoreResult<StateLock> {
        let path = sibling(&self.path, ".lock");
        let lock_name = path.display().to_string();
        let write_error = |source| StoreError::Write {
            path: lock_name.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(write_error)?;
        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(StoreError::Locked {
                    path: self.path.display().to_string(),
                    lock: lock_name.clone(),
                })
            }
            Err(TryLockError::Error(source)) => return Err(write_error(source)),
        }

        // The pid is informational only.
        file.set_len(0)
            .and_then(|()| writeln!(file, "{}", std::process::id()))
            .map_err(write_error)?;
        debug!(lock = %lock_name, "state lock acquired");
        Ok(StateLock { file, path })
    }

    /// A missing file is an empty state; malformed JSON is an error.
    pub fn load(&self) -> StoreResult<State> {
        let path = self.path.display().to_string();
        let Some(contents) = self
            .fs
            .read(&self.path)
            .map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?
        else {
            info!(path = %path, "no state file yet, starting empty");
            return Ok(State::default());
        };

        let state: State = serde_json::from_slice(&contents).map_err(|e| StoreError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        info!(
            path = %path,
            regions = state.regions.len(),
            clusters = state.cluster_count(),
            "loaded state"
        );
        Ok(state)
    }

    pub fn save(&self, state: &State) -> StoreResult<()> {
        let mut contents =
            serde_json::to_vec_pretty(state).map_err(|e| StoreError::Serialize {
                what: "state",
                message: e.to_string(),
            })?;
        contents.push(b'\n');
        write_atomic(&self.fs, &self.path, &contents)?;
        debug!(path = %self.path.display(), bytes = contents.len(), "state saved");
        Ok(())
    }

    /// `save` with exponential backoff between attempts.
    pub async fn save_with_retry(&self, state: &State) -> StoreResult<()> {
        let mut attempt = 0;
        loop {
            let err = match self.save(state) {
                Ok(()) => return Ok(()),
                Err(e @ StoreError::Serialize { .. }) => return Err(e),
                Err(e) => e,
            };
            attempt += 1;
            if attempt >= self.max_attempts {
                return Err(StoreError::RetriesExhausted {
                    path: self.path.display().to_string(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }
            let delay = self.base_delay * 2u32.saturating_pow(attempt - 1);
            warn!(attempt, delay_ms = delay.as_millis() as u64, error = %err, "state save failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::{DiscoveredCluster, Region};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Delegates to the OS but fails the first `failures` renames.
    struct FlakyRename {
        failures: AtomicU32,
    }

    impl FlakyRename {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
            }
        }
    }

    impl StateFs for FlakyRename {
        fn read(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
            OsFs.read(path)
        }

        fn write(&self, path: &Path, contents: &[u8]) -> io::Result<()> {
            OsFs.write(path, contents)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(io::Error::new(io::ErrorKind::Other, "injected rename failure"));
            }
            OsFs.rename(from, to)
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            OsFs.remove(path)
        }
    }

    fn state_with(region: &str, cluster: &str) -> State {
        let mut state = State::default();
        let mut r = Region::new(region);
        r.upsert_cluster(DiscoveredCluster {
            name: cluster.to_string(),
            arn: format!("arn:aws:kafka:{region}:123456789012:cluster/{cluster}/uuid"),
            region: region.to_string(),
            ..DiscoveredCluster::default()
        });
        state.upsert_region(r);
        state
    }

    fn config() -> StateConfig {
        StateConfig::default()
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), &config());
        assert_eq!(store.load().unwrap(), State::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, b"{\"Regions\": [").unwrap();
        let err = StateStore::new(&path, &config()).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), &config());
        let state = state_with("us-east-1", "orders");
        store.save(&state).unwrap();
        assert_eq!(store.load().unwrap(), state);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[test]
    fn test_failed_rename_keeps_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        StateStore::new(&path, &config())
            .save(&state_with("eu-west-1", "payments"))
            .unwrap();
        let before = fs::read(&path).unwrap();

        let flaky = StateStore::with_fs(&path, FlakyRename::new(1), &config());
        let err = flaky.save(&state_with("us-east-1", "orders")).unwrap_err();

        assert!(matches!(err, StoreError::Rename { .. }));
        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!dir.path().join("state.json.tmp").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_with_retry_backs_off() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let store = StateStore::with_fs(&path, FlakyRename::new(2), &config());

        let started = tokio::time::Instant::now();
        store.save_with_retry(&state_with("us-east-1", "orders")).await.unwrap();

        // 100ms then 200ms
        assert_eq!(started.elapsed(), Duration::from_millis(300));
        assert!(path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_save_with_retry_gives_up() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::with_fs(dir.path().join("state.json"), FlakyRename::new(10), &config());
        let err = store
            .save_with_retry(&state_with("us-east-1", "orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), &config());

        let held = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(StoreError::Locked { .. })));
        drop(held);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_lock_file_left_by_dead_owner_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"), &config());
        let lock_path = dir.path().join("state.json.lock");
        fs::write(&lock_path, b"4194303\n").unwrap();

        let held = store.lock().unwrap();

        assert_eq!(
            fs::read_to_string(&lock_path).unwrap(),
            format!("{}\n", std::process::id())
        );
        assert!(matches!(store.lock(), Err(StoreError::Locked { .. })));
        drop(held);
    }

    #[test]
    fn test_sync_parent_handles_bare_file_name() {
        assert!(sync_parent(Path::new("state.json")).is_ok());
        let dir = TempDir::new().unwrap();
        assert!(sync_parent(&dir.path().join("state.json")).is_ok());
    }
}
