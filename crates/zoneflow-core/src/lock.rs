//! Per-zone working directory lock
//!
//! The provisioning tool keeps its state inside the zone directory, so two
//! processes must never operate on the same zone at once. A lock file is
//! created exclusively inside the zone directory for the duration of the
//! zone's operation.

use crate::error::{Result, ZoneflowError};
use crate::zone::Zone;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const LOCK_FILE: &str = ".zoneflow.lock";

/// Slack on top of the longest legitimate hold
const STALE_GRACE: Duration = Duration::from_secs(5 * 60);

/// Lock information
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
    /// Identifies the guard that wrote the file
    #[serde(default)]
    token: String,
}

/// Age after which a lock is considered abandoned.
///
/// A hold spans init plus one verb, each bounded by `zone_timeout`.
pub fn stale_after(zone_timeout: Duration) -> Duration {
    zone_timeout * 2 + STALE_GRACE
}

/// RAII guard for a zone lock
#[derive(Debug)]
pub struct ZoneLock {
    lock_path: PathBuf,
    token: String,
    released: bool,
}

impl ZoneLock {
    /// Acquire the lock for a zone, replacing one older than `stale_after`
    pub async fn acquire(zone: &Zone, stale_after: Duration) -> Result<Self> {
        let lock_path = zone.path.join(LOCK_FILE);

        match try_create(&lock_path).await {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        match read_lock(&lock_path).await {
            Some(info) => {
                let stale = (Utc::now() - info.acquired_at)
                    .to_std()
                    .is_ok_and(|age| age >= stale_after);
                if !stale {
                    return Err(ZoneflowError::Lock(format!(
                        "zone {} is locked by {} (pid {}) since {}",
                        zone.id, info.holder, info.pid, info.acquired_at
                    )));
                }
                tracing::warn!(zone = %zone.id, holder = %info.holder, "Removing stale zone lock");
            }
            None => {
                tracing::warn!(zone = %zone.id, "Removing unreadable zone lock");
            }
        }

        match fs::remove_file(&lock_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        try_create(&lock_path).await.map_err(|e| {
            if e.kind() == ErrorKind::AlreadyExists {
                ZoneflowError::Lock(format!("zone {} was locked concurrently", zone.id))
            } else {
                e.into()
            }
        })
    }

    /// Release the lock. A lock file taken over by another process is left alone.
    pub async fn release(mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            let owned = read_lock(&self.lock_path)
                .await
                .is_some_and(|info| info.token == self.token);
            if !owned {
                tracing::warn!("Zone lock {} is no longer ours", self.lock_path.display());
                return Ok(());
            }
            match fs::remove_file(&self.lock_path).await {
                Ok(()) => tracing::debug!("Released zone lock {}", self.lock_path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for ZoneLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let owned = std::fs::read_to_string(&self.lock_path)
            .ok()
            .and_then(|content| serde_json::from_str::<LockInfo>(&content).ok())
            .is_some_and(|info| info.token == self.token);
        if owned {
            let _ = std::fs::remove_file(&self.lock_path);
        }
    }
}

async fn try_create(lock_path: &Path) -> std::io::Result<ZoneLock> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(lock_path)
        .await?;

    let info = LockInfo {
        holder: std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("HOST"))
            .unwrap_or_else(|_| "unknown".to_string()),
        pid: std::process::id(),
        acquired_at: Utc::now(),
        token: format!("{:016x}", rand::random::<u64>()),
    };
    let content = serde_json::to_vec_pretty(&info)?;
    file.write_all(&content).await?;
    file.flush().await?;

    tracing::debug!("Acquired zone lock {}", lock_path.display());
    Ok(ZoneLock {
        lock_path: lock_path.to_path_buf(),
        token: info.token,
        released: false,
    })
}

async fn read_lock(lock_path: &Path) -> Option<LockInfo> {
    let content = fs::read_to_string(lock_path).await.ok()?;
    serde_json::from_str(&content).ok()
}
