//! Host services the engine depends on: the monotonic-seconds clock and
//! scoped network-namespace entry.

use std::fs::File;
use std::os::fd::AsFd;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context as _, Result};
use nix::sched::{CloneFlags, setns};
use tracing::warn;

/// Scoped netns entry: the previous namespace is restored when the guard
/// drops, on every exit path.
pub struct NetnsGuard {
    restore: Option<Box<dyn FnOnce()>>,
}

impl NetnsGuard {
    /// Guard for operations that never left the original namespace.
    pub fn none() -> Self {
        Self { restore: None }
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Some(restore) = self.restore.take() {
            restore();
        }
    }
}

pub trait Platform: Send + Sync {
    /// Free-running boot-anchored clock in whole seconds. All item
    /// timestamps and expiry checks use this clock, never wall time.
    fn monotonic_secs(&self) -> i64;

    /// Enter the interface's network namespace for the duration of the
    /// returned guard. A platform without a configured namespace returns
    /// a no-op guard.
    fn enter_netns(&self) -> Result<NetnsGuard>;
}

/// The real host: an `Instant`-anchored monotonic clock and optional
/// netns entry via `setns(2)`.
pub struct HostPlatform {
    anchor: Instant,
    netns: Option<PathBuf>,
}

impl HostPlatform {
    pub fn new() -> Self {
        Self {
            anchor: Instant::now(),
            netns: None,
        }
    }

    /// Run socket operations inside the namespace bound at `path`
    /// (e.g. `/run/netns/<name>`).
    pub fn with_netns(path: impl Into<PathBuf>) -> Self {
        Self {
            anchor: Instant::now(),
            netns: Some(path.into()),
        }
    }
}

impl Default for HostPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for HostPlatform {
    fn monotonic_secs(&self) -> i64 {
        self.anchor.elapsed().as_secs() as i64
    }

    fn enter_netns(&self) -> Result<NetnsGuard> {
        let Some(path) = &self.netns else {
            return Ok(NetnsGuard::none());
        };

        let previous = File::open("/proc/self/ns/net")
            .context("failed to open the current network namespace")?;
        let target = File::open(path)
            .with_context(|| format!("failed to open netns {}", path.display()))?;
        setns(target.as_fd(), CloneFlags::CLONE_NEWNET)
            .with_context(|| format!("failed to enter netns {}", path.display()))?;

        Ok(NetnsGuard {
            restore: Some(Box::new(move || {
                if let Err(err) = setns(previous.as_fd(), CloneFlags::CLONE_NEWNET) {
                    warn!("failed to restore the original network namespace: {err}");
                }
            })),
        })
    }
}
