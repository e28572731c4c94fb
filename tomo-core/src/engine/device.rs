use crate::error::{Result, TomoError};
use std::process::Command;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use tracing::debug;

/// Exclusive handle on the accelerator used by the GPU engine.
///
/// Clones share one lock, so engines built from the same device never
/// overlap on it.
#[derive(Clone, Default)]
pub struct GpuDevice {
    reset: Option<Vec<String>>,
    lock: Arc<Mutex<()>>,
}

/// Held for the duration of one GPU run; releases the device on drop.
pub struct GpuGuard<'a> {
    _lock: MutexGuard<'a, ()>,
}

impl GpuDevice {
    pub fn new(reset: Option<Vec<String>>) -> Self {
        Self {
            reset: reset.filter(|c| !c.is_empty()),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Lock the device and clear its state.
    pub fn acquire(&self) -> Result<GpuGuard<'_>> {
        if self.is_busy() {
            debug!("gpu busy; waiting for the current run");
        }
        let lock = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(cmd) = &self.reset {
            let out = Command::new(&cmd[0]).args(&cmd[1..]).output()?;
            if !out.status.success() {
                return Err(TomoError::ExternalEngine {
                    output: format!(
                        "device reset `{}` failed: {}{}",
                        cmd.join(" "),
                        String::from_utf8_lossy(&out.stdout),
                        String::from_utf8_lossy(&out.stderr)
                    ),
                });
            }
        }
        debug!("gpu acquired");
        Ok(GpuGuard { _lock: lock })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.lock.try_lock(), Err(TryLockError::WouldBlock))
    }
}

impl Drop for GpuGuard<'_> {
    fn drop(&mut self) {
        debug!("gpu released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_scopes_the_lock() {
        let dev = GpuDevice::new(None);
        {
            let _g = dev.acquire().unwrap();
            assert!(dev.clone().is_busy());
        }
        assert!(!dev.is_busy());
    }

    #[cfg(unix)]
    #[test]
    fn failing_reset_is_reported() {
        let dev = GpuDevice::new(Some(vec!["false".to_string()]));
        assert!(matches!(
            dev.acquire(),
            Err(TomoError::ExternalEngine { .. })
        ));
        assert!(!dev.is_busy());
    }
}
