use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Interrupt state and in-flight scratch paths for one process.
///
/// Components that create temporary trees register them here so an
/// interrupt handler can remove whatever is left before the process exits.
#[derive(Clone, Debug)]
pub struct BackupContext {
    interrupt_flag: Arc<AtomicBool>,
    scratch_paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl BackupContext {
    pub fn new() -> Self {
        Self {
            interrupt_flag: Arc::new(AtomicBool::new(false)),
            scratch_paths: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Get the interrupt flag for signal handler setup
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt_flag.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt_flag.load(Ordering::SeqCst)
    }

    pub fn set_interrupted(&self, interrupted: bool) {
        self.interrupt_flag.store(interrupted, Ordering::SeqCst);
    }

    /// Track a scratch path until the returned guard completes or drops
    pub fn register_operation(&self, path: PathBuf) -> OperationGuard {
        if let Ok(mut paths) = self.scratch_paths.lock() {
            paths.insert(path.clone());
        }
        OperationGuard {
            path,
            context: self.clone(),
            completed: false,
        }
    }

    /// Snapshot of the paths currently tracked
    pub fn active_operations(&self) -> Vec<PathBuf> {
        self.scratch_paths
            .lock()
            .map(|paths| paths.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove every tracked path from disk and clear the registry
    pub fn cleanup_active_operations(&self) {
        for path in self.active_operations() {
            if !path.exists() {
                continue;
            }
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match removed {
                Ok(()) => info!(path = %path.display(), "removed scratch path"),
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove scratch path"),
            }
        }

        if let Ok(mut paths) = self.scratch_paths.lock() {
            paths.clear();
        }
    }

    fn unregister(&self, path: &Path) {
        if let Ok(mut paths) = self.scratch_paths.lock() {
            paths.remove(path);
        }
    }
}

impl Default for BackupContext {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII registration of a scratch path.
///
/// Dropping the guard unregisters the path unless an interrupt is pending, in
/// which case the path stays tracked for [`BackupContext::cleanup_active_operations`].
pub struct OperationGuard {
    path: PathBuf,
    context: BackupContext,
    completed: bool,
}

impl OperationGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The scratch path was disposed of normally
    pub fn complete(mut self) {
        self.context.unregister(&self.path);
        self.completed = true;
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        if !self.completed && !self.context.is_interrupted() {
            self.context.unregister(&self.path);
        }
    }
}
