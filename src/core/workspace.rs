use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

/// Scratch directory owned by a single story run.
///
/// Everything a run writes (raw takes, processed segments, fetched sound
/// effects) lives below it. The directory is removed when the guard is closed
/// or dropped, whichever comes first; removal failures are only logged.
pub struct RunWorkspace {
    dir: Option<TempDir>,
    root: PathBuf,
    counter: AtomicUsize,
}

impl RunWorkspace {
    pub fn create_in(parent: impl AsRef<Path>) -> std::io::Result<Self> {
        let parent = parent.as_ref();
        std::fs::create_dir_all(parent)?;
        let dir = tempfile::Builder::new().prefix("run-").tempdir_in(parent)?;
        let root = dir.path().to_path_buf();
        std::fs::create_dir_all(root.join("sfx"))?;
        debug!("Created run workspace {:?}", root);
        Ok(Self {
            dir: Some(dir),
            root,
            counter: AtomicUsize::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn sfx_dir(&self) -> PathBuf {
        self.root.join("sfx")
    }

    /// A fresh file path inside the workspace, unique for this run.
    pub fn file(&self, stem: &str, extension: &str) -> PathBuf {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        self.root.join(format!("{}_{:04}.{}", stem, n, extension))
    }

    pub fn close(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("Removed run workspace {:?}", path),
                Err(e) => warn!("Failed to remove run workspace {:?}: {}", path, e),
            }
        }
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        self.cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_are_unique_and_removed_on_close() -> std::io::Result<()> {
        let parent = tempfile::tempdir()?;
        let workspace = RunWorkspace::create_in(parent.path())?;
        let root = workspace.path().to_path_buf();

        let a = workspace.file("raw", "mp3");
        let b = workspace.file("raw", "mp3");
        assert_ne!(a, b);
        assert!(a.starts_with(&root));
        assert!(workspace.sfx_dir().is_dir());

        std::fs::write(&a, b"data")?;
        workspace.close();
        assert!(!root.exists());
        Ok(())
    }

    #[test]
    fn test_drop_removes_directory() -> std::io::Result<()> {
        let parent = tempfile::tempdir()?;
        let root = {
            let workspace = RunWorkspace::create_in(parent.path())?;
            std::fs::write(workspace.file("fx", "mp3"), b"data")?;
            workspace.path().to_path_buf()
        };
        assert!(!root.exists());
        Ok(())
    }
}
