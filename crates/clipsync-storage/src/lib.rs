//! Vault file capability + the scoped writer used to materialize clippings.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clipsync_core::VaultPath;
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    Skip,
    Replace,
}

/// How missing ancestor directories are created before a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DirectoryMode {
    /// One recursive create for the whole parent chain.
    #[default]
    Recursive,
    /// Each ancestor shallowest first, checking existence before every create.
    PerSegment,
}

#[derive(Debug, Error)]
#[error("unknown directory mode `{0}` (expected `recursive` or `per-segment`)")]
pub struct ParseDirectoryModeError(String);

impl FromStr for DirectoryMode {
    type Err = ParseDirectoryModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "recursive" => Ok(Self::Recursive),
            "per-segment" | "per_segment" | "segment" => Ok(Self::PerSegment),
            other => Err(ParseDirectoryModeError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Replaced,
    Skipped,
    Appended,
}

impl SaveOutcome {
    pub fn wrote(self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

/// Host file capability, addressed by vault-relative paths.
#[async_trait]
pub trait VaultFs: Send + Sync {
    async fn exists(&self, path: &VaultPath) -> Result<bool>;
    /// Creates a single directory; its parent must already exist.
    async fn mkdir(&self, path: &VaultPath) -> Result<()>;
    async fn mkdir_all(&self, path: &VaultPath) -> Result<()>;
    /// Creates a new file, failing if one is already present.
    async fn create(&self, path: &VaultPath, contents: &str) -> Result<()>;
    async fn read(&self, path: &VaultPath) -> Result<String>;
    /// Replaces the contents of an existing file.
    async fn modify(&self, path: &VaultPath, contents: &str) -> Result<()>;
}

/// `VaultFs` over a local directory using `tokio::fs`.
#[derive(Debug, Clone)]
pub struct LocalVault {
    root: PathBuf,
}

impl LocalVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn resolve(&self, path: &VaultPath) -> PathBuf {
        path.segments()
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

/// Writes `contents` to a hidden temp file next to `target`.
async fn write_temp_sibling(target: &Path, contents: &str) -> Result<PathBuf> {
    let parent = target
        .parent()
        .with_context(|| format!("{} has no parent directory", target.display()))?;
    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), contents.len()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp file {}", temp_path.display()))?;
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("writing temp file {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
    Ok(temp_path)
}

async fn write_new_file(target: &Path, contents: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(target)
        .await
        .with_context(|| format!("creating {}", target.display()))?;
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("writing {}", target.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing {}", target.display()))
}

#[async_trait]
impl VaultFs for LocalVault {
    async fn exists(&self, path: &VaultPath) -> Result<bool> {
        let target = self.resolve(path);
        fs::try_exists(&target)
            .await
            .with_context(|| format!("checking {}", target.display()))
    }

    async fn mkdir(&self, path: &VaultPath) -> Result<()> {
        let target = self.resolve(path);
        fs::create_dir(&target)
            .await
            .with_context(|| format!("creating directory {}", target.display()))
    }

    async fn mkdir_all(&self, path: &VaultPath) -> Result<()> {
        let target = self.resolve(path);
        fs::create_dir_all(&target)
            .await
            .with_context(|| format!("creating directory {}", target.display()))
    }

    /// Publishes a fully written temp file with a hard link so readers never
    /// see a partial file and an existing target is never clobbered.
    async fn create(&self, path: &VaultPath, contents: &str) -> Result<()> {
        let target = self.resolve(path);
        let temp_path = write_temp_sibling(&target, contents).await?;

        let linked = fs::hard_link(&temp_path, &target).await;
        let _ = fs::remove_file(&temp_path).await;
        match linked {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                Err(err).with_context(|| format!("{} already exists", target.display()))
            }
            // filesystems without hard links
            Err(_) => write_new_file(&target, contents).await,
        }
    }

    async fn read(&self, path: &VaultPath) -> Result<String> {
        let target = self.resolve(path);
        fs::read_to_string(&target)
            .await
            .with_context(|| format!("reading {}", target.display()))
    }

    async fn modify(&self, path: &VaultPath, contents: &str) -> Result<()> {
        let target = self.resolve(path);
        let temp_path = write_temp_sibling(&target, contents).await?;
        match fs::rename(&temp_path, &target).await {
            Ok(()) => Ok(()),
            Err(err) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(err).with_context(|| {
                    format!(
                        "atomically renaming {} -> {}",
                        temp_path.display(),
                        target.display()
                    )
                })
            }
        }
    }
}

/// Write capability consumed by the sync engine.
#[async_trait]
pub trait FileWriter: Send + Sync {
    async fn save_file(
        &self,
        path: &VaultPath,
        contents: &str,
        on_conflict: ConflictPolicy,
    ) -> Result<SaveOutcome>;

    /// Creates `path` with `header` when missing, then appends `entry`.
    async fn append_to_file(&self, path: &VaultPath, header: &str, entry: &str) -> Result<SaveOutcome>;
}

#[derive(Debug, Clone)]
pub struct ScopedWriter<F> {
    fs: F,
    directory_mode: DirectoryMode,
}

impl<F: VaultFs> ScopedWriter<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            directory_mode: DirectoryMode::default(),
        }
    }

    pub fn with_directory_mode(mut self, directory_mode: DirectoryMode) -> Self {
        self.directory_mode = directory_mode;
        self
    }

    pub fn fs(&self) -> &F {
        &self.fs
    }

    pub async fn ensure_parent_dirs(&self, path: &VaultPath) -> Result<()> {
        let Some(parent) = path.parent() else {
            return Ok(());
        };

        match self.directory_mode {
            DirectoryMode::Recursive => {
                if !self.fs.exists(&parent).await? {
                    self.fs.mkdir_all(&parent).await?;
                }
            }
            DirectoryMode::PerSegment => {
                for dir in path.ancestors_shallow_first() {
                    if !self.fs.exists(&dir).await? {
                        debug!(dir = %dir, "creating vault directory");
                        self.fs.mkdir(&dir).await?;
                    }
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<F: VaultFs> FileWriter for ScopedWriter<F> {
    async fn save_file(
        &self,
        path: &VaultPath,
        contents: &str,
        on_conflict: ConflictPolicy,
    ) -> Result<SaveOutcome> {
        self.ensure_parent_dirs(path).await?;

        if self.fs.exists(path).await? {
            return match on_conflict {
                ConflictPolicy::Skip => {
                    debug!(path = %path, "file exists; skipping");
                    Ok(SaveOutcome::Skipped)
                }
                ConflictPolicy::Replace => {
                    self.fs.modify(path, contents).await?;
                    Ok(SaveOutcome::Replaced)
                }
            };
        }

        self.fs.create(path, contents).await?;
        Ok(SaveOutcome::Created)
    }

    async fn append_to_file(&self, path: &VaultPath, header: &str, entry: &str) -> Result<SaveOutcome> {
        self.ensure_parent_dirs(path).await?;
        if !self.fs.exists(path).await? {
            self.fs.create(path, header).await?;
        }
        let mut contents = self.fs.read(path).await?;
        contents.push_str(entry);
        self.fs.modify(path, &contents).await?;
        Ok(SaveOutcome::Appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn vp(raw: &str) -> VaultPath {
        VaultPath::new(raw).expect("vault path")
    }

    /// Records every call before delegating to a real vault.
    struct RecordingFs {
        inner: LocalVault,
        calls: Mutex<Vec<String>>,
    }

    impl RecordingFs {
        fn new(inner: LocalVault) -> Self {
            Self {
                inner,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: String) {
            self.calls.lock().expect("calls lock").push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().expect("calls lock").clone()
        }
    }

    #[async_trait]
    impl VaultFs for RecordingFs {
        async fn exists(&self, path: &VaultPath) -> Result<bool> {
            self.record(format!("exists {path}"));
            self.inner.exists(path).await
        }
        async fn mkdir(&self, path: &VaultPath) -> Result<()> {
            self.record(format!("mkdir {path}"));
            self.inner.mkdir(path).await
        }
        async fn mkdir_all(&self, path: &VaultPath) -> Result<()> {
            self.record(format!("mkdir_all {path}"));
            self.inner.mkdir_all(path).await
        }
        async fn create(&self, path: &VaultPath, contents: &str) -> Result<()> {
            self.record(format!("create {path}"));
            self.inner.create(path, contents).await
        }
        async fn read(&self, path: &VaultPath) -> Result<String> {
            self.record(format!("read {path}"));
            self.inner.read(path).await
        }
        async fn modify(&self, path: &VaultPath, contents: &str) -> Result<()> {
            self.record(format!("modify {path}"));
            self.inner.modify(path, contents).await
        }
    }

    #[tokio::test]
    async fn save_creates_missing_directories_and_writes() {
        let dir = tempdir().expect("tempdir");
        let writer = ScopedWriter::new(LocalVault::new(dir.path()));
        let path = vp("Clippings/Twitter/alice/42.md");

        let outcome = writer
            .save_file(&path, "hello", ConflictPolicy::Skip)
            .await
            .expect("save");

        assert_eq!(outcome, SaveOutcome::Created);
        let on_disk = std::fs::read_to_string(dir.path().join("Clippings/Twitter/alice/42.md"))
            .expect("read back");
        assert_eq!(on_disk, "hello");
    }

    #[tokio::test]
    async fn skip_policy_leaves_existing_file_untouched() {
        let dir = tempdir().expect("tempdir");
        let writer = ScopedWriter::new(LocalVault::new(dir.path()));
        let path = vp("a/b.md");

        writer.save_file(&path, "first", ConflictPolicy::Skip).await.expect("first");
        let second = writer
            .save_file(&path, "second", ConflictPolicy::Skip)
            .await
            .expect("second");

        assert_eq!(second, SaveOutcome::Skipped);
        assert!(!second.wrote());
        assert_eq!(writer.fs().read(&path).await.expect("read"), "first");
    }

    #[tokio::test]
    async fn replace_policy_overwrites() {
        let dir = tempdir().expect("tempdir");
        let writer = ScopedWriter::new(LocalVault::new(dir.path()));
        let path = vp("a/b.md");

        writer.save_file(&path, "first", ConflictPolicy::Replace).await.expect("first");
        let second = writer
            .save_file(&path, "second", ConflictPolicy::Replace)
            .await
            .expect("second");

        assert_eq!(second, SaveOutcome::Replaced);
        assert_eq!(writer.fs().read(&path).await.expect("read"), "second");
    }

    #[tokio::test]
    async fn create_refuses_to_clobber_and_leaves_no_temp_files() {
        let dir = tempdir().expect("tempdir");
        let vault = LocalVault::new(dir.path());
        let path = vp("note.md");

        vault.create(&path, "one").await.expect("create");
        let err = vault.create(&path, "two").await.expect_err("second create fails");

        assert!(err.to_string().contains("already exists"));
        assert_eq!(vault.read(&path).await.expect("read"), "one");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn per_segment_mode_creates_each_ancestor_in_order() {
        let dir = tempdir().expect("tempdir");
        std::fs::create_dir(dir.path().join("base")).expect("pre-existing base");
        let writer = ScopedWriter::new(RecordingFs::new(LocalVault::new(dir.path())))
            .with_directory_mode(DirectoryMode::PerSegment);

        writer
            .save_file(&vp("base/Twitter/alice/42.md"), "x", ConflictPolicy::Skip)
            .await
            .expect("save");

        assert_eq!(
            writer.fs().calls(),
            vec![
                "exists base",
                "exists base/Twitter",
                "mkdir base/Twitter",
                "exists base/Twitter/alice",
                "mkdir base/Twitter/alice",
                "exists base/Twitter/alice/42.md",
                "create base/Twitter/alice/42.md",
            ]
        );
    }

    #[tokio::test]
    async fn recursive_mode_uses_single_create_call() {
        let dir = tempdir().expect("tempdir");
        let writer = ScopedWriter::new(RecordingFs::new(LocalVault::new(dir.path())));

        writer
            .save_file(&vp("x/y/z.md"), "x", ConflictPolicy::Skip)
            .await
            .expect("save");

        let calls = writer.fs().calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("mkdir")).count(), 1);
        assert!(calls.contains(&"mkdir_all x/y".to_string()));
    }

    #[tokio::test]
    async fn append_creates_header_once_then_appends_entries() {
        let dir = tempdir().expect("tempdir");
        let writer = ScopedWriter::new(LocalVault::new(dir.path()));
        let path = vp("Kindle Highlights/Book.md");

        writer
            .append_to_file(&path, "# Book\n## Highlights\n", "\nfirst\n")
            .await
            .expect("first append");
        let outcome = writer
            .append_to_file(&path, "# Book\n## Highlights\n", "\nsecond\n")
            .await
            .expect("second append");

        assert_eq!(outcome, SaveOutcome::Appended);
        assert_eq!(
            writer.fs().read(&path).await.expect("read"),
            "# Book\n## Highlights\n\nfirst\n\nsecond\n"
        );
    }

    #[test]
    fn directory_mode_parses_config_values() {
        assert_eq!("recursive".parse::<DirectoryMode>().ok(), Some(DirectoryMode::Recursive));
        assert_eq!("Per-Segment".parse::<DirectoryMode>().ok(), Some(DirectoryMode::PerSegment));
        assert!("sideways".parse::<DirectoryMode>().is_err());
    }
}
