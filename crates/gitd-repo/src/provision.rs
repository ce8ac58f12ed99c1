//! On-demand bare repository provisioning.
//!
//! A repository path moves through three states: [`RepositoryState::Absent`],
//! [`RepositoryState::Creating`] while one caller holds the creation lock for
//! that path, and [`RepositoryState::Present`] once the initialized
//! repository has been renamed into place. Creation first claims the final
//! name with an empty directory, initializes in a hidden staging directory
//! next to it, then renames the staging directory over the claim. The final
//! path therefore holds nothing, the empty claim, or a complete repository,
//! and a directory created there by anyone else is never reinitialized.

use crate::path::RepositoryPath;
use crate::{RepoError, Result};
use git2::{Repository, RepositoryInitOptions};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Initial branch used when none is configured.
pub const DEFAULT_BRANCH: &str = "master";

/// Observed state of a repository path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryState {
    /// Nothing exists at the path.
    Absent,
    /// Another caller is initializing the repository.
    Creating,
    /// Something exists at the path.
    Present,
}

/// How a handle was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// This call initialized the repository.
    Created,
    /// The repository already existed and was validated.
    Opened,
}

/// A validated bare repository, ready for the transport to operate on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryHandle {
    path: PathBuf,
    provisioned: Provisioned,
}

impl RepositoryHandle {
    /// Absolute path of the bare repository.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this call created the repository.
    pub fn provisioned(&self) -> Provisioned {
        self.provisioned
    }

    /// Shorthand for `provisioned() == Provisioned::Created`.
    pub fn was_created(&self) -> bool {
        self.provisioned == Provisioned::Created
    }
}

/// Options applied to newly created repositories.
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    /// Branch HEAD points at in a fresh repository.
    pub default_branch: String,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            default_branch: DEFAULT_BRANCH.to_string(),
        }
    }
}

/// Ensures a bare repository exists at a [`RepositoryPath`].
///
/// Safe to share between threads. Creation of a given path is serialized;
/// different paths never wait on each other.
#[derive(Debug, Default)]
pub struct RepositoryProvisioner {
    options: ProvisionOptions,
    locks: PathLocks,
}

impl RepositoryProvisioner {
    /// Creates a provisioner with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a provisioner with the given options.
    pub fn with_options(options: ProvisionOptions) -> Self {
        Self {
            options,
            locks: PathLocks::default(),
        }
    }

    /// Reports the current state of a path.
    pub fn state(&self, path: &RepositoryPath) -> RepositoryState {
        if self.locks.is_held(path.absolute()) {
            RepositoryState::Creating
        } else if exists(path.absolute()) {
            RepositoryState::Present
        } else {
            RepositoryState::Absent
        }
    }

    /// Opens the repository at `path`, creating it first if nothing exists
    /// there.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::Provisioning`] if creation fails, or if the path
    /// holds something that is not a bare repository. Existing directories
    /// are never reinitialized.
    pub fn ensure(&self, path: &RepositoryPath) -> Result<RepositoryHandle> {
        let target = path.absolute();

        // A claim exists only while its creator holds the lock, so checking
        // the lock after seeing the path skips in-progress creations.
        if exists(target) && !self.locks.is_held(target) {
            return open_existing(target);
        }

        let _guard = self.locks.lock(target);
        if exists(target) {
            // Another caller finished creating it while we waited.
            return open_existing(target);
        }

        self.create(path)
    }

    fn create(&self, path: &RepositoryPath) -> Result<RepositoryHandle> {
        let target = path.absolute();
        let parent = target
            .parent()
            .ok_or_else(|| RepoError::provisioning(target, "path has no parent directory"))?;
        let file_name = target
            .file_name()
            .ok_or_else(|| RepoError::provisioning(target, "path has no file name"))?
            .to_string_lossy()
            .into_owned();

        let created_dirs = missing_ancestors(parent);
        if let Err(e) = fs::create_dir_all(parent) {
            remove_empty_dirs(&created_dirs);
            return Err(RepoError::provisioning(target, e));
        }

        // Claim the final name before initializing. `create_dir` is atomic,
        // so a directory placed there by anyone else is never replaced: we
        // fall back to opening it, which rejects it unless it is a bare
        // repository.
        match fs::create_dir(target) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %target.display(), "Path claimed elsewhere, opening");
                return open_existing(target);
            }
            Err(e) => {
                remove_empty_dirs(&created_dirs);
                return Err(RepoError::provisioning(target, e));
            }
        }

        let staging = parent.join(format!(
            ".{file_name}.{}.init",
            uuid::Uuid::new_v4().simple()
        ));

        match self.init_and_publish(&staging, target) {
            Ok(()) => {
                tracing::info!(
                    repository = %path,
                    path = %target.display(),
                    "Repository created"
                );
                Ok(RepositoryHandle {
                    path: target.to_path_buf(),
                    provisioned: Provisioned::Created,
                })
            }
            Err(reason) => {
                if staging.exists() {
                    if let Err(e) = fs::remove_dir_all(&staging) {
                        tracing::warn!(
                            path = %staging.display(),
                            error = %e,
                            "Failed to remove staging directory"
                        );
                    }
                }
                // Only succeeds while the claim is still the empty
                // directory created above.
                let _ = fs::remove_dir(target);
                remove_empty_dirs(&created_dirs);
                tracing::error!(repository = %path, error = %reason, "Repository creation failed");
                Err(RepoError::provisioning(target, reason))
            }
        }
    }

    /// Initializes into `staging` and renames it over the claimed, empty
    /// `target`. The rename fails if `target` gained any entries.
    fn init_and_publish(&self, staging: &Path, target: &Path) -> std::result::Result<(), String> {
        let mut opts = RepositoryInitOptions::new();
        opts.bare(true)
            .no_reinit(true)
            .mkdir(true)
            .mkpath(false)
            .initial_head(&self.options.default_branch);

        let repo = Repository::init_opts(staging, &opts)
            .map_err(|e| format!("git init failed: {}", e.message()))?;
        drop(repo);

        fs::rename(staging, target).map_err(|e| format!("failed to publish repository: {e}"))
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn open_existing(target: &Path) -> Result<RepositoryHandle> {
    if !target.is_dir() {
        return Err(RepoError::provisioning(target, "path exists but is not a directory"));
    }

    let repo = Repository::open_bare(target).map_err(|e| {
        tracing::warn!(
            path = %target.display(),
            error = %e.message(),
            "Existing directory is not a valid repository"
        );
        RepoError::provisioning(
            target,
            format!("existing directory is not a git repository: {}", e.message()),
        )
    })?;

    if !repo.is_bare() {
        return Err(RepoError::provisioning(target, "repository is not bare"));
    }

    tracing::debug!(path = %target.display(), "Opened repository");
    Ok(RepositoryHandle {
        path: target.to_path_buf(),
        provisioned: Provisioned::Opened,
    })
}

/// Ancestors of `dir` (including itself) that do not exist yet, deepest first.
fn missing_ancestors(dir: &Path) -> Vec<PathBuf> {
    dir.ancestors()
        .take_while(|p| !exists(p))
        .map(Path::to_path_buf)
        .collect()
}

/// Removes directories created for a failed attempt, deepest first.
/// Directories that another caller has filled in the meantime are kept.
fn remove_empty_dirs(dirs: &[PathBuf]) {
    for dir in dirs {
        if fs::remove_dir(dir).is_err() {
            break;
        }
    }
}

/// Paths currently being created.
///
/// A path is in the set exactly while one caller holds its creation lock;
/// waiters block on the condition variable until it is released.
#[derive(Debug, Default)]
struct PathLocks {
    creating: Mutex<HashSet<PathBuf>>,
    released: Condvar,
}

impl PathLocks {
    fn lock(&self, path: &Path) -> PathLockGuard<'_> {
        let mut creating = self.creating.lock();
        while creating.contains(path) {
            self.released.wait(&mut creating);
        }
        creating.insert(path.to_path_buf());

        PathLockGuard {
            locks: self,
            key: path.to_path_buf(),
        }
    }

    fn is_held(&self, path: &Path) -> bool {
        self.creating.lock().contains(path)
    }
}

struct PathLockGuard<'a> {
    locks: &'a PathLocks,
    key: PathBuf,
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        self.locks.creating.lock().remove(&self.key);
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::RepositoryRoot;
    use tempfile::TempDir;

    fn setup() -> (TempDir, RepositoryRoot) {
        let temp = TempDir::new().unwrap();
        let root = RepositoryRoot::prepare(temp.path()).unwrap();
        (temp, root)
    }

    #[test]
    fn test_creates_bare_repository() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        let path = root.sanitize("team/app").unwrap();

        assert_eq!(provisioner.state(&path), RepositoryState::Absent);
        let handle = provisioner.ensure(&path).unwrap();
        assert!(handle.was_created());
        assert_eq!(handle.path(), path.absolute());
        assert_eq!(provisioner.state(&path), RepositoryState::Present);

        let repo = Repository::open_bare(handle.path()).unwrap();
        assert!(repo.is_bare());
        assert!(repo.is_empty().unwrap());
    }

    #[test]
    fn test_second_call_opens_existing() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        let path = root.sanitize("app").unwrap();

        let first = provisioner.ensure(&path).unwrap();
        let second = provisioner.ensure(&path).unwrap();
        assert_eq!(first.provisioned(), Provisioned::Created);
        assert_eq!(second.provisioned(), Provisioned::Opened);
        assert_eq!(first.path(), second.path());
    }

    #[test]
    fn test_head_points_at_default_branch() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::with_options(ProvisionOptions {
            default_branch: "main".to_string(),
        });
        let handle = provisioner.ensure(&root.sanitize("app").unwrap()).unwrap();

        let head = fs::read_to_string(handle.path().join("HEAD")).unwrap();
        assert_eq!(head.trim(), "ref: refs/heads/main");
    }

    #[test]
    fn test_empty_directory_is_not_reinitialized() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        let path = root.sanitize("half").unwrap();
        fs::create_dir_all(path.absolute()).unwrap();

        let err = provisioner.ensure(&path).unwrap_err();
        assert!(matches!(err, RepoError::Provisioning { .. }));
        assert!(!path.absolute().join("HEAD").exists());
    }

    #[test]
    fn test_regular_file_is_rejected() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        let path = root.sanitize("file").unwrap();
        fs::write(path.absolute(), b"not a repo").unwrap();

        assert!(provisioner.ensure(&path).is_err());
    }

    #[test]
    fn test_failed_creation_leaves_nothing_behind() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        // A file where an intermediate directory is needed makes creation fail.
        fs::write(root.path().join("blocker"), b"").unwrap();
        let path = root.sanitize("blocker/inner/app").unwrap();

        assert!(provisioner.ensure(&path).is_err());
        let leftovers: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(leftovers, vec![std::ffi::OsString::from("blocker")]);
    }

    #[test]
    fn test_no_staging_directories_remain() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        provisioner.ensure(&root.sanitize("team/app").unwrap()).unwrap();

        let names: Vec<_> = fs::read_dir(root.path().join("team"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["app.git".to_string()]);
    }

    #[test]
    fn test_directory_appearing_before_claim_is_not_replaced() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        let path = root.sanitize("raced").unwrap();
        // Appears after the existence check in `ensure`, before the claim.
        fs::create_dir(path.absolute()).unwrap();
        fs::write(path.absolute().join("marker"), b"foreign").unwrap();

        let err = provisioner.create(&path).unwrap_err();
        assert!(matches!(err, RepoError::Provisioning { .. }));
        assert!(path.absolute().join("marker").exists());
        assert!(!path.absolute().join("HEAD").exists());

        let names: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("raced.git")]);
    }

    #[test]
    fn test_repository_appearing_before_claim_is_opened() {
        let (_temp, root) = setup();
        let provisioner = RepositoryProvisioner::new();
        let path = root.sanitize("raced").unwrap();
        Repository::init_bare(path.absolute()).unwrap();

        let handle = provisioner.create(&path).unwrap();
        assert_eq!(handle.provisioned(), Provisioned::Opened);
    }

    #[test]
    fn test_lock_table_is_emptied() {
        let locks = PathLocks::default();
        let path = Path::new("/srv/git/app.git");
        {
            let _guard = locks.lock(path);
            assert!(locks.is_held(path));
        }
        assert!(!locks.is_held(path));
    }
}
