// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fileutil::{append_file, ensure_dir_exists, is_tmpfs, overwrite_file};

use crate::{Resources, SUBSYSTEM_CPUSET, SUPPORTED_SUBSYSTEMS};

/// The conventional mount point of the cgroup v1 hierarchy.
pub const DEFAULT_BASE_PATH: &str = "/sys/fs/cgroup/";

#[derive(Debug, thiserror::Error)]
pub enum CgroupError {
    #[error("cgroup name is empty")]
    EmptyName,
    #[error("cgroup {current:?} already created, cannot create {requested:?}")]
    NameTaken { current: String, requested: String },
    #[error("cgroup base path {0} is not a tmpfs directory")]
    NotTmpfs(PathBuf),
    #[error("cgroup has not been created")]
    NotCreated,
}

/// Manages one named cgroup replicated under each supported v1 controller:
/// `/sys/fs/cgroup/<controller>/<name>/`.
///
/// The lifetime of the kernel object is bounded by [`V1fsManager::create`]
/// and [`V1fsManager::destroy`].
#[derive(Debug)]
pub struct V1fsManager {
    base_path: PathBuf,
    cgroup_name: Option<String>,
}

impl V1fsManager {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            cgroup_name: None,
        }
    }

    pub fn cgroup_name(&self) -> Option<&str> {
        self.cgroup_name.as_deref()
    }

    /// Creates the named cgroup under every supported controller.
    ///
    /// Repeating the call with the same name is fine (the directories are
    /// created idempotently); asking a manager that already holds a name
    /// for a different one is an error.
    pub fn create(&mut self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(CgroupError::EmptyName.into());
        }
        if let Some(current) = &self.cgroup_name {
            if current != name {
                return Err(CgroupError::NameTaken {
                    current: current.clone(),
                    requested: name.to_owned(),
                }
                .into());
            }
        }
        if !self.base_path.is_dir() || !is_tmpfs(&self.base_path)? {
            return Err(CgroupError::NotTmpfs(self.base_path.clone()).into());
        }

        for subsystem in SUPPORTED_SUBSYSTEMS {
            ensure_dir_exists(&self.base_path.join(subsystem).join(name))?;
        }
        self.cgroup_name = Some(name.to_owned());

        // A v1 cpuset with empty cpuset.cpus or cpuset.mems refuses task
        // enrollment with ENOSPC. Seed both so apply() works first try.
        let cpuset_dir = self.subsystem_dir(SUBSYSTEM_CPUSET)?;
        overwrite_file(&cpuset_dir.join("cpuset.cpus"), "0")?;
        overwrite_file(&cpuset_dir.join("cpuset.mems"), "0")?;

        Ok(())
    }

    /// Enrolls `pid` into the cgroup under every supported controller.
    ///
    /// If no cgroup was created yet, one is created first under a random
    /// name.
    pub fn apply(&mut self, pid: i32) -> Result<()> {
        if self.cgroup_name.is_none() {
            let name = rand_cgroup_name();
            tracing::info!("No cgroup created yet; creating {}", name);
            self.create(&name)?;
        }
        for subsystem in SUPPORTED_SUBSYSTEMS {
            let procs_file = self.subsystem_dir(subsystem)?.join("cgroup.procs");
            append_file(&procs_file, &pid.to_string())
                .with_context(|| format!("Failed to enroll pid {} in {}", pid, subsystem))?;
        }
        Ok(())
    }

    /// Writes every knob of `res` that carries a non-zero value to its
    /// controller file. Zero-valued knobs are left untouched.
    pub fn set(&self, res: &Resources) -> Result<()> {
        let name = self.cgroup_name.as_ref().ok_or(CgroupError::NotCreated)?;
        for resource in res.entries() {
            let path = resource.v1fs_path(&self.base_path, name);
            overwrite_file(&path, &resource.value())
                .with_context(|| format!("Failed to set {:?}", resource))?;
        }
        Ok(())
    }

    /// Removes the cgroup from every supported controller, best-effort.
    ///
    /// Cgroup directories refuse unlink(2) on their interface files, so
    /// removal is a plain rmdir of the named directory followed by any
    /// intermediate path components, innermost first. Failures (e.g. tasks
    /// still alive) are logged and swallowed.
    pub fn destroy(&mut self) {
        let Some(name) = self.cgroup_name.take() else {
            return;
        };
        for subsystem in SUPPORTED_SUBSYSTEMS {
            let subsystem_root = self.base_path.join(subsystem);
            let mut dir = subsystem_root.join(&name);
            loop {
                if let Err(e) = std::fs::remove_dir(&dir) {
                    tracing::warn!("Failed to remove cgroup dir {}: {}", dir.display(), e);
                    break;
                }
                match dir.parent() {
                    Some(parent) if parent != subsystem_root => dir = parent.to_owned(),
                    _ => break,
                }
            }
        }
    }

    /// Returns `<base>/<subsystem>/<name>/`.
    fn subsystem_dir(&self, subsystem: &str) -> Result<PathBuf> {
        let name = self.cgroup_name.as_ref().ok_or(CgroupError::NotCreated)?;
        Ok(self.base_path.join(subsystem).join(name))
    }
}

/// Mints a random cgroup name of the form `hind_<uuid>`.
pub fn rand_cgroup_name() -> String {
    format!("hind_{}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::path::Path;

    use super::*;

    // A scratch base under /dev/shm passes the tmpfs probe without
    // privileges, so the full create/apply/set/destroy cycle is testable
    // against plain files.
    fn scratch_base() -> Option<tempfile::TempDir> {
        if !Path::new("/dev/shm").is_dir() {
            return None;
        }
        Some(
            tempfile::Builder::new()
                .prefix("cgroups-test.")
                .tempdir_in("/dev/shm")
                .expect("tempdir under /dev/shm"),
        )
    }

    #[test]
    fn create_replicates_name_and_seeds_cpuset() -> Result<()> {
        let Some(base) = scratch_base() else {
            return Ok(());
        };
        let mut manager = V1fsManager::new(base.path());
        manager.create("testgroup")?;

        for subsystem in SUPPORTED_SUBSYSTEMS {
            assert!(base.path().join(subsystem).join("testgroup").is_dir());
        }
        let cpuset = base.path().join("cpuset/testgroup");
        assert_eq!(std::fs::read_to_string(cpuset.join("cpuset.cpus"))?, "0");
        assert_eq!(std::fs::read_to_string(cpuset.join("cpuset.mems"))?, "0");
        Ok(())
    }

    #[test]
    fn create_twice_with_same_name_is_idempotent() -> Result<()> {
        let Some(base) = scratch_base() else {
            return Ok(());
        };
        let mut manager = V1fsManager::new(base.path());
        manager.create("testgroup")?;
        manager.create("testgroup")?;
        Ok(())
    }

    #[test]
    fn create_with_second_name_errors() {
        let mut manager = V1fsManager {
            base_path: PathBuf::from("/sys/fs/cgroup"),
            cgroup_name: Some("first".to_owned()),
        };
        let err = manager.create("second").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CgroupError>(),
            Some(CgroupError::NameTaken { .. })
        ));
    }

    #[test]
    fn create_with_empty_name_errors() {
        let mut manager = V1fsManager::new("/sys/fs/cgroup");
        let err = manager.create("").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CgroupError>(),
            Some(CgroupError::EmptyName)
        ));
    }

    #[test]
    fn apply_appends_pid_to_every_controller() -> Result<()> {
        let Some(base) = scratch_base() else {
            return Ok(());
        };
        let mut manager = V1fsManager::new(base.path());
        manager.create("testgroup")?;
        manager.apply(1234)?;
        manager.apply(5678)?;

        for subsystem in SUPPORTED_SUBSYSTEMS {
            let procs = base.path().join(subsystem).join("testgroup/cgroup.procs");
            assert_eq!(std::fs::read_to_string(procs)?, "1234\n5678\n");
        }
        Ok(())
    }

    #[test]
    fn apply_without_create_picks_a_random_name() -> Result<()> {
        let Some(base) = scratch_base() else {
            return Ok(());
        };
        let mut manager = V1fsManager::new(base.path());
        manager.apply(42)?;

        let name = manager.cgroup_name().expect("name set by apply");
        assert!(name.starts_with("hind_"), "name = {}", name);
        Ok(())
    }

    fn count_files_under(dir: &Path) -> usize {
        let mut count = 0;
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                count += count_files_under(&path);
            } else {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn set_with_all_zero_resources_writes_nothing() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let manager = V1fsManager {
            base_path: temp_dir.path().to_owned(),
            cgroup_name: Some("cg".to_owned()),
        };
        for subsystem in SUPPORTED_SUBSYSTEMS {
            std::fs::create_dir_all(temp_dir.path().join(subsystem).join("cg"))?;
        }

        manager.set(&Resources::default())?;
        assert_eq!(count_files_under(temp_dir.path()), 0);
        Ok(())
    }

    #[test]
    fn set_with_one_knob_writes_one_file() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let manager = V1fsManager {
            base_path: temp_dir.path().to_owned(),
            cgroup_name: Some("cg".to_owned()),
        };
        for subsystem in SUPPORTED_SUBSYSTEMS {
            std::fs::create_dir_all(temp_dir.path().join(subsystem).join("cg"))?;
        }

        manager.set(&Resources {
            memory_limit_bytes: 1048576,
            ..Default::default()
        })?;

        assert_eq!(count_files_under(temp_dir.path()), 1);
        let limit = temp_dir.path().join("memory/cg/memory.limit_in_bytes");
        assert_eq!(std::fs::read_to_string(limit)?, "1048576");
        Ok(())
    }

    #[test]
    fn set_without_create_errors() {
        let manager = V1fsManager::new("/sys/fs/cgroup");
        let err = manager.set(&Resources::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CgroupError>(),
            Some(CgroupError::NotCreated)
        ));
    }

    #[test]
    fn destroy_removes_nested_dirs_and_clears_name() -> Result<()> {
        let Some(base) = scratch_base() else {
            return Ok(());
        };
        let mut manager = V1fsManager::new(base.path());
        manager.create("hind_test/child")?;

        // A real cgroupfs drops its interface files on rmdir; the scratch
        // base keeps them as plain files, so clear them first.
        let cpuset = base.path().join("cpuset/hind_test/child");
        std::fs::remove_file(cpuset.join("cpuset.cpus"))?;
        std::fs::remove_file(cpuset.join("cpuset.mems"))?;

        manager.destroy();

        assert!(manager.cgroup_name().is_none());
        for subsystem in SUPPORTED_SUBSYSTEMS {
            assert!(!base.path().join(subsystem).join("hind_test").exists());
        }
        Ok(())
    }

    #[test]
    fn rand_cgroup_names_are_unique() {
        let names: HashSet<String> = (0..1023).map(|_| rand_cgroup_name()).collect();
        assert_eq!(names.len(), 1023);
        for name in &names {
            assert!(name.len() > 6, "name too short: {}", name);
        }
    }
}
