// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::path::{Path, PathBuf};

pub const SUBSYSTEM_CPU: &str = "cpu";
pub const SUBSYSTEM_CPUSET: &str = "cpuset";
pub const SUBSYSTEM_MEMORY: &str = "memory";

/// The controllers a [`V1fsManager`](crate::V1fsManager) replicates its
/// cgroup under.
pub const SUPPORTED_SUBSYSTEMS: [&str; 3] = [SUBSYSTEM_CPU, SUBSYSTEM_CPUSET, SUBSYSTEM_MEMORY];

/// A single cgroup knob together with its value.
///
/// This is a closed set: each variant knows its controller, its interface
/// file, and how to render its value, so supporting a new knob is a
/// compile-checked addition here rather than a runtime discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resource {
    /// CPU hardcap limit in usecs: allowed cpu time in a given period.
    CpuQuotaUs(i64),
    /// CPU period used for hardcapping, in usecs.
    CpuPeriodUs(u64),
    /// CPUs the tasks in the cgroup may run on, e.g. "0-4,6,8-10".
    CpusetCpus(String),
    /// Hard limit on memory usage in bytes.
    MemoryLimitBytes(u64),
}

impl Resource {
    pub fn subsystem(&self) -> &'static str {
        match self {
            Resource::CpuQuotaUs(_) | Resource::CpuPeriodUs(_) => SUBSYSTEM_CPU,
            Resource::CpusetCpus(_) => SUBSYSTEM_CPUSET,
            Resource::MemoryLimitBytes(_) => SUBSYSTEM_MEMORY,
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Resource::CpuQuotaUs(_) => "cpu.cfs_quota_us",
            Resource::CpuPeriodUs(_) => "cpu.cfs_period_us",
            Resource::CpusetCpus(_) => "cpuset.cpus",
            Resource::MemoryLimitBytes(_) => "memory.limit_in_bytes",
        }
    }

    /// The string written verbatim to the knob's interface file.
    pub fn value(&self) -> String {
        match self {
            Resource::CpuQuotaUs(v) => v.to_string(),
            Resource::CpuPeriodUs(v) => v.to_string(),
            Resource::CpusetCpus(v) => v.clone(),
            Resource::MemoryLimitBytes(v) => v.to_string(),
        }
    }

    /// The knob's interface file under the v1 hierarchy.
    pub fn v1fs_path(&self, base_path: &Path, cgroup_name: &str) -> PathBuf {
        v1fs_path(base_path, self.subsystem(), cgroup_name, self.file_name())
    }
}

/// The resource budget of one container. A zero value means "do not set";
/// non-zero values are written verbatim to the corresponding knob file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resources {
    pub cpu_quota_us: i64,
    pub cpu_period_us: u64,
    pub cpuset_cpus: String,
    pub memory_limit_bytes: u64,
}

impl Resources {
    /// Returns the knobs that are actually set, in declaration order.
    pub fn entries(&self) -> Vec<Resource> {
        let mut entries = Vec::new();
        if self.cpu_quota_us != 0 {
            entries.push(Resource::CpuQuotaUs(self.cpu_quota_us));
        }
        if self.cpu_period_us != 0 {
            entries.push(Resource::CpuPeriodUs(self.cpu_period_us));
        }
        if !self.cpuset_cpus.is_empty() {
            entries.push(Resource::CpusetCpus(self.cpuset_cpus.clone()));
        }
        if self.memory_limit_bytes != 0 {
            entries.push(Resource::MemoryLimitBytes(self.memory_limit_bytes));
        }
        entries
    }
}

/// Composes `<base>/<subsystem>/<cgroup_name>/<file_name>`.
pub fn v1fs_path(base_path: &Path, subsystem: &str, cgroup_name: &str, file_name: &str) -> PathBuf {
    base_path.join(subsystem).join(cgroup_name).join(file_name)
}
