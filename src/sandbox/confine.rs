//! OS-level confinement for demo processes.
//!
//! - **Linux**: Landlock (kernel 5.13+) limits the filesystem to read-only
//!   system paths plus the private context directory. TCP bind and connect
//!   are denied where the kernel supports it (ABI v4, kernel 6.7+).
//!   `setrlimit` caps processes, address space and open files.
//! - **Unix**: the child leads its own process group, and the whole group is
//!   killed when the run ends.
//! - **Other**: only the direct child is killed.

#![allow(unsafe_code)]

use std::path::Path;

use tokio::process::{Child, Command};

/// Paths a demo may read and execute from.
#[cfg(target_os = "linux")]
const SYSTEM_READ_PATHS: &[&str] = &["/bin", "/sbin", "/usr", "/lib", "/lib32", "/lib64", "/etc"];

/// Device files a demo may read and write.
#[cfg(target_os = "linux")]
const DEVICE_PATHS: &[&str] = &["/dev/null", "/dev/zero", "/dev/urandom"];

/// Resource limits for a demo process.
///
/// `max_processes` is `RLIMIT_NPROC`, which Linux counts per UID rather than
/// per process tree, so it must leave room for everything else the user runs.
/// `max_memory_bytes` is virtual address space (`RLIMIT_AS`), not RSS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_processes: u64,
    pub max_memory_bytes: u64,
    pub max_open_files: u64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_processes: 1024,
            max_memory_bytes: 4 * 1024 * 1024 * 1024,
            max_open_files: 256,
        }
    }
}

/// Whether the kernel can enforce filesystem confinement.
pub fn filesystem_confinement_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        use landlock::{Access, AccessFs, CompatLevel, Compatible, Ruleset, RulesetAttr, ABI};

        Ruleset::default()
            .set_compatibility(CompatLevel::HardRequirement)
            .handle_access(AccessFs::from_all(ABI::V1))
            .and_then(|ruleset| ruleset.create())
            .is_ok()
    }
    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Configure `cmd` so the child runs confined to `context`.
///
/// `program` is the runner; when it is an absolute path its directory is made
/// readable too.
pub fn confine(cmd: &mut Command, context: &Path, program: &str, limits: ResourceLimits) {
    #[cfg(unix)]
    cmd.process_group(0);

    #[cfg(target_os = "linux")]
    {
        let mut prepared = Some(landlock_rules::prepare(context, program));
        // SAFETY: pre_exec runs between fork() and exec(). The closure only
        // makes Landlock and setrlimit syscalls on descriptors opened before
        // the fork. Error paths may allocate, which is acceptable since the
        // child then never execs.
        unsafe {
            cmd.pre_exec(move || {
                let rules = prepared
                    .take()
                    .ok_or_else(|| std::io::Error::other("confinement applied twice"))?;
                landlock_rules::enforce(rules).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::PermissionDenied, e)
                })?;
                apply_resource_limits(&limits)
            });
        }
    }

    #[cfg(not(target_os = "linux"))]
    let _ = (context, program, limits);
}

#[cfg(target_os = "linux")]
mod landlock_rules {
    use std::path::{Path, PathBuf};

    use landlock::{
        Access, AccessFs, AccessNet, CompatLevel, Compatible, PathBeneath, PathFd,
        Ruleset, RulesetAttr, RulesetCreatedAttr, ABI,
    };

    const ABI_VERSION: ABI = ABI::V5;

    enum Grant {
        ReadOnly,
        ReadWrite,
        Device,
    }

    pub(super) struct Prepared {
        rules: Vec<(PathFd, Grant)>,
    }

    impl Prepared {
        #[cfg(test)]
        pub(super) fn len(&self) -> usize {
            self.rules.len()
        }
    }

    /// Open every rule path. Runs in the parent, before fork; paths that do
    /// not exist are skipped.
    pub(super) fn prepare(context: &Path, program: &str) -> Prepared {
        let mut wanted: Vec<(PathBuf, Grant)> = super::SYSTEM_READ_PATHS
            .iter()
            .map(|p| (PathBuf::from(p), Grant::ReadOnly))
            .collect();

        let program = Path::new(program);
        if program.is_absolute() {
            if let Some(dir) = program.parent() {
                wanted.push((dir.to_path_buf(), Grant::ReadOnly));
            }
        }
        wanted.extend(
            super::DEVICE_PATHS
                .iter()
                .map(|p| (PathBuf::from(p), Grant::Device)),
        );
        wanted.push((context.to_path_buf(), Grant::ReadWrite));

        let rules = wanted
            .into_iter()
            .filter_map(|(path, grant)| PathFd::new(&path).ok().map(|fd| (fd, grant)))
            .collect();
        Prepared { rules }
    }

    /// Build the ruleset and restrict the calling process. Runs in the child.
    pub(super) fn enforce(prepared: Prepared) -> Result<(), String> {
        let mut ruleset = Ruleset::default()
            .set_compatibility(CompatLevel::BestEffort)
            .handle_access(AccessFs::from_all(ABI_VERSION))
            .and_then(|ruleset| ruleset.handle_access(AccessNet::from_all(ABI_VERSION)))
            .and_then(|ruleset| ruleset.create())
            .map_err(|e| format!("failed to create Landlock ruleset: {e}"))?;

        // No network rules are added, so every TCP bind and connect is denied.
        for (fd, grant) in prepared.rules {
            let access = match grant {
                Grant::ReadOnly => AccessFs::from_read(ABI_VERSION),
                Grant::ReadWrite => AccessFs::from_all(ABI_VERSION),
                Grant::Device => AccessFs::ReadFile | AccessFs::WriteFile | AccessFs::Truncate,
            };
            ruleset = ruleset
                .add_rule(PathBeneath::new(fd, access))
                .map_err(|e| format!("failed to add Landlock rule: {e}"))?;
        }

        ruleset
            .restrict_self()
            .map_err(|e| format!("failed to enforce Landlock ruleset: {e}"))?;
        Ok(())
    }
}

/// `setrlimit` is a direct syscall and `last_os_error` only reads `errno`,
/// so this is safe to call inside `pre_exec`.
#[cfg(target_os = "linux")]
fn apply_resource_limits(limits: &ResourceLimits) -> std::io::Result<()> {
    let caps = [
        (libc::RLIMIT_NPROC, limits.max_processes),
        (libc::RLIMIT_AS, limits.max_memory_bytes),
        (libc::RLIMIT_NOFILE, limits.max_open_files),
    ];
    for (resource, value) in caps {
        let mut current = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        if unsafe { libc::getrlimit(resource, &mut current) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        // Only lowering is allowed without privileges.
        let value = (value as libc::rlim_t).min(current.rlim_max);
        let limit = libc::rlimit {
            rlim_cur: value,
            rlim_max: value,
        };
        if unsafe { libc::setrlimit(resource, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
    }
    Ok(())
}

/// Every process started by one demo run.
///
/// Killed as a group on drop, so background processes the demo forked do not
/// outlive the run.
#[derive(Debug)]
pub struct ProcessGroup {
    #[cfg(unix)]
    pgid: Option<libc::pid_t>,
}

impl ProcessGroup {
    /// The group led by `child`, which must have been spawned through
    /// [`confine`].
    pub fn of(child: &Child) -> Self {
        #[cfg(unix)]
        {
            let pgid = child
                .id()
                .and_then(|pid| libc::pid_t::try_from(pid).ok())
                .filter(|pid| *pid > 1);
            Self { pgid }
        }
        #[cfg(not(unix))]
        {
            let _ = child;
            Self {}
        }
    }

    pub fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            // ESRCH once the group is empty; nothing to report.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        self.kill();
    }
}
