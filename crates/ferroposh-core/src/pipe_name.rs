use std::path::{Path, PathBuf};

use sysinfo::System;
use tracing::debug;

use crate::ServerError;

/// Seconds between the Windows FILETIME epoch (1601-01-01) and the Unix
/// epoch, in 100ns ticks.
const FILETIME_EPOCH_DELTA: u64 = 116_444_736_000_000_000;

/// The process facts the pipe name derives from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub pid: u32,
    /// Process create time as microseconds since the Unix epoch, UTC.
    pub start_time_micros: u64,
    /// Executable base name, e.g. `pwsh`.
    pub name: String,
}

impl ProcessIdentity {
    /// Look up the current process. Fails with
    /// [`ServerError::ProcessIntrospectionUnavailable`] when the process
    /// table cannot be read.
    pub fn current() -> Result<Self, ServerError> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| ServerError::ProcessIntrospectionUnavailable(e.to_string()))?;

        let system = System::new_all();
        let process = system.process(pid).ok_or_else(|| {
            ServerError::ProcessIntrospectionUnavailable(format!(
                "no process table entry for pid {pid}"
            ))
        })?;

        Ok(Self {
            pid: pid.as_u32(),
            start_time_micros: process.start_time() * 1_000_000,
            name: process.name().to_string_lossy().into_owned(),
        })
    }

    /// The create time as Windows FILETIME 100ns ticks.
    fn filetime(&self) -> u64 {
        FILETIME_EPOCH_DELTA + self.start_time_micros * 10
    }
}

/// The default pipe path PowerShell derives for a host process:
/// `\\.\pipe\PSHost.<filetime>.<pid>.DefaultAppDomain.<name>`.
pub fn windows_pipe_name(identity: &ProcessIdentity) -> String {
    format!(
        r"\\.\pipe\PSHost.{}.{}.DefaultAppDomain.{}",
        identity.filetime(),
        identity.pid,
        identity.name
    )
}

/// The POSIX rendering: .NET formats the FILETIME with `ToString("X8")`
/// (which drops leading zeroes) and takes `Substring(1, 8)`; the result
/// lands under the temp directory as a CoreFX pipe file.
pub fn posix_pipe_name(identity: &ProcessIdentity, tmpdir: &Path) -> PathBuf {
    let hex = format!("{:016X}", identity.filetime());
    let start_time: String = hex.trim_start_matches('0').chars().skip(1).take(8).collect();

    tmpdir.join(format!(
        "CoreFxPipe_PSHost.{start_time}.{}.None.{}",
        identity.pid, identity.name
    ))
}

/// Derive the default PowerShell host pipe path for this process.
pub fn default_pipe_name() -> Result<PathBuf, ServerError> {
    let identity = ProcessIdentity::current()?;
    debug!(?identity, "derived process identity");

    if cfg!(windows) {
        return Ok(PathBuf::from(windows_pipe_name(&identity)));
    }

    let tmpdir = std::env::var_os("TMPDIR")
        .map_or_else(|| PathBuf::from("/tmp"), PathBuf::from);
    Ok(posix_pipe_name(&identity, &tmpdir))
}
