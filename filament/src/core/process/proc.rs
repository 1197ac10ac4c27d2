//! procfs access, behind a trait so deployment logic can run against fake
//! process trees in tests.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Result};

use super::Pid;

pub(crate) trait ProcInspector: Send + Sync {
    /// Snapshot of all live processes.
    fn live(&self) -> Result<HashSet<Pid>>;
    /// The process main executable.
    fn exe_path(&self, pid: &Pid) -> Result<PathBuf>;
    /// File-backed executable mappings, deduplicated, in map order.
    fn mapped_paths(&self, pid: &Pid) -> Result<Vec<PathBuf>>;
    /// Translate a path from the process mount namespace into one we can
    /// open from ours.
    fn resolve(&self, pid: &Pid, path: &Path) -> PathBuf;
}

pub(crate) struct ProcfsInspector;

impl ProcInspector for ProcfsInspector {
    fn live(&self) -> Result<HashSet<Pid>> {
        let mut pids = HashSet::new();
        for entry in fs::read_dir("/proc")? {
            let entry = entry?;
            let Ok(tgid) = entry.file_name().to_string_lossy().parse::<u32>() else {
                continue;
            };
            // Processes may exit while we enumerate.
            let Ok(stat) = fs::read_to_string(entry.path().join("stat")) else {
                continue;
            };
            let Ok(start_time) = parse_start_time(&stat) else {
                continue;
            };
            pids.insert(Pid { tgid, start_time });
        }
        Ok(pids)
    }

    fn exe_path(&self, pid: &Pid) -> Result<PathBuf> {
        Ok(fs::read_link(format!("/proc/{}/exe", pid.tgid))?)
    }

    fn mapped_paths(&self, pid: &Pid) -> Result<Vec<PathBuf>> {
        let maps = fs::read_to_string(format!("/proc/{}/maps", pid.tgid))?;
        let mut seen = HashSet::new();
        let mut paths = Vec::new();
        for line in maps.lines() {
            // perms are the second field; only executable file mappings
            // can host uprobes.
            let mut fields = line.split_whitespace();
            let (Some(_), Some(perms)) = (fields.next(), fields.next()) else {
                continue;
            };
            if !perms.contains('x') {
                continue;
            }
            let Some(path) = fields.nth(3) else {
                continue;
            };
            if !path.starts_with('/') {
                continue;
            }
            if seen.insert(path.to_string()) {
                paths.push(PathBuf::from(path));
            }
        }
        Ok(paths)
    }

    fn resolve(&self, pid: &Pid, path: &Path) -> PathBuf {
        // /proc/<pid>/root sees through both mount namespaces and chroots.
        let mut resolved = PathBuf::from(format!("/proc/{}/root", pid.tgid));
        resolved.push(path.strip_prefix("/").unwrap_or(path));
        resolved
    }
}

/// Start time is field 22 of `/proc/<pid>/stat`. The comm field (2) may
/// contain spaces and parentheses, so fields are counted from the last ')'.
fn parse_start_time(stat: &str) -> Result<u64> {
    let after_comm = stat
        .rfind(')')
        .map(|i| &stat[i + 1..])
        .ok_or_else(|| anyhow!("Malformed stat line"))?;
    // after_comm starts at field 3.
    match after_comm.split_whitespace().nth(19) {
        Some(field) => Ok(field.parse()?),
        None => bail!("Stat line too short"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_time_from_stat() {
        let stat = "1234 (some (test) proc) S 1 1234 1234 0 -1 4194560 1038 0 11 0 8 5 0 0 20 0 1 0 17821 173772800 1229 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 2 0 0 0 0 0";
        assert_eq!(parse_start_time(stat).unwrap(), 17821);
        assert!(parse_start_time("no parens here").is_err());
        assert!(parse_start_time("1 (x) S 1 2 3").is_err());
    }

    #[test]
    fn resolve_prefixes_proc_root() {
        let pid = Pid {
            tgid: 42,
            start_time: 0,
        };
        assert_eq!(
            ProcfsInspector.resolve(&pid, Path::new("/usr/lib/libssl.so.1.1")),
            PathBuf::from("/proc/42/root/usr/lib/libssl.so.1.1")
        );
    }

    #[test]
    fn live_includes_self() {
        let live = ProcfsInspector.live().unwrap();
        assert!(live.iter().any(|p| p.tgid == std::process::id()));
    }
}
