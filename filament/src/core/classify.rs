//! Target classification: which catalogs apply to a process or binary.
//!
//! Go detection lives on [`BinaryInspector`](crate::core::inspect::elf::BinaryInspector)
//! (build info in the ELF); this module covers the dynamic cases: OpenSSL
//! shared objects mapped into a process and node executables.

use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::core::{
    inspect::elf::BinaryInspector,
    probe::ProbeError,
    process::{proc::ProcInspector, Pid},
    version::SemVer,
};

const LIBSSL_BASENAME: &str = "libssl.so.1.1";
const LIBCRYPTO_BASENAME: &str = "libcrypto.so.1.1";

/// The OpenSSL 1.1 shared objects mapped by one process, as paths openable
/// from our mount namespace.
#[derive(Clone, Debug)]
pub(crate) struct SslLibraries {
    pub(crate) libssl: PathBuf,
    pub(crate) libcrypto: Option<PathBuf>,
}

fn has_basename(path: &Path, basename: &str) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with(basename))
        .unwrap_or(false)
}

/// Locate libssl (and libcrypto) in a process' executable mappings.
pub(crate) fn find_ssl_libraries(
    proc: &dyn ProcInspector,
    pid: &Pid,
) -> Option<SslLibraries> {
    let mapped = proc.mapped_paths(pid).ok()?;
    let libssl = mapped.iter().find(|p| has_basename(p, LIBSSL_BASENAME))?;
    let libcrypto = mapped.iter().find(|p| has_basename(p, LIBCRYPTO_BASENAME));
    Some(SslLibraries {
        libssl: proc.resolve(pid, libssl),
        libcrypto: libcrypto.map(|p| proc.resolve(pid, p)),
    })
}

/// OpenSSL release detection by scanning `.rodata` for the embedded
/// `OPENSSL_VERSION_TEXT` string. The version string lives in libcrypto;
/// libssl is the fallback when libcrypto was not found in the maps.
pub(crate) fn detect_openssl_version(libs: &SslLibraries) -> Result<SemVer, ProbeError> {
    static OPENSSL_VERSION_RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"OpenSSL (\d+)\.(\d+)\.(\d+)").unwrap());

    let path = libs.libcrypto.as_deref().unwrap_or(&libs.libssl);
    let inspector = BinaryInspector::open(path)?;
    let rodata = inspector
        .section_data(".rodata")
        .ok_or_else(|| ProbeError::BinaryUnparseable {
            path: path.to_path_buf(),
            reason: "No .rodata section".to_string(),
        })?;

    let caps =
        OPENSSL_VERSION_RE
            .captures(rodata)
            .ok_or_else(|| ProbeError::UnsupportedVersion {
                what: "openssl",
                version: "unknown".to_string(),
            })?;
    let field = |i: usize| -> u32 {
        std::str::from_utf8(&caps[i])
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    };
    let ver = SemVer::new(field(1), field(2), field(3));
    debug!("Detected OpenSSL {ver} in {}", path.display());
    Ok(ver)
}

/// Whether an executable looks like a node runtime, by basename.
pub(crate) fn is_node_executable(path: &Path) -> bool {
    matches!(path.file_name(), Some(name) if name.to_string_lossy() == "node")
}

/// The node release, reported by the executable itself. Running the target
/// binary is safe here: `--version` exits before the event loop starts.
pub(crate) fn node_version(node_exe: &Path) -> Result<SemVer, ProbeError> {
    let output = Command::new(node_exe).arg("--version").output().map_err(|source| {
        ProbeError::BinaryUnreadable {
            path: node_exe.to_path_buf(),
            source,
        }
    })?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    SemVer::parse(&stdout).map_err(|_| ProbeError::UnsupportedVersion {
        what: "node",
        version: stdout.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use anyhow::Result;

    use super::*;

    struct FakeProc {
        maps: Vec<PathBuf>,
    }

    impl ProcInspector for FakeProc {
        fn live(&self) -> Result<HashSet<Pid>> {
            Ok(HashSet::new())
        }

        fn exe_path(&self, _: &Pid) -> Result<PathBuf> {
            unimplemented!()
        }

        fn mapped_paths(&self, _: &Pid) -> Result<Vec<PathBuf>> {
            Ok(self.maps.clone())
        }

        fn resolve(&self, pid: &Pid, path: &Path) -> PathBuf {
            PathBuf::from(format!("/proc/{}/root{}", pid.tgid, path.display()))
        }
    }

    #[test]
    fn ssl_library_discovery() {
        let pid = Pid {
            tgid: 7,
            start_time: 0,
        };
        let proc = FakeProc {
            maps: vec![
                PathBuf::from("/usr/bin/server"),
                PathBuf::from("/usr/lib/x86_64-linux-gnu/libssl.so.1.1"),
                PathBuf::from("/usr/lib/x86_64-linux-gnu/libcrypto.so.1.1"),
            ],
        };
        let libs = find_ssl_libraries(&proc, &pid).unwrap();
        assert_eq!(
            libs.libssl,
            PathBuf::from("/proc/7/root/usr/lib/x86_64-linux-gnu/libssl.so.1.1")
        );
        assert!(libs.libcrypto.is_some());

        let proc = FakeProc {
            maps: vec![PathBuf::from("/usr/bin/server")],
        };
        assert!(find_ssl_libraries(&proc, &pid).is_none());
    }

    #[test]
    fn node_detection_by_basename() {
        assert!(is_node_executable(Path::new("/usr/bin/node")));
        assert!(!is_node_executable(Path::new("/usr/bin/nodepool")));
        assert!(!is_node_executable(Path::new("/usr/bin/python3")));
    }

    #[test]
    fn node_version_of_missing_binary() {
        let err = node_version(Path::new("/nonexistent/node")).unwrap_err();
        assert_eq!(err.status(), "binary-unreadable");
    }
}
