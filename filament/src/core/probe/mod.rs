//! Probe definitions: the static templates the catalogs are built from, the
//! fully-resolved specs handed to the tracer, and the error taxonomy used
//! throughout deployment.

pub(crate) mod catalog;
pub(crate) mod tracer;

use std::{fmt, io, path::PathBuf};

use thiserror::Error;

/// How a template symbol pattern is matched against ELF symbol names.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum MatchMode {
    Exact,
    Prefix,
    Suffix,
}

/// Where the uprobe lands relative to the matched function.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum AttachKind {
    /// Function entry.
    Entry,
    /// Function return, via kernel uretprobe.
    Return,
    /// One entry probe per `ret` instruction in the function body. Used
    /// where uretprobes are unsafe (Go's stack-moving runtime).
    ReturnInsts,
}

/// A position-independent probe description from a catalog. Resolution
/// against a concrete binary turns it into one or more [`UprobeSpec`]s.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ProbeTemplate {
    pub(crate) symbol: &'static str,
    pub(crate) match_mode: MatchMode,
    pub(crate) attach: AttachKind,
    /// Name of the BPF program to attach.
    pub(crate) probe_fn: &'static str,
}

/// A resolved attachment point in one binary. `attach` here is never
/// [`AttachKind::ReturnInsts`]; resolution lowers that to one entry spec
/// per return instruction.
#[derive(Clone, Debug)]
pub(crate) struct UprobeSpec {
    pub(crate) path: PathBuf,
    pub(crate) symbol: String,
    pub(crate) file_offset: u64,
    pub(crate) retprobe: bool,
    pub(crate) probe_fn: &'static str,
}

impl fmt::Display for UprobeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}+{:#x} ({})",
            self.probe_fn,
            self.path.display(),
            self.file_offset,
            self.symbol
        )
    }
}

/// Matches one ELF symbol name against a template pattern.
pub(crate) fn symbol_matches(name: &str, pattern: &str, mode: MatchMode) -> bool {
    match mode {
        MatchMode::Exact => name == pattern,
        MatchMode::Prefix => name.starts_with(pattern),
        MatchMode::Suffix => name.ends_with(pattern),
    }
}

/// Failures possible while deploying probes to one target. Each variant
/// carries enough context to report the target without consulting logs.
#[derive(Debug, Error)]
pub(crate) enum ProbeError {
    #[error("Could not read binary {path}: {source}")]
    BinaryUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Could not parse binary {path}: {reason}")]
    BinaryUnparseable { path: PathBuf, reason: String },
    #[error("Unsupported {what} version {version}")]
    UnsupportedVersion { what: &'static str, version: String },
    #[error("Symbol {0} not found")]
    SymbolNotFound(String),
    #[error("Could not resolve offset of {type_name}::{member}")]
    FieldLayoutUnresolved {
        type_name: String,
        member: &'static str,
    },
    #[error("Failed to attach {probe_fn} to {path}: {reason}")]
    AttachFailed {
        probe_fn: &'static str,
        path: PathBuf,
        reason: String,
    },
    #[error("Failed to update kernel table {map}: {reason}")]
    KernelTableWriteFailed { map: &'static str, reason: String },
}

impl ProbeError {
    /// Stable short code for status reporting.
    pub(crate) fn status(&self) -> &'static str {
        match self {
            ProbeError::BinaryUnreadable { .. } => "binary-unreadable",
            ProbeError::BinaryUnparseable { .. } => "binary-unparseable",
            ProbeError::UnsupportedVersion { .. } => "unsupported-version",
            ProbeError::SymbolNotFound(_) => "symbol-not-found",
            ProbeError::FieldLayoutUnresolved { .. } => "field-layout-unresolved",
            ProbeError::AttachFailed { .. } => "attach-failed",
            ProbeError::KernelTableWriteFailed { .. } => "kernel-table-write-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_modes() {
        assert!(symbol_matches(
            "runtime.casgstatus",
            "runtime.casgstatus",
            MatchMode::Exact
        ));
        assert!(!symbol_matches(
            "runtime.casgstatus.abi0",
            "runtime.casgstatus",
            MatchMode::Exact
        ));
        assert!(symbol_matches(
            "_ZN4node7TLSWrapC2EPNS_11EnvironmentE",
            "_ZN4node7TLSWrap",
            MatchMode::Prefix
        ));
        assert!(symbol_matches(
            "vendor/golang.org/x/net/http2.(*Framer).WriteDataPadded",
            "http2.(*Framer).WriteDataPadded",
            MatchMode::Suffix
        ));
        assert!(!symbol_matches(
            "http2.(*Framer).WriteData",
            "http2.(*Framer).WriteDataPadded",
            MatchMode::Suffix
        ));
    }

    #[test]
    fn error_status_codes() {
        let err = ProbeError::SymbolNotFound("SSL_write".into());
        assert_eq!(err.status(), "symbol-not-found");
        let err = ProbeError::UnsupportedVersion {
            what: "node",
            version: "10.0.0".into(),
        };
        assert_eq!(err.status(), "unsupported-version");
    }
}
