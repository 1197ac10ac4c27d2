//! ELF introspection of target binaries.
//!
//! One [`BinaryInspector`] is built per binary and answers every question
//! deployment needs: symbol lookups by pattern, virtual-address to
//! file-offset translation for uprobe attachment, Go toolchain detection
//! and raw section access for version sniffing.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use elf::{abi, endian::AnyEndian, ElfBytes};
use log::debug;
use once_cell::sync::Lazy;
use regex::bytes::Regex;

use crate::core::{
    probe::{symbol_matches, MatchMode, ProbeError},
    version::SemVer,
};

#[derive(Clone, Debug)]
pub(crate) struct FuncSymbol {
    pub(crate) name: String,
    pub(crate) address: u64,
    pub(crate) size: u64,
}

#[derive(Clone, Copy, Debug)]
struct LoadSegment {
    vaddr: u64,
    offset: u64,
    filesz: u64,
}

#[derive(Clone, Copy, Debug)]
struct SectionSpan {
    addr: u64,
    offset: u64,
    size: u64,
}

pub(crate) struct BinaryInspector {
    path: PathBuf,
    data: Vec<u8>,
    func_symbols: Vec<FuncSymbol>,
    sym_addrs: HashMap<String, u64>,
    sections: HashMap<String, SectionSpan>,
    load_segments: Vec<LoadSegment>,
}

impl BinaryInspector {
    /// Parse `path` once and keep owned copies of everything needed later.
    pub(crate) fn open(path: &Path) -> Result<BinaryInspector, ProbeError> {
        let data = fs::read(path).map_err(|source| ProbeError::BinaryUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_err = |e: elf::ParseError| ProbeError::BinaryUnparseable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let file = ElfBytes::<AnyEndian>::minimal_parse(&data).map_err(parse_err)?;

        let mut func_symbols = Vec::new();
        let mut sym_addrs = HashMap::new();
        for table in [
            file.symbol_table().map_err(parse_err)?,
            file.dynamic_symbol_table().map_err(parse_err)?,
        ]
        .into_iter()
        .flatten()
        {
            let (symtab, strtab) = table;
            for sym in symtab.iter() {
                if sym.is_undefined() {
                    continue;
                }
                let Ok(name) = strtab.get(sym.st_name as usize) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                if sym.st_symtype() == abi::STT_FUNC {
                    func_symbols.push(FuncSymbol {
                        name: name.to_string(),
                        address: sym.st_value,
                        size: sym.st_size,
                    });
                }
                sym_addrs.entry(name.to_string()).or_insert(sym.st_value);
            }
        }

        let mut sections = HashMap::new();
        if let (Some(headers), Some(strtab)) =
            file.section_headers_with_strtab().map_err(parse_err)?
        {
            for shdr in headers.iter() {
                let Ok(name) = strtab.get(shdr.sh_name as usize) else {
                    continue;
                };
                sections.insert(
                    name.to_string(),
                    SectionSpan {
                        addr: shdr.sh_addr,
                        offset: shdr.sh_offset,
                        size: shdr.sh_size,
                    },
                );
            }
        }

        let load_segments = file
            .segments()
            .into_iter()
            .flatten()
            .filter(|phdr| phdr.p_type == abi::PT_LOAD)
            .map(|phdr| LoadSegment {
                vaddr: phdr.p_vaddr,
                offset: phdr.p_offset,
                filesz: phdr.p_filesz,
            })
            .collect();

        debug!(
            "Inspected {}: {} function symbols",
            path.display(),
            func_symbols.len()
        );

        Ok(BinaryInspector {
            path: path.to_path_buf(),
            data,
            func_symbols,
            sym_addrs,
            sections,
            load_segments,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// All defined function symbols matching a template pattern.
    pub(crate) fn matching_func_symbols(
        &self,
        pattern: &str,
        mode: MatchMode,
    ) -> Vec<&FuncSymbol> {
        self.func_symbols
            .iter()
            .filter(|sym| symbol_matches(&sym.name, pattern, mode))
            .collect()
    }

    /// Virtual address of a symbol of any type (functions, data, itabs).
    pub(crate) fn symbol_address(&self, name: &str) -> Option<u64> {
        self.sym_addrs.get(name).copied()
    }

    /// Translate a virtual address into a file offset via the load segments.
    pub(crate) fn file_offset(&self, vaddr: u64) -> Result<u64, ProbeError> {
        self.load_segments
            .iter()
            .find(|seg| vaddr >= seg.vaddr && vaddr < seg.vaddr + seg.filesz)
            .map(|seg| vaddr - seg.vaddr + seg.offset)
            .ok_or_else(|| ProbeError::BinaryUnparseable {
                path: self.path.clone(),
                reason: format!("Address {vaddr:#x} not in any load segment"),
            })
    }

    /// Raw bytes of a named section, or None if absent or out of bounds.
    pub(crate) fn section_data(&self, name: &str) -> Option<&[u8]> {
        let span = self.sections.get(name)?;
        let start = usize::try_from(span.offset).ok()?;
        let end = start.checked_add(usize::try_from(span.size).ok()?)?;
        self.data.get(start..end)
    }

    /// File offsets of the `ret` instructions within a function body.
    ///
    /// A byte scan rather than a disassembly: 0xc3 can appear inside
    /// multi-byte instructions, so this overcounts on rare codegen. The Go
    /// functions this is used on have not shown such collisions.
    pub(crate) fn ret_offsets(&self, sym: &FuncSymbol) -> Result<Vec<u64>, ProbeError> {
        let start = self.file_offset(sym.address)?;
        let range = usize::try_from(start).ok().zip(usize::try_from(sym.size).ok());
        let bytes = range
            .and_then(|(s, len)| s.checked_add(len).and_then(|end| self.data.get(s..end)))
            .ok_or_else(|| ProbeError::BinaryUnparseable {
                path: self.path.clone(),
                reason: format!("Function {} out of file bounds", sym.name),
            })?;
        Ok(bytes
            .iter()
            .enumerate()
            .filter(|(_, b)| **b == 0xc3)
            .map(|(i, _)| start + i as u64)
            .collect())
    }

    /// Go binaries carry a `.go.buildinfo` section (1.12+) or the
    /// `runtime.buildVersion` symbol.
    pub(crate) fn is_go_binary(&self) -> bool {
        self.sections.contains_key(".go.buildinfo")
            || self.sym_addrs.contains_key("runtime.buildVersion")
    }

    /// The Go toolchain version, scraped from the build info section.
    pub(crate) fn go_version(&self) -> Result<SemVer, ProbeError> {
        static GO_VERSION_RE: Lazy<Regex> =
            Lazy::new(|| Regex::new(r"go(\d+)\.(\d+)(?:\.(\d+))?").unwrap());

        let unsupported = || ProbeError::UnsupportedVersion {
            what: "go",
            version: "unknown".to_string(),
        };

        let buildinfo = self.section_data(".go.buildinfo").ok_or_else(unsupported)?;
        let caps = GO_VERSION_RE.captures(buildinfo).ok_or_else(unsupported)?;
        let field = |i: usize| -> u32 {
            caps.get(i)
                .and_then(|m| std::str::from_utf8(m.as_bytes()).ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(0)
        };
        Ok(SemVer::new(field(1), field(2), field(3)))
    }
}

/// The symbol lookups symaddr resolution needs from a binary. Implemented by
/// [`BinaryInspector`]; tests substitute canned symbol tables.
pub(crate) trait SymbolSource {
    /// Virtual address of an exactly named symbol of any type.
    fn symbol_address(&self, name: &str) -> Option<u64>;
    /// Names of the defined function symbols matching a pattern.
    fn matching_symbol_names(&self, pattern: &str, mode: MatchMode) -> Vec<String>;
}

impl SymbolSource for BinaryInspector {
    fn symbol_address(&self, name: &str) -> Option<u64> {
        BinaryInspector::symbol_address(self, name)
    }

    fn matching_symbol_names(&self, pattern: &str, mode: MatchMode) -> Vec<String> {
        self.matching_func_symbols(pattern, mode)
            .into_iter()
            .map(|sym| sym.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_inspector() -> BinaryInspector {
        BinaryInspector::open(&std::env::current_exe().unwrap()).unwrap()
    }

    #[test]
    fn open_reports_typed_errors() {
        let err = BinaryInspector::open(Path::new("/nonexistent/binary"))
            .err()
            .unwrap();
        assert_eq!(err.status(), "binary-unreadable");

        let mut garbage = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut garbage, b"definitely not an ELF").unwrap();
        let err = BinaryInspector::open(garbage.path()).err().unwrap();
        assert_eq!(err.status(), "binary-unparseable");
    }

    #[test]
    fn inspects_own_test_binary() {
        let inspector = self_inspector();
        assert!(!inspector.func_symbols.is_empty());
        // Rust test binaries always export main.
        assert!(!inspector
            .matching_func_symbols("main", MatchMode::Exact)
            .is_empty());
        assert!(inspector.symbol_address("main").is_some());
    }

    #[test]
    fn file_offset_translation() {
        let inspector = self_inspector();
        let addr = inspector.symbol_address("main").unwrap();
        let offset = inspector.file_offset(addr).unwrap();
        assert!((offset as usize) < inspector.data.len());
        assert!(inspector.file_offset(u64::MAX - 1).is_err());
    }

    #[test]
    fn ret_scan_finds_returns() {
        let inspector = self_inspector();
        let sym = inspector.matching_func_symbols("main", MatchMode::Exact)[0].clone();
        let rets = inspector.ret_offsets(&sym).unwrap();
        assert!(!rets.is_empty());
        let start = inspector.file_offset(sym.address).unwrap();
        for ret in rets {
            assert!(ret >= start && ret < start + sym.size);
        }
    }

    #[test]
    fn not_a_go_binary() {
        let inspector = self_inspector();
        assert!(!inspector.is_go_binary());
        assert!(inspector.go_version().is_err());
    }
}
