//! Struct layout extraction from DWARF debug info.
//!
//! Go binaries embed full DWARF by default, which lets us read struct
//! member offsets for the exact toolchain that built the target instead of
//! hard-coding per-version layouts. The whole debug tree is walked once at
//! open time into an in-memory index; lookups after that are hash probes.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use gimli::{AttributeValue, EndianSlice, RunTimeEndian};
use log::debug;
use object::{Object, ObjectSection};

/// Type layout queries, mockable for resolver tests.
pub(crate) trait DebugInfo {
    /// Byte offset of `member` within the struct or class `type_name`.
    /// Type names are fully qualified ("crypto/tls.Conn", "node::TLSWrap").
    fn struct_member_offset(&self, type_name: &str, member: &str) -> Option<u64>;

    /// Byte offset of the `parent` base-class subobject within `class`.
    fn class_parent_offset(&self, class: &str, parent: &str) -> Option<u64>;
}

#[derive(Debug, Default)]
struct TypeLayout {
    members: HashMap<String, u64>,
    parents: HashMap<String, u64>,
}

pub(crate) struct DwarfReader {
    types: HashMap<String, TypeLayout>,
}

type Reader<'a> = EndianSlice<'a, RunTimeEndian>;

impl DwarfReader {
    pub(crate) fn open(path: &Path) -> Result<DwarfReader> {
        let data = fs::read(path)
            .with_context(|| format!("Could not read {} for debug info", path.display()))?;
        let file = object::File::parse(&*data)
            .with_context(|| format!("Could not parse {}", path.display()))?;
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> Result<Cow<[u8]>, gimli::Error> {
            Ok(file
                .section_by_name(id.name())
                .and_then(|section| section.uncompressed_data().ok())
                .unwrap_or_default())
        };
        let sections = gimli::DwarfSections::load(&load_section)?;
        let dwarf = sections.borrow(|section| EndianSlice::new(section, endian));

        let mut types = HashMap::new();
        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            index_unit(&dwarf, &unit, &mut types)?;
        }

        debug!("Indexed {} types from {}", types.len(), path.display());
        Ok(DwarfReader { types })
    }
}

impl DebugInfo for DwarfReader {
    fn struct_member_offset(&self, type_name: &str, member: &str) -> Option<u64> {
        self.types.get(type_name)?.members.get(member).copied()
    }

    fn class_parent_offset(&self, class: &str, parent: &str) -> Option<u64> {
        self.types.get(class)?.parents.get(parent).copied()
    }
}

/// Walk one compilation unit, recording member and base-class offsets of
/// every named struct/class. C++ names get qualified with the enclosing
/// namespaces; Go emits fully qualified names directly.
fn index_unit(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    types: &mut HashMap<String, TypeLayout>,
) -> Result<()> {
    let mut namespaces: Vec<(isize, String)> = Vec::new();
    let mut current: Option<(isize, String)> = None;

    let mut depth = 0isize;
    let mut entries = unit.entries();
    while let Some((delta, entry)) = entries.next_dfs()? {
        depth += delta;
        namespaces.retain(|(d, _)| *d < depth);
        if current.as_ref().is_some_and(|(d, _)| *d >= depth) {
            current = None;
        }

        match entry.tag() {
            gimli::DW_TAG_namespace => {
                if let Some(name) = entry_name(dwarf, unit, entry)? {
                    namespaces.push((depth, name));
                }
            }
            gimli::DW_TAG_structure_type | gimli::DW_TAG_class_type => {
                if let Some(name) = entry_name(dwarf, unit, entry)? {
                    let qualified = if namespaces.is_empty() {
                        name
                    } else {
                        let prefix = namespaces
                            .iter()
                            .map(|(_, n)| n.as_str())
                            .collect::<Vec<_>>()
                            .join("::");
                        format!("{prefix}::{name}")
                    };
                    current = Some((depth, qualified));
                }
            }
            gimli::DW_TAG_member => {
                let Some((type_depth, type_name)) = &current else {
                    continue;
                };
                if depth != type_depth + 1 {
                    continue;
                }
                if let (Some(name), Some(offset)) =
                    (entry_name(dwarf, unit, entry)?, member_offset(entry)?)
                {
                    types
                        .entry(type_name.clone())
                        .or_default()
                        .members
                        .insert(name, offset);
                }
            }
            gimli::DW_TAG_inheritance => {
                let Some((type_depth, type_name)) = &current else {
                    continue;
                };
                if depth != type_depth + 1 {
                    continue;
                }
                if let (Some(parent), Some(offset)) =
                    (referenced_type_name(dwarf, unit, entry)?, member_offset(entry)?)
                {
                    types
                        .entry(type_name.clone())
                        .or_default()
                        .parents
                        .insert(parent, offset);
                }
            }
            _ => (),
        }
    }
    Ok(())
}

fn entry_name(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<Reader>,
) -> Result<Option<String>> {
    match entry.attr_value(gimli::DW_AT_name)? {
        Some(attr) => Ok(Some(
            dwarf.attr_string(unit, attr)?.to_string_lossy().into_owned(),
        )),
        None => Ok(None),
    }
}

/// DW_AT_data_member_location, constant form only. Location-expression
/// forms (virtual bases) are not needed for the types we query.
fn member_offset(entry: &gimli::DebuggingInformationEntry<Reader>) -> Result<Option<u64>> {
    Ok(
        match entry.attr_value(gimli::DW_AT_data_member_location)? {
            Some(AttributeValue::Udata(offset)) => Some(offset),
            Some(AttributeValue::Data1(offset)) => Some(offset.into()),
            Some(AttributeValue::Data2(offset)) => Some(offset.into()),
            Some(AttributeValue::Data4(offset)) => Some(offset.into()),
            Some(AttributeValue::Data8(offset)) => Some(offset),
            _ => None,
        },
    )
}

/// Follow a DW_AT_type reference and return the referenced type's name.
fn referenced_type_name(
    dwarf: &gimli::Dwarf<Reader>,
    unit: &gimli::Unit<Reader>,
    entry: &gimli::DebuggingInformationEntry<Reader>,
) -> Result<Option<String>> {
    let Some(AttributeValue::UnitRef(offset)) = entry.attr_value(gimli::DW_AT_type)? else {
        return Ok(None);
    };
    let target = unit.entry(offset)?;
    entry_name(dwarf, unit, &target)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Canned layouts for resolver tests.
    #[derive(Default)]
    pub(crate) struct FakeDebugInfo {
        pub(crate) members: HashMap<(String, String), u64>,
        pub(crate) parents: HashMap<(String, String), u64>,
    }

    impl FakeDebugInfo {
        pub(crate) fn with_member(mut self, ty: &str, member: &str, offset: u64) -> Self {
            self.members.insert((ty.into(), member.into()), offset);
            self
        }

        pub(crate) fn with_parent(mut self, ty: &str, parent: &str, offset: u64) -> Self {
            self.parents.insert((ty.into(), parent.into()), offset);
            self
        }
    }

    impl DebugInfo for FakeDebugInfo {
        fn struct_member_offset(&self, type_name: &str, member: &str) -> Option<u64> {
            self.members
                .get(&(type_name.to_string(), member.to_string()))
                .copied()
        }

        fn class_parent_offset(&self, class: &str, parent: &str) -> Option<u64> {
            self.parents
                .get(&(class.to_string(), parent.to_string()))
                .copied()
        }
    }

    #[test]
    fn open_missing_file() {
        assert!(DwarfReader::open(Path::new("/nonexistent")).is_err());
    }

    #[test]
    fn indexes_own_debug_info() {
        // Test binaries are built with debug info; parsing must succeed
        // even if the exact type set depends on the toolchain.
        let reader = DwarfReader::open(&std::env::current_exe().unwrap()).unwrap();
        assert!(reader.struct_member_offset("no::such::Type", "field").is_none());
    }
}
