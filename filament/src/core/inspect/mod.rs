//! Target binary introspection: ELF symbols and sections, and DWARF type
//! layouts for binaries that ship debug info.

pub(crate) mod dwarf;
pub(crate) mod elf;
