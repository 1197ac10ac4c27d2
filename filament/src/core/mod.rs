pub(crate) mod classify;
pub(crate) mod inspect;
pub(crate) mod manager;
pub(crate) mod maps;
pub(crate) mod monitor;
pub(crate) mod probe;
pub(crate) mod process;
pub(crate) mod rescan;
pub(crate) mod symaddrs;
pub(crate) mod version;
