//! BPF-side plumbing: attaching resolved uprobes and handing out kernel
//! table handles. Everything deployment needs from the BPF object sits
//! behind [`Tracer`], which tests replace with an in-memory fake.

use std::path::Path;

use anyhow::{anyhow, Result};
use libbpf_rs::{Link, MapCore, MapFlags, MapHandle, Object, ObjectBuilder};
use log::debug;

use super::{ProbeError, UprobeSpec};
use crate::core::maps::RawTable;

pub(crate) trait Tracer: Send {
    /// Attach one resolved uprobe; the attachment stays alive for the
    /// tracer's lifetime.
    fn attach_uprobe(&mut self, spec: &UprobeSpec) -> Result<(), ProbeError>;

    /// Writable handle to a named kernel table.
    fn table(&self, name: &str) -> Result<Box<dyn RawTable + Send>>;
}

/// The real tracer, wrapping a loaded BPF object. Links are held so probes
/// detach when the tracer is dropped.
pub(crate) struct BpfTracer {
    obj: Object,
    links: Vec<Link>,
}

impl BpfTracer {
    pub(crate) fn load(bpf_object: &Path) -> Result<BpfTracer> {
        let obj = ObjectBuilder::default()
            .open_file(bpf_object)?
            .load()?;
        Ok(BpfTracer {
            obj,
            links: Vec::new(),
        })
    }
}

impl Tracer for BpfTracer {
    fn attach_uprobe(&mut self, spec: &UprobeSpec) -> Result<(), ProbeError> {
        let prog = self
            .obj
            .progs_mut()
            .find(|p| p.name() == spec.probe_fn)
            .ok_or_else(|| ProbeError::AttachFailed {
                probe_fn: spec.probe_fn,
                path: spec.path.clone(),
                reason: "No such program in BPF object".to_string(),
            })?;

        // pid -1: the probe applies to every process mapping the binary.
        let link = prog
            .attach_uprobe(spec.retprobe, -1, &spec.path, spec.file_offset as usize)
            .map_err(|e| ProbeError::AttachFailed {
                probe_fn: spec.probe_fn,
                path: spec.path.clone(),
                reason: e.to_string(),
            })?;
        debug!("Attached {spec}");
        self.links.push(link);
        Ok(())
    }

    fn table(&self, name: &str) -> Result<Box<dyn RawTable + Send>> {
        let map = self
            .obj
            .maps()
            .find(|m| m.name() == name)
            .ok_or_else(|| anyhow!("No map '{name}' in BPF object"))?;
        Ok(Box::new(TableHandle(MapHandle::try_from(&map)?)))
    }
}

/// Owned, Send handle to one kernel map.
struct TableHandle(MapHandle);

impl RawTable for TableHandle {
    fn update(&mut self, key: &[u8], value: &[u8]) -> Result<(), String> {
        self.0
            .update(key, value, MapFlags::ANY)
            .map_err(|e| e.to_string())
    }

    fn delete(&mut self, key: &[u8]) -> Result<(), String> {
        self.0.delete(key).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::core::maps::tests::FakeTable;

    /// Records attachments and serves fake tables.
    #[derive(Default)]
    pub(crate) struct FakeTracer {
        pub(crate) attached: Arc<Mutex<Vec<UprobeSpec>>>,
    }

    impl Tracer for FakeTracer {
        fn attach_uprobe(&mut self, spec: &UprobeSpec) -> Result<(), ProbeError> {
            self.attached.lock().unwrap().push(spec.clone());
            Ok(())
        }

        fn table(&self, _name: &str) -> Result<Box<dyn RawTable + Send>> {
            Ok(Box::<FakeTable>::default())
        }
    }
}
