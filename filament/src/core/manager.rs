//! Deployment orchestration.
//!
//! A [`UprobeManager`] owns everything one deployment pass touches: the
//! tracer, the kernel-shared symaddr maps, the process tracker and the
//! per-binary bookkeeping. Passes run on worker threads but are serialized
//! by a mutex; an atomic counter tracks in-flight passes so the caller can
//! tell when deployment work is still pending.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
};

use anyhow::Result;
use log::{debug, info, warn};
use serde_json::json;

use crate::core::{
    classify,
    inspect::{
        dwarf::{DebugInfo, DwarfReader},
        elf::{BinaryInspector, SymbolSource},
    },
    maps::ShadowedMap,
    monitor::Monitor,
    probe::{
        catalog, tracer::Tracer, AttachKind, ProbeError, ProbeTemplate, UprobeSpec,
    },
    process::{proc::ProcInspector, Pid, ProcessTracker},
    rescan::RescanScheduler,
    symaddrs::{self, GoCommonSymaddrs, GoHttp2Symaddrs, GoTlsSymaddrs},
};

#[derive(Clone, Debug)]
pub(crate) struct ManagerConfig {
    /// Also deploy the Go http2 probes (higher overhead, off by default).
    pub(crate) enable_http2_tracing: bool,
    /// Skip our own process when deploying.
    pub(crate) disable_self_probing: bool,
    /// Rescan processes that the kernel reported new executable mappings
    /// for, overriding their backoff.
    pub(crate) rescan_on_map_change: bool,
    pub(crate) backoff_factor: u32,
    pub(crate) backoff_max: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        ManagerConfig {
            enable_http2_tracing: false,
            disable_self_probing: true,
            rescan_on_map_change: true,
            backoff_factor: crate::core::rescan::DEFAULT_BACKOFF_FACTOR,
            backoff_max: crate::core::rescan::DEFAULT_BACKOFF_MAX,
        }
    }
}

/// Outcome of one pass for one process.
#[derive(Debug)]
pub(crate) struct TargetStatus {
    pub(crate) pid: Pid,
    pub(crate) probes: usize,
    pub(crate) errors: Vec<String>,
}

/// Outcome of one whole deployment pass.
#[derive(Debug, Default)]
pub(crate) struct DeploySummary {
    pub(crate) probes_attached: usize,
    pub(crate) statuses: Vec<TargetStatus>,
}

/// Successful Go symaddr resolution for one binary. Common offsets are
/// required; the per-catalog ones are independent of each other.
#[derive(Clone, Copy, Debug)]
struct GoSymaddrs {
    common: GoCommonSymaddrs,
    tls: Option<GoTlsSymaddrs>,
    http2: Option<GoHttp2Symaddrs>,
}

#[derive(Debug, Default)]
struct Outcome {
    probes: usize,
    errors: Vec<String>,
}

impl Outcome {
    fn merge(&mut self, other: Outcome) {
        self.probes += other.probes;
        self.errors.extend(other.errors);
    }
}

/// Mutable state of a pass, all behind the one mutex.
struct Engine {
    tracer: Box<dyn Tracer>,
    proc: Box<dyn ProcInspector>,
    tracker: ProcessTracker,

    openssl_map: ShadowedMap<u32>,
    go_common_map: ShadowedMap<u32>,
    go_http2_map: ShadowedMap<u32>,
    go_tls_map: ShadowedMap<u32>,
    node_tlswrap_map: ShadowedMap<u32>,

    // Binaries probed so far, per catalog. Grow-only within a run: probes
    // attach per path and survive individual process exits.
    openssl_probed: HashSet<PathBuf>,
    node_probed: HashSet<PathBuf>,
    go_probed: HashSet<PathBuf>,
    go_tls_probed: HashSet<PathBuf>,
    go_http2_probed: HashSet<PathBuf>,

    go_cache: HashMap<PathBuf, GoSymaddrs>,
}

pub(crate) struct UprobeManager {
    cfg: ManagerConfig,
    monitor: Arc<dyn Monitor>,
    engine: Mutex<Engine>,
    scheduler: Mutex<RescanScheduler>,
    passes_running: AtomicUsize,
    self_tgid: u32,
}

impl UprobeManager {
    pub(crate) fn new(
        cfg: ManagerConfig,
        tracer: Box<dyn Tracer>,
        proc: Box<dyn ProcInspector>,
        monitor: Arc<dyn Monitor>,
    ) -> Result<Arc<UprobeManager>> {
        let engine = Engine {
            openssl_map: ShadowedMap::new(
                "openssl_symaddrs_map",
                tracer.table("openssl_symaddrs_map")?,
            ),
            go_common_map: ShadowedMap::new(
                "go_common_symaddrs_map",
                tracer.table("go_common_symaddrs_map")?,
            ),
            go_http2_map: ShadowedMap::new(
                "http2_symaddrs_map",
                tracer.table("http2_symaddrs_map")?,
            ),
            go_tls_map: ShadowedMap::new(
                "go_tls_symaddrs_map",
                tracer.table("go_tls_symaddrs_map")?,
            ),
            node_tlswrap_map: ShadowedMap::new(
                "node_tlswrap_symaddrs_map",
                tracer.table("node_tlswrap_symaddrs_map")?,
            ),
            tracer,
            proc,
            tracker: ProcessTracker::default(),
            openssl_probed: HashSet::new(),
            node_probed: HashSet::new(),
            go_probed: HashSet::new(),
            go_tls_probed: HashSet::new(),
            go_http2_probed: HashSet::new(),
            go_cache: HashMap::new(),
        };

        Ok(Arc::new(UprobeManager {
            scheduler: Mutex::new(RescanScheduler::new(cfg.backoff_factor, cfg.backoff_max)),
            cfg,
            monitor,
            engine: Mutex::new(engine),
            passes_running: AtomicUsize::new(0),
            self_tgid: std::process::id(),
        }))
    }

    /// Run one deployment pass on a worker thread over the given snapshot
    /// of live processes. Passes are serialized internally; the in-flight
    /// counter is bumped before the thread spawns so [`Self::is_running`]
    /// never misses a pending pass.
    pub(crate) fn deploy(self: &Arc<Self>, live: HashSet<Pid>) -> thread::JoinHandle<DeploySummary> {
        self.passes_running.fetch_add(1, Ordering::SeqCst);
        let mgr = Arc::clone(self);
        thread::spawn(move || {
            let summary = mgr.run_pass(live);
            mgr.passes_running.fetch_sub(1, Ordering::SeqCst);
            summary
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.passes_running.load(Ordering::SeqCst) != 0
    }

    /// Kernel notification of a new executable mapping in `pid`.
    pub(crate) fn notify_map_change(&self, pid: Pid) {
        if !self.cfg.rescan_on_map_change {
            return;
        }
        self.scheduler.lock().unwrap().notify_map_change(pid);
    }

    fn run_pass(&self, live: HashSet<Pid>) -> DeploySummary {
        let mut engine = self.engine.lock().unwrap();
        let mut scheduler = self.scheduler.lock().unwrap();

        let diff = engine.tracker.update(&live);
        for pid in &diff.deleted {
            engine.cleanup_pid(pid);
            scheduler.forget(pid);
        }
        if !diff.new.is_empty() {
            debug!("{} new process(es) since last pass", diff.new.len());
        }

        // Candidates: every live process still due per its rescan backoff,
        // so late dlopens get picked up eventually. New processes carry no
        // backoff state yet and always qualify.
        let mut candidates: Vec<Pid> = live.iter().copied().collect();
        candidates.sort();
        candidates.retain(|pid| {
            if self.cfg.disable_self_probing && pid.tgid == self.self_tgid {
                return false;
            }
            scheduler.should_scan(pid)
        });

        let mut by_pid: HashMap<Pid, Outcome> = HashMap::new();
        for pid in &candidates {
            let mut outcome = engine.deploy_openssl(pid, self.monitor.as_ref());
            outcome.merge(engine.deploy_node(pid, self.monitor.as_ref()));
            by_pid.insert(*pid, outcome);
        }
        engine.deploy_go(
            &candidates,
            &self.cfg,
            self.monitor.as_ref(),
            &mut by_pid,
        );

        let mut summary = DeploySummary::default();
        for pid in candidates {
            let outcome = by_pid.remove(&pid).unwrap_or_default();
            scheduler.record_scan(pid, outcome.probes > 0);
            summary.probes_attached += outcome.probes;
            summary.statuses.push(TargetStatus {
                pid,
                probes: outcome.probes,
                errors: outcome.errors,
            });
        }

        if summary.probes_attached > 0 {
            info!("Attached {} uprobes", summary.probes_attached);
        }
        summary
    }
}

impl Engine {
    fn cleanup_pid(&mut self, pid: &Pid) {
        debug!("Cleaning up maps for exited pid {}", pid.tgid);
        self.openssl_map.remove(&pid.tgid);
        self.go_common_map.remove(&pid.tgid);
        self.go_http2_map.remove(&pid.tgid);
        self.go_tls_map.remove(&pid.tgid);
        self.node_tlswrap_map.remove(&pid.tgid);
    }

    /// OpenSSL deployment for one process: per-pid struct offsets in the
    /// kernel map, plus the five libssl probes once per libssl path.
    fn deploy_openssl(&mut self, pid: &Pid, monitor: &dyn Monitor) -> Outcome {
        let mut out = Outcome::default();
        let Some(libs) = classify::find_ssl_libraries(self.proc.as_ref(), pid) else {
            return out;
        };

        let symaddrs = match classify::detect_openssl_version(&libs)
            .and_then(|ver| symaddrs::openssl_symaddrs(&ver))
        {
            Ok(symaddrs) => symaddrs,
            Err(e) => {
                report_deploy_error(monitor, "deploy-openssl", pid, &e);
                out.errors.push(e.to_string());
                return out;
            }
        };
        if let Err(e) = self.openssl_map.update(pid.tgid, &symaddrs) {
            report_deploy_error(monitor, "deploy-openssl", pid, &e);
            out.errors.push(e.to_string());
            return out;
        }

        if self.openssl_probed.contains(&libs.libssl) {
            return out;
        }
        match BinaryInspector::open(&libs.libssl) {
            Ok(inspector) => {
                out.merge(self.attach_templates(&inspector, catalog::OPENSSL_TMPLS, monitor));
                self.openssl_probed.insert(libs.libssl.clone());
            }
            Err(e) => {
                report_deploy_error(monitor, "deploy-openssl", pid, &e);
                out.errors.push(e.to_string());
            }
        }
        out
    }

    /// Node deployment for one process: TLSWrap offsets per pid, probes on
    /// the node executable once per path. node links OpenSSL statically, so
    /// the SSL catalog attaches to the executable itself, alongside the
    /// TLSWrap probes that recover the socket fd.
    fn deploy_node(&mut self, pid: &Pid, monitor: &dyn Monitor) -> Outcome {
        let mut out = Outcome::default();
        let Ok(exe) = self.proc.exe_path(pid) else {
            return out;
        };
        if !classify::is_node_executable(&exe) {
            return out;
        }
        let node_exe = self.proc.resolve(pid, &exe);

        let resolved = classify::node_version(&node_exe).and_then(|ver| {
            let tmpls = catalog::node_tlswrap_tmpls(&ver)?;
            let symaddrs = symaddrs::node_tlswrap_symaddrs(&node_exe, &ver)?;
            Ok((tmpls, symaddrs))
        });
        let (tmpls, symaddrs) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                report_deploy_error(monitor, "deploy-node", pid, &e);
                out.errors.push(e.to_string());
                return out;
            }
        };

        if let Err(e) = self.node_tlswrap_map.update(pid.tgid, &symaddrs) {
            report_deploy_error(monitor, "deploy-node", pid, &e);
            out.errors.push(e.to_string());
            return out;
        }

        if self.node_probed.contains(&node_exe) {
            return out;
        }
        match BinaryInspector::open(&node_exe) {
            Ok(inspector) => {
                out.merge(self.attach_templates(&inspector, catalog::OPENSSL_TMPLS, monitor));
                out.merge(self.attach_templates(&inspector, tmpls, monitor));
                self.node_probed.insert(node_exe);
            }
            Err(e) => {
                report_deploy_error(monitor, "deploy-node", pid, &e);
                out.errors.push(e.to_string());
            }
        }
        out
    }

    /// Go deployment: candidates grouped by executable so each binary is
    /// inspected and probed once, with per-pid map writes for every process
    /// running it.
    fn deploy_go(
        &mut self,
        candidates: &[Pid],
        cfg: &ManagerConfig,
        monitor: &dyn Monitor,
        by_pid: &mut HashMap<Pid, Outcome>,
    ) {
        let mut by_binary: HashMap<PathBuf, Vec<Pid>> = HashMap::new();
        for pid in candidates {
            match self.proc.exe_path(pid) {
                Ok(exe) => {
                    let resolved = self.proc.resolve(pid, &exe);
                    by_binary.entry(resolved).or_default().push(*pid);
                }
                Err(e) => {
                    // Gone already, or not ours to read.
                    debug!("Could not read exe of pid {}: {e}", pid.tgid);
                }
            }
        }

        for (path, pids) in by_binary {
            let outcome = self.deploy_go_on_binary(&path, &pids, cfg, monitor);
            // Attachments are per binary: credit the count to one pid so
            // the pass total stays accurate, but surface errors on all.
            for (i, pid) in pids.into_iter().enumerate() {
                let entry = by_pid.entry(pid).or_default();
                entry.errors.extend(outcome.errors.iter().cloned());
                if i == 0 {
                    entry.probes += outcome.probes;
                }
            }
        }
    }

    fn deploy_go_on_binary(
        &mut self,
        path: &Path,
        pids: &[Pid],
        cfg: &ManagerConfig,
        monitor: &dyn Monitor,
    ) -> Outcome {
        let mut out = Outcome::default();
        let inspector = match BinaryInspector::open(path) {
            Ok(inspector) => inspector,
            Err(e) => {
                for pid in pids {
                    report_deploy_error(monitor, "deploy-go", pid, &e);
                }
                out.errors.push(e.to_string());
                return out;
            }
        };
        if !inspector.is_go_binary() {
            return out;
        }

        let symaddrs = match self.resolve_go(&inspector, cfg, monitor) {
            Ok(symaddrs) => symaddrs,
            Err(e) => {
                for pid in pids {
                    report_deploy_error(monitor, "deploy-go", pid, &e);
                }
                out.errors.push(e.to_string());
                return out;
            }
        };

        for pid in pids {
            if let Err(e) = self.go_common_map.update(pid.tgid, &symaddrs.common) {
                report_deploy_error(monitor, "deploy-go", pid, &e);
                out.errors.push(e.to_string());
            }
            if let Some(tls) = symaddrs.tls.as_ref() {
                if let Err(e) = self.go_tls_map.update(pid.tgid, tls) {
                    report_deploy_error(monitor, "deploy-go-tls", pid, &e);
                    out.errors.push(e.to_string());
                }
            }
            if let Some(http2) = symaddrs.http2.as_ref() {
                if cfg.enable_http2_tracing {
                    if let Err(e) = self.go_http2_map.update(pid.tgid, http2) {
                        report_deploy_error(monitor, "deploy-go-http2", pid, &e);
                        out.errors.push(e.to_string());
                    }
                }
            }
        }

        if !self.go_probed.contains(path) {
            out.merge(self.attach_templates(&inspector, catalog::GO_RUNTIME_TMPLS, monitor));
            self.go_probed.insert(path.to_path_buf());
        }
        if symaddrs.tls.is_some() && !self.go_tls_probed.contains(path) {
            out.merge(self.attach_templates(&inspector, catalog::GO_TLS_TMPLS, monitor));
            self.go_tls_probed.insert(path.to_path_buf());
        }
        if cfg.enable_http2_tracing
            && symaddrs.http2.is_some()
            && !self.go_http2_probed.contains(path)
        {
            out.merge(self.attach_templates(&inspector, catalog::GO_HTTP2_TMPLS, monitor));
            self.go_http2_probed.insert(path.to_path_buf());
        }
        out
    }

    /// Resolve (or fetch cached) Go symaddrs for one binary. Common offsets
    /// failing fails the binary; TLS and http2 degrade independently.
    fn resolve_go(
        &mut self,
        inspector: &BinaryInspector,
        cfg: &ManagerConfig,
        monitor: &dyn Monitor,
    ) -> Result<GoSymaddrs, ProbeError> {
        if let Some(cached) = self.go_cache.get(inspector.path()) {
            return Ok(*cached);
        }

        let dwarf = DwarfReader::open(inspector.path()).map_err(|e| {
            ProbeError::BinaryUnparseable {
                path: inspector.path().to_path_buf(),
                reason: format!("No usable debug info: {e}"),
            }
        })?;
        let symaddrs =
            resolve_go_symaddrs(inspector, &dwarf, inspector.path(), cfg.enable_http2_tracing)?;

        monitor.report_deploy_status(
            "resolve-go",
            "ok",
            "Resolved Go symaddrs",
            json!({ "binary": inspector.path().display().to_string() }),
        );
        self.go_cache
            .insert(inspector.path().to_path_buf(), symaddrs);
        Ok(symaddrs)
    }

    /// Attach every template in a catalog against one binary. Templates
    /// with no matching symbol are skipped; attach failures are reported
    /// and isolated per probe.
    fn attach_templates(
        &mut self,
        inspector: &BinaryInspector,
        tmpls: &[ProbeTemplate],
        monitor: &dyn Monitor,
    ) -> Outcome {
        let mut out = Outcome::default();
        for tmpl in tmpls {
            let matches: Vec<_> = inspector
                .matching_func_symbols(tmpl.symbol, tmpl.match_mode)
                .into_iter()
                .cloned()
                .collect();
            if matches.is_empty() {
                debug!(
                    "No symbol matching '{}' in {}",
                    tmpl.symbol,
                    inspector.path().display()
                );
                continue;
            }

            for sym in matches {
                let offsets = match tmpl.attach {
                    AttachKind::Entry | AttachKind::Return => {
                        inspector.file_offset(sym.address).map(|o| vec![o])
                    }
                    AttachKind::ReturnInsts => inspector.ret_offsets(&sym),
                };
                let offsets = match offsets {
                    Ok(offsets) => offsets,
                    Err(e) => {
                        out.errors.push(e.to_string());
                        continue;
                    }
                };

                for offset in offsets {
                    let spec = UprobeSpec {
                        path: inspector.path().to_path_buf(),
                        symbol: sym.name.clone(),
                        file_offset: offset,
                        retprobe: tmpl.attach == AttachKind::Return,
                        probe_fn: tmpl.probe_fn,
                    };
                    match self.tracer.attach_uprobe(&spec) {
                        Ok(()) => {
                            out.probes += 1;
                            monitor.report_probe_status(
                                tmpl.probe_fn,
                                "ok",
                                "attached",
                                json!({
                                    "binary": spec.path.display().to_string(),
                                    "symbol": spec.symbol,
                                }),
                            );
                        }
                        Err(e) => {
                            monitor.report_probe_status(
                                tmpl.probe_fn,
                                e.status(),
                                &e.to_string(),
                                json!({
                                    "binary": spec.path.display().to_string(),
                                    "symbol": spec.symbol,
                                }),
                            );
                            out.errors.push(e.to_string());
                        }
                    }
                }
            }
        }
        out
    }
}

/// Resolve Go symaddrs from a binary's symbols and debug info. The common
/// offsets are required; a TLS resolution failure only drops that catalog,
/// the runtime probes still deploy.
fn resolve_go_symaddrs(
    syms: &dyn SymbolSource,
    debug: &dyn DebugInfo,
    binary: &Path,
    enable_http2: bool,
) -> Result<GoSymaddrs, ProbeError> {
    let vendor_prefix = symaddrs::infer_vendor_prefix(syms);

    let common = symaddrs::go_common_symaddrs(syms, debug, &vendor_prefix)?;
    let tls = match symaddrs::go_tls_symaddrs(debug) {
        Ok(tls) => Some(tls),
        Err(e) => {
            warn!("Go TLS symaddrs unavailable for {}: {e}", binary.display());
            None
        }
    };
    let http2 = if enable_http2 {
        Some(symaddrs::go_http2_symaddrs(syms, debug, &vendor_prefix)?)
    } else {
        None
    };

    Ok(GoSymaddrs { common, tls, http2 })
}

fn report_deploy_error(monitor: &dyn Monitor, operation: &str, pid: &Pid, err: &ProbeError) {
    monitor.report_deploy_status(
        operation,
        err.status(),
        &err.to_string(),
        json!({ "tgid": pid.tgid }),
    );
}
