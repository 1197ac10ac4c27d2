//! Deployment status reporting.
//!
//! Every terminal outcome of a deployment attempt, success or failure, is
//! pushed to a [`Monitor`] with a stable status code and a JSON context
//! blob, so an external collector can aggregate per-target health without
//! scraping logs.

use log::{info, warn};
use serde_json::json;

pub(crate) trait Monitor: Send + Sync {
    /// Outcome of one probe attachment attempt.
    fn report_probe_status(
        &self,
        probe_fn: &str,
        status: &str,
        detail: &str,
        context: serde_json::Value,
    );

    /// Outcome of a whole (process, catalog) deployment.
    fn report_deploy_status(
        &self,
        operation: &str,
        status: &str,
        detail: &str,
        context: serde_json::Value,
    );
}

/// Default monitor: structured lines through the logger.
pub(crate) struct LogMonitor;

impl Monitor for LogMonitor {
    fn report_probe_status(
        &self,
        probe_fn: &str,
        status: &str,
        detail: &str,
        context: serde_json::Value,
    ) {
        let record = json!({
            "probe": probe_fn,
            "status": status,
            "detail": detail,
            "context": context,
        });
        if status == "ok" {
            info!("probe status: {record}");
        } else {
            warn!("probe status: {record}");
        }
    }

    fn report_deploy_status(
        &self,
        operation: &str,
        status: &str,
        detail: &str,
        context: serde_json::Value,
    ) {
        let record = json!({
            "operation": operation,
            "status": status,
            "detail": detail,
            "context": context,
        });
        if status == "ok" {
            info!("deploy status: {record}");
        } else {
            warn!("deploy status: {record}");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use super::*;

    /// Captures reports for assertions.
    #[derive(Default)]
    pub(crate) struct RecordingMonitor {
        pub(crate) probe_reports: Mutex<Vec<(String, String)>>,
        pub(crate) deploy_reports: Mutex<Vec<(String, String)>>,
    }

    impl Monitor for RecordingMonitor {
        fn report_probe_status(
            &self,
            probe_fn: &str,
            status: &str,
            _detail: &str,
            _context: serde_json::Value,
        ) {
            self.probe_reports
                .lock()
                .unwrap()
                .push((probe_fn.to_string(), status.to_string()));
        }

        fn report_deploy_status(
            &self,
            operation: &str,
            status: &str,
            _detail: &str,
            _context: serde_json::Value,
        ) {
            self.deploy_reports
                .lock()
                .unwrap()
                .push((operation.to_string(), status.to_string()));
        }
    }
}
