//! Static probe catalogs, one per traced library.
//!
//! Go symbols are matched by suffix so that vendored import paths (e.g.
//! `vendor/golang.org/x/net/http2`) still resolve. Node's C++ symbols are
//! matched by mangled-name prefix to tolerate signature changes between
//! releases. OpenSSL exports plain C names, matched exactly.

use super::{AttachKind, MatchMode, ProbeError, ProbeTemplate};
use crate::core::version::SemVer;

/// Go runtime probes, needed by all Go tracing to map goroutines to threads.
pub(crate) static GO_RUNTIME_TMPLS: &[ProbeTemplate] = &[ProbeTemplate {
    symbol: "runtime.casgstatus",
    match_mode: MatchMode::Suffix,
    attach: AttachKind::Entry,
    probe_fn: "probe_runtime_casgstatus",
}];

/// Probes on Go's http2 stacks: gRPC's transport, golang.org/x/net/http2 and
/// net/http's bundled copy of it.
pub(crate) static GO_HTTP2_TMPLS: &[ProbeTemplate] = &[
    ProbeTemplate {
        symbol: "google.golang.org/grpc/internal/transport.(*http2Client).operateHeaders",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http2_client_operate_headers",
    },
    ProbeTemplate {
        symbol: "google.golang.org/grpc/internal/transport.(*http2Server).operateHeaders",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http2_server_operate_headers",
    },
    ProbeTemplate {
        symbol: "google.golang.org/grpc/internal/transport.(*loopyWriter).writeHeader",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_loopy_writer_write_header",
    },
    ProbeTemplate {
        symbol: "golang.org/x/net/http2.(*Framer).WriteDataPadded",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http2_framer_write_data",
    },
    ProbeTemplate {
        symbol: "golang.org/x/net/http2.(*Framer).checkFrameOrder",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http2_framer_check_frame_order",
    },
    ProbeTemplate {
        symbol: "net/http.(*http2Framer).WriteDataPadded",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http_http2framer_write_data",
    },
    ProbeTemplate {
        symbol: "net/http.(*http2Framer).checkFrameOrder",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http_http2framer_check_frame_order",
    },
    ProbeTemplate {
        symbol: "net/http.(*http2writeResHeaders).writeFrame",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http_http2writeResHeaders_write_frame",
    },
    ProbeTemplate {
        symbol: "golang.org/x/net/http2/hpack.(*Encoder).WriteField",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_hpack_header_encoder",
    },
    ProbeTemplate {
        symbol: "net/http.(*http2serverConn).processHeaders",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_http_http2serverConn_processHeaders",
    },
];

/// Probes on Go's crypto/tls. Return probes use per-instruction attachment
/// because uretprobes corrupt Go's relocatable stacks.
pub(crate) static GO_TLS_TMPLS: &[ProbeTemplate] = &[
    ProbeTemplate {
        symbol: "crypto/tls.(*Conn).Write",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_tls_conn_write",
    },
    ProbeTemplate {
        symbol: "crypto/tls.(*Conn).Write",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::ReturnInsts,
        probe_fn: "probe_return_tls_conn_write",
    },
    ProbeTemplate {
        symbol: "crypto/tls.(*Conn).Read",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_tls_conn_read",
    },
    ProbeTemplate {
        symbol: "crypto/tls.(*Conn).Read",
        match_mode: MatchMode::Suffix,
        attach: AttachKind::ReturnInsts,
        probe_fn: "probe_return_tls_conn_read",
    },
];

/// Probes on node's TLSWrap member functions, for recovering the socket fd
/// behind each SSL object. Node 15 moved TLSWrap into the crypto namespace,
/// which changes the mangled names.
static NODE_TLSWRAP_TMPLS_V12_3_1: &[ProbeTemplate] = &[
    ProbeTemplate {
        symbol: "_ZN4node7TLSWrapC2E",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node7TLSWrapC2E",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node7TLSWrap7ClearInE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node7TLSWrap7ClearInE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node7TLSWrap8ClearOutE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node7TLSWrap8ClearOutE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_TLSWrap_memfn",
    },
];

static NODE_TLSWRAP_TMPLS_V15_0_0: &[ProbeTemplate] = &[
    ProbeTemplate {
        symbol: "_ZN4node6crypto7TLSWrapC2E",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node6crypto7TLSWrapC2E",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node6crypto7TLSWrap7ClearInE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node6crypto7TLSWrap7ClearInE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node6crypto7TLSWrap8ClearOutE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_TLSWrap_memfn",
    },
    ProbeTemplate {
        symbol: "_ZN4node6crypto7TLSWrap8ClearOutE",
        match_mode: MatchMode::Prefix,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_TLSWrap_memfn",
    },
];

/// Select the TLSWrap catalog for a node release. Versions below 12.3.1
/// predate the TLSWrap layout we can decode and are rejected; versions newer
/// than the last known release fall back to the newest catalog.
pub(crate) fn node_tlswrap_tmpls(ver: &SemVer) -> Result<&'static [ProbeTemplate], ProbeError> {
    if *ver < SemVer::new(12, 3, 1) {
        return Err(ProbeError::UnsupportedVersion {
            what: "node",
            version: ver.to_string(),
        });
    }
    if *ver < SemVer::new(15, 0, 0) {
        Ok(NODE_TLSWRAP_TMPLS_V12_3_1)
    } else {
        Ok(NODE_TLSWRAP_TMPLS_V15_0_0)
    }
}

/// Probes on libssl's C API. SSL_new's return probe records the SSL object
/// to TLSWrap association used by node tracing.
pub(crate) static OPENSSL_TMPLS: &[ProbeTemplate] = &[
    ProbeTemplate {
        symbol: "SSL_write",
        match_mode: MatchMode::Exact,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_SSL_write",
    },
    ProbeTemplate {
        symbol: "SSL_write",
        match_mode: MatchMode::Exact,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_SSL_write",
    },
    ProbeTemplate {
        symbol: "SSL_read",
        match_mode: MatchMode::Exact,
        attach: AttachKind::Entry,
        probe_fn: "probe_entry_SSL_read",
    },
    ProbeTemplate {
        symbol: "SSL_read",
        match_mode: MatchMode::Exact,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_SSL_read",
    },
    ProbeTemplate {
        symbol: "SSL_new",
        match_mode: MatchMode::Exact,
        attach: AttachKind::Return,
        probe_fn: "probe_ret_SSL_new",
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_catalog_selection() {
        assert!(node_tlswrap_tmpls(&SemVer::new(12, 3, 0)).is_err());
        assert!(node_tlswrap_tmpls(&SemVer::new(10, 19, 0)).is_err());

        let v12 = node_tlswrap_tmpls(&SemVer::new(12, 3, 1)).unwrap();
        assert!(v12[0].symbol.starts_with("_ZN4node7TLSWrap"));
        let v14 = node_tlswrap_tmpls(&SemVer::new(14, 17, 6)).unwrap();
        assert_eq!(v14[0].symbol, v12[0].symbol);

        // Newer-than-known releases use the newest catalog.
        let v16 = node_tlswrap_tmpls(&SemVer::new(16, 4, 0)).unwrap();
        assert!(v16[0].symbol.starts_with("_ZN4node6crypto7TLSWrap"));
    }

    #[test]
    fn go_tls_returns_avoid_uretprobes() {
        for tmpl in GO_TLS_TMPLS
            .iter()
            .chain(GO_HTTP2_TMPLS)
            .chain(GO_RUNTIME_TMPLS)
        {
            assert_ne!(tmpl.attach, AttachKind::Return, "{}", tmpl.probe_fn);
        }
    }

    #[test]
    fn catalog_sizes() {
        assert_eq!(GO_RUNTIME_TMPLS.len(), 1);
        assert_eq!(GO_HTTP2_TMPLS.len(), 10);
        assert_eq!(GO_TLS_TMPLS.len(), 4);
        assert_eq!(OPENSSL_TMPLS.len(), 5);
    }
}
