//! Resolution of the per-library symbol address structs shared with the
//! kernel probes.
//!
//! The BPF programs cannot hard-code struct layouts of the libraries they
//! instrument, so user space resolves them per binary (ELF symbol addresses
//! and DWARF member offsets) and publishes them through per-pid hash maps.
//! Optional fields are set to -1 when unresolvable; a missing *mandatory*
//! field fails the whole catalog for that binary.

use std::path::Path;

use log::{debug, info};
use plain::Plain;

use crate::core::{
    inspect::{
        dwarf::{DebugInfo, DwarfReader},
        elf::SymbolSource,
    },
    probe::{MatchMode, ProbeError},
    version::{floor_lookup, SemVer},
};

const NONE: i64 = -1;

/// Offsets shared by all Go probes: the interface tables used to unwrap a
/// net.Conn down to a TCPConn, and the FD chain to the socket fd.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct GoCommonSymaddrs {
    pub(crate) internal_syscall_conn: i64,
    pub(crate) tls_conn: i64,
    pub(crate) net_tcp_conn: i64,
    pub(crate) fd_sysfd_offset: i64,
    pub(crate) tls_conn_conn_offset: i64,
    pub(crate) syscall_conn_conn_offset: i64,
    pub(crate) g_goid_offset: i64,
}

unsafe impl Plain for GoCommonSymaddrs {}

/// Offsets for the Go http2 probes, covering golang.org/x/net/http2,
/// gRPC's transport and net/http's bundled http2 copy. None are mandatory;
/// a missing library simply leaves its fields at -1.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct GoHttp2Symaddrs {
    pub(crate) http_http2buffered_writer: i64,
    pub(crate) transport_buf_writer: i64,
    pub(crate) header_field_name_offset: i64,
    pub(crate) header_field_value_offset: i64,
    pub(crate) http2_server_conn_offset: i64,
    pub(crate) http2_client_conn_offset: i64,
    pub(crate) loopy_writer_framer_offset: i64,
    pub(crate) framer_w_offset: i64,
    pub(crate) meta_headers_frame_headers_frame_offset: i64,
    pub(crate) meta_headers_frame_fields_offset: i64,
    pub(crate) headers_frame_frame_header_offset: i64,
    pub(crate) frame_header_type_offset: i64,
    pub(crate) frame_header_flags_offset: i64,
    pub(crate) frame_header_stream_id_offset: i64,
    pub(crate) data_frame_data_offset: i64,
    pub(crate) buf_writer_conn_offset: i64,
    pub(crate) http2server_conn_conn_offset: i64,
    pub(crate) http2server_conn_hpack_encoder_offset: i64,
    pub(crate) http2_headers_frame_http2_frame_header_offset: i64,
    pub(crate) http2_frame_header_type_offset: i64,
    pub(crate) http2_frame_header_flags_offset: i64,
    pub(crate) http2_frame_header_stream_id_offset: i64,
    pub(crate) http2_data_frame_data_offset: i64,
    pub(crate) http2_write_res_headers_stream_id_offset: i64,
    pub(crate) http2_write_res_headers_end_stream_offset: i64,
    pub(crate) http2_meta_headers_frame_http2_headers_frame_offset: i64,
    pub(crate) http2_meta_headers_frame_fields_offset: i64,
    pub(crate) http2_framer_w_offset: i64,
    pub(crate) http2_buffered_writer_w_offset: i64,
}

unsafe impl Plain for GoHttp2Symaddrs {}

/// Offsets for the crypto/tls probes.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct GoTlsSymaddrs {
    pub(crate) conn_conn_offset: i64,
}

unsafe impl Plain for GoTlsSymaddrs {}

/// Offsets into OpenSSL's opaque structs, keyed on release.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub(crate) struct OpensslSymaddrs {
    pub(crate) ssl_rbio_offset: i64,
    pub(crate) rbio_num_offset: i64,
}

unsafe impl Plain for OpensslSymaddrs {}

/// The member chain from a node TLSWrap object down to the libuv socket fd.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct NodeTlswrapSymaddrs {
    pub(crate) tlswrap_stream_listener_offset: i64,
    pub(crate) stream_listener_stream_offset: i64,
    pub(crate) stream_base_stream_resource_offset: i64,
    pub(crate) libuv_stream_wrap_stream_base_offset: i64,
    pub(crate) libuv_stream_wrap_stream_offset: i64,
    pub(crate) uv_stream_s_io_watcher_offset: i64,
    pub(crate) uv_io_s_fd_offset: i64,
}

unsafe impl Plain for NodeTlswrapSymaddrs {}

/// Infer the vendoring prefix of a Go binary's gRPC/http2 dependencies by
/// suffix-matching a few sample symbols. An unvendored build yields "".
pub(crate) fn infer_vendor_prefix(syms: &dyn SymbolSource) -> String {
    const SAMPLE_SYMBOLS: &[&str] = &[
        "google.golang.org/grpc/internal/transport.(*http2Client).operateHeaders",
        "golang.org/x/net/http2/hpack.HeaderField.String",
        "golang.org/x/net/http2.(*Framer).WriteHeaders",
    ];

    for sample in SAMPLE_SYMBOLS {
        let matches = syms.matching_symbol_names(sample, MatchMode::Suffix);
        // Multiple matches make the prefix ambiguous; try the next sample.
        if matches.len() != 1 {
            continue;
        }
        let name = &matches[0];
        let prefix = name[..name.len() - sample.len()].to_string();
        if !prefix.is_empty() {
            debug!("Inferred vendor prefix '{prefix}'");
        }
        return prefix;
    }
    String::new()
}

fn opt_addr(syms: &dyn SymbolSource, symbol: &str) -> i64 {
    syms.symbol_address(symbol).map_or(NONE, |a| a as i64)
}

fn opt_member(dwarf: &dyn DebugInfo, type_name: &str, member: &str) -> i64 {
    dwarf
        .struct_member_offset(type_name, member)
        .map_or(NONE, |o| o as i64)
}

/// Resolve the common Go symaddrs. The TCPConn itab and the
/// `internal/poll.FD.Sysfd` offset are mandatory: without them no Go probe
/// can recover a socket fd.
pub(crate) fn go_common_symaddrs(
    syms: &dyn SymbolSource,
    dwarf: &dyn DebugInfo,
    vendor_prefix: &str,
) -> Result<GoCommonSymaddrs, ProbeError> {
    let syscall_conn_itab = format!(
        "go.itab.*{vendor_prefix}google.golang.org/grpc/credentials/internal.syscallConn,net.Conn"
    );
    let syscall_conn_type =
        format!("{vendor_prefix}google.golang.org/grpc/credentials/internal.syscallConn");

    let symaddrs = GoCommonSymaddrs {
        internal_syscall_conn: opt_addr(syms, &syscall_conn_itab),
        tls_conn: opt_addr(syms, "go.itab.*crypto/tls.Conn,net.Conn"),
        net_tcp_conn: opt_addr(syms, "go.itab.*net.TCPConn,net.Conn"),
        fd_sysfd_offset: opt_member(dwarf, "internal/poll.FD", "Sysfd"),
        tls_conn_conn_offset: opt_member(dwarf, "crypto/tls.Conn", "conn"),
        syscall_conn_conn_offset: opt_member(dwarf, &syscall_conn_type, "conn"),
        g_goid_offset: opt_member(dwarf, "runtime.g", "goid"),
    };

    if symaddrs.net_tcp_conn == NONE {
        return Err(ProbeError::SymbolNotFound(
            "go.itab.*net.TCPConn,net.Conn".to_string(),
        ));
    }
    if symaddrs.fd_sysfd_offset == NONE {
        return Err(ProbeError::FieldLayoutUnresolved {
            type_name: "internal/poll.FD".to_string(),
            member: "Sysfd",
        });
    }

    Ok(symaddrs)
}

/// Resolve the http2 symaddrs. Nothing here is mandatory: the struct covers
/// several independent http2 libraries and probes on the present ones still
/// work when the others are absent.
pub(crate) fn go_http2_symaddrs(
    syms: &dyn SymbolSource,
    dwarf: &dyn DebugInfo,
    vendor_prefix: &str,
) -> Result<GoHttp2Symaddrs, ProbeError> {
    let vendored = |symbol: &str| format!("{vendor_prefix}{symbol}");
    let transport_buf_writer_itab = format!(
        "go.itab.*{vendor_prefix}google.golang.org/grpc/internal/transport.bufWriter,io.Writer"
    );

    Ok(GoHttp2Symaddrs {
        http_http2buffered_writer: opt_addr(
            syms,
            "go.itab.*net/http.http2bufferedWriter,io.Writer",
        ),
        transport_buf_writer: opt_addr(syms, &transport_buf_writer_itab),
        header_field_name_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2/hpack.HeaderField"),
            "Name",
        ),
        header_field_value_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2/hpack.HeaderField"),
            "Value",
        ),
        http2_server_conn_offset: opt_member(
            dwarf,
            &vendored("google.golang.org/grpc/internal/transport.http2Server"),
            "conn",
        ),
        http2_client_conn_offset: opt_member(
            dwarf,
            &vendored("google.golang.org/grpc/internal/transport.http2Client"),
            "conn",
        ),
        loopy_writer_framer_offset: opt_member(
            dwarf,
            &vendored("google.golang.org/grpc/internal/transport.loopyWriter"),
            "framer",
        ),
        framer_w_offset: opt_member(dwarf, &vendored("golang.org/x/net/http2.Framer"), "w"),
        meta_headers_frame_headers_frame_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.MetaHeadersFrame"),
            "HeadersFrame",
        ),
        meta_headers_frame_fields_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.MetaHeadersFrame"),
            "Fields",
        ),
        headers_frame_frame_header_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.HeadersFrame"),
            "FrameHeader",
        ),
        frame_header_type_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.FrameHeader"),
            "Type",
        ),
        frame_header_flags_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.FrameHeader"),
            "Flags",
        ),
        frame_header_stream_id_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.FrameHeader"),
            "StreamID",
        ),
        data_frame_data_offset: opt_member(
            dwarf,
            &vendored("golang.org/x/net/http2.DataFrame"),
            "data",
        ),
        buf_writer_conn_offset: opt_member(
            dwarf,
            &vendored("google.golang.org/grpc/internal/transport.bufWriter"),
            "conn",
        ),
        http2server_conn_conn_offset: opt_member(dwarf, "net/http.http2serverConn", "conn"),
        http2server_conn_hpack_encoder_offset: opt_member(
            dwarf,
            "net/http.http2serverConn",
            "hpackEncoder",
        ),
        http2_headers_frame_http2_frame_header_offset: opt_member(
            dwarf,
            "net/http.http2HeadersFrame",
            "http2FrameHeader",
        ),
        http2_frame_header_type_offset: opt_member(dwarf, "net/http.http2FrameHeader", "Type"),
        http2_frame_header_flags_offset: opt_member(dwarf, "net/http.http2FrameHeader", "Flags"),
        http2_frame_header_stream_id_offset: opt_member(
            dwarf,
            "net/http.http2FrameHeader",
            "StreamID",
        ),
        http2_data_frame_data_offset: opt_member(dwarf, "net/http.http2DataFrame", "data"),
        http2_write_res_headers_stream_id_offset: opt_member(
            dwarf,
            "net/http.http2writeResHeaders",
            "streamID",
        ),
        http2_write_res_headers_end_stream_offset: opt_member(
            dwarf,
            "net/http.http2writeResHeaders",
            "endStream",
        ),
        http2_meta_headers_frame_http2_headers_frame_offset: opt_member(
            dwarf,
            "net/http.http2MetaHeadersFrame",
            "http2HeadersFrame",
        ),
        http2_meta_headers_frame_fields_offset: opt_member(
            dwarf,
            "net/http.http2MetaHeadersFrame",
            "Fields",
        ),
        http2_framer_w_offset: opt_member(dwarf, "net/http.http2Framer", "w"),
        http2_buffered_writer_w_offset: opt_member(dwarf, "net/http.http2bufferedWriter", "w"),
    })
}

/// Resolve the crypto/tls symaddrs. The Conn-to-net.Conn member is
/// mandatory, it anchors the fd chain of the TLS probes.
pub(crate) fn go_tls_symaddrs(dwarf: &dyn DebugInfo) -> Result<GoTlsSymaddrs, ProbeError> {
    let conn_conn_offset = opt_member(dwarf, "crypto/tls.Conn", "conn");
    if conn_conn_offset == NONE {
        return Err(ProbeError::FieldLayoutUnresolved {
            type_name: "crypto/tls.Conn".to_string(),
            member: "conn",
        });
    }
    Ok(GoTlsSymaddrs { conn_conn_offset })
}

/// OpenSSL struct offsets by release. `SSL.rbio` sits at 0x10 throughout
/// 1.1.x; `BIO.num` moved from 0x28 (1.1.0) to 0x30 (1.1.1). Anything
/// outside 1.1.0/1.1.1 is rejected rather than guessed.
pub(crate) fn openssl_symaddrs(ver: &SemVer) -> Result<OpensslSymaddrs, ProbeError> {
    let rbio_num_offset = match (ver.major, ver.minor, ver.patch) {
        (1, 1, 0) => 0x28,
        (1, 1, 1) => 0x30,
        _ => {
            return Err(ProbeError::UnsupportedVersion {
                what: "openssl",
                version: ver.to_string(),
            })
        }
    };
    Ok(OpensslSymaddrs {
        ssl_rbio_offset: 0x10,
        rbio_num_offset,
    })
}

/// Hard-coded TLSWrap offset tables for node releases without usable debug
/// info, collected from debug builds of each release. Keys are the releases
/// where the layout changed; lookup takes the floor.
static NODE_SYMADDR_TABLE: &[(SemVer, NodeTlswrapSymaddrs)] = &[
    (
        SemVer::new(12, 3, 1),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x0130,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x50,
            libuv_stream_wrap_stream_offset: 0x90,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
    (
        SemVer::new(12, 16, 2),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x138,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x58,
            libuv_stream_wrap_stream_offset: 0x98,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
    (
        SemVer::new(13, 0, 0),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x130,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x50,
            libuv_stream_wrap_stream_offset: 0x90,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
    (
        SemVer::new(13, 2, 0),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x138,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x58,
            libuv_stream_wrap_stream_offset: 0x98,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
    (
        SemVer::new(13, 10, 1),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x140,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x60,
            libuv_stream_wrap_stream_offset: 0xa0,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
    (
        SemVer::new(14, 5, 0),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x138,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x58,
            libuv_stream_wrap_stream_offset: 0x98,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
    // Verified on 15.0 through 16.9; later releases take this entry too.
    (
        SemVer::new(15, 0, 0),
        NodeTlswrapSymaddrs {
            tlswrap_stream_listener_offset: 0x78,
            stream_listener_stream_offset: 0x08,
            stream_base_stream_resource_offset: 0x00,
            libuv_stream_wrap_stream_base_offset: 0x58,
            libuv_stream_wrap_stream_offset: 0x98,
            uv_stream_s_io_watcher_offset: 0x88,
            uv_io_s_fd_offset: 0x30,
        },
    ),
];

/// TLSWrap offsets straight from the node binary's debug info. TLSWrap
/// lives in `node` before 15.0 and `node::crypto` after, so both qualified
/// names are tried.
pub(crate) fn node_symaddrs_from_dwarf(dwarf: &dyn DebugInfo) -> Option<NodeTlswrapSymaddrs> {
    let parent = |classes: &[&str], parent: &str| {
        classes
            .iter()
            .find_map(|class| dwarf.class_parent_offset(class, parent))
    };
    let member = |classes: &[&str], member: &str| {
        classes
            .iter()
            .find_map(|class| dwarf.struct_member_offset(class, member))
    };

    let tlswrap: &[&str] = &["node::TLSWrap", "node::crypto::TLSWrap"];
    Some(NodeTlswrapSymaddrs {
        tlswrap_stream_listener_offset: parent(tlswrap, "StreamListener")? as i64,
        stream_listener_stream_offset: member(&["node::StreamListener"], "stream_")? as i64,
        stream_base_stream_resource_offset: parent(&["node::StreamBase"], "StreamResource")?
            as i64,
        libuv_stream_wrap_stream_base_offset: parent(&["node::LibuvStreamWrap"], "StreamBase")?
            as i64,
        libuv_stream_wrap_stream_offset: member(&["node::LibuvStreamWrap"], "stream_")? as i64,
        uv_stream_s_io_watcher_offset: member(&["uv_stream_s"], "io_watcher")? as i64,
        uv_io_s_fd_offset: member(&["uv__io_s"], "fd")? as i64,
    })
}

pub(crate) fn node_symaddrs_from_version(
    ver: &SemVer,
) -> Result<NodeTlswrapSymaddrs, ProbeError> {
    floor_lookup(NODE_SYMADDR_TABLE, ver)
        .copied()
        .ok_or_else(|| ProbeError::UnsupportedVersion {
            what: "node",
            version: ver.to_string(),
        })
}

/// Resolve TLSWrap offsets for one node executable: debug info when the
/// binary ships it, the per-version table otherwise. Debug builds of node
/// carry 700+MB of DWARF, so the reader is only attempted, never required.
pub(crate) fn node_tlswrap_symaddrs(
    node_exe: &Path,
    ver: &SemVer,
) -> Result<NodeTlswrapSymaddrs, ProbeError> {
    if let Ok(reader) = DwarfReader::open(node_exe) {
        if let Some(symaddrs) = node_symaddrs_from_dwarf(&reader) {
            info!("Resolved TLSWrap offsets from debug info of {}", node_exe.display());
            return Ok(symaddrs);
        }
    }
    node_symaddrs_from_version(ver)
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::core::inspect::dwarf::tests::FakeDebugInfo;
    use crate::core::probe::symbol_matches;

    /// Canned symbol table standing in for a parsed binary.
    #[derive(Default)]
    pub(crate) struct FakeSymbols {
        addrs: HashMap<String, u64>,
    }

    impl FakeSymbols {
        pub(crate) fn with_addr(mut self, name: &str, addr: u64) -> FakeSymbols {
            self.addrs.insert(name.to_string(), addr);
            self
        }
    }

    impl SymbolSource for FakeSymbols {
        fn symbol_address(&self, name: &str) -> Option<u64> {
            self.addrs.get(name).copied()
        }

        fn matching_symbol_names(&self, pattern: &str, mode: MatchMode) -> Vec<String> {
            self.addrs
                .keys()
                .filter(|name| symbol_matches(name, pattern, mode))
                .cloned()
                .collect()
        }
    }

    fn go_debug_info() -> FakeDebugInfo {
        FakeDebugInfo::default()
            .with_member("internal/poll.FD", "Sysfd", 16)
            .with_member("crypto/tls.Conn", "conn", 0)
            .with_member("runtime.g", "goid", 152)
    }

    #[test]
    fn openssl_offsets_by_release() {
        let v110 = openssl_symaddrs(&SemVer::new(1, 1, 0)).unwrap();
        assert_eq!((v110.ssl_rbio_offset, v110.rbio_num_offset), (0x10, 0x28));

        let v111 = openssl_symaddrs(&SemVer::new(1, 1, 1)).unwrap();
        assert_eq!((v111.ssl_rbio_offset, v111.rbio_num_offset), (0x10, 0x30));

        let err = openssl_symaddrs(&SemVer::new(3, 0, 0)).unwrap_err();
        assert_eq!(err.status(), "unsupported-version");
        assert!(openssl_symaddrs(&SemVer::new(1, 0, 2)).is_err());
    }

    #[test]
    fn node_version_table_floor() {
        let v12 = node_symaddrs_from_version(&SemVer::new(12, 3, 1)).unwrap();
        assert_eq!(v12.tlswrap_stream_listener_offset, 0x130);

        // Between table entries: floor to 13.2.0.
        let v13 = node_symaddrs_from_version(&SemVer::new(13, 5, 0)).unwrap();
        assert_eq!(v13.tlswrap_stream_listener_offset, 0x138);

        // Past the last entry: newest layout.
        let v16 = node_symaddrs_from_version(&SemVer::new(16, 9, 0)).unwrap();
        assert_eq!(v16.tlswrap_stream_listener_offset, 0x78);

        let err = node_symaddrs_from_version(&SemVer::new(12, 0, 0)).unwrap_err();
        assert_eq!(err.status(), "unsupported-version");
    }

    #[test]
    fn node_dwarf_resolution() {
        let dwarf = FakeDebugInfo::default()
            .with_parent("node::crypto::TLSWrap", "StreamListener", 0x78)
            .with_member("node::StreamListener", "stream_", 0x08)
            .with_parent("node::StreamBase", "StreamResource", 0x00)
            .with_parent("node::LibuvStreamWrap", "StreamBase", 0x58)
            .with_member("node::LibuvStreamWrap", "stream_", 0x98)
            .with_member("uv_stream_s", "io_watcher", 0x88)
            .with_member("uv__io_s", "fd", 0x30);

        let symaddrs = node_symaddrs_from_dwarf(&dwarf).unwrap();
        assert_eq!(
            symaddrs,
            node_symaddrs_from_version(&SemVer::new(15, 0, 0)).unwrap()
        );

        // Any missing link in the chain fails resolution as a whole.
        let partial = FakeDebugInfo::default().with_member("uv__io_s", "fd", 0x30);
        assert!(node_symaddrs_from_dwarf(&partial).is_none());
    }

    #[test]
    fn go_common_mandatory_fields() {
        let syms = FakeSymbols::default()
            .with_addr("go.itab.*net.TCPConn,net.Conn", 0x5000)
            .with_addr("go.itab.*crypto/tls.Conn,net.Conn", 0x5040);

        let common = go_common_symaddrs(&syms, &go_debug_info(), "").unwrap();
        assert_eq!(common.net_tcp_conn, 0x5000);
        assert_eq!(common.fd_sysfd_offset, 16);
        // Unresolvable optional fields report as absent, not as errors.
        assert_eq!(common.internal_syscall_conn, NONE);

        // Without the TCPConn itab no fd can ever be recovered.
        let err = go_common_symaddrs(&FakeSymbols::default(), &go_debug_info(), "")
            .unwrap_err();
        assert_eq!(err.status(), "symbol-not-found");

        let err = go_common_symaddrs(&syms, &FakeDebugInfo::default(), "").unwrap_err();
        assert_eq!(err.status(), "field-layout-unresolved");
    }

    #[test]
    fn vendor_prefix_from_sample_symbols() {
        let syms = FakeSymbols::default().with_addr(
            "vendor/golang.org/x/net/http2/hpack.HeaderField.String",
            0x100,
        );
        assert_eq!(infer_vendor_prefix(&syms), "vendor/");
        assert_eq!(infer_vendor_prefix(&FakeSymbols::default()), "");
    }

    #[test]
    fn go_tls_requires_conn_member() {
        assert_eq!(go_tls_symaddrs(&go_debug_info()).unwrap().conn_conn_offset, 0);

        let err = go_tls_symaddrs(&FakeDebugInfo::default()).unwrap_err();
        assert_eq!(err.status(), "field-layout-unresolved");
    }
}
