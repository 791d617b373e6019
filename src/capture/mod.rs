//! Live packet capture on one interface, feeding the frame classifier.
//!
//! - [`pcap_backend`] opens the libpcap handle and runs the read loop
//! - this module owns the engine lifecycle and the header parsing, which is
//!   pure and independent of the capture source

pub mod pcap_backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::core::{FrameClassifier, FrameSummary, StatsStore};
use crate::error::AppError;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;

/// 802.1ad outer tag plus one 802.1Q inner tag.
const MAX_VLAN_TAGS: usize = 2;

const IPPROTO_TCP: u8 = 6;
const IPPROTO_UDP: u8 = 17;

/// Link-layer framing of captured data, derived from the handle's datalink type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    /// Linux cooked capture v1, used by the `any` pseudo-device.
    LinuxSll,
    LinuxSll2,
    /// Bare IPv4/IPv6 with no link header.
    RawIp,
}

impl LinkKind {
    /// Map a libpcap DLT value. `None` for framings this crate cannot decode.
    pub fn from_dlt(dlt: i32) -> Option<Self> {
        match dlt {
            1 => Some(LinkKind::Ethernet),
            113 => Some(LinkKind::LinuxSll),
            276 => Some(LinkKind::LinuxSll2),
            12 | 14 | 101 | 228 | 229 => Some(LinkKind::RawIp),
            _ => None,
        }
    }
}

/// Transport header fields extracted from one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPorts {
    pub src_port: u16,
    pub dst_port: u16,
}

/// Shared flag reporting whether a capture loop is currently running.
#[derive(Debug, Default)]
pub struct CaptureStatus {
    active: AtomicBool,
}

impl CaptureStatus {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

/// Manages the background capture thread.
/// Cancels the loop on drop so the handle is released on exit.
pub struct CaptureEngine {
    shutdown: CancellationToken,
    capture_thread: Option<std::thread::JoinHandle<()>>,
}

impl CaptureEngine {
    /// Open the configured interface and start the capture thread.
    ///
    /// Fails if the interface cannot be opened; the caller decides whether to
    /// carry on without host-mode accounting.
    pub fn start(
        settings: &Settings,
        classifier: Arc<FrameClassifier>,
        stats: Arc<StatsStore>,
        status: Arc<CaptureStatus>,
        shutdown: CancellationToken,
    ) -> Result<Self, AppError> {
        let (capture, link) = pcap_backend::open(
            &settings.interface,
            settings.snaplen,
            settings.read_timeout_ms,
        )
        .map_err(|e| AppError::Capture(format!("{e:#}")))?;

        let loop_shutdown = shutdown.clone();
        let interface = settings.interface.clone();
        let thread = std::thread::Builder::new()
            .name("pcap-capture".into())
            .spawn(move || {
                status.set_active(true);
                if let Err(e) =
                    pcap_backend::run_capture_loop(capture, link, &classifier, &stats, &loop_shutdown)
                {
                    tracing::error!("Capture loop on {interface} exited: {e:#}");
                }
                status.set_active(false);
            })?;

        tracing::info!(
            interface = %settings.interface,
            ?link,
            snaplen = settings.snaplen,
            "CaptureEngine started"
        );
        Ok(Self {
            shutdown,
            capture_thread: Some(thread),
        })
    }

    fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Stop the loop and wait for the thread. Blocks for up to one read timeout.
    pub fn join(mut self) {
        self.stop();
        if let Some(thread) = self.capture_thread.take() {
            if thread.join().is_err() {
                tracing::error!("Capture thread panicked");
            }
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Parse one captured frame and credit it. Frames without an IP layer or a
/// TCP/UDP header are dropped silently.
///
/// `wire_len` is the original length reported by the capture source, so the
/// credited amount does not depend on the snap length.
pub fn account_frame(
    classifier: &FrameClassifier,
    stats: &StatsStore,
    link: LinkKind,
    wire_len: u32,
    data: &[u8],
) -> bool {
    let Some(ports) = parse_frame(link, data) else {
        return false;
    };
    classifier.account(
        &FrameSummary {
            src_port: ports.src_port,
            dst_port: ports.dst_port,
            length: u64::from(wire_len),
        },
        stats,
    )
}

/// Strip the link header and parse the IP and transport headers beneath it.
pub fn parse_frame(link: LinkKind, data: &[u8]) -> Option<TransportPorts> {
    let ip = match link {
        LinkKind::RawIp => data,
        LinkKind::Ethernet => {
            let mut ethertype = read_u16(data, 12)?;
            let mut offset = 14;
            let mut tags = 0;
            while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
                tags += 1;
                if tags > MAX_VLAN_TAGS {
                    return None;
                }
                ethertype = read_u16(data, offset + 2)?;
                offset += 4;
            }
            ip_payload(ethertype, data, offset)?
        }
        LinkKind::LinuxSll => ip_payload(read_u16(data, 14)?, data, 16)?,
        LinkKind::LinuxSll2 => ip_payload(read_u16(data, 0)?, data, 20)?,
    };
    parse_ip_packet(ip)
}

fn ip_payload(ethertype: u16, data: &[u8], offset: usize) -> Option<&[u8]> {
    match ethertype {
        ETHERTYPE_IPV4 | ETHERTYPE_IPV6 => data.get(offset..),
        _ => None,
    }
}

/// Parse an IPv4 or IPv6 packet and extract the TCP/UDP src/dst ports.
pub fn parse_ip_packet(data: &[u8]) -> Option<TransportPorts> {
    let version = data.first()? >> 4;
    let (protocol_byte, header_len) = match version {
        4 => {
            if data.len() < 20 {
                return None;
            }
            let ihl = ((data[0] & 0x0F) as usize) * 4;
            if ihl < 20 {
                return None;
            }
            // Non-first fragments carry no transport header.
            let fragment_offset = read_u16(data, 6)? & 0x1FFF;
            if fragment_offset != 0 {
                return None;
            }
            (data[9], ihl)
        }
        6 => {
            if data.len() < 40 {
                return None;
            }
            skip_ipv6_extensions(data, data[6], 40)?
        }
        _ => return None,
    };

    if !matches!(protocol_byte, IPPROTO_TCP | IPPROTO_UDP) {
        return None;
    }

    Some(TransportPorts {
        src_port: read_u16(data, header_len)?,
        dst_port: read_u16(data, header_len + 2)?,
    })
}

/// Walk hop-by-hop, routing, destination-options and fragment headers.
/// Returns the upper-layer protocol and its offset.
fn skip_ipv6_extensions(data: &[u8], mut next: u8, mut offset: usize) -> Option<(u8, usize)> {
    loop {
        match next {
            0 | 43 | 60 => {
                let len = (*data.get(offset + 1)? as usize + 1) * 8;
                next = *data.get(offset)?;
                offset += len;
            }
            44 => {
                let fragment_offset = read_u16(data, offset + 2)? >> 3;
                if fragment_offset != 0 {
                    return None;
                }
                next = *data.get(offset)?;
                offset += 8;
            }
            _ => return Some((next, offset)),
        }
    }
}

fn read_u16(data: &[u8], at: usize) -> Option<u16> {
    let bytes = data.get(at..at + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}
