//! libpcap capture backend.
//!
//! The handle is opened non-promiscuous with a short snap length (only headers
//! are inspected) and a bounded read timeout, so the loop wakes regularly to
//! observe shutdown. The kernel buffer's drop policy is the only backpressure:
//! frames lost there are simply never counted.

use anyhow::{anyhow, Context, Result};
use pcap::{Activated, Active, Capture};
use tokio_util::sync::CancellationToken;

use crate::capture::{account_frame, LinkKind};
use crate::config::CAPTURE_FILTER;
use crate::core::{FrameClassifier, StatsStore};

/// Open `interface` and apply the TCP/UDP filter.
pub fn open(interface: &str, snaplen: i32, timeout_ms: i32) -> Result<(Capture<Active>, LinkKind)> {
    tracing::info!("Opening {interface} with filter: {CAPTURE_FILTER}");

    let mut capture = Capture::from_device(interface)
        .with_context(|| format!("Failed to look up capture device {interface}"))?
        .promisc(false)
        .snaplen(snaplen)
        .timeout(timeout_ms)
        .open()
        .with_context(|| {
            format!(
                "Failed to open {interface} for capture. \
                 Ensure the device exists and the process has CAP_NET_RAW \
                 (or runs privileged with host networking)."
            )
        })?;

    capture
        .filter(CAPTURE_FILTER, true)
        .with_context(|| format!("Failed to apply capture filter {CAPTURE_FILTER:?}"))?;

    let dlt = capture.get_datalink();
    let link = LinkKind::from_dlt(dlt.0)
        .ok_or_else(|| anyhow!("Unsupported link type {} on {interface}", dlt.0))?;

    Ok((capture, link))
}

/// Frame counts from one run of the capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureTotals {
    pub frames: u64,
    pub credited: u64,
}

/// Main capture loop running in a dedicated OS thread. Blocks on the next
/// frame (bounded by the read timeout) until `shutdown` is cancelled or the
/// source runs dry.
///
/// A read error other than a timeout ends the loop with `Err`: libpcap does
/// not recover a handle whose device went away, so retrying would only spin.
pub fn run_capture_loop<T: Activated + ?Sized>(
    mut capture: Capture<T>,
    link: LinkKind,
    classifier: &FrameClassifier,
    stats: &StatsStore,
    shutdown: &CancellationToken,
) -> Result<CaptureTotals> {
    let mut totals = CaptureTotals::default();

    let outcome = loop {
        if shutdown.is_cancelled() {
            break Ok(());
        }
        match capture.next_packet() {
            Ok(packet) => {
                totals.frames += 1;
                if account_frame(classifier, stats, link, packet.header.len, packet.data) {
                    totals.credited += 1;
                }
            }
            Err(pcap::Error::TimeoutExpired) => {}
            Err(pcap::Error::NoMorePackets) => break Ok(()),
            Err(_) if shutdown.is_cancelled() => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    if let Ok(stat) = capture.stats() {
        tracing::info!(
            frames = totals.frames,
            credited = totals.credited,
            kernel_dropped = stat.dropped,
            if_dropped = stat.if_dropped,
            "Capture stopped"
        );
    } else {
        tracing::info!(
            frames = totals.frames,
            credited = totals.credited,
            "Capture stopped"
        );
    }

    outcome.context("Capture read failed")?;
    Ok(totals)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use pcap::{Linktype, Packet, PacketHeader};

    use super::*;

    fn tcp_over_ethernet(src_port: u16, dst_port: u16) -> Vec<u8> {
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        let mut ip = vec![0u8; 24];
        ip[0] = 0x45;
        ip[9] = 6;
        ip[20..22].copy_from_slice(&src_port.to_be_bytes());
        ip[22..24].copy_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&ip);
        frame
    }

    /// Write `(data, wire_len)` records to a pcap savefile. Each record keeps
    /// only the bytes in `data`, as a short snap length would.
    fn write_savefile(path: &Path, records: &[(Vec<u8>, u32)]) {
        let dead = Capture::dead(Linktype::ETHERNET).unwrap();
        let mut savefile = dead.savefile(path).unwrap();
        for (data, len) in records {
            let header = PacketHeader {
                ts: libc::timeval {
                    tv_sec: 0,
                    tv_usec: 0,
                },
                caplen: data.len() as u32,
                len: *len,
            };
            savefile.write(&Packet::new(&header, data));
        }
        savefile.flush().unwrap();
    }

    fn web_classifier() -> FrameClassifier {
        FrameClassifier::new([(80, "web")].into_iter().collect())
    }

    #[test]
    fn test_replay_credits_wire_length_and_stops_at_end_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("replay.pcap");
        write_savefile(
            &path,
            &[
                (tcp_over_ethernet(51000, 80), 1514),
                (tcp_over_ethernet(80, 51000), 600),
                (tcp_over_ethernet(51000, 22), 60),
            ],
        );

        let classifier = web_classifier();
        let stats = StatsStore::new();
        let capture = Capture::from_file(&path).unwrap();

        let totals = run_capture_loop(
            capture,
            LinkKind::Ethernet,
            &classifier,
            &stats,
            &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(
            totals,
            CaptureTotals {
                frames: 3,
                credited: 2
            }
        );
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].download_bytes, 1514);
        assert_eq!(snapshot[0].upload_bytes, 600);
    }

    #[test]
    fn test_read_error_ends_loop_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("truncated.pcap");
        write_savefile(
            &path,
            &[
                (tcp_over_ethernet(51000, 80), 1514),
                (tcp_over_ethernet(51000, 80), 1514),
            ],
        );
        // Cut into the second record's data.
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        let len = file.metadata().unwrap().len();
        file.set_len(len - 4).unwrap();
        drop(file);

        let classifier = web_classifier();
        let stats = StatsStore::new();
        let capture = Capture::from_file(&path).unwrap();

        let result = run_capture_loop(
            capture,
            LinkKind::Ethernet,
            &classifier,
            &stats,
            &CancellationToken::new(),
        );

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Capture read failed"));
        assert_eq!(stats.snapshot()[0].download_bytes, 1514);
    }

    #[test]
    fn test_cancelled_token_stops_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancelled.pcap");
        write_savefile(&path, &[(tcp_over_ethernet(51000, 80), 1514)]);

        let classifier = web_classifier();
        let stats = StatsStore::new();
        let token = CancellationToken::new();
        token.cancel();

        let totals = run_capture_loop(
            Capture::from_file(&path).unwrap(),
            LinkKind::Ethernet,
            &classifier,
            &stats,
            &token,
        )
        .unwrap();

        assert_eq!(totals, CaptureTotals::default());
        assert!(stats.is_empty());
    }
}
