//! pcap replay into a `Monitor` and pcap output of processed frames.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context};
use log::{debug, warn};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapReader, PcapWriter};
use pcap_file::DataLink;
use radiotap::Radiotap;

use crate::monitor::Monitor;

/// Receives every frame the monitor processes.
pub trait CaptureSink {
    /// `decrypted` is the plaintext form of `raw` when it could be
    /// decrypted.
    fn write_frame(&mut self, raw: &[u8], decrypted: Option<&[u8]>);
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub packets: u64,
    pub decrypted: u64,
    pub errors: u64,
}

/// Writes raw 802.11 frames (link type 105) to a pcap stream.
pub struct PcapDumper<W: Write> {
    writer: PcapWriter<W>,
    written: u64,
}

impl PcapDumper<BufWriter<File>> {
    pub fn create(path: &Path) -> anyhow::Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        PcapDumper::new(BufWriter::new(file))
    }
}

impl<W: Write> PcapDumper<W> {
    pub fn new(writer: W) -> anyhow::Result<Self> {
        let header = PcapHeader {
            datalink: DataLink::IEEE802_11,
            ..Default::default()
        };
        let writer = PcapWriter::with_header(writer, header).context("writing pcap header")?;
        Ok(PcapDumper { writer, written: 0 })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.writer.into_writer()
    }

    fn write(&mut self, ts: Duration, data: &[u8]) {
        let packet = PcapPacket::new(ts, data.len() as u32, data);
        match self.writer.write_packet(&packet) {
            Ok(_) => self.written += 1,
            Err(e) => warn!("pcap write failed: {}", e),
        }
    }
}

impl<W: Write> CaptureSink for PcapDumper<W> {
    fn write_frame(&mut self, raw: &[u8], decrypted: Option<&[u8]>) {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        self.write(ts, raw);
        if let Some(plain) = decrypted {
            self.write(ts, plain);
        }
    }
}

fn open_reader(path: &Path) -> anyhow::Result<PcapReader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    PcapReader::new(BufReader::new(file))
        .with_context(|| format!("reading pcap header of {}", path.display()))
}

/// Replays a capture of 802.11 frames, with or without radiotap headers.
pub fn read_cap_file(mon: &mut Monitor, path: &Path) -> anyhow::Result<CaptureStats> {
    let reader = open_reader(path)?;
    replay_wireless(mon, reader)
}

pub(crate) fn replay_wireless<R: Read>(
    mon: &mut Monitor,
    mut reader: PcapReader<R>,
) -> anyhow::Result<CaptureStats> {
    let datalink = reader.header().datalink;
    if !matches!(
        datalink,
        DataLink::IEEE802_11 | DataLink::IEEE802_11_RADIOTAP
    ) {
        bail!("unsupported link type {:?}", datalink);
    }

    let mut stats = CaptureStats::default();
    while let Some(packet) = reader.next_packet() {
        let packet = packet.context("reading packet")?;
        stats.packets += 1;
        let data: &[u8] = &packet.data;

        let decrypted = if datalink == DataLink::IEEE802_11_RADIOTAP {
            let radiotap = match Radiotap::from_bytes(data) {
                Ok(radiotap) => radiotap,
                Err(error) => {
                    stats.errors += 1;
                    debug!("Couldn't read packet data with Radiotap: {error:?}");
                    continue;
                }
            };
            let Some(payload) = data.get(radiotap.header.length..) else {
                stats.errors += 1;
                continue;
            };
            if radiotap.flags.map_or(false, |flags| flags.fcs) {
                mon.process_fcs(payload)
            } else {
                mon.process(payload)
            }
        } else {
            mon.process(data)
        };
        if decrypted.is_some() {
            stats.decrypted += 1;
        }
    }
    Ok(stats)
}

/// Replays an Ethernet capture taken on the wired side of the network.
pub fn read_wired_cap_file(mon: &mut Monitor, path: &Path) -> anyhow::Result<CaptureStats> {
    let mut reader = open_reader(path)?;
    let datalink = reader.header().datalink;
    if datalink != DataLink::ETHERNET {
        bail!("unsupported wired link type {:?}", datalink);
    }
    let mut stats = CaptureStats::default();
    while let Some(packet) = reader.next_packet() {
        let packet = packet.context("reading packet")?;
        stats.packets += 1;
        mon.process_wired(&packet.data);
    }
    Ok(stats)
}
