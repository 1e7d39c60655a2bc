mod common;

use std::cell::RefCell;
use std::fs::File;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use angry_monitor::capture::{read_cap_file, read_wired_cap_file, CaptureSink, PcapDumper};
use angry_monitor::crypto::ccmp;
use angry_monitor::replay::Pn;
use angry_monitor::{Monitor, MonitorConfig, StaCounter};
use pcap_file::pcap::{PcapHeader, PcapPacket, PcapWriter};
use pcap_file::DataLink;

use common::*;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("angry_monitor_{}_{}.pcap", std::process::id(), name))
}

fn write_pcap(path: &PathBuf, datalink: DataLink, frames: &[Vec<u8>]) {
    let header = PcapHeader {
        datalink,
        ..Default::default()
    };
    let file = File::create(path).unwrap();
    let mut writer = PcapWriter::with_header(file, header).unwrap();
    for (i, frame) in frames.iter().enumerate() {
        let packet = PcapPacket::new(Duration::from_millis(i as u64), frame.len() as u32, frame);
        writer.write_packet(&packet).unwrap();
    }
}

/// Radiotap header carrying only the Flags field.
fn radiotap(flags: u8) -> Vec<u8> {
    vec![0x00, 0x00, 0x09, 0x00, 0x02, 0x00, 0x00, 0x00, flags]
}

fn session() -> Vec<Vec<u8>> {
    let ptk = ptk();
    let plain = data(true, &[0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x00, 0x45, 0x00]);
    vec![
        beacon(),
        auth(AP, STA, 1),
        auth(STA, AP, 2),
        assoc_req(),
        assoc_resp(),
        msg1(),
        msg2(&ptk),
        msg3(&ptk),
        msg4(&ptk),
        ccmp::encrypt(ptk.tk.as_slice(), &plain, Pn::from_u64(1), 0).unwrap(),
    ]
}

#[test]
fn replays_plain_80211_capture() {
    let path = temp_path("plain");
    write_pcap(&path, DataLink::IEEE802_11, &session());

    let mut mon = monitor();
    let stats = read_cap_file(&mut mon, &path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(stats.packets, 10);
    assert_eq!(stats.decrypted, 1);
    assert_eq!(stats.errors, 0);
    let sta = mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap();
    assert!(sta.ptk_set());
    assert_eq!(sta.counter(StaCounter::DecryptOk), 1);
    assert_eq!(mon.counters().rx_mgmt, 5);
    assert_eq!(mon.counters().rx_data, 5);
}

#[test]
fn replays_radiotap_capture_with_fcs() {
    let frames: Vec<Vec<u8>> = session()
        .into_iter()
        .enumerate()
        .map(|(i, frame)| {
            let mut out = radiotap(0x10);
            let mut fcs = crc32fast::hash(&frame).to_le_bytes();
            // Corrupt the FCS of the final data frame.
            if i == 9 {
                fcs[0] ^= 0xff;
            }
            out.extend_from_slice(&frame);
            out.extend_from_slice(&fcs);
            out
        })
        .collect();
    let path = temp_path("radiotap");
    write_pcap(&path, DataLink::IEEE802_11_RADIOTAP, &frames);

    let mut mon = monitor();
    let stats = read_cap_file(&mut mon, &path).unwrap();
    std::fs::remove_file(&path).ok();

    assert_eq!(stats.packets, 10);
    assert_eq!(stats.decrypted, 0);
    assert_eq!(mon.counters().fcs_error, 1);
    assert!(mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap().ptk_set());
}

#[test]
fn wrong_link_types_are_rejected() {
    let path = temp_path("linktype");
    write_pcap(&path, DataLink::ETHERNET, &[beacon()]);
    let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
    assert!(read_cap_file(&mut mon, &path).is_err());

    write_pcap(&path, DataLink::IEEE802_11, &[beacon()]);
    assert!(read_wired_cap_file(&mut mon, &path).is_err());
    std::fs::remove_file(&path).ok();

    assert!(read_cap_file(&mut mon, &temp_path("missing")).is_err());
}

#[derive(Default, Clone)]
struct Recorder(Rc<RefCell<Vec<(Vec<u8>, Option<Vec<u8>>)>>>);

impl CaptureSink for Recorder {
    fn write_frame(&mut self, raw: &[u8], decrypted: Option<&[u8]>) {
        self.0
            .borrow_mut()
            .push((raw.to_vec(), decrypted.map(<[u8]>::to_vec)));
    }
}

#[test]
fn sink_sees_every_frame_and_its_plaintext() {
    let recorder = Recorder::default();
    let mut mon = monitor();
    mon.set_sink(Box::new(recorder.clone()));

    let frames = session();
    for frame in &frames {
        mon.process(frame);
    }

    let seen = recorder.0.borrow();
    assert_eq!(seen.len(), frames.len());
    assert!(seen[..9].iter().all(|(_, plain)| plain.is_none()));
    let (raw, plain) = &seen[9];
    assert_eq!(raw, &frames[9]);
    assert_eq!(
        plain.as_deref(),
        Some(&data(true, &[0xaa, 0xaa, 0x03, 0, 0, 0, 0x08, 0x00, 0x45, 0x00])[..])
    );
    assert!(mon.take_sink().is_some());
}

#[test]
fn dumper_output_replays() {
    let path = temp_path("dumper");
    {
        let mut mon = monitor();
        mon.set_sink(Box::new(PcapDumper::create(&path).unwrap()));
        for frame in session() {
            mon.process(&frame);
        }
        drop(mon.take_sink());
    }

    // The decrypted copy of the data frame follows the raw one.
    let mut mon = monitor();
    let stats = read_cap_file(&mut mon, &path).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(stats.packets, 11);
    let sta = mon.bss_find(&AP).unwrap().sta_find(&STA).unwrap();
    assert!(sta.ptk_set());
    assert_eq!(sta.counter(StaCounter::DataUnprotected), 5);
}
