//! Wired-side ingestion: EAPOL over Ethernet and RADIUS key delivery.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder};
use log::{debug, info, warn};

use crate::eapol::rx_eapol;
use crate::error::{ParseError, Result};
use crate::ieee80211::ETH_P_EAPOL;
use crate::mac::MacAddress;
use crate::monitor::Monitor;
use crate::radius::{RadiusPacket, CODE_ACCESS_ACCEPT, CODE_ACCESS_REQUEST, RADIUS_AUTH_LEN};

pub const ETH_HDR_LEN: usize = 14;
const ETH_P_IP: u16 = 0x0800;
const ETH_P_8021Q: u16 = 0x8100;
const IPPROTO_UDP: u8 = 17;
const IPV4_MIN_HDR_LEN: usize = 20;
const UDP_HDR_LEN: usize = 8;
pub const RADIUS_AUTH_PORT: u16 = 1812;

/// Outstanding requests waiting for a response.
const MAX_PENDING_REQUESTS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RequestKey {
    client: Ipv4Addr,
    server: Ipv4Addr,
    identifier: u8,
}

/// Remembers Access-Request authenticators so that the keys in the
/// matching Access-Accept can be decrypted.
#[derive(Debug, Default)]
pub struct RadiusTracker {
    requests: HashMap<RequestKey, [u8; RADIUS_AUTH_LEN]>,
}

impl RadiusTracker {
    pub fn pending(&self) -> usize {
        self.requests.len()
    }
}

fn need(data: &[u8], len: usize) -> std::result::Result<(), ParseError> {
    if data.len() < len {
        return Err(ParseError::Truncated {
            needed: len,
            have: data.len(),
        });
    }
    Ok(())
}

pub(crate) fn rx_wired(mon: &mut Monitor, frame: &[u8]) -> Result<()> {
    need(frame, ETH_HDR_LEN)?;
    let dst = MacAddress::from_slice(&frame[0..6])?;
    let src = MacAddress::from_slice(&frame[6..12])?;
    let mut ethertype = BigEndian::read_u16(&frame[12..14]);
    let mut payload = &frame[ETH_HDR_LEN..];
    if ethertype == ETH_P_8021Q {
        need(payload, 4)?;
        ethertype = BigEndian::read_u16(&payload[2..4]);
        payload = &payload[4..];
    }

    match ethertype {
        ETH_P_EAPOL => rx_wired_eapol(mon, src, dst, payload),
        ETH_P_IP => rx_ipv4(mon, payload),
        _ => Err(ParseError::Unsupported("ethertype").into()),
    }
}

/// EAPOL between a known AP and a station on the wired side.
fn rx_wired_eapol(mon: &mut Monitor, src: MacAddress, dst: MacAddress, eapol: &[u8]) -> Result<()> {
    let bssid = if mon.bss.find(&src).is_some() {
        src
    } else if mon.bss.find(&dst).is_some() {
        dst
    } else {
        debug!("wired EAPOL {} -> {} for unknown BSS", src, dst);
        return Err(ParseError::Unsupported("EAPOL for unknown BSS").into());
    };
    let pmks = &mon.pmks;
    let bss = mon.bss.get(bssid);
    rx_eapol(bss, pmks, src, dst, eapol)?;
    Ok(())
}

fn rx_ipv4(mon: &mut Monitor, ip: &[u8]) -> Result<()> {
    need(ip, IPV4_MIN_HDR_LEN)?;
    if ip[0] >> 4 != 4 {
        return Err(ParseError::Version(u16::from(ip[0] >> 4)).into());
    }
    let ihl = usize::from(ip[0] & 0x0f) * 4;
    let total = usize::from(BigEndian::read_u16(&ip[2..4]));
    if ihl < IPV4_MIN_HDR_LEN {
        return Err(ParseError::BadLength("IPv4 header").into());
    }
    if total < ihl {
        return Err(ParseError::BadLength("IPv4 total").into());
    }
    need(ip, total)?;
    if ip[9] != IPPROTO_UDP {
        return Err(ParseError::Unsupported("IP protocol").into());
    }
    let saddr = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
    let daddr = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);

    let udp = &ip[ihl..total];
    need(udp, UDP_HDR_LEN)?;
    let sport = BigEndian::read_u16(&udp[0..2]);
    let dport = BigEndian::read_u16(&udp[2..4]);
    let ulen = usize::from(BigEndian::read_u16(&udp[4..6]));
    need(udp, ulen.max(UDP_HDR_LEN))?;
    let data = &udp[UDP_HDR_LEN..ulen.max(UDP_HDR_LEN)];

    if dport == RADIUS_AUTH_PORT {
        rx_radius_request(mon, saddr, daddr, data)
    } else if sport == RADIUS_AUTH_PORT {
        rx_radius_response(mon, daddr, saddr, data)
    } else {
        Err(ParseError::Unsupported("UDP port").into())
    }
}

fn rx_radius_request(
    mon: &mut Monitor,
    client: Ipv4Addr,
    server: Ipv4Addr,
    data: &[u8],
) -> Result<()> {
    let pkt = RadiusPacket::parse(data)?;
    if pkt.code() != CODE_ACCESS_REQUEST {
        return Ok(());
    }
    let requests = &mut mon.radius.requests;
    if requests.len() >= MAX_PENDING_REQUESTS {
        debug!("RADIUS: dropping {} stale requests", requests.len());
        requests.clear();
    }
    requests.insert(
        RequestKey {
            client,
            server,
            identifier: pkt.identifier(),
        },
        pkt.authenticator(),
    );
    debug!("RADIUS: Access-Request {} -> {} id {}", client, server, pkt.identifier());
    Ok(())
}

fn rx_radius_response(
    mon: &mut Monitor,
    client: Ipv4Addr,
    server: Ipv4Addr,
    data: &[u8],
) -> Result<()> {
    let pkt = RadiusPacket::parse(data)?;
    let key = RequestKey {
        client,
        server,
        identifier: pkt.identifier(),
    };
    let Some(req_auth) = mon.radius.requests.remove(&key) else {
        debug!("RADIUS: response id {} without request", pkt.identifier());
        return Ok(());
    };
    if pkt.code() != CODE_ACCESS_ACCEPT {
        return Ok(());
    }

    let secret = mon
        .config
        .radius_secrets
        .iter()
        .find(|s| pkt.verify_response(&req_auth, s.as_bytes()))
        .cloned();
    let Some(secret) = secret else {
        warn!("RADIUS: no configured secret matches {} -> {}", server, client);
        return Ok(());
    };
    match pkt.msk(&req_auth, secret.as_bytes()) {
        Some(msk) => {
            info!("RADIUS: MSK from {} for {}", server, client);
            mon.add_msk(&msk)
        }
        None => {
            debug!("RADIUS: Access-Accept without MS-MPPE keys");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::monitor::MonitorConfig;
    use md5::{Digest, Md5};

    const SECRET: &str = "radius-secret";
    const REQ_AUTH: [u8; 16] = [0x21; 16];

    fn encrypt_mppe(key: &[u8], salt: [u8; 2]) -> Vec<u8> {
        let mut plain = vec![key.len() as u8];
        plain.extend_from_slice(key);
        while plain.len() % 16 != 0 {
            plain.push(0);
        }
        let mut out = salt.to_vec();
        let mut prev = [&REQ_AUTH[..], &salt[..]].concat();
        for block in plain.chunks(16) {
            let b = Md5::new()
                .chain_update(SECRET)
                .chain_update(&prev)
                .finalize();
            let c: Vec<u8> = block.iter().zip(b.iter()).map(|(p, k)| p ^ k).collect();
            out.extend_from_slice(&c);
            prev = c;
        }
        out
    }

    fn ms_attr(vtype: u8, value: &[u8]) -> Vec<u8> {
        let mut a = vec![26, (8 + value.len()) as u8, 0, 0, 0x01, 0x37];
        a.push(vtype);
        a.push((2 + value.len()) as u8);
        a.extend_from_slice(value);
        a
    }

    fn radius(code: u8, auth: [u8; 16], attrs: &[u8]) -> Vec<u8> {
        let mut pkt = vec![code, 42];
        pkt.extend_from_slice(&((20 + attrs.len()) as u16).to_be_bytes());
        pkt.extend_from_slice(&auth);
        pkt.extend_from_slice(attrs);
        pkt
    }

    fn udp_frame(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16, data: &[u8]) -> Vec<u8> {
        let mut f = vec![0x02, 0, 0, 0, 0, 0x10, 0x02, 0, 0, 0, 0, 0x20, 0x08, 0x00];
        let total = (20 + 8 + data.len()) as u16;
        f.extend_from_slice(&[0x45, 0x00]);
        f.extend_from_slice(&total.to_be_bytes());
        f.extend_from_slice(&[0, 0, 0, 0, 64, IPPROTO_UDP, 0, 0]);
        f.extend_from_slice(&src);
        f.extend_from_slice(&dst);
        f.extend_from_slice(&sport.to_be_bytes());
        f.extend_from_slice(&dport.to_be_bytes());
        f.extend_from_slice(&((8 + data.len()) as u16).to_be_bytes());
        f.extend_from_slice(&[0, 0]);
        f.extend_from_slice(data);
        f
    }

    #[test]
    fn access_accept_yields_pmk() {
        let config = MonitorConfig::default().radius_secrets(vec![SECRET.to_string()]);
        let mut mon = Monitor::new(config).unwrap();
        let nas = [10, 0, 0, 2];
        let server = [10, 0, 0, 1];

        mon.process_wired(&udp_frame(nas, server, 40000, 1812, &radius(1, REQ_AUTH, &[])));
        assert_eq!(mon.radius.pending(), 1);

        let mut attrs = ms_attr(17, &encrypt_mppe(&[0x11; 32], [0x80, 0x01]));
        attrs.extend(ms_attr(16, &encrypt_mppe(&[0x22; 32], [0x80, 0x02])));
        let unsigned = radius(2, REQ_AUTH, &attrs);
        let resp_auth = Md5::new()
            .chain_update(&unsigned)
            .chain_update(SECRET)
            .finalize();
        let mut accept = unsigned.clone();
        accept[4..20].copy_from_slice(&resp_auth);

        mon.process_wired(&udp_frame(server, nas, 1812, 40000, &accept));
        assert_eq!(mon.radius.pending(), 0);
        assert_eq!(mon.pmks(), &[[0x11u8; 32]]);
    }

    #[test]
    fn ipv4_lengths_are_checked_before_slicing() {
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        let frame = udp_frame([10, 0, 0, 2], [10, 0, 0, 1], 40000, 1812, &[0; 20]);

        let mut bad_total = frame.clone();
        bad_total[16..18].copy_from_slice(&10u16.to_be_bytes());
        assert!(matches!(
            rx_wired(&mut mon, &bad_total),
            Err(MonitorError::Parse(ParseError::BadLength(_)))
        ));

        let mut bad_ihl = frame;
        bad_ihl[14] = 0x44;
        assert!(matches!(
            rx_wired(&mut mon, &bad_ihl),
            Err(MonitorError::Parse(ParseError::BadLength(_)))
        ));
    }

    #[test]
    fn unrelated_traffic_is_ignored() {
        let mut mon = Monitor::new(MonitorConfig::default()).unwrap();
        mon.process_wired(&udp_frame([1, 1, 1, 1], [2, 2, 2, 2], 53, 53, &[0; 12]));
        mon.process_wired(&[0u8; 10]);
        assert_eq!(mon.counters().rx_wired, 2);
        assert!(mon.pmks().is_empty());
    }
}
