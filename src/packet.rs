//! In-place RX to TX frame reshaping.
//!
//! The pipeline answers a small set of protocols itself: ARP requests,
//! ICMPv4 echo, UDP echo on port 7 and gPTP peer delay. Everything else
//! is dropped. The reply is built into the same buffer the request
//! arrived in; only the Ethernet addresses and the protocol-specific
//! fields change.

use pnet::{
    packet::{
        arp::{ArpOperations, MutableArpPacket},
        ethernet::{EtherType, EtherTypes, EthernetPacket, MutableEthernetPacket},
        icmp::{self, IcmpTypes, MutableIcmpPacket},
        ip::IpNextHeaderProtocols,
        ipv4::{Ipv4Packet, MutableIpv4Packet},
        udp::MutableUdpPacket,
    },
    util::MacAddr,
};

use crate::{
    constants::{ETH_HLEN, ETH_TYPE_PTPV2},
    gptp::{GptpAction, GptpEngine},
    types::Timestamp,
};

const ARP_HLEN: usize = 28;
const UDP_ECHO_PORT: u16 = 7;

/// Rewrites the received frame into its reply.
///
/// Returns the TX payload length, or `None` when the frame is not ours
/// to answer (the caller drops it and returns the buffer to the pool).
#[allow(clippy::indexing_slicing)]
pub(crate) fn reshape(
    data: &mut [u8],
    rx_len: usize,
    station_mac: [u8; 6],
    gptp: &mut GptpEngine,
    now: Timestamp,
) -> Option<usize> {
    if rx_len < ETH_HLEN || rx_len > data.len() {
        return None;
    }

    let (rx_smac, ethertype) = {
        let eth = EthernetPacket::new(data)?;
        (eth.get_source(), eth.get_ethertype())
    };

    if ethertype == EtherType::new(ETH_TYPE_PTPV2) {
        return match gptp.process_frame(&mut data[..rx_len], now) {
            GptpAction::Reply(len) => Some(len),
            GptpAction::Consumed | GptpAction::Discard => None,
        };
    }

    // the reply goes back to the sender, from us
    {
        let mut eth = MutableEthernetPacket::new(data)?;
        eth.set_destination(rx_smac);
        eth.set_source(MacAddr::from(station_mac));
    }

    if ethertype == EtherTypes::Arp {
        reshape_arp(&mut data[ETH_HLEN..], station_mac)
    } else if ethertype == EtherTypes::Ipv4 {
        reshape_ipv4(data)
    } else {
        None
    }
}

fn reshape_arp(payload: &mut [u8], station_mac: [u8; 6]) -> Option<usize> {
    let mut arp = MutableArpPacket::new(payload)?;
    if arp.get_operation() != ArpOperations::Request {
        return None;
    }

    let sender_hw = arp.get_sender_hw_addr();
    let sender_proto = arp.get_sender_proto_addr();
    let target_proto = arp.get_target_proto_addr();

    arp.set_operation(ArpOperations::Reply);
    arp.set_target_hw_addr(sender_hw);
    arp.set_sender_hw_addr(MacAddr::from(station_mac));
    arp.set_sender_proto_addr(target_proto);
    arp.set_target_proto_addr(sender_proto);

    Some(ETH_HLEN + ARP_HLEN)
}

#[allow(clippy::indexing_slicing)]
fn reshape_ipv4(data: &mut [u8]) -> Option<usize> {
    let (header_len, total_len, proto, src, dst) = {
        let ipv4 = Ipv4Packet::new(&data[ETH_HLEN..])?;
        (
            usize::from(ipv4.get_header_length()) * 4,
            usize::from(ipv4.get_total_length()),
            ipv4.get_next_level_protocol(),
            ipv4.get_source(),
            ipv4.get_destination(),
        )
    };
    if header_len < 20 || total_len < header_len {
        return None;
    }

    {
        let mut ipv4 = MutableIpv4Packet::new(&mut data[ETH_HLEN..])?;
        ipv4.set_source(dst);
        ipv4.set_destination(src);
    }

    let body = &mut data[ETH_HLEN + header_len..];
    if proto == IpNextHeaderProtocols::Icmp {
        let icmp_len = total_len - header_len;
        if body.len() < icmp_len {
            return None;
        }
        let mut icmp = MutableIcmpPacket::new(&mut body[..icmp_len])?;
        if icmp.get_icmp_type() != IcmpTypes::EchoRequest {
            return None;
        }
        icmp.set_icmp_type(IcmpTypes::EchoReply);
        let sum = icmp::checksum(&icmp.to_immutable());
        icmp.set_checksum(sum);
        Some(ETH_HLEN + header_len + icmp_len)
    } else if proto == IpNextHeaderProtocols::Udp {
        let mut udp = MutableUdpPacket::new(body)?;
        if udp.get_destination() != UDP_ECHO_PORT {
            return None;
        }
        let src_port = udp.get_source();
        udp.set_destination(src_port);
        udp.set_source(UDP_ECHO_PORT);
        udp.set_checksum(0);
        // the UDP length field includes the header
        let udp_len = usize::from(udp.get_length());
        Some(ETH_HLEN + header_len + udp_len)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATION_MAC: [u8; 6] = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const PEER_MAC: [u8; 6] = [0x02, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE];

    fn eth_header(ethertype: u16) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&STATION_MAC);
        frame.extend_from_slice(&PEER_MAC);
        frame.extend_from_slice(&ethertype.to_be_bytes());
        frame
    }

    fn arp_request() -> Vec<u8> {
        let mut frame = eth_header(0x0806);
        frame.extend_from_slice(&1u16.to_be_bytes()); // ethernet
        frame.extend_from_slice(&0x0800u16.to_be_bytes());
        frame.push(6);
        frame.push(4);
        frame.extend_from_slice(&1u16.to_be_bytes()); // request
        frame.extend_from_slice(&PEER_MAC);
        frame.extend_from_slice(&[10, 0, 0, 1]);
        frame.extend_from_slice(&[0; 6]);
        frame.extend_from_slice(&[10, 0, 0, 2]);
        frame.resize(64, 0);
        frame
    }

    fn ipv4_header(proto: u8, body_len: usize) -> Vec<u8> {
        let total = 20 + body_len;
        let mut header = Vec::new();
        header.push(0x45);
        header.push(0);
        #[allow(clippy::cast_possible_truncation)]
        header.extend_from_slice(&(total as u16).to_be_bytes());
        header.extend_from_slice(&[0, 0, 0x40, 0]); // id, DF
        header.push(64);
        header.push(proto);
        header.extend_from_slice(&[0, 0]); // checksum
        header.extend_from_slice(&[10, 0, 0, 1]);
        header.extend_from_slice(&[10, 0, 0, 2]);
        header
    }

    fn icmp_echo_request(payload_len: usize) -> Vec<u8> {
        let mut frame = eth_header(0x0800);
        frame.extend_from_slice(&ipv4_header(1, 8 + payload_len));
        frame.push(8); // echo request
        frame.push(0);
        frame.extend_from_slice(&[0, 0]); // checksum
        frame.extend_from_slice(&0x1234u16.to_be_bytes()); // id
        frame.extend_from_slice(&0x0001u16.to_be_bytes()); // seq
        frame.extend(std::iter::repeat(0xA5).take(payload_len));
        frame
    }

    fn udp_frame(dst_port: u16, payload_len: usize) -> Vec<u8> {
        let mut frame = eth_header(0x0800);
        frame.extend_from_slice(&ipv4_header(17, 8 + payload_len));
        frame.extend_from_slice(&5555u16.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        #[allow(clippy::cast_possible_truncation)]
        frame.extend_from_slice(&((8 + payload_len) as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend(std::iter::repeat(0x42).take(payload_len));
        frame
    }

    fn run(frame: &mut Vec<u8>) -> Option<usize> {
        let len = frame.len();
        frame.resize(2000, 0);
        let mut gptp = GptpEngine::new(STATION_MAC, true);
        reshape(frame, len, STATION_MAC, &mut gptp, 0)
    }

    #[test]
    fn arp_request_becomes_reply() {
        let mut frame = arp_request();
        let len = run(&mut frame).unwrap();
        assert_eq!(len, ETH_HLEN + ARP_HLEN);

        // back to the requester, from the station
        assert_eq!(&frame[..6], &PEER_MAC);
        assert_eq!(&frame[6..12], &STATION_MAC);
        // opcode reply
        assert_eq!(&frame[ETH_HLEN + 6..ETH_HLEN + 8], &2u16.to_be_bytes());
        // sender is the station answering for the queried address
        assert_eq!(&frame[ETH_HLEN + 8..ETH_HLEN + 14], &STATION_MAC);
        assert_eq!(&frame[ETH_HLEN + 14..ETH_HLEN + 18], &[10, 0, 0, 2]);
        // target is the original requester
        assert_eq!(&frame[ETH_HLEN + 18..ETH_HLEN + 24], &PEER_MAC);
        assert_eq!(&frame[ETH_HLEN + 24..ETH_HLEN + 28], &[10, 0, 0, 1]);
    }

    #[test]
    fn arp_reply_is_filtered() {
        let mut frame = arp_request();
        frame[ETH_HLEN + 7] = 2; // already a reply
        assert_eq!(run(&mut frame), None);
    }

    #[test]
    fn icmp_echo_request_becomes_reply() {
        let mut frame = icmp_echo_request(32);
        let len = run(&mut frame).unwrap();
        assert_eq!(len, ETH_HLEN + 20 + 8 + 32);

        // ip addresses swapped
        assert_eq!(&frame[ETH_HLEN + 12..ETH_HLEN + 16], &[10, 0, 0, 2]);
        assert_eq!(&frame[ETH_HLEN + 16..ETH_HLEN + 20], &[10, 0, 0, 1]);
        // echo reply with a valid checksum
        let icmp_start = ETH_HLEN + 20;
        assert_eq!(frame[icmp_start], 0);
        let icmp =
            pnet::packet::icmp::IcmpPacket::new(&frame[icmp_start..icmp_start + 8 + 32]).unwrap();
        assert_eq!(icmp.get_checksum(), icmp::checksum(&icmp));
        // id and sequence survive untouched
        assert_eq!(&frame[icmp_start + 4..icmp_start + 6], &0x1234u16.to_be_bytes());
    }

    #[test]
    fn icmp_non_echo_is_filtered() {
        let mut frame = icmp_echo_request(8);
        frame[ETH_HLEN + 20] = 13; // timestamp request
        assert_eq!(run(&mut frame), None);
    }

    #[test]
    fn udp_port7_is_echoed() {
        let mut frame = udp_frame(7, 16);
        let len = run(&mut frame).unwrap();
        assert_eq!(len, ETH_HLEN + 20 + 8 + 16);

        let udp_start = ETH_HLEN + 20;
        // ports swapped
        assert_eq!(&frame[udp_start..udp_start + 2], &7u16.to_be_bytes());
        assert_eq!(&frame[udp_start + 2..udp_start + 4], &5555u16.to_be_bytes());
        // checksum cleared
        assert_eq!(&frame[udp_start + 6..udp_start + 8], &[0, 0]);
        // payload untouched
        assert!(frame[udp_start + 8..udp_start + 8 + 16]
            .iter()
            .all(|&b| b == 0x42));
    }

    #[test]
    fn udp_other_ports_are_filtered() {
        let mut frame = udp_frame(9, 16);
        assert_eq!(run(&mut frame), None);
    }

    #[test]
    fn unknown_ethertype_is_filtered() {
        let mut frame = eth_header(0x86DD); // ipv6
        frame.resize(64, 0);
        let mut full = frame.clone();
        assert_eq!(run(&mut full), None);
    }

    #[test]
    fn gptp_pdelay_req_produces_a_reply() {
        let mut requester = GptpEngine::new(PEER_MAC, true);
        let arena = crate::mem::FrameArena::new().unwrap();
        let handle = crate::mem::BufHandle::new(0).unwrap();
        let mut tx = arena.tx_frame(handle);
        let req_len = requester.make_pdelay_req(&mut tx);

        let mut frame = tx.data().to_vec();
        let mut gptp = GptpEngine::new(STATION_MAC, true);
        let len = reshape(&mut frame, req_len, STATION_MAC, &mut gptp, 0).unwrap();
        assert_eq!(len, req_len); // resp and req happen to be the same size
        assert_eq!(frame[ETH_HLEN] & 0x0F, 0x3);
        assert_eq!(&frame[6..12], &STATION_MAC);
    }

    #[test]
    fn truncated_frames_are_filtered() {
        let mut tiny = vec![0u8; 8];
        let mut gptp = GptpEngine::new(STATION_MAC, true);
        assert_eq!(reshape(&mut tiny, 8, STATION_MAC, &mut gptp, 0), None);
    }
}
