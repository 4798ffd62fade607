//! Minimal gPTP (IEEE 802.1AS) engine: periodic control frames for the
//! scheduler and in-place replies for peer delay requests.
//!
//! Frames are untagged PTPv2 over Ethertype 0x88F7. Only the message
//! skeletons the gate engine needs are produced; the servo that consumes
//! sync/follow-up pairs lives outside this crate.

use bilge::prelude::*;

use crate::{
    constants::{ETH_HLEN, ETH_TYPE_PTPV2, NS_IN_1S},
    mem::TxFrame,
    types::Timestamp,
};

/// All gPTP frames go to the link-local multicast address.
const GPTP_MULTICAST: [u8; 6] = [0x01, 0x80, 0xC2, 0x00, 0x00, 0x0E];

const PTP_HEADER_LEN: usize = 34;
const PTP_TIMESTAMP_LEN: usize = 10;
const PORT_IDENTITY_LEN: usize = 10;

const MSG_SYNC: u8 = 0x0;
const MSG_PDELAY_REQ: u8 = 0x2;
const MSG_PDELAY_RESP: u8 = 0x3;
const MSG_FOLLOW_UP: u8 = 0x8;
const MSG_PDELAY_RESP_FOLLOW_UP: u8 = 0xA;
const MSG_ANNOUNCE: u8 = 0xB;

const SYNC_LEN: usize = PTP_HEADER_LEN + PTP_TIMESTAMP_LEN;
const PDELAY_REQ_LEN: usize = PTP_HEADER_LEN + 2 * PTP_TIMESTAMP_LEN;
const PDELAY_RESP_LEN: usize = PTP_HEADER_LEN + PTP_TIMESTAMP_LEN + PORT_IDENTITY_LEN;
const FOLLOW_UP_LEN: usize = PTP_HEADER_LEN + PTP_TIMESTAMP_LEN;
const ANNOUNCE_LEN: usize = 64;

/// First header byte: 802.1AS transport over the low-nibble message type.
#[bitsize(8)]
#[derive(Default, Clone, Copy, DebugBits, FromBits)]
struct PtpMsgByte {
    message_type: u4,
    transport_specific: u4,
}

/// What became of a received gPTP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GptpAction {
    /// The buffer now holds a reply of this many payload bytes.
    Reply(usize),
    /// Handled; the buffer is free to return to the pool.
    Consumed,
    /// Not a message this engine understands.
    Discard,
}

#[derive(Debug, Default, Clone, Copy)]
struct SeqCounters {
    pdelay_req: u16,
    announce: u16,
    sync: u16,
}

/// Per-port gPTP state.
#[derive(Debug)]
pub(crate) struct GptpEngine {
    port_identity: [u8; PORT_IDENTITY_LEN],
    station_mac: [u8; 6],
    /// Whether this port originates announce/sync.
    is_master: bool,
    seq: SeqCounters,
    /// Origin timestamp of the last sync, echoed by follow-up.
    last_sync_origin: Timestamp,
    rx_sync: u64,
    rx_follow_up: u64,
    rx_pdelay: u64,
}

#[allow(clippy::indexing_slicing)]
impl GptpEngine {
    pub(crate) fn new(station_mac: [u8; 6], is_master: bool) -> Self {
        // EUI-64 clock identity derived from the station MAC, port 1
        let mut port_identity = [0u8; PORT_IDENTITY_LEN];
        port_identity[..3].copy_from_slice(&station_mac[..3]);
        port_identity[3] = 0xFF;
        port_identity[4] = 0xFE;
        port_identity[5..8].copy_from_slice(&station_mac[3..]);
        port_identity[9] = 1;
        Self {
            port_identity,
            station_mac,
            is_master,
            seq: SeqCounters::default(),
            last_sync_origin: 0,
            rx_sync: 0,
            rx_follow_up: 0,
            rx_pdelay: 0,
        }
    }

    fn write_eth_header(&self, data: &mut [u8]) {
        data[..6].copy_from_slice(&GPTP_MULTICAST);
        data[6..12].copy_from_slice(&self.station_mac);
        data[12..14].copy_from_slice(&ETH_TYPE_PTPV2.to_be_bytes());
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_ptp_header(
        &self,
        ptp: &mut [u8],
        message_type: u8,
        message_length: usize,
        sequence_id: u16,
        log_interval: i8,
    ) {
        let mut first = PtpMsgByte::default();
        first.set_message_type(u4::from_u8(message_type));
        first.set_transport_specific(u4::from_u8(1));
        ptp[0] = first.value;
        ptp[1] = 0x02; // PTPv2
        ptp[2..4].copy_from_slice(&(message_length as u16).to_be_bytes());
        ptp[4] = 0; // domain
        ptp[5] = 0;
        ptp[6..8].copy_from_slice(&[0, 0]); // flags
        ptp[8..16].fill(0); // correction
        ptp[16..20].fill(0);
        ptp[20..30].copy_from_slice(&self.port_identity);
        ptp[30..32].copy_from_slice(&sequence_id.to_be_bytes());
        ptp[32] = match message_type {
            MSG_SYNC => 0x00,
            MSG_FOLLOW_UP => 0x02,
            _ => 0x05,
        };
        ptp[33] = log_interval as u8;
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_ptp_timestamp(buf: &mut [u8], timestamp: Timestamp) {
        let seconds = timestamp / NS_IN_1S;
        let nanos = (timestamp % NS_IN_1S) as u32;
        buf[..2].copy_from_slice(&((seconds >> 32) as u16).to_be_bytes());
        buf[2..6].copy_from_slice(&(seconds as u32).to_be_bytes());
        buf[6..10].copy_from_slice(&nanos.to_be_bytes());
    }

    /// Builds a peer delay request. Returns the payload length.
    pub(crate) fn make_pdelay_req(&mut self, frame: &mut TxFrame<'_>) -> usize {
        let seq = self.seq.pdelay_req;
        self.seq.pdelay_req = self.seq.pdelay_req.wrapping_add(1);

        let data = frame.data_mut();
        self.write_eth_header(data);
        let ptp = &mut data[ETH_HLEN..];
        self.write_ptp_header(ptp, MSG_PDELAY_REQ, PDELAY_REQ_LEN, seq, 0);
        ptp[PTP_HEADER_LEN..PDELAY_REQ_LEN].fill(0);
        ETH_HLEN + PDELAY_REQ_LEN
    }

    /// Builds an announce frame, or 0 when this port is not a master.
    pub(crate) fn make_announce(&mut self, frame: &mut TxFrame<'_>, now: Timestamp) -> usize {
        if !self.is_master {
            return 0;
        }
        let seq = self.seq.announce;
        self.seq.announce = self.seq.announce.wrapping_add(1);

        let data = frame.data_mut();
        self.write_eth_header(data);
        let ptp = &mut data[ETH_HLEN..];
        self.write_ptp_header(ptp, MSG_ANNOUNCE, ANNOUNCE_LEN, seq, 0);
        Self::write_ptp_timestamp(&mut ptp[PTP_HEADER_LEN..], now);
        // currentUtcOffset, priority1, clockQuality, priority2
        ptp[44..46].copy_from_slice(&0i16.to_be_bytes());
        ptp[46] = 0;
        ptp[47] = 248; // priority1
        ptp[48] = 0xF8; // clock class
        ptp[49] = 0xFE; // accuracy unknown
        ptp[50..52].copy_from_slice(&0xFFFFu16.to_be_bytes());
        ptp[52] = 248; // priority2
        ptp[53..61].copy_from_slice(&self.port_identity[..8]); // grandmaster
        ptp[61..63].copy_from_slice(&0u16.to_be_bytes()); // stepsRemoved
        ptp[63] = 0xA0; // internal oscillator
        ETH_HLEN + ANNOUNCE_LEN
    }

    /// Builds a sync frame, or 0 when this port is not a master.
    pub(crate) fn make_sync(&mut self, frame: &mut TxFrame<'_>, now: Timestamp) -> usize {
        if !self.is_master {
            return 0;
        }
        let seq = self.seq.sync;
        self.last_sync_origin = now;

        let data = frame.data_mut();
        self.write_eth_header(data);
        let ptp = &mut data[ETH_HLEN..];
        self.write_ptp_header(ptp, MSG_SYNC, SYNC_LEN, seq, -3);
        Self::write_ptp_timestamp(&mut ptp[PTP_HEADER_LEN..], now);
        ETH_HLEN + SYNC_LEN
    }

    /// Builds the follow-up for the last sync, or 0 when this port is
    /// not a master.
    pub(crate) fn make_follow_up(&mut self, frame: &mut TxFrame<'_>) -> usize {
        if !self.is_master {
            return 0;
        }
        let seq = self.seq.sync;
        self.seq.sync = self.seq.sync.wrapping_add(1);

        let data = frame.data_mut();
        self.write_eth_header(data);
        let ptp = &mut data[ETH_HLEN..];
        self.write_ptp_header(ptp, MSG_FOLLOW_UP, FOLLOW_UP_LEN, seq, -3);
        Self::write_ptp_timestamp(&mut ptp[PTP_HEADER_LEN..], self.last_sync_origin);
        ETH_HLEN + FOLLOW_UP_LEN
    }

    /// Handles one received gPTP frame in place.
    pub(crate) fn process_frame(&mut self, data: &mut [u8], now: Timestamp) -> GptpAction {
        if data.len() < ETH_HLEN + PTP_HEADER_LEN {
            return GptpAction::Discard;
        }
        let message_type = PtpMsgByte::from(data[ETH_HLEN]).message_type().value();
        match message_type {
            MSG_PDELAY_REQ => {
                if data.len() < ETH_HLEN + PDELAY_RESP_LEN {
                    return GptpAction::Discard;
                }
                self.rx_pdelay += 1;
                self.reply_pdelay_resp(data, now);
                GptpAction::Reply(ETH_HLEN + PDELAY_RESP_LEN)
            }
            MSG_SYNC => {
                self.rx_sync += 1;
                GptpAction::Consumed
            }
            MSG_FOLLOW_UP => {
                self.rx_follow_up += 1;
                GptpAction::Consumed
            }
            MSG_ANNOUNCE | MSG_PDELAY_RESP | MSG_PDELAY_RESP_FOLLOW_UP => GptpAction::Consumed,
            _ => GptpAction::Discard,
        }
    }

    /// Rewrites a pdelay request into the matching response.
    fn reply_pdelay_resp(&self, data: &mut [u8], now: Timestamp) {
        let mut requester_identity = [0u8; PORT_IDENTITY_LEN];
        requester_identity.copy_from_slice(&data[ETH_HLEN + 20..ETH_HLEN + 30]);
        let mut sequence_id = [0u8; 2];
        sequence_id.copy_from_slice(&data[ETH_HLEN + 30..ETH_HLEN + 32]);

        self.write_eth_header(data);
        let ptp = &mut data[ETH_HLEN..];
        self.write_ptp_header(
            ptp,
            MSG_PDELAY_RESP,
            PDELAY_RESP_LEN,
            u16::from_be_bytes(sequence_id),
            0x7F,
        );
        // two-step flag
        ptp[6] = 0x02;
        Self::write_ptp_timestamp(&mut ptp[PTP_HEADER_LEN..], now);
        ptp[PTP_HEADER_LEN + PTP_TIMESTAMP_LEN..PDELAY_RESP_LEN]
            .copy_from_slice(&requester_identity);
    }

    #[cfg(test)]
    pub(crate) fn rx_counts(&self) -> (u64, u64, u64) {
        (self.rx_sync, self.rx_follow_up, self.rx_pdelay)
    }
}
