//! Minimal Ethernet II and ARP framing for the listen and probe commands.

use std::net::Ipv4Addr;

use uio_e1000::MacAddress;

pub const ETH_HEADER_LEN: usize = 14;
pub const ETH_TYPE_IPV4: u16 = 0x0800;
pub const ETH_TYPE_ARP: u16 = 0x0806;
/// Shortest frame the MAC accepts for transmission, excluding the FCS it appends.
pub const ETH_MIN_FRAME_LEN: usize = 60;
pub const BROADCAST: MacAddress = [0xff; 6];

pub const ARP_PACKET_LEN: usize = 28;
pub const ARP_HW_ETHERNET: u16 = 1;
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: MacAddress,
    pub src: MacAddress,
    pub ether_type: u16,
}

impl EthernetHeader {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let header = frame.get(..ETH_HEADER_LEN)?;
        Some(Self {
            dst: mac_at(header, 0),
            src: mac_at(header, 6),
            ether_type: u16::from_be_bytes([header[12], header[13]]),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.dst);
        out.extend_from_slice(&self.src);
        out.extend_from_slice(&self.ether_type.to_be_bytes());
    }
}

/// Ethernet/IPv4 ARP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub op: u16,
    pub sender_mac: MacAddress,
    pub sender_ip: Ipv4Addr,
    pub target_mac: MacAddress,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    pub fn parse(body: &[u8]) -> Option<Self> {
        let body = body.get(..ARP_PACKET_LEN)?;
        let hw_type = u16::from_be_bytes([body[0], body[1]]);
        let proto_type = u16::from_be_bytes([body[2], body[3]]);
        if hw_type != ARP_HW_ETHERNET || proto_type != ETH_TYPE_IPV4 || body[4] != 6 || body[5] != 4
        {
            return None;
        }
        Some(Self {
            op: u16::from_be_bytes([body[6], body[7]]),
            sender_mac: mac_at(body, 8),
            sender_ip: ip_at(body, 14),
            target_mac: mac_at(body, 18),
            target_ip: ip_at(body, 24),
        })
    }

    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&ARP_HW_ETHERNET.to_be_bytes());
        out.extend_from_slice(&ETH_TYPE_IPV4.to_be_bytes());
        out.push(6);
        out.push(4);
        out.extend_from_slice(&self.op.to_be_bytes());
        out.extend_from_slice(&self.sender_mac);
        out.extend_from_slice(&self.sender_ip.octets());
        out.extend_from_slice(&self.target_mac);
        out.extend_from_slice(&self.target_ip.octets());
    }
}

/// Broadcast "who-has `target_ip`" frame, padded to the minimum frame length.
pub fn arp_request(src: MacAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETH_MIN_FRAME_LEN);
    EthernetHeader {
        dst: BROADCAST,
        src,
        ether_type: ETH_TYPE_ARP,
    }
    .write_to(&mut frame);
    ArpPacket {
        op: ARP_OP_REQUEST,
        sender_mac: src,
        sender_ip,
        target_mac: [0; 6],
        target_ip,
    }
    .write_to(&mut frame);
    frame.resize(ETH_MIN_FRAME_LEN, 0);
    frame
}

/// The ARP reply carried by `frame`, if it is one.
pub fn parse_arp_reply(frame: &[u8]) -> Option<ArpPacket> {
    let header = EthernetHeader::parse(frame)?;
    if header.ether_type != ETH_TYPE_ARP {
        return None;
    }
    ArpPacket::parse(&frame[ETH_HEADER_LEN..]).filter(|arp| arp.op == ARP_OP_REPLY)
}

fn mac_at(bytes: &[u8], offset: usize) -> MacAddress {
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&bytes[offset..offset + 6]);
    mac
}

fn ip_at(bytes: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    )
}
