use bytes::{Buf, BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{FromWireError, FromWireResult, take_u8, take_u16, take_u32, take_u64};

/// Transport protocol carried in an IP message PDU.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum IpProtocol {
    /// No protocol indicated
    #[default]
    None = 0,
    /// TCP
    Tcp = 6,
    /// UDP
    Udp = 17,
}

/// Source/destination address pair of an IP message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IpAddrPair {
    /// No addresses carried
    #[default]
    None,
    /// IPv4 source and destination
    V4 {
        /// Source address
        src: u32,
        /// Destination address
        dst: u32,
    },
    /// IPv6 source and destination, as eight 16-bit groups each
    V6 {
        /// Source address
        src: [u16; 8],
        /// Destination address
        dst: [u16; 8],
    },
}

/// Diagnostics-over-IP socket adapter fields.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DoIpAdapter {
    /// DoIP protocol version
    pub protocol_version: u8,
    /// DoIP payload type
    pub payload_type: u16,
}

/// SOME/IP socket adapter fields.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SomeIpAdapter {
    /// Message identifier
    pub message_id: u32,
    /// Payload length
    pub length: u32,
    /// Request identifier
    pub request_id: u32,
    /// Protocol version
    pub protocol_version: u8,
    /// Interface version
    pub interface_version: u8,
    /// Message type
    pub message_type: u8,
    /// Return code
    pub return_code: u8,
}

/// Socket-adapter metadata of an IP message.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SocketAdapter {
    /// No adapter
    #[default]
    None,
    /// Diagnostics over IP
    DoIp(DoIpAdapter),
    /// SOME/IP
    SomeIp(SomeIpAdapter),
}

/// Transport metadata of an IP message PDU.
///
/// Carries the Ethernet header fields, the IP endpoints and an optional
/// socket-adapter block. Variable length on the wire: the address block
/// and the adapter block are tagged unions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IpMetadata {
    /// Destination MAC, lower 48 bits significant
    pub eth_dst_mac: u64,
    /// Source MAC, lower 48 bits significant
    pub eth_src_mac: u64,
    /// Ethertype
    pub eth_ethertype: u16,
    /// 802.1Q priority code point
    pub eth_tci_pcp: u8,
    /// 802.1Q drop eligible indicator
    pub eth_tci_dei: u8,
    /// 802.1Q VLAN identifier
    pub eth_tci_vid: u16,
    /// Transport protocol
    pub protocol: IpProtocol,
    /// IP addresses
    pub addr: IpAddrPair,
    /// Source port
    pub src_port: u16,
    /// Destination port
    pub dst_port: u16,
    /// Socket adapter metadata
    pub adapter: SocketAdapter,
}

const ADDR_NONE: u8 = 0;
const ADDR_V4: u8 = 1;
const ADDR_V6: u8 = 2;

const SO_AD_NONE: u8 = 0;
const SO_AD_DOIP: u8 = 1;
const SO_AD_SOMEIP: u8 = 2;

impl IpMetadata {
    pub(crate) fn try_from_wire(buf: &mut impl Buf) -> FromWireResult<Self> {
        let eth_dst_mac = take_u64(buf)?;
        let eth_src_mac = take_u64(buf)?;
        let eth_ethertype = take_u16(buf)?;
        let eth_tci_pcp = take_u8(buf)?;
        let eth_tci_dei = take_u8(buf)?;
        let eth_tci_vid = take_u16(buf)?;
        let protocol = super::take_enum(buf, "IpProtocol")?;

        let addr = match take_u8(buf)? {
            ADDR_NONE => IpAddrPair::None,
            ADDR_V4 => IpAddrPair::V4 {
                src: take_u32(buf)?,
                dst: take_u32(buf)?,
            },
            ADDR_V6 => {
                let mut src = [0u16; 8];
                let mut dst = [0u16; 8];
                for group in &mut src {
                    *group = take_u16(buf)?;
                }
                for group in &mut dst {
                    *group = take_u16(buf)?;
                }
                IpAddrPair::V6 { src, dst }
            }
            value => return Err(FromWireError::InvalidEnum("IpAddrPair", value)),
        };

        let src_port = take_u16(buf)?;
        let dst_port = take_u16(buf)?;

        let adapter = match take_u8(buf)? {
            SO_AD_NONE => SocketAdapter::None,
            SO_AD_DOIP => SocketAdapter::DoIp(DoIpAdapter {
                protocol_version: take_u8(buf)?,
                payload_type: take_u16(buf)?,
            }),
            SO_AD_SOMEIP => SocketAdapter::SomeIp(SomeIpAdapter {
                message_id: take_u32(buf)?,
                length: take_u32(buf)?,
                request_id: take_u32(buf)?,
                protocol_version: take_u8(buf)?,
                interface_version: take_u8(buf)?,
                message_type: take_u8(buf)?,
                return_code: take_u8(buf)?,
            }),
            value => return Err(FromWireError::InvalidEnum("SocketAdapter", value)),
        };

        Ok(Self {
            eth_dst_mac,
            eth_src_mac,
            eth_ethertype,
            eth_tci_pcp,
            eth_tci_dei,
            eth_tci_vid,
            protocol,
            addr,
            src_port,
            dst_port,
            adapter,
        })
    }

    pub(crate) fn append_to_wire(&self, buf: &mut BytesMut) {
        buf.put_u64(self.eth_dst_mac);
        buf.put_u64(self.eth_src_mac);
        buf.put_u16(self.eth_ethertype);
        buf.put_u8(self.eth_tci_pcp);
        buf.put_u8(self.eth_tci_dei);
        buf.put_u16(self.eth_tci_vid);
        buf.put_u8(self.protocol.into());

        match &self.addr {
            IpAddrPair::None => buf.put_u8(ADDR_NONE),
            IpAddrPair::V4 { src, dst } => {
                buf.put_u8(ADDR_V4);
                buf.put_u32(*src);
                buf.put_u32(*dst);
            }
            IpAddrPair::V6 { src, dst } => {
                buf.put_u8(ADDR_V6);
                for group in src {
                    buf.put_u16(*group);
                }
                for group in dst {
                    buf.put_u16(*group);
                }
            }
        }

        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);

        match &self.adapter {
            SocketAdapter::None => buf.put_u8(SO_AD_NONE),
            SocketAdapter::DoIp(doip) => {
                buf.put_u8(SO_AD_DOIP);
                buf.put_u8(doip.protocol_version);
                buf.put_u16(doip.payload_type);
            }
            SocketAdapter::SomeIp(someip) => {
                buf.put_u8(SO_AD_SOMEIP);
                buf.put_u32(someip.message_id);
                buf.put_u32(someip.length);
                buf.put_u32(someip.request_id);
                buf.put_u8(someip.protocol_version);
                buf.put_u8(someip.interface_version);
                buf.put_u8(someip.message_type);
                buf.put_u8(someip.return_code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn mk_v4_udp() -> IpMetadata {
        IpMetadata::default()
    }

    fn v6_someip() -> IpMetadata {
        IpMetadata {
            eth_ethertype: 0x86dd,
            protocol: IpProtocol::Tcp,
            addr: IpAddrPair::V6 {
                src: [0xfe80, 0, 0, 0, 0, 0, 0, 1],
                dst: [0xfe80, 0, 0, 0, 0, 0, 0, 2],
            },
            src_port: 13400,
            dst_port: 13400,
            adapter: SocketAdapter::SomeIp(SomeIpAdapter {
                message_id: 0x1234_8001,
                length: 16,
                request_id: 0x0001_0001,
                protocol_version: 1,
                interface_version: 2,
                message_type: 0x80,
                return_code: 0,
            }),
            ..Default::default()
        }
    }

    fn doip() -> IpMetadata {
        IpMetadata {
            adapter: SocketAdapter::DoIp(DoIpAdapter {
                protocol_version: 2,
                payload_type: 0x8001,
            }),
            ..Default::default()
        }
    }

    #[test_case(mk_v4_udp(); "v4 udp")]
    fn round_trip(meta: IpMetadata) {
        let mut buf = BytesMut::new();
        meta.append_to_wire(&mut buf);
        let mut wire = &buf[..];
        assert_eq!(IpMetadata::try_from_wire(&mut wire).unwrap(), meta);
        assert!(wire.is_empty());
    }

    #[test]
    fn try_from_wire_bad_addr_tag() {
        let mut buf = BytesMut::new();
        v4_udp().append_to_wire(&mut buf);
        buf[23] = 7; // address tag follows 23 bytes of ethernet + protocol
        let mut wire = &buf[..];
        assert_eq!(
            IpMetadata::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InvalidEnum("IpAddrPair", 7)
        );
    }

    #[test]
    fn try_from_wire_truncated() {
        let mut buf = BytesMut::new();
        v6_someip().append_to_wire(&mut buf);
        let mut wire = &buf[..buf.len() - 1];
        assert_eq!(
            IpMetadata::try_from_wire(&mut wire).unwrap_err(),
            FromWireError::InsufficientData
        );
    }
}
