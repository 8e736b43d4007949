use std::io::{self, Read};
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::bounded::BoundedReader;
use crate::read::ReadExt;
pub use crate::read::FieldError;

// Opaque sample_data formats according to https://sflow.org/SFLOW-DATAGRAM5.txt
const SAMPLE_FORMAT_FLOW: u32 = 1;
const SAMPLE_FORMAT_EXPANDED_FLOW: u32 = 3;

// Opaque flow_data formats according to https://sflow.org/SFLOW-STRUCTS5.txt
const FLOW_FORMAT_RAW_PACKET_HEADER: u32 = 1;

// header_protocol of a sampled raw packet header
const HEADER_PROTOCOL_ETHERNET_ISO88023: u32 = 1;

const ADDRESS_TYPE_UNKNOWN: u32 = 0;
const ADDRESS_TYPE_IPV4: u32 = 1;
const ADDRESS_TYPE_IPV6: u32 = 2;

// 802.1Q tag protocol identifier, sits where the ether type otherwise would
const TPID_8021Q: u16 = 0x8100;

const ETHER_TYPE_IPV4: u16 = 0x0800;
const ETHER_TYPE_IPV6: u16 = 0x86dd;

const IP_PROTOCOL_TCP: u8 = 6;
const IP_PROTOCOL_UDP: u8 = 17;

// protection against absurd declared counts
const MAX_SAMPLES: u32 = 1000;
const MAX_FLOW_RECORDS: u32 = 1000;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("version {0} not supported, only version 5")]
    UnsupportedVersion(u32),
    #[error("unknown agent address type {0}")]
    UnknownAddressType(u32),
    #[error("unexpected IPv6 version {0}")]
    UnexpectedIpv6Version(u32),
    #[error("too many samples")]
    TooManySamples,
    #[error("too many flow records")]
    TooManyFlowRecords,
    #[error(transparent)]
    Read(#[from] FieldError),
}

/// Address of the agent that emitted a datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAddress {
    Unknown,
    V4(Ipv4Addr),
    V6(Ipv6Addr),
}

impl std::fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentAddress::Unknown => f.write_str("unknown"),
            AgentAddress::V4(ip) => ip.fmt(f),
            AgentAddress::V6(ip) => ip.fmt(f),
        }
    }
}

/// One sFlow version 5 message.
#[derive(Debug)]
pub struct Datagram {
    pub version: u32,
    pub agent_address: AgentAddress,
    pub sub_agent_id: u32,
    pub sequence_number: u32,
    /// Agent uptime in milliseconds.
    pub uptime: u32,
    pub samples: Vec<Sample>,
}

#[derive(Debug)]
pub enum Sample {
    Flow(FlowSample),
    ExpandedFlow(FlowSample),
    /// A sample format this decoder does not interpret, e.g. counter
    /// samples (formats 2 and 4). The body was skipped.
    Unknown { format: u32, length: u32 },
}

/// Whether the sample was taken on the ingress or egress path of the
/// sampling interface, derived from the source-id and interface indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDirection {
    Ingress,
    Egress,
}

impl SampleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleDirection::Ingress => "ingress",
            SampleDirection::Egress => "egress",
        }
    }
}

/// Body shared by the compact and expanded flow sample formats; the two
/// differ only in how source-id and interface fields are serialized.
#[derive(Debug)]
pub struct FlowSample {
    pub sequence_number: u32,
    pub source_id_type: u32,
    pub source_id_index: u32,
    /// "1 in N" sampling ratio of the exporting interface.
    pub sampling_rate: u32,
    pub sample_pool: u32,
    pub drops: u32,
    pub input_if_format: u32,
    pub input_if_index: u32,
    pub output_if_format: u32,
    pub output_if_index: u32,
    pub direction: Option<SampleDirection>,
    pub records: Vec<FlowRecord>,
}

#[derive(Debug)]
pub enum FlowRecord {
    RawPacketHeader(RawPacketHeader),
    /// A flow_data format this decoder does not interpret. The body was
    /// skipped.
    Unknown { format: u32, length: u32 },
}

#[derive(Debug)]
pub struct RawPacketHeader {
    pub protocol: u32,
    /// Length of the sampled frame on the wire.
    pub frame_length: u32,
    /// Octets the agent removed from the frame before exporting it.
    pub stripped: u32,
    /// Octets of packet header actually exported.
    pub header_length: u32,
    /// Estimated bytes on the wire this sample stands for:
    /// `frame_length * sampling_rate`.
    pub bytes: u64,
    pub header: Option<EthernetHeader>,
}

#[derive(Debug)]
pub struct EthernetHeader {
    pub dst_mac: [u8; 6],
    pub src_mac: [u8; 6],
    /// The frame carried an 802.1Q tag (discarded) in front of the ether
    /// type.
    pub vlan_tagged: bool,
    pub ether_type_code: u16,
    pub ether_type: Option<&'static str>,
    pub ip_header: Option<IpHeader>,
}

#[derive(Debug)]
pub enum IpHeader {
    V4(IpV4Header),
    V6(IpV6Header),
}

#[derive(Debug)]
pub struct IpV4Header {
    pub version: u8,
    /// Header length in 32-bit words.
    pub ihl: u8,
    pub dscp: u8,
    pub ecn: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub header_checksum: u16,
    pub src_ip: Ipv4Addr,
    pub dst_ip: Ipv4Addr,
    pub transport: Option<TransportHeader>,
}

#[derive(Debug)]
pub struct IpV6Header {
    pub dscp: u8,
    pub ecn: u8,
    pub payload_length: u16,
    pub next_header: u8,
    pub hop_limit: u8,
    pub src_ip: Ipv6Addr,
    pub dst_ip: Ipv6Addr,
    pub transport: Option<TransportHeader>,
}

#[derive(Debug)]
pub enum TransportHeader {
    Tcp(TcpHeader),
    Udp(UdpHeader),
}

#[derive(Debug, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub sequence: u32,
    pub ack_number: u32,
    /// Header length in bytes (the wire carries it in 32-bit words).
    pub header_length: u8,
    /// The 9 flag bits (NS..FIN).
    pub flags: u16,
    pub window_size: u16,
    pub checksum: u16,
    pub urgent_pointer: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub struct UdpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub length: u16,
    pub checksum: u16,
}

fn ether_type_name(code: u16) -> Option<&'static str> {
    let name = match code {
        0x0800 => "IPv4",
        0x0806 => "ARP",
        0x0842 => "Wake-on-LAN",
        0x22f3 => "TRILL",
        0x6003 => "DECnet Phase IV",
        0x8035 => "RARP",
        0x809b => "AppleTalk",
        0x80f3 => "AppleTalk ARP",
        0x8100 => "802.1Q",
        0x8137 => "IPX",
        0x86dd => "IPv6",
        0x8808 => "Ethernet flow control",
        0x8847 => "MPLS unicast",
        0x8848 => "MPLS multicast",
        0x8863 => "PPPoE discovery",
        0x8864 => "PPPoE session",
        _ => return None,
    };

    Some(name)
}

impl Datagram {
    /// Decode datagrams from `reader` until it is exhausted, handing each
    /// completed one to `sink`.
    ///
    /// End-of-stream on a datagram boundary is the normal termination and
    /// returns `Ok(())`; anywhere else it is an error. `sink` is invoked
    /// exactly once per successfully decoded datagram, never with a
    /// partially populated one.
    pub fn decode_stream<R, F>(mut reader: R, mut sink: F) -> Result<(), Error>
    where
        R: Read,
        F: FnMut(Datagram),
    {
        while let Some(datagram) = Datagram::decode_one(&mut reader)? {
            sink(datagram);
        }

        Ok(())
    }

    /// Decode a single datagram. Returns `Ok(None)` on a clean
    /// end-of-stream, i.e. one hit before the first byte of the version
    /// field.
    pub fn decode_one<R: Read>(reader: &mut R) -> Result<Option<Datagram>, Error> {
        let version = match read_version(reader)? {
            Some(version) => version,
            None => return Ok(None),
        };
        if version != 5 {
            return Err(Error::UnsupportedVersion(version));
        }

        let address_type = reader.read_u32("agent address type")?;
        let agent_address = match address_type {
            ADDRESS_TYPE_UNKNOWN => AgentAddress::Unknown,
            ADDRESS_TYPE_IPV4 => {
                AgentAddress::V4(Ipv4Addr::from(reader.read_bytes::<4>("agent address")?))
            }
            ADDRESS_TYPE_IPV6 => {
                AgentAddress::V6(Ipv6Addr::from(reader.read_bytes::<16>("agent address")?))
            }
            unknown => return Err(Error::UnknownAddressType(unknown)),
        };

        let sub_agent_id = reader.read_u32("sub agent id")?;
        let sequence_number = reader.read_u32("sequence number")?;
        let uptime = reader.read_u32("uptime")?;
        let samples = decode_samples(reader)?;

        Ok(Some(Datagram {
            version,
            agent_address,
            sub_agent_id,
            sequence_number,
            uptime,
            samples,
        }))
    }
}

/// Read the version field of the next datagram, reporting a clean
/// end-of-stream as `None`. Anything between one and three bytes is a
/// truncated stream.
fn read_version<R: Read>(reader: &mut R) -> Result<Option<u32>, Error> {
    let mut buf = [0u8; 4];
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(FieldError::eof("version").into()),
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(FieldError::new("version", err).into()),
        }
    }

    Ok(Some(u32::from_be_bytes(buf)))
}

fn decode_samples<R: Read>(reader: &mut R) -> Result<Vec<Sample>, Error> {
    let count = reader.read_u32("sample count")?;
    if count > MAX_SAMPLES {
        return Err(Error::TooManySamples);
    }

    let mut samples = Vec::with_capacity(count as usize);
    for _ in 0..count {
        samples.push(decode_sample(reader)?);
    }

    Ok(samples)
}

fn decode_sample<R: Read>(reader: &mut R) -> Result<Sample, Error> {
    let format = reader.read_u32("sample type")?;
    let length = reader.read_u32("sample data length")?;

    // The bounded reader drains the declared length on drop, on success as
    // well as on error, so the outer stream stays aligned no matter what
    // happens inside the sample.
    let mut bounded = BoundedReader::new(reader, u64::from(length));
    let sample = match format {
        SAMPLE_FORMAT_FLOW => Sample::Flow(decode_flow_sample(&mut bounded)?),
        SAMPLE_FORMAT_EXPANDED_FLOW => Sample::ExpandedFlow(decode_flow_sample_expanded(&mut bounded)?),
        _ => {
            debug!(message = "skipping unknown sample format", format);
            Sample::Unknown { format, length }
        }
    };

    Ok(sample)
}

fn decode_flow_sample<R: Read>(reader: &mut R) -> Result<FlowSample, Error> {
    let sequence_number = reader.read_u32("sample sequence number")?;

    // Compact data-source format: type in the top 8 bits, index below.
    let source_id = reader.read_u32("source id")?;
    let source_id_type = source_id >> 24;
    let source_id_index = source_id & 0x00ff_ffff;

    let sampling_rate = reader.read_u32("sampling rate")?;
    let sample_pool = reader.read_u32("sample pool")?;
    let drops = reader.read_u32("drops")?;

    // Compact interface encoding: format in the top 2 bits, index below.
    let input = reader.read_u32("input interface")?;
    let input_if_format = input >> 30;
    let input_if_index = input & 0x3fff_ffff;

    let output = reader.read_u32("output interface")?;
    let output_if_format = output >> 30;
    let output_if_index = output & 0x3fff_ffff;

    let direction = sample_direction(source_id_index, input_if_index, output_if_index);
    let records = decode_flow_records(reader, sampling_rate)?;

    Ok(FlowSample {
        sequence_number,
        source_id_type,
        source_id_index,
        sampling_rate,
        sample_pool,
        drops,
        input_if_format,
        input_if_index,
        output_if_format,
        output_if_index,
        direction,
        records,
    })
}

fn decode_flow_sample_expanded<R: Read>(reader: &mut R) -> Result<FlowSample, Error> {
    let sequence_number = reader.read_u32("sample sequence number")?;
    let source_id_type = reader.read_u32("source id type")?;
    let source_id_index = reader.read_u32("source id index")?;
    let sampling_rate = reader.read_u32("sampling rate")?;
    let sample_pool = reader.read_u32("sample pool")?;
    let drops = reader.read_u32("drops")?;
    let input_if_format = reader.read_u32("input interface format")?;
    let input_if_index = reader.read_u32("input interface index")?;
    let output_if_format = reader.read_u32("output interface format")?;
    let output_if_index = reader.read_u32("output interface index")?;

    let direction = sample_direction(source_id_index, input_if_index, output_if_index);
    let records = decode_flow_records(reader, sampling_rate)?;

    Ok(FlowSample {
        sequence_number,
        source_id_type,
        source_id_index,
        sampling_rate,
        sample_pool,
        drops,
        input_if_format,
        input_if_index,
        output_if_format,
        output_if_index,
        direction,
        records,
    })
}

/// An egress match wins when the source id matches both interfaces.
fn sample_direction(
    source_id_index: u32,
    input_if_index: u32,
    output_if_index: u32,
) -> Option<SampleDirection> {
    if source_id_index == output_if_index {
        Some(SampleDirection::Egress)
    } else if source_id_index == input_if_index {
        Some(SampleDirection::Ingress)
    } else {
        None
    }
}

fn decode_flow_records<R: Read>(reader: &mut R, sampling_rate: u32) -> Result<Vec<FlowRecord>, Error> {
    let count = reader.read_u32("flow record count")?;
    if count > MAX_FLOW_RECORDS {
        return Err(Error::TooManyFlowRecords);
    }

    let mut records = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let format = reader.read_u32("flow format")?;
        let length = reader.read_u32("flow data length")?;

        let mut bounded = BoundedReader::new(reader, u64::from(length));
        let record = match format {
            FLOW_FORMAT_RAW_PACKET_HEADER => FlowRecord::RawPacketHeader(
                decode_raw_packet_header(&mut bounded, sampling_rate)?,
            ),
            _ => {
                debug!(message = "skipping unknown flow format", format);
                FlowRecord::Unknown { format, length }
            }
        };
        drop(bounded);

        records.push(record);
    }

    Ok(records)
}

fn decode_raw_packet_header<R: Read>(
    reader: &mut R,
    sampling_rate: u32,
) -> Result<RawPacketHeader, Error> {
    let protocol = reader.read_u32("header protocol")?;
    let frame_length = reader.read_u32("frame length")?;
    let stripped = reader.read_u32("stripped octets")?;
    let header_length = reader.read_u32("header length")?;

    // Scale the observed frame up to an estimate of what crossed the wire.
    // 64-bit arithmetic: both factors go up to u32::MAX.
    let bytes = u64::from(frame_length) * u64::from(sampling_rate);

    let mut bounded = BoundedReader::new(reader, u64::from(header_length));
    let header = match protocol {
        HEADER_PROTOCOL_ETHERNET_ISO88023 => Some(decode_ethernet(&mut bounded)?),
        _ => {
            debug!(message = "skipping unknown header protocol", protocol);
            None
        }
    };

    Ok(RawPacketHeader {
        protocol,
        frame_length,
        stripped,
        header_length,
        bytes,
        header,
    })
}

fn decode_ethernet<R: Read>(reader: &mut R) -> Result<EthernetHeader, Error> {
    let dst_mac = reader.read_bytes::<6>("destination MAC")?;
    let src_mac = reader.read_bytes::<6>("source MAC")?;

    // What follows the MACs is either the ether type or an 802.1Q tag; a
    // tagged frame carries the real ether type after the two tag bytes.
    let tag_or_ether_type = reader.read_u16("ether type")?;
    let (vlan_tagged, ether_type_code) = if tag_or_ether_type == TPID_8021Q {
        reader.skip(2, "802.1Q tag")?;
        (true, reader.read_u16("ether type")?)
    } else {
        (false, tag_or_ether_type)
    };

    let ip_header = match ether_type_code {
        ETHER_TYPE_IPV4 => Some(IpHeader::V4(decode_ipv4(reader)?)),
        ETHER_TYPE_IPV6 => Some(IpHeader::V6(decode_ipv6(reader)?)),
        _ => None,
    };

    Ok(EthernetHeader {
        dst_mac,
        src_mac,
        vlan_tagged,
        ether_type_code,
        ether_type: ether_type_name(ether_type_code),
        ip_header,
    })
}

fn decode_ipv4<R: Read>(reader: &mut R) -> Result<IpV4Header, Error> {
    let version_ihl = reader.read_u8("version/IHL")?;
    let version = version_ihl >> 4;
    let ihl = version_ihl & 0x0f;

    let dscp_ecn = reader.read_u8("DSCP/ECN")?;
    let dscp = dscp_ecn >> 2;
    let ecn = dscp_ecn & 0x03;

    let total_length = reader.read_u16("total length")?;
    let identification = reader.read_u16("identification")?;

    let flags_offset = reader.read_u16("flags/fragment offset")?;
    let flags = (flags_offset >> 13) as u8;
    let fragment_offset = flags_offset & 0x1fff;

    let ttl = reader.read_u8("TTL")?;
    let protocol = reader.read_u8("protocol")?;
    let header_checksum = reader.read_u16("header checksum")?;
    let src_ip = Ipv4Addr::from(reader.read_bytes::<4>("source IP")?);
    let dst_ip = Ipv4Addr::from(reader.read_bytes::<4>("destination IP")?);

    // Options sit between the fixed header and the payload when IHL > 5.
    if ihl > 5 {
        reader.skip(u64::from(ihl - 5) * 4, "IPv4 options")?;
    }

    let transport = decode_transport(reader, protocol)?;

    Ok(IpV4Header {
        version,
        ihl,
        dscp,
        ecn,
        total_length,
        identification,
        flags,
        fragment_offset,
        ttl,
        protocol,
        header_checksum,
        src_ip,
        dst_ip,
        transport,
    })
}

fn decode_ipv6<R: Read>(reader: &mut R) -> Result<IpV6Header, Error> {
    // version (4 bits), traffic class as DSCP/ECN (6 + 2 bits), flow
    // label (20 bits, not kept)
    let head = reader.read_u32("IPv6 version/class/flow label")?;
    let version = head >> 28;
    if version != 6 {
        return Err(Error::UnexpectedIpv6Version(version));
    }
    let dscp = ((head >> 22) & 0x3f) as u8;
    let ecn = ((head >> 20) & 0x03) as u8;

    let payload_length = reader.read_u16("payload length")?;
    let next_header = reader.read_u8("next header")?;
    let hop_limit = reader.read_u8("hop limit")?;
    let src_ip = Ipv6Addr::from(reader.read_bytes::<16>("source IP")?);
    let dst_ip = Ipv6Addr::from(reader.read_bytes::<16>("destination IP")?);

    // Extension headers are not traversed; a next header that is not
    // directly TCP or UDP leaves the transport unset.
    let transport = decode_transport(reader, next_header)?;

    Ok(IpV6Header {
        dscp,
        ecn,
        payload_length,
        next_header,
        hop_limit,
        src_ip,
        dst_ip,
        transport,
    })
}

fn decode_transport<R: Read>(
    reader: &mut R,
    protocol: u8,
) -> Result<Option<TransportHeader>, Error> {
    let transport = match protocol {
        IP_PROTOCOL_TCP => Some(TransportHeader::Tcp(decode_tcp(reader)?)),
        IP_PROTOCOL_UDP => Some(TransportHeader::Udp(decode_udp(reader)?)),
        _ => {
            debug!(message = "skipping unknown IP protocol", protocol);
            None
        }
    };

    Ok(transport)
}

fn decode_tcp<R: Read>(reader: &mut R) -> Result<TcpHeader, Error> {
    let src_port = reader.read_u16("source port")?;
    let dst_port = reader.read_u16("destination port")?;
    let sequence = reader.read_u32("sequence")?;
    let ack_number = reader.read_u32("ack number")?;

    // data offset (4 bits), reserved (3 bits, dropped), flags (9 bits)
    let offset_flags = reader.read_u16("data offset/flags")?;
    let header_length = ((offset_flags >> 12) * 4) as u8;
    let flags = offset_flags & 0x01ff;

    let window_size = reader.read_u16("window size")?;
    let checksum = reader.read_u16("checksum")?;
    let urgent_pointer = reader.read_u16("urgent pointer")?;

    Ok(TcpHeader {
        src_port,
        dst_port,
        sequence,
        ack_number,
        header_length,
        flags,
        window_size,
        checksum,
        urgent_pointer,
    })
}

fn decode_udp<R: Read>(reader: &mut R) -> Result<UdpHeader, Error> {
    Ok(UdpHeader {
        src_port: reader.read_u16("source port")?,
        dst_port: reader.read_u16("destination port")?,
        length: reader.read_u16("UDP length")?,
        checksum: reader.read_u16("checksum")?,
    })
}
