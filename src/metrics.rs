//! Flattening of decoded datagrams into per-packet measurement tuples.
//!
//! Downstream consumers (exporters, aggregators) want flat tagged values,
//! not a record tree. Each flow sample crossed with each of its raw packet
//! header records yields one [`Measurement`].

use std::collections::BTreeMap;

use crate::datagram::{
    Datagram, EthernetHeader, FlowRecord, FlowSample, IpHeader, RawPacketHeader, Sample,
    TransportHeader,
};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Measurement {
    pub tags: BTreeMap<&'static str, String>,
    pub fields: BTreeMap<&'static str, u64>,
}

pub fn flatten(datagram: &Datagram) -> Vec<Measurement> {
    let mut measurements = vec![];

    for sample in &datagram.samples {
        let flow = match sample {
            Sample::Flow(flow) | Sample::ExpandedFlow(flow) => flow,
            Sample::Unknown { .. } => continue,
        };

        for record in &flow.records {
            if let FlowRecord::RawPacketHeader(raw) = record {
                measurements.push(flatten_raw(datagram, flow, raw));
            }
        }
    }

    measurements
}

fn flatten_raw(datagram: &Datagram, flow: &FlowSample, raw: &RawPacketHeader) -> Measurement {
    let mut m = Measurement::default();

    m.tags.insert("agent_address", datagram.agent_address.to_string());
    m.tags.insert("source_id_type", flow.source_id_type.to_string());
    m.tags.insert("source_id_index", flow.source_id_index.to_string());
    m.tags.insert("input_ifindex", flow.input_if_index.to_string());
    m.tags.insert("output_ifindex", flow.output_if_index.to_string());
    if let Some(direction) = flow.direction {
        m.tags.insert("sample_direction", direction.as_str().to_string());
    }
    m.tags.insert("header_protocol", raw.protocol.to_string());

    m.fields.insert("bytes", raw.bytes);
    m.fields.insert("frame_length", u64::from(raw.frame_length));
    m.fields.insert("header_length", u64::from(raw.header_length));
    m.fields.insert("sampling_rate", u64::from(flow.sampling_rate));
    m.fields.insert("sample_pool", u64::from(flow.sample_pool));
    m.fields.insert("drops", u64::from(flow.drops));

    if let Some(ethernet) = &raw.header {
        flatten_ethernet(&mut m, ethernet);
    }

    m
}

fn flatten_ethernet(m: &mut Measurement, ethernet: &EthernetHeader) {
    m.tags.insert("src_mac", format_mac(ethernet.src_mac));
    m.tags.insert("dst_mac", format_mac(ethernet.dst_mac));
    if let Some(name) = ethernet.ether_type {
        m.tags.insert("ether_type", name.to_string());
    }

    match &ethernet.ip_header {
        Some(IpHeader::V4(ip)) => {
            m.tags.insert("src_ip", ip.src_ip.to_string());
            m.tags.insert("dst_ip", ip.dst_ip.to_string());
            m.fields.insert("ip_dscp", u64::from(ip.dscp));
            m.fields.insert("ip_ecn", u64::from(ip.ecn));
            m.fields.insert("ip_ttl", u64::from(ip.ttl));
            m.fields.insert("ip_total_length", u64::from(ip.total_length));
            m.fields.insert("ip_flags", u64::from(ip.flags));
            m.fields
                .insert("ip_fragment_offset", u64::from(ip.fragment_offset));

            flatten_transport(m, ip.transport.as_ref());
        }
        Some(IpHeader::V6(ip)) => {
            m.tags.insert("src_ip", ip.src_ip.to_string());
            m.tags.insert("dst_ip", ip.dst_ip.to_string());
            m.fields.insert("ip_dscp", u64::from(ip.dscp));
            m.fields.insert("ip_ecn", u64::from(ip.ecn));
            m.fields.insert("ip_ttl", u64::from(ip.hop_limit));
            m.fields
                .insert("ip_payload_length", u64::from(ip.payload_length));

            flatten_transport(m, ip.transport.as_ref());
        }
        None => {}
    }
}

fn flatten_transport(m: &mut Measurement, transport: Option<&TransportHeader>) {
    match transport {
        Some(TransportHeader::Tcp(tcp)) => {
            m.tags.insert("src_port", tcp.src_port.to_string());
            m.tags.insert("dst_port", tcp.dst_port.to_string());
            m.fields
                .insert("tcp_header_length", u64::from(tcp.header_length));
            m.fields.insert("tcp_flags", u64::from(tcp.flags));
            m.fields.insert("tcp_window_size", u64::from(tcp.window_size));
            m.fields
                .insert("tcp_urgent_pointer", u64::from(tcp.urgent_pointer));
        }
        Some(TransportHeader::Udp(udp)) => {
            m.tags.insert("src_port", udp.src_port.to_string());
            m.tags.insert("dst_port", udp.dst_port.to_string());
            m.fields.insert("udp_length", u64::from(udp.length));
        }
        None => {}
    }
}

fn format_mac(mac: [u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
