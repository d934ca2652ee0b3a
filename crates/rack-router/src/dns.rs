//! DNS for the managed domain.
//!
//! A UDP resolver answers A queries for hosts under the managed domain
//! from the routing table with a 5 second TTL; everything else is
//! forwarded to the configured upstream over TCP. Upstream failure
//! yields SERVFAIL.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::{RouterError, RouterResult};
use crate::model::Table;

/// Answer TTL for managed names.
pub const TTL: u32 = 5;

const TYPE_A: u16 = 1;
const FLAG_RESPONSE_OK: u16 = 0x8180;
const FLAG_NXDOMAIN: u16 = 0x8183;
const FLAG_SERVFAIL: u16 = 0x8182;

/// A parsed query: id, flattened name, qtype, and the raw question
/// section (echoed back in responses).
#[derive(Debug, PartialEq)]
pub struct Query {
    pub id: u16,
    pub name: String,
    pub qtype: u16,
    question: Vec<u8>,
}

/// Parse the first question out of a DNS packet.
pub fn parse_query(packet: &[u8]) -> RouterResult<Query> {
    if packet.len() < 12 {
        return Err(RouterError::Dns("short packet".to_string()));
    }
    let id = u16::from_be_bytes([packet[0], packet[1]]);
    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount == 0 {
        return Err(RouterError::Dns("no question".to_string()));
    }

    let mut pos = 12;
    let mut labels = Vec::new();
    loop {
        let len = *packet
            .get(pos)
            .ok_or_else(|| RouterError::Dns("truncated name".to_string()))? as usize;
        pos += 1;
        if len == 0 {
            break;
        }
        let label = packet
            .get(pos..pos + len)
            .ok_or_else(|| RouterError::Dns("truncated label".to_string()))?;
        labels.push(String::from_utf8_lossy(label).to_string());
        pos += len;
    }
    let qtype_bytes = packet
        .get(pos..pos + 4)
        .ok_or_else(|| RouterError::Dns("truncated question".to_string()))?;
    let qtype = u16::from_be_bytes([qtype_bytes[0], qtype_bytes[1]]);

    Ok(Query {
        id,
        name: labels.join("."),
        qtype,
        question: packet[12..pos + 4].to_vec(),
    })
}

fn response_header(id: u16, flags: u16, ancount: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(12);
    out.extend_from_slice(&id.to_be_bytes());
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
    out.extend_from_slice(&ancount.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // nscount
    out.extend_from_slice(&0u16.to_be_bytes()); // arcount
    out
}

/// Build an A answer for a parsed query.
pub fn answer_a(query: &Query, ip: Ipv4Addr, ttl: u32) -> Vec<u8> {
    let mut out = response_header(query.id, FLAG_RESPONSE_OK, 1);
    out.extend_from_slice(&query.question);
    // Name as a pointer to the question at offset 12.
    out.extend_from_slice(&[0xC0, 0x0C]);
    out.extend_from_slice(&TYPE_A.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // class IN
    out.extend_from_slice(&ttl.to_be_bytes());
    out.extend_from_slice(&4u16.to_be_bytes());
    out.extend_from_slice(&ip.octets());
    out
}

/// Build an empty response with the given flags.
fn empty_response(query: &Query, flags: u16) -> Vec<u8> {
    let mut out = response_header(query.id, flags, 0);
    out.extend_from_slice(&query.question);
    out
}

pub fn nxdomain(query: &Query) -> Vec<u8> {
    empty_response(query, FLAG_NXDOMAIN)
}

pub fn servfail(query: &Query) -> Vec<u8> {
    empty_response(query, FLAG_SERVFAIL)
}

/// The managed-domain resolver.
pub struct DnsServer {
    table: Table,
    domain: String,
    upstream: String,
}

impl DnsServer {
    pub fn new(table: Table, domain: &str, upstream: &str) -> Self {
        Self {
            table,
            domain: domain.to_string(),
            upstream: upstream.to_string(),
        }
    }

    /// Answer one packet.
    pub async fn respond(&self, packet: &[u8]) -> RouterResult<Vec<u8>> {
        let query = parse_query(packet)?;
        let name = query.name.trim_end_matches('.');

        if query.qtype == TYPE_A
            && (name == self.domain || name.ends_with(&format!(".{}", self.domain)))
        {
            debug!(name, "managed domain query");
            return Ok(match self.table.resolve(name) {
                Some(ip) => answer_a(&query, ip, TTL),
                None => nxdomain(&query),
            });
        }

        match self.forward(packet).await {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(error = %e, "dns upstream failed");
                Ok(servfail(&query))
            }
        }
    }

    /// Forward a packet to the upstream resolver over TCP.
    async fn forward(&self, packet: &[u8]) -> RouterResult<Vec<u8>> {
        let mut stream = TcpStream::connect(&self.upstream).await?;
        let len = (packet.len() as u16).to_be_bytes();
        stream.write_all(&len).await?;
        stream.write_all(packet).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let len = u16::from_be_bytes(len_buf) as usize;
        let mut response = vec![0u8; len];
        stream.read_exact(&mut response).await?;
        Ok(response)
    }

    /// Serve queries until shutdown. Each query is answered in its own
    /// task.
    pub async fn run(
        self: Arc<Self>,
        socket: UdpSocket,
        mut shutdown: watch::Receiver<bool>,
    ) -> RouterResult<()> {
        let socket = Arc::new(socket);
        let mut buf = [0u8; 1500];
        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    let (n, peer) = received?;
                    let packet = buf[..n].to_vec();
                    let server = Arc::clone(&self);
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        match server.respond(&packet).await {
                            Ok(response) => {
                                let _ = socket.send_to(&response, peer).await;
                            }
                            Err(e) => debug!(error = %e, "dropped dns packet"),
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::IpAllocator;
    use crate::model::Table;

    fn query_packet(id: u16, name: &str, qtype: u16) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&id.to_be_bytes());
        out.extend_from_slice(&0x0100u16.to_be_bytes()); // recursion desired
        out.extend_from_slice(&1u16.to_be_bytes()); // qdcount
        out.extend_from_slice(&[0; 6]);
        for label in name.split('.') {
            out.push(label.len() as u8);
            out.extend_from_slice(label.as_bytes());
        }
        out.push(0);
        out.extend_from_slice(&qtype.to_be_bytes());
        out.extend_from_slice(&1u16.to_be_bytes());
        out
    }

    fn table_with_host() -> Table {
        let table = Table::new(Arc::new(IpAllocator::new("10.42.0.0/16").unwrap()));
        table.rack_create("rack1").unwrap();
        table.host_create("rack1", "web.myapp.convox").unwrap();
        table
    }

    #[test]
    fn parses_queries() {
        let packet = query_packet(0x1234, "web.myapp.convox", TYPE_A);
        let query = parse_query(&packet).unwrap();
        assert_eq!(query.id, 0x1234);
        assert_eq!(query.name, "web.myapp.convox");
        assert_eq!(query.qtype, TYPE_A);
    }

    #[test]
    fn rejects_short_packets() {
        assert!(parse_query(&[0, 1, 2]).is_err());
    }

    #[tokio::test]
    async fn answers_managed_names_with_ttl_5() {
        let server = DnsServer::new(table_with_host(), "convox", "127.0.0.1:1");
        let packet = query_packet(7, "web.myapp.convox", TYPE_A);

        let response = server.respond(&packet).await.unwrap();

        // id echoed, answer count 1.
        assert_eq!(&response[0..2], &7u16.to_be_bytes());
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1);
        // TTL and address live in the fixed-layout answer record.
        let answer = &response[12 + packet.len() - 12..];
        let ttl = u32::from_be_bytes([answer[6], answer[7], answer[8], answer[9]]);
        assert_eq!(ttl, TTL);
        let ip = &answer[12..16];
        assert_eq!(ip, &[10, 42, 1, 1]);
    }

    #[tokio::test]
    async fn unknown_managed_name_is_nxdomain() {
        let server = DnsServer::new(table_with_host(), "convox", "127.0.0.1:1");
        let packet = query_packet(9, "ghost.convox", TYPE_A);

        let response = server.respond(&packet).await.unwrap();
        let flags = u16::from_be_bytes([response[2], response[3]]);
        assert_eq!(flags & 0x000F, 3); // NXDOMAIN rcode
    }

    #[tokio::test]
    async fn upstream_failure_is_servfail() {
        // Port 1 refuses connections, so passthrough fails fast.
        let server = DnsServer::new(table_with_host(), "convox", "127.0.0.1:1");
        let packet = query_packet(11, "example.org", TYPE_A);

        let response = server.respond(&packet).await.unwrap();
        let flags = u16::from_be_bytes([response[2], response[3]]);
        assert_eq!(flags & 0x000F, 2); // SERVFAIL rcode
    }
}
