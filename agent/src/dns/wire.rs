use std::net::Ipv4Addr;

/// Hand-rolled wire parsing for the subset of the DNS message format this
/// server needs (spec.md §4.2: "standard protocol, class IN, type A
/// only"). Byte-offset scanning here mirrors the STUN attribute-walk in
/// the teacher's `agent::nat::stun_request`.
const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

pub const RCODE_NO_ERROR: u8 = 0;
pub const RCODE_NAME_ERROR: u8 = 3;

pub struct Question {
    /// Lowercase, dot-separated, no trailing dot (e.g. `"edge-1.internal"`).
    pub name: String,
    pub qtype: u16,
    pub qclass: u16,
    /// Byte length of the encoded question section (name + type + class),
    /// used to locate where the question ends in the original buffer.
    pub encoded_len: usize,
}

/// Parses the 12-byte header and, if present, the first question.
/// Returns `None` for anything too short to be a DNS message or with a
/// malformed name; an empty QDCOUNT is not an error — callers should drop
/// such packets silently (spec.md §4.2).
pub fn parse_query(buf: &[u8]) -> Option<(u16, Option<Question>)> {
    if buf.len() < 12 {
        return None;
    }
    let id = u16::from_be_bytes([buf[0], buf[1]]);
    let qdcount = u16::from_be_bytes([buf[4], buf[5]]);

    if qdcount == 0 {
        return Some((id, None));
    }

    let (name, mut offset) = parse_name(buf, 12)?;
    if offset + 4 > buf.len() {
        return None;
    }
    let qtype = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
    let qclass = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]);
    offset += 4;

    Some((
        id,
        Some(Question {
            name: name.to_lowercase(),
            qtype,
            qclass,
            encoded_len: offset - 12,
        }),
    ))
}

/// Parses a DNS name starting at `offset`: a sequence of length-prefixed
/// labels terminated by a zero-length label. Compression pointers are not
/// supported in queries from a well-behaved client and are rejected here.
fn parse_name(buf: &[u8], mut offset: usize) -> Option<(String, usize)> {
    let mut labels = Vec::new();
    loop {
        let len = *buf.get(offset)? as usize;
        if len == 0 {
            offset += 1;
            break;
        }
        if len & 0xC0 != 0 {
            return None; // compression pointer: unsupported in a question
        }
        offset += 1;
        let label = buf.get(offset..offset + len)?;
        labels.push(String::from_utf8_lossy(label).to_string());
        offset += len;
    }
    Some((labels.join("."), offset))
}

fn encode_name(name: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for label in name.split('.') {
        if label.is_empty() {
            continue;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    out
}

/// Builds an authoritative response: echoes the id and question, sets
/// QR/AA, carries `rcode`, and appends one A record per address.
pub fn build_response(id: u16, question: &Question, addrs: &[Ipv4Addr], rcode: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);

    out.extend_from_slice(&id.to_be_bytes());
    // QR=1, Opcode=0, AA=1, TC=0, RD=0, RA=0, Z=0, RCODE
    let flags: u16 = 0x8400 | (rcode as u16 & 0x0F);
    out.extend_from_slice(&flags.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes()); // QDCOUNT
    out.extend_from_slice(&(addrs.len() as u16).to_be_bytes()); // ANCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // NSCOUNT
    out.extend_from_slice(&0u16.to_be_bytes()); // ARCOUNT

    let qname = encode_name(&question.name);
    out.extend_from_slice(&qname);
    out.extend_from_slice(&question.qtype.to_be_bytes());
    out.extend_from_slice(&question.qclass.to_be_bytes());

    for addr in addrs {
        out.extend_from_slice(&0xC00Cu16.to_be_bytes()); // pointer to qname at offset 12
        out.extend_from_slice(&TYPE_A.to_be_bytes());
        out.extend_from_slice(&CLASS_IN.to_be_bytes());
        out.extend_from_slice(&60u32.to_be_bytes()); // TTL
        out.extend_from_slice(&4u16.to_be_bytes()); // RDLENGTH
        out.extend_from_slice(&addr.octets());
    }

    out
}

/// Encodes a question section for a test query. Exposed to the rest of the
/// `dns` module's tests so they can drive `handle_query` end to end through
/// real wire bytes instead of calling `RecordTable` directly.
#[cfg(test)]
pub(super) fn build_query(name: &str) -> Vec<u8> {
    let mut buf = vec![0u8; 12];
    buf[5] = 1; // QDCOUNT = 1
    buf.extend_from_slice(&encode_name(name));
    buf.extend_from_slice(&TYPE_A.to_be_bytes());
    buf.extend_from_slice(&CLASS_IN.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_query(name: &str) -> Vec<u8> {
        let mut buf = vec![0u8; 12];
        buf[0] = 0x12;
        buf[1] = 0x34;
        buf[5] = 1; // QDCOUNT = 1
        buf.extend_from_slice(&encode_name(name));
        buf.extend_from_slice(&TYPE_A.to_be_bytes());
        buf.extend_from_slice(&CLASS_IN.to_be_bytes());
        buf
    }

    #[test]
    fn parses_a_simple_question() {
        let buf = build_query("Edge-1.internal");
        let (id, question) = parse_query(&buf).unwrap();
        assert_eq!(id, 0x1234);
        let q = question.unwrap();
        assert_eq!(q.name, "edge-1.internal");
        assert_eq!(q.qtype, TYPE_A);
        assert_eq!(q.qclass, CLASS_IN);
    }

    #[test]
    fn empty_question_count_is_not_an_error() {
        let mut buf = vec![0u8; 12];
        buf[5] = 0;
        let (_, question) = parse_query(&buf).unwrap();
        assert!(question.is_none());
    }

    #[test]
    fn response_roundtrips_name_and_address() {
        let buf = build_query("api.internal");
        let (id, question) = parse_query(&buf).unwrap();
        let question = question.unwrap();
        let resp = build_response(id, &question, &[Ipv4Addr::new(10, 200, 0, 9)], RCODE_NO_ERROR);

        assert_eq!(&resp[0..2], &id.to_be_bytes());
        assert_eq!(resp[2] & 0x80, 0x80, "QR bit must be set");
        assert_eq!(resp[2] & 0x04, 0x04, "AA bit must be set");
        assert_eq!(&resp[resp.len() - 4..], &[10, 200, 0, 9]);
    }
}
