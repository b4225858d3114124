pub mod wire;

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{watch, RwLock};
use tracing::{debug, warn};

use crate::error::AgentError;

const ZONE_SUFFIX: &str = ".internal.";

/// The authoritative record table: fully-qualified lowercase name to an
/// ordered address list (spec.md §4.2).
#[derive(Debug, Default, Clone)]
pub struct RecordTable {
    records: HashMap<String, Vec<Ipv4Addr>>,
}

impl RecordTable {
    pub fn lookup(&self, name: &str) -> Option<&[Ipv4Addr]> {
        self.records.get(name).map(|v| v.as_slice())
    }

    #[cfg(test)]
    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }
}

/// Validates and normalizes `UpdateRecords(map name -> addrs)` input
/// (spec.md §4.2 / §8 properties 6-7): trims and lowercases names
/// (colliding case-insensitively), rejects empty names, trims addresses,
/// rejects empty or unparseable ones, and skips (not errors on) a name
/// whose address list is empty after validation — all before any mutation,
/// so a single bad entry leaves the whole table untouched.
fn validate_and_normalize(
    input: &HashMap<String, Vec<String>>,
) -> Result<HashMap<String, Vec<Ipv4Addr>>, AgentError> {
    let mut out: HashMap<String, Vec<Ipv4Addr>> = HashMap::new();

    for (raw_name, raw_addrs) in input {
        let name = raw_name.trim().to_lowercase();
        if name.is_empty() {
            return Err(AgentError::InvalidName(format!(
                "{raw_name:?} is empty after trimming"
            )));
        }

        let mut addrs = Vec::new();
        for raw_addr in raw_addrs {
            let trimmed = raw_addr.trim();
            if trimmed.is_empty() {
                return Err(AgentError::EmptyAddress(format!(
                    "record {name} has an empty address"
                )));
            }
            let addr: Ipv4Addr = trimmed
                .parse()
                .map_err(|_| AgentError::InvalidAddress(format!("{trimmed:?} for record {name}")))?;
            addrs.push(addr);
        }

        if addrs.is_empty() {
            continue; // peers may legitimately scale to zero (spec.md §4.2)
        }

        out.entry(format!("{name}{ZONE_SUFFIX}"))
            .or_default()
            .extend(addrs);
    }

    Ok(out)
}

/// Atomically replaces the record table (spec.md §4.2). Validation runs
/// to completion against a scratch map before the write lock is taken, so
/// a failure never partially mutates the live table.
pub async fn update_records(
    table: &Arc<RwLock<RecordTable>>,
    input: HashMap<String, Vec<String>>,
) -> Result<(), AgentError> {
    let normalized = validate_and_normalize(&input)?;
    let mut guard = table.write().await;
    guard.records = normalized;
    Ok(())
}

/// Runs the UDP and TCP authoritative listeners until `shutdown` fires
/// (spec.md §4.3 lifecycle, §5 concurrency model: two long-lived
/// background tasks sharing the record table under a read-write lock).
pub async fn serve(
    bind_addr: SocketAddr,
    table: Arc<RwLock<RecordTable>>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let udp = UdpSocket::bind(bind_addr).await?;
    let tcp = TcpListener::bind(bind_addr).await?;

    let udp_table = table.clone();
    let mut udp_shutdown = shutdown.clone();
    let udp_task = tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            tokio::select! {
                _ = udp_shutdown.changed() => {
                    if *udp_shutdown.borrow() { break; }
                }
                result = udp.recv_from(&mut buf) => {
                    let Ok((size, peer)) = result else { continue };
                    if let Some(response) = handle_query(&buf[..size], &udp_table).await {
                        if let Err(e) = udp.send_to(&response, peer).await {
                            warn!(%peer, error = %e, "failed to send DNS response over UDP");
                        }
                    }
                }
            }
        }
    });

    let tcp_table = table.clone();
    let tcp_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() { break; }
                }
                result = tcp.accept() => {
                    let Ok((stream, peer)) = result else { continue };
                    let table = tcp_table.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_tcp_connection(stream, &table).await {
                            debug!(%peer, error = %e, "DNS TCP connection ended");
                        }
                    });
                }
            }
        }
    });

    let _ = tokio::join!(udp_task, tcp_task);
    Ok(())
}

async fn serve_tcp_connection(
    mut stream: tokio::net::TcpStream,
    table: &Arc<RwLock<RecordTable>>,
) -> anyhow::Result<()> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let len = u16::from_be_bytes(len_buf) as usize;

    let mut msg = vec![0u8; len];
    stream.read_exact(&mut msg).await?;

    if let Some(response) = handle_query(&msg, table).await {
        let len_prefix = (response.len() as u16).to_be_bytes();
        stream.write_all(&len_prefix).await?;
        stream.write_all(&response).await?;
    }

    Ok(())
}

async fn handle_query(buf: &[u8], table: &Arc<RwLock<RecordTable>>) -> Option<Vec<u8>> {
    let (id, question) = wire::parse_query(buf)?;
    let question = question?; // empty Question: silently drop (spec.md §4.2)

    // `question.name` already ends in the "internal" label but carries no
    // trailing dot (wire::parse_name never emits one for the root label),
    // while table keys are built with a trailing ZONE_SUFFIX dot. Normalize
    // before lookup or a query for a name that was just registered would
    // never match.
    let lookup_key = format!("{}.", question.name);
    let guard = table.read().await;
    let addrs: Vec<Ipv4Addr> = guard.lookup(&lookup_key).unwrap_or(&[]).to_vec();
    drop(guard);

    let rcode = if addrs.is_empty() {
        wire::RCODE_NAME_ERROR
    } else {
        wire::RCODE_NO_ERROR
    };

    Some(wire::build_response(id, &question, &addrs, rcode))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_then_lookup_roundtrips() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let mut input = HashMap::new();
        input.insert("Edge-1".to_string(), vec!["10.200.0.2".to_string()]);

        update_records(&table, input).await.unwrap();

        let guard = table.read().await;
        assert!(guard.contains("edge-1.internal."));
    }

    #[tokio::test]
    async fn name_normalization_collides_case_insensitively() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let mut input = HashMap::new();
        input.insert("Edge-1".to_string(), vec!["10.200.0.2".to_string()]);
        input.insert("edge-1".to_string(), vec!["10.200.0.3".to_string()]);

        update_records(&table, input).await.unwrap();

        let guard = table.read().await;
        let addrs = guard.lookup("edge-1.internal.").unwrap();
        assert_eq!(addrs.len(), 2);
    }

    #[tokio::test]
    async fn empty_address_list_is_skipped_not_an_error() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let mut input = HashMap::new();
        input.insert("service-a".to_string(), vec![]);

        update_records(&table, input).await.unwrap();

        let guard = table.read().await;
        assert!(!guard.contains("service-a.internal."));
    }

    #[tokio::test]
    async fn malformed_address_leaves_previous_table_unchanged() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let mut first = HashMap::new();
        first.insert("edge-1".to_string(), vec!["10.200.0.2".to_string()]);
        update_records(&table, first).await.unwrap();

        let mut bad = HashMap::new();
        bad.insert("edge-2".to_string(), vec!["not-an-address".to_string()]);
        let err = update_records(&table, bad).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidAddress(_)));

        let guard = table.read().await;
        assert!(guard.contains("edge-1.internal."));
        assert!(!guard.contains("edge-2.internal."));
    }

    #[tokio::test]
    async fn handle_query_resolves_a_name_just_registered() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let mut input = HashMap::new();
        input.insert("edge-1".to_string(), vec!["10.200.0.2".to_string()]);
        update_records(&table, input).await.unwrap();

        let query = wire::build_query("edge-1.internal");
        let response = handle_query(&query, &table).await.expect("question present");

        // ANCOUNT at bytes 6-7 must be 1, not 0 (NXDOMAIN would be 0 answers
        // and RCODE 3); a dotless query name must still match the
        // dot-suffixed table key.
        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 1);
        assert_eq!(response[3] & 0x0F, wire::RCODE_NO_ERROR);
        assert_eq!(&response[response.len() - 4..], &[10, 200, 0, 2]);
    }

    #[tokio::test]
    async fn handle_query_unknown_name_returns_name_error() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let query = wire::build_query("ghost.internal");
        let response = handle_query(&query, &table).await.expect("question present");

        assert_eq!(u16::from_be_bytes([response[6], response[7]]), 0);
        assert_eq!(response[3] & 0x0F, wire::RCODE_NAME_ERROR);
    }

    #[tokio::test]
    async fn empty_name_after_trim_is_rejected() {
        let table = Arc::new(RwLock::new(RecordTable::default()));
        let mut input = HashMap::new();
        input.insert("   ".to_string(), vec!["10.200.0.2".to_string()]);
        let err = update_records(&table, input).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidName(_)));
    }
}
