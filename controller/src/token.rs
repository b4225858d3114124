use chrono::{Duration as ChronoDuration, Utc};
use rand::RngCore;
use uuid::Uuid;

use crate::error::{MeshError, MeshResult};
use crate::model::{BootstrapToken, TokenKind};
use crate::store::Store;

/// `Create` (spec.md §4.5). `kind == EdgeNode` requires a tenant binding.
#[allow(clippy::too_many_arguments)]
pub async fn create(
    store: &Store,
    kind: TokenKind,
    tenant_id: Option<String>,
    cluster_id: Option<String>,
    expected_client_addr: Option<String>,
    usage_limit: Option<u32>,
    ttl: ChronoDuration,
) -> MeshResult<BootstrapToken> {
    if kind == TokenKind::EdgeNode && tenant_id.is_none() {
        return Err(MeshError::InvalidRequest(
            "edge_node tokens require a tenant binding".to_string(),
        ));
    }

    let token = BootstrapToken {
        id: Uuid::new_v4().to_string(),
        secret: generate_secret(),
        kind,
        tenant_id,
        cluster_id,
        expected_client_addr,
        expires_at: Utc::now() + ttl,
        usage_limit,
        usage_count: 0,
        used_at: None,
    };

    store
        .tokens
        .lock()
        .await
        .insert(token.id.clone(), token.clone());

    Ok(token)
}

/// `Validate` (spec.md §4.5). Read-only: does not consume the token.
pub async fn validate(store: &Store, secret: &str) -> MeshResult<BootstrapToken> {
    let tokens = store.tokens.lock().await;
    let token = tokens
        .values()
        .find(|t| t.secret == secret)
        .cloned()
        .ok_or_else(|| MeshError::Unauthenticated("token not found".to_string()))?;

    if !token.is_valid(Utc::now()) {
        return Err(MeshError::Unauthenticated(
            "token expired or already used".to_string(),
        ));
    }

    Ok(token)
}

/// `Consume` (spec.md §4.5): the atomic compare-and-update. Holding the
/// table mutex for the whole check-then-mutate is the in-process analogue
/// of `UPDATE ... WHERE expires_at > now() AND (...)`. A race loser gets
/// `AlreadyUsed`; this is the property tested in spec.md §8 property 1 /
/// scenario E4.
pub async fn consume(store: &Store, secret: &str) -> MeshResult<BootstrapToken> {
    let mut tokens = store.tokens.lock().await;

    let id = tokens
        .values()
        .find(|t| t.secret == secret)
        .map(|t| t.id.clone());

    let Some(id) = id else {
        return Err(MeshError::Unauthenticated("AlreadyUsed".to_string()));
    };

    let now = Utc::now();
    let token = tokens.get_mut(&id).expect("id came from this map");

    if !token.is_valid(now) {
        return Err(MeshError::Unauthenticated("AlreadyUsed".to_string()));
    }

    token.usage_count += 1;
    token.used_at = Some(now);

    Ok(token.clone())
}

/// `Revoke` (spec.md §4.5): hard delete.
pub async fn revoke(store: &Store, id: &str) -> bool {
    store.tokens.lock().await.remove(id).is_some()
}

/// Checks the expected-client-address binding (spec.md §4.5 and §4.8 step
/// 2). A single address requires equality; a CIDR requires containment.
/// A stored CIDR that fails to parse fails closed (reject).
pub fn check_expected_addr(expected: &str, observed: &str) -> bool {
    let observed_ip: std::net::IpAddr = match observed.parse() {
        Ok(ip) => ip,
        Err(_) => return false,
    };

    if let Some((network, prefix_str)) = expected.split_once('/') {
        let Ok(prefix_len) = prefix_str.parse::<u8>() else {
            return false;
        };
        let Ok(network_ip) = network.parse::<std::net::Ipv4Addr>() else {
            return false;
        };
        let std::net::IpAddr::V4(observed_v4) = observed_ip else {
            return false;
        };
        if prefix_len > 32 {
            return false;
        }
        let mask = if prefix_len == 0 {
            0u32
        } else {
            u32::MAX << (32 - prefix_len)
        };
        return (u32::from(network_ip) & mask) == (u32::from(observed_v4) & mask);
    }

    expected.parse::<std::net::IpAddr>().ok() == Some(observed_ip)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn concurrent_consume_single_use_token_has_exactly_one_winner() {
        let store = std::sync::Arc::new(Store::default());
        let token = create(
            &store,
            TokenKind::EdgeNode,
            Some("tenant-a".into()),
            None,
            None,
            None,
            ChronoDuration::hours(1),
        )
        .await
        .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let secret = token.secret.clone();
            handles.push(tokio::spawn(async move { consume(&store, &secret).await }));
        }

        let mut successes = 0;
        let mut already_used = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => successes += 1,
                Err(MeshError::Unauthenticated(_)) => already_used += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(already_used, 7);

        let stored = store.tokens.lock().await.get(&token.id).unwrap().clone();
        assert_eq!(stored.usage_count, 1);
    }

    #[test]
    fn expected_addr_single_address_requires_equality() {
        assert!(check_expected_addr("203.0.113.9", "203.0.113.9"));
        assert!(!check_expected_addr("203.0.113.9", "203.0.113.10"));
    }

    #[test]
    fn expected_addr_cidr_requires_containment() {
        assert!(check_expected_addr("203.0.113.0/24", "203.0.113.200"));
        assert!(!check_expected_addr("203.0.113.0/24", "203.0.114.1"));
    }

    #[test]
    fn expected_addr_invalid_cidr_fails_closed() {
        assert!(!check_expected_addr("not-a-cidr/abc", "203.0.113.9"));
    }

    #[tokio::test]
    async fn edge_node_token_requires_tenant() {
        let store = Store::default();
        let result = create(
            &store,
            TokenKind::EdgeNode,
            None,
            None,
            None,
            None,
            ChronoDuration::hours(1),
        )
        .await;
        assert!(matches!(result, Err(MeshError::InvalidRequest(_))));
    }
}
