//! Decay — time-weighted importance, pruning policy, and expiration.

use crate::model::{Config, Memory, Millis};

const MILLIS_PER_DAY: f64 = 86_400_000.0;

/// Age of a memory in days at time `now`.
pub fn age_days(created_at: Millis, now: Millis) -> f64 {
    (now - created_at) as f64 / MILLIS_PER_DAY
}

/// Time-decayed importance with an access-frequency boost:
///
/// ```text
/// λ           = ln(2) / half_life_days
/// decay       = exp(-λ * age_days)
/// access_boost = 1 + log2(1 + access_count) * 0.1
/// decayed     = importance * decay * access_boost
/// ```
pub fn decayed_importance(
    importance: f32,
    created_at: Millis,
    access_count: u32,
    now: Millis,
    half_life_days: f64,
) -> f32 {
    let age = age_days(created_at, now).max(0.0);
    let lambda = std::f64::consts::LN_2 / half_life_days;
    let decay = (-lambda * age).exp();
    let access_boost = 1.0 + (1.0 + access_count as f64).log2() * 0.1;
    (importance as f64 * decay * access_boost) as f32
}

/// Decayed importance for a stored [`Memory`] under `config`.
pub fn memory_decayed_importance(memory: &Memory, now: Millis, config: &Config) -> f32 {
    decayed_importance(
        memory.importance,
        memory.created_at,
        memory.access_count,
        now,
        config.decay_half_life_days,
    )
}

/// Pruning aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMode {
    /// Prune only records with a non-null `expiresAt < now`.
    Gentle,
    /// `Gentle` plus records whose decayed importance is below 0.01.
    Normal,
    /// `Normal` plus the lowest 10% (ceiling) of remaining records by
    /// decayed importance, ascending.
    Aggressive,
}

const LOW_IMPORTANCE_THRESHOLD: f32 = 0.01;

/// Compute the set of memory ids eligible for pruning under `mode`, given the
/// full set of memories in a namespace and the decayed importance of each
/// (pre-computed by the caller via [`memory_decayed_importance`] so this
/// function stays pure and easily testable).
pub fn prune_candidates(
    memories: &[(&Memory, f32)],
    mode: PruneMode,
    now: Millis,
) -> Vec<String> {
    let mut expired: Vec<String> = memories
        .iter()
        .filter(|(m, _)| m.is_expired(now))
        .map(|(m, _)| m.id.clone())
        .collect();

    if mode == PruneMode::Gentle {
        expired.sort();
        return expired;
    }

    let mut low_importance: Vec<String> = memories
        .iter()
        .filter(|(m, decayed)| !m.is_expired(now) && *decayed < LOW_IMPORTANCE_THRESHOLD)
        .map(|(m, _)| m.id.clone())
        .collect();

    if mode == PruneMode::Normal {
        let mut result = expired;
        result.append(&mut low_importance);
        result.sort();
        result.dedup();
        return result;
    }

    // Aggressive: union of Normal plus the lowest 10% (ceiling) of the
    // *remaining* records (those not already pruned) by decayed importance.
    let mut already_pruned: std::collections::HashSet<&str> =
        expired.iter().map(String::as_str).collect();
    already_pruned.extend(low_importance.iter().map(String::as_str));

    let mut remaining: Vec<(&Memory, f32)> = memories
        .iter()
        .filter(|(m, _)| !already_pruned.contains(m.id.as_str()))
        .cloned()
        .collect();
    remaining.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let victim_count = (remaining.len() as f64 * 0.10).ceil() as usize;
    let bottom_decile: Vec<String> = remaining
        .into_iter()
        .take(victim_count)
        .map(|(m, _)| m.id.clone())
        .collect();

    let mut result = expired;
    result.append(&mut low_importance);
    result.extend(bottom_decile);
    result.sort();
    result.dedup();
    result
}

/// Derive `expiresAt` for a freshly admitted memory: `created_at + ttl*1000`
/// when `ttl` is set, otherwise `created_at + max_retention_days` (in ms).
pub fn compute_expires_at(created_at: Millis, ttl: Option<u64>, max_retention_days: f64) -> Millis {
    match ttl {
        Some(seconds) => created_at + (seconds as i64) * 1000,
        None => created_at + (max_retention_days * MILLIS_PER_DAY) as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_memory(id: &str, importance: f32, created_at: Millis, access_count: u32) -> Memory {
        Memory {
            id: id.to_string(),
            content: "x".to_string(),
            category: "fact".to_string(),
            source: "test".to_string(),
            surprise: 1.0,
            importance,
            access_count,
            last_accessed: created_at,
            created_at,
            embedding: None,
            metadata: HashMap::new(),
            namespace: "default".to_string(),
            ttl: None,
            expires_at: None,
            version: 1,
            history: vec![],
        }
    }

    #[test]
    fn half_life_yields_half_importance() {
        let now: Millis = 0;
        let created_at = -((30.0 * MILLIS_PER_DAY) as Millis);
        let decayed = decayed_importance(1.0, created_at, 0, now, 30.0);
        assert!((decayed - 0.5).abs() < 0.05, "decayed = {decayed}");
    }

    #[test]
    fn higher_access_count_strictly_increases_decayed_importance() {
        let now: Millis = 0;
        let created_at = -((10.0 * MILLIS_PER_DAY) as Millis);
        let low = decayed_importance(1.0, created_at, 0, now, 30.0);
        let high = decayed_importance(1.0, created_at, 50, now, 30.0);
        assert!(high > low);
    }

    #[test]
    fn gentle_prunes_only_expired() {
        let now: Millis = 10_000;
        let mut m1 = make_memory("a", 1.0, 0, 0);
        m1.expires_at = Some(now - 1000);
        let m2 = make_memory("b", 0.005, 0, 0);
        let m3 = make_memory("c", 1.0, 0, 0);

        let decayed = [(&m1, 1.0), (&m2, 0.005), (&m3, 1.0)];
        let pruned = prune_candidates(&decayed, PruneMode::Gentle, now);
        assert_eq!(pruned, vec!["a".to_string()]);
    }

    #[test]
    fn normal_prunes_expired_and_low_importance() {
        let now: Millis = 10_000;
        let mut m1 = make_memory("a", 1.0, 0, 0);
        m1.expires_at = Some(now - 1000);
        let m2 = make_memory("b", 0.005, 0, 0);
        let m3 = make_memory("c", 1.0, 0, 0);

        let decayed = [(&m1, 1.0), (&m2, 0.005), (&m3, 1.0)];
        let mut pruned = prune_candidates(&decayed, PruneMode::Normal, now);
        pruned.sort();
        assert_eq!(pruned, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn aggressive_adds_bottom_decile_of_remainder() {
        let now: Millis = 0;
        let memories: Vec<Memory> = (0..10)
            .map(|i| make_memory(&format!("m{i}"), i as f32 * 0.1 + 0.1, 0, 0))
            .collect();
        let decayed: Vec<(&Memory, f32)> = memories.iter().map(|m| (m, m.importance)).collect();

        let pruned = prune_candidates(&decayed, PruneMode::Aggressive, now);
        // None expired, none below 0.01, so aggressive adds ceil(10 * 0.10) = 1 victim:
        // the single lowest-importance record.
        assert_eq!(pruned, vec!["m0".to_string()]);
    }

    #[test]
    fn expires_at_from_ttl() {
        let created_at: Millis = 1_000_000;
        let expires = compute_expires_at(created_at, Some(60), 90.0);
        assert_eq!(expires, created_at + 60_000);
    }

    #[test]
    fn expires_at_from_max_retention() {
        let created_at: Millis = 0;
        let expires = compute_expires_at(created_at, None, 90.0);
        assert_eq!(expires, (90.0 * MILLIS_PER_DAY) as Millis);
    }
}
