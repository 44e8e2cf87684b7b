//! Pure selection strategies operating on a list's alive subset.

use std::sync::Arc;

use rand::Rng;

use crate::hashing::{hash_key, jump_consistent_hash};
use crate::upstream::{Upstream, CHECKED_OVERFLOW_GUARD};

/// A rotation policy. `Sequential` is the only exhaustible one: it returns
/// `None` at the end of a pass instead of wrapping transparently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RotationPolicy {
    Random,
    RoundRobin,
    MasterSlave,
    Hashed,
    Sequential,
}

/// Picks a uniformly random index into `alive`.
pub fn select_random(alive: &[Arc<Upstream>], rng: &mut impl Rng) -> usize {
    rng.gen_range(0..alive.len())
}

/// Smooth weighted round-robin: every member's running weight is bumped by
/// its configured weight, the largest running weight wins, and the winner's
/// running weight is reduced by the sum of all weights. Over a full cycle
/// of `sum(weight)` picks this selects each member exactly `weight` times
/// with no burstiness — the textbook nginx/rspamd "smooth WRR" behavior.
///
/// Falls back to the checked-balancer when every member's weight is 0.
pub fn select_round_robin(alive: &[Arc<Upstream>]) -> usize {
    let total: i64 = alive.iter().map(|u| u.weight() as i64).sum();
    if total == 0 {
        return select_checked_balance(alive);
    }

    let mut best_idx = 0;
    let mut best_cur = i64::MIN;
    for (i, u) in alive.iter().enumerate() {
        let mut st = u.state.lock();
        st.cur_weight += st.weight as i64;
        if st.cur_weight > best_cur {
            best_cur = st.cur_weight;
            best_idx = i;
        }
    }
    alive[best_idx].state.lock().cur_weight -= total;
    best_idx
}

/// Unweighted fallback for round-robin when every member has weight 0:
/// pick the member minimizing `checked * (errors + 1)`, resetting every
/// `checked` counter first if any has grown past the overflow guard.
pub fn select_checked_balance(alive: &[Arc<Upstream>]) -> usize {
    if alive
        .iter()
        .any(|u| u.checked() > CHECKED_OVERFLOW_GUARD)
    {
        for u in alive {
            u.state.lock().checked = 0;
        }
    }

    let mut best_idx = 0;
    let mut best_score = u64::MAX;
    for (i, u) in alive.iter().enumerate() {
        let st = u.state.lock();
        let score = st.checked.saturating_mul(st.errors as u64 + 1);
        if score < best_score {
            best_score = score;
            best_idx = i;
        }
    }
    best_idx
}

/// Master-slave: the greatest configured weight wins outright, no
/// decrement; ties resolve to the first scanned member.
pub fn select_master_slave(alive: &[Arc<Upstream>]) -> usize {
    let mut best_idx = 0;
    let mut best_weight = alive[0].weight();
    for (i, u) in alive.iter().enumerate().skip(1) {
        let w = u.weight();
        if w > best_weight {
            best_weight = w;
            best_idx = i;
        }
    }
    best_idx
}

/// Jump consistent hash of `key` over `alive.len()` buckets.
pub fn select_hashed(alive: &[Arc<Upstream>], key: &[u8], seed: u64) -> usize {
    let h = hash_key(key, seed);
    jump_consistent_hash(h, alive.len() as i32) as usize
}

/// Advances a shared cursor through `alive`; wraps to 0 and returns `None`
/// once the cursor reaches the end, signalling end-of-iteration.
pub fn select_sequential(alive: &[Arc<Upstream>], cursor: &mut usize) -> Option<usize> {
    if *cursor >= alive.len() {
        *cursor = 0;
        return None;
    }
    let idx = *cursor;
    *cursor += 1;
    Some(idx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{Endpoint, ResolvedAddr};
    use crate::upstream::Flags;
    use std::collections::HashMap;

    fn make(name: &str, weight: u32) -> Arc<Upstream> {
        Upstream::new(
            name.into(),
            vec![ResolvedAddr::new(Endpoint::Inet("127.0.0.1:80".parse().unwrap()))],
            weight,
            Flags::empty(),
        )
    }

    #[test]
    fn smooth_weighted_round_robin_matches_ratios() {
        let members = vec![make("a", 5), make("b", 1), make("c", 1)];
        let mut counts: HashMap<&str, u32> = HashMap::new();
        for _ in 0..700 {
            let idx = select_round_robin(&members);
            *counts.entry(members[idx].name()).or_default() += 1;
        }
        assert_eq!(counts["a"], 500);
        assert_eq!(counts["b"], 100);
        assert_eq!(counts["c"], 100);
    }

    #[test]
    fn round_robin_falls_back_when_unweighted() {
        let members = vec![make("a", 0), make("b", 0)];
        // Should not panic and should alternate based on checked/errors.
        for _ in 0..10 {
            let idx = select_round_robin(&members);
            members[idx].state.lock().checked += 1;
        }
    }

    #[test]
    fn master_slave_picks_highest_weight_first_on_tie() {
        let members = vec![make("a", 3), make("b", 5), make("c", 5)];
        assert_eq!(select_master_slave(&members), 1);
    }

    #[test]
    fn sequential_exhausts_then_restarts() {
        let members = vec![make("a", 1), make("b", 1), make("c", 1)];
        let mut cursor = 0;
        assert_eq!(select_sequential(&members, &mut cursor), Some(0));
        assert_eq!(select_sequential(&members, &mut cursor), Some(1));
        assert_eq!(select_sequential(&members, &mut cursor), Some(2));
        assert_eq!(select_sequential(&members, &mut cursor), None);
        assert_eq!(select_sequential(&members, &mut cursor), Some(0));
    }

    #[test]
    fn hashed_is_deterministic_and_stable_under_removal() {
        let members = vec![make("a", 1), make("b", 1), make("c", 1)];
        let key = b"user42";
        let idx1 = select_hashed(&members, key, 0xa574de7df64e9b9d);
        let idx2 = select_hashed(&members, key, 0xa574de7df64e9b9d);
        assert_eq!(idx1, idx2);
    }
}
