//! A selection pool of upstreams sharing a rotation policy, limits and a
//! watcher registry.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::{parse_host_port, Endpoint, ParseMode, ParsedHost, ResolvedAddr};
use crate::context::{jitter, Context, ContextInner};
use crate::error::PoolError;
use crate::limits::Limits;
use crate::selector::{
    select_hashed, select_master_slave, select_random, select_round_robin, select_sequential,
    RotationPolicy,
};
use crate::upstream::{Flags, Upstream};
use crate::watch::{Event, EventMask, Watcher, WatcherCallback};

struct ListState {
    ups: Vec<Arc<Upstream>>,
    alive: Vec<Arc<Upstream>>,
    watchers: Vec<Watcher>,
    rot_alg: RotationPolicy,
    limits_override: Option<Limits>,
    seq_cursor: usize,
}

/// The mutable core behind a [`UpstreamList`] handle. Kept as a separate
/// type (rather than folded into `UpstreamList`) because an upstream holds
/// a weak back-reference to it (`Upstream::list`) while revive timers hold
/// a strong one, breaking the upstream/list ownership cycle.
pub(crate) struct ListInner {
    ctx: std::sync::Weak<ContextInner>,
    state: Mutex<ListState>,
}

impl ListInner {
    pub(crate) fn effective_limits(&self) -> Limits {
        let overridden = self.state.lock().limits_override;
        overridden.unwrap_or_else(|| self.ctx_default_limits())
    }

    fn ctx_default_limits(&self) -> Limits {
        self.ctx
            .upgrade()
            .map(|c| c.default_limits())
            .unwrap_or(Limits::DEFAULT)
    }

    pub(crate) fn notify(&self, event: Event) {
        let watchers = self.state.lock().watchers.clone();
        for w in &watchers {
            w.notify(&event);
        }
    }

    pub(crate) fn member_count(&self) -> usize {
        self.state.lock().ups.len()
    }

    /// Triggers a DNS re-resolution pass for `up` without arming or
    /// disturbing any timer, used by the single-member breaker path and by
    /// `set_inactive`'s pre-warm.
    pub(crate) fn trigger_reresolve(&self, up: &Arc<Upstream>) {
        if let Some(ctx) = self.ctx.upgrade() {
            crate::dns::force_resolve(ctx, up.clone());
        }
    }

    /// Appends `up` to `alive`, assigns its `active_idx`, arms a
    /// lazy-resolve timer (if configured and not `NORESOLVE`), and emits
    /// `ONLINE`. A no-op if `up` is already active.
    pub(crate) fn set_active(self: &Arc<Self>, up: &Arc<Upstream>) {
        if up.state.lock().active_idx.is_some() {
            return;
        }
        let idx = {
            let mut st = self.state.lock();
            st.alive.push(up.clone());
            st.alive.len() - 1
        };
        up.state.lock().active_idx = Some(idx);

        // Whatever timer was previously armed (lazy-resolve or, when this
        // is a revive, the revive timer itself finishing) no longer applies
        // once `up` is active: exactly one timer is armed per upstream at a
        // time, so this abort happens unconditionally, before deciding
        // whether to arm a fresh lazy-resolve timer below.
        if let Some(old) = up.state.lock().timer.take() {
            old.abort();
        }

        let noresolve = up.flags().contains(Flags::NORESOLVE);
        if let Some(ctx) = self.ctx.upgrade() {
            if ctx.is_configured() && !noresolve {
                let limits = self.effective_limits();
                let delay = jitter(&*ctx.rng(), limits.lazy_resolve_time, 0.1);
                crate::dns::arm_lazy_resolve(ctx, self.clone(), up.clone(), delay);
            }
        }

        self.notify(Event::Online {
            upstream: up.name().to_string(),
            errors: up.errors(),
        });
    }

    /// Removes `up` from `alive`, re-indexes the remaining members, pre-warms
    /// a fresh DNS resolution, arms a jittered revive timer holding a strong
    /// reference to both `up` and this list, and emits `OFFLINE`.
    pub(crate) fn set_inactive(self: &Arc<Self>, up: &Arc<Upstream>) {
        {
            let mut st = self.state.lock();
            if let Some(pos) = st.alive.iter().position(|u| Arc::ptr_eq(u, up)) {
                st.alive.remove(pos);
                for (i, member) in st.alive.iter().enumerate() {
                    member.state.lock().active_idx = Some(i);
                }
            }
        }
        up.state.lock().active_idx = None;

        if let Some(ctx) = self.ctx.upgrade() {
            crate::dns::force_resolve(ctx.clone(), up.clone());

            if let Some(old) = up.state.lock().timer.take() {
                old.abort();
            }
            let limits = self.effective_limits();
            let delay = jitter(&*ctx.rng(), limits.revive_time, limits.revive_jitter);
            if let Some(handle) = ctx.runtime_handle() {
                let list = self.clone();
                let target = up.clone();
                let task = handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    list.set_active(&target);
                });
                up.state.lock().timer = Some(task);
            }
        }

        self.notify(Event::Offline {
            upstream: up.name().to_string(),
            errors: up.errors(),
        });
    }
}

/// A selection pool: all member upstreams, the subset currently alive, a
/// watcher list, a rotation policy and optional limit overrides.
#[derive(Clone)]
pub struct UpstreamList(pub(crate) Arc<ListInner>);

impl UpstreamList {
    /// Creates an empty list against `ctx`. The default rotation is
    /// round-robin; override with [`UpstreamList::set_rotation`] or a
    /// `parse_line` policy prefix.
    pub fn new(ctx: &Context) -> Self {
        let inner = Arc::new(ListInner {
            ctx: Arc::downgrade(&ctx.0),
            state: Mutex::new(ListState {
                ups: Vec::new(),
                alive: Vec::new(),
                watchers: Vec::new(),
                rot_alg: RotationPolicy::RoundRobin,
                limits_override: None,
                seq_cursor: 0,
            }),
        });
        Self(inner)
    }

    pub fn rotation(&self) -> RotationPolicy {
        self.0.state.lock().rot_alg
    }

    pub fn set_rotation(&self, policy: RotationPolicy) {
        self.0.state.lock().rot_alg = policy;
    }

    /// Overrides this list's [`Limits`] wholesale; `None` reverts to the
    /// owning context's defaults.
    pub fn set_limits(&self, limits: Option<Limits>) {
        self.0.state.lock().limits_override = limits;
    }

    pub fn limits(&self) -> Limits {
        self.0.effective_limits()
    }

    pub fn count(&self) -> usize {
        self.0.state.lock().ups.len()
    }

    pub fn alive_count(&self) -> usize {
        self.0.state.lock().alive.len()
    }

    /// A snapshot of every member, in insertion order.
    pub fn iter(&self) -> Vec<Arc<Upstream>> {
        self.0.state.lock().ups.clone()
    }

    /// Registers a watcher. Panics if `mask` is empty — a watcher that can
    /// never fire is a programming error.
    pub fn watch(&self, mask: EventMask, callback: WatcherCallback) {
        self.0.state.lock().watchers.push(Watcher::new(mask, callback));
    }

    /// Parses `spec` and, on success, appends a new upstream. See
    /// [`UpstreamList::add_upstream_detailed`] for the reason behind a
    /// `false`/`Err`.
    pub fn add_upstream(&self, spec: &str, default_port: u16, mode: ParseMode) -> bool {
        matches!(self.add_upstream_detailed(spec, default_port, mode), Ok(true))
    }

    /// Like [`UpstreamList::add_upstream`] but surfaces the parse failure
    /// reason instead of collapsing it to a plain `false`.
    pub fn add_upstream_detailed(
        &self,
        spec: &str,
        default_port: u16,
        mode: ParseMode,
    ) -> Result<bool, PoolError> {
        if spec.trim().is_empty() {
            return Err(PoolError::EmptySpec);
        }
        let parsed = parse_host_port(spec, mode).map_err(|reason| PoolError::ParseError {
            spec: spec.to_string(),
            reason,
        })?;

        let (name, addrs, flags) = match parsed.host {
            ParsedHost::Unix(path) => (path.clone(), vec![Endpoint::Unix(path)], Flags::NORESOLVE),
            ParsedHost::Literal { addr, port } => {
                let endpoint = Endpoint::Inet(SocketAddr::new(addr, port.unwrap_or(default_port)));
                (addr.to_string(), vec![endpoint], Flags::NORESOLVE)
            }
            ParsedHost::Name { host, port } => {
                let port = port.unwrap_or(default_port);
                let resolved = resolve_bootstrap(&host, port);
                if resolved.is_empty() {
                    return Ok(false);
                }
                (host, resolved, Flags::empty())
            }
        };

        let weight = parsed.priority.unwrap_or(0);
        let resolved_addrs: Vec<ResolvedAddr> = addrs.into_iter().map(ResolvedAddr::new).collect();
        let up = Upstream::new(name, resolved_addrs, weight, flags);

        {
            let mut st = self.0.state.lock();
            if st.rot_alg == RotationPolicy::MasterSlave && weight == 0 && st.ups.is_empty() {
                up.set_weight(1);
            }
            st.ups.push(up.clone());
        }

        up.set_owning_list(Arc::downgrade(&self.0));
        if let Some(ctx) = self.0.ctx.upgrade() {
            ctx.register(&up);
        }
        self.0.set_active(&up);

        Ok(true)
    }

    /// Structured-configuration entry point: feeds every string reachable
    /// from `value` (a bare string, an array, or an `"upstreams"`-keyed
    /// object) through [`UpstreamList::parse_line`]. See [`crate::config`].
    pub fn from_json(&self, value: &serde_json::Value, default_port: u16) -> bool {
        crate::config::from_json(self, value, default_port)
    }

    /// Recognizes an optional `policy:` prefix (setting this list's
    /// rotation), then splits the remainder on any of `;, \t\n\r` and calls
    /// [`UpstreamList::add_upstream`] on each non-empty span. Returns `true`
    /// if at least one entry was accepted.
    pub fn parse_line(&self, s: &str, default_port: u16) -> bool {
        let (policy, rest) = strip_policy_prefix(s);
        if let Some(p) = policy {
            self.set_rotation(p);
        }
        let mut any = false;
        for entry in split_entries(rest) {
            if self.add_upstream(entry, default_port, ParseMode::Default) {
                any = true;
            }
        }
        any
    }

    /// Cancels every member's armed timer, clears watchers and detaches
    /// each upstream's back-reference. An explicit method rather than a
    /// `Drop` impl, since a revive timer can hold a strong `Arc<ListInner>`,
    /// so `Drop` alone would not run deterministically at the point the
    /// caller actually wants cleanup.
    pub fn destroy(&self) {
        let ups = {
            let mut st = self.0.state.lock();
            st.alive.clear();
            st.watchers.clear();
            std::mem::take(&mut st.ups)
        };
        for up in ups {
            if let Some(t) = up.state.lock().timer.take() {
                t.abort();
            }
            up.detach_from_list();
        }
    }

    /// Selects an upstream using `default_policy` (falling back to this
    /// list's configured rotation when `None`), returning `None` only for
    /// the sequential policy at end-of-iteration (or an empty list).
    pub fn get(&self, default_policy: Option<RotationPolicy>, key: Option<&[u8]>) -> Option<Arc<Upstream>> {
        self.select(default_policy, key, false)
    }

    /// Like [`UpstreamList::get`] but `policy` always wins over this list's
    /// configured rotation.
    pub fn get_forced(&self, policy: RotationPolicy, key: Option<&[u8]>) -> Option<Arc<Upstream>> {
        self.select(Some(policy), key, true)
    }

    fn select(
        &self,
        policy_hint: Option<RotationPolicy>,
        key: Option<&[u8]>,
        forced: bool,
    ) -> Option<Arc<Upstream>> {
        let inner = &self.0;
        let snapshot = inner.state.lock().ups.clone();
        if snapshot.is_empty() {
            return None;
        }

        // Reactivation guard: a non-empty pool always yields a result for
        // any policy but `sequential`'s exhaustion.
        let alive_empty = inner.state.lock().alive.is_empty();
        if alive_empty {
            for up in &snapshot {
                inner.set_active(up);
            }
        }

        let (alive, configured_policy) = {
            let st = inner.state.lock();
            (st.alive.clone(), st.rot_alg)
        };
        if alive.is_empty() {
            return None;
        }

        let policy = if forced {
            policy_hint.expect("get_forced always supplies a policy")
        } else {
            policy_hint.unwrap_or(configured_policy)
        };
        let limits = inner.effective_limits();

        let chosen = match policy {
            RotationPolicy::Random => Some(select_random(&alive, &mut rand::thread_rng())),
            RotationPolicy::RoundRobin => Some(select_round_robin(&alive)),
            RotationPolicy::MasterSlave => Some(select_master_slave(&alive)),
            RotationPolicy::Hashed => {
                let k = key.unwrap_or(b"");
                Some(select_hashed(&alive, k, limits.hash_seed))
            }
            RotationPolicy::Sequential => {
                let mut st = inner.state.lock();
                select_sequential(&alive, &mut st.seq_cursor)
            }
        };

        let idx = chosen?;
        let up = alive[idx].clone();
        up.state.lock().checked += 1;
        Some(up)
    }
}

/// Performs the one-shot, synchronous bootstrap lookup for a DNS name at
/// `add_upstream` time. Deliberately blocking, since `add_upstream` is
/// itself a synchronous API; callers constructing pools from inside an
/// async task should wrap the call in `tokio::task::spawn_blocking`.
fn resolve_bootstrap(host: &str, port: u16) -> Vec<Endpoint> {
    use std::net::ToSocketAddrs;
    format!("{host}:{port}")
        .to_socket_addrs()
        .map(|it| it.map(Endpoint::Inet).collect())
        .unwrap_or_default()
}

fn strip_policy_prefix(s: &str) -> (Option<RotationPolicy>, &str) {
    const PREFIXES: &[(&str, RotationPolicy)] = &[
        ("random:", RotationPolicy::Random),
        ("master-slave:", RotationPolicy::MasterSlave),
        ("round-robin:", RotationPolicy::RoundRobin),
        ("hash:", RotationPolicy::Hashed),
        ("sequential:", RotationPolicy::Sequential),
    ];
    for (prefix, policy) in PREFIXES {
        if let Some(rest) = s.strip_prefix(prefix) {
            return (Some(*policy), rest);
        }
    }
    (None, s)
}

fn split_entries(s: &str) -> Vec<&str> {
    s.split(|c: char| ";, \t\n\r".contains(c))
        .filter(|p| !p.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_known_policy_prefixes() {
        let (policy, rest) = strip_policy_prefix("hash:a.example,b.example");
        assert_eq!(policy, Some(RotationPolicy::Hashed));
        assert_eq!(rest, "a.example,b.example");
    }

    #[test]
    fn unknown_prefix_is_not_consumed() {
        let (policy, rest) = strip_policy_prefix("weighted:a.example");
        assert_eq!(policy, None);
        assert_eq!(rest, "weighted:a.example");
    }

    #[test]
    fn splits_on_any_separator() {
        let entries = split_entries("a.example;b.example, c.example\td.example\n\re.example");
        assert_eq!(entries, vec!["a.example", "b.example", "c.example", "d.example", "e.example"]);
    }

    #[test]
    fn add_upstream_rejects_empty_spec() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert!(!list.add_upstream("", 80, ParseMode::Default));
    }

    #[test]
    fn add_upstream_detailed_reports_empty_spec_reason() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert_eq!(
            list.add_upstream_detailed("  ", 80, ParseMode::Default),
            Err(PoolError::EmptySpec)
        );
    }

    #[test]
    fn add_upstream_accepts_literal_and_activates_it() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert!(list.add_upstream("127.0.0.1:9000", 80, ParseMode::Default));
        assert_eq!(list.count(), 1);
        assert_eq!(list.alive_count(), 1);
    }

    #[test]
    fn parse_line_applies_policy_prefix_and_splits_entries() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        assert!(list.parse_line("master-slave:127.0.0.1:80;127.0.0.2:80", 80));
        assert_eq!(list.rotation(), RotationPolicy::MasterSlave);
        assert_eq!(list.count(), 2);
    }

    #[test]
    fn master_slave_first_zero_weight_member_forced_to_one() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        list.set_rotation(RotationPolicy::MasterSlave);
        list.add_upstream("127.0.0.1:80", 80, ParseMode::Default);
        let members = list.iter();
        assert_eq!(members[0].weight(), 1);
    }

    #[test]
    fn get_returns_none_only_past_sequential_exhaustion() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        list.add_upstream("127.0.0.1:80", 80, ParseMode::Default);
        list.add_upstream("127.0.0.2:80", 80, ParseMode::Default);
        assert!(list.get_forced(RotationPolicy::Sequential, None).is_some());
        assert!(list.get_forced(RotationPolicy::Sequential, None).is_some());
        assert!(list.get_forced(RotationPolicy::Sequential, None).is_none());
        assert!(list.get_forced(RotationPolicy::Sequential, None).is_some());
    }

    #[test]
    fn empty_alive_reactivates_on_get() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        list.add_upstream("127.0.0.1:80", 80, ParseMode::Default);
        list.add_upstream("127.0.0.2:80", 80, ParseMode::Default);
        for up in list.iter() {
            list.0.set_inactive(&up);
        }
        assert_eq!(list.alive_count(), 0);
        assert!(list.get(Some(RotationPolicy::Random), None).is_some());
        assert_eq!(list.alive_count(), 2);
    }

    #[test]
    fn destroy_detaches_every_member() {
        let ctx = Context::new();
        let list = UpstreamList::new(&ctx);
        list.add_upstream("127.0.0.1:80", 80, ParseMode::Default);
        let up = list.iter().into_iter().next().unwrap();
        list.destroy();
        assert_eq!(list.count(), 0);
        assert!(up.owning_list().is_none());
    }
}
