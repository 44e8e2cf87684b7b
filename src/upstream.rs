//! A single named endpoint: health state, resolved addresses and identity.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::Instant;

use base32::Alphabet;
use parking_lot::Mutex;

use crate::address::{sort_by_family, Endpoint, ResolvedAddr};
use crate::hashing::hash_key;
use crate::list::ListInner;
use crate::watch::Event;

bitflags::bitflags! {
    /// Per-upstream behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// Set automatically when the spec parsed as a literal address;
        /// skips DNS lazy-resolve and DNS-based revive pre-warm.
        const NORESOLVE = 1 << 0;
    }
}

/// Mutable state behind a single `parking_lot::Mutex`, matching the
/// coarse, short-held-critical-section locking model the design assumes.
pub(crate) struct UpstreamState {
    pub weight: u32,
    pub cur_weight: i64,
    pub errors: u32,
    pub checked: u64,
    pub dns_requests: u32,
    pub last_fail: Option<Instant>,
    pub addrs: Vec<ResolvedAddr>,
    pub new_addrs: Vec<ResolvedAddr>,
    pub cursor: usize,
    pub active_idx: Option<usize>,
    pub flags: Flags,
    pub data: Option<Box<dyn Any + Send + Sync>>,
    pub timer: Option<tokio::task::JoinHandle<()>>,
}

/// A named target endpoint plus its resolved address set and health state.
pub struct Upstream {
    pub(crate) name: String,
    pub(crate) uid: String,
    pub(crate) state: Mutex<UpstreamState>,
    pub(crate) list: Mutex<Option<Weak<ListInner>>>,
}

/// Sentinel above which `checked` counters are reset across a list, to
/// prevent unbounded growth under the checked-balancer fallback.
pub const CHECKED_OVERFLOW_GUARD: u64 = u64::MAX / 2;

impl Upstream {
    pub(crate) fn new(name: String, addrs: Vec<ResolvedAddr>, weight: u32, flags: Flags) -> Arc<Self> {
        let mut addrs = addrs;
        sort_by_family(&mut addrs);
        let uid = compute_uid(&name);
        Arc::new(Self {
            uid,
            state: Mutex::new(UpstreamState {
                weight,
                cur_weight: 0,
                errors: 0,
                checked: 0,
                dns_requests: 0,
                last_fail: None,
                addrs,
                new_addrs: Vec::new(),
                cursor: 0,
                active_idx: None,
                flags,
                data: None,
                timer: None,
            }),
            list: Mutex::new(None),
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn weight(&self) -> u32 {
        self.state.lock().weight
    }

    pub fn set_weight(&self, weight: u32) {
        let mut st = self.state.lock();
        st.weight = weight;
        st.cur_weight = 0;
    }

    pub fn errors(&self) -> u32 {
        self.state.lock().errors
    }

    pub fn checked(&self) -> u64 {
        self.state.lock().checked
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active_idx.is_some()
    }

    pub fn flags(&self) -> Flags {
        self.state.lock().flags
    }

    pub fn set_data<T: Any + Send + Sync>(&self, value: T) {
        self.state.lock().data = Some(Box::new(value));
    }

    pub fn data<T: Any + Send + Sync + Clone>(&self) -> Option<T> {
        self.state
            .lock()
            .data
            .as_ref()
            .and_then(|d| d.downcast_ref::<T>())
            .cloned()
    }

    pub fn add_addr(&self, endpoint: Endpoint) {
        let mut st = self.state.lock();
        st.addrs.push(ResolvedAddr::new(endpoint));
        sort_by_family(&mut st.addrs);
    }

    /// The address the cursor currently points at.
    pub fn addr_cur(&self) -> Endpoint {
        let st = self.state.lock();
        st.addrs[st.cursor.min(st.addrs.len() - 1)].endpoint.clone()
    }

    /// Advances the cursor, preferring addresses with no more recorded
    /// failures than the address last returned. The scan is bounded by
    /// `addrs.len()` steps: on pathological error distributions a strict
    /// "only advance while strictly worse" rule could loop, so this stops
    /// after one full pass.
    pub fn addr_next(&self) -> Endpoint {
        let mut st = self.state.lock();
        let len = st.addrs.len();
        if len <= 1 {
            return st.addrs[0].endpoint.clone();
        }
        let start = st.cursor;
        let cur_errors = st.addrs[start].errors;
        let mut best = start;
        let mut best_errors = cur_errors;
        for step in 1..=len {
            let idx = (start + step) % len;
            if st.addrs[idx].errors <= best_errors {
                best = idx;
                best_errors = st.addrs[idx].errors;
            }
            if st.addrs[idx].errors == 0 {
                break;
            }
        }
        st.cursor = best;
        st.addrs[best].endpoint.clone()
    }

    /// Records a use failure. `addr_failure` also bumps the current
    /// address's own error counter. Pulls the owning list's effective
    /// [`crate::limits::Limits`] (falling back to [`crate::limits::Limits::DEFAULT`]
    /// for a detached upstream) and the current monotonic time; see
    /// [`Upstream::fail_at`] for the form tests use to pin both.
    pub fn fail(self: &Arc<Self>, addr_failure: bool) {
        let limits = self
            .owning_list()
            .map(|l| l.effective_limits())
            .unwrap_or(crate::limits::Limits::DEFAULT);
        self.fail_at(addr_failure, &limits, Instant::now());
    }

    /// The deterministic core of [`Upstream::fail`], taking an explicit
    /// `limits`/`now` so tests can drive the circuit-breaker math without
    /// real clock delays. May deactivate the upstream (moving it to the
    /// owning list's inactive set) if the failure rate exceeds the list's
    /// configured limits and the list has more than one member.
    pub fn fail_at(self: &Arc<Self>, addr_failure: bool, limits: &crate::limits::Limits, now: Instant) {
        let mut emit_failure: Option<u32> = None;
        let mut should_deactivate = false;
        let mut should_reresolve_single_member = false;

        {
            let mut st = self.state.lock();
            if st.errors == 0 {
                st.errors = 1;
                st.last_fail = Some(now);
                emit_failure = Some(1);
            } else if let Some(t0) = st.last_fail {
                if now >= t0 {
                    st.errors += 1;
                    emit_failure = Some(st.errors);
                    if now > t0 {
                        let rate = st.errors as f64 / (now - t0).as_secs_f64();
                        if rate > limits.max_rate() {
                            should_deactivate = true;
                            if (now - t0) > limits.revive_time {
                                should_reresolve_single_member = true;
                            }
                        }
                    }
                }
            }
            if addr_failure {
                let idx = st.cursor.min(st.addrs.len() - 1);
                st.addrs[idx].errors += 1;
            }
        }

        if let Some(errors) = emit_failure {
            if let Some(list) = self.owning_list() {
                list.notify(Event::Failure {
                    upstream: self.name.clone(),
                    errors,
                });
            }
        }

        if should_deactivate {
            if let Some(list) = self.owning_list() {
                if list.member_count() > 1 {
                    self.state.lock().errors = 0;
                    list.set_inactive(self);
                } else if should_reresolve_single_member {
                    self.state.lock().errors = 0;
                    list.trigger_reresolve(self);
                }
            }
        }
    }

    /// Resets the error streak and current address's error counter if the
    /// upstream is alive and had accumulated failures.
    pub fn ok(self: &Arc<Self>) {
        let reset = {
            let mut st = self.state.lock();
            if st.errors > 0 && st.active_idx.is_some() {
                st.errors = 0;
                if !st.addrs.is_empty() {
                    let idx = st.cursor.min(st.addrs.len() - 1);
                    st.addrs[idx].errors = 0;
                }
                true
            } else {
                false
            }
        };
        if reset {
            if let Some(list) = self.owning_list() {
                list.notify(Event::Success {
                    upstream: self.name.clone(),
                });
            }
        }
    }

    pub(crate) fn owning_list(&self) -> Option<Arc<ListInner>> {
        self.list.lock().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_owning_list(&self, list: Weak<ListInner>) {
        *self.list.lock() = Some(list);
    }

    pub(crate) fn detach_from_list(&self) {
        *self.list.lock() = None;
    }

    /// A fast hash of this upstream's current cursor address, used by the
    /// hashed-selection key derivation where no explicit key is given.
    pub(crate) fn identity_hash(&self, seed: u64) -> u64 {
        hash_key(self.uid.as_bytes(), seed)
    }
}

fn compute_uid(name: &str) -> String {
    let h = hash_key(name.to_ascii_lowercase().as_bytes(), 0);
    base32::encode(Alphabet::Rfc4648 { padding: false }, &h.to_be_bytes()[..5])
        .to_ascii_lowercase()
}
