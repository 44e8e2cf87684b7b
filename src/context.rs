//! Process/subsystem-scoped registry of upstreams, the event-loop handle
//! and the DNS resolver handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use crate::dns::DnsResolve;
use crate::limits::Limits;
use crate::upstream::{Flags, Upstream};

/// Selected overrides taken from an embedder's configuration at bind time.
///
/// Kept as distinct, independently-optional fields rather than collapsing
/// `revive_time` and `max_errors` into one slot — see DESIGN.md for the
/// discrepancy this avoids reproducing; `bind` applies each field to its
/// rightful [`Limits`] slot.
#[derive(Debug, Clone, Default)]
pub struct BindConfig {
    pub max_errors: Option<u32>,
    pub error_time: Option<Duration>,
    pub revive_time: Option<Duration>,
    pub revive_jitter: Option<f64>,
    pub dns_timeout: Option<Duration>,
    pub dns_retransmits: Option<u32>,
    pub lazy_resolve_time: Option<Duration>,
}

/// Injectable source of the probabilistic draws used for jitter and the
/// DNS-merge amnesty coin flip. Production code uses [`ThreadRandom`];
/// tests substitute a fixed source (see `dns.rs`'s merge tests) so the
/// probabilistic branches can be pinned instead of depending on whichever
/// way the thread RNG happens to land.
pub(crate) trait RandomSource: Send + Sync {
    /// A draw uniformly distributed in `[-frac, frac]`, used by [`jitter`].
    fn jitter_frac(&self, frac: f64) -> f64;
    /// `true` with probability `p`, used by the DNS-merge amnesty reset.
    fn amnesty(&self, p: f64) -> bool;
}

/// The real randomness source: draws from `rand::thread_rng()` on every call.
pub(crate) struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn jitter_frac(&self, frac: f64) -> f64 {
        rand::thread_rng().gen_range(-frac..=frac)
    }

    fn amnesty(&self, p: f64) -> bool {
        rand::thread_rng().gen_bool(p)
    }
}

pub(crate) struct ContextInner {
    pub(crate) configured: AtomicBool,
    pub(crate) resolver: Mutex<Option<Arc<dyn DnsResolve>>>,
    pub(crate) runtime: Mutex<Option<tokio::runtime::Handle>>,
    pub(crate) default_limits: Mutex<Limits>,
    pub(crate) registry: Mutex<Vec<Weak<Upstream>>>,
    pub(crate) rng: Arc<dyn RandomSource>,
}

impl ContextInner {
    pub(crate) fn is_configured(&self) -> bool {
        self.configured.load(Ordering::Acquire)
    }

    pub(crate) fn runtime_handle(&self) -> Option<tokio::runtime::Handle> {
        self.runtime.lock().clone()
    }

    pub(crate) fn resolver(&self) -> Option<Arc<dyn DnsResolve>> {
        self.resolver.lock().clone()
    }

    pub(crate) fn default_limits(&self) -> Limits {
        *self.default_limits.lock()
    }

    pub(crate) fn register(&self, up: &Arc<Upstream>) {
        self.registry.lock().push(Arc::downgrade(up));
    }

    /// A clone of the randomness source's `Arc`, cheap to hand to a spawned
    /// task that needs to outlive this call (e.g. the DNS-merge amnesty
    /// flip, fired from a `'static` async block).
    pub(crate) fn rng(&self) -> Arc<dyn RandomSource> {
        self.rng.clone()
    }
}

/// Process- or subsystem-scoped registry of all upstreams.
///
/// Holds the event-loop (Tokio runtime) handle, the DNS resolver handle,
/// default limits, and a `configured` gate that prevents timer scheduling
/// before `bind` has supplied a runtime and resolver.
#[derive(Clone)]
pub struct Context(pub(crate) Arc<ContextInner>);

impl Context {
    /// Creates a context with defaults populated and no event loop bound;
    /// upstreams can already be registered against it, but no timers will
    /// be armed until [`Context::bind`] is called.
    pub fn new() -> Self {
        Self::with_rng(Arc::new(ThreadRandom))
    }

    /// Like [`Context::new`] but with an injectable [`RandomSource`], so
    /// tests can pin the jitter draws and the DNS-merge amnesty coin flip
    /// instead of depending on the thread RNG.
    pub(crate) fn with_rng(rng: Arc<dyn RandomSource>) -> Self {
        Self(Arc::new(ContextInner {
            configured: AtomicBool::new(false),
            resolver: Mutex::new(None),
            runtime: Mutex::new(None),
            default_limits: Mutex::new(Limits::DEFAULT),
            registry: Mutex::new(Vec::new()),
            rng,
        }))
    }

    /// Binds the event loop and DNS resolver, applies configuration
    /// overrides, and arms a lazy-resolve timer (jittered ±10%) for every
    /// already-registered upstream that doesn't have one armed and isn't
    /// flagged `NORESOLVE`.
    pub fn bind(&self, cfg: &BindConfig, handle: tokio::runtime::Handle, resolver: Arc<dyn DnsResolve>) {
        {
            let mut limits = self.0.default_limits.lock();
            if let Some(v) = cfg.max_errors {
                limits.max_errors = v;
            }
            if let Some(v) = cfg.error_time {
                limits.error_time = v;
            }
            if let Some(v) = cfg.revive_time {
                limits.revive_time = v;
            }
            if let Some(v) = cfg.revive_jitter {
                limits.revive_jitter = v;
            }
            if let Some(v) = cfg.dns_timeout {
                limits.dns_timeout = v;
            }
            if let Some(v) = cfg.dns_retransmits {
                limits.dns_retransmits = v;
            }
            if let Some(v) = cfg.lazy_resolve_time {
                limits.lazy_resolve_time = v;
            }
        }
        *self.0.runtime.lock() = Some(handle);
        *self.0.resolver.lock() = Some(resolver);
        self.0.configured.store(true, Ordering::Release);

        let lazy_resolve_time = self.0.default_limits().lazy_resolve_time;
        let members: Vec<Arc<Upstream>> = self
            .0
            .registry
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for up in members {
            let has_timer = up.state.lock().timer.is_some();
            let noresolve = up.flags().contains(Flags::NORESOLVE);
            if !has_timer && !noresolve {
                if let Some(list) = up.owning_list() {
                    let delay = jitter(&*self.0.rng(), lazy_resolve_time, 0.1);
                    crate::dns::arm_lazy_resolve(self.0.clone(), list, up, delay);
                }
            }
        }
    }

    /// Forces a DNS resolution pass across every registered upstream,
    /// regardless of armed timers — used when the host's resolver
    /// configuration changes.
    pub fn reresolve(&self) {
        let members: Vec<Arc<Upstream>> = self
            .0
            .registry
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for up in members {
            crate::dns::force_resolve(self.0.clone(), up);
        }
    }

    /// Drops the registry. Upstreams already handed out keep working;
    /// whole-fleet `reresolve` is no longer possible for them.
    pub fn destroy(&self) {
        self.0.registry.lock().clear();
        *self.0.resolver.lock() = None;
        *self.0.runtime.lock() = None;
        self.0.configured.store(false, Ordering::Release);
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_configured()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// `jitter(base, frac) = base * (1 + U(-frac, +frac))`, floored at zero.
pub(crate) fn jitter(rng: &dyn RandomSource, base: Duration, frac: f64) -> Duration {
    let delta = rng.jitter_frac(frac);
    let secs = (base.as_secs_f64() * (1.0 + delta)).max(0.0);
    Duration::from_secs_f64(secs)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(60);
        for _ in 0..1000 {
            let d = jitter(&ThreadRandom, base, 0.4);
            assert!(d.as_secs_f64() >= 60.0 * 0.6 - 1e-6);
            assert!(d.as_secs_f64() <= 60.0 * 1.4 + 1e-6);
        }
    }

    #[test]
    fn jitter_applies_a_pinned_fraction() {
        use test_support::FixedRandom;
        let base = Duration::from_secs(60);
        let rng = FixedRandom { frac: 0.25, amnesty: false };
        let d = jitter(&rng, base, 0.4);
        assert!((d.as_secs_f64() - 75.0).abs() < 1e-9);
    }

    #[test]
    fn unbound_context_is_not_configured() {
        let ctx = Context::new();
        assert!(!ctx.is_configured());
    }
}
