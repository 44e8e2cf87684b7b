//! Asynchronous A/AAAA resolution for lazy-resolve, revive pre-warm and
//! whole-fleet reresolve. Fire-and-forget: callers never await a lookup,
//! its completion is delivered later by the event loop via [`on_dns_reply`].

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;

use crate::address::{apply_port, sort_by_family, Endpoint, ResolvedAddr};
use crate::context::{ContextInner, RandomSource};
use crate::limits::Limits;
use crate::list::ListInner;
use crate::upstream::Upstream;

/// Outcome of a single A or AAAA lookup: the resolved addresses, or the
/// reason it failed. Failures never cross the crate boundary; they are
/// logged and swallowed by [`on_dns_reply`].
pub type DnsOutcome = Result<Vec<IpAddr>, String>;

/// Abstracts DNS A/AAAA lookups so tests can substitute a fake resolver
/// for `hickory-resolver`'s real one.
pub trait DnsResolve: Send + Sync {
    fn resolve_a<'a>(
        &'a self,
        host: &'a str,
        timeout: Duration,
        retransmits: u32,
    ) -> Pin<Box<dyn Future<Output = DnsOutcome> + Send + 'a>>;

    fn resolve_aaaa<'a>(
        &'a self,
        host: &'a str,
        timeout: Duration,
        retransmits: u32,
    ) -> Pin<Box<dyn Future<Output = DnsOutcome> + Send + 'a>>;
}

/// Production resolver wrapping `hickory-resolver`'s Tokio-backed async
/// resolver. Keeps one resolver instance around rather than rebuilding it
/// per call.
pub struct HickoryDnsResolve {
    resolver: TokioAsyncResolver,
}

impl HickoryDnsResolve {
    /// Builds a resolver from the host's system configuration
    /// (`/etc/resolv.conf` on Unix), via the `system-config` feature.
    pub fn system() -> Result<Self, hickory_resolver::error::ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()?;
        Ok(Self { resolver })
    }

    pub fn with_config(config: ResolverConfig, opts: ResolverOpts) -> Self {
        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

impl DnsResolve for HickoryDnsResolve {
    fn resolve_a<'a>(
        &'a self,
        host: &'a str,
        timeout: Duration,
        retransmits: u32,
    ) -> Pin<Box<dyn Future<Output = DnsOutcome> + Send + 'a>> {
        // `retransmits` is folded into the resolver's own `ResolverOpts`
        // at construction time (hickory paces its own UDP retries per
        // nameserver); here it only selects how many times we re-issue
        // the whole lookup after a bare timeout.
        Box::pin(async move {
            let mut last_err = String::from("no attempts made");
            for _ in 0..=retransmits {
                match tokio::time::timeout(timeout, self.resolver.ipv4_lookup(host)).await {
                    Ok(Ok(lookup)) => {
                        return Ok(lookup.iter().map(|ip| IpAddr::V4(ip.0)).collect());
                    }
                    Ok(Err(e)) => last_err = e.to_string(),
                    Err(_) => last_err = "timed out".to_string(),
                }
            }
            Err(last_err)
        })
    }

    fn resolve_aaaa<'a>(
        &'a self,
        host: &'a str,
        timeout: Duration,
        retransmits: u32,
    ) -> Pin<Box<dyn Future<Output = DnsOutcome> + Send + 'a>> {
        Box::pin(async move {
            let mut last_err = String::from("no attempts made");
            for _ in 0..=retransmits {
                match tokio::time::timeout(timeout, self.resolver.ipv6_lookup(host)).await {
                    Ok(Ok(lookup)) => {
                        return Ok(lookup.iter().map(|ip| IpAddr::V6(ip.0)).collect());
                    }
                    Ok(Err(e)) => last_err = e.to_string(),
                    Err(_) => last_err = "timed out".to_string(),
                }
            }
            Err(last_err)
        })
    }
}

/// Arms (or re-arms) the lazy-resolve timer: sleeps `delay`, launches A/AAAA
/// requests, then immediately re-arms itself with a fresh jitter draw. Does
/// not wait for the DNS replies — those land later via [`on_dns_reply`].
pub(crate) fn arm_lazy_resolve(
    ctx: Arc<ContextInner>,
    list: Arc<ListInner>,
    up: Arc<Upstream>,
    delay: Duration,
) {
    let handle = match ctx.runtime_handle() {
        Some(h) => h,
        None => return,
    };
    let task = handle.spawn(async move {
        tokio::time::sleep(delay).await;
        let limits = list.effective_limits();
        launch_dns_requests(ctx.clone(), up.clone(), limits);
        let next = crate::context::jitter(&*ctx.rng(), limits.lazy_resolve_time, 0.1);
        arm_lazy_resolve(ctx, list, up, next);
    });
    up.state.lock().timer = Some(task);
}

/// Forces one resolution pass for `up`, independent of any armed timer.
/// Used by whole-fleet `Context::reresolve`, by `set_inactive`'s pre-warm,
/// and by the single-member-pool breaker's forced re-resolution.
pub(crate) fn force_resolve(ctx: Arc<ContextInner>, up: Arc<Upstream>) {
    let limits = up
        .owning_list()
        .map(|l| l.effective_limits())
        .unwrap_or(Limits::DEFAULT);
    launch_dns_requests(ctx, up, limits);
}

/// Schedules an A and an AAAA lookup, each retaining `up` and incrementing
/// `dns_requests`. Returns immediately; never awaits a reply.
fn launch_dns_requests(ctx: Arc<ContextInner>, up: Arc<Upstream>, limits: Limits) {
    let resolver = match ctx.resolver() {
        Some(r) => r,
        None => return,
    };
    let handle = match ctx.runtime_handle() {
        Some(h) => h,
        None => return,
    };

    up.state.lock().dns_requests += 2;
    let name = up.name().to_string();
    let rng = ctx.rng();

    // A and AAAA run concurrently via `futures::join!` inside a single
    // spawned task rather than two separate `tokio::spawn`s; `dns_requests`
    // still drops by one per family as each resolves, so the merge logic in
    // `on_dns_reply` is unaffected by folding the two tasks into one.
    handle.spawn(async move {
        let (a_outcome, aaaa_outcome) = futures::join!(
            resolver.resolve_a(&name, limits.dns_timeout, limits.dns_retransmits),
            resolver.resolve_aaaa(&name, limits.dns_timeout, limits.dns_retransmits)
        );
        on_dns_reply(rng.as_ref(), &up, a_outcome, false);
        on_dns_reply(rng.as_ref(), &up, aaaa_outcome, true);
    });
}

/// DNS reply callback. On success, appends addresses to `new_addrs`;
/// always decrements `dns_requests`; merges once it hits zero.
fn on_dns_reply(rng: &dyn RandomSource, up: &Arc<Upstream>, outcome: DnsOutcome, is_aaaa: bool) {
    let mut should_merge = false;
    {
        let mut st = up.state.lock();
        match outcome {
            Ok(ips) => {
                for ip in ips {
                    st.new_addrs.push(ResolvedAddr::new(Endpoint::Inet(std::net::SocketAddr::new(ip, 0))));
                }
            }
            Err(reason) => {
                tracing::warn!(
                    upstream = up.name(),
                    family = if is_aaaa { "AAAA" } else { "A" },
                    %reason,
                    "DNS lookup failed; keeping previous address set"
                );
            }
        }
        st.dns_requests = st.dns_requests.saturating_sub(1);
        should_merge = st.dns_requests == 0;
    }
    if should_merge {
        merge_new_addrs(rng, up);
    }
}

/// Merges `new_addrs` into `addrs`: carries over the existing port, applies
/// the 10% amnesty coin flip, preserves per-address error counts across the
/// merge, and re-sorts by family preference. Leaves `addrs` untouched if no
/// new address arrived (both requests failed, or resolved to zero records —
/// stale addresses beat no addresses).
fn merge_new_addrs(rng: &dyn RandomSource, up: &Arc<Upstream>) {
    let mut st = up.state.lock();
    if st.new_addrs.is_empty() {
        return;
    }

    let port = st
        .addrs
        .first()
        .and_then(|a| a.endpoint.port())
        .unwrap_or(0);
    apply_port(&mut st.new_addrs, port);

    let amnesty = rng.amnesty(0.10);
    let mut merged = Vec::with_capacity(st.new_addrs.len());
    for incoming in st.new_addrs.drain(..) {
        let errors = st
            .addrs
            .iter()
            .find(|existing| existing.endpoint == incoming.endpoint)
            .map(|existing| if amnesty { 0 } else { existing.errors })
            .unwrap_or(0);
        merged.push(ResolvedAddr {
            endpoint: incoming.endpoint,
            errors,
        });
    }

    st.addrs = merged;
    st.cursor = 0;
    sort_by_family(&mut st.addrs);
}
