//! # upstream-pool
//!
//! A reusable upstream endpoint pool manager: tracks a collection of named
//! network endpoints (DNS names or literal IP/UNIX addresses), measures
//! their liveness from caller-reported `ok`/`fail` events, rotates
//! selection across the live subset using one of several policies
//! (random, smooth weighted round-robin, master-slave, consistent-hashed,
//! sequential), and keeps each endpoint's resolved address set fresh
//! through lazy periodic DNS re-resolution.
//!
//! This crate does not open sockets, probe endpoints, or measure latency —
//! liveness is driven entirely by the caller reporting `ok`/`fail` after
//! its own use of an address. See [`UpstreamList::get`] /
//! [`UpstreamList::get_forced`] for selection and [`Upstream::ok`] /
//! [`Upstream::fail`] for liveness reporting.
//!
//! ## Quick start
//!
//! ```no_run
//! use upstream_pool::{Context, ParseMode, UpstreamList};
//!
//! let ctx = Context::new();
//! let list = UpstreamList::new(&ctx);
//! list.parse_line("round-robin:10.0.0.1:80;10.0.0.2:80", 80);
//!
//! if let Some(up) = list.get(None, None) {
//!     let addr = up.addr_cur();
//!     // ... use `addr` ...
//!     up.ok();
//!     let _ = addr;
//! }
//! ```

pub mod address;
pub mod config;
pub mod context;
pub mod dns;
pub mod error;
pub mod hashing;
pub mod limits;
pub mod list;
pub mod selector;
pub mod upstream;
pub mod watch;

pub use address::{Endpoint, ParseMode, ParsedHost, ParsedSpec, ResolvedAddr};
pub use config::from_json;
pub use context::{BindConfig, Context};
pub use dns::{DnsResolve, DnsOutcome, HickoryDnsResolve};
pub use error::PoolError;
pub use limits::Limits;
pub use list::UpstreamList;
pub use selector::RotationPolicy;
pub use upstream::{Flags, Upstream};
pub use watch::{Event, EventMask, Watcher, WatcherCallback};
