//! Error types surfaced across the pool's public boundary.

/// Errors the pool's API can return.
///
/// Parse failures are normally collapsed to a `bool` at the
/// [`crate::list::UpstreamList::add_upstream`] / `parse_line` boundary; the
/// `_detailed` variants of those methods expose this enum for callers that
/// want the reason.
///
/// A watcher registered with an empty event mask is not represented here:
/// it is a programming error, not a recoverable condition, so
/// [`crate::list::UpstreamList::watch`] asserts instead of returning a
/// `Result`.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// `spec` could not be parsed into at least one address.
    #[error("failed to parse upstream spec {spec:?}: {reason}")]
    ParseError { spec: String, reason: String },

    /// The spec string was empty after trimming separators.
    #[error("empty upstream spec")]
    EmptySpec,
}
