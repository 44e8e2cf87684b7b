//! Watcher registration: an event bitset plus synchronous callbacks.

use std::sync::Arc;

/// Bitset of transitions a watcher can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const ONLINE: EventMask = EventMask(1 << 0);
    pub const OFFLINE: EventMask = EventMask(1 << 1);
    pub const SUCCESS: EventMask = EventMask(1 << 2);
    pub const FAILURE: EventMask = EventMask(1 << 3);
    pub const ALL: EventMask = EventMask(
        Self::ONLINE.0 | Self::OFFLINE.0 | Self::SUCCESS.0 | Self::FAILURE.0,
    );
    pub const NONE: EventMask = EventMask(0);

    pub fn contains(self, other: EventMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for EventMask {
    type Output = EventMask;
    fn bitor(self, rhs: EventMask) -> EventMask {
        EventMask(self.0 | rhs.0)
    }
}

/// A single watcher transition, delivered synchronously from the code path
/// that triggered it while the list's lock is held.
#[derive(Debug, Clone)]
pub enum Event {
    /// The upstream became selectable; `errors` is its count at the moment
    /// of transition (reset to 0 on every `Online`).
    Online { upstream: String, errors: u32 },
    /// The upstream was removed from the alive set; `errors` is its count
    /// at the moment of transition.
    Offline { upstream: String, errors: u32 },
    /// `ok()` reset a non-zero error counter.
    Success { upstream: String },
    /// `fail()` was called; `errors` is the new count after the increment.
    Failure { upstream: String, errors: u32 },
}

impl Event {
    pub fn mask(&self) -> EventMask {
        match self {
            Event::Online { .. } => EventMask::ONLINE,
            Event::Offline { .. } => EventMask::OFFLINE,
            Event::Success { .. } => EventMask::SUCCESS,
            Event::Failure { .. } => EventMask::FAILURE,
        }
    }
}

/// A registered callback, invoked for every event whose mask intersects
/// `mask`. Boxed as `Fn` rather than `FnMut` since events may be delivered
/// reentrantly (a watcher should not assume exclusive access).
pub type WatcherCallback = Arc<dyn Fn(&Event) + Send + Sync>;

/// An entry in a list's watcher registry.
#[derive(Clone)]
pub struct Watcher {
    pub mask: EventMask,
    pub callback: WatcherCallback,
}

impl Watcher {
    /// Registers a new watcher. Panics if `mask` is empty: registering a
    /// watcher that can never fire is a programming error, not a runtime
    /// condition callers are expected to recover from.
    pub fn new(mask: EventMask, callback: WatcherCallback) -> Self {
        assert!(!mask.is_empty(), "watcher registered with an empty event mask");
        Self { mask, callback }
    }

    pub fn notify(&self, event: &Event) {
        if self.mask.contains(event.mask()) {
            (self.callback)(event);
        }
    }
}
