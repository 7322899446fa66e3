//! Tunables for the out-of-memory retry protocol.

use core::num::NonZeroU32;

/// How many times the OOM handler may be invoked for a single request
/// before the request fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OomRetry {
    /// Give up after the given number of handler invocations.
    Bounded(NonZeroU32),
    /// Keep invoking the handler until the system allocator succeeds.
    ///
    /// A handler that never frees anything makes the request spin forever.
    Unbounded,
}

impl OomRetry {
    /// Handler invocations allowed per request by default.
    pub const DEFAULT_LIMIT: NonZeroU32 = match NonZeroU32::new(8) {
        Some(limit) => limit,
        None => panic!("retry limit must be non-zero"),
    };

    /// Returns whether another handler invocation is allowed after
    /// `performed` invocations.
    #[must_use]
    pub const fn permits(self, performed: u32) -> bool {
        match self {
            Self::Bounded(limit) => performed < limit.get(),
            Self::Unbounded => true,
        }
    }
}

impl Default for OomRetry {
    fn default() -> Self {
        Self::Bounded(Self::DEFAULT_LIMIT)
    }
}

/// Allocator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Retry policy applied whenever the system allocator fails.
    pub oom_retry: OomRetry,
}

impl Config {
    /// The default configuration, usable in `const` contexts.
    pub const DEFAULT: Self = Self {
        oom_retry: OomRetry::Bounded(OomRetry::DEFAULT_LIMIT),
    };
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
