use core::alloc::LayoutError;

use snafu::Snafu;
use snafu_utils::{Location, Report};

/// Errors returned by the allocators in this crate.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AllocError {
    #[snafu(display("out of memory: {size}-byte request failed and no OOM handler is installed"))]
    NoOomHandler {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "out of memory: {size}-byte request still failing after {attempts} OOM handler invocations"
    ))]
    RetriesExhausted {
        size: usize,
        attempts: u32,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("invalid layout for {size}-byte request"))]
    InvalidLayout {
        size: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: LayoutError,
    },
    #[snafu(display("capacity overflow: {count} elements of {elem_size} bytes"))]
    CapacityOverflow {
        count: usize,
        elem_size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("unsupported alignment: {align} bytes"))]
    UnsupportedAlignment {
        align: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

impl AllocError {
    /// Where the error was raised.
    #[must_use]
    pub fn location(&self) -> Location {
        match self {
            Self::NoOomHandler { location, .. }
            | Self::RetriesExhausted { location, .. }
            | Self::InvalidLayout { location, .. }
            | Self::CapacityOverflow { location, .. }
            | Self::UnsupportedAlignment { location, .. } => *location,
        }
    }

    /// Returns `true` for the out-of-memory variants.
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        matches!(
            self,
            Self::NoOomHandler { .. } | Self::RetriesExhausted { .. }
        )
    }
}

/// Terminates on an allocation failure.
///
/// This is the default fatal policy: the error is rendered with its cause
/// chain and the current thread panics. Built with `panic = "abort"`, the
/// process terminates.
#[track_caller]
pub fn report(err: AllocError) -> ! {
    let location = err.location();
    let report = Report::new(err).at(location);
    panic!("Critical allocation failure\n\n{report}");
}
