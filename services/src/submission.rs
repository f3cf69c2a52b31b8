//! Shared outcome type for the guarded submission state transitions.

/// Result of a conditional submission update.
///
/// The stores never overwrite a resolved submission: a transition attempted
/// against one reports `AlreadyResolved` instead of erroring, which is what
/// makes duplicate callbacks safe. `VersionConflict` means another writer got
/// in between the caller's read and its update; the caller re-reads and
/// decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    AlreadyResolved,
    VersionConflict,
}
