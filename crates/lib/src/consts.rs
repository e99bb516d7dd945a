//! Shared constants.

/// Length of the truncated hash used when mangling target paths into
/// work-directory and stamp-file names.
pub const HASH_PREFIX_LEN: usize = 12;

/// On-disk cache format version. A mismatch forces a full rebuild.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// Name of the per-output-root state directory.
pub const STATE_DIR_NAME: &str = ".bake";

/// Tag implicitly applied to every target not opted out of the full build.
pub const FULL_BUILD_TAG: &str = "full";

/// Compatibility alias for [`FULL_BUILD_TAG`].
pub const ALL_TAG: &str = "all";

/// Seconds between progress messages during dependency resolution.
pub const RESOLVE_PROGRESS_SECS: u64 = 5;

/// Grace period granted to in-flight targets after a shutdown request.
pub const CANCEL_GRACE_SECS: u64 = 30;

/// File-name glob patterns excluded from every glob resolution unless
/// overridden.
pub const DEFAULT_GLOBAL_EXCLUDES: &[&str] = &["**/.nfs*", ".nfs*"];
