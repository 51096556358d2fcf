//! Crate-wide constants.

pub const APP_NAME: &str = "kiln";

/// Copy source naming the local build context instead of a stage.
pub const LOCAL_SOURCE: &str = "local";

/// Image id that always resolves to an empty root view.
pub const SCRATCH_IMAGE: &str = "scratch";

/// January 1, 1980 00:00:00 UTC. Used for archive timestamps and exported to commands.
pub const SOURCE_DATE_EPOCH: u64 = 315_532_800;

/// `PATH` handed to stage commands unless configured otherwise.
pub const DEFAULT_COMMAND_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

pub const FETCH_MAX_RETRIES: u32 = 3;
pub const FETCH_RETRY_DELAY_MS: u64 = 500;
pub const FETCH_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Directory inside a staging root that carries package metadata.
pub const CONTROL_DIR: &str = "DEBIAN";
pub const CONTROL_FILE: &str = "control";
pub const DEB_FORMAT_VERSION: &[u8] = b"2.0\n";

pub const CACHE_DIR_ENV: &str = "KILN_CACHE_DIR";
pub const WORK_DIR_ENV: &str = "KILN_WORK_DIR";
