//! Names shared between the coordinator, its clients, and job scripts.

/// Default rule file, overridable with `-f`.
pub const RULE_FILE: &str = "Remakefile";

/// Persistent dependency store, written next to the rule file.
pub const DEPS_FILE: &str = ".remake";

/// Environment variable carrying the coordinator's socket address.
/// Its presence switches a `remake` process into client mode.
pub const ENV_SOCKET: &str = "REMAKE_SOCKET";

/// Environment variable carrying the job id of the script a client was
/// spawned from.
pub const ENV_JOB_ID: &str = "REMAKE_JOB_ID";
