// src/constants.rs

/// Environment variable pointing to the site root directory.
pub const SITE_ROOT_ENV: &str = "TTP_SITE";

/// Environment variable listing the installation trees, joined with the OS path separator.
pub const ROOTS_ENV: &str = "TTP_ROOTS";

/// Environment variable overriding the detected hostname.
pub const NODE_ENV: &str = "TTP_NODE";

/// The name of the site-wide configuration document (inside the site root).
pub const SITE_CONFIG_FILENAME: &str = "toops.json";

/// Extension of host configuration documents (`<host>.json`).
pub const HOST_CONFIG_EXTENSION: &str = "json";

/// Where host documents live inside an installation tree.
pub const NODES_SUBDIR: &[&str] = &["etc", "nodes"];

/// Where the site root defaults to inside the first installation tree.
pub const SITE_SUBDIR: &[&str] = &["etc", "ttp"];

/// Where external verbs live inside an installation tree (`libexec/<command>/`).
pub const VERBS_SUBDIR: &str = "libexec";

/// Literal suffix of external verb files.
pub const VERB_SUFFIX: &str = "do";

/// Names a command may never take, whatever the binary is called.
pub const RESERVED_WORDS: &[&str] = &["help", "verb", "verbs", "command", "version"];

/// Name of the daily log file under `<logsRoot>/<YYMMDD>/`.
pub const MAIN_LOG_FILENAME: &str = "main.log";

/// Host configuration key declaring the DBMS instances.
pub const DBMS_INSTANCES_KEY: &str = "DBMSInstances";

/// Host configuration key declaring the services.
pub const SERVICES_KEY: &str = "Services";

/// Maximum nesting of `var()` references inside `[eval:...]` expressions.
pub const MAX_RECURSION_DEPTH: u32 = 32;

/// Size of the single read performed on an accepted daemon connection.
pub const DAEMON_BUFFER_SIZE: usize = 4096;

/// Default pause between two daemon polls, in milliseconds.
pub const DAEMON_DEFAULT_INTERVAL_MS: u64 = 1000;

/// Commands every daemon answers itself.
pub const DAEMON_BUILTIN_COMMANDS: &[&str] = &["help", "status", "terminate"];

/// Trailing token of successful built-in daemon answers.
pub const DAEMON_OK: &str = "OK";
