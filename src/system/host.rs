// src/system/host.rs

use std::env;
use std::fs;

use crate::constants::NODE_ENV;

/// Returns the name of the execution host.
///
/// `TTP_NODE` wins so that one machine can impersonate a node (tests, DR
/// rehearsals); then the usual environment variables; then `/etc/hostname`.
pub fn hostname() -> String {
    [NODE_ENV, "HOSTNAME", "COMPUTERNAME"]
        .iter()
        .filter_map(|var| env::var(var).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .or_else(|| {
            fs::read_to_string("/etc/hostname")
                .ok()
                .map(|content| content.trim().to_string())
                .filter(|value| !value.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
