// src/core/daemon/protocol.rs

//! The daemon line protocol: one whitespace-tokenized request line per
//! connection, one answer line back. Successful answers of the built-in
//! commands end with a literal `OK` token.

use crate::constants::DAEMON_OK;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub args: Vec<String>,
}

/// Splits a received payload; `None` when it holds no token at all.
pub fn parse_request(payload: &[u8]) -> Option<Request> {
    let text = String::from_utf8_lossy(payload);
    let mut tokens = text.split_whitespace().map(str::to_string);
    let command = tokens.next()?;
    Some(Request {
        command,
        args: tokens.collect(),
    })
}

/// Appends the `OK` token to a successful answer.
pub fn ok(answer: &str) -> String {
    if answer.is_empty() {
        DAEMON_OK.to_string()
    } else {
        format!("{} {}", answer, DAEMON_OK)
    }
}

/// Whether an answer ends with the `OK` token.
pub fn is_ok(answer: &str) -> bool {
    answer.split_whitespace().last() == Some(DAEMON_OK)
}

pub fn unknown_command(command: &str) -> String {
    format!("unknowned command '{}'", command)
}
