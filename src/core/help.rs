// src/core/help.rs

//! Help text embedded in verbs as tagged comment lines:
//!
//! ```text
//! # @(#) one-liner shown before the usage block
//! # @(-) --flag=<value>   description [${defaultKey}]
//! # @(@) free-form note shown after the usage block
//! ```
//!
//! Built-in verbs carry the same block as a static string, so both kinds
//! render identically.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use lazy_static::lazy_static;
use regex::{Captures, Regex};

const PRE_TAG: &str = "# @(#)";
const USAGE_TAG: &str = "# @(-)";
const POST_TAG: &str = "# @(@)";

lazy_static! {
    static ref PLACEHOLDER_RE: Regex =
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex is valid");
}

#[derive(Error, Debug)]
pub enum HelpError {
    #[error("Failed to read help of '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HelpText {
    pub pre: Vec<String>,
    pub usage: Vec<String>,
    pub post: Vec<String>,
}

impl HelpText {
    /// Collects the tagged lines of a source text; untagged lines are ignored.
    pub fn parse(source: &str) -> Self {
        let mut help = Self::default();
        for line in source.lines() {
            let line = line.trim_start();
            if let Some(rest) = line.strip_prefix(PRE_TAG) {
                help.pre.push(tag_body(rest));
            } else if let Some(rest) = line.strip_prefix(USAGE_TAG) {
                help.usage.push(tag_body(rest));
            } else if let Some(rest) = line.strip_prefix(POST_TAG) {
                help.post.push(tag_body(rest));
            }
        }
        help
    }

    pub fn from_file(path: &Path) -> Result<Self, HelpError> {
        // Verbs may be binaries: only the text they contain matters.
        let bytes = fs::read(path).map_err(|e| HelpError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::parse(&String::from_utf8_lossy(&bytes)))
    }

    pub fn one_liner(&self) -> &str {
        self.pre.first().map(String::as_str).unwrap_or("")
    }
}

fn tag_body(rest: &str) -> String {
    rest.strip_prefix(' ').unwrap_or(rest).trim_end().to_string()
}

/// Replaces `${name}` with its default; unknown names are left as written.
pub fn substitute(line: &str, defaults: &BTreeMap<String, String>) -> String {
    PLACEHOLDER_RE
        .replace_all(line, |caps: &Captures| {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            caps.get(1)
                .and_then(|name| defaults.get(name.as_str()))
                .cloned()
                .unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

/// The `--help` output of one verb.
pub fn render_verb_help(
    command: &str,
    command_one_liner: &str,
    verb: &str,
    help: &HelpText,
    defaults: &BTreeMap<String, String>,
) -> String {
    let mut out = Vec::new();
    if !command_one_liner.is_empty() {
        out.push(format!("{}: {}", command, command_one_liner));
    }
    for line in &help.pre {
        out.push(format!("  {}", line));
    }
    out.push(format!(
        t!("help.usage.verb"),
        command = command,
        verb = verb
    ));
    if !help.usage.is_empty() {
        out.push(t!("help.usage.options").to_string());
        for line in &help.usage {
            out.push(format!("    {}", substitute(line, defaults)));
        }
    }
    out.extend(help.post.iter().cloned());
    out.join("\n")
}

/// The help of a command: its one-liner, then one line per verb.
///
/// Verbs are listed in case-insensitive order whatever order they come in.
pub fn render_command_help(command: &str, one_liner: &str, verbs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = verbs.iter().collect();
    sorted.sort_by_key(|(name, _)| name.to_lowercase());

    let width = sorted.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    let mut out = Vec::new();
    if !one_liner.is_empty() {
        out.push(format!("{}: {}", command, one_liner));
    }
    out.push(format!(t!("help.usage.command"), command = command));
    out.push(t!("help.usage.verbs").to_string());
    for (name, summary) in sorted {
        out.push(format!("    {:<width$}  {}", name, summary, width = width));
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    const BACKUP_HELP: &str = "\
#!/bin/sh
# @(#) backup the databases of an instance
#
# @(-) --instance=<name>    the instance [${instance}]
# @(-) --[no]compress       compress the backup [${compress}]
#
# @(@) The backup is full unless --diff is given.
echo not a tag # @(#) because it does not start the line
";

    #[test]
    fn test_parse_tags() {
        let help = HelpText::parse(BACKUP_HELP);
        assert_eq!(help.pre, vec!["backup the databases of an instance"]);
        assert_eq!(help.usage.len(), 2);
        assert_eq!(help.usage[1], "--[no]compress       compress the backup [${compress}]");
        assert_eq!(help.post, vec!["The backup is full unless --diff is given."]);
    }

    #[test]
    fn test_missing_sections_are_tolerated() {
        let help = HelpText::parse("# @(-) --only=<usage>");
        assert!(help.pre.is_empty());
        assert!(help.post.is_empty());
        assert_eq!(help.one_liner(), "");

        let rendered = render_verb_help("dbms", "", "x", &HelpText::default(), &BTreeMap::new());
        assert!(rendered.contains("dbms x"));
    }

    #[test]
    fn test_substitute_placeholders() {
        let mut defaults = BTreeMap::new();
        defaults.insert("compress".to_string(), "no".to_string());
        assert_eq!(
            substitute("[${compress}] [${unknown}]", &defaults),
            "[no] [${unknown}]"
        );
    }

    #[test]
    fn test_render_verb_help_order() {
        let help = HelpText::parse(BACKUP_HELP);
        let mut defaults = BTreeMap::new();
        defaults.insert("instance".to_string(), "MSSQLSERVER".to_string());
        let rendered = render_verb_help("dbms", "manage DBMS", "backup", &help, &defaults);

        let command_pos = rendered.find("manage DBMS").unwrap();
        let verb_pos = rendered.find("backup the databases").unwrap();
        let usage_pos = rendered.find("dbms backup [options]").unwrap();
        let option_pos = rendered.find("[MSSQLSERVER]").unwrap();
        let note_pos = rendered.find("The backup is full").unwrap();
        assert!(command_pos < verb_pos);
        assert!(verb_pos < usage_pos);
        assert!(usage_pos < option_pos);
        assert!(option_pos < note_pos);
        assert!(rendered.contains("[${compress}]"));
    }

    #[test]
    fn test_command_help_sorts_case_insensitively() {
        let verbs = vec![
            ("sql".to_string(), "run SQL".to_string()),
            ("Backup".to_string(), "backup".to_string()),
            ("list".to_string(), "list".to_string()),
        ];
        let rendered = render_command_help("dbms", "", &verbs);
        let b = rendered.find("Backup").unwrap();
        let l = rendered.find("list").unwrap();
        let s = rendered.find("sql").unwrap();
        assert!(b < l && l < s);
    }
}
