// src/core/verbs.rs

//! The verbs of a command: the built-in ones and the external ones found
//! as `<tree>/libexec/<command>/<verb>.do` in the installation trees.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::constants::{NODE_ENV, VERBS_SUBDIR, VERB_SUFFIX};
use crate::core::help::{HelpError, HelpText};
use crate::state::RunContext;
use crate::system::executor;

#[derive(Debug, Clone, PartialEq)]
pub enum VerbSource {
    /// Compiled in; carries its tagged help block.
    Builtin(&'static str),
    External(PathBuf),
}

#[derive(Debug, Clone, PartialEq)]
pub struct VerbEntry {
    pub name: String,
    pub source: VerbSource,
}

impl VerbEntry {
    pub fn help(&self) -> Result<HelpText, HelpError> {
        match &self.source {
            VerbSource::Builtin(block) => Ok(HelpText::parse(block)),
            VerbSource::External(path) => HelpText::from_file(path),
        }
    }
}

/// Scans the verbs directories, first directory first.
/// A verb found in several trees is taken from the first one.
pub fn discover(dirs: &[PathBuf]) -> Vec<VerbEntry> {
    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for dir in dirs {
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(VERB_SUFFIX) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                log::debug!("Ignoring verb with a non UTF-8 name: {}", path.display());
                continue;
            };
            found
                .entry(name.to_string())
                .or_insert_with(|| path.to_path_buf());
        }
    }
    found
        .into_iter()
        .map(|(name, path)| VerbEntry {
            name,
            source: VerbSource::External(path),
        })
        .collect()
}

/// Names of the commands having a verbs directory in one of the trees.
pub fn discover_commands(roots: &[PathBuf]) -> Vec<String> {
    let mut names: Vec<String> = roots
        .iter()
        .map(|tree| tree.join(VERBS_SUBDIR))
        .flat_map(|dir| {
            WalkDir::new(dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_dir())
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
        })
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Merges built-in and external verbs; a built-in verb hides an external one
/// of the same name. The result is sorted case-insensitively.
pub fn catalog(builtins: &[(&'static str, &'static str)], external: Vec<VerbEntry>) -> Vec<VerbEntry> {
    let mut verbs: Vec<VerbEntry> = builtins
        .iter()
        .map(|&(name, help)| VerbEntry {
            name: name.to_string(),
            source: VerbSource::Builtin(help),
        })
        .collect();
    for entry in external {
        if verbs.iter().any(|v| v.name == entry.name) {
            log::debug!("External verb '{}' is shadowed by a built-in one", entry.name);
            continue;
        }
        verbs.push(entry);
    }
    verbs.sort_by_key(|v| v.name.to_lowercase());
    verbs
}

/// `(name, one-liner)` pairs of a catalog; unreadable help gives an empty one-liner.
pub fn summaries(verbs: &[VerbEntry]) -> Vec<(String, String)> {
    verbs
        .iter()
        .map(|verb| {
            let one_liner = match verb.help() {
                Ok(help) => help.one_liner().to_string(),
                Err(e) => {
                    log::warn!("{}", e);
                    String::new()
                }
            };
            (verb.name.clone(), one_liner)
        })
        .collect()
}

/// Runs an external verb as a child process.
/// A failure to start it or a non-zero exit status is one error.
pub fn run_external(ctx: &mut RunContext, path: &Path, args: &[String], node: &str) {
    let mut env = HashMap::new();
    env.insert("TTP_COMMAND".to_string(), ctx.command().to_string());
    env.insert(
        "TTP_VERB".to_string(),
        ctx.verb().unwrap_or_default().to_string(),
    );
    env.insert(NODE_ENV.to_string(), node.to_string());
    if ctx.is_dummy() {
        env.insert("TTP_DUMMY".to_string(), "1".to_string());
    }

    match executor::execute_command(path, args, &env) {
        Ok(Some(0)) => {}
        Ok(Some(code)) => ctx.error(format!(
            t!("verbs.error.exit_status"),
            path = path.display(),
            code = code
        )),
        Ok(None) => ctx.error(format!(t!("verbs.error.killed"), path = path.display())),
        Err(e) => ctx.error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::help::render_command_help;
    use std::fs;

    fn write_verb(dir: &Path, file: &str, one_liner: &str) {
        fs::write(dir.join(file), format!("#!/bin/sh\n# @(#) {}\n", one_liner)).unwrap();
    }

    #[test]
    fn test_help_command_lists_verbs_in_order() {
        // --- Setup ---
        let tree = tempfile::tempdir().unwrap();
        let dir = tree.path().join("libexec").join("dbms");
        fs::create_dir_all(&dir).unwrap();
        write_verb(&dir, "list.do", "list things");
        write_verb(&dir, "backup.do", "save things");
        write_verb(&dir, "sql.do", "query things");
        fs::write(dir.join("README.md"), "not a verb").unwrap();

        // --- Execute ---
        let verbs = catalog(&[], discover(&[dir]));
        let rendered = render_command_help("dbms", "", &summaries(&verbs));

        // --- Assert ---
        let names: Vec<&str> = verbs.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["backup", "list", "sql"]);
        let backup = rendered.find("save things").unwrap();
        let list = rendered.find("list things").unwrap();
        let sql = rendered.find("query things").unwrap();
        assert!(backup < list && list < sql);
    }

    #[test]
    fn test_first_tree_wins() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_verb(first.path(), "sync.do", "first");
        write_verb(second.path(), "sync.do", "second");
        write_verb(second.path(), "other.do", "other");

        let verbs = discover(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(verbs.len(), 2);
        let sync = verbs.iter().find(|v| v.name == "sync").unwrap();
        assert_eq!(sync.help().unwrap().one_liner(), "first");
    }

    #[test]
    fn test_discover_commands_across_trees() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::create_dir_all(first.path().join("libexec").join("mqtt")).unwrap();
        fs::create_dir_all(second.path().join("libexec").join("dbms")).unwrap();
        fs::create_dir_all(second.path().join("libexec").join("mqtt")).unwrap();

        let names =
            discover_commands(&[first.path().to_path_buf(), second.path().to_path_buf()]);
        assert_eq!(names, vec!["dbms", "mqtt"]);
    }

    #[test]
    fn test_builtin_shadows_external() {
        let dir = tempfile::tempdir().unwrap();
        write_verb(dir.path(), "list.do", "external list");
        write_verb(dir.path(), "Zap.do", "zap");

        let verbs = catalog(
            &[("list", "# @(#) built-in list")],
            discover(&[dir.path().to_path_buf()]),
        );
        assert_eq!(verbs.len(), 2);
        assert_eq!(verbs[0].source, VerbSource::Builtin("# @(#) built-in list"));
        assert_eq!(verbs[1].name, "Zap");
    }

    #[cfg(unix)]
    #[test]
    fn test_external_failure_is_one_error() {
        use std::os::unix::fs::PermissionsExt;

        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let verb = dir.path().join("fail.do");
        fs::write(&verb, "#!/bin/sh\ntest \"$TTP_VERB\" = fail && exit 3\nexit 0\n").unwrap();
        fs::set_permissions(&verb, fs::Permissions::from_mode(0o755)).unwrap();
        let mut ctx = RunContext::new("dbms");
        ctx.set_colored(false);
        ctx.set_verb("fail");

        // --- Execute ---
        run_external(&mut ctx, &verb, &[], "WS1");

        // --- Assert ---
        assert_eq!(ctx.error_count(), 1);
    }
}
