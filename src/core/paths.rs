// src/core/paths.rs

use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::constants::{
    HOST_CONFIG_EXTENSION, NODES_SUBDIR, ROOTS_ENV, SITE_CONFIG_FILENAME, SITE_ROOT_ENV,
    SITE_SUBDIR, VERBS_SUBDIR,
};

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
    #[error("Failed to expand path template '{template}': {reason}")]
    Expansion { template: String, reason: String },
}

/// Where the configuration documents and the external verbs are looked for.
///
/// Built once from the environment by the binary; tests build it directly so
/// they never have to touch the process environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SitePaths {
    pub site_root: PathBuf,
    /// The installation trees, in search order.
    pub roots: Vec<PathBuf>,
}

impl SitePaths {
    pub fn new(site_root: impl Into<PathBuf>, roots: Vec<PathBuf>) -> Self {
        Self {
            site_root: site_root.into(),
            roots,
        }
    }

    /// Reads `TTP_ROOTS` and `TTP_SITE`.
    ///
    /// Without `TTP_SITE`, the site root is `etc/ttp` in the first tree, and
    /// without any tree it falls back to the user's config directory.
    pub fn from_env() -> Result<Self, PathError> {
        let roots = match env::var(ROOTS_ENV) {
            Ok(value) => split_roots(&value)?,
            Err(_) => Vec::new(),
        };

        let site_root = match env::var(SITE_ROOT_ENV) {
            Ok(value) if !value.trim().is_empty() => expand_path_template(value.trim())?,
            _ => match roots.first() {
                Some(first) => join_all(first, SITE_SUBDIR),
                None => dirs::config_dir()
                    .ok_or(PathError::ConfigDirNotFound)?
                    .join("ttp"),
            },
        };

        log::debug!("Site root: {}, trees: {:?}", site_root.display(), roots);
        Ok(Self { site_root, roots })
    }

    /// `<siteRoot>/toops.json`
    pub fn site_config_path(&self) -> PathBuf {
        self.site_root.join(SITE_CONFIG_FILENAME)
    }

    /// Every place a host document may live, most specific first.
    pub fn host_config_candidates(&self, host: &str) -> Vec<PathBuf> {
        let filename = format!("{}.{}", host, HOST_CONFIG_EXTENSION);
        let mut candidates = vec![self.site_root.join(&filename)];
        candidates.extend(
            self.roots
                .iter()
                .map(|tree| join_all(tree, NODES_SUBDIR).join(&filename)),
        );
        candidates
    }

    /// `<tree>/libexec/<command>` for each tree that has one.
    pub fn verbs_dirs(&self, command: &str) -> Vec<PathBuf> {
        self.roots
            .iter()
            .map(|tree| tree.join(VERBS_SUBDIR).join(command))
            .filter(|dir| dir.is_dir())
            .map(|dir| dunce::canonicalize(&dir).unwrap_or(dir))
            .collect()
    }
}

/// Splits a search-path-style value and expands each entry.
pub fn split_roots(value: &str) -> Result<Vec<PathBuf>, PathError> {
    env::split_paths(value)
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| expand_path_template(&p.to_string_lossy()))
        .collect()
}

/// Expands the home directory (`~`) and environment variables (`$VAR`) of a path.
pub fn expand_path_template(template: &str) -> Result<PathBuf, PathError> {
    let expanded = shellexpand::full(template).map_err(|e| PathError::Expansion {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    Ok(PathBuf::from(expanded.into_owned()))
}

fn join_all(base: &Path, segments: &[&str]) -> PathBuf {
    segments
        .iter()
        .fold(base.to_path_buf(), |path, segment| path.join(segment))
}
