// src/core/resolver.rs

//! Resolution of the `--service` / `--instance` / `--database` selectors
//! into a concrete DBMS instance and a list of databases.

use crate::core::config_loader::Config;
use crate::core::dbms::BackendRegistry;
use crate::models::Instance;
use crate::state::RunContext;

/// The selector options of a verb, as given on the command line.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    pub service: Option<String>,
    pub instance: Option<String>,
    /// Explicit databases; they replace the service's own list.
    pub databases: Vec<String>,
}

/// How `check_instance_name` behaves when nothing is selected.
#[derive(Debug, Clone, Copy)]
pub struct CheckOptions {
    /// An unresolvable name is an error; otherwise `None` is returned silently.
    pub mandatory: bool,
    /// Fall back to the only instance of the host when no name is given.
    pub single: bool,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            mandatory: true,
            single: true,
        }
    }
}

/// The outcome of a successful selector resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub service: Option<String>,
    pub instance: Instance,
    pub databases: Vec<String>,
}

/// Checks that an instance name is declared on this host.
///
/// Without a name and with `single`, the only instance of the host is used
/// and a warning says so.
pub fn check_instance_name(
    ctx: &mut RunContext,
    config: &Config,
    name: Option<&str>,
    options: CheckOptions,
) -> Option<String> {
    match name {
        Some(name) => {
            if config.instance(name).is_some() {
                Some(name.to_string())
            } else {
                if options.mandatory {
                    ctx.error(format!(
                        t!("resolver.error.unknown_instance"),
                        instance = name,
                        host = config.hostname()
                    ));
                }
                None
            }
        }
        None => {
            let names = config.instance_names();
            if let (true, [only]) = (options.single, names.as_slice()) {
                let only = only.to_string();
                ctx.warn(format!(t!("resolver.warn.single_instance"), instance = only));
                return Some(only);
            }
            if options.mandatory {
                ctx.error(format!(
                    t!("resolver.error.no_instance"),
                    host = config.hostname(),
                    count = names.len()
                ));
            }
            None
        }
    }
}

/// The resolved instance of this host, from the context cache when already seen.
pub fn instance(ctx: &mut RunContext, config: &Config, name: &str) -> Option<Instance> {
    if let Some(cached) = ctx.cached_instance(name) {
        return Some(cached.clone());
    }
    let Some(declared) = config.instance(name) else {
        ctx.error(format!(
            t!("resolver.error.unknown_instance"),
            instance = name,
            host = config.hostname()
        ));
        return None;
    };
    let resolved = Instance::from_config(name, config.hostname(), declared);
    log::debug!("Resolved instance {:?}", resolved);
    ctx.cache_instance(resolved.clone());
    Some(resolved)
}

/// The instance a service runs on.
pub fn service_instance_name(
    ctx: &mut RunContext,
    config: &Config,
    service: &str,
) -> Option<String> {
    let Some(declared) = config.service(service) else {
        ctx.error(format!(
            t!("resolver.error.unknown_service"),
            service = service,
            host = config.hostname()
        ));
        return None;
    };
    match &declared.instance {
        Some(name) => check_instance_name(ctx, config, Some(name), CheckOptions::default()),
        None => {
            ctx.error(format!(
                t!("resolver.error.service_without_instance"),
                service = service
            ));
            None
        }
    }
}

/// Resolves the selectors of a verb.
///
/// `--service` and `--instance` are mutually exclusive and one of them is
/// required; a violation is exactly one error.
pub fn resolve_selector(
    ctx: &mut RunContext,
    config: &Config,
    selector: &Selector,
) -> Option<Target> {
    let instance_name = match (&selector.service, &selector.instance) {
        (Some(_), Some(_)) => {
            ctx.error(t!("resolver.error.both_selectors"));
            return None;
        }
        (None, None) => {
            ctx.error(t!("resolver.error.no_selector"));
            return None;
        }
        (Some(service), None) => service_instance_name(ctx, config, service)?,
        (None, Some(name)) => check_instance_name(ctx, config, Some(name), CheckOptions::default())?,
    };
    let resolved = instance(ctx, config, &instance_name)?;

    let databases = if !selector.databases.is_empty() {
        selector.databases.clone()
    } else {
        selector
            .service
            .as_deref()
            .and_then(|s| config.service(s))
            .map(|s| s.databases.clone())
            .unwrap_or_default()
    };

    Some(Target {
        service: selector.service.clone(),
        instance: resolved,
        databases,
    })
}

/// Whether a database is live on the instance. The match is exact and case-sensitive.
pub fn database_exists(
    ctx: &mut RunContext,
    registry: &BackendRegistry,
    instance: &Instance,
    database: &str,
) -> bool {
    registry
        .get_live_databases(ctx, instance)
        .iter()
        .any(|live| live == database)
}

/// The databases a verb works on: the target's list, else every live one.
pub fn select_databases(
    ctx: &mut RunContext,
    registry: &BackendRegistry,
    target: &Target,
) -> Vec<String> {
    if target.databases.is_empty() {
        registry.get_live_databases(ctx, &target.instance)
    } else {
        target.databases.clone()
    }
}
