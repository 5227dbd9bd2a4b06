// src/core/mod.rs

pub mod config_loader;
pub mod daemon;
pub mod dbms;
pub mod help;
pub mod interpolator;
pub mod messages;
pub mod paths;
pub mod reports;
pub mod resolver;
pub mod verbs;
