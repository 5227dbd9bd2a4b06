// src/cli/handlers/mod.rs

// One module per built-in command; each exposes its `VERBS` table.

pub mod commons;
pub mod daemon;
pub mod dbms;
pub mod services;
pub mod ttp;
