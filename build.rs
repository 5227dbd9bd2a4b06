// build.rs

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

const FALLBACK_LANG: &str = "en";

fn main() {
    // --- 1. Pick the message language ---
    // A `lang_*` feature wins over the TTP_LANG variable, which wins over English.
    let mut requested: Vec<String> = env::vars()
        .filter_map(|(key, _)| {
            key.strip_prefix("CARGO_FEATURE_LANG_")
                .map(|l| l.to_lowercase())
        })
        .collect();
    requested.sort();

    let lang = match requested.first() {
        Some(first) => {
            if requested.len() > 1 {
                println!(
                    "cargo:warning=Several language features enabled ({:?}); keeping '{}'.",
                    requested, first
                );
            }
            first.clone()
        }
        None => env::var("TTP_LANG").unwrap_or_else(|_| FALLBACK_LANG.to_string()),
    };

    println!("cargo:rustc-env=TTP_LANG_EFFECTIVE={}", lang);
    println!("cargo:rerun-if-env-changed=TTP_LANG");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=locales/");

    // --- 2. English is always loaded, the selected language is layered on top ---
    let fallback_path = format!("locales/{}.toml", FALLBACK_LANG);
    let fallback = fs::read_to_string(&fallback_path)
        .unwrap_or_else(|_| panic!("Failed to read fallback language file: {}", fallback_path));
    let mut messages: BTreeMap<String, String> = toml::from_str(&fallback)
        .unwrap_or_else(|e| panic!("Failed to parse {}: {}", fallback_path, e));

    if lang != FALLBACK_LANG {
        let lang_path = format!("locales/{}.toml", lang);
        match fs::read_to_string(&lang_path) {
            Ok(content) => {
                let overrides: BTreeMap<String, String> = toml::from_str(&content)
                    .unwrap_or_else(|e| panic!("Failed to parse {}: {}", lang_path, e));
                messages.extend(overrides);
            }
            Err(_) => println!(
                "cargo:warning=Language file '{}' not found. Falling back to '{}'.",
                lang_path, FALLBACK_LANG
            ),
        }
    }

    // --- 3. Generate the `t!` macro, one arm per key ---
    let mut code = String::from("#[macro_export]\nmacro_rules! t {\n");
    for (key, value) in &messages {
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        code.push_str(&format!("    (\"{}\") => {{ \"{}\" }};\n", key, escaped));
    }
    // Unknown keys fail the build instead of printing garbage at runtime.
    code.push_str(
        "    ($key:expr) => {{ compile_error!(concat!(\"Missing translation key: \", $key)) }};\n",
    );
    code.push('}');

    let out_dir = env::var("OUT_DIR").expect("OUT_DIR is set by cargo");
    fs::write(Path::new(&out_dir).join("translations.rs"), code)
        .expect("Failed to write translations.rs");
}
