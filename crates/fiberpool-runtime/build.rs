//! Build script for fiberpool-runtime
//!
//! Produces the compile-time configuration defaults:
//! 1. Start with library defaults
//! 2. If FIBERPOOL_CONFIG_RS is set, read `pub const NAME: TYPE = VALUE;`
//!    lines from that file
//! 3. Known names override the defaults, unknown names warn
//! 4. Write OUT_DIR/fiberpool_defaults.rs
//!
//! Runtime environment variables still override these (see config/mod.rs).

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "256 * 1024",
    },
    ConfigParam {
        name: "MAX_WORKERS",
        rust_type: "usize",
        default_value: "4096",
    },
    ConfigParam {
        name: "READY_POLICY",
        rust_type: "&str",
        default_value: "\"fifo\"",
    },
    ConfigParam {
        name: "SHARE_THREADS",
        rust_type: "usize",
        default_value: "4",
    },
    ConfigParam {
        name: "SHARE_PARK_TIMEOUT_MS",
        rust_type: "u64",
        default_value: "100",
    },
    ConfigParam {
        name: "DEBUG_LOGGING",
        rust_type: "bool",
        default_value: "false",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("fiberpool_defaults.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    let user_config = env::var("FIBERPOOL_CONFIG_RS").ok();
    if let Some(ref user_path) = user_config {
        println!("cargo:rerun-if-changed={}", user_path);
        match fs::read_to_string(user_path) {
            Ok(content) => {
                for unknown in merge_overrides(&content, &mut config) {
                    println!("cargo:warning=Unknown fiberpool config parameter: {}", unknown);
                }
                println!("cargo:warning=Using fiberpool config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read FIBERPOOL_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }
    println!("cargo:rerun-if-env-changed=FIBERPOOL_CONFIG_RS");

    let output = render(&config, user_config.is_some());
    fs::write(&dest_path, output).expect("Failed to write fiberpool defaults");
}

/// Merge known `pub const` lines into `config`; returns the unknown names
fn merge_overrides(content: &str, config: &mut HashMap<&str, String>) -> Vec<String> {
    let mut unknown = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.starts_with("//") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => unknown.push(name),
        }
    }
    unknown
}

/// Parse `pub const NAME: TYPE = VALUE;` into (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();
    let colon = rest.find(':')?;
    let eq = rest.find('=')?;
    if eq < colon {
        return None;
    }
    let end = rest.rfind(';').unwrap_or(rest.len());
    let name = rest[..colon].trim().to_string();
    let value = rest[eq + 1..end].trim().to_string();
    if name.is_empty() || value.is_empty() {
        return None;
    }
    Some((name, value))
}

fn render(config: &HashMap<&str, String>, has_user_config: bool) -> String {
    let mut output = String::from("// Auto-generated by build.rs - do not edit\n");
    if has_user_config {
        output.push_str("// Library defaults merged with FIBERPOOL_CONFIG_RS\n");
    }
    output.push('\n');
    for param in CONFIG_PARAMS {
        let value = config
            .get(param.name)
            .map(String::as_str)
            .unwrap_or(param.default_value);
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }
    output
}
