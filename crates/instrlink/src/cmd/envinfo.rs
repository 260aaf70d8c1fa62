use std::collections::BTreeMap;

use comfy_table::{presets::UTF8_FULL, Table};
use instrlink_transport::list_ports;
use serde::Serialize;

use crate::cmd::{EnvinfoArgs, CONFIG_ENV};
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

const WATCHED_ENV: [&str; 2] = [CONFIG_ENV, "RUST_LOG"];

#[derive(Serialize)]
struct Platform {
    os: &'static str,
    arch: &'static str,
    family: &'static str,
}

#[derive(Serialize)]
struct Envinfo {
    version: &'static str,
    target: String,
    rustc: &'static str,
    git_hash: &'static str,
    platform: Platform,
    features: Vec<&'static str>,
    serial_ports: Vec<String>,
    environment: BTreeMap<&'static str, Option<String>>,
}

impl Envinfo {
    fn collect() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            target: build_target(),
            rustc: option_env!("RUSTC_VERSION").unwrap_or("unknown"),
            git_hash: option_env!("GIT_HASH").unwrap_or("unknown"),
            platform: Platform {
                os: std::env::consts::OS,
                arch: std::env::consts::ARCH,
                family: std::env::consts::FAMILY,
            },
            features: features(),
            serial_ports: list_ports().into_iter().map(|p| p.name).collect(),
            environment: WATCHED_ENV
                .iter()
                .map(|key| (*key, std::env::var(key).ok()))
                .collect(),
        }
    }
}

pub fn run(_args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let info = Envinfo::collect();
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(&info).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table => println!("{}", table(&info)),
        OutputFormat::Pretty => {
            for (key, value) in rows(&info) {
                println!("{key:<14} {value}");
            }
        }
        OutputFormat::Raw => println!("{}", info.version),
    }
    Ok(SUCCESS)
}

fn rows(info: &Envinfo) -> Vec<(String, String)> {
    let mut rows = vec![
        ("version".to_string(), info.version.to_string()),
        ("target".to_string(), info.target.clone()),
        ("rustc".to_string(), info.rustc.to_string()),
        ("git hash".to_string(), info.git_hash.to_string()),
        (
            "platform".to_string(),
            format!("{} {} ({})", info.platform.os, info.platform.arch, info.platform.family),
        ),
        ("features".to_string(), info.features.join(", ")),
        (
            "serial ports".to_string(),
            if info.serial_ports.is_empty() {
                "(none)".to_string()
            } else {
                info.serial_ports.join(", ")
            },
        ),
    ];
    for (key, value) in &info.environment {
        rows.push((
            (*key).to_string(),
            value.clone().unwrap_or_else(|| "(not set)".to_string()),
        ));
    }
    rows
}

fn table(info: &Envinfo) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["KEY", "VALUE"]);
    for (key, value) in rows(info) {
        table.add_row(vec![key, value]);
    }
    table
}

/// Target triple recorded by the build script, or a best guess.
fn build_target() -> String {
    option_env!("INSTRLINK_BUILD_TARGET")
        .map(str::to_string)
        .unwrap_or_else(|| {
            format!(
                "{}-unknown-{}",
                std::env::consts::ARCH,
                std::env::consts::OS
            )
        })
}

fn features() -> Vec<&'static str> {
    let mut features = vec!["serial", "tcp"];
    if cfg!(feature = "cli") {
        features.push("cli");
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envinfo_serializes_unset_variables_as_null() {
        let mut info = Envinfo::collect();
        info.environment.insert("RUST_LOG", None);
        let json = serde_json::to_string(&info).expect("envinfo should serialize");
        assert!(json.contains("\"RUST_LOG\":null"));
        assert!(json.contains("\"serial_ports\":["));
    }

    #[test]
    fn rows_cover_environment() {
        let info = Envinfo::collect();
        let keys: Vec<String> = rows(&info).into_iter().map(|(k, _)| k).collect();
        assert!(keys.contains(&CONFIG_ENV.to_string()));
        assert!(keys.contains(&"serial ports".to_string()));
    }

    #[test]
    fn target_looks_like_triple() {
        assert!(build_target().split('-').count() >= 3);
    }
}
