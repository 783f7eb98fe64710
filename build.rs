//! Build script for the FedAvg coordinator
//!
//! Embeds build-time information into the binary:
//! - Git commit hash, branch and dirty flag
//! - Build timestamp
//! - Target/host triples and profile
//! - Rust version

use std::env;
use std::process::Command;

fn main() {
    // Rerun if git HEAD changes
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let git_hash = command_output("git", &["rev-parse", "--short=8", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());
    let git_branch = command_output("git", &["rev-parse", "--abbrev-ref", "HEAD"])
        .unwrap_or_else(|| "unknown".to_string());
    let git_dirty = match command_output("git", &["status", "--porcelain"]) {
        Some(status) if !status.is_empty() => "true",
        Some(_) => "false",
        None => "unknown",
    };

    let build_timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string();
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    let profile = env::var("PROFILE").unwrap_or_else(|_| "unknown".to_string());
    let host = env::var("HOST").unwrap_or_else(|_| "unknown".to_string());
    let rustc_version = command_output("rustc", &["--version"])
        .unwrap_or_else(|| "unknown".to_string());

    let vars = [
        ("FEDAVG_GIT_HASH", git_hash.as_str()),
        ("FEDAVG_GIT_BRANCH", git_branch.as_str()),
        ("FEDAVG_GIT_DIRTY", git_dirty),
        ("FEDAVG_BUILD_TIMESTAMP", build_timestamp.as_str()),
        ("FEDAVG_TARGET", target.as_str()),
        ("FEDAVG_PROFILE", profile.as_str()),
        ("FEDAVG_RUSTC_VERSION", rustc_version.as_str()),
        ("FEDAVG_HOST", host.as_str()),
    ];
    for (key, value) in vars {
        println!("cargo:rustc-env={}={}", key, value);
    }

    eprintln!("Building fedavg-coordinator:");
    eprintln!("  Git:     {}{}", git_hash, if git_dirty == "true" { " (dirty)" } else { "" });
    eprintln!("  Target:  {}", target);
    eprintln!("  Profile: {}", profile);
}

/// Run a command and return its trimmed stdout, or `None` if it failed
fn command_output(program: &str, args: &[&str]) -> Option<String> {
    Command::new(program)
        .args(args)
        .output()
        .ok()
        .filter(|output| output.status.success())
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
}
