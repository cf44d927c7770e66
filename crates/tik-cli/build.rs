use std::process::Command;

/// Exposes the short commit hash as `GIT_HASH` for `tik --version`.
///
/// Falls back to a `GIT_HASH` environment variable (release builds from a
/// tarball), then to `unknown`.
fn main() {
    let from_git = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .filter(|hash| !hash.is_empty());

    let git_hash = from_git
        .or_else(|| std::env::var("GIT_HASH").ok().filter(|h| !h.is_empty()))
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=GIT_HASH={git_hash}");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-env-changed=GIT_HASH");
}
