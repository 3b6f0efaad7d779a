use std::process::Command;

use time::macros::format_description;

/// Short commit hash of the checkout, if this is a git tree.
fn git_revision() -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "--short=10", "HEAD"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let rev = String::from_utf8(out.stdout).ok()?.trim().to_string();
    (!rev.is_empty()).then_some(rev)
}

/// Build-time value, overridable from the environment for reproducible builds.
fn stamp(var: &str, fallback: impl FnOnce() -> Option<String>) {
    println!("cargo:rerun-if-env-changed={var}");
    let value = std::env::var(var)
        .ok()
        .or_else(fallback)
        .unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env={var}={value}");
}

fn main() {
    let now = time::OffsetDateTime::now_utc();

    stamp("PHT_BUILD_DATE", || now.format(format_description!("[year]-[month]-[day]")).ok());
    stamp("PHT_BUILD_TIME", || {
        now.format(format_description!("[hour]:[minute]:[second] UTC")).ok()
    });
    stamp("PHT_GIT_REV", git_revision);

    println!("cargo:rerun-if-changed=build.rs");
}
