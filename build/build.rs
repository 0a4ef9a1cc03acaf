use std::env;
use std::path::Path;
use std::process::Command;

fn main() {
    let label = resolve_version_label();
    let git_sha = resolve_git_sha();
    let build_time = resolve_build_time();

    println!("cargo:rustc-env=MUDTAP_VERSION_LABEL={label}");
    println!("cargo:rustc-env=MUDTAP_GIT_SHA={git_sha}");
    println!("cargo:rustc-env=MUDTAP_BUILD_TIME={build_time}");

    println!("cargo:rerun-if-env-changed=MUDTAP_VERSION_LABEL");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
}

fn resolve_version_label() -> String {
    match env::var("MUDTAP_VERSION_LABEL") {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "0.0.0".to_string()),
    }
}

fn resolve_git_sha() -> String {
    if let Ok(value) = env::var("GITHUB_SHA") {
        return short_sha(&value);
    }
    if !Path::new(".git").exists() {
        return String::new();
    }

    let Some(sha) = git_output(&["rev-parse", "--short", "HEAD"]) else {
        return String::new();
    };
    let dirty = git_output(&["status", "--porcelain"]).is_some_and(|s| !s.trim().is_empty());
    if dirty { format!("{sha}-dirty") } else { sha }
}

fn short_sha(value: &str) -> String {
    let trimmed = value.trim();
    trimmed.chars().take(7).collect()
}

fn resolve_build_time() -> String {
    if let Ok(value) = env::var("SOURCE_DATE_EPOCH")
        && let Ok(epoch) = value.trim().parse::<i64>()
        && let Ok(dt) = time::OffsetDateTime::from_unix_timestamp(epoch)
        && let Ok(text) = dt.format(&time::format_description::well_known::Rfc3339)
    {
        return text;
    }

    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "unknown".to_string())
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let value = text.trim();
    (!value.is_empty()).then(|| value.to_string())
}
