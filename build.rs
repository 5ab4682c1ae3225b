use std::process::Command;

const NIGHTLY_ENV: &str = "VOLVO_CONNECTOR_NIGHTLY";

fn git_short_sha() -> Option<String> {
    let from_git = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .map(|out| String::from_utf8_lossy(&out.stdout).trim().to_string());
    // CI builds from tarballs pass the sha explicitly
    from_git
        .or_else(|| std::env::var("GIT_SHA").ok())
        .filter(|s| !s.is_empty())
}

fn main() {
    let base = env!("CARGO_PKG_VERSION");
    let nightly = std::env::var(NIGHTLY_ENV)
        .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

    let version = match (nightly, git_short_sha()) {
        (true, Some(sha)) => format!("{}-nightly+{}", base, sha),
        (true, None) => format!("{}-nightly", base),
        (false, _) => base.to_string(),
    };
    println!("cargo:rustc-env=APP_VERSION={}", version);

    println!("cargo:rerun-if-env-changed={}", NIGHTLY_ENV);
    println!("cargo:rerun-if-env-changed=GIT_SHA");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs/heads");
}
