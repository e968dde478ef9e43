use std::env;
use std::process::Command;

fn main() {
    // An explicit GIT_COMMIT (e.g. from CI) takes precedence.
    let commit = env::var("GIT_COMMIT").ok().or_else(|| {
        let output = Command::new("git")
            .args(["rev-parse", "--short", "HEAD"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let hash = String::from_utf8(output.stdout).ok()?;
        let hash = hash.trim();
        (!hash.is_empty()).then(|| hash.to_string())
    });

    if let Some(commit) = commit {
        println!("cargo:rustc-env=GIT_COMMIT={commit}");
    } else {
        println!("cargo:warning=git commit unavailable, version reports \"unknown\"");
    }

    println!("cargo:rerun-if-env-changed=GIT_COMMIT");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=build.rs");
}
