//! Sets `GIT_DESCRIBE` for the CLI's `--version` output.
//!
//! Falls back to the package version outside a git checkout.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");

    let describe = git_describe().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=GIT_DESCRIBE={}", describe);
}

fn git_describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()?;

    if output.status.success() {
        let describe = String::from_utf8(output.stdout).ok()?;
        let describe = describe.trim();
        (!describe.is_empty()).then(|| describe.to_string())
    } else {
        None
    }
}
