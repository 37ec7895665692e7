//! Version strings reported by `--version`, `initialize` and telemetry.
//!
//! `LANTERN_GIT_REV` is baked in at compile time when set by the build environment.

use std::sync::LazyLock;

pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const GIT_REV: &str = match option_env!("LANTERN_GIT_REV") {
    Some(rev) => rev,
    None => "",
};

static LONG_VERSION: LazyLock<String> = LazyLock::new(|| {
    if GIT_REV.is_empty() {
        PKG_VERSION.to_string()
    } else {
        format!("{} ({})", PKG_VERSION, GIT_REV)
    }
});

/// The version string sent as `lspVersion` in telemetry and `serverInfo.version`.
pub fn server_version() -> &'static str {
    PKG_VERSION
}

/// Long `--version` output for clap.
pub fn long_version() -> &'static str {
    LONG_VERSION.as_str()
}
