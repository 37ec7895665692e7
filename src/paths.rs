//! Filesystem locations and home-directory redaction.

use std::path::{Path, PathBuf};

/// Directory name used under the user config dir and the project root.
const APP_DIR: &str = "lantern";

/// User-tier middleware directory.
///
/// - Linux: `~/.config/lantern/middleware`
/// - macOS: `~/Library/Application Support/lantern/middleware`
pub fn user_middleware_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join("middleware"))
}

/// Project-tier middleware directory, relative to the workspace root.
pub fn project_middleware_dir(root: &Path) -> PathBuf {
    root.join(format!(".{}", APP_DIR)).join("middleware")
}

/// Conventional extension manifest location inside a search-path entry.
pub fn extension_manifest(search_path: &Path) -> PathBuf {
    search_path.join(APP_DIR).join("extension.toml")
}

/// The home directory as a string, if known.
pub fn home_dir_string() -> Option<String> {
    dirs::home_dir().map(|h| h.to_string_lossy().into_owned())
}

/// Replace a leading `home` prefix with `~`.
pub fn redact_home(text: &str, home: Option<&str>) -> String {
    match home {
        Some(home) if !home.is_empty() && text.starts_with(home) => {
            format!("~{}", &text[home.len()..])
        }
        _ => text.to_string(),
    }
}

/// Replace everything up to and including `<scheme>://<home>` with `~`.
///
/// `file:///home/ada/src/a.rs` becomes `~/src/a.rs`. URIs outside the home
/// directory are returned unchanged.
pub fn redact_uri(uri: &str, home: Option<&str>) -> String {
    let Some(home) = home.filter(|h| !h.is_empty()) else {
        return uri.to_string();
    };
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end + 3..];
    match rest.strip_prefix(home) {
        Some(tail) => format!("~{}", tail),
        None => uri.to_string(),
    }
}
