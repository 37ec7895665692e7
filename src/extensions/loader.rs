//! Boot: build a process's registry from every tier.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};

use super::middleware::{HookTable, load_middleware_dir, register_library_defaults};
use super::{Extension, HookKind, Registry};
use crate::error::{ExtensionError, RegistryError};
use crate::features::{self, FeatureKey};
use crate::paths;

/// Where to look for middleware and extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootOptions {
    /// Directories scanned for `lantern/extension.toml`.
    pub search_paths: Vec<PathBuf>,
    pub user_dir: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
}

impl BootOptions {
    /// Standard tiers for a server started in `project_root`.
    pub fn new(search_paths: Vec<PathBuf>, project_root: Option<&Path>) -> Self {
        Self {
            search_paths,
            user_dir: paths::user_middleware_dir(),
            project_dir: project_root.map(paths::project_middleware_dir),
        }
    }
}

/// A booted registry and whatever failed along the way.
pub struct Boot {
    pub registry: Registry,
    pub errors: Vec<ExtensionError>,
}

/// `lantern/extension.toml` inside a search-path entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionManifest {
    pub name: String,
    #[serde(default)]
    pub after_request: HookTable,
    #[serde(default)]
    pub middleware: HookTable,
}

/// An extension declared by a manifest file.
#[derive(Debug, Clone)]
pub struct ManifestExtension {
    manifest: ExtensionManifest,
    path: PathBuf,
}

impl ManifestExtension {
    pub fn load(path: &Path) -> Result<Self, ExtensionError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ExtensionError::Read {
            path: display.clone(),
            source,
        })?;
        let manifest = toml::from_str(&text).map_err(|source| ExtensionError::Parse {
            path: display,
            source,
        })?;
        Ok(Self {
            manifest,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Extension for ManifestExtension {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn activate(&self, registry: &mut Registry) -> Result<(), RegistryError> {
        let name = &self.manifest.name;
        self.manifest
            .after_request
            .check(registry, HookKind::AfterRequest)?;
        self.manifest.middleware.check(registry, HookKind::Middleware)?;
        self.manifest
            .after_request
            .register(registry, HookKind::AfterRequest, name)?;
        self.manifest
            .middleware
            .register(registry, HookKind::Middleware, name)?;
        Ok(())
    }
}

/// Add an extension for every search path that carries a manifest.
fn discover_extensions(search_paths: &[PathBuf], registry: &mut Registry) -> Vec<ExtensionError> {
    let mut errors = Vec::new();
    for search_path in search_paths {
        let manifest = paths::extension_manifest(search_path);
        if !manifest.is_file() {
            continue;
        }
        match ManifestExtension::load(&manifest) {
            Ok(extension) => {
                debug!(extension = extension.name(), path = %extension.path().display(), "Extension discovered");
                registry.add_extension(Arc::new(extension));
            }
            Err(e) => errors.push(e),
        }
    }
    errors
}

/// Build a registry: opt-ins, library defaults, user and project middleware,
/// then discovered extensions.
pub fn boot(options: &BootOptions) -> Boot {
    let mut registry = Registry::new();
    features::declare(&mut registry);

    let mut errors = Vec::new();
    if let Err(source) = register_library_defaults(&mut registry) {
        errors.push(ExtensionError::Activation {
            name: "library".to_string(),
            source,
        });
    }
    if let Some(dir) = &options.user_dir {
        errors.extend(load_middleware_dir(dir, &mut registry, "user"));
    }
    if let Some(dir) = &options.project_dir {
        errors.extend(load_middleware_dir(dir, &mut registry, "project"));
    }
    errors.extend(discover_extensions(&options.search_paths, &mut registry));
    errors.extend(registry.activate_extensions());

    for key in FeatureKey::ALL {
        for &kind in key.accepted_hooks() {
            let sources = registry.sources(key, kind);
            if !sources.is_empty() {
                debug!(feature = %key, kind = kind.as_str(), sources = ?sources, "Hook chain");
            }
        }
    }

    info!(
        extensions = registry.extension_names().len(),
        errors = errors.len(),
        "Extensions booted"
    );
    Boot { registry, errors }
}
