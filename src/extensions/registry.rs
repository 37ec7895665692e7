use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, warn};

use super::{AfterRequestHook, Extension, HookContext, Middleware};
use crate::error::{ExtensionError, RegistryError, panic_message};
use crate::features::{Feature, FeatureKey};

/// The two places a hook can attach to a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    AfterRequest,
    Middleware,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AfterRequest => "after_request",
            Self::Middleware => "middleware",
        }
    }
}

impl std::fmt::Display for HookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one registration so it can be removed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationToken {
    feature: FeatureKey,
    kind: HookKind,
    seq: u64,
}

#[cfg(test)]
impl RegistrationToken {
    pub fn feature(&self) -> FeatureKey {
        self.feature
    }

    pub fn kind(&self) -> HookKind {
        self.kind
    }
}

struct Entry {
    token: RegistrationToken,
    source: String,
    /// An `Arc<dyn Middleware<F>>` or `Arc<dyn AfterRequestHook<F>>`.
    hook: Box<dyn Any + Send + Sync>,
}

/// Per-process table of hook opt-ins, registered hooks and extensions.
///
/// Registering the same hook twice runs it twice.
#[derive(Default)]
pub struct Registry {
    accepting: HashSet<(FeatureKey, HookKind)>,
    chains: HashMap<(FeatureKey, HookKind), Vec<Entry>>,
    extensions: Vec<Arc<dyn Extension>>,
    next_seq: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that `feature` runs hooks of `kind`.
    pub fn accept(&mut self, feature: FeatureKey, kind: HookKind) {
        self.accepting.insert((feature, kind));
    }

    pub fn accepts(&self, feature: FeatureKey, kind: HookKind) -> bool {
        self.accepting.contains(&(feature, kind))
    }

    fn register(
        &mut self,
        feature: FeatureKey,
        kind: HookKind,
        source: String,
        hook: Box<dyn Any + Send + Sync>,
    ) -> Result<RegistrationToken, RegistryError> {
        if !self.accepts(feature, kind) {
            return Err(RegistryError::HookNotAccepted {
                feature: feature.name(),
                kind: kind.as_str(),
            });
        }
        let token = RegistrationToken {
            feature,
            kind,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        debug!(feature = %feature, kind = %kind, source = %source, "Hook registered");
        self.chains
            .entry((feature, kind))
            .or_default()
            .push(Entry {
                token,
                source,
                hook,
            });
        Ok(token)
    }

    pub fn register_middleware<F: Feature>(
        &mut self,
        source: impl Into<String>,
        middleware: Arc<dyn Middleware<F>>,
    ) -> Result<RegistrationToken, RegistryError> {
        self.register(
            F::KEY,
            HookKind::Middleware,
            source.into(),
            Box::new(middleware),
        )
    }

    pub fn register_after_request<F: Feature>(
        &mut self,
        source: impl Into<String>,
        hook: Arc<dyn AfterRequestHook<F>>,
    ) -> Result<RegistrationToken, RegistryError> {
        self.register(F::KEY, HookKind::AfterRequest, source.into(), Box::new(hook))
    }

    /// Remove a registration. Returns false if it was already gone.
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn unregister(&mut self, token: RegistrationToken) -> bool {
        let Some(chain) = self.chains.get_mut(&(token.feature, token.kind)) else {
            return false;
        };
        let before = chain.len();
        chain.retain(|entry| entry.token != token);
        chain.len() != before
    }

    /// Sources of the hooks attached to `feature`, in the order they run.
    pub fn sources(&self, feature: FeatureKey, kind: HookKind) -> Vec<&str> {
        self.entries(feature, kind)
            .iter()
            .map(|entry| entry.source.as_str())
            .collect()
    }

    fn entries(&self, feature: FeatureKey, kind: HookKind) -> &[Entry] {
        self.chains
            .get(&(feature, kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn run_after_request<F: Feature>(
        &self,
        response: &mut F::Response,
        context: &HookContext<'_>,
    ) {
        for entry in self.entries(F::KEY, HookKind::AfterRequest) {
            if let Some(hook) = entry.hook.downcast_ref::<Arc<dyn AfterRequestHook<F>>>() {
                hook.after_request(response, context);
            }
        }
    }

    pub fn run_middleware<F: Feature>(
        &self,
        response: F::Response,
        context: &HookContext<'_>,
    ) -> F::Response {
        self.entries(F::KEY, HookKind::Middleware)
            .iter()
            .filter_map(|entry| entry.hook.downcast_ref::<Arc<dyn Middleware<F>>>())
            .fold(response, |response, middleware| {
                middleware.call(response, context)
            })
    }

    /// Run every hook registered for `F` over a freshly computed response.
    pub fn apply<F: Feature>(
        &self,
        mut response: F::Response,
        context: &HookContext<'_>,
    ) -> F::Response {
        self.run_after_request::<F>(&mut response, context);
        self.run_middleware::<F>(response, context)
    }

    pub fn add_extension(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn extension_names(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.name()).collect()
    }

    /// Activate every added extension. Failures are collected so one broken
    /// extension cannot keep the others from loading.
    pub fn activate_extensions(&mut self) -> Vec<ExtensionError> {
        let extensions = self.extensions.clone();
        let mut errors = Vec::new();
        for extension in extensions {
            let name = extension.name().to_string();
            match panic::catch_unwind(AssertUnwindSafe(|| extension.activate(self))) {
                Ok(Ok(())) => debug!(extension = %name, "Extension activated"),
                Ok(Err(source)) => {
                    warn!(extension = %name, error = %source, "Extension failed to activate");
                    errors.push(ExtensionError::Activation { name, source });
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(extension = %name, error = %message, "Extension panicked");
                    errors.push(ExtensionError::Panicked { name, message });
                }
            }
        }
        errors
    }
}
