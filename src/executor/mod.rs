//! Runs one request against the document store.
//!
//! The executor never fails: errors and panics raised while handling a
//! request are captured into the [`JobResult`] so the server can reply with
//! an error and report telemetry.

mod lifecycle;

use std::backtrace::Backtrace;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::{ExtensionError, FeatureError, panic_message};
use crate::extensions::Registry;
use crate::features::{self, FeatureKey};
use crate::protocol::{Request, methods};
use crate::queue::{ExecutionFailure, JobResult};
use crate::store::Documents;

/// Frames kept from a captured backtrace.
const MAX_BACKTRACE_LINES: usize = 40;

pub trait Executor: Send + Sync {
    fn execute(&self, request: &Request, documents: &dyn Documents) -> JobResult;
}

/// Routes requests to the lifecycle handlers and the feature handlers.
pub struct FeatureExecutor {
    registry: Registry,
    /// Boot failures, reported to the client as `window/logMessage` on `initialize`.
    boot_errors: Vec<String>,
}

impl FeatureExecutor {
    pub fn new(registry: Registry, boot_errors: Vec<ExtensionError>) -> Self {
        Self {
            registry,
            boot_errors: boot_errors.iter().map(ToString::to_string).collect(),
        }
    }

    #[cfg(test)]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn dispatch(
        &self,
        request: &Request,
        documents: &dyn Documents,
    ) -> Result<JobResult, FeatureError> {
        match request.method.as_str() {
            methods::INITIALIZE => {
                lifecycle::initialize(features::params(request)?, documents, &self.boot_errors)
            }
            methods::DID_OPEN => lifecycle::did_open(features::params(request)?, documents),
            methods::DID_CHANGE => lifecycle::did_change(features::params(request)?, documents),
            methods::DID_CLOSE => lifecycle::did_close(features::params(request)?, documents),
            method => match FeatureKey::from_method(method) {
                Some(key) => {
                    features::run(key, request, documents, &self.registry).map(JobResult::value)
                }
                None if request.is_notification() => {
                    debug!(method, "Ignoring unknown notification");
                    Ok(JobResult::void())
                }
                None => Err(FeatureError::MethodNotFound(method.to_string())),
            },
        }
    }
}

impl Executor for FeatureExecutor {
    fn execute(&self, request: &Request, documents: &dyn Documents) -> JobResult {
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(request, documents)));
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                debug!(method = %request.method, error = %error, "Request failed");
                JobResult::failed(capture(&error))
            }
            Err(payload) => {
                let error = FeatureError::Panic(panic_message(payload.as_ref()));
                warn!(method = %request.method, error = %error, "Request handler panicked");
                JobResult::failed(capture(&error))
            }
        };
        result.timed(started.elapsed().as_secs_f64())
    }
}

fn capture(error: &FeatureError) -> ExecutionFailure {
    let backtrace = Backtrace::force_capture().to_string();
    ExecutionFailure {
        class: error.class_name().to_string(),
        message: error.to_string(),
        code: error.code(),
        backtrace: backtrace
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .take(MAX_BACKTRACE_LINES)
            .map(String::from)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::test_support::{URI, state_with};
    use crate::queue::Response;
    use serde_json::json;

    fn executor() -> FeatureExecutor {
        let boot = crate::extensions::boot(&crate::extensions::BootOptions::default());
        FeatureExecutor::new(boot.registry, boot.errors)
    }

    #[test]
    fn test_feature_request_is_timed() {
        let state = state_with("hello world\n");
        let request = Request::new(
            1,
            "textDocument/hover",
            json!({ "textDocument": { "uri": URI }, "position": { "line": 0, "character": 1 } }),
        );
        let result = executor().execute(&request, &state);
        assert!(result.error.is_none());
        assert!(result.request_time.is_some());
        let Response::Value(value) = result.response else {
            panic!("expected a value");
        };
        assert!(value["contents"]["value"].as_str().unwrap().contains("hello"));
    }

    #[test]
    fn test_unknown_method_fails() {
        let state = state_with("");
        let result = executor().execute(&Request::new(2, "textDocument/formatting", json!({})), &state);
        let error = result.error.unwrap();
        assert_eq!(error.class, "MethodNotFound");
        assert_eq!(error.code, -32601);
        assert!(!error.backtrace.is_empty());
        assert_eq!(result.response, Response::Value(serde_json::Value::Null));
    }

    #[test]
    fn test_unknown_notification_is_void() {
        let state = state_with("");
        let result =
            executor().execute(&Request::notification("$/setTrace", json!({"value": "off"})), &state);
        assert!(result.error.is_none());
        assert_eq!(result.response, Response::Void);
    }

    #[test]
    fn test_missing_document_is_captured() {
        let state = state_with("");
        let request = Request::new(
            3,
            "textDocument/diagnostic",
            json!({ "textDocument": { "uri": "file:///nowhere.rs" } }),
        );
        let error = executor().execute(&request, &state).error.unwrap();
        assert_eq!(error.class, "DocumentNotOpen");
        assert_eq!(error.message, "Document not open: file:///nowhere.rs");
    }

    struct Panicking;

    impl crate::extensions::Middleware<crate::features::DiagnosticsRequest> for Panicking {
        fn call(
            &self,
            _: Vec<lsp_types::Diagnostic>,
            _: &crate::extensions::HookContext<'_>,
        ) -> Vec<lsp_types::Diagnostic> {
            panic!("middleware exploded");
        }
    }

    #[test]
    fn test_panicking_hook_is_captured() {
        let mut registry = Registry::new();
        features::declare(&mut registry);
        registry
            .register_middleware::<crate::features::DiagnosticsRequest>(
                "boom",
                std::sync::Arc::new(Panicking),
            )
            .unwrap();
        let executor = FeatureExecutor::new(registry, Vec::new());

        let state = state_with("x\n");
        let request = Request::new(
            4,
            "textDocument/diagnostic",
            json!({ "textDocument": { "uri": URI } }),
        );
        let result = executor.execute(&request, &state);
        let error = result.error.unwrap();
        assert_eq!(error.class, "Panic");
        assert_eq!(error.message, "middleware exploded");
        assert_eq!(error.code, -32603);
    }
}
