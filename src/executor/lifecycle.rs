//! `initialize` and the document synchronization notifications.

use std::collections::BTreeMap;

use lsp_types::{
    CodeActionProviderCapability, CodeLensOptions, DiagnosticOptions, DiagnosticServerCapabilities,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    HoverProviderCapability, InitializeResult, MessageType, SelectionRangeProviderCapability,
    ServerCapabilities, ServerInfo, TextDocumentSyncCapability, TextDocumentSyncKind,
    TextDocumentSyncOptions,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::FeatureError;
use crate::features::FeatureKey;
use crate::protocol::methods;
use crate::queue::{JobResult, Notification};
use crate::store::{Document, Documents};
use crate::version;

/// The parts of `initialize` params the server reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct InitializeParams {
    #[serde(default)]
    initialization_options: Option<InitializationOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializationOptions {
    #[serde(default)]
    enabled_features: Option<EnabledFeatures>,
    #[serde(default)]
    worker_count: Option<usize>,
}

/// Clients send either a list of names or a name to flag map.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EnabledFeatures {
    List(Vec<String>),
    Flags(BTreeMap<String, bool>),
}

impl EnabledFeatures {
    fn into_names(self) -> Vec<String> {
        match self {
            Self::List(names) => names,
            Self::Flags(flags) => flags
                .into_iter()
                .filter_map(|(name, on)| on.then_some(name))
                .collect(),
        }
    }
}

fn is_enabled(enabled: Option<&[String]>, key: FeatureKey) -> bool {
    enabled.is_none_or(|names| names.iter().any(|name| name == key.config_name()))
}

/// Capabilities advertised for the given `enabledFeatures`. `None` enables all.
pub fn server_capabilities(enabled: Option<&[String]>) -> ServerCapabilities {
    let on = |key| is_enabled(enabled, key);
    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                ..Default::default()
            },
        )),
        hover_provider: on(FeatureKey::Hover).then_some(HoverProviderCapability::Simple(true)),
        code_action_provider: on(FeatureKey::CodeActions)
            .then_some(CodeActionProviderCapability::Simple(true)),
        code_lens_provider: on(FeatureKey::CodeLens).then_some(CodeLensOptions {
            resolve_provider: Some(false),
        }),
        selection_range_provider: on(FeatureKey::SelectionRanges)
            .then_some(SelectionRangeProviderCapability::Simple(true)),
        diagnostic_provider: on(FeatureKey::Diagnostics).then(|| {
            DiagnosticServerCapabilities::Options(DiagnosticOptions {
                identifier: Some("lantern".to_string()),
                inter_file_dependencies: false,
                workspace_diagnostics: false,
                work_done_progress_options: Default::default(),
            })
        }),
        ..Default::default()
    }
}

/// Most worker processes a client may ask for: one per core, never fewer than four.
fn worker_ceiling() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(MIN_WORKER_CEILING)
}

const MIN_WORKER_CEILING: usize = 4;

pub(super) fn initialize(
    params: Option<InitializeParams>,
    documents: &dyn Documents,
    boot_errors: &[String],
) -> Result<JobResult, FeatureError> {
    let options = params
        .unwrap_or_default()
        .initialization_options
        .unwrap_or_default();

    let mut settings = documents.settings()?;
    if let Some(count) = options.worker_count {
        let ceiling = worker_ceiling();
        if count > ceiling {
            warn!(requested = count, ceiling, "Client asked for too many workers");
        }
        settings.worker_count = count.min(ceiling);
    }
    if let Some(enabled) = options.enabled_features {
        let names = enabled.into_names();
        for unknown in names.iter().filter(|n| FeatureKey::from_config_name(n).is_none()) {
            debug!(feature = %unknown, "Client enabled an unknown feature");
        }
        settings.enabled_features = Some(names);
    }
    info!(
        workers = settings.worker_count,
        features = ?settings.enabled_features,
        "Client initialized"
    );

    let result = InitializeResult {
        capabilities: server_capabilities(settings.enabled_features.as_deref()),
        server_info: Some(ServerInfo {
            name: "lantern".to_string(),
            version: Some(version::server_version().to_string()),
        }),
    };
    documents.update_settings(settings)?;

    let notifications = boot_errors
        .iter()
        .map(|error| {
            Notification::new(
                methods::LOG_MESSAGE,
                json!({
                    "type": MessageType::WARNING,
                    "message": format!("Error loading extensions: {}", error),
                }),
            )
        })
        .collect();

    let value = serde_json::to_value(result).map_err(|e| FeatureError::Store(e.into()))?;
    Ok(JobResult::value(value).with_notifications(notifications))
}

pub(super) fn did_open(
    params: DidOpenTextDocumentParams,
    documents: &dyn Documents,
) -> Result<JobResult, FeatureError> {
    let item = params.text_document;
    documents.open_document(Document::new(item.uri, item.text, item.version))?;
    Ok(JobResult::void())
}

pub(super) fn did_change(
    params: DidChangeTextDocumentParams,
    documents: &dyn Documents,
) -> Result<JobResult, FeatureError> {
    let id = params.text_document;
    documents.change_document(&id.uri, id.version, params.content_changes)?;
    Ok(JobResult::void())
}

/// Forget the document and clear whatever diagnostics the client still shows for it.
pub(super) fn did_close(
    params: DidCloseTextDocumentParams,
    documents: &dyn Documents,
) -> Result<JobResult, FeatureError> {
    let uri = params.text_document.uri;
    documents.close_document(&uri)?;
    Ok(JobResult::void().with_notifications(vec![Notification::new(
        "textDocument/publishDiagnostics",
        json!({ "uri": uri, "diagnostics": [] }),
    )]))
}

#[cfg(test)]
mod tests {
    use super::super::{Executor, FeatureExecutor};
    use super::*;
    use crate::extensions::Registry;
    use crate::protocol::Request;
    use crate::queue::{QueueOrder, QueueState, Response};
    use crate::store::DocumentStore;
    use lsp_types::Url;

    fn state() -> QueueState {
        QueueState::new(DocumentStore::new(2), QueueOrder::Fifo)
    }

    fn run(executor: &FeatureExecutor, state: &QueueState, request: Request) -> JobResult {
        executor.execute(&request, state)
    }

    fn value(result: &JobResult) -> &serde_json::Value {
        match &result.response {
            Response::Value(value) => value,
            Response::Void => panic!("expected a value"),
        }
    }

    #[test]
    fn test_initialize_records_settings_and_capabilities() {
        let state = state();
        let executor = FeatureExecutor::new(Registry::new(), Vec::new());
        let result = run(
            &executor,
            &state,
            Request::new(
                1,
                "initialize",
                json!({ "initializationOptions": {
                    "enabledFeatures": ["hover", "codeLens"],
                    "workerCount": 3
                }}),
            ),
        );
        let value = value(&result);
        assert_eq!(value["serverInfo"]["name"], json!("lantern"));
        assert_eq!(value["capabilities"]["hoverProvider"], json!(true));
        assert!(value["capabilities"]["codeLensProvider"].is_object());
        assert!(value["capabilities"].get("diagnosticProvider").is_none());
        assert!(value["capabilities"].get("selectionRangeProvider").is_none());

        let settings = state.settings().unwrap();
        assert_eq!(settings.worker_count, 3);
        assert_eq!(
            settings.enabled_features,
            Some(vec!["hover".to_string(), "codeLens".to_string()])
        );
    }

    #[test]
    fn test_client_worker_count_is_capped() {
        let state = state();
        let executor = FeatureExecutor::new(Registry::new(), Vec::new());
        run(
            &executor,
            &state,
            Request::new(
                1,
                "initialize",
                json!({ "initializationOptions": { "workerCount": 100_000 } }),
            ),
        );
        let count = state.settings().unwrap().worker_count;
        assert_eq!(count, worker_ceiling());
        assert!(count >= MIN_WORKER_CEILING);
        assert!(count < 100_000);
    }

    #[test]
    fn test_initialize_without_params_enables_everything() {
        let state = state();
        let executor = FeatureExecutor::new(Registry::new(), Vec::new());
        let result = run(&executor, &state, Request::new(1, "initialize", serde_json::Value::Null));
        let capabilities = &value(&result)["capabilities"];
        for provider in [
            "hoverProvider",
            "codeLensProvider",
            "codeActionProvider",
            "diagnosticProvider",
            "selectionRangeProvider",
        ] {
            assert!(capabilities.get(provider).is_some(), "{} missing", provider);
        }
        assert_eq!(state.settings().unwrap().worker_count, 2);
    }

    #[test]
    fn test_flag_map_form() {
        let state = state();
        let executor = FeatureExecutor::new(Registry::new(), Vec::new());
        run(
            &executor,
            &state,
            Request::new(
                1,
                "initialize",
                json!({ "initializationOptions": { "enabledFeatures": { "hover": true, "diagnostics": false } } }),
            ),
        );
        assert_eq!(
            state.settings().unwrap().enabled_features,
            Some(vec!["hover".to_string()])
        );
    }

    #[test]
    fn test_boot_errors_become_log_messages() {
        let state = state();
        let errors = vec![crate::error::ExtensionError::Panicked {
            name: "rails".into(),
            message: "boom".into(),
        }];
        let executor = FeatureExecutor::new(Registry::new(), errors);
        let result = run(&executor, &state, Request::new(1, "initialize", json!({})));
        assert_eq!(result.notifications.len(), 1);
        assert_eq!(result.notifications[0].method, "window/logMessage");
        assert_eq!(result.notifications[0].params["type"], json!(2));
        assert!(result.notifications[0].params["message"]
            .as_str()
            .unwrap()
            .contains("rails"));
    }

    #[test]
    fn test_document_lifecycle() {
        let state = state();
        let executor = FeatureExecutor::new(Registry::new(), Vec::new());
        let uri = "file:///tmp/life.rs";

        let opened = run(
            &executor,
            &state,
            Request::notification(
                "textDocument/didOpen",
                json!({ "textDocument": { "uri": uri, "languageId": "rust", "version": 1, "text": "let a = 1;" } }),
            ),
        );
        assert_eq!(opened.response, Response::Void);
        assert!(opened.request_time.is_some());

        run(
            &executor,
            &state,
            Request::notification(
                "textDocument/didChange",
                json!({
                    "textDocument": { "uri": uri, "version": 2 },
                    "contentChanges": [{
                        "range": { "start": { "line": 0, "character": 4 }, "end": { "line": 0, "character": 5 } },
                        "text": "b"
                    }]
                }),
            ),
        );
        let url = Url::parse(uri).unwrap();
        let doc = state.document(&url).unwrap().unwrap();
        assert_eq!(doc.text, "let b = 1;");
        assert_eq!(doc.version, 2);

        let closed = run(
            &executor,
            &state,
            Request::notification("textDocument/didClose", json!({ "textDocument": { "uri": uri } })),
        );
        assert_eq!(closed.notifications[0].params["diagnostics"], json!([]));
        assert!(state.document(&url).unwrap().is_none());
    }

    #[test]
    fn test_change_unopened_document_is_an_error() {
        let state = state();
        let executor = FeatureExecutor::new(Registry::new(), Vec::new());
        let result = run(
            &executor,
            &state,
            Request::notification(
                "textDocument/didChange",
                json!({ "textDocument": { "uri": "file:///x.rs", "version": 2 }, "contentChanges": [] }),
            ),
        );
        assert_eq!(result.error.unwrap().class, "DocumentNotOpen");
    }
}
