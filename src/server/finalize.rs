//! Writing a finished request back to the client.

use serde_json::{Map, Value, json};
use tracing::{trace, warn};

use crate::paths;
use crate::protocol::transport::MessageWriter;
use crate::protocol::{Message, Request, ResponseError, methods};
use crate::queue::{ExecutionFailure, JobResult, QueueState, Response};
use crate::version;

/// Writes notifications, the reply and telemetry for one request.
///
/// The whole sequence runs under the queue state lock, so the messages of one
/// request are never interleaved with another's.
pub struct Finalizer {
    home: Option<String>,
}

impl Finalizer {
    pub fn new() -> Self {
        Self::with_home(paths::home_dir_string())
    }

    pub fn with_home(home: Option<String>) -> Self {
        Self { home }
    }

    pub fn finalize(
        &self,
        state: &QueueState,
        writer: &dyn MessageWriter,
        request: &Request,
        result: &JobResult,
    ) {
        state.synchronize(|| {
            for message in self.messages(request, result) {
                if let Err(e) = writer.write(&message) {
                    warn!(method = %request.method, error = %e, "Failed to write message");
                }
            }
        });
    }

    /// The messages `finalize` writes, in order.
    pub fn messages(&self, request: &Request, result: &JobResult) -> Vec<Message> {
        let mut messages: Vec<Message> = result
            .notifications
            .iter()
            .map(|n| Message::notification(n.method.clone(), n.params.clone()))
            .collect();

        match (&result.error, &result.response, &request.id) {
            (Some(failure), _, Some(id)) => messages.push(Message::Error {
                id: Some(id.clone()),
                error: ResponseError {
                    code: failure.code,
                    message: failure.message.clone(),
                    data: Some(request.to_json()),
                },
            }),
            (Some(failure), _, None) => {
                warn!(method = %request.method, class = %failure.class, error = %failure.message, "Notification failed");
            }
            (None, Response::Value(value), Some(id)) => {
                messages.push(Message::response(Some(id.clone()), value.clone()));
            }
            (None, Response::Value(_), None) | (None, Response::Void, _) => {
                trace!(method = %request.method, "No reply");
            }
        }

        if let Some(seconds) = result.request_time {
            messages.push(Message::notification(
                methods::TELEMETRY,
                self.telemetry(request, seconds, result.error.as_ref()),
            ));
        }
        messages
    }

    fn telemetry(
        &self,
        request: &Request,
        seconds: f64,
        failure: Option<&ExecutionFailure>,
    ) -> Value {
        let home = self.home.as_deref();
        let mut params = json!({
            "request": request.method,
            "lspVersion": version::server_version(),
            "requestTime": seconds,
        });

        if let Some(failure) = failure {
            let backtrace: Vec<String> = failure
                .backtrace
                .iter()
                .map(|line| redact_frame(line, home))
                .collect();
            params["errorClass"] = json!(failure.class);
            params["errorMessage"] = json!(failure.message);
            params["params"] = json!(non_document_params(&request.params).to_string());
            params["backtrace"] = json!(backtrace.join("\n"));
        }

        if let Some(uri) = request.document_uri() {
            params["uri"] = json!(paths::redact_uri(uri, home));
        }
        params
    }
}

impl Default for Finalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Request params without `textDocument`, which would leak file contents.
fn non_document_params(params: &Value) -> Value {
    match params {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| key.as_str() != "textDocument")
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect::<Map<_, _>>(),
        ),
        other => other.clone(),
    }
}

/// Redact the home directory at the start of a frame or of its `at <path>` location.
fn redact_frame(line: &str, home: Option<&str>) -> String {
    match line.strip_prefix("at ") {
        Some(location) => format!("at {}", paths::redact_home(location, home)),
        None => paths::redact_home(line, home),
    }
}
