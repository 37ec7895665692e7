use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Request;

/// A queued request and its cancellation flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub request: Request,
    pub cancelled: bool,
}

/// What a request produced for the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Response {
    /// Nothing is written back. Used for notifications.
    Void,
    Value(Value),
}

/// A side message written before the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub method: String,
    pub params: Value,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// A captured execution failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionFailure {
    pub class: String,
    pub message: String,
    pub code: i64,
    pub backtrace: Vec<String>,
}

/// Outcome of executing one request. Built once by the executor, then only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub response: Response,
    pub notifications: Vec<Notification>,
    pub error: Option<ExecutionFailure>,
    /// Wall-clock execution time in seconds. Telemetry is only sent when set.
    pub request_time: Option<f64>,
}

impl JobResult {
    pub fn void() -> Self {
        Self::with_response(Response::Void)
    }

    /// A `null` reply, used for cancelled jobs and the shutdown request.
    pub fn null() -> Self {
        Self::value(Value::Null)
    }

    pub fn value(value: Value) -> Self {
        Self::with_response(Response::Value(value))
    }

    pub fn failed(failure: ExecutionFailure) -> Self {
        Self {
            error: Some(failure),
            ..Self::null()
        }
    }

    fn with_response(response: Response) -> Self {
        Self {
            response,
            notifications: Vec::new(),
            error: None,
            request_time: None,
        }
    }

    pub fn with_notifications(mut self, notifications: Vec<Notification>) -> Self {
        self.notifications = notifications;
        self
    }

    pub fn timed(mut self, seconds: f64) -> Self {
        self.request_time = Some(seconds);
        self
    }
}
