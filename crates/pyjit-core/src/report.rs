//! Result reporter
//!
//! Maps an [`ExecutionOutcome`] to the status and JSON body returned to the
//! caller. Every message comes from an error's `Display`, none of which
//! include local paths.

use crate::outcome::ExecutionOutcome;
use crate::stager::FetchError;
use serde::Serialize;

pub const SUCCESS_MESSAGE: &str = "Code executed successfully";
pub const FETCH_FAILED_MESSAGE: &str = "Failed to fetch data from the provided URL";

/// JSON body: `{"result": ...}` or `{"error": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    Result(String),
    Error(String),
}

/// Status and body for one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseEnvelope {
    pub status: u16,
    pub body: ResponseBody,
}

impl ResponseEnvelope {
    fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ResponseBody::Error(message.into()),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.body).unwrap_or_else(|_| serde_json::json!({}))
    }
}

pub fn report(outcome: &ExecutionOutcome) -> ResponseEnvelope {
    match outcome {
        ExecutionOutcome::Success => ResponseEnvelope {
            status: 200,
            body: ResponseBody::Result(SUCCESS_MESSAGE.to_string()),
        },
        ExecutionOutcome::FetchFailed(FetchError::Status(_)) => {
            ResponseEnvelope::error(400, FETCH_FAILED_MESSAGE)
        }
        ExecutionOutcome::FetchFailed(e) => ResponseEnvelope::error(500, e.to_string()),
        ExecutionOutcome::ValidationRejected(e) => ResponseEnvelope::error(500, e.to_string()),
        ExecutionOutcome::RuntimeFailed(e) => ResponseEnvelope::error(500, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pyjit_sandbox::{RuntimeError, ValidationError};
    use serde_json::json;

    #[test]
    fn test_success() {
        let envelope = report(&ExecutionOutcome::Success);
        assert_eq!(envelope.status, 200);
        assert_eq!(envelope.to_json(), json!({"result": "Code executed successfully"}));
    }

    #[test]
    fn test_non_2xx_fetch_is_400() {
        let envelope = report(&ExecutionOutcome::FetchFailed(FetchError::Status(404)));
        assert_eq!(envelope.status, 400);
        assert_eq!(
            envelope.to_json(),
            json!({"error": "Failed to fetch data from the provided URL"})
        );
    }

    #[test]
    fn test_other_failures_are_500() {
        let outcomes = [
            ExecutionOutcome::FetchFailed(FetchError::MissingUrl),
            ExecutionOutcome::FetchFailed(FetchError::Transport("connection refused".into())),
            ExecutionOutcome::ValidationRejected(ValidationError::Forbidden {
                construct: "import os".into(),
                line: 1,
            }),
            ExecutionOutcome::RuntimeFailed(RuntimeError::ZeroDivision(
                "division by zero".into(),
            )),
        ];
        for outcome in &outcomes {
            let envelope = report(outcome);
            assert_eq!(envelope.status, 500);
            let ResponseBody::Error(message) = &envelope.body else {
                panic!("expected an error body");
            };
            assert!(!message.is_empty());
        }
    }

    #[test]
    fn test_error_message_is_display() {
        let envelope = report(&ExecutionOutcome::ValidationRejected(
            ValidationError::Forbidden {
                construct: "import os".into(),
                line: 1,
            },
        ));
        assert_eq!(
            envelope.to_json(),
            json!({"error": "Forbidden construct: import os (line 1)"})
        );
    }
}
