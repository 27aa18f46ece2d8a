//! Transport-neutral request handling: raw JSON in, status code and JSON
//! body out. A thin HTTP layer only has to copy these onto the wire.

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{ServiceError, Services};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Register,
    Decide,
    Record,
}

impl Operation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Register => "register",
            Operation::Decide => "decide",
            Operation::Record => "record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(rename = "status_code")]
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    fn created(mut body: Value) -> Self {
        if let Value::Object(map) = &mut body {
            map.insert("status".into(), json!("success"));
        }
        Self { status: 201, body }
    }

    fn failed(err: &ServiceError) -> Self {
        Self {
            status: err.status(),
            body: json!({"status": "failed", "message": err.public_message()}),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Front door for the three request operations.
#[derive(Clone)]
pub struct Api {
    services: Services,
}

impl Api {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn register(&self, body: &Value) -> ApiResponse {
        self.handle(Operation::Register, body)
    }

    pub fn decide(&self, body: &Value) -> ApiResponse {
        self.handle(Operation::Decide, body)
    }

    pub fn record(&self, body: &Value) -> ApiResponse {
        self.handle(Operation::Record, body)
    }

    /// Runs `op` and shapes the result. Panics inside a service or policy
    /// become a 500 like any other fault; no partial write survives because
    /// every store write is a single insert.
    pub fn handle(&self, op: Operation, body: &Value) -> ApiResponse {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(op, body)));
        let result = outcome.unwrap_or_else(|payload| {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ServiceError::Internal(format!("panic: {detail}")))
        });

        match result {
            Ok(body) => ApiResponse::created(body),
            Err(err) => {
                if err.is_fault() {
                    tracing::error!(operation = op.as_str(), "{err}");
                } else {
                    tracing::info!(operation = op.as_str(), status = err.status(), "{err}");
                }
                ApiResponse::failed(&err)
            }
        }
    }

    fn dispatch(&self, op: Operation, body: &Value) -> Result<Value, ServiceError> {
        match op {
            Operation::Register => {
                let unit = self.services.registration.register(body)?;
                Ok(json!({"unit_id": unit.unit_id, "kind": unit.kind}))
            }
            Operation::Decide => {
                let response = self.services.decision.decide(body)?;
                serde_json::to_value(response).map_err(|e| ServiceError::Internal(e.to_string()))
            }
            Operation::Record => {
                self.services.outcome.record(body)?;
                Ok(json!({}))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::INTERNAL_MESSAGE;

    #[test]
    fn created_marks_success() {
        let resp = ApiResponse::created(json!({"unit_id": "d1"}));
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body["status"], "success");
        assert!(resp.is_success());
    }

    #[test]
    fn failures_hide_internal_detail() {
        let resp = ApiResponse::failed(&ServiceError::Internal("disk on fire".into()));
        assert_eq!(resp.status, 500);
        assert_eq!(
            resp.body,
            json!({"status": "failed", "message": INTERNAL_MESSAGE})
        );
    }

    #[test]
    fn response_serializes_with_status_code() {
        let resp = ApiResponse::failed(&ServiceError::NotFound("Participant unit not found.".into()));
        let text = serde_json::to_string(&resp).expect("serialize");
        assert!(text.contains("\"status_code\":404"));
    }
}
