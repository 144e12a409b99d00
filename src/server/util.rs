use axum::{body::Bytes, extract::rejection::BytesRejection};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::ApiError;

/// Request body as extracted; buffering can fail when it exceeds the size limit.
pub type RawBody = Result<Bytes, BytesRejection>;

/// A decoded POST body: the requested action plus the whole object for
/// action-specific fields.
pub struct ActionBody {
    pub action: String,
    fields: Map<String, Value>,
}

impl ActionBody {
    pub fn read(body: RawBody) -> Result<Self, ApiError> {
        let body = body.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
        Self::parse(&body)
    }

    /// Empty bodies are a client error; anything that is not a JSON object is internal.
    pub fn parse(body: &Bytes) -> Result<Self, ApiError> {
        if body.is_empty() {
            return Err(ApiError::bad_request("No data"));
        }
        let value: Value = serde_json::from_slice(body).map_err(ApiError::internal)?;
        let Value::Object(fields) = value else {
            return Err(ApiError::internal(anyhow::anyhow!(
                "request body must be a JSON object"
            )));
        };
        let action = fields
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(Self { action, fields })
    }

    /// Decode the fields a known action needs; a missing field is an internal error.
    pub fn args<T: DeserializeOwned>(self) -> Result<T, ApiError> {
        serde_json::from_value(Value::Object(self.fields)).map_err(ApiError::internal)
    }
}
