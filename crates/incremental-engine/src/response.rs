//! Response and streaming payload shapes.

use query_path::QueryPath;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ServerError;

/// A complete, non-incremental response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// `None` when a non-null violation bubbled all the way to the root.
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,
}

impl Response {
    pub fn new(data: Option<Value>, errors: Vec<ServerError>) -> Self {
        Self { data, errors }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub(crate) fn into_streaming_payload(self, has_next: bool) -> StreamingPayload {
        StreamingPayload::InitialResponse(InitialResponse {
            data: self.data,
            errors: self.errors,
            has_next,
        })
    }
}

/// The first payload of an incremental response stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitialResponse {
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,
    pub has_next: bool,
}

/// One deferred group's delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncrementalPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub path: QueryPath,
    /// `None` when a non-null violation inside the group bubbled to the
    /// group root. Always serialized, as `null`, so clients can tell the
    /// group failed rather than never arrived.
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ServerError>,
    pub has_next: bool,
}

/// An element of the stream produced by
/// [`Engine::execute_stream`](crate::executor::Engine::execute_stream).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StreamingPayload {
    InitialResponse(InitialResponse),
    Incremental(IncrementalPayload),
}
