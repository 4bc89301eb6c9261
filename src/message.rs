//! Decoded request and response messages
//!
//! Envelope encoding belongs to the connection layer; these are the typed
//! messages it hands to the request processor.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::datastore::{DatastoreKind, Item};
use crate::error::{ErrorCode, RpError};
use crate::schema::Module;

/// Operation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    SessionStart,
    SessionStop,
    GetItem,
    GetItems,
    SetItem,
    DeleteItem,
    /// Reset the session's datastore handle to the datastore content
    DiscardChanges,
    ListSchemas,
    /// Any operation this version does not know
    #[serde(other)]
    Unsupported,
}

impl Operation {
    /// Operation name as it appears on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::SessionStart => "session-start",
            Operation::SessionStop => "session-stop",
            Operation::GetItem => "get-item",
            Operation::GetItems => "get-items",
            Operation::SetItem => "set-item",
            Operation::DeleteItem => "delete-item",
            Operation::DiscardChanges => "discard-changes",
            Operation::ListSchemas => "list-schemas",
            Operation::Unsupported => "unsupported",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific request payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "kebab-case")]
pub enum RequestBody {
    /// Handled by the connection layer, carried for protocol symmetry
    SessionStart {
        #[serde(default)]
        datastore: Option<DatastoreKind>,
        #[serde(default)]
        user: Option<String>,
    },
    SessionStop,
    GetItem {
        xpath: String,
    },
    GetItems {
        xpath: String,
    },
    SetItem {
        xpath: String,
        #[serde(default)]
        value: Option<String>,
    },
    DeleteItem {
        xpath: String,
    },
    DiscardChanges,
    ListSchemas,
    #[serde(other)]
    Unsupported,
}

impl RequestBody {
    /// Operation kind of this payload
    pub fn operation(&self) -> Operation {
        match self {
            RequestBody::SessionStart { .. } => Operation::SessionStart,
            RequestBody::SessionStop => Operation::SessionStop,
            RequestBody::GetItem { .. } => Operation::GetItem,
            RequestBody::GetItems { .. } => Operation::GetItems,
            RequestBody::SetItem { .. } => Operation::SetItem,
            RequestBody::DeleteItem { .. } => Operation::DeleteItem,
            RequestBody::DiscardChanges => Operation::DiscardChanges,
            RequestBody::ListSchemas => Operation::ListSchemas,
            RequestBody::Unsupported => Operation::Unsupported,
        }
    }
}

/// A request from a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Id the response will carry back
    pub correlation_id: u64,
    pub body: RequestBody,
}

impl Request {
    /// Create a request
    pub fn new(correlation_id: u64, body: RequestBody) -> Self {
        Self {
            correlation_id,
            body,
        }
    }

    /// Operation kind of the request
    pub fn operation(&self) -> Operation {
        self.body.operation()
    }
}

/// A loaded schema module as reported by `list-schemas`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<String>,
}

impl From<&Module> for SchemaInfo {
    fn from(module: &Module) -> Self {
        Self {
            module: module.name().to_string(),
            revision: module.revision().map(str::to_string),
        }
    }
}

/// A response to a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub correlation_id: u64,
    pub operation: Operation,
    #[serde(default)]
    pub code: ErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schemas: Vec<SchemaInfo>,
}

impl Response {
    /// Create an empty success response
    pub fn new(correlation_id: u64, operation: Operation) -> Self {
        Self {
            correlation_id,
            operation,
            code: ErrorCode::Ok,
            error: None,
            items: Vec::new(),
            schemas: Vec::new(),
        }
    }

    /// Create an error response for a failed request
    pub fn error(correlation_id: u64, operation: Operation, err: &RpError) -> Self {
        Self {
            code: err.code(),
            error: Some(err.to_string()),
            ..Self::new(correlation_id, operation)
        }
    }

    /// Attach the items of a get request
    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    /// Attach the module list of a `list-schemas` request
    pub fn with_schemas(mut self, schemas: Vec<SchemaInfo>) -> Self {
        self.schemas = schemas;
        self
    }

    /// Check if the response reports success
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}

/// A decoded message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    /// Create a request message
    pub fn request(correlation_id: u64, body: RequestBody) -> Self {
        Message::Request(Request::new(correlation_id, body))
    }

    /// Create an empty success response message
    pub fn response(correlation_id: u64, operation: Operation) -> Self {
        Message::Response(Response::new(correlation_id, operation))
    }

    /// Operation kind of the message
    pub fn operation(&self) -> Operation {
        match self {
            Message::Request(request) => request.operation(),
            Message::Response(response) => response.operation,
        }
    }

    /// Correlation id of the message
    pub fn correlation_id(&self) -> u64 {
        match self {
            Message::Request(request) => request.correlation_id,
            Message::Response(response) => response.correlation_id,
        }
    }
}
