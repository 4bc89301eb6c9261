//! yang-rp - Request processor for a YANG-modeled configuration datastore
//!
//! This library accepts client sessions, dispatches decoded request messages
//! and resolves XPath-like addresses (location identifiers) against a loaded
//! YANG schema graph before touching session datastores. It also rebuilds
//! canonical addresses for data nodes.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use yang_rp::{DatastoreKind, RpConfig, RpContext, SchemaGraph, UserIdentity};
//! use yang_rp::message::{Message, RequestBody};
//!
//! // Load the compiled schema
//! let schema = Arc::new(SchemaGraph::from_file("schema.json").unwrap());
//!
//! // Create the request processor context
//! let ctx = RpContext::new(RpConfig::default(), schema).unwrap();
//!
//! // Start a session and process a request
//! let session = ctx
//!     .start_session(DatastoreKind::Running, UserIdentity::new("alice"), 1)
//!     .unwrap();
//! let request = Message::request(
//!     1,
//!     RequestBody::GetItem { xpath: "/example-module:container".into() },
//! );
//! let response = ctx.process(Some(&session), request).unwrap();
//!
//! ctx.stop_session(&session).unwrap();
//! ctx.cleanup();
//! ```

mod config;
mod context;
pub mod data;
pub mod datastore;
mod error;
pub mod handler;
pub mod location_id;
pub mod message;
pub mod schema;
pub mod session;
pub mod validator;
pub mod xpath;

pub use config::RpConfig;
pub use context::RpContext;
pub use data::{DataNodeId, DataTree};
pub use datastore::{DataManager, DatastoreHandle, DatastoreKind, Item};
pub use error::{ErrorCode, Result, RpError};
pub use location_id::LocationId;
pub use schema::{NodeKind, SchemaGraph};
pub use session::{Session, SessionId, SessionManager, UserIdentity};
pub use validator::{ResolvedPath, validate};
