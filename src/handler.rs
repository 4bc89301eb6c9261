//! Message dispatch
//!
//! Routes a decoded message to the handler for its operation. Data access
//! requests resolve their address against the schema and then act on the
//! session's datastore handle. Operations the request processor does not
//! implement (transaction commit among them) decode as `Unsupported` and are
//! answered with an empty success response, never an error.

use std::sync::Arc;

use log::{debug, warn};

use crate::context::RpContext;
use crate::datastore::DatastoreHandle;
use crate::error::{Result, RpError};
use crate::location_id::LocationId;
use crate::message::{Message, Request, RequestBody, Response, SchemaInfo};
use crate::session::{RequestGuard, Session};
use crate::validator::{ResolvedPath, validate};

/// Process a message received on `session`
///
/// Returns the response for a request, or `None` for a response message.
/// Address and datastore failures are returned unchanged; the connection
/// layer can turn them into an error response with [`Response::error`].
pub fn process(
    ctx: &RpContext,
    session: Option<&Arc<Session>>,
    message: Message,
) -> Result<Option<Response>> {
    let Some(session) = session else {
        warn!(
            "refusing {} message {} without a session",
            message.operation(),
            message.correlation_id()
        );
        return Err(RpError::InvalidArgument(
            "a session is required to process a message".into(),
        ));
    };

    match message {
        Message::Request(request) => handle_request(ctx, session, &request).map(Some),
        Message::Response(response) => {
            handle_response(session, &response)?;
            Ok(None)
        }
    }
}

fn handle_request(ctx: &RpContext, session: &Session, request: &Request) -> Result<Response> {
    let guard = session.begin_request()?;
    let operation = request.operation();
    let response = Response::new(request.correlation_id, operation);
    debug!(
        "session {}: {} request {}",
        session.id(),
        operation,
        request.correlation_id
    );

    match &request.body {
        RequestBody::GetItem { xpath } => {
            let item = with_path(ctx, &guard, xpath, |ds, path| ds.get_item(path))?;
            Ok(response.with_items(vec![item]))
        }
        RequestBody::GetItems { xpath } => {
            let items = with_path(ctx, &guard, xpath, |ds, path| ds.get_items(path))?;
            Ok(response.with_items(items))
        }
        RequestBody::SetItem { xpath, value } => {
            with_path(ctx, &guard, xpath, |ds, path| ds.set_item(path, value.clone()))?;
            Ok(response)
        }
        RequestBody::DeleteItem { xpath } => {
            with_path(ctx, &guard, xpath, |ds, path| ds.delete_item(path))?;
            Ok(response)
        }
        RequestBody::DiscardChanges => {
            let fresh = ctx.data_manager().open(session.datastore())?;
            *guard.datastore()? = fresh;
            debug!(
                "session {}: {} datastore changes discarded",
                session.id(),
                session.datastore()
            );
            Ok(response)
        }
        RequestBody::ListSchemas => {
            let schemas = ctx
                .schema()
                .modules()
                .map(|(_, module)| SchemaInfo::from(module))
                .collect();
            Ok(response.with_schemas(schemas))
        }
        RequestBody::SessionStart { .. } | RequestBody::SessionStop => {
            debug!("{} is handled by the connection layer, ignoring", operation);
            Ok(response)
        }
        RequestBody::Unsupported => {
            debug!("{} is not implemented, ignoring", operation);
            Ok(response)
        }
    }
}

/// Resolve `xpath` and run `f` on the session's datastore handle
fn with_path<T>(
    ctx: &RpContext,
    guard: &RequestGuard<'_>,
    xpath: &str,
    f: impl FnOnce(&mut DatastoreHandle, &ResolvedPath<'_>) -> Result<T>,
) -> Result<T> {
    let loc_id = LocationId::parse(xpath)?;
    let path = validate(ctx.schema(), &loc_id)?;
    let mut datastore = guard.datastore()?;
    f(&mut *datastore, &path)
}

fn handle_response(session: &Session, response: &Response) -> Result<()> {
    let _guard = session.begin_request()?;
    if session.complete_request(response.correlation_id) {
        debug!(
            "session {}: {} response {} matched",
            session.id(),
            response.operation,
            response.correlation_id
        );
    } else {
        debug!(
            "session {}: ignoring unsolicited {} response {}",
            session.id(),
            response.operation,
            response.correlation_id
        );
    }
    Ok(())
}
