//! Request processor context

use std::sync::Arc;

use log::info;

use crate::config::RpConfig;
use crate::datastore::{DataManager, DatastoreKind};
use crate::error::Result;
use crate::handler;
use crate::message::{Message, Response};
use crate::schema::SchemaGraph;
use crate::session::{Session, SessionManager, UserIdentity};

/// Process-wide state of the request processor
///
/// Created once with [`RpContext::new`] and torn down once with
/// [`RpContext::cleanup`], which consumes it. Share it between threads by
/// reference or behind an `Arc`.
#[derive(Debug)]
pub struct RpContext {
    config: RpConfig,
    schema: Arc<SchemaGraph>,
    data: DataManager,
    sessions: SessionManager,
}

impl RpContext {
    /// Initialize a context over a loaded schema graph
    pub fn new(config: RpConfig, schema: Arc<SchemaGraph>) -> Result<Self> {
        config.validate()?;
        let data = DataManager::new(Arc::clone(&schema), &config.datastores);
        let sessions = SessionManager::new(&config);

        info!(
            "request processor initialized: {} module(s), datastores {:?}, max {} sessions",
            schema.modules().count(),
            config.datastores,
            config.max_sessions
        );
        Ok(Self {
            config,
            schema,
            data,
            sessions,
        })
    }

    /// Configuration the context was created with
    pub fn config(&self) -> &RpConfig {
        &self.config
    }

    /// Loaded schema graph
    pub fn schema(&self) -> &SchemaGraph {
        &self.schema
    }

    /// Datastore content shared by all sessions
    pub fn data_manager(&self) -> &DataManager {
        &self.data
    }

    /// Live sessions
    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Start a session bound to `datastore`
    pub fn start_session(
        &self,
        datastore: DatastoreKind,
        user: UserIdentity,
        correlation_id: u64,
    ) -> Result<Arc<Session>> {
        self.sessions
            .start(&self.data, datastore, user, correlation_id)
    }

    /// Stop a session once its in-flight requests have finished
    pub fn stop_session(&self, session: &Arc<Session>) -> Result<()> {
        self.sessions.stop(session)
    }

    /// Process a message received on `session`, see [`handler::process`]
    pub fn process(
        &self,
        session: Option<&Arc<Session>>,
        message: Message,
    ) -> Result<Option<Response>> {
        handler::process(self, session, message)
    }

    /// Stop all sessions and release the context
    pub fn cleanup(self) {
        let live = self.sessions.count();
        self.sessions.stop_all();
        info!("request processor cleaned up, {} session(s) stopped", live);
    }
}
