//! Client sessions and the session manager
//!
//! A session binds a user to one datastore and owns a private datastore
//! handle. Requests enter a session through [`Session::begin_request`], which
//! counts them in flight; stopping a session first refuses new requests, then
//! waits for the in-flight count to drop to zero before the handle is
//! released.
//!
//! ```text
//! Active --stop--> Stopping --quiescent--> Stopped
//!                      |
//!                      +--timeout--> Active (stop fails with Busy)
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};
use parking_lot::{Condvar, MappedMutexGuard, Mutex, MutexGuard, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::RpConfig;
use crate::datastore::{DataManager, DatastoreHandle, DatastoreKind};
use crate::error::{Result, RpError};

/// Session identifier, unique within one request processor context
pub type SessionId = u64;

/// Identity of the user behind a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    /// User that authenticated the connection
    pub real: String,
    /// User the session acts on behalf of, if different
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective: Option<String>,
}

impl UserIdentity {
    /// Identity acting as itself
    pub fn new(real: impl Into<String>) -> Self {
        Self {
            real: real.into(),
            effective: None,
        }
    }

    /// Identity acting on behalf of `effective`
    pub fn with_effective(real: impl Into<String>, effective: impl Into<String>) -> Self {
        Self {
            real: real.into(),
            effective: Some(effective.into()),
        }
    }

    /// The user access decisions are made for
    pub fn effective(&self) -> &str {
        self.effective.as_deref().unwrap_or(&self.real)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Active,
    Stopping,
    Stopped,
}

#[derive(Debug)]
struct Lifecycle {
    state: SessionState,
    in_flight: usize,
}

/// One client session
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user: UserIdentity,
    datastore: DatastoreKind,
    correlation_id: u64,
    next_request_id: AtomicU64,
    /// Ids of requests sent to the client that still await a response
    pending: Mutex<HashSet<u64>>,
    lifecycle: Mutex<Lifecycle>,
    quiescent: Condvar,
    handle: Mutex<Option<DatastoreHandle>>,
}

impl Session {
    fn new(
        id: SessionId,
        user: UserIdentity,
        datastore: DatastoreKind,
        correlation_id: u64,
        handle: DatastoreHandle,
    ) -> Self {
        Self {
            id,
            user,
            datastore,
            correlation_id,
            next_request_id: AtomicU64::new(correlation_id),
            pending: Mutex::new(HashSet::new()),
            lifecycle: Mutex::new(Lifecycle {
                state: SessionState::Active,
                in_flight: 0,
            }),
            quiescent: Condvar::new(),
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// User behind the session
    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Datastore the session is bound to
    pub fn datastore(&self) -> DatastoreKind {
        self.datastore
    }

    /// Correlation id the connection layer assigned to this session
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    /// Check if the session accepts requests
    pub fn is_active(&self) -> bool {
        self.lifecycle.lock().state == SessionState::Active
    }

    /// Number of requests currently executing on this session
    pub fn in_flight(&self) -> usize {
        self.lifecycle.lock().in_flight
    }

    /// Register a request in flight
    ///
    /// Fails with `Busy` while the session is being stopped and with
    /// `InvalidArgument` once it has been stopped.
    pub fn begin_request(&self) -> Result<RequestGuard<'_>> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            SessionState::Active => {
                lifecycle.in_flight += 1;
                Ok(RequestGuard { session: self })
            }
            SessionState::Stopping => Err(RpError::Busy(format!(
                "session {} is being stopped",
                self.id
            ))),
            SessionState::Stopped => Err(RpError::InvalidArgument(format!(
                "session {} has been stopped",
                self.id
            ))),
        }
    }

    /// Allocate an id for a request sent to the client and await its response
    pub fn next_request_id(&self) -> u64 {
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(id);
        id
    }

    /// Match a response from the client; false if nothing awaited `id`
    pub fn complete_request(&self, id: u64) -> bool {
        self.pending.lock().remove(&id)
    }

    fn begin_teardown(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != SessionState::Active {
            return Err(RpError::InvalidArgument(format!(
                "session {} is already stopped",
                self.id
            )));
        }
        lifecycle.state = SessionState::Stopping;
        Ok(())
    }

    /// Wait until no request is in flight; false if `timeout` elapsed first
    fn wait_quiescent(&self, timeout: Option<Duration>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        let deadline = timeout.map(|t| Instant::now() + t);

        while lifecycle.in_flight > 0 {
            match deadline {
                Some(deadline) => {
                    if self
                        .quiescent
                        .wait_until(&mut lifecycle, deadline)
                        .timed_out()
                    {
                        return lifecycle.in_flight == 0;
                    }
                }
                None => self.quiescent.wait(&mut lifecycle),
            }
        }
        true
    }

    fn abort_teardown(&self) {
        self.lifecycle.lock().state = SessionState::Active;
    }

    fn release(&self) {
        self.lifecycle.lock().state = SessionState::Stopped;
        self.handle.lock().take();
        self.pending.lock().clear();
    }
}

/// Marks one request in flight on a session; dropping it ends the request
#[derive(Debug)]
pub struct RequestGuard<'a> {
    session: &'a Session,
}

impl<'a> RequestGuard<'a> {
    /// Session the request runs on
    pub fn session(&self) -> &'a Session {
        self.session
    }

    /// Lock the session's datastore handle
    pub fn datastore(&self) -> Result<MappedMutexGuard<'a, DatastoreHandle>> {
        MutexGuard::try_map(self.session.handle.lock(), Option::as_mut).map_err(|_| {
            RpError::Busy(format!(
                "datastore handle of session {} was released",
                self.session.id
            ))
        })
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        let mut lifecycle = self.session.lifecycle.lock();
        lifecycle.in_flight -= 1;
        if lifecycle.in_flight == 0 {
            self.session.quiescent.notify_all();
        }
    }
}

/// Owner of the set of live sessions
#[derive(Debug)]
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
    max_sessions: usize,
    stop_timeout: Option<Duration>,
}

impl SessionManager {
    /// Create an empty session table
    pub fn new(config: &RpConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_sessions: config.max_sessions,
            stop_timeout: config.stop_timeout(),
        }
    }

    /// Start a session bound to `datastore`
    pub fn start(
        &self,
        data: &DataManager,
        datastore: DatastoreKind,
        user: UserIdentity,
        correlation_id: u64,
    ) -> Result<Arc<Session>> {
        if self.count() >= self.max_sessions {
            return Err(self.exhausted());
        }

        // opening the handle may block, keep it outside the session lock
        let handle = data.open(datastore)?;

        let mut sessions = self.sessions.write();
        if sessions.len() >= self.max_sessions {
            return Err(self.exhausted());
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session::new(id, user, datastore, correlation_id, handle));
        sessions.insert(id, Arc::clone(&session));
        drop(sessions);

        debug!(
            "session {} started for user '{}' on {} datastore",
            id,
            session.user().effective(),
            datastore
        );
        Ok(session)
    }

    /// Stop a session, waiting for its in-flight requests to finish
    pub fn stop(&self, session: &Arc<Session>) -> Result<()> {
        self.stop_with_timeout(session, self.stop_timeout)
    }

    /// Stop every live session, waiting as long as needed
    pub fn stop_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        for session in sessions {
            // a concurrent stop may have won the race
            if let Err(e) = self.stop_with_timeout(&session, None) {
                debug!("session {} not stopped during teardown: {}", session.id(), e);
            }
        }
    }

    /// Look up a live session
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Number of live sessions
    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    fn stop_with_timeout(&self, session: &Arc<Session>, timeout: Option<Duration>) -> Result<()> {
        let known = self
            .sessions
            .read()
            .get(&session.id())
            .is_some_and(|live| Arc::ptr_eq(live, session));
        if !known {
            return Err(RpError::InvalidArgument(format!(
                "session {} is unknown or already stopped",
                session.id()
            )));
        }

        session.begin_teardown()?;
        if !session.wait_quiescent(timeout) {
            session.abort_teardown();
            warn!(
                "session {} still has {} request(s) in flight, stop refused",
                session.id(),
                session.in_flight()
            );
            return Err(RpError::Busy(format!(
                "session {} has requests in flight",
                session.id()
            )));
        }

        self.sessions.write().remove(&session.id());
        session.release();
        debug!("session {} stopped", session.id());
        Ok(())
    }

    fn exhausted(&self) -> RpError {
        warn!("session limit of {} reached", self.max_sessions);
        RpError::ResourceExhausted(format!(
            "session limit of {} reached",
            self.max_sessions
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::schema::SchemaGraph;

    const SAMPLE_SCHEMA: &str = r#"{
        "modules": [
            {"name": "example-module", "nodes": [
                {"name": "container", "kind": "container", "children": [
                    {"name": "leaf", "kind": "leaf"}
                ]}
            ]}
        ]
    }"#;

    fn setup(config: RpConfig) -> (SessionManager, DataManager) {
        let schema = Arc::new(SAMPLE_SCHEMA.parse::<SchemaGraph>().unwrap());
        let data = DataManager::new(schema, &config.datastores);
        (SessionManager::new(&config), data)
    }

    #[test]
    fn test_start_stop() {
        let (sm, dm) = setup(RpConfig::default());
        let session = sm
            .start(
                &dm,
                DatastoreKind::Startup,
                UserIdentity::with_effective("root", "alice"),
                123456,
            )
            .unwrap();

        assert_eq!(sm.count(), 1);
        assert_eq!(session.user().effective(), "alice");
        assert_eq!(session.correlation_id(), 123456);
        assert!(sm.get(session.id()).is_some());

        sm.stop(&session).unwrap();
        assert_eq!(sm.count(), 0);
        assert!(!session.is_active());
        assert!(matches!(sm.stop(&session), Err(RpError::InvalidArgument(_))));
        assert!(matches!(
            session.begin_request(),
            Err(RpError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_ids_are_not_reused() {
        let (sm, dm) = setup(RpConfig::default());
        let first = sm
            .start(&dm, DatastoreKind::Running, UserIdentity::new("root"), 1)
            .unwrap();
        sm.stop(&first).unwrap();
        let second = sm
            .start(&dm, DatastoreKind::Running, UserIdentity::new("root"), 1)
            .unwrap();

        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_session_limit() {
        let config = RpConfig {
            max_sessions: 2,
            ..RpConfig::default()
        };
        let (sm, dm) = setup(config);
        let user = UserIdentity::new("root");

        let a = sm.start(&dm, DatastoreKind::Startup, user.clone(), 1).unwrap();
        let _b = sm.start(&dm, DatastoreKind::Startup, user.clone(), 2).unwrap();
        assert!(matches!(
            sm.start(&dm, DatastoreKind::Startup, user.clone(), 3),
            Err(RpError::ResourceExhausted(_))
        ));

        sm.stop(&a).unwrap();
        assert!(sm.start(&dm, DatastoreKind::Startup, user, 4).is_ok());
    }

    #[test]
    fn test_disabled_datastore() {
        let config = RpConfig {
            datastores: vec![DatastoreKind::Running],
            ..RpConfig::default()
        };
        let (sm, dm) = setup(config);

        assert!(matches!(
            sm.start(&dm, DatastoreKind::Candidate, UserIdentity::new("root"), 1),
            Err(RpError::InvalidArgument(_))
        ));
        assert_eq!(sm.count(), 0);
    }

    #[test]
    fn test_stop_times_out_while_busy() {
        let config = RpConfig {
            stop_timeout_ms: Some(20),
            ..RpConfig::default()
        };
        let (sm, dm) = setup(config);
        let session = sm
            .start(&dm, DatastoreKind::Startup, UserIdentity::new("root"), 1)
            .unwrap();

        let guard = session.begin_request().unwrap();
        assert!(matches!(sm.stop(&session), Err(RpError::Busy(_))));
        assert!(session.is_active());
        assert!(guard.datastore().is_ok());

        drop(guard);
        sm.stop(&session).unwrap();
        assert_eq!(sm.count(), 0);
    }

    #[test]
    fn test_stop_waits_for_in_flight_request() {
        let (sm, dm) = setup(RpConfig::default());
        let session = sm
            .start(&dm, DatastoreKind::Startup, UserIdentity::new("root"), 1)
            .unwrap();
        let guard = session.begin_request().unwrap();

        thread::scope(|s| {
            let stopper = s.spawn(|| sm.stop(&session));

            // wait until the stop is in progress
            while session.is_active() {
                thread::yield_now();
            }
            assert!(matches!(session.begin_request(), Err(RpError::Busy(_))));
            assert!(guard.datastore().is_ok());
            drop(guard);

            stopper.join().unwrap().unwrap();
        });

        assert_eq!(sm.count(), 0);
    }

    #[test]
    fn test_correlation() {
        let (sm, dm) = setup(RpConfig::default());
        let session = sm
            .start(&dm, DatastoreKind::Startup, UserIdentity::new("root"), 500)
            .unwrap();

        let first = session.next_request_id();
        let second = session.next_request_id();
        assert_eq!(first, 500);
        assert_eq!(second, 501);

        assert!(session.complete_request(second));
        assert!(!session.complete_request(second));
        assert!(!session.complete_request(42));
        assert!(session.complete_request(first));
    }
}
