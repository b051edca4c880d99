//! Token-keyed enrollment sessions for callers that drive a capture
//! protocol across several requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use uuid::Uuid;

use faceprint_core::{
    CaptureProgress, Embedder, EmbeddingStore, EnrollmentSession, SessionStatus,
};

use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedSession {
    pub session_token: Uuid,
    pub next_pose: String,
}

/// Active sessions plus the embedder and store they share.
///
/// Each token maps to its own [`EnrollmentSession`]; sessions for the same
/// identity never see each other's captures. A session leaves the registry
/// once it is persisted or aborted.
pub struct SessionRegistry {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn EmbeddingStore>,
    poses: Vec<String>,
    dimension: Option<usize>,
    sessions: Mutex<HashMap<Uuid, Slot>>,
}

enum Slot {
    Idle(EnrollmentSession),
    /// The embedder is running with the session checked out.
    Capturing {
        status: SessionStatus,
        abort_requested: bool,
    },
    /// The final write is running with the session checked out.
    Persisting,
}

impl SessionRegistry {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn EmbeddingStore>,
        poses: Vec<String>,
    ) -> Self {
        Self {
            embedder,
            store,
            poses,
            dimension: None,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_dimension(mut self, dimension: Option<usize>) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn poses(&self) -> &[String] {
        &self.poses
    }

    pub fn start(&self, name: &str) -> AppResult<StartedSession> {
        let session =
            EnrollmentSession::start(name, self.poses.clone())?.with_dimension(self.dimension);
        let next_pose = session.current_pose().unwrap_or_default().to_string();
        let token = Uuid::new_v4();
        self.lock().insert(token, Slot::Idle(session));
        tracing::debug!(%token, identity = name.trim(), "registered enrollment session");
        Ok(StartedSession {
            session_token: token,
            next_pose,
        })
    }

    /// Feeds one image to the session behind `token`.
    ///
    /// The registry lock is not held while the embedder runs. An abort that
    /// arrives during extraction is honoured before anything is written, and
    /// this call then fails with [`AppError::SessionClosed`].
    pub fn submit(&self, token: Uuid, image: &[u8]) -> AppResult<CaptureProgress> {
        let mut session = self.checkout(token, |session| Slot::Capturing {
            status: session.status(),
            abort_requested: false,
        })?;
        let result = session.capture(image, &*self.embedder);

        {
            let mut sessions = self.lock();
            let aborted = matches!(
                sessions.get(&token),
                Some(Slot::Capturing {
                    abort_requested: true,
                    ..
                })
            );
            if aborted {
                sessions.remove(&token);
                tracing::info!(
                    %token,
                    identity = session.identity(),
                    "enrollment aborted during capture"
                );
                return Err(AppError::SessionClosed {
                    identity: session.identity().to_string(),
                    status: SessionStatus::Aborted.label(),
                });
            }
            if matches!(result, Ok(CaptureProgress::Done)) {
                sessions.insert(token, Slot::Persisting);
            }
        }

        if matches!(result, Ok(CaptureProgress::Done)) {
            let persisted = session.retry_persist(&*self.store);
            self.check_in(token, session);
            return persisted.map(|()| CaptureProgress::Done);
        }
        self.check_in(token, session);
        result
    }

    /// Persist-only retry for a session whose final write failed.
    pub fn retry_persist(&self, token: Uuid) -> AppResult<()> {
        let mut session = self.checkout(token, |_| Slot::Persisting)?;
        let result = session.retry_persist(&*self.store);
        self.check_in(token, session);
        result
    }

    /// Aborts the session behind `token`.
    ///
    /// During a capture the abort is recorded and reported as `Aborted`; the
    /// capture then discards the session instead of persisting it. A session
    /// whose final write is already running is left to finish.
    pub fn abort(&self, token: Uuid) -> AppResult<SessionStatus> {
        let mut sessions = self.lock();
        let slot = sessions.get_mut(&token).ok_or_else(|| not_found(token))?;
        let (status, close) = match slot {
            Slot::Idle(session) => {
                session.abort();
                let status = session.status();
                (status, status == SessionStatus::Aborted)
            }
            Slot::Capturing {
                abort_requested, ..
            } => {
                *abort_requested = true;
                tracing::debug!(%token, "abort requested during capture");
                (SessionStatus::Aborted, false)
            }
            Slot::Persisting => (SessionStatus::Completed { persisted: false }, false),
        };
        if close {
            sessions.remove(&token);
            tracing::debug!(%token, "session closed");
        }
        Ok(status)
    }

    pub fn status(&self, token: Uuid) -> AppResult<SessionStatus> {
        match self.lock().get(&token) {
            Some(Slot::Idle(session)) => Ok(session.status()),
            Some(Slot::Capturing {
                abort_requested: true,
                ..
            }) => Ok(SessionStatus::Aborted),
            Some(Slot::Capturing { status, .. }) => Ok(*status),
            Some(Slot::Persisting) => Ok(SessionStatus::Completed { persisted: false }),
            None => Err(not_found(token)),
        }
    }

    pub fn active(&self) -> usize {
        self.lock().len()
    }

    /// Takes the session out of its slot, leaving `in_flight` in its place.
    fn checkout<F>(&self, token: Uuid, in_flight: F) -> AppResult<EnrollmentSession>
    where
        F: FnOnce(&EnrollmentSession) -> Slot,
    {
        let mut sessions = self.lock();
        let slot = sessions.get_mut(&token).ok_or_else(|| not_found(token))?;
        match std::mem::replace(slot, Slot::Persisting) {
            Slot::Idle(session) => {
                *slot = in_flight(&session);
                Ok(session)
            }
            busy => {
                *slot = busy;
                Err(AppError::CaptureInProgress {
                    token: token.to_string(),
                })
            }
        }
    }

    fn check_in(&self, token: Uuid, session: EnrollmentSession) {
        match session.status() {
            SessionStatus::AwaitingPose { .. } | SessionStatus::Completed { persisted: false } => {
                self.lock().insert(token, Slot::Idle(session));
            }
            SessionStatus::Completed { persisted: true } | SessionStatus::Aborted => {
                self.lock().remove(&token);
                tracing::debug!(%token, status = %session.status(), "session closed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn not_found(token: Uuid) -> AppError {
    AppError::SessionNotFound {
        token: token.to_string(),
    }
}
