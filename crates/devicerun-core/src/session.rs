//! Device session lifecycle.
//!
//! A [`DeviceSession`] wraps the [`DeviceClient`] for one connected
//! device/app instance and tracks its lifecycle. It is owned by exactly one
//! orchestrator for the duration of one run and must be closed when the run
//! ends, whatever the outcome. [`DeviceSession::close`] is idempotent, so the
//! orchestrator can call it unconditionally on every exit path, and
//! [`DeviceSession::scoped`] wraps a whole run so the close cannot be missed.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use devicerun_core::driver::DeviceClient;
//! use devicerun_core::platform::Platform;
//! use devicerun_core::session::DeviceSession;
//!
//! # async fn example(client: Arc<dyn DeviceClient>) -> Result<(), String> {
//! let id = DeviceSession::scoped(client, Platform::Ios, |session| async move {
//!     // ... drive the run ...
//!     Ok::<_, String>(session.id)
//! })
//! .await?;
//! println!("session {} released", id);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::driver::DeviceClient;
use crate::platform::Platform;

/// Lifecycle state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::NotStarted => write!(f, "not-started"),
            SessionState::Running => write!(f, "running"),
            SessionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// A live connection to one device/app instance.
///
/// Clones share the same underlying session, so a clone handed to a scoped
/// closure and the one held by [`DeviceSession::scoped`] close together.
#[derive(Clone)]
pub struct DeviceSession {
    /// Local identifier used in logs.
    pub id: Uuid,

    pub platform: Platform,

    pub started_at: DateTime<Utc>,

    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: Uuid,
    client: Arc<dyn DeviceClient>,
    state: Mutex<SessionState>,
}

impl DeviceSession {
    /// Wrap a client that has not announced itself yet.
    pub fn new(client: Arc<dyn DeviceClient>, platform: Platform) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            platform,
            started_at: Utc::now(),
            inner: Arc::new(SessionInner {
                id,
                client,
                state: Mutex::new(SessionState::NotStarted),
            }),
        }
    }

    /// Wrap a connected client and mark the session running.
    pub async fn start(client: Arc<dyn DeviceClient>, platform: Platform) -> Self {
        let session = Self::new(client, platform);
        session.mark_running().await;
        session
    }

    /// Run `f` with a running session, then close it.
    ///
    /// The session is closed after `f` completes, whether it returned `Ok` or
    /// `Err`; the result of `f` is passed through untouched. If the scope is
    /// dropped before completing, the quit is handed to the runtime instead
    /// (see the `Drop` impl).
    pub async fn scoped<F, Fut, T, E>(client: Arc<dyn DeviceClient>, platform: Platform, f: F) -> Result<T, E>
    where
        F: FnOnce(DeviceSession) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let session = Self::start(client, platform).await;
        let result = f(session.clone()).await;
        session.close().await;
        result
    }

    async fn mark_running(&self) {
        let mut state = self.inner.state.lock().await;
        if *state == SessionState::NotStarted {
            *state = SessionState::Running;
            info!(session_id = %self.id, platform = %self.platform, "session started");
            if let Err(e) = self.inner.client.label("Start App").await {
                warn!(error = %e, "failed to label session start");
            }
        }
    }

    pub fn client(&self) -> &dyn DeviceClient {
        self.inner.client.as_ref()
    }

    pub async fn state(&self) -> SessionState {
        *self.inner.state.lock().await
    }

    /// Quit the session if it is still running.
    ///
    /// Quit failures are logged, not returned: teardown must never replace
    /// the run's own result.
    pub async fn close(&self) {
        let mut state = self.inner.state.lock().await;
        if *state == SessionState::Terminated {
            return;
        }
        if *state == SessionState::Running {
            if let Err(e) = self.inner.client.label("Stop App").await {
                warn!(error = %e, "failed to label session stop");
            }
            match self.inner.client.quit().await {
                Ok(()) => info!(session_id = %self.id, "session terminated"),
                Err(e) => warn!(session_id = %self.id, error = %e, "quit failed"),
            }
        }
        *state = SessionState::Terminated;
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let running = match self.state.try_lock() {
            Ok(state) => *state == SessionState::Running,
            Err(_) => false,
        };
        if !running {
            return;
        }
        // Last handle gone without close (cancelled or panicked scope).
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(session_id = %self.id, "session dropped without close; quitting in background");
                let client = Arc::clone(&self.client);
                let id = self.id;
                handle.spawn(async move {
                    if let Err(e) = client.quit().await {
                        warn!(session_id = %id, error = %e, "background quit failed");
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %self.id, "session dropped without close outside a runtime; device may still be held");
            }
        }
    }
}
