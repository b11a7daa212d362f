//! Browsing context handles and navigation.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::identifiers::ContextId;
use crate::protocol::{BrowsingContextCommand, Command, CommandRequest, ReadinessState};

use super::core::{Session, SessionInner};

// ============================================================================
// NavigationResult
// ============================================================================

/// Outcome of a completed navigation.
#[derive(Debug, Clone)]
pub struct NavigationResult {
    /// URL the context ended up at, after redirects.
    pub url: String,
    /// Remote-assigned navigation id, when reported.
    pub navigation: Option<String>,
}

// ============================================================================
// BrowsingContext
// ============================================================================

/// Handle to one browsing context.
///
/// Obtained from [`Session::create_context`]. The handle holds a
/// non-owning reference to its session: once the session is gone,
/// operations fail with [`Error::SessionClosed`].
#[derive(Debug, Clone)]
pub struct BrowsingContext {
    id: ContextId,
    session: Weak<SessionInner>,
    /// Last successful navigation, shared across handle clones.
    last_navigation: Arc<Mutex<Option<NavigationResult>>>,
}

impl BrowsingContext {
    pub(crate) fn new(id: ContextId, session: &Session) -> Self {
        Self {
            id,
            session: Arc::downgrade(&session.inner),
            last_navigation: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns the context id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &ContextId {
        &self.id
    }

    /// Returns the last successful navigation through this handle.
    #[must_use]
    pub fn last_navigation(&self) -> Option<NavigationResult> {
        self.last_navigation.lock().clone()
    }

    fn session(&self) -> Result<Session> {
        match self.session.upgrade() {
            Some(inner) => Ok(Session { inner }),
            None => Err(Error::SessionClosed),
        }
    }

    /// Navigates to `url`, waiting for the given readiness state.
    ///
    /// The command resolves once the remote end reports the requested
    /// readiness; use [`ReadinessState::None`] to return as soon as the
    /// navigation starts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an unparseable URL and
    /// [`Error::Protocol`] when the remote end rejects the navigation.
    pub async fn navigate(&self, url: &str, wait: ReadinessState) -> Result<NavigationResult> {
        let session = self.session()?;
        session.ensure_open()?;
        url::Url::parse(url).map_err(|e| Error::invalid_argument(format!("bad URL {url:?}: {e}")))?;

        let request = CommandRequest::new(Command::BrowsingContext(
            BrowsingContextCommand::Navigate {
                context: self.id.clone(),
                url: url.to_string(),
                wait,
            },
        ));
        let result = session.inner.connection.send(request).await?;

        let final_url = result
            .get("url")
            .and_then(|v| v.as_str())
            .unwrap_or(url)
            .to_string();
        let navigation = result
            .get("navigation")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        debug!(context = %self.id, url = %final_url, "Navigation complete");

        let outcome = NavigationResult {
            url: final_url,
            navigation,
        };
        *self.last_navigation.lock() = Some(outcome.clone());
        Ok(outcome)
    }

    /// Closes the context.
    ///
    /// Local bookkeeping tied to the context (the session's context
    /// list, any geolocation override) is released once the remote end
    /// confirms. The id is never reused; the remote end assigns fresh
    /// ids to new contexts.
    pub async fn close(&self) -> Result<()> {
        let session = self.session()?;
        session.ensure_open()?;
        let request = CommandRequest::new(Command::BrowsingContext(
            BrowsingContextCommand::Close {
                context: self.id.clone(),
            },
        ));
        session.inner.connection.send(request).await?;

        session.inner.contexts.lock().retain(|id| *id != self.id);
        session.inner.geolocation.lock().remove(&self.id);
        debug!(context = %self.id, "Context closed");
        Ok(())
    }
}
