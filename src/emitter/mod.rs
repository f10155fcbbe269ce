//! Version emitter
//!
//! Wraps the build pipeline's completion signal. Holds the single current
//! build identifier and fans it out to every connected session as a
//! `version` message followed by a `ready` message. A session whose channel
//! has been torn down is purged; its messages are dropped, never retried —
//! the client resynchronizes from the greeting pair when it reconnects.

use crate::artifact::BuildId;
use crate::channel::{Notification, ServerEnd};

/// One connected client, as the server sees it.
#[derive(Debug)]
pub struct ClientSession {
    pub id: u64,
    channel: ServerEnd,
}

/// Holds the current build id and broadcasts build completions.
#[derive(Debug, Default)]
pub struct VersionEmitter {
    current: Option<BuildId>,
    sessions: Vec<ClientSession>,
    next_session_id: u64,
}

impl VersionEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// The newest build the emitter knows about.
    pub fn current_version(&self) -> Option<&BuildId> {
        self.current.as_ref()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Build pipeline completion hook; invoked once per successful build.
    ///
    /// Sends `version` then `ready` to every live session, in that order
    /// per session. Sessions with a broken channel are purged.
    pub fn on_build_complete(&mut self, build: BuildId) {
        tracing::debug!(%build, sessions = self.sessions.len(), "build complete, notifying sessions");
        self.current = Some(build.clone());
        self.sessions
            .retain(|session| announce(&session.channel, &build));
    }

    /// Register a fresh connection and immediately synchronize it with the
    /// current build, so a client connecting between rebuilds still learns
    /// where the server is.
    pub fn connect(&mut self, channel: ServerEnd) -> u64 {
        let id = self.next_session_id;
        self.next_session_id += 1;

        if let Some(build) = &self.current {
            // A failed greeting means the channel died before registration;
            // register anyway and let the next broadcast purge it.
            let _ = announce(&channel, build);
        }

        tracing::info!(session = id, "client connected");
        self.sessions.push(ClientSession { id, channel });
        id
    }

    /// Drop the session's channel reference.
    pub fn disconnect(&mut self, id: u64) {
        tracing::info!(session = id, "client disconnected");
        self.sessions.retain(|session| session.id != id);
    }
}

fn announce(channel: &ServerEnd, build: &BuildId) -> bool {
    channel.send(Notification::Version(build.clone())).is_ok()
        && channel.send(Notification::Ready).is_ok()
}
