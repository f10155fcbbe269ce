//! Notification channel
//!
//! One persistent duplex channel per connected client. The server pushes two
//! events per build, `version` then `ready`; the client tracks the last
//! version it saw against the newest one announced and signals the local
//! event bus only when they differ.
//!
//! The pair is an in-memory FIFO with a closed flag. Sending on a channel
//! whose client end disconnected fails, which is how the emitter learns to
//! purge the session; there is no retry.

use crate::artifact::BuildId;
use crate::bus::{UpdateBus, UpdateSignal};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Wire events pushed from server to client after each build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Notification {
    /// Newest build id the server knows about.
    Version(BuildId),
    /// The announced build is fully written and fetchable.
    Ready,
}

#[derive(Debug, Default)]
struct Shared {
    queue: VecDeque<Notification>,
    closed: bool,
}

/// Create a connected server/client channel pair.
pub struct ChannelPair;

impl ChannelPair {
    pub fn new() -> (ServerEnd, ClientEnd) {
        let shared = Rc::new(RefCell::new(Shared::default()));
        (
            ServerEnd {
                shared: Rc::clone(&shared),
            },
            ClientEnd { shared },
        )
    }
}

/// The server's half of a session channel.
#[derive(Debug, Clone)]
pub struct ServerEnd {
    shared: Rc<RefCell<Shared>>,
}

impl ServerEnd {
    /// Push a notification toward the client. Fails once the client has
    /// disconnected; the caller drops the message.
    pub fn send(&self, notification: Notification) -> Result<()> {
        let mut shared = self.shared.borrow_mut();
        if shared.closed {
            return Err(Error::ChannelClosed);
        }
        shared.queue.push_back(notification);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed
    }
}

/// The client's half of a session channel.
#[derive(Debug)]
pub struct ClientEnd {
    shared: Rc<RefCell<Shared>>,
}

impl ClientEnd {
    /// Take the oldest undelivered notification.
    pub fn poll(&self) -> Option<Notification> {
        self.shared.borrow_mut().queue.pop_front()
    }

    /// Tear the channel down. Pending notifications are discarded and
    /// further server sends fail.
    pub fn disconnect(&self) {
        let mut shared = self.shared.borrow_mut();
        shared.closed = true;
        shared.queue.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed
    }
}

/// Client-side version state machine.
///
/// On `version(v)`: `last_version` takes the previous `current_version`
/// (the last *announced* build, not necessarily the last applied one) and
/// `current_version` becomes `v`. On `ready`: signal the bus only when the
/// two differ. The fetch protocol keeps its own applied-version ledger.
#[derive(Debug)]
pub struct ClientChannel {
    end: ClientEnd,
    last_version: Option<BuildId>,
    current_version: Option<BuildId>,
}

impl ClientChannel {
    pub fn new(end: ClientEnd) -> Self {
        Self {
            end,
            last_version: None,
            current_version: None,
        }
    }

    pub fn last_version(&self) -> Option<&BuildId> {
        self.last_version.as_ref()
    }

    pub fn current_version(&self) -> Option<&BuildId> {
        self.current_version.as_ref()
    }

    pub fn disconnect(&self) {
        self.end.disconnect();
    }

    /// Drain every undelivered notification through the state machine,
    /// publishing to `bus` when a `ready` finds a changed version. Returns
    /// the number of notifications handled.
    pub fn pump(&mut self, bus: &UpdateBus) -> usize {
        let mut handled = 0;
        while let Some(notification) = self.end.poll() {
            self.dispatch(notification, bus);
            handled += 1;
        }
        handled
    }

    fn dispatch(&mut self, notification: Notification, bus: &UpdateBus) {
        match notification {
            Notification::Version(version) => {
                tracing::debug!(%version, "version announced");
                self.last_version = self.current_version.take();
                self.current_version = Some(version);
            }
            Notification::Ready => {
                if self.current_version != self.last_version {
                    if let Some(version) = &self.current_version {
                        bus.publish(UpdateSignal {
                            version: version.clone(),
                        });
                    }
                } else {
                    tracing::debug!("ready with unchanged version, nothing to do");
                }
            }
        }
    }
}
