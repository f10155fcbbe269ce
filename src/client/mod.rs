//! Client runtime
//!
//! One connected client, as a single object: the channel state machine,
//! the local event bus, the update fetcher, and the hot-swap engine that
//! owns this client's module cache. `pump` is the client's turn — drain
//! notifications through the state machine, then drain bus signals through
//! the fetch protocol.
//!
//! A full page reload cannot happen in-process, so reload requests are
//! recorded for the embedder to act on; everything up to that decision is
//! faithful to the protocol.

use crate::artifact::{BuildId, ModuleId};
use crate::bus::UpdateBus;
use crate::channel::{ClientChannel, ClientEnd};
use crate::error::Result;
use crate::fetch::{CheckOutcome, HotFetcher, ReloadReason, UpdateSource};
use crate::swap::{HotSwapEngine, Value};
use std::rc::Rc;

/// A simulated browser session attached to the dev server.
pub struct ClientRuntime {
    channel: ClientChannel,
    bus: UpdateBus,
    fetcher: HotFetcher,
    engine: Rc<HotSwapEngine>,
    hot_enabled: bool,
    reload_requests: Vec<ReloadReason>,
}

impl ClientRuntime {
    /// Wire a client from its channel end, artifact source, and an engine
    /// already booted with the current build. `hot_enabled` reflects
    /// whether the booted bundle carried the hot-update runtime.
    pub fn new(
        end: ClientEnd,
        source: Rc<dyn UpdateSource>,
        engine: Rc<HotSwapEngine>,
        hot_enabled: bool,
    ) -> Self {
        Self {
            channel: ClientChannel::new(end),
            bus: UpdateBus::new(),
            fetcher: HotFetcher::new(source, Rc::clone(&engine)),
            engine,
            hot_enabled,
            reload_requests: Vec::new(),
        }
    }

    pub fn hot_enabled(&self) -> bool {
        self.hot_enabled
    }

    pub fn engine(&self) -> Rc<HotSwapEngine> {
        Rc::clone(&self.engine)
    }

    /// Exports of a loaded module, for the embedding program.
    pub fn exports_of(&self, id: &ModuleId) -> Option<Value> {
        self.engine.exports_of(id)
    }

    /// The build whose artifacts this client last applied.
    pub fn last_applied(&self) -> Option<&BuildId> {
        self.fetcher.last_applied()
    }

    /// The newest build the server announced to this client.
    pub fn current_version(&self) -> Option<&BuildId> {
        self.channel.current_version()
    }

    /// Full-reload requests recorded so far, oldest first.
    pub fn reload_requests(&self) -> &[ReloadReason] {
        &self.reload_requests
    }

    /// Tear down the channel; the server purges the session on its next
    /// broadcast.
    pub fn disconnect(&self) {
        self.channel.disconnect();
    }

    /// One client turn: drain notifications, then handle every pending
    /// update signal. Returns the outcome of each handled signal.
    pub fn pump(&mut self) -> Result<Vec<CheckOutcome>> {
        self.channel.pump(&self.bus);

        let mut outcomes = Vec::new();
        while let Some(signal) = self.bus.next() {
            if !self.hot_enabled {
                tracing::warn!("bundle has no hot-update runtime, requesting full reload");
                self.reload_requests.push(ReloadReason::HotDisabled);
                outcomes.push(CheckOutcome::ReloadRequired(ReloadReason::HotDisabled));
                continue;
            }

            let outcome = self.fetcher.on_update(signal.version)?;
            if let CheckOutcome::ReloadRequired(reason) = &outcome {
                self.reload_requests.push(reason.clone());
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Re-enter the fetch protocol's manifest phase directly, outside a
    /// notification turn.
    pub fn check(&mut self) -> Result<CheckOutcome> {
        let outcome = self.fetcher.check()?;
        if let CheckOutcome::ReloadRequired(reason) = &outcome {
            self.reload_requests.push(reason.clone());
        }
        Ok(outcome)
    }
}
