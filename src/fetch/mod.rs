//! Update fetch protocol
//!
//! The client half that turns "a new build exists" into applied patches.
//! Two phases: fetch the manifest addressed by the build the client already
//! has, then fetch and execute each changed unit's patch. Any failure to
//! fetch or decode means client and server no longer agree on build state,
//! and the only safe recovery is a full reload — the protocol's universal
//! escape hatch.
//!
//! The fetcher keeps its own applied-version ledger (`prev_hot_hash`),
//! distinct from the notification channel's announced-version bookkeeping:
//! artifact addresses must reflect what was actually fetched and applied.

use crate::artifact::{BuildId, ModuleId, UnitId, UpdateManifest};
use crate::error::Result;
use crate::swap::{HotSwapEngine, UnitUpdate};
use std::rc::Rc;

/// Where update artifacts come from. The production implementation reads
/// the in-memory output store; tests substitute failing or scripted
/// sources.
pub trait UpdateSource {
    /// Fetch and decode the manifest addressed by the given previous build.
    fn fetch_manifest(&self, prev: &BuildId) -> Result<UpdateManifest>;

    /// Fetch the executable patch for one unit, addressed by the previous
    /// build. Executing the patch hands its module factories to the engine.
    fn fetch_unit(&self, unit: &UnitId, prev: &BuildId) -> Result<UnitUpdate>;
}

/// Why the client gave up on incremental update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadReason {
    /// The manifest could not be fetched or decoded.
    ManifestUnavailable,
    /// A unit patch named by the manifest could not be fetched.
    UnitUnavailable,
    /// A swapped module had no accepting parent; the running graph would
    /// be left half-updated.
    NoAcceptingParent,
    /// The booted bundle carries no hot-update runtime.
    HotDisabled,
}

/// Summary of a successfully applied cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplySummary {
    pub build: BuildId,
    pub units: Vec<UnitId>,
    pub swapped: Vec<ModuleId>,
}

/// Outcome of handling one update signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// First version pair after connect; nothing to fetch yet.
    FirstSync,
    /// Patches fetched and spliced into the running graph.
    Applied(ApplySummary),
    /// Incremental state cannot be trusted; the caller must fully reload.
    ReloadRequired(ReloadReason),
}

/// Drives the two-phase fetch and hands patches to the engine.
pub struct HotFetcher {
    source: Rc<dyn UpdateSource>,
    engine: Rc<HotSwapEngine>,
    prev_hot_hash: Option<BuildId>,
}

impl HotFetcher {
    pub fn new(source: Rc<dyn UpdateSource>, engine: Rc<HotSwapEngine>) -> Self {
        Self {
            source,
            engine,
            prev_hot_hash: None,
        }
    }

    /// The build whose artifacts this client has applied.
    pub fn last_applied(&self) -> Option<&BuildId> {
        self.prev_hot_hash.as_ref()
    }

    /// Handle one update signal from the event bus.
    pub fn on_update(&mut self, version: BuildId) -> Result<CheckOutcome> {
        if self.prev_hot_hash.is_none() {
            // First signal after connect: remember where the server is,
            // nothing to fetch.
            tracing::debug!(%version, "first sync");
            self.prev_hot_hash = Some(version);
            return Ok(CheckOutcome::FirstSync);
        }
        self.check()
    }

    /// Run one fetch-and-swap cycle against the current `prev_hot_hash`.
    pub fn check(&mut self) -> Result<CheckOutcome> {
        let prev = match &self.prev_hot_hash {
            Some(prev) => prev.clone(),
            None => return Ok(CheckOutcome::FirstSync),
        };

        // Phase 1: manifest, addressed by what this client already has.
        let manifest = match self.source.fetch_manifest(&prev) {
            Ok(manifest) => manifest,
            Err(err) => {
                tracing::warn!(%prev, %err, "manifest fetch failed, requesting full reload");
                return Ok(CheckOutcome::ReloadRequired(ReloadReason::ManifestUnavailable));
            }
        };

        // Phase 2: one patch per changed unit, each self-registering with
        // the engine as it arrives.
        let mut units = Vec::new();
        let mut swapped = Vec::new();
        let mut orphaned = false;
        for unit in manifest.changed_units() {
            let update = match self.source.fetch_unit(unit, &prev) {
                Ok(update) => update,
                Err(err) => {
                    tracing::warn!(%unit, %prev, %err, "unit fetch failed, requesting full reload");
                    return Ok(CheckOutcome::ReloadRequired(ReloadReason::UnitUnavailable));
                }
            };

            let report = self.engine.apply(&update)?;
            if !report.fully_accepted() {
                tracing::warn!(
                    unit = %unit,
                    orphaned = ?report.orphaned,
                    "swap had no accepting parent"
                );
                orphaned = true;
            }
            swapped.extend(report.swapped);
            units.push(unit.clone());
        }

        // The cycle settles here; the next version-change check compares
        // against the build just applied.
        self.prev_hot_hash = Some(manifest.build.clone());

        if orphaned {
            return Ok(CheckOutcome::ReloadRequired(ReloadReason::NoAcceptingParent));
        }

        tracing::info!(build = %manifest.build, units = units.len(), "hot update applied");
        Ok(CheckOutcome::Applied(ApplySummary {
            build: manifest.build,
            units,
            swapped,
        }))
    }
}
