//! Module hot-swap engine
//!
//! Owns the live module cache and performs the in-place surgery that makes
//! hot updates work: replace a module's record wholesale, re-execute its new
//! body, and invoke any acceptance callbacks registered by its parents.
//!
//! The cache is an explicitly owned store handed to the engine, never
//! ambient global state; a fresh cache per test gives deterministic graphs.
//!
//! # Example
//! ```text
//! // A module body opts in to updates of a dependency:
//! let body = |scope: &mut ModuleScope| {
//!     let label = scope.require(&ModuleId::new("label"))?;
//!     scope.export("rendered", label);
//!     scope.accept(&[ModuleId::new("label")], || re_render());
//!     Ok(())
//! };
//! ```

use crate::artifact::{ModuleId, UnitId};
use crate::error::{Error, Result};
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

/// Exported values are JSON-shaped.
pub type Value = serde_json::Value;

/// A module's exports object.
pub type ExportsMap = serde_json::Map<String, Value>;

/// Callback a parent registered for one accepted dependency.
pub type AcceptCallback = Rc<dyn Fn()>;

/// Executable body of one module. Re-run on every hot swap of that module;
/// an error propagates uncaught to the embedding program.
pub type ModuleBody = Rc<dyn Fn(&mut ModuleScope<'_>) -> Result<()>>;

/// Shared handle to a cached module record.
pub type SharedModule = Rc<RefCell<ModuleRecord>>;

/// Per-module opt-in surface for hot updates.
///
/// `accept` registers a callback under each named dependency; when that
/// dependency is hot-swapped the callback runs exactly once, with no
/// further propagation.
pub struct HotHandle {
    module: ModuleId,
    accepted: FxHashMap<ModuleId, AcceptCallback>,
}

impl HotHandle {
    fn new(module: ModuleId) -> Self {
        Self {
            module,
            accepted: FxHashMap::default(),
        }
    }

    /// Register `callback` for updates of each of `deps`.
    pub fn accept(&mut self, deps: &[ModuleId], callback: AcceptCallback) {
        for dep in deps {
            self.accepted.insert(dep.clone(), Rc::clone(&callback));
        }
    }

    /// Whether an update of `dep` is accepted by this module.
    pub fn accepts(&self, dep: &ModuleId) -> bool {
        self.accepted.contains_key(dep)
    }

    fn callback_for(&self, dep: &ModuleId) -> Option<AcceptCallback> {
        self.accepted.get(dep).cloned()
    }
}

impl fmt::Debug for HotHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let deps: Vec<&ModuleId> = self.accepted.keys().collect();
        f.debug_struct("HotHandle")
            .field("module", &self.module)
            .field("accepted", &deps)
            .finish()
    }
}

/// Runtime bookkeeping for one loaded module: its exports, load state, hot
/// handle, and graph edges.
#[derive(Debug)]
pub struct ModuleRecord {
    pub id: ModuleId,
    pub exports: ExportsMap,
    pub is_loaded: bool,
    pub hot: HotHandle,
    pub parents: BTreeSet<ModuleId>,
    pub children: BTreeSet<ModuleId>,
}

impl ModuleRecord {
    fn new(id: ModuleId) -> Self {
        Self {
            hot: HotHandle::new(id.clone()),
            id,
            exports: ExportsMap::new(),
            is_loaded: false,
            parents: BTreeSet::new(),
            children: BTreeSet::new(),
        }
    }
}

/// The process-wide module cache. Exclusively owns all records; every
/// lookup and replacement goes through this API.
#[derive(Debug, Default)]
pub struct ModuleCache {
    records: RefCell<FxHashMap<ModuleId, SharedModule>>,
}

impl ModuleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &ModuleId) -> Option<SharedModule> {
        self.records.borrow().get(id).cloned()
    }

    /// Install a record under its id, returning the record it replaced.
    pub fn insert(&self, record: SharedModule) -> Option<SharedModule> {
        let id = record.borrow().id.clone();
        self.records.borrow_mut().insert(id, record)
    }

    pub fn contains(&self, id: &ModuleId) -> bool {
        self.records.borrow().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }

    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.records.borrow().keys().cloned().collect()
    }
}

/// What a module body sees while executing: its own record plus the cache
/// it resolves dependencies from.
pub struct ModuleScope<'a> {
    record: &'a SharedModule,
    cache: &'a ModuleCache,
}

impl ModuleScope<'_> {
    pub fn module_id(&self) -> ModuleId {
        self.record.borrow().id.clone()
    }

    /// Set one export on this module.
    pub fn export(&self, name: &str, value: Value) {
        self.record
            .borrow_mut()
            .exports
            .insert(name.to_string(), value);
    }

    /// Resolve a dependency's exports object, linking the graph edges
    /// between the two records. The dependency must already be in the
    /// cache: units are laid out dependencies-first, and hot updates only
    /// ever target modules that were loaded.
    pub fn require(&self, id: &ModuleId) -> Result<Value> {
        let dep = self
            .cache
            .get(id)
            .ok_or_else(|| Error::ModuleNotLoaded(id.clone()))?;

        let self_id = self.record.borrow().id.clone();
        if *id != self_id {
            dep.borrow_mut().parents.insert(self_id);
            self.record.borrow_mut().children.insert(id.clone());
        }

        let exports = dep.borrow().exports.clone();
        Ok(Value::Object(exports))
    }

    /// Opt in to hot updates of each of `deps`.
    pub fn accept(&self, deps: &[ModuleId], callback: impl Fn() + 'static) {
        self.record
            .borrow_mut()
            .hot
            .accept(deps, Rc::new(callback));
    }
}

/// One unit's worth of replacement module bodies, in patch order. The
/// in-process form of the executable `{unit}.{prev}.hot-update.js`
/// artifact: executing it hands each factory to the engine.
#[derive(Clone)]
pub struct UnitUpdate {
    pub unit: UnitId,
    pub modules: Vec<(ModuleId, ModuleBody)>,
}

impl fmt::Debug for UnitUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<&ModuleId> = self.modules.iter().map(|(id, _)| id).collect();
        f.debug_struct("UnitUpdate")
            .field("unit", &self.unit)
            .field("modules", &ids)
            .finish()
    }
}

/// What one `apply` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub unit: UnitId,
    /// Modules replaced and re-executed, in patch order.
    pub swapped: Vec<ModuleId>,
    /// Swapped modules for which no parent registered acceptance. The
    /// updated code is in the cache but nothing was notified; callers
    /// should treat a non-empty set as grounds for a full reload.
    pub orphaned: Vec<ModuleId>,
}

impl ApplyReport {
    pub fn fully_accepted(&self) -> bool {
        self.orphaned.is_empty()
    }
}

/// Splices arriving unit updates into the live module graph.
#[derive(Debug, Default)]
pub struct HotSwapEngine {
    cache: Rc<ModuleCache>,
}

impl HotSwapEngine {
    pub fn new() -> Self {
        Self {
            cache: Rc::new(ModuleCache::new()),
        }
    }

    pub fn with_cache(cache: Rc<ModuleCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> Rc<ModuleCache> {
        Rc::clone(&self.cache)
    }

    /// Exports of a loaded module, if present.
    pub fn exports_of(&self, id: &ModuleId) -> Option<Value> {
        self.cache
            .get(id)
            .map(|record| Value::Object(record.borrow().exports.clone()))
    }

    /// First-load path: install a fresh record and execute its body.
    /// Loading an id already in the cache is a no-op (evaluate once).
    pub fn load(&self, id: ModuleId, body: ModuleBody) -> Result<SharedModule> {
        if let Some(existing) = self.cache.get(&id) {
            return Ok(existing);
        }

        let record = Rc::new(RefCell::new(ModuleRecord::new(id)));
        self.cache.insert(Rc::clone(&record));
        {
            let mut scope = ModuleScope {
                record: &record,
                cache: &self.cache,
            };
            body(&mut scope)?;
        }
        record.borrow_mut().is_loaded = true;
        Ok(record)
    }

    /// Splice one unit update into the cache.
    ///
    /// Per module, in patch order: replace the old record with a fresh one
    /// (empty exports, empty hot handle) carrying the old record's graph
    /// edges, re-execute the new body, then invoke the acceptance callback
    /// of every parent that registered for this module id. A module id
    /// never loaded is a protocol violation and fails the apply; modules
    /// swapped earlier in the same patch stay swapped.
    pub fn apply(&self, update: &UnitUpdate) -> Result<ApplyReport> {
        let mut report = ApplyReport {
            unit: update.unit.clone(),
            swapped: Vec::new(),
            orphaned: Vec::new(),
        };

        for (module_id, body) in &update.modules {
            let old = self
                .cache
                .get(module_id)
                .ok_or_else(|| Error::ModuleNotLoaded(module_id.clone()))?;

            let (parents, children) = {
                let old = old.borrow();
                (old.parents.clone(), old.children.clone())
            };

            let record = Rc::new(RefCell::new(ModuleRecord {
                hot: HotHandle::new(module_id.clone()),
                id: module_id.clone(),
                exports: ExportsMap::new(),
                is_loaded: false,
                parents,
                children,
            }));
            self.cache.insert(Rc::clone(&record));

            {
                let mut scope = ModuleScope {
                    record: &record,
                    cache: &self.cache,
                };
                body(&mut scope)?;
            }
            record.borrow_mut().is_loaded = true;

            // Collect callbacks before invoking any: a callback may
            // re-enter the cache.
            let parent_ids: Vec<ModuleId> =
                record.borrow().parents.iter().cloned().collect();
            let mut callbacks = Vec::new();
            for parent_id in &parent_ids {
                if let Some(parent) = self.cache.get(parent_id) {
                    if let Some(callback) = parent.borrow().hot.callback_for(module_id) {
                        callbacks.push(callback);
                    }
                }
            }

            if callbacks.is_empty() {
                report.orphaned.push(module_id.clone());
            }
            for callback in callbacks {
                callback();
            }

            tracing::debug!(module = %module_id, unit = %update.unit, "module hot-swapped");
            report.swapped.push(module_id.clone());
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    fn body(f: impl Fn(&mut ModuleScope<'_>) -> Result<()> + 'static) -> ModuleBody {
        Rc::new(f)
    }

    #[test]
    fn test_load_executes_body_and_marks_loaded() {
        let engine = HotSwapEngine::new();
        let record = engine
            .load(
                ModuleId::new("m1"),
                body(|scope| {
                    scope.export("answer", json!(42));
                    Ok(())
                }),
            )
            .unwrap();

        assert!(record.borrow().is_loaded);
        assert_eq!(engine.exports_of(&ModuleId::new("m1")), Some(json!({"answer": 42})));
    }

    #[test]
    fn test_load_evaluates_once() {
        let engine = HotSwapEngine::new();
        let runs = Rc::new(Cell::new(0));

        for _ in 0..2 {
            let runs = Rc::clone(&runs);
            engine
                .load(
                    ModuleId::new("m1"),
                    body(move |_| {
                        runs.set(runs.get() + 1);
                        Ok(())
                    }),
                )
                .unwrap();
        }
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_require_links_graph_edges() {
        let engine = HotSwapEngine::new();
        engine
            .load(
                ModuleId::new("dep"),
                body(|scope| {
                    scope.export("value", json!("x"));
                    Ok(())
                }),
            )
            .unwrap();
        engine
            .load(
                ModuleId::new("app"),
                body(|scope| {
                    let dep = scope.require(&ModuleId::new("dep"))?;
                    scope.export("copied", dep["value"].clone());
                    Ok(())
                }),
            )
            .unwrap();

        let cache = engine.cache();
        let dep = cache.get(&ModuleId::new("dep")).unwrap();
        assert!(dep.borrow().parents.contains(&ModuleId::new("app")));
        let app = cache.get(&ModuleId::new("app")).unwrap();
        assert!(app.borrow().children.contains(&ModuleId::new("dep")));
        assert_eq!(engine.exports_of(&ModuleId::new("app")), Some(json!({"copied": "x"})));
    }

    #[test]
    fn test_require_unknown_module_fails() {
        let engine = HotSwapEngine::new();
        let result = engine.load(
            ModuleId::new("app"),
            body(|scope| {
                scope.require(&ModuleId::new("ghost"))?;
                Ok(())
            }),
        );
        assert!(matches!(result, Err(Error::ModuleNotLoaded(id)) if id == ModuleId::new("ghost")));
    }

    #[test]
    fn test_apply_replaces_record_and_keeps_edges() {
        let engine = HotSwapEngine::new();
        engine
            .load(
                ModuleId::new("m1"),
                body(|scope| {
                    scope.export("v", json!(1));
                    Ok(())
                }),
            )
            .unwrap();
        engine
            .load(
                ModuleId::new("p1"),
                body(|scope| {
                    scope.require(&ModuleId::new("m1"))?;
                    Ok(())
                }),
            )
            .unwrap();

        let report = engine
            .apply(&UnitUpdate {
                unit: UnitId::new("main"),
                modules: vec![(
                    ModuleId::new("m1"),
                    body(|scope| {
                        scope.export("v", json!(2));
                        Ok(())
                    }),
                )],
            })
            .unwrap();

        assert_eq!(report.swapped, vec![ModuleId::new("m1")]);
        let record = engine.cache().get(&ModuleId::new("m1")).unwrap();
        let record = record.borrow();
        assert!(record.is_loaded);
        assert_eq!(record.exports.get("v"), Some(&json!(2)));
        // Graph edges survive the swap.
        assert!(record.parents.contains(&ModuleId::new("p1")));
        // The fresh hot handle has no registrations.
        assert!(!record.hot.accepts(&ModuleId::new("p1")));
    }

    #[test]
    fn test_cascade_invokes_accepting_parent_once() {
        let engine = HotSwapEngine::new();
        let fired = Rc::new(Cell::new(0u32));

        engine
            .load(
                ModuleId::new("label"),
                body(|scope| {
                    scope.export("text", json!("hello"));
                    Ok(())
                }),
            )
            .unwrap();
        {
            let fired = Rc::clone(&fired);
            engine
                .load(
                    ModuleId::new("app"),
                    body(move |scope| {
                        scope.require(&ModuleId::new("label"))?;
                        let fired = Rc::clone(&fired);
                        scope.accept(&[ModuleId::new("label")], move || {
                            fired.set(fired.get() + 1);
                        });
                        Ok(())
                    }),
                )
                .unwrap();
        }

        let report = engine
            .apply(&UnitUpdate {
                unit: UnitId::new("main"),
                modules: vec![(
                    ModuleId::new("label"),
                    body(|scope| {
                        scope.export("text", json!("world"));
                        Ok(())
                    }),
                )],
            })
            .unwrap();

        assert_eq!(fired.get(), 1);
        assert!(report.fully_accepted());
    }

    #[test]
    fn test_unaccepted_swap_is_reported_orphaned() {
        let engine = HotSwapEngine::new();
        let fired = Rc::new(Cell::new(0u32));

        engine
            .load(ModuleId::new("label"), body(|_| Ok(())))
            .unwrap();
        engine
            .load(
                ModuleId::new("app"),
                body(|scope| {
                    scope.require(&ModuleId::new("label"))?;
                    Ok(())
                }),
            )
            .unwrap();

        let report = engine
            .apply(&UnitUpdate {
                unit: UnitId::new("main"),
                modules: vec![(ModuleId::new("label"), body(|_| Ok(())))],
            })
            .unwrap();

        // No callback was registered, so nothing fired; the module is
        // swapped but flagged for the caller to decide on a reload.
        assert_eq!(fired.get(), 0);
        assert_eq!(report.orphaned, vec![ModuleId::new("label")]);
        assert!(!report.fully_accepted());
    }

    #[test]
    fn test_apply_unknown_module_is_fatal() {
        let engine = HotSwapEngine::new();
        let result = engine.apply(&UnitUpdate {
            unit: UnitId::new("main"),
            modules: vec![(ModuleId::new("never-loaded"), body(|_| Ok(())))],
        });
        assert!(matches!(result, Err(Error::ModuleNotLoaded(_))));
    }

    #[test]
    fn test_swap_reregisters_acceptance() {
        // A swapped parent re-runs its body, which re-registers acceptance
        // on the fresh hot handle; a later child update still cascades.
        let engine = HotSwapEngine::new();
        let fired = Rc::new(Cell::new(0u32));

        engine
            .load(ModuleId::new("child"), body(|_| Ok(())))
            .unwrap();
        let parent_body = {
            let fired = Rc::clone(&fired);
            body(move |scope| {
                scope.require(&ModuleId::new("child"))?;
                let fired = Rc::clone(&fired);
                scope.accept(&[ModuleId::new("child")], move || {
                    fired.set(fired.get() + 1);
                });
                Ok(())
            })
        };
        engine
            .load(ModuleId::new("parent"), Rc::clone(&parent_body))
            .unwrap();

        // Swap the parent itself, then the child.
        engine
            .apply(&UnitUpdate {
                unit: UnitId::new("main"),
                modules: vec![(ModuleId::new("parent"), parent_body)],
            })
            .unwrap();
        engine
            .apply(&UnitUpdate {
                unit: UnitId::new("main"),
                modules: vec![(ModuleId::new("child"), body(|_| Ok(())))],
            })
            .unwrap();

        assert_eq!(fired.get(), 1);
    }
}
