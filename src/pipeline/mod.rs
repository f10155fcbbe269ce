//! Build pipeline
//!
//! In-process stand-in for the compile side: it owns module sources,
//! computes a content-addressed build id per run, lays units out
//! dependencies-first, and writes everything a client needs into the
//! output store — the index page, full bundles, and (once a previous build
//! exists) the hot-update manifest and unit patches addressed by that
//! previous build's id.
//!
//! Completion is observed through done-hooks, which is where the version
//! emitter plugs in.

use crate::artifact::{
    bundle_path, manifest_path, unit_patch_path, BuildId, ModuleId, UnitId, UpdateManifest,
};
use crate::error::{Error, Result};
use crate::fetch::UpdateSource;
use crate::store::MemoryStore;
use crate::swap::{ModuleBody, UnitUpdate, Value};
use regex::Regex;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::OnceLock;

/// Source for one module fed to the pipeline.
#[derive(Clone)]
pub struct ModuleSource {
    /// Raw text, written into the served bundle and hashed for change
    /// detection.
    pub text: String,
    /// Modules resolved before this one executes.
    pub deps: Vec<ModuleId>,
    /// Executable body handed to the client runtime.
    pub body: ModuleBody,
}

impl ModuleSource {
    pub fn new(text: impl Into<String>, deps: Vec<ModuleId>, body: ModuleBody) -> Self {
        Self {
            text: text.into(),
            deps,
            body,
        }
    }

    /// A file-backed module: requires its dependencies, then exports its
    /// own source text under `source`.
    pub fn from_text(text: impl Into<String>, deps: Vec<ModuleId>) -> Self {
        let text = text.into();
        let exported = text.clone();
        let dep_list = deps.clone();
        let body: ModuleBody = Rc::new(move |scope| {
            for dep in &dep_list {
                scope.require(dep)?;
            }
            scope.export("source", Value::String(exported.clone()));
            Ok(())
        });
        Self { text, deps, body }
    }
}

impl fmt::Debug for ModuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleSource")
            .field("text_len", &self.text.len())
            .field("deps", &self.deps)
            .finish()
    }
}

/// Static pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// The unit every entry module compiles into.
    pub entry_unit: UnitId,
    /// Entry modules, executed in order when the bundle boots.
    pub entry_modules: Vec<ModuleId>,
}

impl PipelineConfig {
    pub fn new(entry_unit: UnitId, entry_modules: Vec<ModuleId>) -> Self {
        Self {
            entry_unit,
            entry_modules,
        }
    }
}

/// A finished compilation: its id and the per-unit module layout,
/// dependencies first.
#[derive(Debug, Clone)]
pub struct Build {
    pub id: BuildId,
    pub units: BTreeMap<UnitId, Vec<ModuleId>>,
}

/// Executable artifacts (full bundles and unit patches) keyed by the same
/// addresses the byte store uses. The in-process counterpart of
/// script-injection: fetching an address yields factories that register
/// themselves with the engine when executed.
#[derive(Default)]
pub struct ScriptStore {
    scripts: RefCell<HashMap<String, UnitUpdate>>,
}

impl ScriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<String>, update: UnitUpdate) {
        self.scripts.borrow_mut().insert(path.into(), update);
    }

    pub fn fetch(&self, path: &str) -> Option<UnitUpdate> {
        self.scripts.borrow().get(path).cloned()
    }

    pub fn len(&self) -> usize {
        self.scripts.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.borrow().is_empty()
    }
}

type DoneHook = Box<dyn FnMut(&Build)>;

/// The compile side of the dev server.
pub struct Pipeline {
    config: PipelineConfig,
    sources: FxHashMap<ModuleId, ModuleSource>,
    store: Rc<MemoryStore>,
    scripts: Rc<ScriptStore>,
    hooks: Vec<DoneHook>,
    last_build: Option<Build>,
    module_hashes: HashMap<ModuleId, u64>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            sources: FxHashMap::default(),
            store: Rc::new(MemoryStore::new()),
            scripts: Rc::new(ScriptStore::new()),
            hooks: Vec::new(),
            last_build: None,
            module_hashes: HashMap::new(),
        }
    }

    /// The output store bundles and manifests are written to.
    pub fn store(&self) -> Rc<MemoryStore> {
        Rc::clone(&self.store)
    }

    /// The executable-artifact index.
    pub fn scripts(&self) -> Rc<ScriptStore> {
        Rc::clone(&self.scripts)
    }

    pub fn entry_unit(&self) -> &UnitId {
        &self.config.entry_unit
    }

    pub fn entry_modules(&self) -> &[ModuleId] {
        &self.config.entry_modules
    }

    pub fn last_build(&self) -> Option<&Build> {
        self.last_build.as_ref()
    }

    /// Register or replace a module source. The change is picked up by the
    /// next `run`.
    pub fn add_module(&mut self, id: ModuleId, source: ModuleSource) {
        self.sources.insert(id, source);
    }

    /// Alias of `add_module` that reads as what a watcher does.
    pub fn update_module(&mut self, id: ModuleId, source: ModuleSource) {
        self.sources.insert(id, source);
    }

    pub fn has_module(&self, id: &ModuleId) -> bool {
        self.sources.contains_key(id)
    }

    /// Put a module at the front of the entry list, registering its
    /// source. No-op for ids already in the entry.
    pub fn prepend_entry_module(&mut self, id: ModuleId, source: ModuleSource) {
        if !self.sources.contains_key(&id) {
            self.sources.insert(id.clone(), source);
        }
        if !self.config.entry_modules.contains(&id) {
            self.config.entry_modules.insert(0, id);
        }
    }

    /// Register a completion hook, fired once per successful run.
    pub fn on_done(&mut self, hook: impl FnMut(&Build) + 'static) {
        self.hooks.push(Box::new(hook));
    }

    /// Compile: lay out the unit, hash contents into a build id, write the
    /// output store and script index, and emit manifest plus patches
    /// addressed by the previous build when anything changed.
    pub fn run(&mut self) -> Result<BuildId> {
        let order = self.layout()?;
        let unit = self.config.entry_unit.clone();

        let mut hashes = HashMap::new();
        let mut combined = DefaultHasher::new();
        for id in &order {
            let hash = content_hash(&self.sources[id].text);
            id.as_str().hash(&mut combined);
            hash.hash(&mut combined);
            hashes.insert(id.clone(), hash);
        }
        let build_id = BuildId::new(format!("{:016x}", combined.finish()));

        let changed: Vec<ModuleId> = order
            .iter()
            .filter(|id| self.module_hashes.get(*id) != hashes.get(*id))
            .cloned()
            .collect();

        // Full outputs, rewritten every build.
        self.store.write("/index.html", render_index(&unit));
        self.store
            .write(bundle_path(&unit), self.render_bundle(&build_id, &order));
        self.scripts.insert(
            bundle_path(&unit),
            UnitUpdate {
                unit: unit.clone(),
                modules: order
                    .iter()
                    .map(|id| (id.clone(), Rc::clone(&self.sources[id].body)))
                    .collect(),
            },
        );

        // Patch artifacts, addressed by the build clients already have.
        if let Some(prev) = &self.last_build {
            let prev_layout = prev.units.get(&unit);
            let unit_changed = !changed.is_empty() || prev_layout != Some(&order);
            if prev.id != build_id && unit_changed {
                let mut manifest = UpdateManifest::new(build_id.clone());
                manifest.mark_changed(unit.clone());
                self.store
                    .write(manifest_path(&prev.id), manifest.to_json()?);
                self.scripts.insert(
                    unit_patch_path(&unit, &prev.id),
                    UnitUpdate {
                        unit: unit.clone(),
                        modules: order
                            .iter()
                            .filter(|id| changed.contains(*id))
                            .map(|id| (id.clone(), Rc::clone(&self.sources[id].body)))
                            .collect(),
                    },
                );
            }
        }

        self.module_hashes = hashes;
        let build = Build {
            id: build_id.clone(),
            units: BTreeMap::from([(unit, order)]),
        };
        self.last_build = Some(build.clone());

        tracing::info!(build = %build_id, modules = build.units.values().map(Vec::len).sum::<usize>(), "compiled successfully");
        for hook in &mut self.hooks {
            hook(&build);
        }

        Ok(build_id)
    }

    /// Depth-first layout from the entry modules, dependencies before
    /// dependents, each module once.
    fn layout(&self) -> Result<Vec<ModuleId>> {
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        for entry in &self.config.entry_modules {
            self.visit(entry, &mut order, &mut visited)?;
        }
        Ok(order)
    }

    fn visit(
        &self,
        id: &ModuleId,
        order: &mut Vec<ModuleId>,
        visited: &mut HashSet<ModuleId>,
    ) -> Result<()> {
        if !visited.insert(id.clone()) {
            return Ok(());
        }
        let source = self
            .sources
            .get(id)
            .ok_or_else(|| Error::ArtifactNotFound(format!("module source {}", id)))?;
        for dep in &source.deps {
            self.visit(dep, order, visited)?;
        }
        order.push(id.clone());
        Ok(())
    }

    fn render_bundle(&self, build: &BuildId, order: &[ModuleId]) -> Vec<u8> {
        let mut out = format!("// build {}\n", build);
        for id in order {
            out.push_str(&format!("// module {}\n{}\n", id, self.sources[id].text));
        }
        out.into_bytes()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("modules", &self.sources.len())
            .field("hooks", &self.hooks.len())
            .field("last_build", &self.last_build.as_ref().map(|b| &b.id))
            .finish()
    }
}

/// Production `UpdateSource`: manifests as JSON bytes from the output
/// store, unit patches from the script index.
pub struct ArtifactSource {
    store: Rc<MemoryStore>,
    scripts: Rc<ScriptStore>,
}

impl ArtifactSource {
    pub fn new(store: Rc<MemoryStore>, scripts: Rc<ScriptStore>) -> Self {
        Self { store, scripts }
    }
}

impl UpdateSource for ArtifactSource {
    fn fetch_manifest(&self, prev: &BuildId) -> Result<UpdateManifest> {
        let path = manifest_path(prev);
        let bytes = self
            .store
            .read(&path)
            .ok_or_else(|| Error::ArtifactNotFound(path))?;
        UpdateManifest::from_json(&bytes)
    }

    fn fetch_unit(&self, unit: &UnitId, prev: &BuildId) -> Result<UnitUpdate> {
        let path = unit_patch_path(unit, prev);
        self.scripts
            .fetch(&path)
            .ok_or(Error::ArtifactNotFound(path))
    }
}

fn render_index(unit: &UnitId) -> Vec<u8> {
    format!(
        "<!doctype html>\n<html>\n  <head><meta charset=\"utf-8\"><title>hotserve</title></head>\n  <body>\n    <script src=\"{}\"></script>\n  </body>\n</html>\n",
        bundle_path(unit)
    )
    .into_bytes()
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn import_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?:import\s+(?:[\w*\s{},$]+?\s+from\s+)?|require\s*\(\s*)["']([^"']+)["']"#)
            .expect("import pattern compiles")
    })
}

/// Extract import/require specifiers from module source text.
pub fn scan_imports(text: &str) -> Vec<String> {
    import_pattern()
        .captures_iter(text)
        .map(|captures| captures[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> Pipeline {
        let mut pipeline = Pipeline::new(PipelineConfig::new(
            UnitId::new("main"),
            vec![ModuleId::new("app")],
        ));
        pipeline.add_module(
            ModuleId::new("app"),
            ModuleSource::from_text("render(label)", vec![ModuleId::new("label")]),
        );
        pipeline.add_module(
            ModuleId::new("label"),
            ModuleSource::from_text("export hello", vec![]),
        );
        pipeline
    }

    #[test]
    fn test_layout_puts_dependencies_first() {
        let pipeline = fixture();
        let order = pipeline.layout().unwrap();
        assert_eq!(order, vec![ModuleId::new("label"), ModuleId::new("app")]);
    }

    #[test]
    fn test_run_writes_index_and_bundle() {
        let mut pipeline = fixture();
        pipeline.run().unwrap();

        let store = pipeline.store();
        assert!(store.contains("/index.html"));
        assert!(store.contains("/main.js"));

        let bundle = String::from_utf8(store.read("/main.js").unwrap()).unwrap();
        assert!(bundle.contains("// module label"));
        assert!(bundle.contains("render(label)"));

        // The full bundle is also available as an executable script.
        assert!(pipeline.scripts().fetch("/main.js").is_some());
    }

    #[test]
    fn test_build_id_is_stable_and_content_addressed() {
        let mut pipeline = fixture();
        let first = pipeline.run().unwrap();
        let second = pipeline.run().unwrap();
        assert_eq!(first, second);

        pipeline.update_module(
            ModuleId::new("label"),
            ModuleSource::from_text("export goodbye", vec![]),
        );
        let third = pipeline.run().unwrap();
        assert_ne!(first, third);
    }

    #[test]
    fn test_rebuild_emits_manifest_addressed_by_previous_build() {
        let mut pipeline = fixture();
        let first = pipeline.run().unwrap();

        pipeline.update_module(
            ModuleId::new("label"),
            ModuleSource::from_text("export goodbye", vec![]),
        );
        let second = pipeline.run().unwrap();

        let bytes = pipeline
            .store()
            .read(&manifest_path(&first))
            .expect("manifest written at previous build's address");
        let manifest = UpdateManifest::from_json(&bytes).unwrap();
        assert_eq!(manifest.build, second);
        let changed: Vec<&UnitId> = manifest.changed_units().collect();
        assert_eq!(changed, vec![&UnitId::new("main")]);
    }

    #[test]
    fn test_patch_contains_only_changed_modules() {
        let mut pipeline = fixture();
        let first = pipeline.run().unwrap();

        pipeline.update_module(
            ModuleId::new("label"),
            ModuleSource::from_text("export goodbye", vec![]),
        );
        pipeline.run().unwrap();

        let patch = pipeline
            .scripts()
            .fetch(&unit_patch_path(&UnitId::new("main"), &first))
            .unwrap();
        let ids: Vec<&ModuleId> = patch.modules.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![&ModuleId::new("label")]);
    }

    #[test]
    fn test_unchanged_rebuild_emits_no_manifest() {
        let mut pipeline = fixture();
        let first = pipeline.run().unwrap();
        pipeline.run().unwrap();

        assert!(pipeline.store().read(&manifest_path(&first)).is_none());
    }

    #[test]
    fn test_done_hooks_fire_per_run() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut pipeline = fixture();
        {
            let seen = Rc::clone(&seen);
            pipeline.on_done(move |build| seen.borrow_mut().push(build.id.clone()));
        }

        let first = pipeline.run().unwrap();
        pipeline.update_module(
            ModuleId::new("label"),
            ModuleSource::from_text("export goodbye", vec![]),
        );
        let second = pipeline.run().unwrap();

        assert_eq!(*seen.borrow(), vec![first, second]);
    }

    #[test]
    fn test_missing_module_source_fails_layout() {
        let mut pipeline = Pipeline::new(PipelineConfig::new(
            UnitId::new("main"),
            vec![ModuleId::new("ghost")],
        ));
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, Error::ArtifactNotFound(_)));
    }

    #[test]
    fn test_scan_imports() {
        let text = r#"
            import { label } from "./label.js";
            import "./side-effect.js";
            const util = require('./util.js');
        "#;
        assert_eq!(
            scan_imports(text),
            vec!["./label.js", "./side-effect.js", "./util.js"]
        );
    }

    #[test]
    fn test_artifact_source_round_trip() {
        let mut pipeline = fixture();
        let first = pipeline.run().unwrap();
        pipeline.update_module(
            ModuleId::new("label"),
            ModuleSource::from_text("export goodbye", vec![]),
        );
        let second = pipeline.run().unwrap();

        let source = ArtifactSource::new(pipeline.store(), pipeline.scripts());
        let manifest = source.fetch_manifest(&first).unwrap();
        assert_eq!(manifest.build, second);

        let update = source.fetch_unit(&UnitId::new("main"), &first).unwrap();
        assert_eq!(update.unit, UnitId::new("main"));

        let missing = source.fetch_manifest(&BuildId::new("nope")).unwrap_err();
        assert!(matches!(missing, Error::ArtifactNotFound(_)));
    }
}
