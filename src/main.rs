//! Hotserve CLI
//!
//! Starts a build + serve + notify process for a directory of JavaScript
//! sources: scan the project, compile it into the in-memory store, attach a
//! preview session, then watch for edits and push hot updates through the
//! full protocol, logging each outcome.

use anyhow::{bail, Context};
use clap::Parser;
use hotserve::artifact::{ModuleId, UnitId};
use hotserve::fetch::CheckOutcome;
use hotserve::pipeline::{scan_imports, ModuleSource, Pipeline, PipelineConfig};
use hotserve::server::{DevServer, ServerConfig};
use hotserve::watcher::{FileChangeKind, FileWatcher};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hotserve")]
#[command(author, version, about = "A live-reload development server with hot module replacement", long_about = None)]
struct Cli {
    /// Project directory containing the entry module (main.js or index.js)
    #[arg(value_name = "ROOT", default_value = ".")]
    root: PathBuf,

    /// Host to announce
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to announce
    #[arg(short, long, default_value_t = 8081)]
    port: u16,

    /// Watch poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,

    /// Verbose output (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let root = cli.root.clone();
    let files = collect_js_files(&root)
        .with_context(|| format!("scanning project root {}", root.display()))?;
    if files.is_empty() {
        bail!("no .js sources found under {}", root.display());
    }

    let entry = ["main.js", "index.js"]
        .iter()
        .map(PathBuf::from)
        .find(|candidate| files.contains(candidate));
    let Some(entry) = entry else {
        bail!(
            "no entry module: expected main.js or index.js under {}",
            root.display()
        );
    };

    let mut pipeline = Pipeline::new(PipelineConfig::new(
        UnitId::new("main"),
        vec![module_id_for(&entry)],
    ));
    let mut by_path: HashMap<PathBuf, ModuleId> = HashMap::new();
    for file in &files {
        let id = module_id_for(file);
        pipeline.add_module(id.clone(), read_module(&root, file, &files)?);
        by_path.insert(root.join(file), id);
    }

    let config = ServerConfig {
        hostname: cli.host.clone(),
        port: cli.port,
    };
    let mut server = DevServer::new(pipeline, config);
    server.listen()?;
    println!("Project is running at http://{}:{}/", cli.host, cli.port);

    // In-process preview session: exercises the same protocol a browser
    // would, so every rebuild's outcome is visible in the logs.
    let mut preview = server.connect()?;
    preview.pump()?;

    let watcher = FileWatcher::new(Duration::from_millis(cli.poll_ms));
    for path in by_path.keys() {
        watcher.watch(path);
    }

    loop {
        std::thread::sleep(watcher.poll_interval());
        let changes = watcher.poll();
        if changes.is_empty() {
            continue;
        }

        let mut dirty = false;
        for change in &changes {
            let Some(id) = by_path.get(&change.path) else {
                continue;
            };
            match change.kind {
                FileChangeKind::Modified | FileChangeKind::Created => {
                    let relative = change
                        .path
                        .strip_prefix(&root)
                        .unwrap_or(&change.path)
                        .to_path_buf();
                    match read_module(&root, &relative, &files) {
                        Ok(source) => {
                            server.pipeline_mut().update_module(id.clone(), source);
                            dirty = true;
                        }
                        Err(err) => {
                            tracing::warn!(module = %id, %err, "failed to re-read source, keeping previous")
                        }
                    }
                }
                FileChangeKind::Deleted => {
                    tracing::warn!(module = %id, "source deleted, keeping last compiled version");
                }
            }
        }
        if !dirty {
            continue;
        }

        let build = server.rebuild()?;
        for outcome in preview.pump()? {
            match outcome {
                CheckOutcome::Applied(summary) => {
                    tracing::info!(build = %summary.build, modules = summary.swapped.len(), "hot update applied")
                }
                CheckOutcome::ReloadRequired(reason) => {
                    tracing::warn!(?reason, build = %build, "full reload required")
                }
                CheckOutcome::FirstSync => {}
            }
        }
    }
}

fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let default = match verbosity {
        0 => "hotserve=warn",
        1 => "hotserve=info",
        2 => "hotserve=debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// All .js/.mjs files under `root`, as paths relative to it.
fn collect_js_files(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(root, root, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if entry.file_name() == "node_modules" {
                continue;
            }
            walk(root, &path, out)?;
        } else if path
            .extension()
            .map(|ext| ext == "js" || ext == "mjs")
            .unwrap_or(false)
        {
            if let Ok(relative) = path.strip_prefix(root) {
                out.push(relative.to_path_buf());
            }
        }
    }
    Ok(())
}

fn module_id_for(relative: &Path) -> ModuleId {
    ModuleId::new(relative.to_string_lossy().replace('\\', "/"))
}

/// Read one source file and resolve its relative imports against the
/// scanned file set. Unresolvable specifiers (bare imports, missing files)
/// are left to the served page and skipped here.
fn read_module(root: &Path, relative: &Path, files: &[PathBuf]) -> anyhow::Result<ModuleSource> {
    let text = std::fs::read_to_string(root.join(relative))
        .with_context(|| format!("reading {}", relative.display()))?;

    let mut deps = Vec::new();
    for specifier in scan_imports(&text) {
        match resolve_dep(relative, &specifier, files) {
            Some(dep) => deps.push(dep),
            None => {
                tracing::debug!(from = %relative.display(), %specifier, "unresolved import")
            }
        }
    }
    Ok(ModuleSource::from_text(text, deps))
}

/// Resolve a relative import specifier against the importing file's
/// directory, returning the target's module id when it is in the file set.
fn resolve_dep(from: &Path, specifier: &str, files: &[PathBuf]) -> Option<ModuleId> {
    if !specifier.starts_with("./") && !specifier.starts_with("../") {
        return None;
    }
    let dir = from.parent().unwrap_or_else(|| Path::new(""));
    let mut target = normalize(&dir.join(specifier));
    if target.extension().is_none() {
        target.set_extension("js");
    }
    files.contains(&target).then(|| module_id_for(&target))
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<OsString> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop();
            }
            Component::Normal(part) => parts.push(part.to_os_string()),
            _ => {}
        }
    }
    parts.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_components() {
        assert_eq!(
            normalize(Path::new("widgets/./../lib/util.js")),
            PathBuf::from("lib/util.js")
        );
    }

    #[test]
    fn test_resolve_dep_within_file_set() {
        let files = vec![PathBuf::from("main.js"), PathBuf::from("lib/util.js")];

        let resolved = resolve_dep(Path::new("main.js"), "./lib/util.js", &files);
        assert_eq!(resolved, Some(ModuleId::new("lib/util.js")));

        let resolved = resolve_dep(Path::new("lib/util.js"), "../main", &files);
        assert_eq!(resolved, Some(ModuleId::new("main.js")));

        assert_eq!(resolve_dep(Path::new("main.js"), "lodash", &files), None);
        assert_eq!(resolve_dep(Path::new("main.js"), "./ghost.js", &files), None);
    }
}
