//! Dev server
//!
//! Ties the halves together: augments the pipeline's entry, wires the
//! version emitter to the pipeline's done-hook, serves compiled output
//! from the in-memory store, and hands out connected client runtimes.
//!
//! The lifecycle is a small state machine; binding an actual socket
//! belongs to the embedding process, not this layer.

use crate::artifact::{bundle_path, BuildId};
use crate::channel::ChannelPair;
use crate::client::ClientRuntime;
use crate::emitter::VersionEmitter;
use crate::entry;
use crate::error::{Error, Result};
use crate::fetch::UpdateSource;
use crate::pipeline::{ArtifactSource, Pipeline};
use crate::store::{StaticFiles, StaticResponse};
use crate::swap::HotSwapEngine;
use std::cell::RefCell;
use std::rc::Rc;

/// Dev server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub hostname: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: "127.0.0.1".to_string(),
            port: 8081,
        }
    }
}

/// Server lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Running,
    Stopped,
}

/// The build + serve + notify process, in one object.
pub struct DevServer {
    config: ServerConfig,
    pipeline: Pipeline,
    emitter: Rc<RefCell<VersionEmitter>>,
    statics: StaticFiles,
    state: ServerState,
}

impl DevServer {
    /// Wrap a pipeline: augment its entry with the client runtime modules
    /// and subscribe the version emitter to build completions.
    pub fn new(mut pipeline: Pipeline, config: ServerConfig) -> Self {
        entry::augment(&mut pipeline);

        let emitter = Rc::new(RefCell::new(VersionEmitter::new()));
        {
            let emitter = Rc::clone(&emitter);
            pipeline.on_done(move |build| {
                emitter.borrow_mut().on_build_complete(build.id.clone());
            });
        }

        let statics = StaticFiles::new(pipeline.store());
        Self {
            config,
            pipeline,
            emitter,
            statics,
            state: ServerState::Created,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn emitter(&self) -> Rc<RefCell<VersionEmitter>> {
        Rc::clone(&self.emitter)
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// The newest build id, once `listen` has run.
    pub fn current_version(&self) -> Option<BuildId> {
        self.emitter.borrow().current_version().cloned()
    }

    /// Run the initial build and start accepting work.
    pub fn listen(&mut self) -> Result<BuildId> {
        let build = self.pipeline.run()?;
        self.state = ServerState::Running;
        tracing::info!(
            "Project is running at http://{}:{}/",
            self.config.hostname,
            self.config.port
        );
        Ok(build)
    }

    pub fn stop(&mut self) {
        self.state = ServerState::Stopped;
    }

    /// Answer one request path from the output store.
    pub fn handle_request(&self, url: &str) -> StaticResponse {
        if self.state != ServerState::Running {
            return StaticResponse::not_found();
        }
        self.statics.handle(url)
    }

    /// Recompile after source changes; sessions are notified through the
    /// emitter hook.
    pub fn rebuild(&mut self) -> Result<BuildId> {
        if self.state != ServerState::Running {
            return Err(Error::NotRunning);
        }
        self.pipeline.run()
    }

    /// Accept a new client: register its session (which greets it with the
    /// current version pair) and return a runtime booted from the current
    /// build.
    pub fn connect(&mut self) -> Result<ClientRuntime> {
        if self.state != ServerState::Running {
            return Err(Error::NotRunning);
        }
        let build = self
            .pipeline
            .last_build()
            .cloned()
            .ok_or(Error::NotRunning)?;

        let (server_end, client_end) = ChannelPair::new();
        self.emitter.borrow_mut().connect(server_end);

        // Boot the current build's units into a fresh engine, the way a
        // browser executes the served bundles.
        let engine = Rc::new(HotSwapEngine::new());
        let scripts = self.pipeline.scripts();
        let mut hot_enabled = false;
        for (unit, modules) in &build.units {
            let path = bundle_path(unit);
            let script = scripts
                .fetch(&path)
                .ok_or(Error::ArtifactNotFound(path))?;
            for (id, body) in &script.modules {
                engine.load(id.clone(), Rc::clone(body))?;
            }
            hot_enabled = hot_enabled || entry::is_update_capable(modules);
        }

        let source: Rc<dyn UpdateSource> = Rc::new(ArtifactSource::new(
            self.pipeline.store(),
            self.pipeline.scripts(),
        ));
        Ok(ClientRuntime::new(client_end, source, engine, hot_enabled))
    }
}
