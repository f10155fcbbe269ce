//! Hotserve: a live-reload development server with hot module replacement
//!
//! Hotserve delivers live code updates to a running client session without a
//! full reload. When sources change, the pipeline recompiles, the version
//! emitter announces the new build to every connected session, and each
//! client pulls exactly the changed units and splices them into its running
//! module graph — preserving application state wherever a module opted in
//! to accept its dependency's update.
//!
//! # Quick Start
//!
//! ```no_run
//! use hotserve::artifact::{ModuleId, UnitId};
//! use hotserve::pipeline::{ModuleSource, Pipeline, PipelineConfig};
//! use hotserve::server::{DevServer, ServerConfig};
//!
//! fn main() -> hotserve::Result<()> {
//!     let mut pipeline = Pipeline::new(PipelineConfig::new(
//!         UnitId::new("main"),
//!         vec![ModuleId::new("app")],
//!     ));
//!     pipeline.add_module(ModuleId::new("app"), ModuleSource::from_text("render()", vec![]));
//!
//!     let mut server = DevServer::new(pipeline, ServerConfig::default());
//!     server.listen()?;
//!
//!     let mut client = server.connect()?;
//!     client.pump()?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! An update flows: source change → [`pipeline`] → [`emitter`] →
//! [`channel`] → [`bus`] → [`fetch`] → [`swap`].
//!
//! | Category | Modules |
//! |----------|---------|
//! | **Core protocol** | [`emitter`], [`channel`], [`fetch`], [`swap`], [`bus`], [`entry`] |
//! | **Collaborators** | [`pipeline`], [`store`], [`watcher`] |
//! | **Composition** | [`server`], [`client`], [`error`](Error) |

pub mod artifact;
pub mod bus;
pub mod channel;
pub mod client;
pub mod emitter;
pub mod entry;
pub mod fetch;
pub mod pipeline;
pub mod server;
pub mod store;
pub mod swap;
pub mod watcher;

mod error;

pub use error::{Error, Result};
pub use server::{DevServer, ServerConfig};

/// Hotserve version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
