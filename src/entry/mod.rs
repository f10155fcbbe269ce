//! Entry augmentation
//!
//! Before the first compile, the dev server pushes two runtime modules to
//! the front of the entry list — the notification-channel client and the
//! hot-update runtime — so every bundle it produces is update-capable.
//! A client that boots a bundle without them falls back to full reloads.

use crate::artifact::ModuleId;
use crate::pipeline::{ModuleSource, Pipeline};
use crate::swap::ModuleBody;
use serde_json::json;
use std::rc::Rc;

/// Module id of the injected notification-channel client.
pub const CHANNEL_CLIENT: &str = "hotserve/client/channel";

/// Module id of the injected hot-update runtime.
pub const HOT_RUNTIME: &str = "hotserve/client/hot";

pub fn channel_client_id() -> ModuleId {
    ModuleId::new(CHANNEL_CLIENT)
}

pub fn hot_runtime_id() -> ModuleId {
    ModuleId::new(HOT_RUNTIME)
}

/// Prepend the runtime modules to the pipeline's entry. Idempotent.
pub fn augment(pipeline: &mut Pipeline) {
    // Prepended in reverse so the channel client ends up first.
    pipeline.prepend_entry_module(hot_runtime_id(), hot_runtime_source());
    pipeline.prepend_entry_module(channel_client_id(), channel_client_source());
}

/// Whether a booted module graph carries the hot-update runtime.
pub fn is_update_capable(modules: &[ModuleId]) -> bool {
    modules.iter().any(|id| id == &hot_runtime_id())
}

fn channel_client_source() -> ModuleSource {
    let body: ModuleBody = Rc::new(|scope| {
        scope.export("transport", json!("channel"));
        scope.export("connected", json!(true));
        Ok(())
    });
    ModuleSource::new("// hotserve notification channel client\n", vec![], body)
}

fn hot_runtime_source() -> ModuleSource {
    let body: ModuleBody = Rc::new(|scope| {
        scope.export("hot", json!(true));
        Ok(())
    });
    ModuleSource::new("// hotserve hot update runtime\n", vec![], body)
}
