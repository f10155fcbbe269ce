//! Shared test helpers for integration tests

use hotserve::artifact::{ModuleId, UnitId};
use hotserve::pipeline::{ModuleSource, Pipeline, PipelineConfig};
use hotserve::server::{DevServer, ServerConfig};
use hotserve::swap::{ModuleBody, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// Render log shared between the demo app's module bodies and the test.
#[derive(Default)]
pub struct RenderLog {
    pub entries: RefCell<Vec<String>>,
}

impl RenderLog {
    #[allow(dead_code)]
    pub fn entries(&self) -> Vec<String> {
        self.entries.borrow().clone()
    }

    pub fn count_of(&self, entry: &str) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|line| *line == entry)
            .count()
    }
}

pub fn greeting_id() -> ModuleId {
    ModuleId::new("greeting.js")
}

pub fn main_id() -> ModuleId {
    ModuleId::new("main.js")
}

/// Leaf module exporting a greeting text.
pub fn greeting_source(text: &str) -> ModuleSource {
    let exported = text.to_string();
    let body: ModuleBody = Rc::new(move |scope| {
        scope.export("text", Value::String(exported.clone()));
        Ok(())
    });
    ModuleSource::new(
        format!("export const text = \"{}\";\n", text),
        vec![],
        body,
    )
}

/// Entry module: renders the greeting and accepts its hot updates.
pub fn main_source(log: Rc<RenderLog>) -> ModuleSource {
    let body: ModuleBody = Rc::new(move |scope| {
        let greeting = scope.require(&greeting_id())?;
        let text = greeting["text"].as_str().unwrap_or_default().to_string();
        log.entries.borrow_mut().push(format!("render {}", text));
        scope.export("rendered", Value::String(text));

        let log = Rc::clone(&log);
        scope.accept(&[greeting_id()], move || {
            log.entries.borrow_mut().push("accept greeting.js".to_string());
        });
        Ok(())
    });
    ModuleSource::new(
        "import { text } from \"./greeting.js\";\nrender(text);\n",
        vec![greeting_id()],
        body,
    )
}

/// A dev server over the two-module demo app.
pub fn demo_server(log: Rc<RenderLog>) -> DevServer {
    let mut pipeline = Pipeline::new(PipelineConfig::new(
        UnitId::new("main"),
        vec![main_id()],
    ));
    pipeline.add_module(greeting_id(), greeting_source("hello"));
    pipeline.add_module(main_id(), main_source(log));
    DevServer::new(pipeline, ServerConfig::default())
}
