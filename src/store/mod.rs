//! Compiled output store and static file serving
//!
//! The build pipeline writes its compiled output into an in-memory store
//! rather than onto disk; the static file layer answers browser requests
//! straight out of that store. `/` maps to `/index.html`, the favicon path
//! is answered not-found without touching the store, and anything missing
//! yields a 404.

use std::cell::RefCell;
use std::collections::HashMap;

/// In-memory output store, standing in for a disk output directory.
///
/// Paths are absolute, `/`-rooted strings as the browser would request them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: RefCell<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a file, replacing any previous contents at that path.
    pub fn write(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.borrow_mut().insert(path.into(), contents.into());
    }

    /// Read a file's contents, if present.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        self.files.borrow().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.borrow().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.borrow().is_empty()
    }

    /// All stored paths, unordered.
    pub fn paths(&self) -> Vec<String> {
        self.files.borrow().keys().cloned().collect()
    }
}

/// MIME type lookup from file extension
pub fn mime_type_for_extension(ext: &str) -> &'static str {
    match ext.to_lowercase().as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "map" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Response from the static file layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl StaticResponse {
    fn ok(path: &str, body: Vec<u8>) -> Self {
        let ext = path.rsplit('.').next().unwrap_or("");
        Self {
            status: 200,
            content_type: Some(mime_type_for_extension(ext).to_string()),
            body,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            content_type: None,
            body: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Serves compiled output from the in-memory store.
pub struct StaticFiles {
    store: std::rc::Rc<MemoryStore>,
}

impl StaticFiles {
    pub fn new(store: std::rc::Rc<MemoryStore>) -> Self {
        Self { store }
    }

    /// Answer one request path.
    pub fn handle(&self, url: &str) -> StaticResponse {
        // Favicon requests never hit the store.
        if url == "/favicon.ico" {
            return StaticResponse::not_found();
        }

        let path = if url == "/" { "/index.html" } else { url };

        match self.store.read(path) {
            Some(body) => StaticResponse::ok(path, body),
            None => StaticResponse::not_found(),
        }
    }
}
