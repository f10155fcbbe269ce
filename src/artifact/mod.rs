//! Build artifacts and addressing
//!
//! Types shared between the build pipeline and connected clients: build
//! identifiers, unit and module ids, the hot-update manifest naming which
//! units changed between two builds, and the address scheme under which
//! those artifacts are served.
//!
//! A manifest is addressed by the build a client *already has*, not by the
//! build it describes. The server can therefore write the artifact once and
//! serve it unchanged no matter when a client gets around to fetching it.
//!
//! # Example
//! ```
//! use hotserve::artifact::{BuildId, UnitId, UpdateManifest, manifest_path};
//!
//! let mut manifest = UpdateManifest::new(BuildId::new("a1b2c3"));
//! manifest.mark_changed(UnitId::new("main"));
//!
//! let prev = BuildId::new("f0e1d2");
//! assert_eq!(manifest_path(&prev), "/f0e1d2.hot-update.json");
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Opaque identifier naming one compilation output.
///
/// Clients rely on value inequality only; no ordering between builds is
/// implied or needed.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one compiled unit: a chunk holding one or more module
/// bodies that is fetched and patched as a whole.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a single module inside a unit.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Manifest naming which units changed between two builds.
///
/// Wire shape: `{ "h": "<buildId>", "c": { "<unitId>": true, ... } }`.
/// Immutable once produced by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateManifest {
    /// The build this manifest leads to.
    #[serde(rename = "h")]
    pub build: BuildId,
    /// Units whose contents changed, keyed by unit id.
    #[serde(rename = "c")]
    pub changed: BTreeMap<UnitId, bool>,
}

impl UpdateManifest {
    pub fn new(build: BuildId) -> Self {
        Self {
            build,
            changed: BTreeMap::new(),
        }
    }

    /// Record that a unit's contents changed in this build.
    pub fn mark_changed(&mut self, unit: UnitId) {
        self.changed.insert(unit, true);
    }

    /// Units to fetch patches for, in deterministic order.
    pub fn changed_units(&self) -> impl Iterator<Item = &UnitId> {
        self.changed
            .iter()
            .filter(|(_, flagged)| **flagged)
            .map(|(unit, _)| unit)
    }

    pub fn is_empty(&self) -> bool {
        !self.changed.values().any(|flagged| *flagged)
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Store path of the manifest addressed by the build a client already has.
pub fn manifest_path(prev: &BuildId) -> String {
    format!("/{}.hot-update.json", prev)
}

/// Store path of a unit patch addressed by unit id and previous build.
pub fn unit_patch_path(unit: &UnitId, prev: &BuildId) -> String {
    format!("/{}.{}.hot-update.js", unit, prev)
}

/// Store path of a unit's full bundle.
pub fn bundle_path(unit: &UnitId) -> String {
    format!("/{}.js", unit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_build_id_equality() {
        assert_eq!(BuildId::new("h1"), BuildId::new("h1"));
        assert_ne!(BuildId::new("h1"), BuildId::new("h2"));
    }

    #[test]
    fn test_manifest_wire_shape() {
        let mut manifest = UpdateManifest::new(BuildId::new("h2"));
        manifest.mark_changed(UnitId::new("main"));

        let json = String::from_utf8(manifest.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"h":"h2","c":{"main":true}}"#);
    }

    #[test]
    fn test_manifest_round_trip() {
        let mut manifest = UpdateManifest::new(BuildId::new("h2"));
        manifest.mark_changed(UnitId::new("main"));
        manifest.mark_changed(UnitId::new("vendor"));

        let bytes = manifest.to_json().unwrap();
        let decoded = UpdateManifest::from_json(&bytes).unwrap();
        assert_eq!(decoded, manifest);

        let units: Vec<&UnitId> = decoded.changed_units().collect();
        assert_eq!(units, vec![&UnitId::new("main"), &UnitId::new("vendor")]);
    }

    #[test]
    fn test_manifest_malformed_payload() {
        let err = UpdateManifest::from_json(b"{\"h\": 42}").unwrap_err();
        assert!(matches!(err, crate::Error::MalformedPayload { .. }));
    }

    #[test]
    fn test_artifact_addresses() {
        let prev = BuildId::new("58ddd9a7");
        let unit = UnitId::new("main");

        assert_eq!(manifest_path(&prev), "/58ddd9a7.hot-update.json");
        assert_eq!(unit_patch_path(&unit, &prev), "/main.58ddd9a7.hot-update.js");
        assert_eq!(bundle_path(&unit), "/main.js");
    }
}
