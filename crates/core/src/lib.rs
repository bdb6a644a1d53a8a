//! Tether core types: object keys, watched resource kinds and the feed/registration seams.

#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use futures::stream::BoxStream;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use serde::{Deserialize, Serialize};

mod key;

pub use key::{KeyError, ObjectKey};

/// A remote resource type the controller watches and reconciles.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WatchedKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
    pub namespaced: bool,
}

impl WatchedKind {
    pub fn new(group: &str, version: &str, kind: &str, plural: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
            namespaced: true,
        }
    }

    /// `group/version/Kind`, or `version/Kind` for the core group.
    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    /// Registration name, `<plural>.<group>`.
    pub fn crd_name(&self) -> String {
        format!("{}.{}", self.plural, self.group)
    }

    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(&self.group, &self.version, &self.kind);
        ApiResource::from_gvk_with_plural(&gvk, &self.plural)
    }
}

impl fmt::Display for WatchedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.plural)
    }
}

/// Parses `group/version/Kind[:plural]` (or `version/Kind[:plural]`).
impl FromStr for WatchedKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (gvk, plural) = match s.split_once(':') {
            Some((gvk, plural)) if !plural.is_empty() => (gvk, Some(plural)),
            Some(_) => return Err(anyhow::anyhow!("empty plural in kind spec: {}", s)),
            None => (s, None),
        };
        let parts: Vec<_> = gvk.split('/').collect();
        let (group, version, kind) = match parts.as_slice() {
            [version, kind] => ("", *version, *kind),
            [group, version, kind] => (*group, *version, *kind),
            _ => return Err(anyhow::anyhow!("invalid kind spec: {} (expect group/v1/Kind[:plural])", s)),
        };
        if version.is_empty() || kind.is_empty() {
            return Err(anyhow::anyhow!("invalid kind spec: {}", s));
        }
        let plural = plural.map_or_else(|| guess_plural(kind), str::to_string);
        Ok(Self::new(group, version, kind, &plural))
    }
}

fn guess_plural(kind: &str) -> String {
    let lower = kind.to_ascii_lowercase();
    if lower.ends_with('s') || lower.ends_with('x') || lower.ends_with("ch") {
        format!("{lower}es")
    } else if let Some(stem) = lower.strip_suffix('y').filter(|s| !s.ends_with(|c| matches!(c, 'a' | 'e' | 'o' | 'u'))) {
        format!("{stem}ies")
    } else {
        format!("{lower}s")
    }
}

/// One notification from a remote list+watch feed.
///
/// `Restarted` carries a complete listing: the initial list and every relist.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    Applied(DynamicObject),
    Deleted(DynamicObject),
    Restarted(Vec<DynamicObject>),
}

/// A remote feed for one resource kind.
pub trait WatchSource: Send + Sync {
    /// Open the feed. Items are delivered in order; errors are transient.
    fn watch(&self) -> BoxStream<'static, anyhow::Result<WatchEvent>>;
}

/// Idempotent remote registration of a resource kind.
#[async_trait::async_trait]
pub trait KindRegistrar: Send + Sync {
    /// Create the kind's registration, treating "already exists" as success.
    async fn ensure_exists(&self, kind: &WatchedKind) -> anyhow::Result<()>;
}

pub mod prelude {
    pub use super::{KeyError, KindRegistrar, ObjectKey, WatchEvent, WatchSource, WatchedKind};
}
