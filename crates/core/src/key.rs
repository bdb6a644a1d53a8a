use std::fmt;

use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("object has no metadata.name")]
    MissingName,
    #[error("unexpected key format: {0:?}")]
    Malformed(String),
}

/// Identity of one resource instance within a kind: `namespace/name`,
/// or bare `name` when the object is cluster-scoped.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    /// Empty for cluster-scoped objects.
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self { namespace: namespace.to_string(), name: name.to_string() }
    }

    pub fn for_object(obj: &DynamicObject) -> Result<Self, KeyError> {
        let name = obj.metadata.name.as_deref().filter(|n| !n.is_empty()).ok_or(KeyError::MissingName)?;
        let namespace = obj.metadata.namespace.as_deref().unwrap_or("");
        Ok(Self::new(namespace, name))
    }

    pub fn parse(key: &str) -> Result<Self, KeyError> {
        let parts: Vec<_> = key.split('/').collect();
        let (namespace, name) = match parts.as_slice() {
            [name] => ("", *name),
            [namespace, name] => (*namespace, *name),
            _ => return Err(KeyError::Malformed(key.to_string())),
        };
        if name.is_empty() {
            return Err(KeyError::Malformed(key.to_string()));
        }
        Ok(Self::new(namespace, name))
    }

    pub fn is_cluster_scoped(&self) -> bool {
        self.namespace.is_empty()
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::{ApiResource, GroupVersionKind};

    fn widget(name: &str, ns: Option<&str>) -> DynamicObject {
        let ar = ApiResource::from_gvk(&GroupVersionKind::gvk("example.com", "v1", "Widget"));
        let obj = DynamicObject::new(name, &ar);
        match ns {
            Some(ns) => obj.within(ns),
            None => obj,
        }
    }

    #[test]
    fn key_for_namespaced_and_cluster_objects() {
        let k = ObjectKey::for_object(&widget("foo", Some("default"))).unwrap();
        assert_eq!(k.to_string(), "default/foo");
        let k = ObjectKey::for_object(&widget("foo", None)).unwrap();
        assert_eq!(k.to_string(), "foo");
        assert!(k.is_cluster_scoped());
    }

    #[test]
    fn same_object_always_yields_same_key() {
        let a = ObjectKey::for_object(&widget("foo", Some("default"))).unwrap();
        let mut changed = widget("foo", Some("default"));
        changed.metadata.resource_version = Some("42".into());
        let b = ObjectKey::for_object(&changed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_name_is_an_error() {
        let mut obj = widget("foo", Some("default"));
        obj.metadata.name = None;
        assert_eq!(ObjectKey::for_object(&obj), Err(KeyError::MissingName));
    }

    #[test]
    fn parse_accepts_one_or_two_segments() {
        assert_eq!(ObjectKey::parse("default/foo").unwrap(), ObjectKey::new("default", "foo"));
        assert_eq!(ObjectKey::parse("foo").unwrap(), ObjectKey::new("", "foo"));
        let k = ObjectKey::new("kube-system", "bar");
        assert_eq!(ObjectKey::parse(&k.to_string()).unwrap(), k);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        assert!(matches!(ObjectKey::parse("a/b/c"), Err(KeyError::Malformed(_))));
        assert!(matches!(ObjectKey::parse("default/"), Err(KeyError::Malformed(_))));
        assert!(matches!(ObjectKey::parse(""), Err(KeyError::Malformed(_))));
    }
}
