// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::api::DynamicObject;
use std::collections::BTreeMap;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubeObjectRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl KubeObjectRef {
    pub fn new(api_version: &str, kind: &str, namespace: &str, name: &str) -> KubeObjectRef {
        KubeObjectRef {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

// ObjectMap is the content of the store, keyed by (apiVersion, kind, namespace, name).
// The apiVersion keeps same-named kinds of different groups apart (llmcloud and KubeVirt
// both define VirtualMachine). Cluster-scoped objects use an empty namespace.
#[derive(Clone, Debug, Default)]
pub struct ObjectMap {
    inner: BTreeMap<KubeObjectRef, DynamicObject>,
}

impl ObjectMap {
    pub fn new() -> ObjectMap {
        ObjectMap { inner: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn insert(&mut self, key: KubeObjectRef, value: DynamicObject) -> Option<DynamicObject> {
        self.inner.insert(key, value)
    }

    pub fn remove(&mut self, key: &KubeObjectRef) -> Option<DynamicObject> {
        self.inner.remove(key)
    }

    pub fn get(&self, key: &KubeObjectRef) -> Option<&DynamicObject> {
        self.inner.get(key)
    }

    pub fn contains_key(&self, key: &KubeObjectRef) -> bool {
        self.inner.contains_key(key)
    }

    /// Objects of the kind in the namespace; an empty namespace selects every namespace.
    pub fn list(&self, api_version: &str, kind: &str, namespace: &str) -> Vec<DynamicObject> {
        self.inner
            .iter()
            .filter(|(key, _)| key.api_version == api_version && key.kind == kind && (namespace.is_empty() || key.namespace == namespace))
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&KubeObjectRef, &DynamicObject)> {
        self.inner.iter()
    }
}
