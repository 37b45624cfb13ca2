// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Finalizer, label and annotation helpers on top of k8s-openapi's ObjectMeta.
/// The mutating helpers report whether they changed anything so callers can skip no-op writes.
pub trait ObjectMetaExt {
    fn has_deletion_timestamp(&self) -> bool;
    fn has_finalizer(&self, finalizer: &str) -> bool;
    fn add_finalizer(&mut self, finalizer: &str) -> bool;
    fn remove_finalizer(&mut self, finalizer: &str) -> bool;
    fn finalizers_empty(&self) -> bool;
    fn annotation(&self, key: &str) -> Option<&str>;
    fn remove_annotation(&mut self, key: &str) -> bool;
    fn label(&self, key: &str) -> Option<&str>;
    fn merge_labels(&mut self, labels: &BTreeMap<String, String>) -> bool;
    fn name_or_empty(&self) -> &str;
    fn namespace_or_empty(&self) -> &str;
}

impl ObjectMetaExt for ObjectMeta {
    fn has_deletion_timestamp(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers
            .as_ref()
            .map_or(false, |finalizers| finalizers.iter().any(|f| f == finalizer))
    }

    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers
            .get_or_insert_with(Vec::new)
            .push(finalizer.to_string());
        true
    }

    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        match self.finalizers.as_mut() {
            Some(finalizers) => {
                let before = finalizers.len();
                finalizers.retain(|f| f != finalizer);
                before != finalizers.len()
            }
            None => false,
        }
    }

    fn finalizers_empty(&self) -> bool {
        self.finalizers.as_ref().map_or(true, |f| f.is_empty())
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|annotations| annotations.get(key))
            .map(String::as_str)
    }

    fn remove_annotation(&mut self, key: &str) -> bool {
        self.annotations
            .as_mut()
            .map_or(false, |annotations| annotations.remove(key).is_some())
    }

    fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    fn merge_labels(&mut self, labels: &BTreeMap<String, String>) -> bool {
        let current = self.labels.get_or_insert_with(BTreeMap::new);
        let mut changed = false;
        for (key, value) in labels {
            if current.get(key) != Some(value) {
                current.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }

    fn name_or_empty(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    fn namespace_or_empty(&self) -> &str {
        self.namespace.as_deref().unwrap_or("")
    }
}
