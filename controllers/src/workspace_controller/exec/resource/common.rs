// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::{managed_labels, WORKSPACE_LABEL};
use crate::crds::Workspace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use llmcloud_runtime::kubernetes_api_objects::object_meta::ObjectMetaExt;
use std::collections::BTreeMap;

/// The namespace that holds everything living in the workspace.
pub fn workspace_namespace(ws: &Workspace) -> String {
    format!("workspace-{}", ws.metadata.name_or_empty())
}

pub fn make_labels(ws: &Workspace) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.insert(WORKSPACE_LABEL.to_string(), ws.metadata.name_or_empty().to_string());
    labels
}

pub fn make_owner_references(ws: &Workspace) -> Vec<OwnerReference> {
    ws.controller_owner_ref(&()).into_iter().collect()
}
