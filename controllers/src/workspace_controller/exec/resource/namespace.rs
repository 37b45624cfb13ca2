// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::resource::ResourceBuilder;
use crate::crds::Workspace;
use crate::workspace_controller::exec::resource::common::*;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;

pub struct NamespaceBuilder {}

impl ResourceBuilder<Workspace> for NamespaceBuilder {
    fn get_request(&self, ws: &Workspace) -> KubeGetRequest {
        KubeGetRequest {
            api_resource: Namespace::api_resource(),
            name: workspace_namespace(ws),
            namespace: String::new(),
        }
    }

    fn make(&self, ws: &Workspace) -> Result<DynamicObject, String> {
        make_namespace(ws).marshal().map_err(|e| e.to_string())
    }

    // A namespace that already exists (possibly created by someone else) only gets
    // the management labels merged in; its owner references are left alone.
    fn update(&self, ws: &Workspace, found: DynamicObject) -> Result<Option<DynamicObject>, String> {
        let mut namespace = Namespace::unmarshal(found).map_err(|e| e.to_string())?;
        if namespace.metadata.merge_labels(&make_labels(ws)) {
            namespace.marshal().map(Some).map_err(|e| e.to_string())
        } else {
            Ok(None)
        }
    }
}

pub fn make_namespace(ws: &Workspace) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(workspace_namespace(ws)),
            labels: Some(make_labels(ws)),
            owner_references: Some(make_owner_references(ws)),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    }
}
