// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::resource::ResourceBuilder;
use crate::crds::{Workspace, WorkspaceMember};
use crate::workspace_controller::exec::resource::common::*;
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Keeps the RoleBinding of one workspace member in sync.
pub struct RoleBindingBuilder {
    pub member: WorkspaceMember,
}

impl ResourceBuilder<Workspace> for RoleBindingBuilder {
    fn get_request(&self, ws: &Workspace) -> KubeGetRequest {
        KubeGetRequest {
            api_resource: RoleBinding::api_resource(),
            name: role_binding_name(ws, &self.member),
            namespace: workspace_namespace(ws),
        }
    }

    fn make(&self, ws: &Workspace) -> Result<DynamicObject, String> {
        make_role_binding(ws, &self.member).marshal().map_err(|e| e.to_string())
    }

    fn update(&self, ws: &Workspace, found: DynamicObject) -> Result<Option<DynamicObject>, String> {
        let mut role_binding = RoleBinding::unmarshal(found).map_err(|e| e.to_string())?;
        let desired = make_role_binding(ws, &self.member);
        let mut changed = role_binding.metadata.merge_labels(&make_labels(ws));
        if role_binding.subjects != desired.subjects {
            role_binding.subjects = desired.subjects;
            changed = true;
        }
        if changed {
            role_binding.marshal().map(Some).map_err(|e| e.to_string())
        } else {
            Ok(None)
        }
    }

    // roleRef is immutable, a role change replaces the binding
    fn needs_recreate(&self, ws: &Workspace, found: &DynamicObject) -> bool {
        match RoleBinding::unmarshal(found.clone()) {
            Ok(role_binding) => role_binding.role_ref != make_role_binding(ws, &self.member).role_ref,
            Err(_) => false,
        }
    }
}

pub fn role_binding_name(ws: &Workspace, member: &WorkspaceMember) -> String {
    format!("{}-{}", ws.metadata.name_or_empty(), member.username)
}

/// owner and admin administer the namespace, developers edit it, everyone else views it.
pub fn cluster_role_for(role: &str) -> &'static str {
    match role {
        "owner" | "admin" => "admin",
        "developer" => "edit",
        _ => "view",
    }
}

pub fn make_role_binding(ws: &Workspace, member: &WorkspaceMember) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(role_binding_name(ws, member)),
            namespace: Some(workspace_namespace(ws)),
            labels: Some(make_labels(ws)),
            ..ObjectMeta::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: cluster_role_for(&member.role).to_string(),
        },
        subjects: Some(vec![Subject {
            api_group: Some(RBAC_API_GROUP.to_string()),
            kind: "User".to_string(),
            name: member.username.clone(),
            namespace: None,
        }]),
    }
}
