// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{Workspace, WorkspaceResourceQuotas};
use crate::workspace_controller::exec::resource::common::*;
use k8s_openapi::api::core::v1::{ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use std::collections::BTreeMap;

pub const RESOURCE_QUOTA_NAME: &str = "workspace-quota";

pub fn make_resource_quota(ws: &Workspace, quotas: &WorkspaceResourceQuotas) -> ResourceQuota {
    let mut hard = BTreeMap::new();
    if let Some(max_vms) = quotas.max_vms {
        hard.insert(
            "count/virtualmachines.llmcloud.llmcloud.io".to_string(),
            Quantity(max_vms.to_string()),
        );
    }
    if let Some(max_models) = quotas.max_models {
        hard.insert(
            "count/modeldeployments.llmcloud.llmcloud.io".to_string(),
            Quantity(max_models.to_string()),
        );
    }
    if let Some(max_cpu) = &quotas.max_cpu {
        hard.insert("requests.cpu".to_string(), Quantity(max_cpu.clone()));
    }
    if let Some(max_memory) = &quotas.max_memory {
        hard.insert("requests.memory".to_string(), Quantity(max_memory.clone()));
    }
    ResourceQuota {
        metadata: ObjectMeta {
            name: Some(RESOURCE_QUOTA_NAME.to_string()),
            namespace: Some(workspace_namespace(ws)),
            labels: Some(make_labels(ws)),
            owner_references: Some(make_owner_references(ws)),
            ..ObjectMeta::default()
        },
        spec: Some(ResourceQuotaSpec {
            hard: Some(hard),
            ..ResourceQuotaSpec::default()
        }),
        status: None,
    }
}

/// The server-side apply of the workspace quota, or None when the workspace declares no quotas.
pub fn resource_quota_apply_request(ws: &Workspace) -> Option<Result<KubeAPIRequest, String>> {
    let quotas = ws.spec.resource_quotas.as_ref()?;
    let quota = make_resource_quota(ws, quotas);
    Some(
        quota
            .marshal()
            .map(|obj| {
                KubeAPIRequest::ApplyRequest(KubeApplyRequest {
                    api_resource: ResourceQuota::api_resource(),
                    name: RESOURCE_QUOTA_NAME.to_string(),
                    namespace: workspace_namespace(ws),
                    obj,
                })
            })
            .map_err(|e| e.to_string()),
    )
}
