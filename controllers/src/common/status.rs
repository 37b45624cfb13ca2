// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::{READY_CONDITION, RECONCILIATION_ERROR_REASON};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::DynamicObject;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::{extract_some_k_update_resp, extract_some_k_update_status_resp};

/// How a write of the custom resource (metadata or status) ended.
#[derive(Debug)]
pub enum WriteOutcome {
    Written(DynamicObject),
    // someone else wrote the object since it was read
    Conflict,
    Failed(String),
}

fn outcome(res: Option<Result<DynamicObject, APIError>>, verb: &str) -> WriteOutcome {
    match res {
        Some(Ok(obj)) => WriteOutcome::Written(obj),
        Some(Err(APIError::Conflict)) => WriteOutcome::Conflict,
        Some(Err(err)) => WriteOutcome::Failed(format!("{} failed: {}", verb, err)),
        None => WriteOutcome::Failed(format!("expected a response to {}", verb)),
    }
}

pub fn update_outcome(resp_o: Option<KubeAPIResponse>) -> WriteOutcome {
    outcome(extract_some_k_update_resp!(resp_o), "update")
}

pub fn update_status_outcome(resp_o: Option<KubeAPIResponse>) -> WriteOutcome {
    outcome(extract_some_k_update_status_resp!(resp_o), "update status")
}

/// Writes the status of cr through the status subresource, preconditioned on cr's resource version.
pub fn update_status_request<K: KubeResource>(cr: &K) -> Result<KubeAPIRequest, serde_json::Error> {
    let obj = cr.marshal()?;
    Ok(KubeAPIRequest::UpdateStatusRequest(KubeUpdateStatusRequest {
        api_resource: K::api_resource(),
        name: obj.metadata.name_or_empty().to_string(),
        namespace: obj.metadata.namespace_or_empty().to_string(),
        obj,
    }))
}

pub fn ready_condition(ready: bool, reason: &str, message: &str, observed_generation: Option<i64>) -> Condition {
    new_condition(READY_CONDITION, ready, reason, message, observed_generation)
}

pub fn reconciliation_error_condition(message: &str, observed_generation: Option<i64>) -> Condition {
    ready_condition(false, RECONCILIATION_ERROR_REASON, message, observed_generation)
}
