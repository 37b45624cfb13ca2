// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ApiResource;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::{extract_some_k_delete_resp, extract_some_k_get_resp};

/// Where a custom resource stands with respect to its finalizer marker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    // deleting, marker still present: run the kind's cleanup
    Finalize,
    // deleting, marker already gone: nothing left to do
    Released,
    // live, marker missing: add it before touching anything external
    Claim,
    // live, marker present: synchronize
    Sync,
}

pub fn lifecycle(meta: &ObjectMeta, finalizer: &str) -> Lifecycle {
    match (meta.has_deletion_timestamp(), meta.has_finalizer(finalizer)) {
        (true, true) => Lifecycle::Finalize,
        (true, false) => Lifecycle::Released,
        (false, false) => Lifecycle::Claim,
        (false, true) => Lifecycle::Sync,
    }
}

fn update_finalizers_request<K: KubeResource>(
    cr: &K,
    finalizer: &str,
    add: bool,
) -> Result<KubeAPIRequest, serde_json::Error> {
    let mut obj = cr.marshal()?;
    if add {
        obj.metadata.add_finalizer(finalizer);
    } else {
        obj.metadata.remove_finalizer(finalizer);
    }
    // The resource version read with the custom resource stays in place,
    // so a concurrent writer turns this update into a conflict.
    Ok(KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
        api_resource: K::api_resource(),
        name: obj.metadata.name_or_empty().to_string(),
        namespace: obj.metadata.namespace_or_empty().to_string(),
        obj,
    }))
}

pub fn add_finalizer_request<K: KubeResource>(cr: &K, finalizer: &str) -> Result<KubeAPIRequest, serde_json::Error> {
    update_finalizers_request(cr, finalizer, true)
}

pub fn remove_finalizer_request<K: KubeResource>(
    cr: &K,
    finalizer: &str,
) -> Result<KubeAPIRequest, serde_json::Error> {
    update_finalizers_request(cr, finalizer, false)
}

/// An object the finalizer has to see gone before the marker can be removed.
#[derive(Clone, Debug)]
pub struct Dependent {
    pub api_resource: ApiResource,
    pub namespace: String,
    pub name: String,
}

impl Dependent {
    pub fn new(api_resource: ApiResource, namespace: &str, name: &str) -> Dependent {
        Dependent {
            api_resource,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn key(&self) -> String {
        object_key(&self.api_resource.kind, &self.namespace, &self.name)
    }

    fn delete_request(&self) -> KubeAPIRequest {
        KubeAPIRequest::DeleteRequest(KubeDeleteRequest {
            api_resource: self.api_resource.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        })
    }

    fn get_request(&self) -> KubeAPIRequest {
        KubeAPIRequest::GetRequest(KubeGetRequest {
            api_resource: self.api_resource.clone(),
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TeardownStep {
    AfterDelete(usize),
    AfterConfirmAbsent(usize),
}

#[derive(Debug)]
pub enum TeardownProgress {
    Request(TeardownStep, KubeAPIRequest),
    Finished,
    // the dependent with this key is still terminating
    StillPresent(String),
    Failed(String),
}

fn delete_dependent(dependents: &[Dependent], idx: usize) -> TeardownProgress {
    match dependents.get(idx) {
        Some(dependent) => TeardownProgress::Request(TeardownStep::AfterDelete(idx), dependent.delete_request()),
        None => TeardownProgress::Finished,
    }
}

/// Teardown deletes the dependents one at a time and reads each one back;
/// it only finishes once every dependent reads back as not found.
pub fn teardown_start(dependents: &[Dependent]) -> TeardownProgress {
    delete_dependent(dependents, 0)
}

pub fn teardown_continue(
    dependents: &[Dependent],
    step: TeardownStep,
    resp_o: Option<KubeAPIResponse>,
) -> TeardownProgress {
    match step {
        TeardownStep::AfterDelete(idx) => {
            let dependent = match dependents.get(idx) {
                Some(dependent) => dependent,
                None => return TeardownProgress::Failed(format!("no dependent at index {}", idx)),
            };
            match extract_some_k_delete_resp!(resp_o) {
                Some(Ok(())) | Some(Err(APIError::ObjectNotFound)) => TeardownProgress::Request(
                    TeardownStep::AfterConfirmAbsent(idx),
                    dependent.get_request(),
                ),
                Some(Err(err)) => TeardownProgress::Failed(format!("delete {} failed: {}", dependent.key(), err)),
                None => TeardownProgress::Failed(format!("expected a delete response for {}", dependent.key())),
            }
        }
        TeardownStep::AfterConfirmAbsent(idx) => {
            let dependent = match dependents.get(idx) {
                Some(dependent) => dependent,
                None => return TeardownProgress::Failed(format!("no dependent at index {}", idx)),
            };
            match extract_some_k_get_resp!(resp_o) {
                Some(Err(APIError::ObjectNotFound)) => delete_dependent(dependents, idx + 1),
                Some(Ok(_)) => TeardownProgress::StillPresent(dependent.key()),
                Some(Err(err)) => TeardownProgress::Failed(format!("get {} failed: {}", dependent.key(), err)),
                None => TeardownProgress::Failed(format!("expected a get response for {}", dependent.key())),
            }
        }
    }
}
