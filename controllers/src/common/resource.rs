// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::api::DynamicObject;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::{
    extract_some_k_create_resp, extract_some_k_delete_resp, extract_some_k_get_resp, extract_some_k_update_resp,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionKind {
    Get,
    Create,
    Update,
    // delete ahead of a create, for objects whose found state cannot be updated in place
    Delete,
}

/// ResourceBuilder describes one object a reconciler keeps in sync with get, then
/// create if absent or update if different.
pub trait ResourceBuilder<K> {
    fn get_request(&self, cr: &K) -> KubeGetRequest;

    /// The object to create when none exists.
    fn make(&self, cr: &K) -> Result<DynamicObject, String>;

    /// The object to write over found, or None when found already matches.
    fn update(&self, cr: &K, found: DynamicObject) -> Result<Option<DynamicObject>, String>;

    /// Whether found differs from the desired object in a field the API server
    /// refuses to change, so it has to be deleted and created again.
    fn needs_recreate(&self, _cr: &K, _found: &DynamicObject) -> bool {
        false
    }
}

fn create_request<K, B: ResourceBuilder<K>>(builder: &B, cr: &K, get_req: KubeGetRequest) -> SyncProgress {
    let key = get_req.key();
    match builder.make(cr) {
        Ok(obj) => SyncProgress::Request(
            ActionKind::Create,
            KubeAPIRequest::CreateRequest(KubeCreateRequest {
                api_resource: get_req.api_resource,
                namespace: get_req.namespace,
                obj,
            }),
        ),
        Err(e) => SyncProgress::Failed(format!("build {} failed: {}", key, e)),
    }
}

#[derive(Debug)]
pub enum SyncProgress {
    Request(ActionKind, KubeAPIRequest),
    Synced(DynamicObject),
    Failed(String),
}

pub fn sync_start<K, B: ResourceBuilder<K>>(builder: &B, cr: &K) -> SyncProgress {
    SyncProgress::Request(ActionKind::Get, KubeAPIRequest::GetRequest(builder.get_request(cr)))
}

pub fn sync_continue<K, B: ResourceBuilder<K>>(
    builder: &B,
    cr: &K,
    action: ActionKind,
    resp_o: Option<KubeAPIResponse>,
) -> SyncProgress {
    let get_req = builder.get_request(cr);
    let key = get_req.key();
    match action {
        ActionKind::Get => match extract_some_k_get_resp!(resp_o) {
            Some(Ok(found)) if builder.needs_recreate(cr, &found) => SyncProgress::Request(
                ActionKind::Delete,
                KubeAPIRequest::DeleteRequest(KubeDeleteRequest {
                    api_resource: get_req.api_resource,
                    name: get_req.name,
                    namespace: get_req.namespace,
                }),
            ),
            Some(Ok(found)) => match builder.update(cr, found.clone()) {
                Ok(Some(obj)) => SyncProgress::Request(
                    ActionKind::Update,
                    KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
                        api_resource: get_req.api_resource,
                        name: get_req.name,
                        namespace: get_req.namespace,
                        obj,
                    }),
                ),
                Ok(None) => SyncProgress::Synced(found),
                Err(e) => SyncProgress::Failed(format!("build update of {} failed: {}", key, e)),
            },
            Some(Err(APIError::ObjectNotFound)) => create_request(builder, cr, get_req),
            Some(Err(err)) => SyncProgress::Failed(format!("get {} failed: {}", key, err)),
            None => SyncProgress::Failed(format!("expected a get response for {}", key)),
        },
        ActionKind::Create => match extract_some_k_create_resp!(resp_o) {
            Some(Ok(obj)) => SyncProgress::Synced(obj),
            Some(Err(err)) => SyncProgress::Failed(format!("create {} failed: {}", key, err)),
            None => SyncProgress::Failed(format!("expected a create response for {}", key)),
        },
        ActionKind::Update => match extract_some_k_update_resp!(resp_o) {
            Some(Ok(obj)) => SyncProgress::Synced(obj),
            Some(Err(err)) => SyncProgress::Failed(format!("update {} failed: {}", key, err)),
            None => SyncProgress::Failed(format!("expected an update response for {}", key)),
        },
        ActionKind::Delete => match extract_some_k_delete_resp!(resp_o) {
            Some(Ok(())) | Some(Err(APIError::ObjectNotFound)) => create_request(builder, cr, get_req),
            Some(Err(err)) => SyncProgress::Failed(format!("delete {} failed: {}", key, err)),
            None => SyncProgress::Failed(format!("expected a delete response for {}", key)),
        },
    }
}
