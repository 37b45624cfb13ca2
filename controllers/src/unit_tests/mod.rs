// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use kube::api::{ApiResource, DynamicObject};
use kube::runtime::controller::Action;
use llmcloud_runtime::executable_model::api_server::ExecutableApiServer;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::reconciler::reconciler::Reconciler;
use llmcloud_runtime::shim_layer::api_client::ApiServerClient;
use llmcloud_runtime::shim_layer::controller_runtime::{reconcile_with, ControllerSettings};
use std::time::Duration;

pub mod crd_schema;
pub mod modeldeployment;
pub mod virtualmachine;
pub mod workspace;

pub const RESYNC: Duration = Duration::from_secs(60);

/// One reconcile of namespace/name, the way the controller runtime would run it.
pub async fn reconcile<R: Reconciler>(
    server: &ExecutableApiServer,
    reconciler: &R,
    namespace: &str,
    name: &str,
) -> Result<Action, llmcloud_runtime::Error> {
    reconcile_with(reconciler, name, namespace, server, &ControllerSettings::default()).await
}

/// The first reconcile of a new object only claims it with the finalizer and requeues at once;
/// the second one does the actual sync.
pub async fn claim_and_sync<R: Reconciler>(
    server: &ExecutableApiServer,
    reconciler: &R,
    namespace: &str,
    name: &str,
) -> Action {
    let claimed = reconcile(server, reconciler, namespace, name).await.unwrap();
    assert_eq!(claimed, Action::requeue(Duration::ZERO));
    reconcile(server, reconciler, namespace, name).await.unwrap()
}

/// Replaces a stored object through the update endpoint, keeping its resource version.
pub async fn update_object(server: &ExecutableApiServer, api_resource: &ApiResource, obj: DynamicObject) -> DynamicObject {
    let resp = server
        .handle_request(KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
            api_resource: api_resource.clone(),
            name: obj.metadata.name_or_empty().to_string(),
            namespace: obj.metadata.namespace_or_empty().to_string(),
            obj,
        }))
        .await;
    resp.into_update_response().unwrap().res.unwrap()
}

pub fn condition<'a>(
    conditions: &'a [k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition],
    type_: &str,
) -> &'a k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition {
    find_status_condition(conditions, type_).unwrap()
}
