// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::executable_model::{ExecutableApiServer, InjectedFailure};
use crate::kubernetes_api_objects::prelude::*;
use crate::reconciler::reconciler::Reconciler;
use crate::shim_layer::controller_runtime::*;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use std::collections::BTreeMap;
use std::time::Duration;

// Copies the data of a ConfigMap into "<name>-copy".
struct CopyReconciler {
    requeue_after: Option<Duration>,
}

#[derive(Debug, PartialEq)]
enum CopyStep {
    Init,
    AfterCreate,
    Done,
    Error,
}

fn copy_of(cm: &ConfigMap) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("{}-copy", cm.metadata.name_or_empty())),
            namespace: cm.metadata.namespace.clone(),
            ..ObjectMeta::default()
        },
        data: cm.data.clone(),
        ..ConfigMap::default()
    }
}

impl Reconciler for CopyReconciler {
    type K = ConfigMap;
    type S = CopyStep;

    fn reconcile_init_state(&self) -> CopyStep {
        CopyStep::Init
    }

    fn reconcile_core(&self, cm: &ConfigMap, resp_o: Option<KubeAPIResponse>, state: CopyStep) -> (CopyStep, Option<KubeAPIRequest>) {
        match state {
            CopyStep::Init => match copy_of(cm).marshal() {
                Ok(obj) => (
                    CopyStep::AfterCreate,
                    Some(KubeAPIRequest::CreateRequest(KubeCreateRequest {
                        api_resource: ConfigMap::api_resource(),
                        namespace: cm.metadata.namespace_or_empty().to_string(),
                        obj,
                    })),
                ),
                Err(_) => (CopyStep::Error, None),
            },
            CopyStep::AfterCreate => match resp_o.and_then(|resp| resp.into_create_response()).map(|resp| resp.res) {
                Some(Ok(_)) | Some(Err(APIError::ObjectAlreadyExists)) => (CopyStep::Done, None),
                _ => (CopyStep::Error, None),
            },
            step => (step, None),
        }
    }

    fn reconcile_done(&self, state: &CopyStep) -> bool {
        *state == CopyStep::Done
    }

    fn reconcile_error(&self, state: &CopyStep) -> bool {
        *state == CopyStep::Error
    }

    fn reconcile_requeue(&self, _state: &CopyStep) -> Option<Duration> {
        self.requeue_after
    }
}

fn source() -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert("k".to_string(), "v".to_string());
    ConfigMap {
        metadata: ObjectMeta {
            name: Some("src".to_string()),
            namespace: Some("default".to_string()),
            ..ObjectMeta::default()
        },
        data: Some(data),
        ..ConfigMap::default()
    }
}

#[test]
pub fn test_backoff_doubles_up_to_max() {
    let backoff = ExponentialBackoff {
        base: Duration::from_millis(500),
        max: Duration::from_secs(3),
    };
    assert_eq!(backoff.delay(1), Duration::from_millis(500));
    assert_eq!(backoff.delay(2), Duration::from_secs(1));
    assert_eq!(backoff.delay(3), Duration::from_secs(2));
    assert_eq!(backoff.delay(4), Duration::from_secs(3));
    assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(3));
}

#[test]
pub fn test_failure_tracker_counts_per_object() {
    let tracker = FailureTracker::default();
    assert_eq!(tracker.record_failure("a"), 1);
    assert_eq!(tracker.record_failure("a"), 2);
    assert_eq!(tracker.record_failure("b"), 1);
    tracker.reset("a");
    assert_eq!(tracker.failures("a"), 0);
    assert_eq!(tracker.failures("b"), 1);
}

#[tokio::test]
async fn test_reconcile_runs_to_done_and_resyncs() {
    let server = ExecutableApiServer::new();
    server.create_resource(&source()).await.unwrap();
    let reconciler = CopyReconciler { requeue_after: None };

    let action = reconcile_with(&reconciler, "src", "default", &server, &ControllerSettings::default())
        .await
        .unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
    let copy = server.get_resource::<ConfigMap>("default", "src-copy").await.unwrap();
    assert_eq!(copy.data, source().data);
    assert_eq!(
        server.request_log().await,
        vec![
            (ApiVerb::Get, "ConfigMap/default/src".to_string()),
            (ApiVerb::Create, "ConfigMap/default/src-copy".to_string())
        ]
    );
}

#[tokio::test]
async fn test_reconcile_honors_requested_requeue() {
    let server = ExecutableApiServer::new();
    server.create_resource(&source()).await.unwrap();
    let reconciler = CopyReconciler {
        requeue_after: Some(Duration::from_secs(5)),
    };

    let action = reconcile_with(&reconciler, "src", "default", &server, &ControllerSettings::default())
        .await
        .unwrap();

    assert_eq!(action, Action::requeue(Duration::from_secs(5)));
}

#[tokio::test]
async fn test_missing_object_awaits_change() {
    let server = ExecutableApiServer::new();
    let reconciler = CopyReconciler { requeue_after: None };

    let action = reconcile_with(&reconciler, "src", "default", &server, &ControllerSettings::default())
        .await
        .unwrap();

    assert_eq!(action, Action::await_change());
    assert_eq!(server.request_log().await.len(), 1);
}

#[tokio::test]
async fn test_error_state_fails_the_reconcile() {
    let server = ExecutableApiServer::new();
    server.create_resource(&source()).await.unwrap();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::Create,
            kind: "ConfigMap".to_string(),
            error: APIError::InternalError,
            times: None,
        })
        .await;
    let reconciler = CopyReconciler { requeue_after: None };

    let res = reconcile_with(&reconciler, "src", "default", &server, &ControllerSettings::default()).await;

    assert!(matches!(res, Err(crate::Error::ReconcileCoreError(_))));
    assert!(server.get_resource::<ConfigMap>("default", "src-copy").await.is_none());
}

#[tokio::test]
async fn test_failed_get_is_a_shim_layer_error() {
    let server = ExecutableApiServer::new();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::Get,
            kind: "ConfigMap".to_string(),
            error: APIError::Timeout,
            times: Some(1),
        })
        .await;
    let reconciler = CopyReconciler { requeue_after: None };

    let res = reconcile_with(&reconciler, "src", "default", &server, &ControllerSettings::default()).await;

    assert!(matches!(res, Err(crate::Error::ShimLayerError(_))));
}
