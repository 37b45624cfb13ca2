// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use crate::crds::*;
use crate::modeldeployment_controller::exec::resource::*;
use crate::modeldeployment_controller::{ModelDeploymentReconciler, MODEL_FINALIZER};
use crate::unit_tests::*;
use crate::workload_controller::exec::reconciler::make_workload_status;
use crate::workload_controller::exec::resource::*;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::runtime::controller::Action;
use llmcloud_runtime::executable_model::api_server::{ExecutableApiServer, InjectedFailure};
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use serde_json::json;

const NS: &str = "workspace-a";

fn model(spec: ModelDeploymentSpec) -> ModelDeployment {
    let mut md = ModelDeployment::new("llama", spec);
    md.metadata.namespace = Some(NS.to_string());
    md
}

fn llama() -> ModelDeploymentSpec {
    ModelDeploymentSpec {
        model_name: "llama3".to_string(),
        model_size: Some("8b".to_string()),
        ..ModelDeploymentSpec::default()
    }
}

async fn setup(spec: ModelDeploymentSpec) -> (ExecutableApiServer, ModelDeploymentReconciler) {
    let server = ExecutableApiServer::new();
    server.create_resource(&model(spec)).await.unwrap();
    (server, ModelDeploymentReconciler::default())
}

async fn stored(server: &ExecutableApiServer) -> ModelDeployment {
    server.get_resource::<ModelDeployment>(NS, "llama").await.unwrap()
}

#[tokio::test]
async fn test_sync_creates_deployment_and_service() {
    let (server, reconciler) = setup(llama()).await;

    let action = claim_and_sync(&server, &reconciler, NS, "llama").await;
    assert_eq!(action, Action::requeue(RESYNC));

    let md = stored(&server).await;
    assert!(md.metadata.has_finalizer(MODEL_FINALIZER));

    let deployment = server.get_resource::<Deployment>(NS, "llama").await.unwrap();
    let owners = deployment.metadata.owner_references.clone().unwrap();
    assert_eq!(owners[0].kind, "ModelDeployment");
    assert_eq!(Some(owners[0].uid.clone()), md.metadata.uid);
    assert_eq!(deployment.metadata.label(MANAGED_LABEL), Some("true"));
    let spec = deployment.spec.unwrap();
    assert_eq!(spec.replicas, Some(1));
    assert_eq!(spec.selector.match_labels.unwrap()["app"], "llama");
    let container = &spec.template.spec.unwrap().containers[0];
    assert_eq!(container.image.as_deref(), Some(DEFAULT_MODEL_IMAGE));
    assert_eq!(container.ports.as_ref().unwrap()[0].container_port, MODEL_PORT);
    let env: Vec<(String, Option<String>)> = container
        .env
        .clone()
        .unwrap()
        .into_iter()
        .map(|e| (e.name, e.value))
        .collect();
    assert_eq!(
        env,
        vec![
            ("MODEL_NAME".to_string(), Some("llama3".to_string())),
            ("MODEL_SIZE".to_string(), Some("8b".to_string())),
        ]
    );

    let service = server.get_resource::<Service>(NS, "llama").await.unwrap();
    let service_spec = service.spec.unwrap();
    assert_eq!(service_spec.type_.as_deref(), Some("ClusterIP"));
    assert_eq!(service_spec.selector.unwrap()["app"], "llama");
    let port = &service_spec.ports.unwrap()[0];
    assert_eq!(port.port, MODEL_PORT);
    assert_eq!(port.target_port, Some(IntOrString::Int(MODEL_PORT)));

    let status = md.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_PENDING));
    assert_eq!(status.ready_replicas, 0);
    assert_eq!(
        status.endpoint.as_deref(),
        Some("http://llama.workspace-a.svc.cluster.local:11434")
    );
    let ready = condition(&status.conditions, READY_CONDITION);
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason, "ReplicasNotReady");
    assert_eq!(ready.message, "0/1 replicas ready");
}

#[tokio::test]
async fn test_ready_replicas_mark_model_running() {
    let (server, reconciler) = setup(llama()).await;
    claim_and_sync(&server, &reconciler, NS, "llama").await;

    server
        .set_status(&Deployment::api_resource(), NS, "llama", json!({ "readyReplicas": 1 }))
        .await
        .unwrap();
    reconcile(&server, &reconciler, NS, "llama").await.unwrap();

    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_RUNNING));
    assert_eq!(status.ready_replicas, 1);
    let ready = condition(&status.conditions, READY_CONDITION);
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason, "MinimumReplicasAvailable");
}

#[tokio::test]
async fn test_steady_state_reconcile_writes_nothing() {
    let (server, reconciler) = setup(llama()).await;
    claim_and_sync(&server, &reconciler, NS, "llama").await;

    let before = server.resource_version_counter().await;
    reconcile(&server, &reconciler, NS, "llama").await.unwrap();

    assert_eq!(server.resource_version_counter().await, before);
}

#[tokio::test]
async fn test_spec_change_updates_deployment() {
    let (server, reconciler) = setup(llama()).await;
    claim_and_sync(&server, &reconciler, NS, "llama").await;

    let mut md = stored(&server).await;
    md.spec.replicas = Some(3);
    md.spec.image = Some("vllm/vllm-openai:v0.5.0".to_string());
    server.update_resource(&md).await.unwrap();
    reconcile(&server, &reconciler, NS, "llama").await.unwrap();

    let spec = server.get_resource::<Deployment>(NS, "llama").await.unwrap().spec.unwrap();
    assert_eq!(spec.replicas, Some(3));
    assert_eq!(
        spec.template.spec.unwrap().containers[0].image.as_deref(),
        Some("vllm/vllm-openai:v0.5.0")
    );
    assert_eq!(
        condition(&stored(&server).await.status.unwrap().conditions, READY_CONDITION).message,
        "0/3 replicas ready"
    );
}

#[tokio::test]
async fn test_apply_failure_reports_error_status() {
    let (server, reconciler) = setup(llama()).await;
    reconcile(&server, &reconciler, NS, "llama").await.unwrap();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::Apply,
            kind: "Service".to_string(),
            error: APIError::Forbidden,
            times: Some(1),
        })
        .await;

    assert!(reconcile(&server, &reconciler, NS, "llama").await.is_err());
    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_ERROR));
    assert_eq!(condition(&status.conditions, READY_CONDITION).reason, RECONCILIATION_ERROR_REASON);

    reconcile(&server, &reconciler, NS, "llama").await.unwrap();
    assert!(server.get_resource::<Service>(NS, "llama").await.is_some());
    assert_eq!(stored(&server).await.status.unwrap().phase.as_deref(), Some(PHASE_PENDING));
}

#[tokio::test]
async fn test_status_conflict_requeues() {
    let (server, reconciler) = setup(llama()).await;
    reconcile(&server, &reconciler, NS, "llama").await.unwrap();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::UpdateStatus,
            kind: "ModelDeployment".to_string(),
            error: APIError::Conflict,
            times: Some(1),
        })
        .await;

    let action = reconcile(&server, &reconciler, NS, "llama").await.unwrap();

    assert_eq!(action, Action::requeue(STATUS_CONFLICT_REQUEUE));
}

#[tokio::test]
async fn test_deletion_removes_deployment_and_service() {
    let (server, reconciler) = setup(llama()).await;
    claim_and_sync(&server, &reconciler, NS, "llama").await;

    server.delete(&ModelDeployment::api_resource(), NS, "llama").await.unwrap();
    server.clear_request_log().await;
    reconcile(&server, &reconciler, NS, "llama").await.unwrap();

    assert!(server.get_resource::<Deployment>(NS, "llama").await.is_none());
    assert!(server.get_resource::<Service>(NS, "llama").await.is_none());
    assert!(server.get_resource::<ModelDeployment>(NS, "llama").await.is_none());
    let verbs: Vec<ApiVerb> = server.request_log().await.into_iter().map(|(verb, _)| verb).collect();
    assert_eq!(
        verbs,
        vec![
            ApiVerb::Get,
            ApiVerb::Delete,
            ApiVerb::Get,
            ApiVerb::Delete,
            ApiVerb::Get,
            ApiVerb::Update
        ]
    );
}

#[test]
fn test_resource_requirements_mapping() {
    let requirements = make_resource_requirements(&ResourceRequirements {
        cpu: Some("2".to_string()),
        memory: Some("16Gi".to_string()),
        gpu: Some(1),
    });
    let requests = requirements.requests.unwrap();
    let limits = requirements.limits.unwrap();
    assert_eq!(requests["cpu"], Quantity("2".to_string()));
    assert_eq!(requests["memory"], Quantity("16Gi".to_string()));
    assert!(!requests.contains_key(GPU_RESOURCE));
    assert_eq!(limits["cpu"], Quantity("2".to_string()));
    assert_eq!(limits[GPU_RESOURCE], Quantity("1".to_string()));

    let no_gpu = make_resource_requirements(&ResourceRequirements {
        gpu: Some(0),
        ..ResourceRequirements::default()
    });
    assert!(no_gpu.requests.is_none());
    assert!(no_gpu.limits.is_none());
}

#[test]
fn test_model_container_skips_unset_fields() {
    let md = model(ModelDeploymentSpec {
        model_name: "mistral".to_string(),
        provider: Some("huggingface".to_string()),
        quantization: Some(String::new()),
        image: Some(String::new()),
        ..ModelDeploymentSpec::default()
    });

    let container = make_model_container(&md);

    assert_eq!(container.name, "model");
    assert_eq!(container.image.as_deref(), Some(DEFAULT_MODEL_IMAGE));
    let names: Vec<String> = container.env.unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["MODEL_NAME".to_string(), "MODEL_PROVIDER".to_string()]);
    assert!(container.resources.is_none());
}

#[test]
fn test_workload_status_counts_against_desired_replicas() {
    let mut md = model(llama());
    md.spec.replicas = Some(2);
    md.metadata.generation = Some(4);

    let partial = make_workload_status(&md, 1);
    assert_eq!(partial.phase.as_deref(), Some(PHASE_RUNNING));
    let ready = condition(&partial.conditions, READY_CONDITION);
    assert_eq!(ready.status, "False");
    assert_eq!(ready.message, "1/2 replicas ready");
    assert_eq!(ready.observed_generation, Some(4));

    let full = make_workload_status(&md, 2);
    assert!(is_status_condition_true(&full.conditions, READY_CONDITION));
}
