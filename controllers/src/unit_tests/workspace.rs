// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use crate::crds::*;
use crate::unit_tests::*;
use crate::workspace_controller::exec::reconciler::WorkspaceReconciler;
use crate::workspace_controller::exec::resource::*;
use crate::workspace_controller::step::WORKSPACE_FINALIZER;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use k8s_openapi::api::rbac::v1::RoleBinding;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use llmcloud_runtime::executable_model::api_server::{ExecutableApiServer, InjectedFailure};
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use std::collections::BTreeMap;
use std::time::Duration;

const NS: &str = "workspace-team-a";

fn member(username: &str, role: &str) -> WorkspaceMember {
    WorkspaceMember {
        username: username.to_string(),
        role: role.to_string(),
    }
}

fn workspace(members: Vec<WorkspaceMember>, resource_quotas: Option<WorkspaceResourceQuotas>) -> Workspace {
    Workspace::new(
        "team-a",
        WorkspaceSpec {
            description: Some("team a".to_string()),
            members,
            resource_quotas,
        },
    )
}

async fn setup(ws: &Workspace) -> (ExecutableApiServer, WorkspaceReconciler) {
    let server = ExecutableApiServer::new();
    server.create_resource(ws).await.unwrap();
    (server, WorkspaceReconciler::default())
}

async fn stored(server: &ExecutableApiServer) -> Workspace {
    server.get_resource::<Workspace>("", "team-a").await.unwrap()
}

#[tokio::test]
async fn test_first_reconcile_only_adds_finalizer() {
    let (server, reconciler) = setup(&workspace(vec![], None)).await;

    let action = reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    assert_eq!(action, Action::requeue(Duration::ZERO));
    assert!(stored(&server).await.metadata.has_finalizer(WORKSPACE_FINALIZER));
    assert!(server.get_resource::<Namespace>("", NS).await.is_none());
}

#[tokio::test]
async fn test_sync_creates_namespace_and_bindings() {
    let ws = workspace(
        vec![
            member("alice", "owner"),
            member("bob", "developer"),
            member("carol", "viewer"),
            member("dave", "admin"),
        ],
        None,
    );
    let (server, reconciler) = setup(&ws).await;

    let action = claim_and_sync(&server, &reconciler, "", "team-a").await;
    assert_eq!(action, Action::requeue(RESYNC));

    let ws = stored(&server).await;
    let namespace = server.get_resource::<Namespace>("", NS).await.unwrap();
    assert_eq!(namespace.metadata.label(MANAGED_LABEL), Some("true"));
    assert_eq!(namespace.metadata.label(WORKSPACE_LABEL), Some("team-a"));
    let owners = namespace.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(Some(owners[0].uid.clone()), ws.metadata.uid);
    assert_eq!(owners[0].controller, Some(true));

    for (username, cluster_role) in [("alice", "admin"), ("bob", "edit"), ("carol", "view"), ("dave", "admin")] {
        let binding = server
            .get_resource::<RoleBinding>(NS, &format!("team-a-{}", username))
            .await
            .unwrap();
        assert_eq!(binding.role_ref.kind, "ClusterRole");
        assert_eq!(binding.role_ref.name, cluster_role);
        let subjects = binding.subjects.unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].kind, "User");
        assert_eq!(subjects[0].name, username);
    }

    let status = ws.status.unwrap();
    assert_eq!(status.namespace.as_deref(), Some(NS));
    assert_eq!(status.phase.as_deref(), Some(PHASE_ACTIVE));
    assert_eq!((status.vm_count, status.llm_model_count, status.service_count), (0, 0, 0));
    let ready = condition(&status.conditions, READY_CONDITION);
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason, "WorkspaceReady");
    assert_eq!(ready.observed_generation, Some(1));
    // no quotas declared, no quota object
    assert!(server.get_resource::<ResourceQuota>(NS, RESOURCE_QUOTA_NAME).await.is_none());
}

#[tokio::test]
async fn test_workspace_without_members_is_active() {
    let (server, reconciler) = setup(&workspace(vec![], None)).await;

    claim_and_sync(&server, &reconciler, "", "team-a").await;

    assert!(server.get_resource::<Namespace>("", NS).await.is_some());
    assert!(server.list(&RoleBinding::api_resource(), NS).await.is_empty());
    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_ACTIVE));
    assert_eq!(status.vm_count, 0);
}

#[tokio::test]
async fn test_quota_reflects_declared_limits() {
    let quotas = WorkspaceResourceQuotas {
        max_vms: Some(3),
        max_models: Some(2),
        max_cpu: Some("8".to_string()),
        max_memory: None,
    };
    let (server, reconciler) = setup(&workspace(vec![], Some(quotas))).await;
    claim_and_sync(&server, &reconciler, "", "team-a").await;

    let quota = server.get_resource::<ResourceQuota>(NS, RESOURCE_QUOTA_NAME).await.unwrap();
    let hard = quota.spec.unwrap().hard.unwrap();
    assert_eq!(hard.len(), 3);
    assert_eq!(hard["count/virtualmachines.llmcloud.llmcloud.io"], Quantity("3".to_string()));
    assert_eq!(hard["count/modeldeployments.llmcloud.llmcloud.io"], Quantity("2".to_string()));
    assert_eq!(hard["requests.cpu"], Quantity("8".to_string()));
    assert!(!hard.contains_key("requests.memory"));
}

#[tokio::test]
async fn test_status_counts_resources_in_namespace() {
    let (server, reconciler) = setup(&workspace(vec![], None)).await;
    claim_and_sync(&server, &reconciler, "", "team-a").await;

    for name in ["vm-1", "vm-2"] {
        let mut vm = VirtualMachine::new(name, VirtualMachineSpec {
            os: "ubuntu".to_string(),
            ..VirtualMachineSpec::default()
        });
        vm.metadata.namespace = Some(NS.to_string());
        server.create_resource(&vm).await.unwrap();
    }
    let mut md = ModelDeployment::new("llama", ModelDeploymentSpec {
        model_name: "llama3".to_string(),
        ..ModelDeploymentSpec::default()
    });
    md.metadata.namespace = Some(NS.to_string());
    server.create_resource(&md).await.unwrap();
    // lives outside the workspace, not counted
    let mut other = CatalogService::new("redis", CatalogServiceSpec {
        service_type: "redis".to_string(),
        image: "redis:7".to_string(),
        ..CatalogServiceSpec::default()
    });
    other.metadata.namespace = Some("default".to_string());
    server.create_resource(&other).await.unwrap();

    reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.vm_count, 2);
    assert_eq!(status.llm_model_count, 1);
    assert_eq!(status.service_count, 0);
}

#[tokio::test]
async fn test_steady_state_reconcile_writes_nothing() {
    let quotas = WorkspaceResourceQuotas {
        max_vms: Some(1),
        ..WorkspaceResourceQuotas::default()
    };
    let (server, reconciler) = setup(&workspace(vec![member("alice", "owner")], Some(quotas))).await;
    claim_and_sync(&server, &reconciler, "", "team-a").await;

    let before = server.resource_version_counter().await;
    let action = reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    assert_eq!(action, Action::requeue(RESYNC));
    assert_eq!(server.resource_version_counter().await, before);
}

#[tokio::test]
async fn test_removed_member_keeps_binding() {
    let (server, reconciler) = setup(&workspace(vec![member("alice", "owner"), member("bob", "viewer")], None)).await;
    claim_and_sync(&server, &reconciler, "", "team-a").await;

    let mut ws = stored(&server).await;
    ws.spec.members = vec![member("alice", "owner")];
    server.update_resource(&ws).await.unwrap();
    reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    assert!(server.get_resource::<RoleBinding>(NS, "team-a-bob").await.is_some());
    assert_eq!(server.list(&RoleBinding::api_resource(), NS).await.len(), 2);
}

#[tokio::test]
async fn test_changed_role_replaces_binding() {
    let (server, reconciler) = setup(&workspace(vec![member("bob", "viewer")], None)).await;
    claim_and_sync(&server, &reconciler, "", "team-a").await;
    let before = server.get_resource::<RoleBinding>(NS, "team-a-bob").await.unwrap();

    let mut ws = stored(&server).await;
    ws.spec.members = vec![member("bob", "developer")];
    server.update_resource(&ws).await.unwrap();
    server.clear_request_log().await;
    reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    let binding = server.get_resource::<RoleBinding>(NS, "team-a-bob").await.unwrap();
    assert_eq!(binding.role_ref.name, "edit");
    assert_ne!(binding.metadata.uid, before.metadata.uid);
    let binding_writes: Vec<ApiVerb> = server
        .request_log()
        .await
        .into_iter()
        .filter(|(verb, key)| key.starts_with("RoleBinding/") && *verb != ApiVerb::Get)
        .map(|(verb, _)| verb)
        .collect();
    assert_eq!(binding_writes, vec![ApiVerb::Delete, ApiVerb::Create]);
    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_ACTIVE));
}

#[tokio::test]
async fn test_adopts_existing_namespace() {
    let (server, reconciler) = setup(&workspace(vec![], None)).await;
    let mut labels = BTreeMap::new();
    labels.insert("team".to_string(), "a".to_string());
    let existing = Namespace {
        metadata: ObjectMeta {
            name: Some(NS.to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        ..Namespace::default()
    };
    server.create_resource(&existing).await.unwrap();

    claim_and_sync(&server, &reconciler, "", "team-a").await;

    let namespace = server.get_resource::<Namespace>("", NS).await.unwrap();
    assert_eq!(namespace.metadata.label("team"), Some("a"));
    assert_eq!(namespace.metadata.label(WORKSPACE_LABEL), Some("team-a"));
    assert!(namespace.metadata.owner_references.is_none());
    assert_eq!(stored(&server).await.status.unwrap().phase.as_deref(), Some(PHASE_ACTIVE));
}

#[tokio::test]
async fn test_failed_binding_reports_error_then_recovers() {
    let (server, reconciler) = setup(&workspace(vec![member("alice", "owner")], None)).await;
    reconcile(&server, &reconciler, "", "team-a").await.unwrap();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::Create,
            kind: "RoleBinding".to_string(),
            error: APIError::InternalError,
            times: Some(1),
        })
        .await;

    assert!(reconcile(&server, &reconciler, "", "team-a").await.is_err());
    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_ERROR));
    let ready = condition(&status.conditions, READY_CONDITION);
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason, RECONCILIATION_ERROR_REASON);

    reconcile(&server, &reconciler, "", "team-a").await.unwrap();
    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_ACTIVE));
    assert!(is_status_condition_true(&status.conditions, READY_CONDITION));
}

#[tokio::test]
async fn test_status_conflict_requeues() {
    let (server, reconciler) = setup(&workspace(vec![], None)).await;
    reconcile(&server, &reconciler, "", "team-a").await.unwrap();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::UpdateStatus,
            kind: "Workspace".to_string(),
            error: APIError::Conflict,
            times: Some(1),
        })
        .await;

    let action = reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    assert_eq!(action, Action::requeue(STATUS_CONFLICT_REQUEUE));
    assert!(stored(&server).await.status.is_none());
}

#[tokio::test]
async fn test_deletion_releases_workspace_and_collects_namespace() {
    let (server, reconciler) = setup(&workspace(vec![member("alice", "owner")], None)).await;
    claim_and_sync(&server, &reconciler, "", "team-a").await;
    let mut vm = VirtualMachine::new("vm-1", VirtualMachineSpec {
        os: "ubuntu".to_string(),
        ..VirtualMachineSpec::default()
    });
    vm.metadata.namespace = Some(NS.to_string());
    server.create_resource(&vm).await.unwrap();

    server.delete(&Workspace::api_resource(), "", "team-a").await.unwrap();
    // the finalizer holds the workspace until the controller releases it
    assert!(stored(&server).await.metadata.has_deletion_timestamp());

    let action = reconcile(&server, &reconciler, "", "team-a").await.unwrap();

    assert_eq!(action, Action::requeue(RESYNC));
    assert!(server.get_resource::<Workspace>("", "team-a").await.is_none());
    assert!(server.get_resource::<Namespace>("", NS).await.is_none());
    assert!(server.list(&RoleBinding::api_resource(), NS).await.is_empty());
    assert!(server.get_resource::<VirtualMachine>(NS, "vm-1").await.is_none());
    // the next trigger finds nothing to do
    assert_eq!(
        reconcile(&server, &reconciler, "", "team-a").await.unwrap(),
        Action::await_change()
    );
}

#[test]
fn test_cluster_role_for() {
    assert_eq!(cluster_role_for("owner"), "admin");
    assert_eq!(cluster_role_for("admin"), "admin");
    assert_eq!(cluster_role_for("developer"), "edit");
    assert_eq!(cluster_role_for("viewer"), "view");
    assert_eq!(cluster_role_for("anything-else"), "view");
}

#[test]
fn test_make_role_binding_names_binding_after_member() {
    let ws = workspace(vec![], None);
    let binding = make_role_binding(&ws, &member("alice", "developer"));
    assert_eq!(binding.metadata.name.as_deref(), Some("team-a-alice"));
    assert_eq!(binding.metadata.namespace.as_deref(), Some(NS));
    assert_eq!(binding.role_ref.api_group, "rbac.authorization.k8s.io");
    assert_eq!(binding.role_ref.name, "edit");
}
