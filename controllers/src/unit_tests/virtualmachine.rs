// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use crate::crds::*;
use crate::unit_tests::*;
use crate::virtualmachine_controller::exec::image_catalog::*;
use crate::virtualmachine_controller::exec::kubevirt::*;
use crate::virtualmachine_controller::exec::reconciler::*;
use crate::virtualmachine_controller::step::VM_FINALIZER;
use kube::api::DynamicObject;
use kube::runtime::controller::Action;
use llmcloud_runtime::executable_model::api_server::{ExecutableApiServer, InjectedFailure};
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

const NS: &str = "workspace-a";

fn vm(spec: VirtualMachineSpec) -> VirtualMachine {
    let mut vm = VirtualMachine::new("vm-1", spec);
    vm.metadata.namespace = Some(NS.to_string());
    vm
}

fn ubuntu() -> VirtualMachineSpec {
    VirtualMachineSpec {
        os: "ubuntu".to_string(),
        ..VirtualMachineSpec::default()
    }
}

async fn setup(spec: VirtualMachineSpec) -> (ExecutableApiServer, VirtualMachineReconciler) {
    let server = ExecutableApiServer::new();
    server.create_resource(&vm(spec)).await.unwrap();
    (server, VirtualMachineReconciler::default())
}

async fn stored(server: &ExecutableApiServer) -> VirtualMachine {
    server.get_resource::<VirtualMachine>(NS, "vm-1").await.unwrap()
}

async fn external_vm(server: &ExecutableApiServer) -> Option<DynamicObject> {
    server.get(&kubevirt_vm_api_resource(), NS, "vm-1").await
}

fn run_strategy(obj: &DynamicObject) -> &str {
    obj.data["spec"]["runStrategy"].as_str().unwrap()
}

async fn insert_vmi(server: &ExecutableApiServer, status: serde_json::Value) {
    let vmi = DynamicObject::new("vm-1", &kubevirt_vmi_api_resource())
        .within(NS)
        .data(json!({ "status": status }));
    server.insert_object(&kubevirt_vmi_api_resource(), NS, vmi).await;
}

#[tokio::test]
async fn test_sync_creates_kubevirt_vm_and_reports_pending() {
    let (server, reconciler) = setup(ubuntu()).await;

    let action = claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    assert_eq!(action, Action::requeue(RESYNC));
    let vm = stored(&server).await;
    assert!(vm.metadata.has_finalizer(VM_FINALIZER));
    let external = external_vm(&server).await.unwrap();
    assert_eq!(external.types.as_ref().unwrap().api_version, "kubevirt.io/v1");
    assert_eq!(external.metadata.label(MANAGED_LABEL), Some("true"));
    assert_eq!(run_strategy(&external), DEFAULT_RUN_STRATEGY);

    let status = vm.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_PENDING));
    assert!(!status.ready);
    assert!(status.conditions.is_empty());
}

#[tokio::test]
async fn test_status_follows_vmi() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    insert_vmi(
        &server,
        json!({
            "phase": "Running",
            "nodeName": "node-1",
            "interfaces": [{ "ipAddress": "10.244.0.12" }]
        }),
    )
    .await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_RUNNING));
    assert!(status.ready);
    assert_eq!(status.node.as_deref(), Some("node-1"));
    assert_eq!(status.ip_address.as_deref(), Some("10.244.0.12"));
    let ready = condition(&status.conditions, READY_CONDITION);
    assert_eq!(ready.status, "True");
    assert_eq!(ready.reason, "VMRunning");
}

#[tokio::test]
async fn test_ready_condition_true_for_any_vmi_phase() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    insert_vmi(&server, json!({ "phase": "Scheduling" })).await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some("Scheduling"));
    assert!(!status.ready);
    assert!(status.node.is_none());
    assert!(is_status_condition_true(&status.conditions, READY_CONDITION));
}

#[test]
fn test_project_vmi_keeps_unreported_fields() {
    let mut status = VirtualMachineStatus {
        phase: Some(PHASE_RUNNING.to_string()),
        node: Some("node-1".to_string()),
        ip_address: Some("10.0.0.1".to_string()),
        ready: true,
        conditions: vec![],
    };
    let observation = VmiObservation {
        phase: None,
        node: Some("node-2".to_string()),
        ip_address: None,
    };

    project_vmi(&mut status, &observation, Some(3));

    assert_eq!(status.phase.as_deref(), Some(PHASE_RUNNING));
    assert!(status.ready);
    assert_eq!(status.node.as_deref(), Some("node-2"));
    assert_eq!(status.ip_address.as_deref(), Some("10.0.0.1"));
    assert_eq!(condition(&status.conditions, READY_CONDITION).observed_generation, Some(3));
}

#[tokio::test]
async fn test_steady_state_reconcile_writes_nothing() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;
    insert_vmi(&server, json!({ "phase": "Running", "nodeName": "node-1" })).await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    let before = server.resource_version_counter().await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert_eq!(server.resource_version_counter().await, before);
}

#[tokio::test]
async fn test_run_strategy_change_reaches_kubevirt() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    let mut vm = stored(&server).await;
    vm.spec.run_strategy = Some(HALTED_RUN_STRATEGY.to_string());
    server.update_resource(&vm).await.unwrap();
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert_eq!(run_strategy(&external_vm(&server).await.unwrap()), HALTED_RUN_STRATEGY);

    // stays halted, and nothing is written, until the spec changes again
    let before = server.resource_version_counter().await;
    server.clear_request_log().await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert_eq!(run_strategy(&external_vm(&server).await.unwrap()), HALTED_RUN_STRATEGY);
    assert_eq!(server.resource_version_counter().await, before);
    let writes: Vec<_> = server
        .request_log()
        .await
        .into_iter()
        .filter(|(verb, _)| matches!(verb, ApiVerb::Create | ApiVerb::Update | ApiVerb::UpdateStatus | ApiVerb::Delete))
        .collect();
    assert!(writes.is_empty());
}

#[tokio::test]
async fn test_external_vm_follows_last_of_several_edits() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    for (cpus, memory, run_strategy) in [(2, "4Gi", "Always"), (4, "8Gi", "Halted"), (3, "6Gi", "Halted")] {
        let mut vm = stored(&server).await;
        vm.spec.cpus = Some(cpus);
        vm.spec.memory = Some(memory.to_string());
        vm.spec.run_strategy = Some(run_strategy.to_string());
        server.update_resource(&vm).await.unwrap();
    }
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    let external = external_vm(&server).await.unwrap();
    let domain = &external.data["spec"]["template"]["spec"]["domain"];
    assert_eq!(domain["cpu"]["cores"], 3);
    assert_eq!(domain["resources"]["requests"]["memory"], "6Gi");
    assert_eq!(run_strategy(&external), HALTED_RUN_STRATEGY);

    // a second pass leaves it halted
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();
    assert_eq!(run_strategy(&external_vm(&server).await.unwrap()), HALTED_RUN_STRATEGY);
}

#[tokio::test]
async fn test_reboot_stops_and_starts_then_clears_annotation() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    let mut vm = stored(&server).await;
    vm.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(REBOOT_ANNOTATION.to_string(), "true".to_string());
    server.update_resource(&vm).await.unwrap();
    server.clear_request_log().await;

    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    let updates: Vec<_> = server
        .request_log()
        .await
        .into_iter()
        .filter(|(verb, key)| *verb == ApiVerb::Update && key == "VirtualMachine/workspace-a/vm-1")
        .collect();
    // stop, start, clear the annotation
    assert_eq!(updates.len(), 3);
    assert_eq!(run_strategy(&external_vm(&server).await.unwrap()), DEFAULT_RUN_STRATEGY);
    let vm = stored(&server).await;
    assert_eq!(vm.metadata.annotation(REBOOT_ANNOTATION), None);
    assert_eq!(vm.status.unwrap().phase.as_deref(), Some(PHASE_PENDING));
}

#[tokio::test]
async fn test_reboot_without_kubevirt_vm_reports_error() {
    let mut annotations = BTreeMap::new();
    annotations.insert(REBOOT_ANNOTATION.to_string(), "true".to_string());
    let server = ExecutableApiServer::new();
    let mut declared = vm(ubuntu());
    declared.metadata.annotations = Some(annotations);
    server.create_resource(&declared).await.unwrap();
    let reconciler = VirtualMachineReconciler::default();
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert!(reconcile(&server, &reconciler, NS, "vm-1").await.is_err());

    let vm = stored(&server).await;
    assert_eq!(vm.metadata.annotation(REBOOT_ANNOTATION), Some("true"));
    assert_eq!(vm.status.unwrap().phase.as_deref(), Some(PHASE_ERROR));
}

#[tokio::test]
async fn test_apply_failure_reports_error_status() {
    let (server, reconciler) = setup(ubuntu()).await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();
    server
        .inject_failure(InjectedFailure {
            verb: ApiVerb::Apply,
            kind: "VirtualMachine".to_string(),
            error: APIError::InternalError,
            times: None,
        })
        .await;

    assert!(reconcile(&server, &reconciler, NS, "vm-1").await.is_err());

    let status = stored(&server).await.status.unwrap();
    assert_eq!(status.phase.as_deref(), Some(PHASE_ERROR));
    assert!(!status.ready);
    let ready = condition(&status.conditions, READY_CONDITION);
    assert_eq!(ready.status, "False");
    assert_eq!(ready.reason, RECONCILIATION_ERROR_REASON);
    assert!(ready.message.contains("apply external VM failed"));
}

#[tokio::test]
async fn test_deletion_removes_kubevirt_vm_before_finalizer() {
    let (server, reconciler) = setup(ubuntu()).await;
    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    server.delete(&VirtualMachine::api_resource(), NS, "vm-1").await.unwrap();
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert!(external_vm(&server).await.is_none());
    assert!(server.get_resource::<VirtualMachine>(NS, "vm-1").await.is_none());
}

#[tokio::test]
async fn test_deletion_waits_for_terminating_kubevirt_vm() {
    let (server, reconciler) = setup(ubuntu()).await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();
    let mut external = DynamicObject::new("vm-1", &kubevirt_vm_api_resource())
        .within(NS)
        .data(json!({ "spec": { "runStrategy": "Always" } }));
    external.metadata.finalizers = Some(vec!["kubevirt.io/virtualMachineControllerFinalize".to_string()]);
    server.insert_object(&kubevirt_vm_api_resource(), NS, external).await;

    server.delete(&VirtualMachine::api_resource(), NS, "vm-1").await.unwrap();
    let action = reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert_eq!(action, Action::requeue(TEARDOWN_REQUEUE));
    assert!(stored(&server).await.metadata.has_finalizer(VM_FINALIZER));
    let mut terminating = external_vm(&server).await.unwrap();
    assert!(terminating.metadata.has_deletion_timestamp());

    // KubeVirt finishes its own cleanup
    terminating.metadata.finalizers = None;
    update_object(&server, &kubevirt_vm_api_resource(), terminating).await;
    reconcile(&server, &reconciler, NS, "vm-1").await.unwrap();

    assert!(external_vm(&server).await.is_none());
    assert!(server.get_resource::<VirtualMachine>(NS, "vm-1").await.is_none());
}

#[test]
fn test_make_kubevirt_vm_defaults() {
    let declared = vm(ubuntu());

    let external = make_kubevirt_vm(&declared, &StaticImageCatalog::default());

    assert_eq!(external.api_version, KUBEVIRT_API_VERSION);
    assert_eq!(external.kind, "VirtualMachine");
    assert_eq!(external.metadata.namespace.as_deref(), Some(NS));
    assert_eq!(external.spec.run_strategy, DEFAULT_RUN_STRATEGY);
    let domain = &external.spec.template.spec.domain;
    assert_eq!(domain.cpu.cores, DEFAULT_CPUS);
    assert_eq!(domain.resources.requests["memory"], DEFAULT_MEMORY);
    let disk_names: Vec<&str> = domain.devices.disks.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(disk_names, vec!["containerdisk", "datadisk"]);
    assert!(domain.devices.disks.iter().all(|d| d.disk.bus == "virtio"));

    let volumes = &external.spec.template.spec.volumes;
    assert_eq!(volumes.len(), 2);
    assert_eq!(
        volumes[0].container_disk.as_ref().unwrap().image,
        "quay.io/containerdisks/ubuntu:22.04"
    );
    assert_eq!(volumes[1].data_volume.as_ref().unwrap().name, "vm-1-disk");

    let template = &external.spec.data_volume_templates[0];
    assert_eq!(template.metadata.name.as_deref(), Some("vm-1-disk"));
    assert_eq!(template.spec.storage.access_modes, vec!["ReadWriteOnce".to_string()]);
    assert_eq!(template.spec.storage.resources.requests["storage"], DEFAULT_DISK_SIZE);
    assert_eq!(template.spec.storage.storage_class_name, DEFAULT_STORAGE_CLASS);
}

#[test]
fn test_make_kubevirt_vm_honors_declared_values() {
    let declared = vm(VirtualMachineSpec {
        cpus: Some(4),
        memory: Some("8Gi".to_string()),
        disk_size: Some("50Gi".to_string()),
        os: "fedora".to_string(),
        os_version: Some("40".to_string()),
        run_strategy: Some(HALTED_RUN_STRATEGY.to_string()),
        storage_class: Some("ceph-rbd".to_string()),
        ..VirtualMachineSpec::default()
    });

    let external = make_kubevirt_vm(&declared, &StaticImageCatalog::default());

    assert_eq!(external.spec.run_strategy, HALTED_RUN_STRATEGY);
    assert_eq!(external.spec.template.spec.domain.cpu.cores, 4);
    assert_eq!(external.spec.template.spec.domain.resources.requests["memory"], "8Gi");
    assert_eq!(
        external.spec.template.spec.volumes[0].container_disk.as_ref().unwrap().image,
        "quay.io/containerdisks/fedora:40"
    );
    let storage = &external.spec.data_volume_templates[0].spec.storage;
    assert_eq!(storage.resources.requests["storage"], "50Gi");
    assert_eq!(storage.storage_class_name, "ceph-rbd");
}

#[test]
fn test_cloud_init_user_data() {
    let mut spec = ubuntu();
    assert_eq!(cloud_init_user_data(&vm(spec.clone())), None);

    spec.ssh_keys = vec!["ssh-ed25519 AAAA alice".to_string(), "ssh-rsa BBBB bob".to_string()];
    assert_eq!(
        cloud_init_user_data(&vm(spec.clone())).as_deref(),
        Some("#cloud-config\nssh_authorized_keys:\nssh-ed25519 AAAA alice\nssh-rsa BBBB bob")
    );

    // an explicit document wins over the keys
    spec.cloud_init = Some("#cloud-config\npackages: [htop]".to_string());
    let declared = vm(spec);
    assert_eq!(
        cloud_init_user_data(&declared).as_deref(),
        Some("#cloud-config\npackages: [htop]")
    );
    let external = make_kubevirt_vm(&declared, &StaticImageCatalog::default());
    assert_eq!(external.spec.template.spec.domain.devices.disks.len(), 3);
    let cloud_init = external.spec.template.spec.volumes[2].cloud_init_no_cloud.as_ref().unwrap();
    assert_eq!(cloud_init.user_data, "#cloud-config\npackages: [htop]");
}

#[test]
fn test_image_catalog_resolution() {
    let catalog = StaticImageCatalog::default();
    assert_eq!(catalog.resolve("ubuntu", None), "quay.io/containerdisks/ubuntu:22.04");
    assert_eq!(catalog.resolve("ubuntu", Some("24.04")), "quay.io/containerdisks/ubuntu:24.04");
    assert_eq!(catalog.resolve("ubuntu", Some("")), "quay.io/containerdisks/ubuntu:22.04");
    assert_eq!(catalog.resolve("plan9", None), CIRROS_IMAGE);
    assert_eq!(catalog.resolve("plan9", Some("4")), CIRROS_IMAGE);

    let mut images = BTreeMap::new();
    images.insert("ubuntu".to_string(), "registry.local:5000/ubuntu:22.04".to_string());
    images.insert("ubuntu:20.04".to_string(), "registry.local:5000/legacy/focal".to_string());
    images.insert("rocky".to_string(), "registry.local:5000/rocky".to_string());
    let catalog = StaticImageCatalog::new(images, "registry.local:5000/fallback:1");
    assert_eq!(catalog.resolve("ubuntu", Some("20.04")), "registry.local:5000/legacy/focal");
    assert_eq!(catalog.resolve("ubuntu", Some("23.10")), "registry.local:5000/ubuntu:23.10");
    assert_eq!(catalog.resolve("rocky", Some("9")), "registry.local:5000/rocky:9");
    assert_eq!(catalog.resolve("arch", None), "registry.local:5000/fallback:1");
}

struct PinnedCatalog;

impl ImageCatalog for PinnedCatalog {
    fn resolve(&self, _os: &str, _version: Option<&str>) -> String {
        "registry.local/pinned:1".to_string()
    }
}

#[tokio::test]
async fn test_reconciler_uses_injected_catalog() {
    let server = ExecutableApiServer::new();
    server.create_resource(&vm(ubuntu())).await.unwrap();
    let reconciler = VirtualMachineReconciler::new(PinnedCatalog);

    claim_and_sync(&server, &reconciler, NS, "vm-1").await;

    let external = external_vm(&server).await.unwrap();
    let image = &external.data["spec"]["template"]["spec"]["volumes"][0]["containerDisk"]["image"];
    assert_eq!(image, "registry.local/pinned:1");
}

#[test]
fn test_with_run_strategy_requires_spec() {
    let obj = DynamicObject::new("vm-1", &kubevirt_vm_api_resource()).data(json!({}));
    assert!(with_run_strategy(obj, HALTED_RUN_STRATEGY).is_err());

    let obj = DynamicObject::new("vm-1", &kubevirt_vm_api_resource()).data(json!({ "spec": { "runStrategy": "Always" } }));
    let halted = with_run_strategy(obj, HALTED_RUN_STRATEGY).unwrap();
    assert_eq!(run_strategy(&halted), HALTED_RUN_STRATEGY);
}

#[test]
fn test_observe_vmi() {
    let vmi = DynamicObject::new("vm-1", &kubevirt_vmi_api_resource()).data(json!({
        "status": { "phase": "Running", "nodeName": "n1", "interfaces": [{ "ipAddress": "10.0.0.7" }, { "ipAddress": "10.0.0.8" }] }
    }));
    assert_eq!(
        observe_vmi(&vmi),
        VmiObservation {
            phase: Some("Running".to_string()),
            node: Some("n1".to_string()),
            ip_address: Some("10.0.0.7".to_string()),
        }
    );
    let empty = DynamicObject::new("vm-1", &kubevirt_vmi_api_resource()).data(json!({}));
    assert_eq!(observe_vmi(&empty), VmiObservation::default());
}
