// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::managed_labels;
use crate::crds::VirtualMachine;
use crate::virtualmachine_controller::exec::image_catalog::ImageCatalog;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject};
use llmcloud_runtime::kubernetes_api_objects::object_meta::ObjectMetaExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

// KubeVirt types are not part of k8s-openapi. The builder below covers the subset of
// kubevirt.io/v1 VirtualMachine the controller declares; it becomes a DynamicObject only
// in to_dynamic_object.

pub const KUBEVIRT_API_VERSION: &str = "kubevirt.io/v1";

pub const DEFAULT_RUN_STRATEGY: &str = "Always";
pub const HALTED_RUN_STRATEGY: &str = "Halted";
pub const DEFAULT_CPUS: i32 = 1;
pub const DEFAULT_MEMORY: &str = "1Gi";
pub const DEFAULT_DISK_SIZE: &str = "10Gi";
pub const DEFAULT_STORAGE_CLASS: &str = "local-path";

const CONTAINER_DISK: &str = "containerdisk";
const DATA_DISK: &str = "datadisk";
const CLOUD_INIT_DISK: &str = "cloudinitdisk";

fn kubevirt_api_resource(kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: "kubevirt.io".to_string(),
        version: "v1".to_string(),
        api_version: KUBEVIRT_API_VERSION.to_string(),
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

pub fn kubevirt_vm_api_resource() -> ApiResource {
    kubevirt_api_resource("VirtualMachine", "virtualmachines")
}

pub fn kubevirt_vmi_api_resource() -> ApiResource {
    kubevirt_api_resource("VirtualMachineInstance", "virtualmachineinstances")
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtVirtualMachine {
    pub api_version: String,
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: KubevirtVirtualMachineSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KubevirtVirtualMachineSpec {
    pub run_strategy: String,
    pub data_volume_templates: Vec<DataVolumeTemplate>,
    pub template: VirtualMachineInstanceTemplate,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeTemplate {
    pub metadata: ObjectMeta,
    pub spec: DataVolumeSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSpec {
    pub source: DataVolumeSource,
    pub storage: StorageSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeSource {
    pub blank: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    pub access_modes: Vec<String>,
    pub resources: ResourceRequests,
    pub storage_class_name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequests {
    pub requests: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceTemplate {
    pub spec: VirtualMachineInstanceSpec,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    pub domain: DomainSpec,
    pub volumes: Vec<Volume>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DomainSpec {
    pub cpu: Cpu,
    pub resources: ResourceRequests,
    pub devices: Devices,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: i32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Devices {
    pub disks: Vec<Disk>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    pub name: String,
    pub disk: DiskTarget,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiskTarget {
    pub bus: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Volume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container_disk: Option<ContainerDiskSource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume: Option<DataVolumeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_init_no_cloud: Option<CloudInitNoCloudSource>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDiskSource {
    pub image: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DataVolumeRef {
    pub name: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudInitNoCloudSource {
    pub user_data: String,
}

fn virtio_disk(name: &str) -> Disk {
    Disk {
        name: name.to_string(),
        disk: DiskTarget {
            bus: "virtio".to_string(),
        },
    }
}

fn non_empty(s: &Option<String>) -> Option<&str> {
    s.as_deref().filter(|s| !s.is_empty())
}

/// The cloud-init user data of the VM: the explicit document if one is given,
/// otherwise a generated one authorizing the SSH keys, otherwise none.
pub fn cloud_init_user_data(vm: &VirtualMachine) -> Option<String> {
    if let Some(cloud_init) = non_empty(&vm.spec.cloud_init) {
        return Some(cloud_init.to_string());
    }
    if vm.spec.ssh_keys.is_empty() {
        return None;
    }
    Some(format!("#cloud-config\nssh_authorized_keys:\n{}", vm.spec.ssh_keys.join("\n")))
}

pub fn data_volume_name(vm: &VirtualMachine) -> String {
    format!("{}-disk", vm.metadata.name_or_empty())
}

/// Maps the declared VM to the KubeVirt VirtualMachine that runs it.
/// Every optional field has a default, so the mapping never fails.
pub fn make_kubevirt_vm(vm: &VirtualMachine, catalog: &dyn ImageCatalog) -> KubevirtVirtualMachine {
    let mut disks = vec![virtio_disk(CONTAINER_DISK), virtio_disk(DATA_DISK)];
    let mut volumes = vec![
        Volume {
            name: CONTAINER_DISK.to_string(),
            container_disk: Some(ContainerDiskSource {
                image: catalog.resolve(&vm.spec.os, non_empty(&vm.spec.os_version)),
            }),
            ..Volume::default()
        },
        Volume {
            name: DATA_DISK.to_string(),
            data_volume: Some(DataVolumeRef {
                name: data_volume_name(vm),
            }),
            ..Volume::default()
        },
    ];
    if let Some(user_data) = cloud_init_user_data(vm) {
        disks.push(virtio_disk(CLOUD_INIT_DISK));
        volumes.push(Volume {
            name: CLOUD_INIT_DISK.to_string(),
            cloud_init_no_cloud: Some(CloudInitNoCloudSource { user_data }),
            ..Volume::default()
        });
    }

    let mut storage_requests = BTreeMap::new();
    storage_requests.insert(
        "storage".to_string(),
        non_empty(&vm.spec.disk_size).unwrap_or(DEFAULT_DISK_SIZE).to_string(),
    );
    let mut memory_requests = BTreeMap::new();
    memory_requests.insert(
        "memory".to_string(),
        non_empty(&vm.spec.memory).unwrap_or(DEFAULT_MEMORY).to_string(),
    );

    KubevirtVirtualMachine {
        api_version: KUBEVIRT_API_VERSION.to_string(),
        kind: "VirtualMachine".to_string(),
        metadata: ObjectMeta {
            name: vm.metadata.name.clone(),
            namespace: vm.metadata.namespace.clone(),
            labels: Some(managed_labels()),
            ..ObjectMeta::default()
        },
        spec: KubevirtVirtualMachineSpec {
            run_strategy: non_empty(&vm.spec.run_strategy).unwrap_or(DEFAULT_RUN_STRATEGY).to_string(),
            data_volume_templates: vec![DataVolumeTemplate {
                metadata: ObjectMeta {
                    name: Some(data_volume_name(vm)),
                    ..ObjectMeta::default()
                },
                spec: DataVolumeSpec {
                    source: DataVolumeSource::default(),
                    storage: StorageSpec {
                        access_modes: vec!["ReadWriteOnce".to_string()],
                        resources: ResourceRequests {
                            requests: storage_requests,
                        },
                        storage_class_name: non_empty(&vm.spec.storage_class)
                            .unwrap_or(DEFAULT_STORAGE_CLASS)
                            .to_string(),
                    },
                },
            }],
            template: VirtualMachineInstanceTemplate {
                spec: VirtualMachineInstanceSpec {
                    domain: DomainSpec {
                        cpu: Cpu {
                            cores: vm.spec.cpus.unwrap_or(DEFAULT_CPUS),
                        },
                        resources: ResourceRequests {
                            requests: memory_requests,
                        },
                        devices: Devices { disks },
                    },
                    volumes,
                },
            },
        },
    }
}

impl KubevirtVirtualMachine {
    pub fn to_dynamic_object(&self) -> Result<DynamicObject, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// Returns obj with spec.runStrategy replaced.
pub fn with_run_strategy(mut obj: DynamicObject, run_strategy: &str) -> Result<DynamicObject, String> {
    let spec = obj
        .data
        .get_mut("spec")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| format!("{} has no spec", obj.metadata.name_or_empty()))?;
    spec.insert("runStrategy".to_string(), Value::String(run_strategy.to_string()));
    Ok(obj)
}

/// What the controller reads back from a VirtualMachineInstance.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VmiObservation {
    pub phase: Option<String>,
    pub node: Option<String>,
    pub ip_address: Option<String>,
}

pub fn observe_vmi(vmi: &DynamicObject) -> VmiObservation {
    let status = vmi.data.get("status");
    let field = |name: &str| {
        status
            .and_then(|s| s.get(name))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    VmiObservation {
        phase: field("phase"),
        node: field("nodeName"),
        ip_address: status
            .and_then(|s| s.get("interfaces"))
            .and_then(Value::as_array)
            .and_then(|interfaces| interfaces.first())
            .and_then(|iface| iface.get("ipAddress"))
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
