// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};

pub const MEMBER_ROLES: [&str; 4] = ["owner", "admin", "developer", "viewer"];
pub const VM_OPERATING_SYSTEMS: [&str; 7] = ["ubuntu", "fedora", "debian", "centos", "alpine", "cirros", "freebsd"];
pub const VM_RUN_STRATEGIES: [&str; 4] = ["Always", "RerunOnFailure", "Manual", "Halted"];

fn string_enum_schema(values: &[&str]) -> Schema {
    Schema::Object(SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        enum_values: Some(values.iter().map(|v| serde_json::Value::from(*v)).collect()),
        ..SchemaObject::default()
    })
}

fn member_role_schema(_: &mut SchemaGenerator) -> Schema {
    string_enum_schema(&MEMBER_ROLES)
}

fn vm_os_schema(_: &mut SchemaGenerator) -> Schema {
    string_enum_schema(&VM_OPERATING_SYSTEMS)
}

fn vm_run_strategy_schema(_: &mut SchemaGenerator) -> Schema {
    string_enum_schema(&VM_RUN_STRATEGIES)
}

#[derive(
    kube::CustomResource,
    Default,
    Debug,
    Clone,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(group = "llmcloud.llmcloud.io", version = "v1alpha1", kind = "Workspace")]
#[kube(shortname = "ws", status = "WorkspaceStatus")]
pub struct WorkspaceSpec {
    pub description: Option<String>,
    #[serde(default)]
    pub members: Vec<WorkspaceMember>,
    #[serde(rename = "resourceQuotas")]
    pub resource_quotas: Option<WorkspaceResourceQuotas>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct WorkspaceMember {
    pub username: String,
    #[schemars(schema_with = "member_role_schema")]
    pub role: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct WorkspaceResourceQuotas {
    #[serde(rename = "maxVMs")]
    pub max_vms: Option<i32>,
    #[serde(rename = "maxModels")]
    pub max_models: Option<i32>,
    #[serde(rename = "maxCPU")]
    pub max_cpu: Option<String>,
    #[serde(rename = "maxMemory")]
    pub max_memory: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct WorkspaceStatus {
    pub namespace: Option<String>,
    pub phase: Option<String>,
    #[serde(rename = "vmCount", default)]
    pub vm_count: i32,
    #[serde(rename = "llmModelCount", default)]
    pub llm_model_count: i32,
    #[serde(rename = "serviceCount", default)]
    pub service_count: i32,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(
    kube::CustomResource,
    Default,
    Debug,
    Clone,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(group = "llmcloud.llmcloud.io", version = "v1alpha1", kind = "VirtualMachine")]
#[kube(shortname = "lvm", namespaced, status = "VirtualMachineStatus")]
pub struct VirtualMachineSpec {
    #[schemars(range(min = 1))]
    pub cpus: Option<i32>,
    pub memory: Option<String>,
    #[serde(rename = "diskSize")]
    pub disk_size: Option<String>,
    #[schemars(schema_with = "vm_os_schema")]
    pub os: String,
    #[serde(rename = "osVersion")]
    pub os_version: Option<String>,
    #[serde(rename = "cloudInit")]
    pub cloud_init: Option<String>,
    #[serde(rename = "sshKeys", default)]
    pub ssh_keys: Vec<String>,
    // start/stop requests from users flip this between Always and Halted
    #[serde(rename = "runStrategy", default)]
    #[schemars(schema_with = "vm_run_strategy_schema")]
    pub run_strategy: Option<String>,
    #[serde(rename = "storageClass")]
    pub storage_class: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct VirtualMachineStatus {
    pub phase: Option<String>,
    pub node: Option<String>,
    #[serde(rename = "ipAddress")]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct ResourceRequirements {
    pub cpu: Option<String>,
    pub memory: Option<String>,
    pub gpu: Option<i32>,
}

// Shared by ModelDeployment and CatalogService.
#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct WorkloadStatus {
    pub phase: Option<String>,
    #[serde(rename = "readyReplicas", default)]
    pub ready_replicas: i32,
    pub endpoint: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(
    kube::CustomResource,
    Default,
    Debug,
    Clone,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(group = "llmcloud.llmcloud.io", version = "v1alpha1", kind = "ModelDeployment")]
#[kube(shortname = "md", namespaced, status = "WorkloadStatus")]
pub struct ModelDeploymentSpec {
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "modelSize")]
    pub model_size: Option<String>,
    pub provider: Option<String>,
    pub quantization: Option<String>,
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub replicas: Option<i32>,
}

#[derive(
    kube::CustomResource,
    Default,
    Debug,
    Clone,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(group = "llmcloud.llmcloud.io", version = "v1alpha1", kind = "CatalogService")]
#[kube(shortname = "cs", namespaced, status = "WorkloadStatus")]
pub struct CatalogServiceSpec {
    // catalog entry the service was created from, e.g. postgres or redis
    #[serde(rename = "type")]
    pub service_type: String,
    pub image: String,
    pub replicas: Option<i32>,
    #[serde(default)]
    pub ports: Vec<CatalogServicePort>,
    #[serde(default)]
    pub env: Vec<EnvVar>,
    pub resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct CatalogServicePort {
    pub name: Option<String>,
    pub port: i32,
    #[serde(rename = "targetPort")]
    pub target_port: Option<i32>,
    pub protocol: Option<String>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct EnvVar {
    pub name: String,
    pub value: Option<String>,
    #[serde(rename = "valueFrom")]
    pub value_from: Option<EnvVarSource>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct EnvVarSource {
    #[serde(rename = "secretKeyRef")]
    pub secret_key_ref: Option<SecretKeySelector>,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct SecretKeySelector {
    pub name: String,
    pub key: String,
}

#[derive(
    kube::CustomResource,
    Default,
    Debug,
    Clone,
    serde::Deserialize,
    serde::Serialize,
    schemars::JsonSchema,
    PartialEq,
)]
#[kube(group = "llmcloud.llmcloud.io", version = "v1alpha1", kind = "Account")]
#[kube(shortname = "acct", status = "AccountStatus")]
pub struct AccountSpec {
    pub username: String,
    #[serde(rename = "passwordHash")]
    pub password_hash: String,
    pub email: Option<String>,
    #[serde(rename = "isAdmin", default)]
    pub is_admin: bool,
    // names of the workspaces the account belongs to, not enforced by the store
    #[serde(default)]
    pub projects: Vec<String>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(Clone, Debug, Default, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
pub struct AccountStatus {
    #[serde(rename = "lastLoginTime")]
    pub last_login_time: Option<Time>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}
