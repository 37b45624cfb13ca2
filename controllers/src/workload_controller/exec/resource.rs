// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::managed_labels;
use crate::crds;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::Resource;
use llmcloud_runtime::kubernetes_api_objects::object_meta::ObjectMetaExt;
use std::collections::BTreeMap;

pub const GPU_RESOURCE: &str = "nvidia.com/gpu";

/// Labels the Deployment selects its pods by.
pub fn make_base_labels<K: Resource<DynamicType = ()>>(cr: &K) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), cr.meta().name_or_empty().to_string());
    labels
}

pub fn make_labels<K: Resource<DynamicType = ()>>(cr: &K, extra: BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = managed_labels();
    labels.extend(make_base_labels(cr));
    labels.extend(extra);
    labels
}

pub fn make_owner_references<K: Resource<DynamicType = ()>>(cr: &K) -> Vec<OwnerReference> {
    cr.controller_owner_ref(&()).into_iter().collect()
}

fn make_metadata<K: Resource<DynamicType = ()>>(cr: &K, labels: BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: cr.meta().name.clone(),
        namespace: cr.meta().namespace.clone(),
        labels: Some(labels),
        owner_references: Some(make_owner_references(cr)),
        ..ObjectMeta::default()
    }
}

/// cpu and memory become both requests and limits; a gpu count is only a limit.
pub fn make_resource_requirements(resources: &crds::ResourceRequirements) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();
    if let Some(cpu) = &resources.cpu {
        requests.insert("cpu".to_string(), Quantity(cpu.clone()));
        limits.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &resources.memory {
        requests.insert("memory".to_string(), Quantity(memory.clone()));
        limits.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if let Some(gpu) = resources.gpu.filter(|gpu| *gpu > 0) {
        limits.insert(GPU_RESOURCE.to_string(), Quantity(gpu.to_string()));
    }
    ResourceRequirements {
        requests: if requests.is_empty() { None } else { Some(requests) },
        limits: if limits.is_empty() { None } else { Some(limits) },
        ..ResourceRequirements::default()
    }
}

pub fn make_deployment<K: Resource<DynamicType = ()>>(
    cr: &K,
    labels: BTreeMap<String, String>,
    replicas: i32,
    container: Container,
) -> Deployment {
    Deployment {
        metadata: make_metadata(cr, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(make_base_labels(cr)),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        status: None,
    }
}

pub fn make_service<K: Resource<DynamicType = ()>>(
    cr: &K,
    labels: BTreeMap<String, String>,
    ports: Vec<ServicePort>,
) -> Service {
    Service {
        metadata: make_metadata(cr, labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            ports: Some(ports),
            selector: Some(make_base_labels(cr)),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

pub fn service_host<K: Resource<DynamicType = ()>>(cr: &K) -> String {
    format!(
        "{}.{}.svc.cluster.local",
        cr.meta().name_or_empty(),
        cr.meta().namespace_or_empty()
    )
}
