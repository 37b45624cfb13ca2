// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::catalogservice_controller::SERVICE_FINALIZER;
use crate::common::SERVICE_TYPE_LABEL;
use crate::crds::{self, CatalogService, CatalogServicePort, WorkloadStatus};
use crate::workload_controller::exec::resource::*;
use crate::workload_controller::workload::{WorkloadKind, DEFAULT_REPLICAS};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, SecretKeySelector, Service, ServicePort,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

const DEFAULT_PROTOCOL: &str = "TCP";

fn protocol(port: &CatalogServicePort) -> String {
    port.protocol
        .clone()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string())
}

fn target_port(port: &CatalogServicePort) -> i32 {
    port.target_port.unwrap_or(port.port)
}

pub fn make_env_var(env: &crds::EnvVar) -> EnvVar {
    EnvVar {
        name: env.name.clone(),
        value: env.value.clone(),
        value_from: env
            .value_from
            .as_ref()
            .and_then(|source| source.secret_key_ref.as_ref())
            .map(|secret| {
                let mut selector = SecretKeySelector::default();
                selector.key = secret.key.clone();
                // optional in older API versions, required since 1.30
                selector.name = secret.name.clone().into();
                EnvVarSource {
                    secret_key_ref: Some(selector),
                    ..EnvVarSource::default()
                }
            }),
    }
}

fn non_empty(v: &[String]) -> Option<Vec<String>> {
    if v.is_empty() {
        None
    } else {
        Some(v.to_vec())
    }
}

pub fn make_service_container(cs: &CatalogService) -> Container {
    let ports = cs
        .spec
        .ports
        .iter()
        .map(|port| ContainerPort {
            name: port.name.clone(),
            container_port: target_port(port),
            protocol: Some(protocol(port)),
            ..ContainerPort::default()
        })
        .collect::<Vec<_>>();
    Container {
        name: "service".to_string(),
        image: Some(cs.spec.image.clone()),
        command: non_empty(&cs.spec.command),
        args: non_empty(&cs.spec.args),
        ports: if ports.is_empty() { None } else { Some(ports) },
        env: Some(cs.spec.env.iter().map(make_env_var).collect()),
        resources: cs.spec.resources.as_ref().map(make_resource_requirements),
        ..Container::default()
    }
}

fn service_type_labels(cs: &CatalogService) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(SERVICE_TYPE_LABEL.to_string(), cs.spec.service_type.clone());
    labels
}

impl WorkloadKind for CatalogService {
    const FINALIZER: &'static str = SERVICE_FINALIZER;

    fn workload_status(&self) -> Option<&WorkloadStatus> {
        self.status.as_ref()
    }

    fn set_workload_status(&mut self, status: WorkloadStatus) {
        self.status = Some(status);
    }

    fn desired_replicas(&self) -> i32 {
        self.spec.replicas.unwrap_or(DEFAULT_REPLICAS)
    }

    fn make_deployment(&self) -> Deployment {
        make_deployment(
            self,
            make_labels(self, service_type_labels(self)),
            self.desired_replicas(),
            make_service_container(self),
        )
    }

    fn make_service(&self) -> Option<Service> {
        if self.spec.ports.is_empty() {
            return None;
        }
        let ports = self
            .spec
            .ports
            .iter()
            .map(|port| ServicePort {
                name: port.name.clone(),
                port: port.port,
                target_port: Some(IntOrString::Int(target_port(port))),
                protocol: Some(protocol(port)),
                ..ServicePort::default()
            })
            .collect();
        Some(make_service(self, make_labels(self, service_type_labels(self)), ports))
    }

    fn endpoint(&self) -> Option<String> {
        self.spec
            .ports
            .first()
            .map(|port| format!("{}:{}", service_host(self), port.port))
    }
}
