// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{ModelDeployment, WorkloadStatus};
use crate::modeldeployment_controller::MODEL_FINALIZER;
use crate::workload_controller::exec::resource::*;
use crate::workload_controller::workload::{WorkloadKind, DEFAULT_REPLICAS};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, ContainerPort, EnvVar, Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

pub const DEFAULT_MODEL_IMAGE: &str = "ollama/ollama:latest";
pub const MODEL_PORT: i32 = 11434;
const MODEL_PORT_NAME: &str = "http";

fn env_var(name: &str, value: &Option<String>) -> Option<EnvVar> {
    value.as_ref().filter(|v| !v.is_empty()).map(|v| EnvVar {
        name: name.to_string(),
        value: Some(v.clone()),
        value_from: None,
    })
}

pub fn make_model_container(md: &ModelDeployment) -> Container {
    let env = [
        env_var("MODEL_NAME", &Some(md.spec.model_name.clone())),
        env_var("MODEL_SIZE", &md.spec.model_size),
        env_var("MODEL_PROVIDER", &md.spec.provider),
        env_var("MODEL_QUANTIZATION", &md.spec.quantization),
    ]
    .into_iter()
    .flatten()
    .collect();
    Container {
        name: "model".to_string(),
        image: Some(
            md.spec
                .image
                .clone()
                .filter(|image| !image.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL_IMAGE.to_string()),
        ),
        ports: Some(vec![ContainerPort {
            name: Some(MODEL_PORT_NAME.to_string()),
            container_port: MODEL_PORT,
            protocol: Some("TCP".to_string()),
            ..ContainerPort::default()
        }]),
        env: Some(env),
        resources: md.spec.resources.as_ref().map(make_resource_requirements),
        ..Container::default()
    }
}

impl WorkloadKind for ModelDeployment {
    const FINALIZER: &'static str = MODEL_FINALIZER;

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
            make_labels(self, BTreeMap::new()),
            self.desired_replicas(),
            make_model_container(self),
        )
    }

    fn make_service(&self) -> Option<Service> {
        let port = ServicePort {
            name: Some(MODEL_PORT_NAME.to_string()),
            port: MODEL_PORT,
            target_port: Some(IntOrString::Int(MODEL_PORT)),
            protocol: Some("TCP".to_string()),
            ..ServicePort::default()
        };
        Some(make_service(self, make_labels(self, BTreeMap::new()), vec![port]))
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("http://{}:{}", service_host(self), MODEL_PORT))
    }
}
