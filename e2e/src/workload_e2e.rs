// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use controllers::crds::{CatalogService, ModelDeployment};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::{api::Api, discovery::Discovery, Client};
use std::time::Duration;
use tracing::*;

const MODEL: &str = "e2e-model";
const SERVICE: &str = "e2e-redis";

pub fn model_deployment(namespace: &str) -> String {
    format!(
        "
    apiVersion: llmcloud.llmcloud.io/v1alpha1
    kind: ModelDeployment
    metadata:
      name: {}
      namespace: {}
    spec:
      modelName: tinyllama
      modelSize: 1.1b
      replicas: 1
      resources:
        cpu: 250m
        memory: 512Mi
    ",
        MODEL, namespace
    )
}

pub fn catalog_service(namespace: &str) -> String {
    format!(
        "
    apiVersion: llmcloud.llmcloud.io/v1alpha1
    kind: CatalogService
    metadata:
      name: {}
      namespace: {}
    spec:
      type: redis
      image: redis:7
      ports:
      - name: redis
        port: 6379
    ",
        SERVICE, namespace
    )
}

/// Wait until the Deployment name runs the given number of replicas and the Service exposes port.
async fn wait_for_workload(client: Client, namespace: &str, name: &str, replicas: i32, port: i32) -> Result<(), Error> {
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let svc_api: Api<Service> = Api::namespaced(client, namespace);
    wait_until(&format!("{} workload", name), Duration::from_secs(200), || async {
        match deploy_api.get_opt(name).await {
            Ok(Some(deploy)) => {
                let desired = deploy.spec.as_ref().and_then(|spec| spec.replicas);
                if desired != Some(replicas) {
                    info!("Deployment {} wants {:?} replicas, not {}.", name, desired, replicas);
                    return Ok(false);
                }
                let selected = deploy
                    .spec
                    .as_ref()
                    .and_then(|spec| spec.selector.match_labels.as_ref())
                    .and_then(|labels| labels.get("app").cloned());
                if selected.as_deref() != Some(name) {
                    info!("Deployment {} selects app={:?}.", name, selected);
                    return Err(Error::WorkloadFailed);
                }
            }
            Ok(None) => {
                info!("Deployment {} not created yet.", name);
                return Ok(false);
            }
            Err(e) => {
                info!("Get Deployment failed with error {}.", e);
                return Ok(false);
            }
        }
        match svc_api.get_opt(name).await {
            Ok(Some(svc)) => {
                let ports: Vec<i32> = svc
                    .spec
                    .and_then(|spec| spec.ports)
                    .unwrap_or_default()
                    .iter()
                    .map(|p| p.port)
                    .collect();
                if ports == vec![port] {
                    Ok(true)
                } else {
                    info!("Service {} exposes {:?}.", name, ports);
                    Err(Error::WorkloadFailed)
                }
            }
            Ok(None) => {
                info!("Service {} not created yet.", name);
                Ok(false)
            }
            Err(e) => {
                info!("Get Service failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

async fn wait_for_removal(client: Client, namespace: &str, name: &str) -> Result<(), Error> {
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), namespace);
    let svc_api: Api<Service> = Api::namespaced(client, namespace);
    wait_until(&format!("{} removal", name), Duration::from_secs(200), || async {
        let deploy_gone = matches!(deploy_api.get_opt(name).await, Ok(None));
        let svc_gone = matches!(svc_api.get_opt(name).await, Ok(None));
        if !deploy_gone || !svc_gone {
            info!("Deployment gone: {}, Service gone: {}.", deploy_gone, svc_gone);
        }
        Ok(deploy_gone && svc_gone)
    })
    .await
}

pub async fn model_scaling_test(client: Client, namespace: &str) -> Result<(), Error> {
    run_command(
        "kubectl",
        vec![
            "patch",
            "modeldeployment",
            MODEL,
            "-n",
            namespace,
            "--type=merge",
            "-p",
            "{\"spec\": {\"replicas\": 2}}",
        ],
        "failed to scale model",
    );
    wait_for_workload(client, namespace, MODEL, 2, 11434).await
}

pub async fn model_endpoint_test(client: Client, namespace: &str) -> Result<(), Error> {
    let md_api: Api<ModelDeployment> = Api::namespaced(client, namespace);
    let expected = format!("http://{}.{}.svc.cluster.local:11434", MODEL, namespace);
    wait_until("model endpoint test", Duration::from_secs(100), || async {
        match md_api.get(MODEL).await {
            Ok(md) => {
                let endpoint = md.status.and_then(|s| s.endpoint);
                if endpoint.is_some() && endpoint.as_deref() != Some(expected.as_str()) {
                    info!("ModelDeployment endpoint is {:?}.", endpoint);
                    return Err(Error::WorkloadFailed);
                }
                Ok(endpoint.is_some())
            }
            Err(e) => {
                info!("Get ModelDeployment failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

pub async fn service_status_test(client: Client, namespace: &str) -> Result<(), Error> {
    let cs_api: Api<CatalogService> = Api::namespaced(client, namespace);
    wait_until("service status test", Duration::from_secs(300), || async {
        match cs_api.get(SERVICE).await {
            Ok(cs) => {
                let status = cs.status.unwrap_or_default();
                info!("CatalogService phase {:?}, {} ready.", status.phase, status.ready_replicas);
                Ok(status.phase.as_deref() == Some("Running"))
            }
            Err(e) => {
                info!("Get CatalogService failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

pub async fn model_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crds(client.clone()).await?;
    let discovery = Discovery::new(client.clone()).run().await?;
    let namespace = setup_workspace(client.clone(), &discovery, "e2e-model").await?;
    apply(model_deployment(&namespace), client.clone(), &discovery).await?;

    wait_for_workload(client.clone(), &namespace, MODEL, 1, 11434).await?;
    model_endpoint_test(client.clone(), &namespace).await?;
    model_scaling_test(client.clone(), &namespace).await?;
    delete_object("modeldeployment", MODEL, Some(&namespace));
    wait_for_removal(client.clone(), &namespace, MODEL).await?;

    info!("E2e test passed.");
    Ok(())
}

pub async fn service_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crds(client.clone()).await?;
    let discovery = Discovery::new(client.clone()).run().await?;
    let namespace = setup_workspace(client.clone(), &discovery, "e2e-service").await?;
    apply(catalog_service(&namespace), client.clone(), &discovery).await?;

    wait_for_workload(client.clone(), &namespace, SERVICE, 1, 6379).await?;
    service_status_test(client.clone(), &namespace).await?;
    delete_object("catalogservice", SERVICE, Some(&namespace));
    wait_for_removal(client.clone(), &namespace, SERVICE).await?;

    info!("E2e test passed.");
    Ok(())
}
