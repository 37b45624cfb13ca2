// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use controllers::crds::Workspace;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{
    api::{Api, DynamicObject, Patch, PatchParams, ResourceExt},
    core::GroupVersionKind,
    discovery::{ApiCapabilities, ApiResource, Discovery, Scope},
    Client,
};
use std::future::Future;
use std::process::Command;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::*;

pub const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("Failed to get kube client: {0}")]
    ClientGetFailed(#[from] kube_client::Error),

    #[error("Failed to apply yaml file!")]
    ApplyFailed,

    #[error("Failed to parse the yaml file!")]
    ParseYamlFailed(#[from] serde_yaml::Error),

    #[error("Failed to parse the json format!")]
    ParseJsonFailed(#[from] serde_json::Error),

    #[error("Failed to get CRD: {0}")]
    CRDGetFailed(#[source] kube::Error),

    #[error("Timeout, e2e test failed!")]
    Timeout,

    #[error("Workspace namespace or bindings are not consistent with the workspace spec!")]
    WorkspaceFailed,

    #[error("KubeVirt virtual machine is not consistent with the VirtualMachine spec!")]
    VirtualMachineFailed,

    #[error("Deployment or Service is not consistent with the workload spec!")]
    WorkloadFailed,

    #[error("Account status is not consistent with the account!")]
    AccountFailed,
}

pub const CRDS: [&str; 5] = [
    "workspaces.llmcloud.llmcloud.io",
    "virtualmachines.llmcloud.llmcloud.io",
    "modeldeployments.llmcloud.llmcloud.io",
    "catalogservices.llmcloud.llmcloud.io",
    "accounts.llmcloud.llmcloud.io",
];

/// Fail early unless every llmcloud CRD is registered.
pub async fn check_crds(client: Client) -> Result<(), Error> {
    let crd_api: Api<CustomResourceDefinition> = Api::all(client);
    for name in CRDS {
        match crd_api.get(name).await {
            Err(e) => {
                error!("{} CRD not found, create it before running the e2e test.", name);
                return Err(Error::CRDGetFailed(e));
            }
            Ok(_) => info!("{} CRD found.", name),
        }
    }
    Ok(())
}

pub async fn apply(yaml: String, client: Client, discovery: &Discovery) -> Result<String, Error> {
    let ssapply = PatchParams::apply("llmcloud-e2e").force();
    let doc = serde_yaml::from_str(&yaml)?;

    let obj: DynamicObject = serde_yaml::from_value(doc)?;
    let namespace = obj.metadata.namespace.as_deref();
    let gvk = match obj.types.as_ref().map(GroupVersionKind::try_from) {
        Some(Ok(gvk)) => gvk,
        _ => {
            println!("cannot apply object without valid TypeMeta {:?}", obj);
            return Err(Error::ApplyFailed);
        }
    };
    let name = obj.name_any();
    if let Some((ar, caps)) = discovery.resolve_gvk(&gvk) {
        let api = dynamic_api(ar, caps, client.clone(), namespace);
        println!("Applying {}: \n{}", gvk.kind, serde_yaml::to_string(&obj)?);
        let data: serde_json::Value = serde_json::to_value(&obj)?;
        api.patch(&name, &ssapply, &Patch::Apply(data)).await?;
        println!("applied {} {}", gvk.kind, name);
    } else {
        println!("Cannot apply document for unknown {:?}", gvk);
        return Err(Error::ApplyFailed);
    }

    Ok(name)
}

fn dynamic_api(ar: ApiResource, caps: ApiCapabilities, client: Client, ns: Option<&str>) -> Api<DynamicObject> {
    if caps.scope == Scope::Cluster {
        Api::all_with(client, &ar)
    } else if let Some(namespace) = ns {
        Api::namespaced_with(client, namespace, &ar)
    } else {
        Api::default_namespaced_with(client, &ar)
    }
}

pub fn run_command(program: &str, args: Vec<&str>, err_msg: &str) -> (String, String) {
    println!("{} {}", program, args.join(" "));
    let cmd = match Command::new(program).args(args).output() {
        Ok(cmd) => cmd,
        Err(e) => {
            error!("{}: {}", err_msg, e);
            return (String::new(), e.to_string());
        }
    };
    println!("cmd output: {}", String::from_utf8_lossy(&cmd.stdout));
    println!("cmd error: {}", String::from_utf8_lossy(&cmd.stderr));
    (
        String::from_utf8_lossy(&cmd.stdout).to_string(),
        String::from_utf8_lossy(&cmd.stderr).to_string(),
    )
}

/// Poll check every POLL_INTERVAL until it returns Ok(true), returns an error, or timeout passes.
/// Ok(false) means the cluster has not converged yet.
pub async fn wait_until<F, Fut>(test_name: &str, timeout: Duration, mut check: F) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = Instant::now();
    loop {
        sleep(POLL_INTERVAL).await;
        if start.elapsed() > timeout {
            error!("Time out on {}", test_name);
            return Err(Error::Timeout);
        }
        if check().await? {
            info!("{} passed.", test_name);
            return Ok(());
        }
    }
}

pub fn workspace(name: &str) -> String {
    format!(
        "
    apiVersion: llmcloud.llmcloud.io/v1alpha1
    kind: Workspace
    metadata:
      name: {}
    spec:
      description: e2e workspace
      members:
      - username: alice
        role: owner
      - username: bob
        role: developer
    ",
        name
    )
}

/// Apply a Workspace and wait until its namespace is active; returns the namespace.
pub async fn setup_workspace(client: Client, discovery: &Discovery, name: &str) -> Result<String, Error> {
    apply(workspace(name), client.clone(), discovery).await?;
    let namespace = format!("workspace-{}", name);
    let ns_api: Api<Namespace> = Api::all(client.clone());
    let ws_api: Api<Workspace> = Api::all(client);
    wait_until("workspace setup", Duration::from_secs(100), || async {
        match ns_api.get_opt(&namespace).await {
            Ok(Some(ns)) if ns.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Active") => {}
            Ok(_) => {
                info!("Namespace {} is not active yet.", namespace);
                return Ok(false);
            }
            Err(e) => {
                info!("Get namespace failed with error {}.", e);
                return Ok(false);
            }
        }
        match ws_api.get(name).await {
            Ok(ws) => Ok(ws.status.and_then(|s| s.phase).as_deref() == Some("Active")),
            Err(e) => {
                info!("Get workspace failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await?;
    Ok(namespace)
}

pub fn delete_object(kind: &str, name: &str, namespace: Option<&str>) {
    let mut args = vec!["delete", kind, name, "--wait=false"];
    if let Some(namespace) = namespace {
        args.push("-n");
        args.push(namespace);
    }
    run_command("kubectl", args, "failed to delete object");
}
