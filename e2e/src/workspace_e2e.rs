// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use controllers::crds::Workspace;
use k8s_openapi::api::core::v1::{Namespace, ResourceQuota};
use k8s_openapi::api::rbac::v1::RoleBinding;
use kube::{api::Api, discovery::Discovery, Client};
use std::time::Duration;
use tracing::*;

const WORKSPACE: &str = "e2e-team";

pub async fn desired_state_test(client: Client, namespace: &str) -> Result<(), Error> {
    let rb_api: Api<RoleBinding> = Api::namespaced(client.clone(), namespace);
    for (user, cluster_role) in [("alice", "admin"), ("bob", "edit")] {
        let binding = format!("{}-{}", WORKSPACE, user);
        match rb_api.get(&binding).await {
            Err(e) => {
                info!("Get RoleBinding {} failed with error {}.", binding, e);
                return Err(Error::WorkspaceFailed);
            }
            Ok(rb) => {
                if rb.role_ref.name != cluster_role || rb.role_ref.kind != "ClusterRole" {
                    info!("RoleBinding {} refers to {:?}.", binding, rb.role_ref);
                    return Err(Error::WorkspaceFailed);
                }
            }
        }
    }
    let ns_api: Api<Namespace> = Api::all(client);
    let ns = ns_api.get(namespace).await?;
    let workspace_label = ns
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get("llmcloud.io/workspace").cloned());
    if workspace_label.as_deref() != Some(WORKSPACE) {
        info!("Namespace {} is labeled {:?}.", namespace, workspace_label);
        return Err(Error::WorkspaceFailed);
    }
    info!("Desired state test passed.");
    Ok(())
}

pub async fn membership_test(client: Client, namespace: &str) -> Result<(), Error> {
    run_command(
        "kubectl",
        vec![
            "patch",
            "workspace",
            WORKSPACE,
            "--type=json",
            "-p",
            "[{\"op\": \"add\", \"path\": \"/spec/members/-\", \"value\": {\"username\": \"carol\", \"role\": \"viewer\"}}]",
        ],
        "failed to add workspace member",
    );
    let rb_api: Api<RoleBinding> = Api::namespaced(client, namespace);
    wait_until("membership test", Duration::from_secs(100), || async {
        match rb_api.get_opt(&format!("{}-carol", WORKSPACE)).await {
            Ok(Some(rb)) => Ok(rb.role_ref.name == "view"),
            Ok(None) => {
                info!("RoleBinding for carol not created yet.");
                Ok(false)
            }
            Err(e) => {
                info!("Get RoleBinding failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

pub async fn quota_test(client: Client, namespace: &str) -> Result<(), Error> {
    run_command(
        "kubectl",
        vec![
            "patch",
            "workspace",
            WORKSPACE,
            "--type=merge",
            "-p",
            "{\"spec\": {\"resourceQuotas\": {\"maxVMs\": 2, \"maxCPU\": \"8\"}}}",
        ],
        "failed to set workspace quota",
    );
    let quota_api: Api<ResourceQuota> = Api::namespaced(client, namespace);
    wait_until("quota test", Duration::from_secs(100), || async {
        match quota_api.get_opt("workspace-quota").await {
            Ok(Some(quota)) => {
                let hard = quota.spec.and_then(|spec| spec.hard).unwrap_or_default();
                if hard.get("requests.cpu").map(|q| q.0.as_str()) == Some("8") {
                    Ok(true)
                } else {
                    info!("ResourceQuota hard limits are {:?}.", hard);
                    Err(Error::WorkspaceFailed)
                }
            }
            Ok(None) => {
                info!("ResourceQuota not created yet.");
                Ok(false)
            }
            Err(e) => {
                info!("Get ResourceQuota failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

pub async fn deletion_test(client: Client, namespace: &str) -> Result<(), Error> {
    delete_object("workspace", WORKSPACE, None);
    let ws_api: Api<Workspace> = Api::all(client.clone());
    let ns_api: Api<Namespace> = Api::all(client);
    wait_until("deletion test", Duration::from_secs(200), || async {
        let ws_gone = matches!(ws_api.get_opt(WORKSPACE).await, Ok(None));
        let ns_terminating = match ns_api.get_opt(namespace).await {
            Ok(None) => true,
            Ok(Some(ns)) => ns.metadata.deletion_timestamp.is_some(),
            Err(_) => false,
        };
        if !ws_gone || !ns_terminating {
            info!("Workspace gone: {}, namespace terminating: {}.", ws_gone, ns_terminating);
        }
        Ok(ws_gone && ns_terminating)
    })
    .await
}

pub async fn workspace_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crds(client.clone()).await?;

    let discovery = Discovery::new(client.clone()).run().await?;
    let namespace = setup_workspace(client.clone(), &discovery, WORKSPACE).await?;

    desired_state_test(client.clone(), &namespace).await?;
    membership_test(client.clone(), &namespace).await?;
    quota_test(client.clone(), &namespace).await?;
    deletion_test(client.clone(), &namespace).await?;

    info!("E2e test passed.");
    Ok(())
}
