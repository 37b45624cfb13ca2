// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use controllers::crds::VirtualMachine;
use controllers::virtualmachine_controller::exec::kubevirt::kubevirt_vm_api_resource;
use kube::{
    api::{Api, DynamicObject},
    discovery::Discovery,
    Client,
};
use std::time::Duration;
use tracing::*;

const VM: &str = "e2e-vm";

pub fn virtual_machine(namespace: &str) -> String {
    format!(
        "
    apiVersion: llmcloud.llmcloud.io/v1alpha1
    kind: VirtualMachine
    metadata:
      name: {}
      namespace: {}
    spec:
      os: cirros
      cpus: 1
      memory: 256Mi
      diskSize: 1Gi
      runStrategy: Always
    ",
        VM, namespace
    )
}

fn run_strategy(obj: &DynamicObject) -> Option<String> {
    obj.data["spec"]["runStrategy"].as_str().map(str::to_string)
}

async fn wait_for_run_strategy(client: Client, namespace: &str, expected: &str) -> Result<(), Error> {
    let kv_api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &kubevirt_vm_api_resource());
    wait_until(
        &format!("runStrategy {}", expected),
        Duration::from_secs(100),
        || async {
            match kv_api.get_opt(VM).await {
                Ok(Some(obj)) => {
                    let current = run_strategy(&obj);
                    if current.as_deref() != Some(expected) {
                        info!("KubeVirt VirtualMachine runStrategy is {:?}.", current);
                    }
                    Ok(current.as_deref() == Some(expected))
                }
                Ok(None) => {
                    info!("KubeVirt VirtualMachine not created yet.");
                    Ok(false)
                }
                Err(e) => {
                    info!("Get KubeVirt VirtualMachine failed with error {}.", e);
                    Ok(false)
                }
            }
        },
    )
    .await
}

pub async fn desired_state_test(client: Client, namespace: &str) -> Result<(), Error> {
    wait_for_run_strategy(client.clone(), namespace, "Always").await?;
    let kv_api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &kubevirt_vm_api_resource());
    let kv_vm = kv_api.get(VM).await?;
    let managed = kv_vm
        .metadata
        .labels
        .as_ref()
        .map_or(false, |labels| labels.get("llmcloud.io/managed").map(String::as_str) == Some("true"));
    if !managed {
        info!("KubeVirt VirtualMachine {} misses the managed label.", VM);
        return Err(Error::VirtualMachineFailed);
    }
    if kv_vm.data["spec"]["template"]["spec"]["domain"]["cpu"]["cores"] != 1 {
        info!("KubeVirt VirtualMachine domain is {}.", kv_vm.data["spec"]["template"]["spec"]["domain"]);
        return Err(Error::VirtualMachineFailed);
    }

    let vm_api: Api<VirtualMachine> = Api::namespaced(client, namespace);
    wait_until("VirtualMachine status test", Duration::from_secs(300), || async {
        match vm_api.get(VM).await {
            Ok(vm) => {
                let status = vm.status.unwrap_or_default();
                info!("VirtualMachine phase {:?}, ready {}.", status.phase, status.ready);
                Ok(status.phase.is_some())
            }
            Err(e) => {
                info!("Get VirtualMachine failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

pub async fn stop_start_test(client: Client, namespace: &str) -> Result<(), Error> {
    for strategy in ["Halted", "Always"] {
        run_command(
            "kubectl",
            vec![
                "patch",
                "virtualmachines.llmcloud.llmcloud.io",
                VM,
                "-n",
                namespace,
                "--type=merge",
                "-p",
                &format!("{{\"spec\": {{\"runStrategy\": \"{}\"}}}}", strategy),
            ],
            "failed to change runStrategy",
        );
        wait_for_run_strategy(client.clone(), namespace, strategy).await?;
    }
    Ok(())
}

pub async fn reboot_test(client: Client, namespace: &str) -> Result<(), Error> {
    run_command(
        "kubectl",
        vec![
            "annotate",
            "virtualmachines.llmcloud.llmcloud.io",
            VM,
            "-n",
            namespace,
            "llmcloud.io/reboot=true",
            "--overwrite",
        ],
        "failed to request reboot",
    );
    let vm_api: Api<VirtualMachine> = Api::namespaced(client.clone(), namespace);
    wait_until("reboot test", Duration::from_secs(100), || async {
        match vm_api.get(VM).await {
            Ok(vm) => {
                let pending = vm
                    .metadata
                    .annotations
                    .as_ref()
                    .map_or(false, |a| a.contains_key("llmcloud.io/reboot"));
                if pending {
                    info!("Reboot annotation is still present.");
                }
                Ok(!pending)
            }
            Err(e) => {
                info!("Get VirtualMachine failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await?;
    wait_for_run_strategy(client, namespace, "Always").await
}

pub async fn deletion_test(client: Client, namespace: &str) -> Result<(), Error> {
    delete_object("virtualmachines.llmcloud.llmcloud.io", VM, Some(namespace));
    let vm_api: Api<VirtualMachine> = Api::namespaced(client.clone(), namespace);
    let kv_api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &kubevirt_vm_api_resource());
    wait_until("deletion test", Duration::from_secs(200), || async {
        let vm_gone = matches!(vm_api.get_opt(VM).await, Ok(None));
        let kv_gone = matches!(kv_api.get_opt(VM).await, Ok(None));
        if !vm_gone || !kv_gone {
            info!("VirtualMachine gone: {}, KubeVirt VirtualMachine gone: {}.", vm_gone, kv_gone);
        }
        Ok(vm_gone && kv_gone)
    })
    .await
}

async fn setup(workspace: &str) -> Result<(Client, String), Error> {
    let client = Client::try_default().await?;
    check_crds(client.clone()).await?;
    let discovery = Discovery::new(client.clone()).run().await?;
    let namespace = setup_workspace(client.clone(), &discovery, workspace).await?;
    apply(virtual_machine(&namespace), client.clone(), &discovery).await?;
    Ok((client, namespace))
}

pub async fn virtualmachine_e2e_test() -> Result<(), Error> {
    let (client, namespace) = setup("e2e-vm").await?;

    desired_state_test(client.clone(), &namespace).await?;
    deletion_test(client.clone(), &namespace).await?;

    info!("E2e test passed.");
    Ok(())
}

pub async fn virtualmachine_lifecycle_e2e_test() -> Result<(), Error> {
    let (client, namespace) = setup("e2e-vm-lifecycle").await?;

    desired_state_test(client.clone(), &namespace).await?;
    stop_start_test(client.clone(), &namespace).await?;
    reboot_test(client.clone(), &namespace).await?;
    deletion_test(client.clone(), &namespace).await?;

    info!("E2e test passed.");
    Ok(())
}
