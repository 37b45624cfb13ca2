// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use controllers::account_controller::exec::reconciler::AccountReconciler;
use controllers::catalogservice_controller::CatalogServiceReconciler;
use controllers::crds::*;
use controllers::modeldeployment_controller::ModelDeploymentReconciler;
use controllers::virtualmachine_controller::exec::reconciler::VirtualMachineReconciler;
use controllers::workspace_controller::exec::reconciler::WorkspaceReconciler;
use futures::future::{join_all, BoxFuture};
use kube::{Client, CustomResourceExt};
use llmcloud_runtime::shim_layer::controller_runtime::{run_controller, ControllerSettings, ExponentialBackoff};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "llmcloud-controller", about = "Reconciles llmcloud workspaces, virtual machines, models, services and accounts")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the custom resource definitions as YAML
    Export,
    /// Run the controllers
    Run(RunArgs),
    /// Run the controllers, crashing after the write selected by the fault-injection ConfigMap
    Crash(RunArgs),
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Controllers to run, all of them when omitted
    #[arg(long, value_enum, value_delimiter = ',')]
    controllers: Vec<ControllerKind>,
    /// Concurrent reconciles per controller
    #[arg(long, env = "LLMCLOUD_WORKERS", default_value_t = 4)]
    workers: u16,
    /// Requeue delay after a successful reconcile
    #[arg(long, default_value_t = 60)]
    resync_secs: u64,
    #[arg(long, default_value_t = 500)]
    backoff_base_ms: u64,
    #[arg(long, default_value_t = 300)]
    backoff_max_secs: u64,
    /// Field manager used for server-side apply
    #[arg(long, default_value = "llmcloud-controller")]
    field_manager: String,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum ControllerKind {
    Workspace,
    Virtualmachine,
    Model,
    Service,
    Account,
}

impl RunArgs {
    fn settings(&self, fault_injection: bool) -> ControllerSettings {
        ControllerSettings {
            workers: self.workers,
            resync: Duration::from_secs(self.resync_secs),
            backoff: ExponentialBackoff {
                base: Duration::from_millis(self.backoff_base_ms),
                max: Duration::from_secs(self.backoff_max_secs),
            },
            field_manager: self.field_manager.clone(),
            fault_injection,
        }
    }

    fn selected(&self) -> Vec<ControllerKind> {
        if self.controllers.is_empty() {
            ControllerKind::value_variants().to_vec()
        } else {
            self.controllers.clone()
        }
    }
}

fn export() -> Result<()> {
    let crds = [
        Workspace::crd(),
        VirtualMachine::crd(),
        ModelDeployment::crd(),
        CatalogService::crd(),
        Account::crd(),
    ];
    for crd in crds {
        println!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}

async fn run(args: RunArgs, fault_injection: bool) -> Result<()> {
    let client = Client::try_default().await?;
    let settings = args.settings(fault_injection);
    let controllers: Vec<BoxFuture<'static, Result<(), llmcloud_runtime::Error>>> = args
        .selected()
        .into_iter()
        .map(|kind| -> BoxFuture<'static, Result<(), llmcloud_runtime::Error>> {
            let client = client.clone();
            let settings = settings.clone();
            match kind {
                ControllerKind::Workspace => Box::pin(run_controller(client, WorkspaceReconciler::default(), settings)),
                ControllerKind::Virtualmachine => {
                    Box::pin(run_controller(client, VirtualMachineReconciler::default(), settings))
                }
                ControllerKind::Model => Box::pin(run_controller(client, ModelDeploymentReconciler::default(), settings)),
                ControllerKind::Service => {
                    Box::pin(run_controller(client, CatalogServiceReconciler::default(), settings))
                }
                ControllerKind::Account => Box::pin(run_controller(client, AccountReconciler::default(), settings)),
            }
        })
        .collect();
    for res in join_all(controllers).await {
        res?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Export => export(),
        Command::Run(args) => {
            info!("running llmcloud-controller with {:?}", args.selected());
            run(args, false).await
        }
        Command::Crash(args) => {
            info!("running llmcloud-controller in crash-testing mode with {:?}", args.selected());
            run(args, true).await
        }
    }
}
