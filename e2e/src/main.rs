// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod account_e2e;
pub mod common;
pub mod virtualmachine_e2e;
pub mod workload_e2e;
pub mod workspace_e2e;

use account_e2e::account_e2e_test;
use common::Error;
use std::env;
use virtualmachine_e2e::{virtualmachine_e2e_test, virtualmachine_lifecycle_e2e_test};
use workload_e2e::{model_e2e_test, service_e2e_test};
use workspace_e2e::workspace_e2e_test;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = env::args().collect();
    let cmd = args.get(1).cloned().unwrap_or_default();
    match cmd.as_str() {
        "workspace" => {
            println!("Running workspace end-to-end test");
            workspace_e2e_test().await
        }
        "virtualmachine" => {
            println!("Running virtualmachine end-to-end test");
            virtualmachine_e2e_test().await
        }
        "virtualmachine-lifecycle" => {
            println!("Running virtualmachine end-to-end test for stop, start and reboot");
            virtualmachine_lifecycle_e2e_test().await
        }
        "model" => {
            println!("Running modeldeployment end-to-end test");
            model_e2e_test().await
        }
        "service" => {
            println!("Running catalogservice end-to-end test");
            service_e2e_test().await
        }
        "account" => {
            println!("Running account end-to-end test");
            account_e2e_test().await
        }
        _ => {
            println!("Please specify one controller");
            Ok(())
        }
    }
}
