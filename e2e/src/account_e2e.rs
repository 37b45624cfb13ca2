// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::*;
use controllers::crds::Account;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::{api::Api, discovery::Discovery, Client};
use std::time::Duration;
use tracing::*;

const ACCOUNT: &str = "e2e-alice";

pub fn account() -> String {
    format!(
        "
    apiVersion: llmcloud.llmcloud.io/v1alpha1
    kind: Account
    metadata:
      name: {}
    spec:
      username: alice
      passwordHash: $2a$10$e2e
      email: alice@example.com
    ",
        ACCOUNT
    )
}

fn ready_reason(conditions: &[Condition]) -> Option<String> {
    conditions.iter().find(|c| c.type_ == "Ready").map(|c| c.reason.clone())
}

async fn wait_for_reason(api: &Api<Account>, reason: &str) -> Result<(), Error> {
    wait_until(&format!("account {}", reason), Duration::from_secs(100), || async {
        match api.get(ACCOUNT).await {
            Ok(acct) => {
                let current = acct.status.and_then(|s| ready_reason(&s.conditions));
                info!("Account Ready reason is {:?}.", current);
                if current.as_deref() == Some("ReconciliationError") {
                    return Err(Error::AccountFailed);
                }
                Ok(current.as_deref() == Some(reason))
            }
            Err(e) => {
                info!("Get Account failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await
}

pub async fn account_e2e_test() -> Result<(), Error> {
    let client = Client::try_default().await?;
    check_crds(client.clone()).await?;
    let discovery = Discovery::new(client.clone()).run().await?;
    apply(account(), client.clone(), &discovery).await?;
    let api: Api<Account> = Api::all(client.clone());

    wait_for_reason(&api, "AccountActive").await?;

    run_command(
        "kubectl",
        vec![
            "annotate",
            "account",
            ACCOUNT,
            "llmcloud.io/last-login=2024-05-01T10:00:00Z",
            "--overwrite",
        ],
        "failed to record login",
    );
    wait_until("last login test", Duration::from_secs(100), || async {
        match api.get(ACCOUNT).await {
            Ok(acct) => Ok(acct.status.and_then(|s| s.last_login_time).is_some()),
            Err(e) => {
                info!("Get Account failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await?;

    run_command(
        "kubectl",
        vec!["patch", "account", ACCOUNT, "--type=merge", "-p", "{\"spec\": {\"disabled\": true}}"],
        "failed to disable account",
    );
    wait_for_reason(&api, "AccountDisabled").await?;

    delete_object("account", ACCOUNT, None);
    wait_until("account deletion test", Duration::from_secs(100), || async {
        match api.get_opt(ACCOUNT).await {
            Ok(None) => Ok(true),
            Ok(Some(_)) => {
                info!("Account still present.");
                Ok(false)
            }
            Err(e) => {
                info!("Get Account failed with error {}.", e);
                Ok(false)
            }
        }
    })
    .await?;

    info!("E2e test passed.");
    Ok(())
}
