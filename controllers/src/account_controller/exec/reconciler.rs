// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::account_controller::step::*;
use crate::common::finalizer::*;
use crate::common::status::*;
use crate::common::LAST_LOGIN_ANNOTATION;
use crate::crds::{Account, AccountStatus};
use chrono::{DateTime, SubsecRound, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::reconciler::reconciler::Reconciler;
use std::time::Duration;
use tracing::{info, warn};

const ACCOUNT_ACTIVE_REASON: &str = "AccountActive";
const ACCOUNT_DISABLED_REASON: &str = "AccountDisabled";

pub struct AccountReconcileState {
    pub reconcile_step: AccountReconcileStep,
    pub requeue_after: Option<Duration>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct AccountReconciler {}

impl Reconciler for AccountReconciler {
    type K = Account;
    type S = AccountReconcileState;

    fn reconcile_init_state(&self) -> AccountReconcileState {
        AccountReconcileState {
            reconcile_step: AccountReconcileStep::Init,
            requeue_after: None,
            error: None,
        }
    }

    fn reconcile_core(
        &self,
        account: &Account,
        resp_o: Option<KubeAPIResponse>,
        state: AccountReconcileState,
    ) -> (AccountReconcileState, Option<KubeAPIRequest>) {
        reconcile_core(account, resp_o, state)
    }

    fn reconcile_done(&self, state: &AccountReconcileState) -> bool {
        state.reconcile_step == AccountReconcileStep::Done
    }

    fn reconcile_error(&self, state: &AccountReconcileState) -> bool {
        state.reconcile_step == AccountReconcileStep::Error
    }

    fn reconcile_requeue(&self, state: &AccountReconcileState) -> Option<Duration> {
        state.requeue_after
    }

    fn reconcile_error_message(&self, state: &AccountReconcileState) -> Option<String> {
        state.error.clone()
    }
}

pub fn reconcile_core(
    account: &Account,
    resp_o: Option<KubeAPIResponse>,
    state: AccountReconcileState,
) -> (AccountReconcileState, Option<KubeAPIRequest>) {
    let step = state.reconcile_step;
    match step {
        AccountReconcileStep::Init => {
            let req = match lifecycle(&account.metadata, ACCOUNT_FINALIZER) {
                // Accounts own nothing outside the store, so finalizing is just letting go.
                Lifecycle::Finalize => {
                    info!("finalizing account {}", account.metadata.name_or_empty());
                    remove_finalizer_request(account, ACCOUNT_FINALIZER)
                        .map(|req| (AccountReconcileStep::AfterRemoveFinalizer, Some(req)))
                }
                Lifecycle::Released => Ok((AccountReconcileStep::Done, None)),
                Lifecycle::Claim => add_finalizer_request(account, ACCOUNT_FINALIZER)
                    .map(|req| (AccountReconcileStep::AfterAddFinalizer, Some(req))),
                Lifecycle::Sync => {
                    let status = make_account_status(account);
                    if account.status.as_ref() == Some(&status) {
                        Ok((AccountReconcileStep::Done, None))
                    } else {
                        let mut account_prime = account.clone();
                        account_prime.status = Some(status);
                        update_status_request(&account_prime)
                            .map(|req| (AccountReconcileStep::AfterUpdateStatus, Some(req)))
                    }
                }
            };
            match req {
                Ok((step, req_o)) => {
                    let state_prime = AccountReconcileState {
                        reconcile_step: step,
                        ..state
                    };
                    (state_prime, req_o)
                }
                Err(e) => fail(state, e.to_string()),
            }
        }
        AccountReconcileStep::AfterAddFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) | WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("add finalizer: {}", e)),
        },
        AccountReconcileStep::AfterRemoveFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("remove finalizer: {}", e)),
        },
        AccountReconcileStep::AfterUpdateStatus => match update_status_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(crate::common::STATUS_CONFLICT_REQUEUE)),
            WriteOutcome::Failed(e) => fail(state, e),
        },
        _ => {
            let state_prime = AccountReconcileState {
                reconcile_step: step,
                ..state
            };
            (state_prime, None)
        }
    }
}

/// The login time recorded in the last-login annotation, at the second granularity the store keeps.
pub fn annotated_last_login(account: &Account) -> Option<DateTime<Utc>> {
    let value = account.metadata.annotation(LAST_LOGIN_ANNOTATION)?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(t) => Some(t.with_timezone(&Utc).trunc_subsecs(0)),
        Err(e) => {
            warn!(
                "account {} has an unparsable {} annotation {:?}: {}",
                account.metadata.name_or_empty(),
                LAST_LOGIN_ANNOTATION,
                value,
                e
            );
            None
        }
    }
}

pub fn make_account_status(account: &Account) -> AccountStatus {
    let mut status = account.status.clone().unwrap_or_default();
    if let Some(login) = annotated_last_login(account) {
        let newer = status.last_login_time.as_ref().map_or(true, |recorded| login > recorded.0);
        if newer {
            status.last_login_time = Some(Time(login));
        }
    }
    let condition = if account.spec.disabled {
        ready_condition(false, ACCOUNT_DISABLED_REASON, "Account is disabled", account.metadata.generation)
    } else {
        ready_condition(true, ACCOUNT_ACTIVE_REASON, "Account is active", account.metadata.generation)
    };
    set_status_condition(&mut status.conditions, condition);
    status
}

fn done(state: AccountReconcileState, requeue_after: Option<Duration>) -> (AccountReconcileState, Option<KubeAPIRequest>) {
    let state_prime = AccountReconcileState {
        reconcile_step: AccountReconcileStep::Done,
        requeue_after,
        ..state
    };
    (state_prime, None)
}

fn fail(state: AccountReconcileState, error: String) -> (AccountReconcileState, Option<KubeAPIRequest>) {
    let state_prime = AccountReconcileState {
        reconcile_step: AccountReconcileStep::Error,
        error: Some(error),
        ..state
    };
    (state_prime, None)
}
