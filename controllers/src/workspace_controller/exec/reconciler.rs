// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::finalizer::*;
use crate::common::resource::*;
use crate::common::status::*;
use crate::common::*;
use crate::crds::{CatalogService, ModelDeployment, VirtualMachine, Workspace, WorkspaceStatus};
use crate::workspace_controller::exec::resource::*;
use crate::workspace_controller::step::*;
use kube::api::ApiResource;
use llmcloud_runtime::extract_some_k_apply_resp;
use llmcloud_runtime::extract_some_k_list_resp;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::reconciler::reconciler::Reconciler;
use std::time::Duration;
use tracing::info;

const WORKSPACE_READY_REASON: &str = "WorkspaceReady";

pub struct WorkspaceReconcileState {
    pub reconcile_step: WorkspaceReconcileStep,
    // the status being assembled for this round
    pub status: Option<WorkspaceStatus>,
    pub requeue_after: Option<Duration>,
    pub error: Option<String>,
}

#[derive(Default)]
pub struct WorkspaceReconciler {}

impl Reconciler for WorkspaceReconciler {
    type K = Workspace;
    type S = WorkspaceReconcileState;

    fn reconcile_init_state(&self) -> WorkspaceReconcileState {
        reconcile_init_state()
    }

    fn reconcile_core(
        &self,
        ws: &Workspace,
        resp_o: Option<KubeAPIResponse>,
        state: WorkspaceReconcileState,
    ) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
        reconcile_core(ws, resp_o, state)
    }

    fn reconcile_done(&self, state: &WorkspaceReconcileState) -> bool {
        state.reconcile_step == WorkspaceReconcileStep::Done
    }

    fn reconcile_error(&self, state: &WorkspaceReconcileState) -> bool {
        state.reconcile_step == WorkspaceReconcileStep::Error
    }

    fn reconcile_requeue(&self, state: &WorkspaceReconcileState) -> Option<Duration> {
        state.requeue_after
    }

    fn reconcile_error_message(&self, state: &WorkspaceReconcileState) -> Option<String> {
        state.error.clone()
    }
}

pub fn reconcile_init_state() -> WorkspaceReconcileState {
    WorkspaceReconcileState {
        reconcile_step: WorkspaceReconcileStep::Init,
        status: None,
        requeue_after: None,
        error: None,
    }
}

pub fn reconcile_core(
    ws: &Workspace,
    resp_o: Option<KubeAPIResponse>,
    state: WorkspaceReconcileState,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    let step = state.reconcile_step;
    match step {
        WorkspaceReconcileStep::Init => match lifecycle(&ws.metadata, WORKSPACE_FINALIZER) {
            // The namespace carries an owner reference to the workspace,
            // so the store deletes it (and everything in it) once the workspace goes away.
            Lifecycle::Finalize => match remove_finalizer_request(ws, WORKSPACE_FINALIZER) {
                Ok(req) => {
                    info!("finalizing workspace {}", ws.metadata.name_or_empty());
                    next(state, WorkspaceReconcileStep::AfterRemoveFinalizer, req)
                }
                Err(e) => fail(state, e.to_string()),
            },
            Lifecycle::Released => done(state, None),
            Lifecycle::Claim => match add_finalizer_request(ws, WORKSPACE_FINALIZER) {
                Ok(req) => next(state, WorkspaceReconcileStep::AfterAddFinalizer, req),
                Err(e) => fail(state, e.to_string()),
            },
            Lifecycle::Sync => {
                let state_prime = WorkspaceReconcileState {
                    status: Some(ws.status.clone().unwrap_or_default()),
                    ..state
                };
                sync_step(ws, state_prime, SubResource::Namespace, sync_start(&NamespaceBuilder {}, ws))
            }
        },
        WorkspaceReconcileStep::AfterAddFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) | WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("add finalizer: {}", e)),
        },
        WorkspaceReconcileStep::AfterRemoveFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("remove finalizer: {}", e)),
        },
        WorkspaceReconcileStep::AfterKRequestStep(action, resource) => {
            let progress = match resource {
                SubResource::Namespace => sync_continue(&NamespaceBuilder {}, ws, action, resp_o),
                SubResource::RoleBinding(idx) => match ws.spec.members.get(idx) {
                    Some(member) => sync_continue(
                        &RoleBindingBuilder { member: member.clone() },
                        ws,
                        action,
                        resp_o,
                    ),
                    None => SyncProgress::Failed(format!("no member at index {}", idx)),
                },
            };
            sync_step(ws, state, resource, progress)
        }
        WorkspaceReconcileStep::AfterApplyResourceQuota => match extract_some_k_apply_resp!(resp_o) {
            Some(Ok(_)) => list_step(ws, state, VirtualMachine::api_resource(), WorkspaceReconcileStep::AfterListVirtualMachines),
            Some(Err(err)) => report_error(ws, state, format!("apply resource quota failed: {}", err)),
            None => report_error(ws, state, "expected an apply response for the resource quota".to_string()),
        },
        WorkspaceReconcileStep::AfterListVirtualMachines => {
            let state_prime = record_count(state, resp_o, |status, n| status.vm_count = n);
            list_step(ws, state_prime, ModelDeployment::api_resource(), WorkspaceReconcileStep::AfterListModelDeployments)
        }
        WorkspaceReconcileStep::AfterListModelDeployments => {
            let state_prime = record_count(state, resp_o, |status, n| status.llm_model_count = n);
            list_step(ws, state_prime, CatalogService::api_resource(), WorkspaceReconcileStep::AfterListCatalogServices)
        }
        WorkspaceReconcileStep::AfterListCatalogServices => {
            let state_prime = record_count(state, resp_o, |status, n| status.service_count = n);
            let mut status = state_prime.status.clone().unwrap_or_default();
            status.namespace = Some(workspace_namespace(ws));
            status.phase = Some(PHASE_ACTIVE.to_string());
            set_status_condition(
                &mut status.conditions,
                ready_condition(true, WORKSPACE_READY_REASON, "Workspace is ready", ws.metadata.generation),
            );
            write_status(ws, state_prime, status, WorkspaceReconcileStep::AfterUpdateStatus)
        }
        WorkspaceReconcileStep::AfterUpdateStatus => match update_status_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(STATUS_CONFLICT_REQUEUE)),
            WriteOutcome::Failed(e) => fail(state, e),
        },
        // The error that led here was recorded before the status write; whatever the write
        // returned, the reconcile ends in error and is retried with backoff.
        WorkspaceReconcileStep::AfterReportError => {
            let state_prime = WorkspaceReconcileState {
                reconcile_step: WorkspaceReconcileStep::Error,
                ..state
            };
            (state_prime, None)
        }
        _ => {
            let state_prime = WorkspaceReconcileState {
                reconcile_step: step,
                ..state
            };
            (state_prime, None)
        }
    }
}

fn next(
    state: WorkspaceReconcileState,
    step: WorkspaceReconcileStep,
    req: KubeAPIRequest,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    let state_prime = WorkspaceReconcileState {
        reconcile_step: step,
        ..state
    };
    (state_prime, Some(req))
}

fn done(
    state: WorkspaceReconcileState,
    requeue_after: Option<Duration>,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    let state_prime = WorkspaceReconcileState {
        reconcile_step: WorkspaceReconcileStep::Done,
        requeue_after,
        ..state
    };
    (state_prime, None)
}

fn fail(state: WorkspaceReconcileState, error: String) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    let state_prime = WorkspaceReconcileState {
        reconcile_step: WorkspaceReconcileStep::Error,
        error: Some(error),
        ..state
    };
    (state_prime, None)
}

fn sync_step(
    ws: &Workspace,
    state: WorkspaceReconcileState,
    resource: SubResource,
    progress: SyncProgress,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    match progress {
        SyncProgress::Request(action, req) => {
            next(state, WorkspaceReconcileStep::AfterKRequestStep(action, resource), req)
        }
        SyncProgress::Synced(_) => {
            let next_member = match resource {
                SubResource::Namespace => 0,
                SubResource::RoleBinding(idx) => idx + 1,
            };
            match ws.spec.members.get(next_member) {
                Some(member) => sync_step(
                    ws,
                    state,
                    SubResource::RoleBinding(next_member),
                    sync_start(&RoleBindingBuilder { member: member.clone() }, ws),
                ),
                None => match resource_quota_apply_request(ws) {
                    Some(Ok(req)) => next(state, WorkspaceReconcileStep::AfterApplyResourceQuota, req),
                    Some(Err(e)) => report_error(ws, state, format!("build resource quota failed: {}", e)),
                    None => list_step(
                        ws,
                        state,
                        VirtualMachine::api_resource(),
                        WorkspaceReconcileStep::AfterListVirtualMachines,
                    ),
                },
            }
        }
        SyncProgress::Failed(e) => report_error(ws, state, e),
    }
}

fn list_step(
    ws: &Workspace,
    state: WorkspaceReconcileState,
    api_resource: ApiResource,
    step: WorkspaceReconcileStep,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    let req = KubeAPIRequest::ListRequest(KubeListRequest {
        api_resource,
        namespace: workspace_namespace(ws),
    });
    next(state, step, req)
}

// A failed list leaves the previously reported count in place.
fn record_count(
    state: WorkspaceReconcileState,
    resp_o: Option<KubeAPIResponse>,
    set: impl FnOnce(&mut WorkspaceStatus, i32),
) -> WorkspaceReconcileState {
    let mut status = state.status.clone().unwrap_or_default();
    if let Some(Ok(objs)) = extract_some_k_list_resp!(resp_o) {
        set(&mut status, i32::try_from(objs.len()).unwrap_or(i32::MAX));
    }
    WorkspaceReconcileState {
        status: Some(status),
        ..state
    }
}

fn write_status(
    ws: &Workspace,
    state: WorkspaceReconcileState,
    status: WorkspaceStatus,
    step: WorkspaceReconcileStep,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    if ws.status.as_ref() == Some(&status) {
        let state_prime = WorkspaceReconcileState {
            reconcile_step: match step {
                WorkspaceReconcileStep::AfterReportError => WorkspaceReconcileStep::Error,
                _ => WorkspaceReconcileStep::Done,
            },
            status: Some(status),
            ..state
        };
        return (state_prime, None);
    }
    let mut ws_prime = ws.clone();
    ws_prime.status = Some(status.clone());
    match update_status_request(&ws_prime) {
        Ok(req) => {
            let state_prime = WorkspaceReconcileState {
                reconcile_step: step,
                status: Some(status),
                ..state
            };
            (state_prime, Some(req))
        }
        Err(e) => fail(state, e.to_string()),
    }
}

fn report_error(
    ws: &Workspace,
    state: WorkspaceReconcileState,
    error: String,
) -> (WorkspaceReconcileState, Option<KubeAPIRequest>) {
    let mut status = state.status.clone().unwrap_or_else(|| ws.status.clone().unwrap_or_default());
    status.phase = Some(PHASE_ERROR.to_string());
    set_status_condition(
        &mut status.conditions,
        reconciliation_error_condition(&error, ws.metadata.generation),
    );
    let state_prime = WorkspaceReconcileState {
        error: Some(error),
        ..state
    };
    write_status(ws, state_prime, status, WorkspaceReconcileStep::AfterReportError)
}
