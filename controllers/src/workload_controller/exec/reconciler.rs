// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::finalizer::*;
use crate::common::status::*;
use crate::common::*;
use crate::crds::WorkloadStatus;
use crate::workload_controller::step::*;
use crate::workload_controller::workload::WorkloadKind;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::Resource;
use llmcloud_runtime::{extract_some_k_apply_resp, extract_some_k_delete_resp};
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::reconciler::reconciler::Reconciler;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{info, warn};

const MINIMUM_REPLICAS_AVAILABLE_REASON: &str = "MinimumReplicasAvailable";
const REPLICAS_NOT_READY_REASON: &str = "ReplicasNotReady";

pub struct WorkloadReconcileState {
    pub reconcile_step: WorkloadReconcileStep,
    // readyReplicas the Deployment reported when it was applied
    pub ready_replicas: i32,
    pub requeue_after: Option<Duration>,
    pub error: Option<String>,
}

pub struct WorkloadReconciler<W> {
    kind: PhantomData<fn() -> W>,
}

impl<W> Default for WorkloadReconciler<W> {
    fn default() -> WorkloadReconciler<W> {
        WorkloadReconciler { kind: PhantomData }
    }
}

impl<W: WorkloadKind> Reconciler for WorkloadReconciler<W> {
    type K = W;
    type S = WorkloadReconcileState;

    fn reconcile_init_state(&self) -> WorkloadReconcileState {
        reconcile_init_state()
    }

    fn reconcile_core(
        &self,
        cr: &W,
        resp_o: Option<KubeAPIResponse>,
        state: WorkloadReconcileState,
    ) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
        reconcile_core(cr, resp_o, state)
    }

    fn reconcile_done(&self, state: &WorkloadReconcileState) -> bool {
        state.reconcile_step == WorkloadReconcileStep::Done
    }

    fn reconcile_error(&self, state: &WorkloadReconcileState) -> bool {
        state.reconcile_step == WorkloadReconcileStep::Error
    }

    fn reconcile_requeue(&self, state: &WorkloadReconcileState) -> Option<Duration> {
        state.requeue_after
    }

    fn reconcile_error_message(&self, state: &WorkloadReconcileState) -> Option<String> {
        state.error.clone()
    }
}

pub fn reconcile_init_state() -> WorkloadReconcileState {
    WorkloadReconcileState {
        reconcile_step: WorkloadReconcileStep::Init,
        ready_replicas: 0,
        requeue_after: None,
        error: None,
    }
}

fn dependents<W: WorkloadKind>(cr: &W) -> Vec<Dependent> {
    let namespace = cr.meta().namespace_or_empty();
    let name = cr.meta().name_or_empty();
    vec![
        Dependent::new(Deployment::api_resource(), namespace, name),
        Dependent::new(Service::api_resource(), namespace, name),
    ]
}

fn apply_request<K: KubeResource>(obj: &K) -> Result<KubeAPIRequest, serde_json::Error> {
    let dynamic = obj.marshal()?;
    Ok(KubeAPIRequest::ApplyRequest(KubeApplyRequest {
        api_resource: K::api_resource(),
        name: dynamic.metadata.name_or_empty().to_string(),
        namespace: dynamic.metadata.namespace_or_empty().to_string(),
        obj: dynamic,
    }))
}

// Removes the Service an earlier spec with ports created.
fn delete_service_request<W: WorkloadKind>(cr: &W) -> KubeAPIRequest {
    KubeAPIRequest::DeleteRequest(KubeDeleteRequest {
        api_resource: Service::api_resource(),
        name: cr.meta().name_or_empty().to_string(),
        namespace: cr.meta().namespace_or_empty().to_string(),
    })
}

pub fn reconcile_core<W: WorkloadKind>(
    cr: &W,
    resp_o: Option<KubeAPIResponse>,
    state: WorkloadReconcileState,
) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    let step = state.reconcile_step;
    match step {
        WorkloadReconcileStep::Init => match lifecycle(cr.meta(), W::FINALIZER) {
            Lifecycle::Finalize => {
                info!("finalizing {}", cr.object_key());
                teardown_step(cr, state, teardown_start(&dependents(cr)))
            }
            Lifecycle::Released => done(state, None),
            Lifecycle::Claim => match add_finalizer_request(cr, W::FINALIZER) {
                Ok(req) => next(state, WorkloadReconcileStep::AfterAddFinalizer, req),
                Err(e) => fail(state, e.to_string()),
            },
            Lifecycle::Sync => match apply_request(&cr.make_deployment()) {
                Ok(req) => next(state, WorkloadReconcileStep::AfterApplyDeployment, req),
                Err(e) => report_error(cr, state, format!("build deployment failed: {}", e)),
            },
        },
        WorkloadReconcileStep::AfterAddFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) | WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("add finalizer: {}", e)),
        },
        WorkloadReconcileStep::AfterTeardown(teardown) => {
            let progress = teardown_continue(&dependents(cr), teardown, resp_o);
            teardown_step(cr, state, progress)
        }
        WorkloadReconcileStep::AfterRemoveFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("remove finalizer: {}", e)),
        },
        WorkloadReconcileStep::AfterApplyDeployment => match extract_some_k_apply_resp!(resp_o) {
            Some(Ok(obj)) => {
                let ready_replicas = match Deployment::unmarshal(obj) {
                    Ok(deployment) => deployment
                        .status
                        .and_then(|status| status.ready_replicas)
                        .unwrap_or(0),
                    Err(e) => return report_error(cr, state, format!("parse deployment failed: {}", e)),
                };
                let state_prime = WorkloadReconcileState {
                    ready_replicas,
                    ..state
                };
                match cr.make_service().map(|service| apply_request(&service)) {
                    Some(Ok(req)) => next(state_prime, WorkloadReconcileStep::AfterApplyService, req),
                    Some(Err(e)) => report_error(cr, state_prime, format!("build service failed: {}", e)),
                    None => next(state_prime, WorkloadReconcileStep::AfterDeleteService, delete_service_request(cr)),
                }
            }
            Some(Err(err)) => report_error(cr, state, format!("apply deployment failed: {}", err)),
            None => report_error(cr, state, "expected an apply response for the deployment".to_string()),
        },
        WorkloadReconcileStep::AfterApplyService => match extract_some_k_apply_resp!(resp_o) {
            Some(Ok(_)) => write_status(cr, state),
            Some(Err(err)) => report_error(cr, state, format!("apply service failed: {}", err)),
            None => report_error(cr, state, "expected an apply response for the service".to_string()),
        },
        WorkloadReconcileStep::AfterDeleteService => match extract_some_k_delete_resp!(resp_o) {
            Some(Ok(())) => {
                info!("deleted the service of {}, it exposes no ports", cr.object_key());
                write_status(cr, state)
            }
            Some(Err(APIError::ObjectNotFound)) => write_status(cr, state),
            Some(Err(err)) => report_error(cr, state, format!("delete service failed: {}", err)),
            None => report_error(cr, state, "expected a delete response for the service".to_string()),
        },
        WorkloadReconcileStep::AfterUpdateStatus => match update_status_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(STATUS_CONFLICT_REQUEUE)),
            WriteOutcome::Failed(e) => fail(state, e),
        },
        WorkloadReconcileStep::AfterReportError => {
            let state_prime = WorkloadReconcileState {
                reconcile_step: WorkloadReconcileStep::Error,
                ..state
            };
            (state_prime, None)
        }
        _ => {
            let state_prime = WorkloadReconcileState {
                reconcile_step: step,
                ..state
            };
            (state_prime, None)
        }
    }
}

/// Status of a workload whose Deployment reports ready_replicas ready pods.
pub fn make_workload_status<W: WorkloadKind>(cr: &W, ready_replicas: i32) -> WorkloadStatus {
    let mut status = cr.workload_status().cloned().unwrap_or_default();
    let desired = cr.desired_replicas();
    status.ready_replicas = ready_replicas;
    status.phase = Some(if ready_replicas > 0 { PHASE_RUNNING } else { PHASE_PENDING }.to_string());
    status.endpoint = cr.endpoint();
    let condition = if ready_replicas >= desired {
        ready_condition(
            true,
            MINIMUM_REPLICAS_AVAILABLE_REASON,
            "Deployment has minimum availability",
            cr.meta().generation,
        )
    } else {
        ready_condition(
            false,
            REPLICAS_NOT_READY_REASON,
            &format!("{}/{} replicas ready", ready_replicas, desired),
            cr.meta().generation,
        )
    };
    set_status_condition(&mut status.conditions, condition);
    status
}

fn write_status<W: WorkloadKind>(
    cr: &W,
    state: WorkloadReconcileState,
) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    let status = make_workload_status(cr, state.ready_replicas);
    write_status_helper(cr, state, status, WorkloadReconcileStep::AfterUpdateStatus)
}

fn write_status_helper<W: WorkloadKind>(
    cr: &W,
    state: WorkloadReconcileState,
    status: WorkloadStatus,
    step: WorkloadReconcileStep,
) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    if cr.workload_status() == Some(&status) {
        let state_prime = WorkloadReconcileState {
            reconcile_step: match step {
                WorkloadReconcileStep::AfterReportError => WorkloadReconcileStep::Error,
                _ => WorkloadReconcileStep::Done,
            },
            ..state
        };
        return (state_prime, None);
    }
    let mut cr_prime = cr.clone();
    cr_prime.set_workload_status(status);
    match update_status_request(&cr_prime) {
        Ok(req) => next(state, step, req),
        Err(e) => fail(state, e.to_string()),
    }
}

fn report_error<W: WorkloadKind>(
    cr: &W,
    state: WorkloadReconcileState,
    error: String,
) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    warn!("{} failed to sync: {}", cr.object_key(), error);
    let mut status = cr.workload_status().cloned().unwrap_or_default();
    status.phase = Some(PHASE_ERROR.to_string());
    set_status_condition(
        &mut status.conditions,
        reconciliation_error_condition(&error, cr.meta().generation),
    );
    let state_prime = WorkloadReconcileState {
        error: Some(error),
        ..state
    };
    write_status_helper(cr, state_prime, status, WorkloadReconcileStep::AfterReportError)
}

fn teardown_step<W: WorkloadKind>(
    cr: &W,
    state: WorkloadReconcileState,
    progress: TeardownProgress,
) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    match progress {
        TeardownProgress::Request(teardown, req) => next(state, WorkloadReconcileStep::AfterTeardown(teardown), req),
        TeardownProgress::Finished => match remove_finalizer_request(cr, W::FINALIZER) {
            Ok(req) => next(state, WorkloadReconcileStep::AfterRemoveFinalizer, req),
            Err(e) => fail(state, e.to_string()),
        },
        TeardownProgress::StillPresent(key) => {
            info!("{} is still terminating, keep the finalizer of {}", key, cr.object_key());
            done(state, Some(TEARDOWN_REQUEUE))
        }
        TeardownProgress::Failed(e) => fail(state, format!("finalize: {}", e)),
    }
}

fn next(
    state: WorkloadReconcileState,
    step: WorkloadReconcileStep,
    req: KubeAPIRequest,
) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    let state_prime = WorkloadReconcileState {
        reconcile_step: step,
        ..state
    };
    (state_prime, Some(req))
}

fn done(state: WorkloadReconcileState, requeue_after: Option<Duration>) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    let state_prime = WorkloadReconcileState {
        reconcile_step: WorkloadReconcileStep::Done,
        requeue_after,
        ..state
    };
    (state_prime, None)
}

fn fail(state: WorkloadReconcileState, error: String) -> (WorkloadReconcileState, Option<KubeAPIRequest>) {
    let state_prime = WorkloadReconcileState {
        reconcile_step: WorkloadReconcileStep::Error,
        error: Some(error),
        ..state
    };
    (state_prime, None)
}
