// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::finalizer::*;
use crate::common::status::*;
use crate::common::*;
use crate::crds::{VirtualMachine, VirtualMachineStatus};
use crate::virtualmachine_controller::exec::image_catalog::{ImageCatalog, StaticImageCatalog};
use crate::virtualmachine_controller::exec::kubevirt::*;
use crate::virtualmachine_controller::step::*;
use kube::api::DynamicObject;
use llmcloud_runtime::kubernetes_api_objects::prelude::*;
use llmcloud_runtime::reconciler::reconciler::Reconciler;
use llmcloud_runtime::{extract_some_k_apply_resp, extract_some_k_get_resp, extract_some_k_update_resp};
use std::time::Duration;
use tracing::{info, warn};

const VM_RUNNING_REASON: &str = "VMRunning";

pub struct VirtualMachineReconcileState {
    pub reconcile_step: VirtualMachineReconcileStep,
    // the custom resource as last written by this reconcile, if it wrote one
    pub vm: Option<VirtualMachine>,
    pub requeue_after: Option<Duration>,
    pub error: Option<String>,
}

pub struct VirtualMachineReconciler<C = StaticImageCatalog> {
    pub catalog: C,
}

impl<C: ImageCatalog> VirtualMachineReconciler<C> {
    pub fn new(catalog: C) -> VirtualMachineReconciler<C> {
        VirtualMachineReconciler { catalog }
    }
}

impl Default for VirtualMachineReconciler {
    fn default() -> VirtualMachineReconciler {
        VirtualMachineReconciler::new(StaticImageCatalog::default())
    }
}

impl<C: ImageCatalog> Reconciler for VirtualMachineReconciler<C> {
    type K = VirtualMachine;
    type S = VirtualMachineReconcileState;

    fn reconcile_init_state(&self) -> VirtualMachineReconcileState {
        reconcile_init_state()
    }

    fn reconcile_core(
        &self,
        vm: &VirtualMachine,
        resp_o: Option<KubeAPIResponse>,
        state: VirtualMachineReconcileState,
    ) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
        reconcile_core(&self.catalog, vm, resp_o, state)
    }

    fn reconcile_done(&self, state: &VirtualMachineReconcileState) -> bool {
        state.reconcile_step == VirtualMachineReconcileStep::Done
    }

    fn reconcile_error(&self, state: &VirtualMachineReconcileState) -> bool {
        state.reconcile_step == VirtualMachineReconcileStep::Error
    }

    fn reconcile_requeue(&self, state: &VirtualMachineReconcileState) -> Option<Duration> {
        state.requeue_after
    }

    fn reconcile_error_message(&self, state: &VirtualMachineReconcileState) -> Option<String> {
        state.error.clone()
    }
}

pub fn reconcile_init_state() -> VirtualMachineReconcileState {
    VirtualMachineReconcileState {
        reconcile_step: VirtualMachineReconcileStep::Init,
        vm: None,
        requeue_after: None,
        error: None,
    }
}

fn external_dependents(vm: &VirtualMachine) -> Vec<Dependent> {
    vec![Dependent::new(
        kubevirt_vm_api_resource(),
        vm.metadata.namespace_or_empty(),
        vm.metadata.name_or_empty(),
    )]
}

fn external_vm_get_request(vm: &VirtualMachine) -> KubeAPIRequest {
    KubeAPIRequest::GetRequest(KubeGetRequest {
        api_resource: kubevirt_vm_api_resource(),
        name: vm.metadata.name_or_empty().to_string(),
        namespace: vm.metadata.namespace_or_empty().to_string(),
    })
}

fn external_vm_update_request(obj: DynamicObject) -> KubeAPIRequest {
    KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
        api_resource: kubevirt_vm_api_resource(),
        name: obj.metadata.name_or_empty().to_string(),
        namespace: obj.metadata.namespace_or_empty().to_string(),
        obj,
    })
}

fn external_vm_apply_request(vm: &VirtualMachine, catalog: &dyn ImageCatalog) -> Result<KubeAPIRequest, String> {
    let obj = make_kubevirt_vm(vm, catalog)
        .to_dynamic_object()
        .map_err(|e| e.to_string())?;
    Ok(KubeAPIRequest::ApplyRequest(KubeApplyRequest {
        api_resource: kubevirt_vm_api_resource(),
        name: vm.metadata.name_or_empty().to_string(),
        namespace: vm.metadata.namespace_or_empty().to_string(),
        obj,
    }))
}

fn vmi_get_request(vm: &VirtualMachine) -> KubeAPIRequest {
    KubeAPIRequest::GetRequest(KubeGetRequest {
        api_resource: kubevirt_vmi_api_resource(),
        name: vm.metadata.name_or_empty().to_string(),
        namespace: vm.metadata.namespace_or_empty().to_string(),
    })
}

pub fn reconcile_core(
    catalog: &dyn ImageCatalog,
    vm: &VirtualMachine,
    resp_o: Option<KubeAPIResponse>,
    state: VirtualMachineReconcileState,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    let step = state.reconcile_step;
    match step {
        VirtualMachineReconcileStep::Init => match lifecycle(&vm.metadata, VM_FINALIZER) {
            Lifecycle::Finalize => {
                info!("finalizing virtual machine {}", vm.object_key());
                teardown_step(vm, state, teardown_start(&external_dependents(vm)))
            }
            Lifecycle::Released => done(state, None),
            Lifecycle::Claim => match add_finalizer_request(vm, VM_FINALIZER) {
                Ok(req) => next(state, VirtualMachineReconcileStep::AfterAddFinalizer, req),
                Err(e) => fail(state, e.to_string()),
            },
            Lifecycle::Sync => {
                if vm.metadata.annotation(REBOOT_ANNOTATION) == Some("true") {
                    info!("rebooting virtual machine {}", vm.object_key());
                    next(state, VirtualMachineReconcileStep::AfterGetExternalVmForReboot, external_vm_get_request(vm))
                } else {
                    apply_step(catalog, vm, state)
                }
            }
        },
        VirtualMachineReconcileStep::AfterAddFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) | WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("add finalizer: {}", e)),
        },
        VirtualMachineReconcileStep::AfterTeardown(teardown) => {
            let progress = teardown_continue(&external_dependents(vm), teardown, resp_o);
            teardown_step(vm, state, progress)
        }
        VirtualMachineReconcileStep::AfterRemoveFinalizer => match update_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => fail(state, format!("remove finalizer: {}", e)),
        },
        // Reboot is a stop followed by a start of the KubeVirt VM. Neither write is recorded on the
        // custom resource; if the reconcile dies halfway, the next apply restores the declared runStrategy.
        VirtualMachineReconcileStep::AfterGetExternalVmForReboot => match extract_some_k_get_resp!(resp_o) {
            Some(Ok(obj)) => match with_run_strategy(obj, HALTED_RUN_STRATEGY) {
                Ok(halted) => next(
                    state,
                    VirtualMachineReconcileStep::AfterHaltExternalVm,
                    external_vm_update_request(halted),
                ),
                Err(e) => report_error(vm, state, format!("reboot: {}", e)),
            },
            Some(Err(err)) => report_error(vm, state, format!("reboot: get external VM failed: {}", err)),
            None => report_error(vm, state, "reboot: expected a get response".to_string()),
        },
        VirtualMachineReconcileStep::AfterHaltExternalVm => match extract_some_k_update_resp!(resp_o) {
            Some(Ok(obj)) => match with_run_strategy(obj, DEFAULT_RUN_STRATEGY) {
                Ok(restarted) => next(
                    state,
                    VirtualMachineReconcileStep::AfterRestartExternalVm,
                    external_vm_update_request(restarted),
                ),
                Err(e) => report_error(vm, state, format!("reboot: {}", e)),
            },
            Some(Err(err)) => report_error(vm, state, format!("reboot: stop external VM failed: {}", err)),
            None => report_error(vm, state, "reboot: expected an update response".to_string()),
        },
        VirtualMachineReconcileStep::AfterRestartExternalVm => match extract_some_k_update_resp!(resp_o) {
            Some(Ok(_)) => {
                let mut vm_prime = vm.clone();
                vm_prime.metadata.remove_annotation(REBOOT_ANNOTATION);
                match vm_prime.marshal() {
                    Ok(obj) => {
                        let req = KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
                            api_resource: VirtualMachine::api_resource(),
                            name: vm.metadata.name_or_empty().to_string(),
                            namespace: vm.metadata.namespace_or_empty().to_string(),
                            obj,
                        });
                        next(state, VirtualMachineReconcileStep::AfterClearRebootAnnotation, req)
                    }
                    Err(e) => report_error(vm, state, e.to_string()),
                }
            }
            Some(Err(err)) => report_error(vm, state, format!("reboot: start external VM failed: {}", err)),
            None => report_error(vm, state, "reboot: expected an update response".to_string()),
        },
        VirtualMachineReconcileStep::AfterClearRebootAnnotation => match update_outcome(resp_o) {
            WriteOutcome::Written(obj) => match VirtualMachine::unmarshal(obj) {
                Ok(vm_prime) => {
                    let state_prime = VirtualMachineReconcileState {
                        vm: Some(vm_prime.clone()),
                        ..state
                    };
                    apply_step(catalog, &vm_prime, state_prime)
                }
                Err(e) => fail(state, e.to_string()),
            },
            WriteOutcome::Conflict => done(state, Some(Duration::ZERO)),
            WriteOutcome::Failed(e) => report_error(vm, state, format!("reboot: clear annotation: {}", e)),
        },
        VirtualMachineReconcileStep::AfterApplyExternalVm => match extract_some_k_apply_resp!(resp_o) {
            Some(Ok(_)) => {
                let current = current(vm, &state).clone();
                next(state, VirtualMachineReconcileStep::AfterGetVmi, vmi_get_request(&current))
            }
            Some(Err(err)) => {
                let current = current(vm, &state).clone();
                report_error(&current, state, format!("apply external VM failed: {}", err))
            }
            None => {
                let current = current(vm, &state).clone();
                report_error(&current, state, "expected an apply response".to_string())
            }
        },
        VirtualMachineReconcileStep::AfterGetVmi => {
            let current = current(vm, &state).clone();
            let mut status = current.status.clone().unwrap_or_default();
            match extract_some_k_get_resp!(resp_o) {
                Some(Ok(vmi)) => {
                    project_vmi(&mut status, &observe_vmi(&vmi), current.metadata.generation);
                    write_status(&current, state, status, VirtualMachineReconcileStep::AfterUpdateStatus)
                }
                Some(Err(APIError::ObjectNotFound)) => {
                    status.phase = Some(PHASE_PENDING.to_string());
                    status.ready = false;
                    write_status(&current, state, status, VirtualMachineReconcileStep::AfterUpdateStatus)
                }
                Some(Err(err)) => report_error(&current, state, format!("get VMI failed: {}", err)),
                None => report_error(&current, state, "expected a get response for the VMI".to_string()),
            }
        }
        VirtualMachineReconcileStep::AfterUpdateStatus => match update_status_outcome(resp_o) {
            WriteOutcome::Written(_) => done(state, None),
            WriteOutcome::Conflict => done(state, Some(STATUS_CONFLICT_REQUEUE)),
            WriteOutcome::Failed(e) => fail(state, e),
        },
        VirtualMachineReconcileStep::AfterReportError => {
            let state_prime = VirtualMachineReconcileState {
                reconcile_step: VirtualMachineReconcileStep::Error,
                ..state
            };
            (state_prime, None)
        }
        _ => {
            let state_prime = VirtualMachineReconcileState {
                reconcile_step: step,
                ..state
            };
            (state_prime, None)
        }
    }
}

fn current<'a>(vm: &'a VirtualMachine, state: &'a VirtualMachineReconcileState) -> &'a VirtualMachine {
    state.vm.as_ref().unwrap_or(vm)
}

/// Projects what the VMI reports into the status. Fields the VMI does not report keep their value.
/// The Ready condition turns True as soon as a VMI exists, whatever its phase.
pub fn project_vmi(status: &mut VirtualMachineStatus, observation: &VmiObservation, generation: Option<i64>) {
    if let Some(phase) = &observation.phase {
        status.phase = Some(phase.clone());
        status.ready = phase == PHASE_RUNNING;
    }
    if let Some(node) = &observation.node {
        status.node = Some(node.clone());
    }
    if let Some(ip_address) = &observation.ip_address {
        status.ip_address = Some(ip_address.clone());
    }
    set_status_condition(
        &mut status.conditions,
        ready_condition(true, VM_RUNNING_REASON, "Virtual machine is running", generation),
    );
}

fn apply_step(
    catalog: &dyn ImageCatalog,
    vm: &VirtualMachine,
    state: VirtualMachineReconcileState,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    match external_vm_apply_request(vm, catalog) {
        Ok(req) => next(state, VirtualMachineReconcileStep::AfterApplyExternalVm, req),
        Err(e) => report_error(vm, state, format!("build external VM failed: {}", e)),
    }
}

fn teardown_step(
    vm: &VirtualMachine,
    state: VirtualMachineReconcileState,
    progress: TeardownProgress,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    match progress {
        TeardownProgress::Request(teardown, req) => {
            next(state, VirtualMachineReconcileStep::AfterTeardown(teardown), req)
        }
        TeardownProgress::Finished => match remove_finalizer_request(vm, VM_FINALIZER) {
            Ok(req) => next(state, VirtualMachineReconcileStep::AfterRemoveFinalizer, req),
            Err(e) => fail(state, e.to_string()),
        },
        TeardownProgress::StillPresent(key) => {
            info!("{} is still terminating, keep the finalizer of {}", key, vm.object_key());
            done(state, Some(TEARDOWN_REQUEUE))
        }
        TeardownProgress::Failed(e) => fail(state, format!("finalize: {}", e)),
    }
}

fn next(
    state: VirtualMachineReconcileState,
    step: VirtualMachineReconcileStep,
    req: KubeAPIRequest,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    let state_prime = VirtualMachineReconcileState {
        reconcile_step: step,
        ..state
    };
    (state_prime, Some(req))
}

fn done(
    state: VirtualMachineReconcileState,
    requeue_after: Option<Duration>,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    let state_prime = VirtualMachineReconcileState {
        reconcile_step: VirtualMachineReconcileStep::Done,
        requeue_after,
        ..state
    };
    (state_prime, None)
}

fn fail(state: VirtualMachineReconcileState, error: String) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    let state_prime = VirtualMachineReconcileState {
        reconcile_step: VirtualMachineReconcileStep::Error,
        error: Some(error),
        ..state
    };
    (state_prime, None)
}

fn write_status(
    vm: &VirtualMachine,
    state: VirtualMachineReconcileState,
    status: VirtualMachineStatus,
    step: VirtualMachineReconcileStep,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    if vm.status.as_ref() == Some(&status) {
        let state_prime = VirtualMachineReconcileState {
            reconcile_step: match step {
                VirtualMachineReconcileStep::AfterReportError => VirtualMachineReconcileStep::Error,
                _ => VirtualMachineReconcileStep::Done,
            },
            ..state
        };
        return (state_prime, None);
    }
    let mut vm_prime = vm.clone();
    vm_prime.status = Some(status);
    match update_status_request(&vm_prime) {
        Ok(req) => next(state, step, req),
        Err(e) => fail(state, e.to_string()),
    }
}

fn report_error(
    vm: &VirtualMachine,
    state: VirtualMachineReconcileState,
    error: String,
) -> (VirtualMachineReconcileState, Option<KubeAPIRequest>) {
    warn!("virtual machine {} failed to sync: {}", vm.object_key(), error);
    let mut status = vm.status.clone().unwrap_or_default();
    status.phase = Some(PHASE_ERROR.to_string());
    status.ready = false;
    set_status_condition(
        &mut status.conditions,
        reconciliation_error_condition(&error, vm.metadata.generation),
    );
    let state_prime = VirtualMachineReconcileState {
        error: Some(error),
        ..state
    };
    write_status(vm, state_prime, status, VirtualMachineReconcileStep::AfterReportError)
}
