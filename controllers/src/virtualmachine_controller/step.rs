// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::finalizer::TeardownStep;

pub const VM_FINALIZER: &str = "llmcloud.llmcloud.io/vm-finalizer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VirtualMachineReconcileStep {
    Init,
    AfterAddFinalizer,
    AfterTeardown(TeardownStep),
    AfterRemoveFinalizer,
    AfterGetExternalVmForReboot,
    AfterHaltExternalVm,
    AfterRestartExternalVm,
    AfterClearRebootAnnotation,
    AfterApplyExternalVm,
    AfterGetVmi,
    AfterUpdateStatus,
    AfterReportError,
    Done,
    Error,
}
