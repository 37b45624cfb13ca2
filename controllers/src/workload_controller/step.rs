// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::finalizer::TeardownStep;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadReconcileStep {
    Init,
    AfterAddFinalizer,
    AfterTeardown(TeardownStep),
    AfterRemoveFinalizer,
    AfterApplyDeployment,
    AfterApplyService,
    AfterDeleteService,
    AfterUpdateStatus,
    AfterReportError,
    Done,
    Error,
}
