// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::common::resource::ActionKind;

pub const WORKSPACE_FINALIZER: &str = "llmcloud.llmcloud.io/workspace-finalizer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkspaceReconcileStep {
    Init,
    AfterAddFinalizer,
    AfterRemoveFinalizer,
    AfterKRequestStep(ActionKind, SubResource),
    AfterApplyResourceQuota,
    AfterListVirtualMachines,
    AfterListModelDeployments,
    AfterListCatalogServices,
    AfterUpdateStatus,
    AfterReportError,
    Done,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubResource {
    Namespace,
    // index into spec.members
    RoleBinding(usize),
}
