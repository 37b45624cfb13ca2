// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub const ACCOUNT_FINALIZER: &str = "llmcloud.llmcloud.io/account-finalizer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountReconcileStep {
    Init,
    AfterAddFinalizer,
    AfterRemoveFinalizer,
    AfterUpdateStatus,
    Done,
    Error,
}
