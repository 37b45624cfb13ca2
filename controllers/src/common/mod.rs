// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod finalizer;
pub mod resource;
pub mod status;

use std::collections::BTreeMap;
use std::time::Duration;

pub const MANAGED_LABEL: &str = "llmcloud.io/managed";
pub const WORKSPACE_LABEL: &str = "llmcloud.io/workspace";
pub const SERVICE_TYPE_LABEL: &str = "llmcloud.io/service-type";

pub const REBOOT_ANNOTATION: &str = "llmcloud.io/reboot";
pub const LAST_LOGIN_ANNOTATION: &str = "llmcloud.io/last-login";

pub const READY_CONDITION: &str = "Ready";
pub const RECONCILIATION_ERROR_REASON: &str = "ReconciliationError";

pub const PHASE_ACTIVE: &str = "Active";
pub const PHASE_ERROR: &str = "Error";
pub const PHASE_PENDING: &str = "Pending";
pub const PHASE_RUNNING: &str = "Running";

/// Requeue delay after another writer won the race on the status subresource.
pub const STATUS_CONFLICT_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue delay while a dependent deleted by a finalizer is still terminating.
pub const TEARDOWN_REQUEUE: Duration = Duration::from_secs(5);

pub fn managed_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    labels
}
