// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod account_controller;
pub mod catalogservice_controller;
pub mod common;
pub mod crds;
pub mod modeldeployment_controller;
pub mod virtualmachine_controller;
pub mod workload_controller;
pub mod workspace_controller;
#[cfg(test)]
mod unit_tests;
