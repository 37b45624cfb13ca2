// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::CatalogService;
use crate::workload_controller::exec::reconciler::WorkloadReconciler;

pub mod exec;

pub const SERVICE_FINALIZER: &str = "llmcloud.llmcloud.io/service-finalizer";

pub type CatalogServiceReconciler = WorkloadReconciler<CatalogService>;
