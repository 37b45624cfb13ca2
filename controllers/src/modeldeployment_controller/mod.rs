// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::ModelDeployment;
use crate::workload_controller::exec::reconciler::WorkloadReconciler;

pub mod exec;

pub const MODEL_FINALIZER: &str = "llmcloud.llmcloud.io/model-finalizer";

pub type ModelDeploymentReconciler = WorkloadReconciler<ModelDeployment>;
