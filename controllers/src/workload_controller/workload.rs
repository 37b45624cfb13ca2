// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::WorkloadStatus;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use llmcloud_runtime::kubernetes_api_objects::resource::KubeResource;
use std::fmt::Debug;

pub const DEFAULT_REPLICAS: i32 = 1;

/// A custom resource served by one Deployment, and optionally one Service of the same name.
///
/// ModelDeployment and CatalogService only differ in how they build these two objects,
/// so they share one reconciler generic over this trait.
pub trait WorkloadKind: KubeResource + Debug + Send + Sync + 'static {
    const FINALIZER: &'static str;

    fn workload_status(&self) -> Option<&WorkloadStatus>;

    fn set_workload_status(&mut self, status: WorkloadStatus);

    /// Declared replica count, DEFAULT_REPLICAS when unset.
    fn desired_replicas(&self) -> i32;

    fn make_deployment(&self) -> Deployment;

    /// The Service in front of the Deployment, None when there is nothing to expose.
    fn make_service(&self) -> Option<Service>;

    /// Where clients reach the workload, None when it exposes nothing.
    fn endpoint(&self) -> Option<String>;
}
