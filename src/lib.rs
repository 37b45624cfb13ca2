// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod executable_model;
pub mod kubernetes_api_objects;
pub mod reconciler;
pub mod shim_layer;
#[cfg(test)]
mod unit_tests;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("ShimLayerError: {0}")]
    ShimLayerError(String),
    #[error("ReconcileCoreError: {0}")]
    ReconcileCoreError(String),
    #[error("UnmarshalError: {0}")]
    UnmarshalError(#[from] serde_json::Error),
    #[error("APIError: {0}")]
    APIError(#[from] kubernetes_api_objects::error::APIError),
    #[error("KubeError: {0}")]
    KubeError(#[from] kube::Error),
}
