// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, resource::KubeResource};
use std::fmt::Debug;
use std::time::Duration;

// A reconciler is a state machine driven by the shim layer.
//
// reconcile_core never talks to the API server itself. Each invocation takes the
// custom resource, the response to the previously issued request (if any) and
// the current state, and returns the next state together with at most one request.
// The shim layer executes the request and feeds the response to the next invocation
// until reconcile_done or reconcile_error holds.
pub trait Reconciler {
    // K: the custom resource type
    type K: KubeResource + Debug + Send + Sync + 'static;
    // S: the local state carried across reconcile_core invocations
    type S;

    fn reconcile_init_state(&self) -> Self::S;

    fn reconcile_core(
        &self,
        cr: &Self::K,
        resp_o: Option<KubeAPIResponse>,
        state: Self::S,
    ) -> (Self::S, Option<KubeAPIRequest>);

    fn reconcile_done(&self, state: &Self::S) -> bool;

    fn reconcile_error(&self, state: &Self::S) -> bool;

    /// Requeue delay requested by a finished reconcile.
    /// None falls back to the controller's periodic resync.
    fn reconcile_requeue(&self, _state: &Self::S) -> Option<Duration> {
        None
    }

    /// Human readable cause of the error state, used when the shim layer reports the failure.
    fn reconcile_error_message(&self, _state: &Self::S) -> Option<String> {
        None
    }
}
