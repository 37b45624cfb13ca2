// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, error::APIError, resource::KubeResource};
use crate::reconciler::reconciler::Reconciler;
use crate::shim_layer::api_client::{ApiServerClient, KubeClient};
use crate::shim_layer::fault_injection::crash_or_continue;
use crate::Error;
use futures::StreamExt;
use kube::{
    api::Api,
    runtime::{
        controller::{self, Action, Controller},
        watcher,
    },
    Client, Resource,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

// The shim layer connects reconcile_core to the kube-rs controller runtime.
// kube-rs needs a reconcile function of the form FnMut(Arc<K>, Arc<Ctx>) -> ReconcilerFut;
// reconcile_with builds it on top of the state machine provided by each Reconciler.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl ExponentialBackoff {
    /// The delay before the retry that follows the given number of consecutive failures:
    /// base after the first failure, doubling each time, never above max.
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1u32 << exponent).min(self.max)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        ExponentialBackoff {
            base: Duration::from_millis(500),
            max: Duration::from_secs(300),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub workers: u16,
    pub resync: Duration,
    pub backoff: ExponentialBackoff,
    pub field_manager: String,
    pub fault_injection: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            workers: 4,
            resync: Duration::from_secs(60),
            backoff: ExponentialBackoff::default(),
            field_manager: "llmcloud-controller".to_string(),
            fault_injection: false,
        }
    }
}

/// Consecutive reconcile failures per object, reset by the next success.
#[derive(Default)]
pub struct FailureTracker {
    failures: Mutex<HashMap<String, u32>>,
}

impl FailureTracker {
    pub fn record_failure(&self, key: &str) -> u32 {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        let count = failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn reset(&self, key: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.remove(key);
    }

    pub fn failures(&self, key: &str) -> u32 {
        let failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures.get(key).copied().unwrap_or(0)
    }
}

// Data is passed to reconcile_with.
// It carries the client that communicates with Kubernetes API and the reconciler itself.
pub struct Data<R> {
    pub client: KubeClient,
    pub reconciler: R,
    pub settings: ControllerSettings,
    pub failures: FailureTracker,
}

// run_controller prepares and runs the controller for one custom resource kind.
// The controller's reconcile is triggered whenever an object of R::K is created or updated,
// and again after each requeue. kube-rs never runs two reconciles for the same object at once.
pub async fn run_controller<R>(client: Client, reconciler: R, settings: ControllerSettings) -> Result<(), Error>
where
    R: Reconciler + Send + Sync + 'static,
    R::S: Send,
{
    let kind = R::K::api_resource().kind;
    let crs = Api::<R::K>::all(client.clone());
    let config = controller::Config::default().concurrency(settings.workers);
    let data = Arc::new(Data {
        client: KubeClient::new(client, settings.field_manager.clone()),
        reconciler,
        settings,
        failures: FailureTracker::default(),
    });

    info!("starting {} controller", kind);
    Controller::new(crs, watcher::Config::default())
        .with_config(config)
        .shutdown_on_signal()
        .run(reconcile::<R>, error_policy::<R>, data)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("reconciled {}", obj),
                Err(e) => warn!("reconcile failed: {}", e),
            }
        })
        .await;
    info!("{} controller terminated", kind);
    Ok(())
}

async fn reconcile<R>(cr: Arc<R::K>, ctx: Arc<Data<R>>) -> Result<Action, Error>
where
    R: Reconciler,
{
    let name = cr
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| Error::ShimLayerError("Custom resource misses \".metadata.name\"".to_string()))?;
    let namespace = cr.meta().namespace.as_deref().unwrap_or("");
    let action = reconcile_with(&ctx.reconciler, name, namespace, &ctx.client, &ctx.settings).await?;
    ctx.failures.reset(&cr.object_key());
    Ok(action)
}

// reconcile_with implements the reconcile function by repeatedly invoking reconcile_core.
// It first reads the custom resource by a quorum read, so a stale cached copy is never reconciled.
// Then it starts with reconcile_init_state and, in each iteration, invokes reconcile_core
// with the state returned by the previous invocation, executes the request it returns
// and feeds the response to the next invocation.
// It ends the loop when the reconciler reports it is done (reconcile_done)
// or encounters an error (reconcile_error).
pub async fn reconcile_with<R, C>(
    reconciler: &R,
    name: &str,
    namespace: &str,
    client: &C,
    settings: &ControllerSettings,
) -> Result<Action, Error>
where
    R: Reconciler,
    C: ApiServerClient + ?Sized,
{
    let api_resource = R::K::api_resource();
    let cr_key = object_key(&api_resource.kind, namespace, name);
    let log_header = format!("Reconciling {}:", cr_key);

    let get_cr_resp = client
        .handle_request(KubeAPIRequest::GetRequest(KubeGetRequest {
            api_resource,
            name: name.to_string(),
            namespace: namespace.to_string(),
        }))
        .await;
    let cr = match get_cr_resp.into_get_response().map(|resp| resp.res) {
        Some(Ok(obj)) => R::K::unmarshal(obj)?,
        Some(Err(APIError::ObjectNotFound)) => {
            info!("{} custom resource not found, end reconcile", log_header);
            return Ok(Action::await_change());
        }
        Some(Err(err)) => {
            warn!("{} get custom resource failed with error: {}", log_header, err);
            return Err(Error::ShimLayerError(format!("{} get custom resource failed: {}", cr_key, err)));
        }
        None => {
            return Err(Error::ShimLayerError(format!("{} unexpected response to get", cr_key)));
        }
    };

    let mut state = reconciler.reconcile_init_state();
    let mut resp_o: Option<KubeAPIResponse> = None;
    loop {
        if reconciler.reconcile_done(&state) {
            debug!("{} done", log_header);
            break;
        }
        if reconciler.reconcile_error(&state) {
            let msg = reconciler
                .reconcile_error_message(&state)
                .unwrap_or_else(|| "reconcile_core reached the error state".to_string());
            warn!("{} error: {}", log_header, msg);
            return Err(Error::ReconcileCoreError(format!("{}: {}", cr_key, msg)));
        }
        let (state_prime, request_o) = reconciler.reconcile_core(&cr, resp_o, state);
        state = state_prime;
        resp_o = match request_o {
            Some(req) => {
                let verb = req.verb();
                let key = req.key();
                let mutating = req.is_mutating();
                let resp = client.handle_request(req).await;
                match resp.error() {
                    Some(err) => debug!("{} {} {} failed with error: {}", log_header, verb, key, err),
                    None => debug!("{} {} {} done", log_header, verb, key),
                }
                if mutating && settings.fault_injection {
                    // Check whether to crash right after a write reached the store
                    if let Err(e) = crash_or_continue(client, &cr_key, &log_header).await {
                        warn!("{} crash_or_continue fails due to {}", log_header, e);
                    }
                }
                Some(resp)
            }
            None => None,
        };
    }

    match reconciler.reconcile_requeue(&state) {
        Some(delay) => Ok(Action::requeue(delay)),
        None => Ok(Action::requeue(settings.resync)),
    }
}

// error_policy defines the controller's behavior when the reconcile ends with an error:
// requeue with exponential backoff on the number of consecutive failures of this object.
pub fn error_policy<R>(cr: Arc<R::K>, error: &Error, ctx: Arc<Data<R>>) -> Action
where
    R: Reconciler,
{
    let key = cr.object_key();
    let failures = ctx.failures.record_failure(&key);
    let delay = ctx.settings.backoff.delay(failures);
    warn!("{} reconcile failed {} time(s) in a row: {}; retry in {:?}", key, failures, error, delay);
    Action::requeue(delay)
}
