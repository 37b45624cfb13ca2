// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, resource::KubeResource};
use crate::shim_layer::api_client::ApiServerClient;
use k8s_openapi::api::core::v1::ConfigMap;
use tracing::info;

pub const FAULT_INJECTION_CONFIG_MAP: &str = "fault-injection-config";
pub const FAULT_INJECTION_NAMESPACE: &str = "default";

// crash_or_continue counts the mutating requests issued by the controller in the
// fault-injection-config ConfigMap ("current") and crashes the controller process
// once the count reaches "expected". The crash-testing harness restarts the controller
// afterwards to check that reconciliation resumes from whatever the store holds.
pub async fn crash_or_continue<C>(client: &C, cr_key: &str, log_header: &str) -> Result<(), String>
where
    C: ApiServerClient + ?Sized,
{
    let get_resp = client
        .handle_request(KubeAPIRequest::GetRequest(KubeGetRequest {
            api_resource: ConfigMap::api_resource(),
            name: FAULT_INJECTION_CONFIG_MAP.to_string(),
            namespace: FAULT_INJECTION_NAMESPACE.to_string(),
        }))
        .await;
    let obj = get_resp
        .into_get_response()
        .ok_or_else(|| "Unexpected response to fault injection config get".to_string())?
        .res
        .map_err(|e| format!("Fail to get fault injection config: {}", e))?;
    let mut config_map = ConfigMap::unmarshal(obj)
        .map_err(|e| format!("Fail to parse fault injection config: {}", e))?;
    let data = config_map
        .data
        .as_mut()
        .ok_or_else(|| "Fail to unwrap data".to_string())?;
    let current = parse_counter(data.get("current"), "current")?;
    let expected = parse_counter(data.get("expected"), "expected")?;
    data.insert("current".to_string(), (current + 1).to_string());

    let obj = config_map
        .marshal()
        .map_err(|e| format!("Fail to marshal fault injection config: {}", e))?;
    let update_resp = client
        .handle_request(KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
            api_resource: ConfigMap::api_resource(),
            name: FAULT_INJECTION_CONFIG_MAP.to_string(),
            namespace: FAULT_INJECTION_NAMESPACE.to_string(),
            obj,
        }))
        .await;
    if let Some(err) = update_resp.error() {
        return Err(format!("Fail to update fault injection config: {}", err));
    }

    if current == expected {
        info!("{} crash injected after request {} on {}", log_header, current, cr_key);
        panic!("{} crash injected after request {}", log_header, current);
    }

    Ok(())
}

fn parse_counter(val: Option<&String>, field: &str) -> Result<i32, String> {
    val.ok_or_else(|| format!("Fail to get {}", field))?
        .parse::<i32>()
        .map_err(|_| format!("Fail to parse {} value to i32", field))
}
