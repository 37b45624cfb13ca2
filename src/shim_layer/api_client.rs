// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{api_method::*, error::APIError};
use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::Client;

/// ApiServerClient executes the requests issued by reconcile_core.
///
/// The production implementation is KubeClient; tests run the same reconcilers
/// against the executable API server model.
#[async_trait]
pub trait ApiServerClient: Send + Sync {
    async fn handle_request(&self, req: KubeAPIRequest) -> KubeAPIResponse;
}

#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    field_manager: String,
}

impl KubeClient {
    pub fn new(client: Client, field_manager: impl Into<String>) -> KubeClient {
        KubeClient {
            client,
            field_manager: field_manager.into(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn dynamic_api(&self, api_resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        if namespace.is_empty() {
            Api::all_with(self.client.clone(), api_resource)
        } else {
            Api::namespaced_with(self.client.clone(), namespace, api_resource)
        }
    }
}

#[async_trait]
impl ApiServerClient for KubeClient {
    async fn handle_request(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        match req {
            KubeAPIRequest::GetRequest(get_req) => {
                let api = self.dynamic_api(&get_req.api_resource, &get_req.namespace);
                KubeAPIResponse::GetResponse(KubeGetResponse {
                    res: api.get(&get_req.name).await.map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::ListRequest(list_req) => {
                let api = self.dynamic_api(&list_req.api_resource, &list_req.namespace);
                KubeAPIResponse::ListResponse(KubeListResponse {
                    res: api
                        .list(&ListParams::default())
                        .await
                        .map(|list| list.items)
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::CreateRequest(create_req) => {
                let api = self.dynamic_api(&create_req.api_resource, &create_req.namespace);
                KubeAPIResponse::CreateResponse(KubeCreateResponse {
                    res: api
                        .create(&PostParams::default(), &create_req.obj)
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::DeleteRequest(delete_req) => {
                let api = self.dynamic_api(&delete_req.api_resource, &delete_req.namespace);
                KubeAPIResponse::DeleteResponse(KubeDeleteResponse {
                    res: api
                        .delete(&delete_req.name, &DeleteParams::default())
                        .await
                        .map(|_| ())
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::UpdateRequest(update_req) => {
                let api = self.dynamic_api(&update_req.api_resource, &update_req.namespace);
                KubeAPIResponse::UpdateResponse(KubeUpdateResponse {
                    res: api
                        .replace(&update_req.name, &PostParams::default(), &update_req.obj)
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
            KubeAPIRequest::UpdateStatusRequest(update_status_req) => {
                let api = self.dynamic_api(
                    &update_status_req.api_resource,
                    &update_status_req.namespace,
                );
                let res = match serde_json::to_vec(&update_status_req.obj) {
                    Ok(data) => api
                        .replace_status(&update_status_req.name, &PostParams::default(), data)
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                    Err(_) => Err(APIError::BadRequest),
                };
                KubeAPIResponse::UpdateStatusResponse(KubeUpdateStatusResponse { res })
            }
            KubeAPIRequest::ApplyRequest(apply_req) => {
                let api = self.dynamic_api(&apply_req.api_resource, &apply_req.namespace);
                let pp = PatchParams::apply(&self.field_manager).force();
                KubeAPIResponse::ApplyResponse(KubeApplyResponse {
                    res: api
                        .patch(&apply_req.name, &pp, &Patch::Apply(&apply_req.obj))
                        .await
                        .map_err(|e| kube_error_to_api_error(&e)),
                })
            }
        }
    }
}

// kube_error_to_api_error translates the error returned by kube-rs APIs
// to the form that can be processed by reconcile_core.
// Errors that never reached the API server (transport, serialization) become APIError::Other.
pub fn kube_error_to_api_error(error: &kube::Error) -> APIError {
    match error {
        kube::Error::Api(error_resp) => APIError::from_reason(&error_resp.reason),
        _ => APIError::Other,
    }
}
