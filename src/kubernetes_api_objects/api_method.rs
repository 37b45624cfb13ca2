// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::error::APIError;
use kube::api::{ApiResource, DynamicObject};
use std::fmt;

// KubeAPIRequest represents the API requests a reconciler can issue.
//
// kube-rs uses a generic handle kube::api::Api<K> to talk to the Kubernetes API.
// Since reconcile_core only deals with DynamicObject, each request carries the
// ApiResource needed to instantiate an Api<DynamicObject> for the target kind,
// plus the arguments of the corresponding Api method.
//
// An empty namespace means the target kind is cluster-scoped.

#[derive(Clone, Debug)]
pub enum KubeAPIRequest {
    GetRequest(KubeGetRequest),
    ListRequest(KubeListRequest),
    CreateRequest(KubeCreateRequest),
    DeleteRequest(KubeDeleteRequest),
    UpdateRequest(KubeUpdateRequest),
    UpdateStatusRequest(KubeUpdateStatusRequest),
    ApplyRequest(KubeApplyRequest),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ApiVerb {
    Get,
    List,
    Create,
    Delete,
    Update,
    UpdateStatus,
    Apply,
}

impl fmt::Display for ApiVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiVerb::Get => "Get",
            ApiVerb::List => "List",
            ApiVerb::Create => "Create",
            ApiVerb::Delete => "Delete",
            ApiVerb::Update => "Update",
            ApiVerb::UpdateStatus => "UpdateStatus",
            ApiVerb::Apply => "Apply",
        };
        f.write_str(s)
    }
}

pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{}/{}/{}", kind, namespace, name)
}

// KubeGetRequest has the name as the parameter of Api.get(), and namespace to instantiate an Api.

#[derive(Clone, Debug)]
pub struct KubeGetRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
}

impl KubeGetRequest {
    pub fn key(&self) -> String {
        object_key(&self.api_resource.kind, &self.namespace, &self.name)
    }
}

// KubeListRequest has the namespace to instantiate an Api; an empty namespace lists across all namespaces.

#[derive(Clone, Debug)]
pub struct KubeListRequest {
    pub api_resource: ApiResource,
    pub namespace: String,
}

impl KubeListRequest {
    pub fn key(&self) -> String {
        format!("{}/{}", self.api_resource.kind, self.namespace)
    }
}

// KubeCreateRequest has the obj as the parameter of Api.create().

#[derive(Clone, Debug)]
pub struct KubeCreateRequest {
    pub api_resource: ApiResource,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeCreateRequest {
    pub fn key(&self) -> String {
        object_key(
            &self.api_resource.kind,
            &self.namespace,
            self.obj.metadata.name.as_deref().unwrap_or(""),
        )
    }
}

// KubeDeleteRequest has the name as the parameter of Api.delete(), and namespace to instantiate an Api.

#[derive(Clone, Debug)]
pub struct KubeDeleteRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
}

impl KubeDeleteRequest {
    pub fn key(&self) -> String {
        object_key(&self.api_resource.kind, &self.namespace, &self.name)
    }
}

// KubeUpdateRequest has the obj as the parameter of Api.replace().
// The obj should carry the resource version it was read at, otherwise the update is unconditional.

#[derive(Clone, Debug)]
pub struct KubeUpdateRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeUpdateRequest {
    pub fn key(&self) -> String {
        object_key(&self.api_resource.kind, &self.namespace, &self.name)
    }
}

// KubeUpdateStatusRequest has the obj as the parameter of Api.replace_status().

#[derive(Clone, Debug)]
pub struct KubeUpdateStatusRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeUpdateStatusRequest {
    pub fn key(&self) -> String {
        object_key(&self.api_resource.kind, &self.namespace, &self.name)
    }
}

// KubeApplyRequest has the obj as the server-side apply patch passed to Api.patch().
// The shim layer sends it with the controller's field manager and forced ownership.

#[derive(Clone, Debug)]
pub struct KubeApplyRequest {
    pub api_resource: ApiResource,
    pub name: String,
    pub namespace: String,
    pub obj: DynamicObject,
}

impl KubeApplyRequest {
    pub fn key(&self) -> String {
        object_key(&self.api_resource.kind, &self.namespace, &self.name)
    }
}

impl KubeAPIRequest {
    pub fn key(&self) -> String {
        match self {
            KubeAPIRequest::GetRequest(req) => req.key(),
            KubeAPIRequest::ListRequest(req) => req.key(),
            KubeAPIRequest::CreateRequest(req) => req.key(),
            KubeAPIRequest::DeleteRequest(req) => req.key(),
            KubeAPIRequest::UpdateRequest(req) => req.key(),
            KubeAPIRequest::UpdateStatusRequest(req) => req.key(),
            KubeAPIRequest::ApplyRequest(req) => req.key(),
        }
    }

    pub fn verb(&self) -> ApiVerb {
        match self {
            KubeAPIRequest::GetRequest(_) => ApiVerb::Get,
            KubeAPIRequest::ListRequest(_) => ApiVerb::List,
            KubeAPIRequest::CreateRequest(_) => ApiVerb::Create,
            KubeAPIRequest::DeleteRequest(_) => ApiVerb::Delete,
            KubeAPIRequest::UpdateRequest(_) => ApiVerb::Update,
            KubeAPIRequest::UpdateStatusRequest(_) => ApiVerb::UpdateStatus,
            KubeAPIRequest::ApplyRequest(_) => ApiVerb::Apply,
        }
    }

    pub fn api_resource(&self) -> &ApiResource {
        match self {
            KubeAPIRequest::GetRequest(req) => &req.api_resource,
            KubeAPIRequest::ListRequest(req) => &req.api_resource,
            KubeAPIRequest::CreateRequest(req) => &req.api_resource,
            KubeAPIRequest::DeleteRequest(req) => &req.api_resource,
            KubeAPIRequest::UpdateRequest(req) => &req.api_resource,
            KubeAPIRequest::UpdateStatusRequest(req) => &req.api_resource,
            KubeAPIRequest::ApplyRequest(req) => &req.api_resource,
        }
    }

    /// Whether the request writes to the store; fault injection only fires after these.
    pub fn is_mutating(&self) -> bool {
        !matches!(self.verb(), ApiVerb::Get | ApiVerb::List)
    }

    /// The response a failed request of this verb produces.
    pub fn error_response(&self, err: APIError) -> KubeAPIResponse {
        match self.verb() {
            ApiVerb::Get => KubeAPIResponse::GetResponse(KubeGetResponse { res: Err(err) }),
            ApiVerb::List => KubeAPIResponse::ListResponse(KubeListResponse { res: Err(err) }),
            ApiVerb::Create => KubeAPIResponse::CreateResponse(KubeCreateResponse { res: Err(err) }),
            ApiVerb::Delete => KubeAPIResponse::DeleteResponse(KubeDeleteResponse { res: Err(err) }),
            ApiVerb::Update => KubeAPIResponse::UpdateResponse(KubeUpdateResponse { res: Err(err) }),
            ApiVerb::UpdateStatus => {
                KubeAPIResponse::UpdateStatusResponse(KubeUpdateStatusResponse { res: Err(err) })
            }
            ApiVerb::Apply => KubeAPIResponse::ApplyResponse(KubeApplyResponse { res: Err(err) }),
        }
    }
}

// KubeAPIResponse wraps around the results returned by the methods of kube::api::Api.

#[derive(Clone, Debug)]
pub enum KubeAPIResponse {
    GetResponse(KubeGetResponse),
    ListResponse(KubeListResponse),
    CreateResponse(KubeCreateResponse),
    DeleteResponse(KubeDeleteResponse),
    UpdateResponse(KubeUpdateResponse),
    UpdateStatusResponse(KubeUpdateStatusResponse),
    ApplyResponse(KubeApplyResponse),
}

#[derive(Clone, Debug)]
pub struct KubeGetResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Clone, Debug)]
pub struct KubeListResponse {
    pub res: Result<Vec<DynamicObject>, APIError>,
}

#[derive(Clone, Debug)]
pub struct KubeCreateResponse {
    pub res: Result<DynamicObject, APIError>,
}

// KubeDeleteResponse does NOT have the object.

#[derive(Clone, Debug)]
pub struct KubeDeleteResponse {
    pub res: Result<(), APIError>,
}

#[derive(Clone, Debug)]
pub struct KubeUpdateResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Clone, Debug)]
pub struct KubeUpdateStatusResponse {
    pub res: Result<DynamicObject, APIError>,
}

#[derive(Clone, Debug)]
pub struct KubeApplyResponse {
    pub res: Result<DynamicObject, APIError>,
}

impl KubeAPIResponse {
    pub fn error(&self) -> Option<APIError> {
        match self {
            KubeAPIResponse::GetResponse(resp) => resp.res.as_ref().err().copied(),
            KubeAPIResponse::ListResponse(resp) => resp.res.as_ref().err().copied(),
            KubeAPIResponse::CreateResponse(resp) => resp.res.as_ref().err().copied(),
            KubeAPIResponse::DeleteResponse(resp) => resp.res.as_ref().err().copied(),
            KubeAPIResponse::UpdateResponse(resp) => resp.res.as_ref().err().copied(),
            KubeAPIResponse::UpdateStatusResponse(resp) => resp.res.as_ref().err().copied(),
            KubeAPIResponse::ApplyResponse(resp) => resp.res.as_ref().err().copied(),
        }
    }
}

macro_rules! declare_kube_api_response_helper_methods {
    ($is_fun:ident, $as_ref_fun:ident, $into_fun:ident, $resp_type:ident, $kube_resp_type:ty) => {
        impl KubeAPIResponse {
            pub fn $is_fun(&self) -> bool {
                matches!(self, KubeAPIResponse::$resp_type(_))
            }

            pub fn $as_ref_fun(&self) -> Option<&$kube_resp_type> {
                match self {
                    KubeAPIResponse::$resp_type(resp) => Some(resp),
                    _ => None,
                }
            }

            pub fn $into_fun(self) -> Option<$kube_resp_type> {
                match self {
                    KubeAPIResponse::$resp_type(resp) => Some(resp),
                    _ => None,
                }
            }
        }
    };
}

declare_kube_api_response_helper_methods!(
    is_get_response,
    as_get_response_ref,
    into_get_response,
    GetResponse,
    KubeGetResponse
);

declare_kube_api_response_helper_methods!(
    is_list_response,
    as_list_response_ref,
    into_list_response,
    ListResponse,
    KubeListResponse
);

declare_kube_api_response_helper_methods!(
    is_create_response,
    as_create_response_ref,
    into_create_response,
    CreateResponse,
    KubeCreateResponse
);

declare_kube_api_response_helper_methods!(
    is_delete_response,
    as_delete_response_ref,
    into_delete_response,
    DeleteResponse,
    KubeDeleteResponse
);

declare_kube_api_response_helper_methods!(
    is_update_response,
    as_update_response_ref,
    into_update_response,
    UpdateResponse,
    KubeUpdateResponse
);

declare_kube_api_response_helper_methods!(
    is_update_status_response,
    as_update_status_response_ref,
    into_update_status_response,
    UpdateStatusResponse,
    KubeUpdateStatusResponse
);

declare_kube_api_response_helper_methods!(
    is_apply_response,
    as_apply_response_ref,
    into_apply_response,
    ApplyResponse,
    KubeApplyResponse
);
