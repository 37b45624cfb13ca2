// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::executable_model::{
    api_server_state::ApiServerState,
    object_map::KubeObjectRef,
};
use crate::kubernetes_api_objects::{
    api_method::*, error::APIError, object_meta::ObjectMetaExt, resource::KubeResource,
};
use crate::shim_layer::api_client::ApiServerClient;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{ApiResource, DynamicObject, TypeMeta};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use tokio::sync::Mutex;

// ExecutableApiServerModel is an in-memory model of the Kubernetes API server
// that handles the same KubeAPIRequests the shim layer sends to a real cluster.
// It covers the behavior the reconcilers depend on:
// - resource versions bump on every effective write and are checked on update (Conflict),
// - generation bumps when anything outside metadata and status changes,
// - status is only written through the status subresource,
// - deletion of an object with finalizers only sets the deletion timestamp, and the object
//   goes away once an update removes its last finalizer,
// - deleting a namespace or an owner garbage collects what lives in it or is owned by it,
// - server-side apply merges the applied configuration into the stored object.
pub struct ExecutableApiServerModel {}

fn object_ref(api_resource: &ApiResource, namespace: &str, name: &str) -> KubeObjectRef {
    KubeObjectRef::new(&api_resource.api_version, &api_resource.kind, namespace, name)
}

fn now() -> Time {
    Time(Utc::now())
}

fn status_of(obj: &DynamicObject) -> Option<Value> {
    obj.data.get("status").cloned()
}

fn set_status(obj: &mut DynamicObject, status: Option<Value>) {
    if !obj.data.is_object() {
        obj.data = Value::Object(Map::new());
    }
    if let Some(map) = obj.data.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

// Everything in the object body except status; a change here bumps the generation.
fn spec_of(obj: &DynamicObject) -> Value {
    let mut data = obj.data.clone();
    if let Some(map) = data.as_object_mut() {
        map.remove("status");
    }
    data
}

fn with_type_meta(mut obj: DynamicObject, api_resource: &ApiResource) -> DynamicObject {
    if obj.types.is_none() {
        obj.types = Some(TypeMeta {
            api_version: api_resource.api_version.clone(),
            kind: api_resource.kind.clone(),
        });
    }
    obj
}

fn namespace_field(namespace: &str) -> Option<String> {
    if namespace.is_empty() {
        None
    } else {
        Some(namespace.to_string())
    }
}

// JSON merge used for server-side apply: objects merge key by key, null removes a key,
// anything else in the patch replaces the stored value.
fn merge_json(target: &mut Value, patch: &Value) {
    match (target.as_object_mut(), patch.as_object()) {
        (Some(target_map), Some(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_null() {
                    target_map.remove(key);
                } else if let Some(existing) = target_map.get_mut(key) {
                    merge_json(existing, value);
                } else {
                    target_map.insert(key.clone(), value.clone());
                }
            }
        }
        _ => *target = patch.clone(),
    }
}

impl ExecutableApiServerModel {
    fn next_resource_version(s: &mut ApiServerState) -> String {
        s.resource_version_counter += 1;
        s.resource_version_counter.to_string()
    }

    fn next_uid(s: &mut ApiServerState) -> String {
        s.uid_counter += 1;
        format!("uid-{}", s.uid_counter)
    }

    pub fn handle_request(req: KubeAPIRequest, s: &mut ApiServerState) -> KubeAPIResponse {
        match req {
            KubeAPIRequest::GetRequest(req) => KubeAPIResponse::GetResponse(Self::handle_get_request(&req, s)),
            KubeAPIRequest::ListRequest(req) => KubeAPIResponse::ListResponse(Self::handle_list_request(&req, s)),
            KubeAPIRequest::CreateRequest(req) => {
                KubeAPIResponse::CreateResponse(Self::handle_create_request(&req, s))
            }
            KubeAPIRequest::DeleteRequest(req) => {
                KubeAPIResponse::DeleteResponse(Self::handle_delete_request(&req, s))
            }
            KubeAPIRequest::UpdateRequest(req) => {
                KubeAPIResponse::UpdateResponse(Self::handle_update_request(&req, s))
            }
            KubeAPIRequest::UpdateStatusRequest(req) => {
                KubeAPIResponse::UpdateStatusResponse(Self::handle_update_status_request(&req, s))
            }
            KubeAPIRequest::ApplyRequest(req) => KubeAPIResponse::ApplyResponse(Self::handle_apply_request(&req, s)),
        }
    }

    pub fn handle_get_request(req: &KubeGetRequest, s: &ApiServerState) -> KubeGetResponse {
        let key = object_ref(&req.api_resource, &req.namespace, &req.name);
        match s.resources.get(&key) {
            Some(obj) => KubeGetResponse { res: Ok(obj.clone()) },
            None => KubeGetResponse {
                res: Err(APIError::ObjectNotFound),
            },
        }
    }

    pub fn handle_list_request(req: &KubeListRequest, s: &ApiServerState) -> KubeListResponse {
        KubeListResponse {
            res: Ok(s.resources.list(&req.api_resource.api_version, &req.api_resource.kind, &req.namespace)),
        }
    }

    fn create_request_admission_check(req: &KubeCreateRequest, s: &ApiServerState) -> Option<APIError> {
        let name = match req.obj.metadata.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => return Some(APIError::Invalid),
        };
        if !req.namespace.is_empty()
            && req.obj.metadata.namespace.is_some()
            && req.obj.metadata.namespace.as_deref() != Some(req.namespace.as_str())
        {
            Some(APIError::BadRequest)
        } else if s
            .resources
            .contains_key(&object_ref(&req.api_resource, &req.namespace, name))
        {
            Some(APIError::ObjectAlreadyExists)
        } else {
            None
        }
    }

    fn insert_new_object(
        api_resource: &ApiResource,
        namespace: &str,
        obj: &DynamicObject,
        s: &mut ApiServerState,
    ) -> DynamicObject {
        let mut created_obj = with_type_meta(obj.clone(), api_resource);
        created_obj.metadata.namespace = namespace_field(namespace);
        created_obj.metadata.uid = Some(Self::next_uid(s));
        created_obj.metadata.resource_version = Some(Self::next_resource_version(s));
        created_obj.metadata.generation = Some(1);
        created_obj.metadata.creation_timestamp = Some(now());
        created_obj.metadata.deletion_timestamp = None;
        set_status(&mut created_obj, None);
        let key = object_ref(api_resource, namespace, created_obj.metadata.name_or_empty());
        s.resources.insert(key, created_obj.clone());
        created_obj
    }

    pub fn handle_create_request(req: &KubeCreateRequest, s: &mut ApiServerState) -> KubeCreateResponse {
        if let Some(err) = Self::create_request_admission_check(req, s) {
            return KubeCreateResponse { res: Err(err) };
        }
        KubeCreateResponse {
            res: Ok(Self::insert_new_object(&req.api_resource, &req.namespace, &req.obj, s)),
        }
    }

    pub fn handle_delete_request(req: &KubeDeleteRequest, s: &mut ApiServerState) -> KubeDeleteResponse {
        let key = object_ref(&req.api_resource, &req.namespace, &req.name);
        if !s.resources.contains_key(&key) {
            return KubeDeleteResponse {
                res: Err(APIError::ObjectNotFound),
            };
        }
        Self::delete_object(&key, s);
        KubeDeleteResponse { res: Ok(()) }
    }

    // An object with finalizers only gets its deletion timestamp; otherwise it is removed
    // and whatever depends on it is deleted the same way.
    fn delete_object(key: &KubeObjectRef, s: &mut ApiServerState) {
        let mut obj = match s.resources.get(key) {
            Some(obj) => obj.clone(),
            None => return,
        };
        if !obj.metadata.finalizers_empty() {
            if !obj.metadata.has_deletion_timestamp() {
                obj.metadata.deletion_timestamp = Some(now());
                obj.metadata.resource_version = Some(Self::next_resource_version(s));
                s.resources.insert(key.clone(), obj);
            }
        } else {
            s.resources.remove(key);
            Self::next_resource_version(s);
            Self::garbage_collect(key, &obj, s);
        }
    }

    fn garbage_collect(removed_key: &KubeObjectRef, removed: &DynamicObject, s: &mut ApiServerState) {
        let removed_uid = removed.metadata.uid.clone();
        let is_namespace = removed_key.api_version == "v1" && removed_key.kind == "Namespace";
        let dependents: BTreeSet<KubeObjectRef> = s
            .resources
            .iter()
            .filter(|(key, obj)| {
                let in_namespace = is_namespace && key.namespace == removed_key.name;
                let owned = removed_uid.as_ref().map_or(false, |uid| {
                    obj.metadata
                        .owner_references
                        .as_ref()
                        .map_or(false, |refs| refs.iter().any(|r| &r.uid == uid))
                });
                in_namespace || owned
            })
            .map(|(key, _)| key.clone())
            .collect();
        for key in dependents {
            Self::delete_object(&key, s);
        }
    }

    fn update_request_admission_check_helper(
        key: &KubeObjectRef,
        name: &str,
        namespace: &str,
        obj: &DynamicObject,
        s: &ApiServerState,
    ) -> Option<APIError> {
        if obj.metadata.name.as_deref() != Some(name) {
            return Some(APIError::BadRequest);
        }
        if !namespace.is_empty()
            && obj.metadata.namespace.is_some()
            && obj.metadata.namespace.as_deref() != Some(namespace)
        {
            return Some(APIError::BadRequest);
        }
        let stored = match s.resources.get(key) {
            Some(stored) => stored,
            None => return Some(APIError::ObjectNotFound),
        };
        if obj.metadata.resource_version.is_some()
            && obj.metadata.resource_version != stored.metadata.resource_version
        {
            Some(APIError::Conflict)
        } else if obj.metadata.uid.is_some() && obj.metadata.uid != stored.metadata.uid {
            Some(APIError::Conflict)
        } else {
            None
        }
    }

    fn updated_object(req: &KubeUpdateRequest, old_obj: &DynamicObject) -> DynamicObject {
        let mut updated_obj = with_type_meta(req.obj.clone(), &req.api_resource);
        updated_obj.metadata.namespace = namespace_field(&req.namespace);
        updated_obj.metadata.resource_version = old_obj.metadata.resource_version.clone();
        updated_obj.metadata.uid = old_obj.metadata.uid.clone();
        updated_obj.metadata.generation = old_obj.metadata.generation;
        updated_obj.metadata.creation_timestamp = old_obj.metadata.creation_timestamp.clone();
        updated_obj.metadata.deletion_timestamp = old_obj.metadata.deletion_timestamp.clone();
        set_status(&mut updated_obj, status_of(old_obj));
        updated_obj
    }

    // A terminating object cannot gain finalizers.
    fn metadata_transition_validity_check(obj: &DynamicObject, old_obj: &DynamicObject) -> Option<APIError> {
        if !old_obj.metadata.has_deletion_timestamp() {
            return None;
        }
        let old_finalizers: BTreeSet<&String> = old_obj.metadata.finalizers.iter().flatten().collect();
        let gains_finalizer = obj
            .metadata
            .finalizers
            .iter()
            .flatten()
            .any(|f| !old_finalizers.contains(f));
        if gains_finalizer {
            Some(APIError::Forbidden)
        } else {
            None
        }
    }

    // roleRef of a (Cluster)RoleBinding cannot change once the binding exists.
    fn immutable_field_check(api_resource: &ApiResource, obj: &DynamicObject, old_obj: &DynamicObject) -> Option<APIError> {
        let binding = api_resource.group == "rbac.authorization.k8s.io"
            && (api_resource.kind == "RoleBinding" || api_resource.kind == "ClusterRoleBinding");
        if binding && obj.data.get("roleRef") != old_obj.data.get("roleRef") {
            Some(APIError::Invalid)
        } else {
            None
        }
    }

    // Store an updated object, or drop it if it is terminating and has no finalizers left.
    fn commit_update(key: KubeObjectRef, mut updated_obj: DynamicObject, old_obj: &DynamicObject, s: &mut ApiServerState) -> DynamicObject {
        if spec_of(&updated_obj) != spec_of(old_obj) {
            updated_obj.metadata.generation = Some(old_obj.metadata.generation.unwrap_or(0) + 1);
        }
        updated_obj.metadata.resource_version = Some(Self::next_resource_version(s));
        if updated_obj.metadata.has_deletion_timestamp() && updated_obj.metadata.finalizers_empty() {
            s.resources.remove(&key);
            Self::garbage_collect(&key, &updated_obj, s);
        } else {
            s.resources.insert(key, updated_obj.clone());
        }
        updated_obj
    }

    pub fn handle_update_request(req: &KubeUpdateRequest, s: &mut ApiServerState) -> KubeUpdateResponse {
        let key = object_ref(&req.api_resource, &req.namespace, &req.name);
        if let Some(err) = Self::update_request_admission_check_helper(&key, &req.name, &req.namespace, &req.obj, s) {
            return KubeUpdateResponse { res: Err(err) };
        }
        let old_obj = match s.resources.get(&key) {
            Some(obj) => obj.clone(),
            None => return KubeUpdateResponse { res: Err(APIError::ObjectNotFound) },
        };
        let updated_obj = Self::updated_object(req, &old_obj);
        if updated_obj == old_obj {
            return KubeUpdateResponse { res: Ok(old_obj) };
        }
        if let Some(err) = Self::metadata_transition_validity_check(&updated_obj, &old_obj) {
            return KubeUpdateResponse { res: Err(err) };
        }
        if let Some(err) = Self::immutable_field_check(&req.api_resource, &updated_obj, &old_obj) {
            return KubeUpdateResponse { res: Err(err) };
        }
        KubeUpdateResponse {
            res: Ok(Self::commit_update(key, updated_obj, &old_obj, s)),
        }
    }

    pub fn handle_update_status_request(req: &KubeUpdateStatusRequest, s: &mut ApiServerState) -> KubeUpdateStatusResponse {
        let key = object_ref(&req.api_resource, &req.namespace, &req.name);
        if let Some(err) = Self::update_request_admission_check_helper(&key, &req.name, &req.namespace, &req.obj, s) {
            return KubeUpdateStatusResponse { res: Err(err) };
        }
        let old_obj = match s.resources.get(&key) {
            Some(obj) => obj.clone(),
            None => return KubeUpdateStatusResponse { res: Err(APIError::ObjectNotFound) },
        };
        let mut status_updated_obj = old_obj.clone();
        set_status(&mut status_updated_obj, status_of(&req.obj));
        if status_updated_obj == old_obj {
            return KubeUpdateStatusResponse { res: Ok(old_obj) };
        }
        status_updated_obj.metadata.resource_version = Some(Self::next_resource_version(s));
        s.resources.insert(key, status_updated_obj.clone());
        KubeUpdateStatusResponse {
            res: Ok(status_updated_obj),
        }
    }

    pub fn handle_apply_request(req: &KubeApplyRequest, s: &mut ApiServerState) -> KubeApplyResponse {
        if req.obj.metadata.name.is_some() && req.obj.metadata.name.as_deref() != Some(req.name.as_str()) {
            return KubeApplyResponse {
                res: Err(APIError::BadRequest),
            };
        }
        let key = object_ref(&req.api_resource, &req.namespace, &req.name);
        let old_obj = match s.resources.get(&key) {
            Some(obj) => obj.clone(),
            None => {
                let mut obj = req.obj.clone();
                obj.metadata.name = Some(req.name.clone());
                return KubeApplyResponse {
                    res: Ok(Self::insert_new_object(&req.api_resource, &req.namespace, &obj, s)),
                };
            }
        };

        let mut applied_obj = old_obj.clone();
        let mut data = spec_of(&old_obj);
        merge_json(&mut data, &spec_of(&req.obj));
        applied_obj.data = data;
        set_status(&mut applied_obj, status_of(&old_obj));
        let meta = &req.obj.metadata;
        if let Some(labels) = &meta.labels {
            applied_obj.metadata.merge_labels(labels);
        }
        if let Some(annotations) = &meta.annotations {
            let current = applied_obj.metadata.annotations.get_or_insert_with(Default::default);
            for (k, v) in annotations {
                current.insert(k.clone(), v.clone());
            }
        }
        if meta.owner_references.is_some() {
            applied_obj.metadata.owner_references = meta.owner_references.clone();
        }
        if applied_obj == old_obj {
            return KubeApplyResponse { res: Ok(old_obj) };
        }
        if let Some(err) = Self::immutable_field_check(&req.api_resource, &applied_obj, &old_obj) {
            return KubeApplyResponse { res: Err(err) };
        }
        KubeApplyResponse {
            res: Ok(Self::commit_update(key, applied_obj, &old_obj, s)),
        }
    }
}

/// A failure the model returns instead of handling matching requests.
/// times = None keeps failing until cleared.
#[derive(Clone, Debug)]
pub struct InjectedFailure {
    pub verb: ApiVerb,
    pub kind: String,
    pub error: APIError,
    pub times: Option<usize>,
}

// ExecutableApiServer wraps the model behind the ApiServerClient interface used by the shim layer.
// Its helpers stand in for the other actors of a cluster (users, KubeVirt, the deployment controller)
// by writing straight into the state.
#[derive(Default)]
pub struct ExecutableApiServer {
    state: Mutex<ApiServerState>,
    injected_failures: Mutex<Vec<InjectedFailure>>,
    request_log: Mutex<Vec<(ApiVerb, String)>>,
}

impl ExecutableApiServer {
    pub fn new() -> ExecutableApiServer {
        ExecutableApiServer::default()
    }

    pub async fn inject_failure(&self, failure: InjectedFailure) {
        self.injected_failures.lock().await.push(failure);
    }

    pub async fn clear_failures(&self) {
        self.injected_failures.lock().await.clear();
    }

    async fn take_injected_failure(&self, req: &KubeAPIRequest) -> Option<APIError> {
        let mut failures = self.injected_failures.lock().await;
        let verb = req.verb();
        let kind = &req.api_resource().kind;
        let idx = failures
            .iter()
            .position(|f| f.verb == verb && &f.kind == kind && f.times != Some(0))?;
        let error = failures[idx].error;
        if let Some(times) = failures[idx].times.as_mut() {
            *times -= 1;
        }
        Some(error)
    }

    pub async fn request_log(&self) -> Vec<(ApiVerb, String)> {
        self.request_log.lock().await.clone()
    }

    pub async fn clear_request_log(&self) {
        self.request_log.lock().await.clear();
    }

    pub async fn resource_version_counter(&self) -> i64 {
        self.state.lock().await.resource_version_counter
    }

    pub async fn get(&self, api_resource: &ApiResource, namespace: &str, name: &str) -> Option<DynamicObject> {
        self.state
            .lock()
            .await
            .resources
            .get(&object_ref(api_resource, namespace, name))
            .cloned()
    }

    pub async fn list(&self, api_resource: &ApiResource, namespace: &str) -> Vec<DynamicObject> {
        self.state.lock().await.resources.list(&api_resource.api_version, &api_resource.kind, namespace)
    }

    pub async fn get_resource<K: KubeResource>(&self, namespace: &str, name: &str) -> Option<K> {
        self.get(&K::api_resource(), namespace, name)
            .await
            .and_then(|obj| K::unmarshal(obj).ok())
    }

    /// Create an object the way a user would, through the create endpoint.
    pub async fn create_resource<K: KubeResource>(&self, obj: &K) -> Result<K, crate::Error> {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let resp = self
            .handle_request(KubeAPIRequest::CreateRequest(KubeCreateRequest {
                api_resource: K::api_resource(),
                namespace,
                obj: obj.marshal()?,
            }))
            .await;
        let created = resp
            .into_create_response()
            .ok_or_else(|| crate::Error::ShimLayerError("unexpected response to create".to_string()))?
            .res?;
        Ok(K::unmarshal(created)?)
    }

    /// Replace the spec and metadata of an object without a resource version precondition.
    pub async fn update_resource<K: KubeResource>(&self, obj: &K) -> Result<K, crate::Error> {
        let namespace = obj.meta().namespace.clone().unwrap_or_default();
        let mut dynamic = obj.marshal()?;
        dynamic.metadata.resource_version = None;
        let resp = self
            .handle_request(KubeAPIRequest::UpdateRequest(KubeUpdateRequest {
                api_resource: K::api_resource(),
                name: dynamic.metadata.name_or_empty().to_string(),
                namespace,
                obj: dynamic,
            }))
            .await;
        let updated = resp
            .into_update_response()
            .ok_or_else(|| crate::Error::ShimLayerError("unexpected response to update".to_string()))?
            .res?;
        Ok(K::unmarshal(updated)?)
    }

    pub async fn delete(&self, api_resource: &ApiResource, namespace: &str, name: &str) -> Result<(), APIError> {
        self.handle_request(KubeAPIRequest::DeleteRequest(KubeDeleteRequest {
            api_resource: api_resource.clone(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }))
        .await
        .into_delete_response()
        .ok_or(APIError::Other)?
        .res
    }

    /// Overwrite the status of a stored object, as the controller owning that object would.
    pub async fn set_status(
        &self,
        api_resource: &ApiResource,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<DynamicObject, APIError> {
        let mut s = self.state.lock().await;
        let key = object_ref(api_resource, namespace, name);
        let mut obj = s.resources.get(&key).cloned().ok_or(APIError::ObjectNotFound)?;
        set_status(&mut obj, Some(status));
        obj.metadata.resource_version = Some(ExecutableApiServerModel::next_resource_version(&mut s));
        s.resources.insert(key, obj.clone());
        Ok(obj)
    }

    /// Insert an object as is, keeping its status; used to seed objects other actors create.
    pub async fn insert_object(&self, api_resource: &ApiResource, namespace: &str, obj: DynamicObject) -> DynamicObject {
        let mut s = self.state.lock().await;
        let status = status_of(&obj);
        let mut created = ExecutableApiServerModel::insert_new_object(api_resource, namespace, &obj, &mut s);
        if status.is_some() {
            set_status(&mut created, status);
            let key = object_ref(api_resource, namespace, created.metadata.name_or_empty());
            s.resources.insert(key, created.clone());
        }
        created
    }
}

#[async_trait]
impl ApiServerClient for ExecutableApiServer {
    async fn handle_request(&self, req: KubeAPIRequest) -> KubeAPIResponse {
        self.request_log.lock().await.push((req.verb(), req.key()));
        if let Some(err) = self.take_injected_failure(&req).await {
            return req.error_response(err);
        }
        let mut s = self.state.lock().await;
        ExecutableApiServerModel::handle_request(req, &mut s)
    }
}
