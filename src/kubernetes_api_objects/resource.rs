// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::api_method::object_key;
use kube::api::{ApiResource, DynamicObject, Resource};
use serde::{de::DeserializeOwned, Serialize};

/// KubeResource converts a typed Kubernetes object to and from the DynamicObject
/// that travels through KubeAPIRequest and KubeAPIResponse.
///
/// Both k8s-openapi types and kube-derived custom resources serialize their
/// apiVersion and kind, so a serde round trip through serde_json::Value is lossless.
pub trait KubeResource: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned {
    fn api_resource() -> ApiResource {
        ApiResource::erase::<Self>(&())
    }

    fn marshal(&self) -> Result<DynamicObject, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    fn unmarshal(obj: DynamicObject) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(obj)?)
    }

    fn object_key(&self) -> String {
        object_key(
            &Self::kind(&()),
            self.meta().namespace.as_deref().unwrap_or(""),
            self.meta().name.as_deref().unwrap_or(""),
        )
    }
}

impl<K> KubeResource for K where K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned {}

/// Unmarshal every object of a list response, failing on the first object that does not fit K.
pub fn objects_to<K: KubeResource>(objs: Vec<DynamicObject>) -> Result<Vec<K>, serde_json::Error> {
    objs.into_iter().map(K::unmarshal).collect()
}
