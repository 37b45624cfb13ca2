// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::*;
use kube::CustomResourceExt;
use serde_json::{json, Value};

fn spec_schema(crd: k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition) -> Value {
    let crd = serde_json::to_value(crd).unwrap();
    crd["spec"]["versions"][0]["schema"]["openAPIV3Schema"]["properties"]["spec"].clone()
}

#[test]
fn test_virtual_machine_schema_constrains_fields() {
    let spec = spec_schema(VirtualMachine::crd());
    let properties = &spec["properties"];

    assert_eq!(properties["cpus"]["minimum"].as_f64(), Some(1.0));
    assert_eq!(
        properties["os"]["enum"],
        json!(["ubuntu", "fedora", "debian", "centos", "alpine", "cirros", "freebsd"])
    );
    assert_eq!(
        properties["runStrategy"]["enum"],
        json!(["Always", "RerunOnFailure", "Manual", "Halted"])
    );

    let required: Vec<&str> = spec["required"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert!(required.contains(&"os"));
    assert!(!required.contains(&"runStrategy"));
    assert!(!required.contains(&"cpus"));
}

#[test]
fn test_workspace_schema_constrains_member_role() {
    let spec = spec_schema(Workspace::crd());
    let member = &spec["properties"]["members"]["items"];

    assert_eq!(member["properties"]["role"]["enum"], json!(["owner", "admin", "developer", "viewer"]));
    assert_eq!(member["properties"]["username"]["type"], "string");
}
