// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

/// Resolves the boot image of a virtual machine from its operating system and version.
pub trait ImageCatalog: Send + Sync {
    fn resolve(&self, os: &str, version: Option<&str>) -> String;
}

pub const CIRROS_IMAGE: &str = "quay.io/kubevirt/cirros-container-disk-demo:latest";

/// An in-memory table keyed by `os` or `os:version`.
///
/// With a version, an exact `os:version` entry wins; otherwise the os entry is used with
/// its tag replaced by the version. Without a version the os entry is used as is.
/// Operating systems missing from the table boot the fallback image.
#[derive(Clone, Debug)]
pub struct StaticImageCatalog {
    images: BTreeMap<String, String>,
    fallback: String,
}

impl StaticImageCatalog {
    pub fn new(images: BTreeMap<String, String>, fallback: impl Into<String>) -> StaticImageCatalog {
        StaticImageCatalog {
            images,
            fallback: fallback.into(),
        }
    }
}

impl Default for StaticImageCatalog {
    fn default() -> StaticImageCatalog {
        let images = [
            ("ubuntu", "quay.io/containerdisks/ubuntu:22.04"),
            ("fedora", "quay.io/containerdisks/fedora:39"),
            ("debian", "quay.io/containerdisks/debian:12"),
            ("centos", "quay.io/containerdisks/centos-stream:9"),
            ("alpine", "quay.io/containerdisks/alpine:3.19"),
            ("cirros", CIRROS_IMAGE),
            ("freebsd", "quay.io/containerdisks/freebsd:13.2"),
        ]
        .into_iter()
        .map(|(os, image)| (os.to_string(), image.to_string()))
        .collect();
        StaticImageCatalog::new(images, CIRROS_IMAGE)
    }
}

impl ImageCatalog for StaticImageCatalog {
    fn resolve(&self, os: &str, version: Option<&str>) -> String {
        let version = version.filter(|v| !v.is_empty());
        if let Some(image) = version.and_then(|v| self.images.get(&format!("{}:{}", os, v))) {
            return image.clone();
        }
        match (self.images.get(os), version) {
            (Some(base), Some(version)) => with_tag(base, version),
            (Some(base), None) => base.clone(),
            (None, _) => self.fallback.clone(),
        }
    }
}

// The tag is whatever follows the last ':' after the last '/', so registry ports survive.
fn with_tag(image: &str, tag: &str) -> String {
    let name_start = image.rfind('/').map_or(0, |i| i + 1);
    let repository = match image[name_start..].rfind(':') {
        Some(i) => &image[..name_start + i],
        None => image,
    };
    format!("{}:{}", repository, tag)
}
