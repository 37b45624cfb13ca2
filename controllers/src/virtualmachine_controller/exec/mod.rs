// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod image_catalog;
pub mod kubevirt;
pub mod reconciler;
