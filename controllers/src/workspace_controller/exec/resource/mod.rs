// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod common;
pub mod namespace;
pub mod resource_quota;
pub mod role_binding;

pub use common::*;
pub use namespace::*;
pub use resource_quota::*;
pub use role_binding::*;
