// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod api_method;
pub mod condition;
pub mod error;
pub mod object_meta;
pub mod resource;

pub mod prelude {
    pub use super::api_method::*;
    pub use super::condition::*;
    pub use super::error::*;
    pub use super::object_meta::*;
    pub use super::resource::*;
}
