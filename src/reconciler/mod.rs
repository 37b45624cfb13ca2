// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
#[macro_use]
pub mod io;
#[allow(clippy::module_inception)]
pub mod reconciler;
