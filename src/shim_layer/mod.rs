// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod api_client;
pub mod controller_runtime;
pub mod fault_injection;
