// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT

// Helper macros for reconcile_core to pattern match the response it received.
// extract_some_k_*_resp!(resp_o) evaluates to Some(result) if resp_o carries
// a response of that verb, or None otherwise (no response, or a different verb).

#[macro_export]
macro_rules! extract_some_k_get_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_get_response()).map(|resp| resp.res)
    };
}

#[macro_export]
macro_rules! extract_some_k_list_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_list_response()).map(|resp| resp.res)
    };
}

#[macro_export]
macro_rules! extract_some_k_create_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_create_response()).map(|resp| resp.res)
    };
}

#[macro_export]
macro_rules! extract_some_k_delete_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_delete_response()).map(|resp| resp.res)
    };
}

#[macro_export]
macro_rules! extract_some_k_update_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_update_response()).map(|resp| resp.res)
    };
}

#[macro_export]
macro_rules! extract_some_k_update_status_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_update_status_response()).map(|resp| resp.res)
    };
}

#[macro_export]
macro_rules! extract_some_k_apply_resp {
    ($r:expr) => {
        $r.and_then(|resp| resp.into_apply_response()).map(|resp| resp.res)
    };
}
