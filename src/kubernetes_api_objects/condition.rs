// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};

pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

pub fn new_condition(
    type_: &str,
    status: bool,
    reason: &str,
    message: &str,
    observed_generation: Option<i64>,
) -> Condition {
    Condition {
        type_: type_.to_string(),
        status: if status { CONDITION_TRUE } else { CONDITION_FALSE }.to_string(),
        reason: reason.to_string(),
        message: message.to_string(),
        observed_generation,
        last_transition_time: Time(Utc::now()),
    }
}

/// Sets the condition of new_condition.type_ in conditions.
///
/// The last transition time only moves when the status flips; reason, message
/// and observed generation are always refreshed. Returns whether conditions changed.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new_condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == new_condition.type_) {
        None => {
            conditions.push(new_condition);
            true
        }
        Some(existing) => {
            let mut changed = false;
            if existing.status != new_condition.status {
                existing.status = new_condition.status;
                existing.last_transition_time = new_condition.last_transition_time;
                changed = true;
            }
            if existing.reason != new_condition.reason {
                existing.reason = new_condition.reason;
                changed = true;
            }
            if existing.message != new_condition.message {
                existing.message = new_condition.message;
                changed = true;
            }
            if existing.observed_generation != new_condition.observed_generation {
                existing.observed_generation = new_condition.observed_generation;
                changed = true;
            }
            changed
        }
    }
}

pub fn find_status_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

pub fn is_status_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_status_condition(conditions, type_).map_or(false, |c| c.status == CONDITION_TRUE)
}
