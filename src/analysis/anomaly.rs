use crate::commands::settings::GuardSettings;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Outcome of comparing a fresh capture against the last known-good one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub suspicious: bool,
    pub reason: Option<String>,
    pub previous_primary: Option<usize>,
    pub current_primary: usize,
}

pub fn is_suspicious(
    new_counts: &BTreeMap<String, usize>,
    last_good_counts: Option<&BTreeMap<String, usize>>,
    settings: &GuardSettings,
) -> bool {
    evaluate(new_counts, last_good_counts, settings).suspicious
}

pub fn evaluate(
    new_counts: &BTreeMap<String, usize>,
    last_good_counts: Option<&BTreeMap<String, usize>>,
    settings: &GuardSettings,
) -> GuardVerdict {
    let primary = settings.primary_collection.as_str();
    let current = new_counts.get(primary).copied().unwrap_or(0);

    let pass = |previous: Option<usize>| GuardVerdict {
        suspicious: false,
        reason: None,
        previous_primary: previous,
        current_primary: current,
    };

    let Some(last_good) = last_good_counts else {
        return pass(None);
    };
    if last_good.values().sum::<usize>() == 0 {
        return pass(Some(0));
    }

    let previous = last_good.get(primary).copied().unwrap_or(0);
    // At or below the floor, drops are too small to tell apart from normal use.
    if previous as u64 <= settings.wipe_floor {
        return pass(Some(previous));
    }

    let reason = if current == 0 {
        Some(format!("{primary} wiped: {previous} -> 0"))
    } else if (current as f64) < settings.min_ratio * previous as f64 {
        Some(format!(
            "{primary} dropped below {:.0}% of last good: {previous} -> {current}",
            settings.min_ratio * 100.0
        ))
    } else {
        None
    };

    GuardVerdict {
        suspicious: reason.is_some(),
        reason,
        previous_primary: Some(previous),
        current_primary: current,
    }
}
