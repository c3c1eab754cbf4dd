//! Merges allocation, signal and delegation records into one ordered timeline.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use num_traits::Zero;
use rustc_hash::FxHashMap;

use super::metrics::{thaw_status, unallocated_stake};
use crate::config::AnalysisSettings;
use crate::error::{ReportError, Result};
use crate::models::{
    AllocationEvent, DelegationEvent, DelegationKind, Marker, SignalEvent, StakeSnapshot,
    TimelineEntry,
};
use crate::utils::validate_window_hours;

#[derive(Debug, Clone)]
pub struct ReconcileParams {
    pub hours: i64,
    pub upgrade_tolerance: Duration,
    /// Percent
    pub unallocated_threshold: BigDecimal,
    pub default_thawing_period: Duration,
}

impl ReconcileParams {
    pub fn new(hours: i64, settings: &AnalysisSettings) -> Self {
        Self {
            hours,
            upgrade_tolerance: settings.upgrade_tolerance(),
            unallocated_threshold: BigDecimal::from(settings.unallocated_warning_threshold),
            default_thawing_period: settings.thawing_period(),
        }
    }
}

/// Raw, possibly duplicated and unsorted records.
#[derive(Debug, Clone, Default)]
pub struct ReconcileInput {
    pub allocations: Vec<AllocationEvent>,
    pub signals: Vec<SignalEvent>,
    pub delegations: Vec<DelegationEvent>,
}

#[derive(Debug, Clone)]
pub struct Reconciled {
    pub window_start: DateTime<Utc>,
    pub timeline: Vec<TimelineEntry>,
    /// De-duplicated, consistent allocations (the full set, not only the window)
    pub allocations: Vec<AllocationEvent>,
    /// De-duplicated delegation events (the full set, not only the window)
    pub delegations: Vec<DelegationEvent>,
    pub warnings: Vec<ReportError>,
}

/// Build the timeline for `[now - hours, now]`.
///
/// Inconsistent records are dropped and reported in `warnings`; only an invalid window
/// fails the call.
pub fn reconcile(
    input: ReconcileInput,
    stakes: &[StakeSnapshot],
    now: DateTime<Utc>,
    params: &ReconcileParams,
) -> Result<Reconciled> {
    let hours = validate_window_hours(params.hours).ok_or(ReportError::InvalidWindow(params.hours))?;
    let window_start = Duration::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or(ReportError::InvalidWindow(hours))?;
    let in_window = |ts: DateTime<Utc>| ts >= window_start && ts <= now;

    let mut warnings = Vec::new();

    let allocations: Vec<AllocationEvent> = dedupe(input.allocations, |a| &a.entity_id, AllocationEvent::completeness)
        .into_iter()
        .filter(|a| match a.check_ordering() {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping allocation: {}", e);
                warnings.push(e);
                false
            },
        })
        .collect();
    let signals = dedupe(input.signals, |s| &s.entity_id, |_| 0);
    let delegations = dedupe(input.delegations, |d| &d.entity_id, DelegationEvent::completeness);

    let mut timeline = Vec::new();

    // Allocations
    for allocation in &allocations {
        if in_window(allocation.created_at) {
            timeline.push(TimelineEntry::new(
                allocation.created_at,
                allocation.entity_id.clone(),
                Marker::Opened {
                    allocation: allocation.clone(),
                },
            ));
        }
        if let Some(closed_at) = allocation.closed_at.filter(|ts| in_window(*ts)) {
            let unallocated = stakes
                .iter()
                .find(|s| s.indexer_address == allocation.indexer_address)
                .and_then(|stake| {
                    let allocated = allocated_after(stake, &allocations, closed_at);
                    unallocated_stake(&stake.total_stake(), &allocated, &params.unallocated_threshold)
                });
            timeline.push(TimelineEntry::new(
                closed_at,
                allocation.entity_id.clone(),
                Marker::Closed {
                    allocation: allocation.clone(),
                    reward_collection: allocation.poi_submitted,
                    unallocated,
                },
            ));
        }
    }

    // Signals
    let mut windowed: Vec<SignalEvent> = signals.into_iter().filter(|s| in_window(s.timestamp)).collect();
    windowed.sort_by(|a, b| (a.timestamp, &a.entity_id).cmp(&(b.timestamp, &b.entity_id)));
    timeline.extend(classify_signals(windowed, params.upgrade_tolerance));

    // Delegations
    for event in delegations.iter().filter(|d| in_window(d.timestamp)) {
        let marker = match event.kind {
            DelegationKind::Delegated => Marker::Delegated { event: event.clone() },
            DelegationKind::Undelegated => {
                let thaw_end = event
                    .effective_thaw_end(params.default_thawing_period)
                    .unwrap_or(event.timestamp);
                Marker::Thawing {
                    event: event.clone(),
                    thaw_end,
                    status: thaw_status(thaw_end, now),
                }
            },
        };
        timeline.push(TimelineEntry::new(event.timestamp, event.entity_id.clone(), marker));
    }

    timeline.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    debug!(
        "Reconciled {} entries since {} ({} warnings)",
        timeline.len(),
        window_start,
        warnings.len()
    );

    Ok(Reconciled {
        window_start,
        timeline,
        allocations,
        delegations,
        warnings,
    })
}

/// Collapse records sharing an entity id, keeping the most complete one.
///
/// Ties keep the first-seen record; output preserves first-seen order.
fn dedupe<T, K, C>(records: Vec<T>, key: K, completeness: C) -> Vec<T>
where
    K: Fn(&T) -> &String,
    C: Fn(&T) -> u8,
{
    let mut index: FxHashMap<String, usize> = FxHashMap::default();
    let mut kept: Vec<T> = Vec::with_capacity(records.len());

    for record in records {
        match index.get(key(&record)) {
            Some(&i) => {
                if completeness(&record) > completeness(&kept[i]) {
                    kept[i] = record;
                }
            },
            None => {
                index.insert(key(&record).clone(), kept.len());
                kept.push(record);
            },
        }
    }

    kept
}

/// Indexer's allocated stake right after `at`, rebuilt from its current allocated stake.
fn allocated_after(stake: &StakeSnapshot, allocations: &[AllocationEvent], at: DateTime<Utc>) -> BigDecimal {
    let mut allocated = stake.allocated_stake.clone();
    for a in allocations.iter().filter(|a| a.indexer_address == stake.indexer_address) {
        if a.closed_at.is_some_and(|closed| closed > at) {
            allocated += &a.tokens_allocated;
        }
        if a.created_at > at {
            allocated -= &a.tokens_allocated;
        }
    }
    if allocated < BigDecimal::zero() {
        BigDecimal::zero()
    } else {
        allocated
    }
}

/// Pair signal removals and additions into upgrades; `signals` must be time ordered.
fn classify_signals(mut signals: Vec<SignalEvent>, tolerance: Duration) -> Vec<TimelineEntry> {
    let mut partner: Vec<Option<usize>> = vec![None; signals.len()];

    for i in 0..signals.len() {
        if partner[i].is_some() {
            continue;
        }
        let found = (i + 1..signals.len())
            .take_while(|&j| signals[j].timestamp - signals[i].timestamp <= tolerance)
            .find(|&j| partner[j].is_none() && signals[i].pairs_with(&signals[j], tolerance));
        if let Some(j) = found {
            partner[i] = Some(j);
            partner[j] = Some(i);
        }
    }

    for (i, signal) in signals.iter_mut().enumerate() {
        signal.is_upgrade = partner[i].is_some();
    }

    let mut entries = Vec::with_capacity(signals.len());
    for (i, signal) in signals.iter().enumerate() {
        match partner[i] {
            None => entries.push(TimelineEntry::new(
                signal.timestamp,
                signal.entity_id.clone(),
                Marker::Signal { event: signal.clone() },
            )),
            // Emit each pair once, from its earlier member
            Some(j) if j > i => {
                let (removed, added) = if signal.is_removal() {
                    (signal.clone(), signals[j].clone())
                } else {
                    (signals[j].clone(), signal.clone())
                };
                let timestamp = removed.timestamp.max(added.timestamp);
                entries.push(TimelineEntry::new(
                    timestamp,
                    added.entity_id.clone(),
                    Marker::Upgrade { removed, added },
                ));
            },
            Some(_) => {},
        }
    }

    entries
}
