//! Plain-text rendering of a [`ReportModel`].

use std::fmt::Write;

use num_traits::Zero;

use crate::models::{
    CutPair, DelegatorMetrics, IndexerMetrics, Marker, MetricValue, ReportKind, ReportModel, ThawStatus,
    TimelineEntry,
};
use crate::utils::{
    format_duration, format_fraction_percent, format_percent, format_timestamp, format_tokens,
    format_tokens_short,
};

pub fn render(report: &ReportModel) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail
    let _ = write_report(&mut out, report);
    out
}

fn write_report(out: &mut String, report: &ReportModel) -> std::fmt::Result {
    let meta = &report.metadata;
    let title = match meta.kind {
        ReportKind::Subgraph => "Subgraph",
        ReportKind::Indexer => "Indexer",
        ReportKind::Delegator => "Delegator",
    };
    writeln!(out, "{} {}", title, report.display_name(&meta.subject))?;
    writeln!(
        out,
        "Window: last {}h ({} .. {} UTC)",
        meta.window_hours,
        format_timestamp(&meta.window_start),
        format_timestamp(&meta.generated_at)
    )?;

    if !report.deployments.is_empty() {
        section(out, "Deployments")?;
        for d in report.deployments.values() {
            writeln!(
                out,
                "  {}  signal {:>8}  staked {:>8}  {} active allocations",
                d.ipfs_hash,
                format_tokens_short(&d.signalled_tokens),
                format_tokens_short(&d.staked_tokens),
                d.active_allocations
            )?;
        }
    }

    if !report.indexers.is_empty() {
        section(out, "Indexers")?;
        for m in report.indexers.values() {
            write_indexer(out, report, m)?;
        }
    }

    for d in report.delegators.values() {
        section(out, &format!("Delegations of {}", report.display_name(&d.delegator_address)))?;
        write_delegator(out, report, d)?;
    }

    section(out, &format!("Timeline ({} entries)", report.timeline.len()))?;
    if report.timeline.is_empty() {
        writeln!(out, "  no activity in window")?;
    }
    for entry in &report.timeline {
        write_entry(out, report, entry)?;
    }

    if !report.warnings.is_empty() {
        section(out, &format!("Warnings ({})", report.warnings.len()))?;
        for w in &report.warnings {
            writeln!(out, "  ! {}", w.message)?;
        }
    }

    Ok(())
}

fn section(out: &mut String, title: &str) -> std::fmt::Result {
    writeln!(out)?;
    writeln!(out, "▸ {}", title)
}

fn highlight(flag: bool) -> &'static str {
    if flag {
        "*"
    } else {
        " "
    }
}

fn write_indexer(out: &mut String, report: &ReportModel, m: &IndexerMetrics) -> std::fmt::Result {
    writeln!(out, "{} {}", highlight(m.highlighted), report.display_name(&m.indexer_address))?;
    writeln!(
        out,
        "    self {}  delegated {}  allocated {}",
        format_tokens(&m.self_stake),
        format_tokens(&m.delegated_stake),
        format_tokens(&m.allocated_stake)
    )?;
    writeln!(
        out,
        "    delegation capacity left {}",
        format_tokens(&m.remaining_delegation_capacity)
    )?;

    writeln!(
        out,
        "    indexing cut {}  query fee cut {}",
        cut(&m.reward_cuts.indexing),
        cut(&m.reward_cuts.query_fee)
    )?;

    let proportion = match &m.reward_proportion {
        MetricValue::Available { value } => format_percent(value),
        MetricValue::Unavailable { reason } => format!("n/a ({})", reason),
    };
    writeln!(
        out,
        "    {} active allocations  rewards/period {}  APR {}  vs network {}",
        m.active_allocations,
        format_tokens(&m.reward_rate_per_period),
        format_percent(&m.instant_apr),
        proportion
    )?;

    let collected = &m.window_rewards;
    if !collected.total.is_zero() {
        writeln!(
            out,
            "    collected {} in window: indexer {}  delegators {}",
            format_tokens(&collected.total),
            format_tokens(&collected.indexer),
            format_tokens(&collected.delegators)
        )?;
    }
    if m.over_allocated {
        writeln!(out, "    ! over-allocated")?;
    }
    if let Some(u) = &m.unallocated {
        writeln!(
            out,
            "    unallocated {}{}",
            format_percent(&u.ratio),
            if u.warning { "  ! above threshold" } else { "" }
        )?;
    }
    Ok(())
}

fn cut(pair: &CutPair) -> String {
    match &pair.effective {
        Some(effective) => format!(
            "{} (effective {})",
            format_fraction_percent(&pair.raw),
            format_fraction_percent(effective)
        ),
        None => format_fraction_percent(&pair.raw),
    }
}

fn write_delegator(out: &mut String, report: &ReportModel, d: &DelegatorMetrics) -> std::fmt::Result {
    for p in &d.positions {
        writeln!(
            out,
            "  {}  principal {}  value {}  profit {}",
            report.display_name(&p.indexer_address),
            format_tokens(&p.principal),
            format_tokens(&p.current_value),
            format_tokens(&p.profit)
        )?;
        for t in &p.thawing {
            writeln!(
                out,
                "      thawing {} until {}: {}",
                format_tokens(&t.tokens),
                format_timestamp(&t.thaw_end),
                thaw_label(&t.status)
            )?;
        }
    }
    writeln!(
        out,
        "  total principal {}  value {}  accumulated profit {}",
        format_tokens(&d.total_principal),
        format_tokens(&d.total_value),
        format_tokens(&d.accumulated_profit)
    )
}

fn thaw_label(status: &ThawStatus) -> String {
    match status {
        ThawStatus::Withdrawable => "withdrawable".to_string(),
        ThawStatus::Thawing { remaining_secs } => format!("{} left", format_duration(*remaining_secs)),
    }
}

fn write_entry(out: &mut String, report: &ReportModel, entry: &TimelineEntry) -> std::fmt::Result {
    let detail = match &entry.marker {
        Marker::Opened { allocation } => format!(
            "{} allocated {} on {}",
            report.display_name(&allocation.indexer_address),
            format_tokens(&allocation.tokens_allocated),
            short_id(&allocation.subgraph_deployment_id)
        ),
        Marker::Closed {
            allocation,
            unallocated,
            ..
        } => {
            let mut s = format!(
                "{} closed {} on {}",
                report.display_name(&allocation.indexer_address),
                format_tokens(&allocation.tokens_allocated),
                short_id(&allocation.subgraph_deployment_id)
            );
            if !allocation.indexing_rewards.is_zero() {
                s.push_str(&format!("  rewards {}", format_tokens(&allocation.indexing_rewards)));
            }
            if let Some(u) = unallocated.as_ref().filter(|u| u.warning) {
                s.push_str(&format!("  ! {} unallocated", format_percent(&u.ratio)));
            }
            s
        },
        Marker::Signal { event } => format!(
            "{} {} on {}",
            report.display_name(&event.curator_address),
            format_tokens(&event.signal_delta.abs()),
            short_id(&event.deployment_id)
        ),
        Marker::Upgrade { removed, added } => format!(
            "{} moved {} from {} to {}",
            report.display_name(&added.curator_address),
            format_tokens(&added.signal_delta),
            short_id(&removed.deployment_id),
            short_id(&added.deployment_id)
        ),
        Marker::Delegated { event } => format!(
            "{} delegated to {} ({} delegated in total)",
            report.display_name(&event.delegator_address),
            report.display_name(&event.indexer_address),
            format_tokens(&event.tokens)
        ),
        Marker::Thawing { event, status, .. } => format!(
            "{} undelegated {} from {} ({})",
            report.display_name(&event.delegator_address),
            format_tokens(&event.tokens),
            report.display_name(&event.indexer_address),
            thaw_label(status)
        ),
    };

    writeln!(
        out,
        "{} {}  {:<14} {}",
        highlight(entry.highlighted),
        format_timestamp(&entry.timestamp),
        entry.marker.label(),
        detail
    )
}

fn short_id(id: &str) -> &str {
    id.get(..10).unwrap_or(id)
}
