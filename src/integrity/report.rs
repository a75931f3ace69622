use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::catalog::{CheckKey, CATALOG};
use crate::config::TransactionScope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "UPPERCASE")]
#[ts(export, export_to = "../target/ts-bindings/")]
pub enum ScanMode {
    Fix,
    Report,
}

impl ScanMode {
    pub fn from_fix(fix: bool) -> Self {
        if fix {
            ScanMode::Fix
        } else {
            ScanMode::Report
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Fix => "FIX",
            ScanMode::Report => "REPORT",
        }
    }
}

/// One counter per check, keyed by the check's report name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../target/ts-bindings/")]
pub struct IssueCounts {
    #[ts(type = "number")]
    pub orphaned_events: u64,
    #[ts(type = "number")]
    pub orphaned_cycles: u64,
    #[ts(type = "number")]
    pub baskets_with_invalid_flupsy: u64,
    #[ts(type = "number")]
    pub orphaned_positions: u64,
    #[ts(type = "number")]
    pub orphaned_source_links: u64,
    #[ts(type = "number")]
    pub orphaned_destination_links: u64,
    #[ts(type = "number")]
    pub orphaned_history_entries: u64,
    #[ts(type = "number")]
    pub screenings_incomplete: u64,
    #[ts(type = "number")]
    pub orphaned_screenings: u64,
    #[ts(type = "number")]
    pub dangling_size_references: u64,
    #[ts(type = "number")]
    pub dangling_lot_references: u64,
    #[ts(type = "number")]
    pub baskets_without_active_position: u64,
}

impl IssueCounts {
    fn slot(&mut self, key: CheckKey) -> &mut u64 {
        match key {
            CheckKey::OrphanedEvents => &mut self.orphaned_events,
            CheckKey::OrphanedCycles => &mut self.orphaned_cycles,
            CheckKey::BasketsWithInvalidFlupsy => &mut self.baskets_with_invalid_flupsy,
            CheckKey::OrphanedPositions => &mut self.orphaned_positions,
            CheckKey::OrphanedSourceLinks => &mut self.orphaned_source_links,
            CheckKey::OrphanedDestinationLinks => &mut self.orphaned_destination_links,
            CheckKey::OrphanedHistoryEntries => &mut self.orphaned_history_entries,
            CheckKey::ScreeningsIncomplete => &mut self.screenings_incomplete,
            CheckKey::OrphanedScreenings => &mut self.orphaned_screenings,
            CheckKey::DanglingSizeReferences => &mut self.dangling_size_references,
            CheckKey::DanglingLotReferences => &mut self.dangling_lot_references,
            CheckKey::BasketsWithoutActivePosition => &mut self.baskets_without_active_position,
        }
    }

    pub fn get(&self, key: CheckKey) -> u64 {
        match key {
            CheckKey::OrphanedEvents => self.orphaned_events,
            CheckKey::OrphanedCycles => self.orphaned_cycles,
            CheckKey::BasketsWithInvalidFlupsy => self.baskets_with_invalid_flupsy,
            CheckKey::OrphanedPositions => self.orphaned_positions,
            CheckKey::OrphanedSourceLinks => self.orphaned_source_links,
            CheckKey::OrphanedDestinationLinks => self.orphaned_destination_links,
            CheckKey::OrphanedHistoryEntries => self.orphaned_history_entries,
            CheckKey::ScreeningsIncomplete => self.screenings_incomplete,
            CheckKey::OrphanedScreenings => self.orphaned_screenings,
            CheckKey::DanglingSizeReferences => self.dangling_size_references,
            CheckKey::DanglingLotReferences => self.dangling_lot_references,
            CheckKey::BasketsWithoutActivePosition => self.baskets_without_active_position,
        }
    }

    pub fn set(&mut self, key: CheckKey, count: u64) {
        *self.slot(key) = count;
    }

    /// Counters in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (CheckKey, u64)> + '_ {
        CATALOG.iter().map(move |spec| (spec.key, self.get(spec.key)))
    }

    pub fn total(&self) -> u64 {
        self.iter().map(|(_, count)| count).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../target/ts-bindings/")]
pub struct SubCount {
    /// Edge in `child.column -> parent` form.
    pub relation: String,
    #[ts(type = "number")]
    pub count: u64,
}

/// What a single check saw and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../target/ts-bindings/")]
pub struct CheckOutcome {
    pub key: CheckKey,
    pub title: String,
    pub policy: String,
    /// Violations found before any repair.
    #[ts(type = "number")]
    pub found: u64,
    #[ts(type = "number")]
    pub fixed: u64,
    /// Dependent rows removed alongside the repair.
    #[ts(type = "number")]
    pub cascaded: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_counts: Vec<SubCount>,
    #[ts(type = "number")]
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "../target/ts-bindings/")]
pub struct IntegrityReport {
    pub mode: ScanMode,
    pub issues: IssueCounts,
    #[ts(type = "number")]
    pub total_issues: u64,
    /// Always zero in report mode.
    #[ts(type = "number")]
    pub total_fixed: u64,
    pub checks: Vec<CheckOutcome>,
    pub transaction_scope: TransactionScope,
    pub generated_at: String,
    #[ts(type = "number")]
    pub duration_ms: u64,
    pub engine_version: String,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.total_issues == 0
    }

    pub fn check(&self, key: CheckKey) -> Option<&CheckOutcome> {
        self.checks.iter().find(|outcome| outcome.key == key)
    }
}

pub fn format_human_summary(report: &IntegrityReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "FLUPSY Integrity Report");
    let _ = writeln!(out, "=======================");
    let _ = writeln!(out, "Mode:          {}", report.mode.as_str());
    let _ = writeln!(out, "Scope:         {}", report.transaction_scope.as_str());
    let _ = writeln!(out, "Generated at:  {}", report.generated_at);
    let _ = writeln!(out, "Total issues:  {}", report.total_issues);
    if report.mode == ScanMode::Fix {
        let _ = writeln!(out, "Total fixed:   {}", report.total_fixed);
    }
    if report.is_clean() {
        let _ = writeln!(out, "Status:        OK (no violations found)");
    } else if report.mode == ScanMode::Fix {
        let _ = writeln!(out, "Status:        Violations repaired where a policy exists");
    } else {
        let _ = writeln!(out, "Status:        Violations found (run with --fix to repair)");
    }

    let _ = writeln!(out, "\nBy check:");
    for outcome in &report.checks {
        let _ = write!(
            out,
            "  {:>2}. {:<30} {:>6}",
            outcome.key as usize + 1,
            outcome.key.as_str(),
            outcome.found
        );
        if report.mode == ScanMode::Fix {
            let _ = write!(out, "  fixed {:>6}", outcome.fixed);
            if outcome.cascaded > 0 {
                let _ = write!(out, " (+{} cascaded)", outcome.cascaded);
            }
        }
        let _ = writeln!(out, "  [{}]", outcome.policy);
        if outcome.found > 0 {
            for sub in outcome.sub_counts.iter().filter(|sub| sub.count > 0) {
                let _ = writeln!(out, "        {}: {}", sub.relation, sub.count);
            }
        }
    }

    out
}
