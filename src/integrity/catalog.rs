//! The twelve integrity checks as data.
//!
//! Most checks are plain orphan scans over one or more graph edges; the
//! screening and placement checks need their own queries and are separate
//! [`Detection`] variants.

use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use super::graph::{
    self, Entity, Relation, ScreeningStatus, BASKET_POSITION_COLUMN, BASKET_ROW_COLUMN,
    SCREENING_STATUS_COLUMN,
};
use super::repair::RepairPolicy;

/// Stable identifier of a check; doubles as its key in the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../target/ts-bindings/")]
#[serde(rename_all = "camelCase")]
pub enum CheckKey {
    OrphanedEvents,
    OrphanedCycles,
    BasketsWithInvalidFlupsy,
    OrphanedPositions,
    OrphanedSourceLinks,
    OrphanedDestinationLinks,
    OrphanedHistoryEntries,
    ScreeningsIncomplete,
    OrphanedScreenings,
    DanglingSizeReferences,
    DanglingLotReferences,
    BasketsWithoutActivePosition,
}

impl CheckKey {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CheckKey::OrphanedEvents => "orphanedEvents",
            CheckKey::OrphanedCycles => "orphanedCycles",
            CheckKey::BasketsWithInvalidFlupsy => "basketsWithInvalidFlupsy",
            CheckKey::OrphanedPositions => "orphanedPositions",
            CheckKey::OrphanedSourceLinks => "orphanedSourceLinks",
            CheckKey::OrphanedDestinationLinks => "orphanedDestinationLinks",
            CheckKey::OrphanedHistoryEntries => "orphanedHistoryEntries",
            CheckKey::ScreeningsIncomplete => "screeningsIncomplete",
            CheckKey::OrphanedScreenings => "orphanedScreenings",
            CheckKey::DanglingSizeReferences => "danglingSizeReferences",
            CheckKey::DanglingLotReferences => "danglingLotReferences",
            CheckKey::BasketsWithoutActivePosition => "basketsWithoutActivePosition",
        }
    }

    pub const fn title(&self) -> &'static str {
        match self {
            CheckKey::OrphanedEvents => "Operations without a basket",
            CheckKey::OrphanedCycles => "Cycles without a basket",
            CheckKey::BasketsWithInvalidFlupsy => "Baskets assigned to a missing FLUPSY",
            CheckKey::OrphanedPositions => "Position history with missing basket or FLUPSY",
            CheckKey::OrphanedSourceLinks => "Screening source links with missing ends",
            CheckKey::OrphanedDestinationLinks => "Screening destination links with missing ends",
            CheckKey::OrphanedHistoryEntries => "Screening history with missing references",
            CheckKey::ScreeningsIncomplete => "In-progress screenings without source baskets",
            CheckKey::OrphanedScreenings => "Screenings with no baskets at all",
            CheckKey::DanglingSizeReferences => "Operations pointing at a missing size",
            CheckKey::DanglingLotReferences => "Operations pointing at a missing lot",
            CheckKey::BasketsWithoutActivePosition => "Placed baskets without an open position",
        }
    }
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One or more graph edges sharing a child table. Never empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edges {
    head: Relation,
    tail: &'static [Relation],
}

impl Edges {
    pub const fn one(head: Relation) -> Self {
        Edges { head, tail: &[] }
    }

    pub const fn many(head: Relation, tail: &'static [Relation]) -> Self {
        Edges { head, tail }
    }

    pub fn child(&self) -> Entity {
        self.head.child
    }

    pub fn is_single(&self) -> bool {
        self.tail.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> + '_ {
        std::iter::once(&self.head).chain(self.tail.iter())
    }
}

/// How a check finds its violating rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Union of orphan scans over edges that share a child table.
    Orphans(Edges),
    /// Screenings in `status` with no source link.
    IncompleteScreenings { status: ScreeningStatus },
    /// Screenings with neither source nor destination links.
    UnlinkedScreenings,
    /// Baskets with a FLUPSY but no position row whose end is still open.
    MissingActivePosition,
}

impl Detection {
    /// Table whose ids the detection yields.
    pub fn subject(&self) -> Entity {
        match self {
            Detection::Orphans(edges) => edges.child(),
            Detection::IncompleteScreenings { .. } | Detection::UnlinkedScreenings => {
                Entity::Screening
            }
            Detection::MissingActivePosition => Entity::Basket,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckSpec {
    pub key: CheckKey,
    pub detection: Detection,
    pub repair: RepairPolicy,
}

/// Checks in execution order. Later checks depend on earlier repairs having
/// landed in the same pass (links pruned before screenings are counted).
pub const CATALOG: [CheckSpec; 12] = [
    CheckSpec {
        key: CheckKey::OrphanedEvents,
        detection: Detection::Orphans(Edges::one(graph::OPERATION_BASKET)),
        repair: RepairPolicy::Delete {
            entity: Entity::Operation,
            cascade: &[],
        },
    },
    CheckSpec {
        key: CheckKey::OrphanedCycles,
        detection: Detection::Orphans(Edges::one(graph::CYCLE_BASKET)),
        repair: RepairPolicy::Delete {
            entity: Entity::Cycle,
            cascade: &[],
        },
    },
    CheckSpec {
        key: CheckKey::BasketsWithInvalidFlupsy,
        detection: Detection::Orphans(Edges::one(graph::BASKET_FLUPSY)),
        repair: RepairPolicy::Nullify {
            entity: Entity::Basket,
            columns: &["flupsy_id", BASKET_ROW_COLUMN, BASKET_POSITION_COLUMN],
        },
    },
    CheckSpec {
        key: CheckKey::OrphanedPositions,
        detection: Detection::Orphans(Edges::many(
            graph::POSITION_BASKET,
            &[graph::POSITION_FLUPSY],
        )),
        repair: RepairPolicy::Delete {
            entity: Entity::BasketPosition,
            cascade: &[],
        },
    },
    CheckSpec {
        key: CheckKey::OrphanedSourceLinks,
        detection: Detection::Orphans(Edges::many(
            graph::SOURCE_SCREENING,
            &[graph::SOURCE_BASKET],
        )),
        repair: RepairPolicy::Delete {
            entity: Entity::ScreeningSource,
            cascade: &[],
        },
    },
    CheckSpec {
        key: CheckKey::OrphanedDestinationLinks,
        detection: Detection::Orphans(Edges::many(
            graph::DESTINATION_SCREENING,
            &[graph::DESTINATION_BASKET],
        )),
        repair: RepairPolicy::Delete {
            entity: Entity::ScreeningDestination,
            cascade: &[],
        },
    },
    CheckSpec {
        key: CheckKey::OrphanedHistoryEntries,
        detection: Detection::Orphans(Edges::many(
            graph::HISTORY_SCREENING,
            &[graph::HISTORY_SOURCE_BASKET, graph::HISTORY_DESTINATION_BASKET],
        )),
        repair: RepairPolicy::Delete {
            entity: Entity::ScreeningHistory,
            cascade: &[],
        },
    },
    CheckSpec {
        key: CheckKey::ScreeningsIncomplete,
        detection: Detection::IncompleteScreenings {
            status: ScreeningStatus::InProgress,
        },
        repair: RepairPolicy::SetStatus {
            entity: Entity::Screening,
            column: SCREENING_STATUS_COLUMN,
            value: ScreeningStatus::Cancelled.as_str(),
        },
    },
    CheckSpec {
        key: CheckKey::OrphanedScreenings,
        detection: Detection::UnlinkedScreenings,
        repair: RepairPolicy::Delete {
            entity: Entity::Screening,
            cascade: &[graph::HISTORY_SCREENING],
        },
    },
    CheckSpec {
        key: CheckKey::DanglingSizeReferences,
        detection: Detection::Orphans(Edges::one(graph::OPERATION_SIZE)),
        repair: RepairPolicy::Nullify {
            entity: Entity::Operation,
            columns: &["size_id"],
        },
    },
    CheckSpec {
        key: CheckKey::DanglingLotReferences,
        detection: Detection::Orphans(Edges::one(graph::OPERATION_LOT)),
        repair: RepairPolicy::Nullify {
            entity: Entity::Operation,
            columns: &["lot_id"],
        },
    },
    // Guessing a placement could put a basket somewhere it never was.
    CheckSpec {
        key: CheckKey::BasketsWithoutActivePosition,
        detection: Detection::MissingActivePosition,
        repair: RepairPolicy::ReportOnly,
    },
];

pub fn spec(key: CheckKey) -> &'static CheckSpec {
    // CATALOG is indexed in declaration order of CheckKey.
    &CATALOG[key as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_order_matches_key_order() {
        for (index, spec) in CATALOG.iter().enumerate() {
            assert_eq!(spec.key as usize, index, "{} out of place", spec.key);
            assert_eq!(super::spec(spec.key).key, spec.key);
        }
    }

    #[test]
    fn orphan_detections_share_a_child_table_with_their_repair() {
        for spec in CATALOG.iter() {
            if let Detection::Orphans(edges) = spec.detection {
                let child = edges.child();
                assert!(edges.iter().all(|rel| rel.child == child));
                match spec.repair {
                    RepairPolicy::Delete { entity, .. } | RepairPolicy::Nullify { entity, .. } => {
                        assert_eq!(entity, child, "{} repairs the wrong table", spec.key)
                    }
                    other => panic!("{} has unexpected policy {other:?}", spec.key),
                }
            }
        }
    }

    #[test]
    fn baskets_are_never_deleted() {
        for spec in CATALOG.iter() {
            if let RepairPolicy::Delete { entity, cascade } = spec.repair {
                assert_ne!(entity, Entity::Basket);
                assert!(cascade.iter().all(|rel| rel.child != Entity::Basket));
            }
        }
    }

    #[test]
    fn incomplete_screenings_are_cancelled_not_deleted() {
        let spec = spec(CheckKey::ScreeningsIncomplete);
        assert_eq!(
            spec.repair,
            RepairPolicy::SetStatus {
                entity: Entity::Screening,
                column: "status",
                value: "cancelled",
            }
        );
        assert_eq!(spec.detection.subject(), Entity::Screening);
    }

    #[test]
    fn multi_edge_checks_start_with_their_subject_edge() {
        let history = spec(CheckKey::OrphanedHistoryEntries).detection;
        assert_eq!(history.subject(), Entity::ScreeningHistory);
        let Detection::Orphans(edges) = history else {
            panic!("history check is an orphan scan");
        };
        assert!(!edges.is_single());
        let columns: Vec<_> = edges.iter().map(|rel| rel.column).collect();
        assert_eq!(
            columns,
            vec!["screening_id", "source_basket_id", "destination_basket_id"]
        );
        let Detection::Orphans(events) = spec(CheckKey::OrphanedEvents).detection else {
            panic!("events check is an orphan scan");
        };
        assert!(events.is_single());
        assert_eq!(events.iter().count(), 1);
    }

    #[test]
    fn missing_position_is_report_only() {
        assert!(!spec(CheckKey::BasketsWithoutActivePosition).repair.mutates());
    }

    #[test]
    fn keys_serialise_to_report_names() {
        let json = serde_json::to_string(&CheckKey::BasketsWithInvalidFlupsy).unwrap();
        assert_eq!(json, "\"basketsWithInvalidFlupsy\"");
        for spec in CATALOG.iter() {
            let json = serde_json::to_string(&spec.key).unwrap();
            assert_eq!(json.trim_matches('"'), spec.key.as_str());
        }
    }
}
