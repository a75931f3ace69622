//! Static description of the farm's entity-relationship graph.
//!
//! Nothing here touches the store; checks and schema verification look up
//! table and column names from these tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Flupsy,
    Basket,
    Cycle,
    Operation,
    Screening,
    ScreeningSource,
    ScreeningDestination,
    ScreeningHistory,
    Lot,
    Size,
    BasketPosition,
}

impl Entity {
    pub const ALL: [Entity; 11] = [
        Entity::Flupsy,
        Entity::Basket,
        Entity::Cycle,
        Entity::Operation,
        Entity::Screening,
        Entity::ScreeningSource,
        Entity::ScreeningDestination,
        Entity::ScreeningHistory,
        Entity::Lot,
        Entity::Size,
        Entity::BasketPosition,
    ];

    pub const fn table(&self) -> &'static str {
        match self {
            Entity::Flupsy => "flupsys",
            Entity::Basket => "baskets",
            Entity::Cycle => "cycles",
            Entity::Operation => "operations",
            Entity::Screening => "screening_operations",
            Entity::ScreeningSource => "screening_source_baskets",
            Entity::ScreeningDestination => "screening_destination_baskets",
            Entity::ScreeningHistory => "screening_basket_history",
            Entity::Lot => "lots",
            Entity::Size => "sizes",
            Entity::BasketPosition => "basket_position_history",
        }
    }

    pub const fn label(&self) -> &'static str {
        match self {
            Entity::Flupsy => "FLUPSY unit",
            Entity::Basket => "basket",
            Entity::Cycle => "production cycle",
            Entity::Operation => "operation",
            Entity::Screening => "screening",
            Entity::ScreeningSource => "screening source basket",
            Entity::ScreeningDestination => "screening destination basket",
            Entity::ScreeningHistory => "screening history entry",
            Entity::Lot => "lot",
            Entity::Size => "size class",
            Entity::BasketPosition => "basket position",
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// The reference must always resolve; a miss makes the child an orphan.
    Mandatory,
    /// The reference may be null; a non-null miss is a dangling reference.
    Optional,
}

/// One foreign-key edge: `child.column -> parent.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Relation {
    pub child: Entity,
    pub column: &'static str,
    pub parent: Entity,
    pub cardinality: Cardinality,
}

impl Relation {
    const fn mandatory(child: Entity, column: &'static str, parent: Entity) -> Self {
        Relation {
            child,
            column,
            parent,
            cardinality: Cardinality::Mandatory,
        }
    }

    const fn optional(child: Entity, column: &'static str, parent: Entity) -> Self {
        Relation {
            child,
            column,
            parent,
            cardinality: Cardinality::Optional,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} -> {}", self.child.table(), self.column, self.parent.table())
    }
}

pub const BASKET_FLUPSY: Relation = Relation::optional(Entity::Basket, "flupsy_id", Entity::Flupsy);
pub const CYCLE_BASKET: Relation = Relation::mandatory(Entity::Cycle, "basket_id", Entity::Basket);
pub const OPERATION_BASKET: Relation =
    Relation::mandatory(Entity::Operation, "basket_id", Entity::Basket);
pub const OPERATION_SIZE: Relation = Relation::optional(Entity::Operation, "size_id", Entity::Size);
pub const OPERATION_LOT: Relation = Relation::optional(Entity::Operation, "lot_id", Entity::Lot);
pub const POSITION_BASKET: Relation =
    Relation::mandatory(Entity::BasketPosition, "basket_id", Entity::Basket);
pub const POSITION_FLUPSY: Relation =
    Relation::mandatory(Entity::BasketPosition, "flupsy_id", Entity::Flupsy);
pub const SOURCE_SCREENING: Relation =
    Relation::mandatory(Entity::ScreeningSource, "screening_id", Entity::Screening);
pub const SOURCE_BASKET: Relation =
    Relation::mandatory(Entity::ScreeningSource, "basket_id", Entity::Basket);
pub const DESTINATION_SCREENING: Relation =
    Relation::mandatory(Entity::ScreeningDestination, "screening_id", Entity::Screening);
pub const DESTINATION_BASKET: Relation =
    Relation::mandatory(Entity::ScreeningDestination, "basket_id", Entity::Basket);
pub const HISTORY_SCREENING: Relation =
    Relation::mandatory(Entity::ScreeningHistory, "screening_id", Entity::Screening);
pub const HISTORY_SOURCE_BASKET: Relation =
    Relation::mandatory(Entity::ScreeningHistory, "source_basket_id", Entity::Basket);
pub const HISTORY_DESTINATION_BASKET: Relation =
    Relation::mandatory(Entity::ScreeningHistory, "destination_basket_id", Entity::Basket);

pub const RELATIONS: &[Relation] = &[
    BASKET_FLUPSY,
    CYCLE_BASKET,
    OPERATION_BASKET,
    OPERATION_SIZE,
    OPERATION_LOT,
    POSITION_BASKET,
    POSITION_FLUPSY,
    SOURCE_SCREENING,
    SOURCE_BASKET,
    DESTINATION_SCREENING,
    DESTINATION_BASKET,
    HISTORY_SCREENING,
    HISTORY_SOURCE_BASKET,
    HISTORY_DESTINATION_BASKET,
];

pub const SCREENING_STATUS_COLUMN: &str = "status";
pub const BASKET_ROW_COLUMN: &str = "row";
pub const BASKET_POSITION_COLUMN: &str = "position";
pub const POSITION_END_COLUMN: &str = "end_date";

/// Lifecycle states of a screening.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreeningStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl ScreeningStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScreeningStatus::InProgress => "in_progress",
            ScreeningStatus::Completed => "completed",
            ScreeningStatus::Cancelled => "cancelled",
        }
    }
}

/// Non-key columns the checks read or write, per entity.
const EXTRA_COLUMNS: &[(Entity, &str)] = &[
    (Entity::Basket, BASKET_ROW_COLUMN),
    (Entity::Basket, BASKET_POSITION_COLUMN),
    (Entity::Screening, SCREENING_STATUS_COLUMN),
    (Entity::BasketPosition, POSITION_END_COLUMN),
];

/// Edges leaving `entity` (its own foreign keys).
pub fn relations_from(entity: Entity) -> impl Iterator<Item = &'static Relation> {
    RELATIONS.iter().filter(move |rel| rel.child == entity)
}

/// Edges pointing at `entity`.
pub fn relations_to(entity: Entity) -> impl Iterator<Item = &'static Relation> {
    RELATIONS.iter().filter(move |rel| rel.parent == entity)
}

/// Every table the engine touches, with the columns it needs to exist.
pub fn required_columns() -> BTreeMap<&'static str, BTreeSet<&'static str>> {
    let mut out: BTreeMap<&'static str, BTreeSet<&'static str>> = BTreeMap::new();
    for entity in Entity::ALL {
        out.entry(entity.table()).or_default().insert("id");
    }
    for rel in RELATIONS {
        out.entry(rel.child.table()).or_default().insert(rel.column);
    }
    for &(entity, column) in EXTRA_COLUMNS {
        out.entry(entity.table()).or_default().insert(column);
    }
    out
}
