//! Envelope entity - the store-side row for a budget envelope.
//!
//! Canonical ids are store-generated UUID strings; `client_token` records
//! the temporary id the writing session used, and its uniqueness is what
//! makes create retries idempotent. Piggybank settings are flattened into
//! nullable columns.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Envelope database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "envelopes")]
pub struct Model {
    /// Store-generated canonical id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Temporary id from the session that created the row; unique, so a
    /// retried create resolves to the existing row instead of duplicating
    #[sea_orm(unique)]
    pub client_token: String,
    /// Human-readable name of the envelope
    pub name: String,
    /// Whether the envelope participates in the current month
    pub is_active: bool,
    /// Display ordering within the envelope list
    pub order_index: i32,
    /// Optional grouping category
    pub category_id: Option<String>,
    /// Whether this is a persistent savings envelope
    pub is_piggybank: bool,
    /// Piggybank savings goal in cents, when configured
    pub target_cents: Option<i64>,
    /// Piggybank monthly contribution in cents
    pub contribution_cents: Option<i64>,
    /// Piggybank display color
    pub color: Option<String>,
    /// Whether automatic contributions are paused
    pub paused: Option<bool>,
    /// First month the piggybank can receive contributions, `"YYYY-MM"`
    pub created_month: Option<String>,
}

/// Defines relationships between Envelope and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// One envelope has many transactions
    #[sea_orm(has_many = "super::transaction::Entity")]
    Transactions,
    /// One envelope has many allocations
    #[sea_orm(has_many = "super::allocation::Entity")]
    Allocations,
}

impl Related<super::transaction::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transactions.def()
    }
}

impl Related<super::allocation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Allocations.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
