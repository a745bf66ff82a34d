//! Allocation entity - the budgeted amount for one envelope in one month.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Allocation database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "allocations")]
pub struct Model {
    /// Store-generated canonical id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Temporary id from the session that created the row; unique
    #[sea_orm(unique)]
    pub client_token: String,
    /// Canonical id of the envelope the budget is assigned to
    pub envelope_id: String,
    /// Month scope, `"YYYY-MM"`
    pub month: String,
    /// Budgeted amount in cents
    pub budgeted_cents: i64,
}

/// Defines relationships between Allocation and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each allocation belongs to one envelope
    #[sea_orm(
        belongs_to = "super::envelope::Entity",
        from = "Column::EnvelopeId",
        to = "super::envelope::Column::Id"
    )]
    Envelope,
}

impl Related<super::envelope::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Envelope.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
