//! Transaction entity - the store-side row for one ledger entry.
//!
//! Amounts are whole cents; `kind` is the lowercase wire string; `month` is
//! the `"YYYY-MM"` equality-query column the hydration reads are scoped by.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Transaction database model
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    /// Store-generated canonical id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Temporary id from the session that created the row; unique
    #[sea_orm(unique)]
    pub client_token: String,
    /// Canonical id of the envelope this entry belongs to
    pub envelope_id: String,
    /// Non-negative amount in cents; direction comes from `kind`
    pub amount_cents: i64,
    /// When the transaction happened
    pub date: DateTimeUtc,
    /// Month scope, `"YYYY-MM"`, kept consistent with `date`
    pub month: String,
    /// Human-readable description
    pub description: String,
    /// `"income"`, `"expense"`, or legacy `"transfer"`
    pub kind: String,
    /// Whether the user has reconciled this entry
    pub reconciled: bool,
    /// Pairing id shared by the two sides of a transfer
    pub transfer_id: Option<String>,
    /// Set on rollover-funding and piggybank-contribution entries
    pub is_automatic: bool,
}

/// Defines relationships between Transaction and other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    /// Each transaction belongs to one envelope
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
