//! Income source entity - one named income entry scoped to one month.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Income source database model
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "income_sources")]
pub struct Model {
    /// Store-generated canonical id
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// Temporary id from the session that created the row; unique
    #[sea_orm(unique)]
    pub client_token: String,
    /// Month scope, `"YYYY-MM"`
    pub month: String,
    /// Source name, e.g. `"Salary"`
    pub name: String,
    /// Income amount in cents
    pub amount_cents: i64,
    /// `"once"`, `"weekly"`, `"biweekly"`, or `"monthly"`
    pub frequency: String,
}

/// Income sources have no relationships with other entities
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
