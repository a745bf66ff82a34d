//! `SeaORM`/`SQLite` implementation of the persistence collaborator.
//!
//! Rows use store-generated UUID canonical ids and keep the creating
//! session's client token in a unique column, which is what makes create
//! retries idempotent. Transport-level database errors are mapped to
//! [`Error::StoreUnavailable`] so the coordinator can classify them as
//! offline; everything else surfaces as a database error and is treated as
//! a genuine remote failure.

use crate::entities::{allocation, envelope, income_source, transaction};
use crate::errors::{Error, Result};
use crate::model::{
    Allocation, Envelope, IncomeSource, MonthKey, Money, PiggybankConfig, Transaction,
};
use crate::store::{ConnectivityProbe, Store};
use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Schema,
    Set,
};
use tracing::debug;
use uuid::Uuid;

/// Persistence collaborator backed by `SeaORM`.
#[derive(Clone, Debug)]
pub struct OrmStore {
    db: DatabaseConnection,
}

/// Maps a database error into the coordinator's classification: connection
/// problems are the offline class, everything else is a real failure.
fn db_err(err: sea_orm::DbErr) -> Error {
    match &err {
        sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => Error::StoreUnavailable {
            message: err.to_string(),
        },
        _ => Error::Database(err),
    }
}

fn new_canonical_id() -> String {
    Uuid::new_v4().to_string()
}

impl OrmStore {
    /// Connects to the database at `url`.
    ///
    /// # Errors
    /// Returns a store-unavailable error when the connection fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let db = Database::connect(url).await.map_err(db_err)?;
        Ok(Self { db })
    }

    /// Wraps an existing connection.
    #[must_use]
    pub const fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Creates all store tables from the entity definitions.
    ///
    /// # Errors
    /// Returns a database error when table creation fails.
    pub async fn create_tables(&self) -> Result<()> {
        let builder = self.db.get_database_backend();
        let schema = Schema::new(builder);

        let envelope_table = schema.create_table_from_entity(envelope::Entity);
        let transaction_table = schema.create_table_from_entity(transaction::Entity);
        let income_source_table = schema.create_table_from_entity(income_source::Entity);
        let allocation_table = schema.create_table_from_entity(allocation::Entity);

        self.db
            .execute(builder.build(&envelope_table))
            .await
            .map_err(db_err)?;
        self.db
            .execute(builder.build(&transaction_table))
            .await
            .map_err(db_err)?;
        self.db
            .execute(builder.build(&income_source_table))
            .await
            .map_err(db_err)?;
        self.db
            .execute(builder.build(&allocation_table))
            .await
            .map_err(db_err)?;

        Ok(())
    }
}

fn envelope_from_row(row: envelope::Model) -> Result<Envelope> {
    let piggybank = if row.is_piggybank {
        let created_month: MonthKey = row
            .created_month
            .as_deref()
            .ok_or_else(|| Error::Validation {
                message: format!("piggybank {} has no created month", row.id),
            })?
            .parse()?;
        Some(PiggybankConfig {
            target_amount: row.target_cents.map(Money::from_cents),
            monthly_contribution: Money::from_cents(row.contribution_cents.unwrap_or(0)),
            color: row.color.clone().unwrap_or_else(|| "#9e9e9e".to_string()),
            paused: row.paused.unwrap_or(false),
            created_month,
        })
    } else {
        None
    };
    Ok(Envelope {
        id: row.id,
        name: row.name,
        is_active: row.is_active,
        order_index: row.order_index,
        category_id: row.category_id,
        is_piggybank: row.is_piggybank,
        piggybank,
    })
}

fn set_envelope_fields(model: &mut envelope::ActiveModel, record: &Envelope) {
    model.name = Set(record.name.clone());
    model.is_active = Set(record.is_active);
    model.order_index = Set(record.order_index);
    model.category_id = Set(record.category_id.clone());
    model.is_piggybank = Set(record.is_piggybank);
    let config = record.piggybank_config();
    model.target_cents = Set(config.and_then(|c| c.target_amount.map(Money::cents)));
    model.contribution_cents = Set(config.map(|c| c.monthly_contribution.cents()));
    model.color = Set(config.map(|c| c.color.clone()));
    model.paused = Set(config.map(|c| c.paused));
    model.created_month = Set(config.map(|c| c.created_month.to_string()));
}

fn transaction_from_row(row: transaction::Model) -> Result<Transaction> {
    let mut tx = Transaction {
        id: row.id,
        envelope_id: row.envelope_id,
        amount: Money::from_cents(row.amount_cents),
        date: row.date,
        month: row.month.parse()?,
        description: row.description,
        kind: row.kind.parse()?,
        reconciled: row.reconciled,
        transfer_id: row.transfer_id,
        is_automatic: row.is_automatic,
    };
    tx.normalize();
    Ok(tx)
}

fn set_transaction_fields(model: &mut transaction::ActiveModel, record: &Transaction) {
    model.envelope_id = Set(record.envelope_id.clone());
    model.amount_cents = Set(record.amount.cents());
    model.date = Set(record.date);
    model.month = Set(record.month.to_string());
    model.description = Set(record.description.clone());
    model.kind = Set(record.kind.as_str().to_string());
    model.reconciled = Set(record.reconciled);
    model.transfer_id = Set(record.transfer_id.clone());
    model.is_automatic = Set(record.is_automatic);
}

fn income_source_from_row(row: income_source::Model) -> Result<IncomeSource> {
    let frequency = match row.frequency.as_str() {
        "once" => crate::model::Frequency::Once,
        "weekly" => crate::model::Frequency::Weekly,
        "biweekly" => crate::model::Frequency::Biweekly,
        "monthly" => crate::model::Frequency::Monthly,
        other => {
            return Err(Error::Validation {
                message: format!("unknown income frequency: {other}"),
            });
        }
    };
    Ok(IncomeSource {
        id: row.id,
        month: row.month.parse()?,
        name: row.name,
        amount: Money::from_cents(row.amount_cents),
        frequency,
    })
}

fn frequency_str(frequency: crate::model::Frequency) -> &'static str {
    match frequency {
        crate::model::Frequency::Once => "once",
        crate::model::Frequency::Weekly => "weekly",
        crate::model::Frequency::Biweekly => "biweekly",
        crate::model::Frequency::Monthly => "monthly",
    }
}

fn allocation_from_row(row: allocation::Model) -> Result<Allocation> {
    Ok(Allocation {
        id: row.id,
        envelope_id: row.envelope_id,
        month: row.month.parse()?,
        budgeted: Money::from_cents(row.budgeted_cents),
    })
}

impl Store for OrmStore {
    async fn create_envelope(&self, token: &str, record: &Envelope) -> Result<String> {
        if let Some(existing) = envelope::Entity::find()
            .filter(envelope::Column::ClientToken.eq(token))
            .one(&self.db)
            .await
            .map_err(db_err)?
        {
            debug!(token, id = %existing.id, "create retried, resolving to existing envelope");
            return Ok(existing.id);
        }
        let id = new_canonical_id();
        let mut model = envelope::ActiveModel {
            id: Set(id.clone()),
            client_token: Set(token.to_string()),
            ..Default::default()
        };
        set_envelope_fields(&mut model, record);
        envelope::Entity::insert(model)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    async fn update_envelope(&self, id: &str, record: &Envelope) -> Result<()> {
        let row = envelope::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound {
                entity: "envelope",
                id: id.to_string(),
            })?;
        let mut model: envelope::ActiveModel = row.into();
        set_envelope_fields(&mut model, record);
        sea_orm::ActiveModelTrait::update(model, &self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_envelope(&self, id: &str) -> Result<()> {
        envelope::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_envelopes(&self) -> Result<Vec<Envelope>> {
        envelope::Entity::find()
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(envelope_from_row)
            .collect()
    }

    async fn create_transaction(&self, token: &str, record: &Transaction) -> Result<String> {
        if let Some(existing) = transaction::Entity::find()
            .filter(transaction::Column::ClientToken.eq(token))
            .one(&self.db)
            .await
            .map_err(db_err)?
        {
            debug!(token, id = %existing.id, "create retried, resolving to existing transaction");
            return Ok(existing.id);
        }
        let id = new_canonical_id();
        let mut model = transaction::ActiveModel {
            id: Set(id.clone()),
            client_token: Set(token.to_string()),
            ..Default::default()
        };
        set_transaction_fields(&mut model, record);
        transaction::Entity::insert(model)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    async fn update_transaction(&self, id: &str, record: &Transaction) -> Result<()> {
        let row = transaction::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound {
                entity: "transaction",
                id: id.to_string(),
            })?;
        let mut model: transaction::ActiveModel = row.into();
        set_transaction_fields(&mut model, record);
        sea_orm::ActiveModelTrait::update(model, &self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_transaction(&self, id: &str) -> Result<()> {
        transaction::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_transactions(&self) -> Result<Vec<Transaction>> {
        transaction::Entity::find()
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(transaction_from_row)
            .collect()
    }

    async fn transactions_for_month(&self, month: MonthKey) -> Result<Vec<Transaction>> {
        transaction::Entity::find()
            .filter(transaction::Column::Month.eq(month.to_string()))
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(transaction_from_row)
            .collect()
    }

    async fn create_income_source(&self, token: &str, record: &IncomeSource) -> Result<String> {
        if let Some(existing) = income_source::Entity::find()
            .filter(income_source::Column::ClientToken.eq(token))
            .one(&self.db)
            .await
            .map_err(db_err)?
        {
            return Ok(existing.id);
        }
        let id = new_canonical_id();
        let model = income_source::ActiveModel {
            id: Set(id.clone()),
            client_token: Set(token.to_string()),
            month: Set(record.month.to_string()),
            name: Set(record.name.clone()),
            amount_cents: Set(record.amount.cents()),
            frequency: Set(frequency_str(record.frequency).to_string()),
        };
        income_source::Entity::insert(model)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    async fn update_income_source(&self, id: &str, record: &IncomeSource) -> Result<()> {
        let row = income_source::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound {
                entity: "income source",
                id: id.to_string(),
            })?;
        let mut model: income_source::ActiveModel = row.into();
        model.month = Set(record.month.to_string());
        model.name = Set(record.name.clone());
        model.amount_cents = Set(record.amount.cents());
        model.frequency = Set(frequency_str(record.frequency).to_string());
        sea_orm::ActiveModelTrait::update(model, &self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_income_source(&self, id: &str) -> Result<()> {
        income_source::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_income_sources(&self) -> Result<Vec<IncomeSource>> {
        income_source::Entity::find()
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(income_source_from_row)
            .collect()
    }

    async fn create_allocation(&self, token: &str, record: &Allocation) -> Result<String> {
        if let Some(existing) = allocation::Entity::find()
            .filter(allocation::Column::ClientToken.eq(token))
            .one(&self.db)
            .await
            .map_err(db_err)?
        {
            return Ok(existing.id);
        }
        let id = new_canonical_id();
        let model = allocation::ActiveModel {
            id: Set(id.clone()),
            client_token: Set(token.to_string()),
            envelope_id: Set(record.envelope_id.clone()),
            month: Set(record.month.to_string()),
            budgeted_cents: Set(record.budgeted.cents()),
        };
        allocation::Entity::insert(model)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    async fn update_allocation(&self, id: &str, record: &Allocation) -> Result<()> {
        let row = allocation::Entity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(db_err)?
            .ok_or_else(|| Error::NotFound {
                entity: "allocation",
                id: id.to_string(),
            })?;
        let mut model: allocation::ActiveModel = row.into();
        model.envelope_id = Set(record.envelope_id.clone());
        model.month = Set(record.month.to_string());
        model.budgeted_cents = Set(record.budgeted.cents());
        sea_orm::ActiveModelTrait::update(model, &self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_allocation(&self, id: &str) -> Result<()> {
        allocation::Entity::delete_by_id(id)
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_allocations(&self) -> Result<Vec<Allocation>> {
        allocation::Entity::find()
            .all(&self.db)
            .await
            .map_err(db_err)?
            .into_iter()
            .map(allocation_from_row)
            .collect()
    }
}

impl ConnectivityProbe for OrmStore {
    async fn is_online(&self) -> bool {
        self.db.ping().await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::model::TransactionKind;

    async fn setup_store() -> OrmStore {
        let store = OrmStore::connect("sqlite::memory:").await.unwrap();
        store.create_tables().await.unwrap();
        store
    }

    fn sample_envelope() -> Envelope {
        Envelope {
            id: "tmp-1".to_string(),
            name: "Groceries".to_string(),
            is_active: true,
            order_index: 0,
            category_id: None,
            is_piggybank: false,
            piggybank: None,
        }
    }

    fn sample_transaction(envelope_id: &str) -> Transaction {
        let month: MonthKey = "2026-02".parse().unwrap();
        Transaction {
            id: "tmp-2".to_string(),
            envelope_id: envelope_id.to_string(),
            amount: Money::from_cents(12_000),
            date: month.start_datetime(),
            month,
            description: "Weekly shop".to_string(),
            kind: TransactionKind::Expense,
            reconciled: false,
            transfer_id: None,
            is_automatic: false,
        }
    }

    #[tokio::test]
    async fn test_create_and_list_envelope_round_trip() {
        let store = setup_store().await;
        let record = sample_envelope();

        let id = store.create_envelope("tmp-1", &record).await.unwrap();
        assert!(!id.starts_with("tmp-"));

        let listed = store.list_envelopes().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].name, "Groceries");
    }

    #[tokio::test]
    async fn test_create_dedupes_on_client_token() {
        // A create retried after a timed-out confirm must resolve to the
        // existing row, never duplicate it.
        let store = setup_store().await;
        let record = sample_envelope();

        let first = store.create_envelope("tmp-1", &record).await.unwrap();
        let second = store.create_envelope("tmp-1", &record).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.list_envelopes().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_piggybank_columns_round_trip() {
        let store = setup_store().await;
        let record = Envelope {
            id: "tmp-1".to_string(),
            name: "Vacation Fund".to_string(),
            is_active: true,
            order_index: 3,
            category_id: Some("savings".to_string()),
            is_piggybank: true,
            piggybank: Some(PiggybankConfig {
                target_amount: Some(Money::from_cents(100_000)),
                monthly_contribution: Money::from_cents(10_000),
                color: "#ff9800".to_string(),
                paused: false,
                created_month: "2026-01".parse().unwrap(),
            }),
        };

        store.create_envelope("tmp-1", &record).await.unwrap();
        let listed = store.list_envelopes().await.unwrap();
        let config = listed[0].piggybank_config().unwrap();
        assert_eq!(config.target_amount, Some(Money::from_cents(100_000)));
        assert_eq!(config.created_month.to_string(), "2026-01");
    }

    #[tokio::test]
    async fn test_transaction_month_equality_query() {
        let store = setup_store().await;
        let envelope_id = store
            .create_envelope("tmp-1", &sample_envelope())
            .await
            .unwrap();

        let february = sample_transaction(&envelope_id);
        let mut march = sample_transaction(&envelope_id);
        march.month = "2026-03".parse().unwrap();
        march.date = march.month.start_datetime();

        store.create_transaction("tmp-2", &february).await.unwrap();
        store.create_transaction("tmp-3", &march).await.unwrap();

        let found = store
            .transactions_for_month("2026-02".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].month.to_string(), "2026-02");
    }

    #[tokio::test]
    async fn test_update_transaction_replaces_fields() {
        let store = setup_store().await;
        let envelope_id = store
            .create_envelope("tmp-1", &sample_envelope())
            .await
            .unwrap();
        let mut record = sample_transaction(&envelope_id);
        let id = store.create_transaction("tmp-2", &record).await.unwrap();

        record.amount = Money::from_cents(4_500);
        record.description = "corrected".to_string();
        store.update_transaction(&id, &record).await.unwrap();

        let listed = store.list_transactions().await.unwrap();
        assert_eq!(listed[0].amount, Money::from_cents(4_500));
        assert_eq!(listed[0].description, "corrected");
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = setup_store().await;
        let result = store
            .update_transaction("ghost", &sample_transaction("e"))
            .await;
        assert!(matches!(
            result,
            Err(Error::NotFound {
                entity: "transaction",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = setup_store().await;
        let envelope_id = store
            .create_envelope("tmp-1", &sample_envelope())
            .await
            .unwrap();
        let id = store
            .create_transaction("tmp-2", &sample_transaction(&envelope_id))
            .await
            .unwrap();

        store.delete_transaction(&id).await.unwrap();
        // deleting an already-absent record still succeeds
        store.delete_transaction(&id).await.unwrap();
        assert!(store.list_transactions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_income_source_and_allocation_round_trip() {
        let store = setup_store().await;
        let envelope_id = store
            .create_envelope("tmp-1", &sample_envelope())
            .await
            .unwrap();
        let month: MonthKey = "2026-02".parse().unwrap();

        let source = IncomeSource {
            id: "tmp-2".to_string(),
            month,
            name: "Salary".to_string(),
            amount: Money::from_cents(300_000),
            frequency: crate::model::Frequency::Monthly,
        };
        store.create_income_source("tmp-2", &source).await.unwrap();

        let record = Allocation {
            id: "tmp-3".to_string(),
            envelope_id,
            month,
            budgeted: Money::from_cents(50_000),
        };
        store.create_allocation("tmp-3", &record).await.unwrap();

        let sources = store.list_income_sources().await.unwrap();
        let allocations = store.list_allocations().await.unwrap();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].amount, Money::from_cents(300_000));
        assert_eq!(allocations.len(), 1);
        assert_eq!(allocations[0].budgeted, Money::from_cents(50_000));
    }
}
