//! Order-number allocation from a named, row-locked sequence.

use crate::{
    entities::{number_sequence, NumberSequence},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, EntityTrait, QuerySelect, Set};

/// Allocates the next value of the named sequence on the caller's
/// transaction. The sequence row is read `FOR UPDATE`, so concurrent
/// allocations serialize and never hand out the same number. A missing
/// sequence starts at 1.
pub async fn next(txn: &DatabaseTransaction, key: &str) -> Result<i64, ServiceError> {
    let row = NumberSequence::find_by_id(key.to_string())
        .lock_exclusive()
        .one(txn)
        .await?;

    match row {
        Some(row) => {
            let value = row.next_value;
            let mut active: number_sequence::ActiveModel = row.into();
            active.next_value = Set(value + 1);
            active.updated_at = Set(Utc::now());
            active.update(txn).await?;
            Ok(value)
        }
        None => {
            number_sequence::ActiveModel {
                key: Set(key.to_string()),
                next_value: Set(2),
                updated_at: Set(Utc::now()),
            }
            .insert(txn)
            .await?;
            Ok(1)
        }
    }
}
