use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::columns::get_bool;
use crate::database::Database;
use crate::error::Result;
use crate::models::TransactionToValidate;

impl Database {
    pub fn save_transaction_to_validate(&self, tx: &TransactionToValidate) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO transactions_to_validate
                 (transaction_hash, message_id, command_id, source, retry_count, first_seen, validate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tx.transaction_hash,
                tx.message_id,
                tx.command_id,
                tx.from,
                tx.retry_count,
                tx.first_seen.to_rfc3339(),
                tx.validate,
            ],
        )?;
        Ok(())
    }

    /// Transactions still flagged for validation, oldest first.
    pub fn transactions_to_validate(&self) -> Result<Vec<TransactionToValidate>> {
        let mut stmt = self.conn().prepare(
            "SELECT transaction_hash, message_id, command_id, source, retry_count, first_seen, validate
             FROM transactions_to_validate WHERE validate = 1
             ORDER BY first_seen ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, u32>(4)?,
                row.get::<_, String>(5)?,
                get_bool(row, 6)?,
            ))
        })?;

        let mut txs = Vec::new();
        for row in rows {
            let (transaction_hash, message_id, command_id, from, retry_count, first_seen, validate) =
                row?;
            let first_seen: DateTime<Utc> =
                DateTime::parse_from_rfc3339(&first_seen)?.with_timezone(&Utc);
            txs.push(TransactionToValidate {
                transaction_hash,
                message_id,
                command_id,
                from,
                retry_count,
                first_seen,
                validate,
            });
        }
        Ok(txs)
    }

    pub fn delete_transaction_to_validate(&self, transaction_hash: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM transactions_to_validate WHERE transaction_hash = ?1",
            params![transaction_hash],
        )?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_flagged_transactions_are_listed() {
        let db = Database::open_in_memory().unwrap();
        let pending = TransactionToValidate {
            transaction_hash: "0x01".into(),
            message_id: "m1".into(),
            command_id: "c1".into(),
            from: "aa".into(),
            retry_count: 0,
            first_seen: Utc::now(),
            validate: true,
        };
        let done = TransactionToValidate {
            transaction_hash: "0x02".into(),
            validate: false,
            ..pending.clone()
        };
        db.save_transaction_to_validate(&pending).unwrap();
        db.save_transaction_to_validate(&done).unwrap();

        let listed = db.transactions_to_validate().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].transaction_hash, "0x01");

        assert!(db.delete_transaction_to_validate("0x01").unwrap());
        assert!(db.transactions_to_validate().unwrap().is_empty());
    }
}
