//! Wallet accounts, keycards and saved addresses, all synced to our other
//! installations, plus the locally cached balances.

use chrono::Utc;
use tracing::{debug, info};

use parley_shared::protocol::{Keycard, SavedAddress, WalletAccount};
use parley_store::{TransactionToValidate, WalletBalance};

use crate::error::CoreError;
use crate::messenger::Messenger;
use crate::response::MessengerResponse;
use crate::wallet::BalanceSource;

impl Messenger {
    pub fn save_wallet_account(&self, account: WalletAccount) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if account.address.is_empty() {
            return Err(CoreError::Validation("wallet account without address".into()));
        }
        let last = self.db().wallet_account(&account.address)?.map_or(0, |a| a.clock);
        self.store_wallet_account(WalletAccount {
            clock: self.clock.next(last).0,
            ..account
        })
    }

    /// Tombstone the account at `address`.
    pub fn delete_wallet_account(&self, address: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let account = self
            .db()
            .wallet_account(address)?
            .ok_or_else(|| CoreError::not_found("wallet account", address))?;
        let clock = self.clock.next(account.clock).0;
        self.store_wallet_account(WalletAccount {
            removed: true,
            clock,
            ..account
        })
    }

    pub fn save_keycard(&self, keycard: Keycard) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if keycard.keycard_uid.is_empty() {
            return Err(CoreError::Validation("keycard without uid".into()));
        }
        let last = self.db().keycard(&keycard.keycard_uid)?.map_or(0, |k| k.clock);
        self.store_keycard(Keycard {
            clock: self.clock.next(last).0,
            ..keycard
        })
    }

    pub fn delete_keycard(&self, keycard_uid: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let keycard = self
            .db()
            .keycard(keycard_uid)?
            .ok_or_else(|| CoreError::not_found("keycard", keycard_uid))?;
        let clock = self.clock.next(keycard.clock).0;
        self.store_keycard(Keycard {
            removed: true,
            clock,
            ..keycard
        })
    }

    pub fn save_saved_address(&self, saved: SavedAddress) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        if saved.address.is_empty() {
            return Err(CoreError::Validation("saved address without address".into()));
        }
        let last = self
            .db()
            .saved_address(&saved.address)?
            .map_or(0, |s| s.update_clock);
        self.store_saved_address(SavedAddress {
            update_clock: self.clock.next(last).0,
            ..saved
        })
    }

    pub fn delete_saved_address(&self, address: &str) -> Result<MessengerResponse, CoreError> {
        let _guard = self.lock_state();
        let saved = self
            .db()
            .saved_address(address)?
            .ok_or_else(|| CoreError::not_found("saved address", address))?;
        let update_clock = self.clock.next(saved.update_clock).0;
        self.store_saved_address(SavedAddress {
            removed: true,
            update_clock,
            ..saved
        })
    }

    /// Fetch balances for every live account and cache them. Returns how
    /// many balances were stored.
    ///
    /// The source is queried without holding the state lock.
    pub fn refresh_wallet_balances(&self, source: &dyn BalanceSource) -> Result<usize, CoreError> {
        let addresses: Vec<String> = self
            .db()
            .wallet_accounts()?
            .into_iter()
            .filter(|a| !a.removed)
            .map(|a| a.address)
            .collect();
        if addresses.is_empty() {
            return Ok(0);
        }

        let balances = source.fetch_balances(&addresses)?;
        let now = Utc::now();
        let db = self.db();
        for (address, balance) in &balances {
            db.save_wallet_balance(address, balance, now)?;
        }
        debug!(accounts = addresses.len(), stored = balances.len(), "Wallet balances refreshed");
        Ok(balances.len())
    }

    pub fn wallet_balance(&self, address: &str) -> Result<Option<WalletBalance>, CoreError> {
        Ok(self.db().wallet_balance(address)?)
    }

    pub fn wallet_accounts(&self) -> Result<Vec<WalletAccount>, CoreError> {
        Ok(self.db().wallet_accounts()?)
    }

    // -- transactions awaiting validation ------------------------------------

    pub fn save_transaction_to_validate(&self, tx: &TransactionToValidate) -> Result<(), CoreError> {
        Ok(self.db().save_transaction_to_validate(tx)?)
    }

    pub fn transactions_to_validate(&self) -> Result<Vec<TransactionToValidate>, CoreError> {
        Ok(self.db().transactions_to_validate()?)
    }

    pub fn delete_transaction_to_validate(&self, transaction_hash: &str) -> Result<bool, CoreError> {
        Ok(self.db().delete_transaction_to_validate(transaction_hash)?)
    }

    // -- helpers -------------------------------------------------------------

    fn store_wallet_account(&self, account: WalletAccount) -> Result<MessengerResponse, CoreError> {
        self.db().save_wallet_account(&account)?;
        self.sync_wallet_accounts(vec![account.clone()])?;
        info!(address = %account.address, removed = account.removed, "Wallet account stored");
        let mut response = MessengerResponse::default();
        response.wallet_accounts.insert(account.address.clone(), account);
        Ok(response)
    }

    fn store_keycard(&self, keycard: Keycard) -> Result<MessengerResponse, CoreError> {
        self.db().save_keycard(&keycard)?;
        self.sync_keycards(vec![keycard.clone()])?;
        let mut response = MessengerResponse::default();
        response.keycards.insert(keycard.keycard_uid.clone(), keycard);
        Ok(response)
    }

    fn store_saved_address(&self, saved: SavedAddress) -> Result<MessengerResponse, CoreError> {
        self.db().save_saved_address(&saved)?;
        self.sync_saved_address(saved.clone())?;
        let mut response = MessengerResponse::default();
        response.saved_addresses.insert(saved.address.clone(), saved);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use crate::testkit::TestNet;
    use crate::wallet::FixedBalances;
    use parley_shared::protocol::{Keycard, SavedAddress, WalletAccount};

    fn account(address: &str, name: &str) -> WalletAccount {
        WalletAccount {
            address: address.into(),
            name: name.into(),
            ..WalletAccount::default()
        }
    }

    #[test]
    fn test_accounts_sync_to_paired_installation() {
        let net = TestNet::new();
        let phone = net.device("alice-phone");
        let laptop = net.paired_device(&phone, "alice-laptop");

        phone.messenger.save_wallet_account(account("0xabc", "main")).unwrap();
        phone
            .messenger
            .save_keycard(Keycard {
                keycard_uid: "card-1".into(),
                name: "blue".into(),
                ..Keycard::default()
            })
            .unwrap();
        phone
            .messenger
            .save_saved_address(SavedAddress {
                address: "0xdef".into(),
                name: "rent".into(),
                ..SavedAddress::default()
            })
            .unwrap();

        let response = laptop.messenger.retrieve_all().unwrap();
        assert_eq!(response.wallet_accounts["0xabc"].name, "main");
        assert_eq!(response.keycards["card-1"].name, "blue");
        assert_eq!(response.saved_addresses["0xdef"].name, "rent");

        net.advance(1_000);
        phone.messenger.delete_wallet_account("0xabc").unwrap();
        let response = laptop.messenger.retrieve_all().unwrap();
        assert!(response.wallet_accounts["0xabc"].removed);
    }

    #[test]
    fn test_edits_raise_clock_and_validate_input() {
        let net = TestNet::new();
        let phone = net.device("alice-phone");

        let first = phone.messenger.save_wallet_account(account("0xabc", "main")).unwrap();
        let second = phone.messenger.save_wallet_account(account("0xabc", "savings")).unwrap();
        assert!(second.wallet_accounts["0xabc"].clock > first.wallet_accounts["0xabc"].clock);

        assert!(phone.messenger.save_wallet_account(account("", "nameless")).is_err());
        assert!(phone.messenger.delete_keycard("missing").is_err());
        assert!(phone.messenger.delete_saved_address("0x000").is_err());
    }

    #[test]
    fn test_refresh_skips_removed_accounts() {
        let net = TestNet::new();
        let phone = net.device("alice-phone");
        phone.messenger.save_wallet_account(account("0xabc", "main")).unwrap();
        phone.messenger.save_wallet_account(account("0xold", "old")).unwrap();
        phone.messenger.delete_wallet_account("0xold").unwrap();

        let source = FixedBalances::new();
        source.set("0xabc", "42");
        source.set("0xold", "7");
        assert_eq!(phone.messenger.refresh_wallet_balances(&source).unwrap(), 1);

        let balance = phone.messenger.wallet_balance("0xabc").unwrap().unwrap();
        assert_eq!(balance.balance, "42");
        assert!(phone.messenger.wallet_balance("0xold").unwrap().is_none());
    }
}
