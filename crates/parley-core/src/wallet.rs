//! Wallet balance collaborator.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use crate::error::CoreError;

/// Where wallet balances come from. Balances are decimal strings in the
/// smallest unit.
pub trait BalanceSource: Send + Sync {
    fn fetch_balances(&self, addresses: &[String]) -> Result<HashMap<String, String>, CoreError>;
}

/// Balances held in memory. Unknown addresses are absent from the result.
#[derive(Debug, Default)]
pub struct FixedBalances {
    balances: Mutex<HashMap<String, String>>,
}

impl FixedBalances {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, address: &str, balance: &str) {
        self.balances
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string(), balance.to_string());
    }
}

impl BalanceSource for FixedBalances {
    fn fetch_balances(&self, addresses: &[String]) -> Result<HashMap<String, String>, CoreError> {
        let balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(addresses
            .iter()
            .filter_map(|a| balances.get(a).map(|b| (a.clone(), b.clone())))
            .collect())
    }
}
