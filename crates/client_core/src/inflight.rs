use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use ethers::types::Address;

use crate::error::{FlowError, Step};

/// Tracks value-bearing submissions that are still awaiting an outcome, one per account.
#[derive(Clone, Default)]
pub struct InflightRegistry {
    pending: Arc<Mutex<HashMap<Address, Step>>>,
}

impl InflightRegistry {
    pub fn try_acquire(&self, account: Address, step: Step) -> Result<InflightGuard, FlowError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = pending.get(&account) {
            return Err(FlowError::AlreadyPending(*existing));
        }
        pending.insert(account, step);
        Ok(InflightGuard {
            pending: Arc::clone(&self.pending),
            account,
        })
    }

    pub fn pending_step(&self, account: Address) -> Option<Step> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&account)
            .copied()
    }
}

/// Releases the account's slot when dropped, i.e. once the outcome is known.
pub struct InflightGuard {
    pending: Arc<Mutex<HashMap<Address, Step>>>,
    account: Address,
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.account);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_for_same_account_is_rejected_until_release() {
        let registry = InflightRegistry::default();
        let account = Address::repeat_byte(0x11);

        let guard = registry.try_acquire(account, Step::Pay).expect("first");
        assert_eq!(
            registry.try_acquire(account, Step::Claim).err(),
            Some(FlowError::AlreadyPending(Step::Pay))
        );
        assert!(registry
            .try_acquire(Address::repeat_byte(0x22), Step::Pay)
            .is_ok());

        drop(guard);
        assert_eq!(registry.pending_step(account), None);
        assert!(registry.try_acquire(account, Step::Claim).is_ok());
    }
}
