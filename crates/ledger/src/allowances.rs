use std::collections::HashMap;
use tally_types::{Address, Amount};

/// Owner → spender spend-allowance table.
///
/// Standard bookkeeping, independent of the checkpoint machinery: the table
/// tracks current grants only and keeps no history.
#[derive(Debug, Clone, Default)]
pub struct AllowanceTable {
    grants: HashMap<(Address, Address), Amount>,
}

impl AllowanceTable {
    pub fn from_grants(grants: HashMap<(Address, Address), Amount>) -> Self {
        Self { grants }
    }

    pub fn allowance(&self, owner: &Address, spender: &Address) -> Amount {
        self.grants.get(&(*owner, *spender)).copied().unwrap_or(0)
    }

    pub fn set(&mut self, owner: Address, spender: Address, amount: Amount) {
        if amount == 0 {
            self.grants.remove(&(owner, spender));
        } else {
            self.grants.insert((owner, spender), amount);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address([byte; 32])
    }

    #[test]
    fn missing_grant_is_zero() {
        let table = AllowanceTable::default();
        assert_eq!(table.allowance(&addr(1), &addr(2)), 0);
    }

    #[test]
    fn set_replaces_existing_grant() {
        let mut table = AllowanceTable::default();
        table.set(addr(1), addr(2), 100);
        table.set(addr(1), addr(2), 70);
        assert_eq!(table.allowance(&addr(1), &addr(2)), 70);
    }

    #[test]
    fn zero_grant_clears_entry() {
        let mut table = AllowanceTable::default();
        table.set(addr(1), addr(2), 5);
        table.set(addr(1), addr(2), 0);
        assert_eq!(table.allowance(&addr(1), &addr(2)), 0);
    }
}
