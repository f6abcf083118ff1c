//! Locally tracked addresses and the "balance changed" flag they raise.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Process-wide flag raised when the spendable balance of a watched address
/// changes. Consumers clear it with [`BalanceFlag::take`].
#[derive(Clone, Debug, Default)]
pub struct BalanceFlag(Arc<AtomicBool>);

impl BalanceFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Read and clear.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Addresses whose balance the operator wants to hear about.
#[derive(Clone, Debug, Default)]
pub struct WatchList {
    addresses: HashSet<String>,
    flag: BalanceFlag,
}

impl WatchList {
    pub fn new<I, S>(addresses: I, flag: BalanceFlag) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            flag,
        }
    }

    pub fn watches(&self, address: &str) -> bool {
        self.addresses.contains(address)
    }

    pub fn flag(&self) -> &BalanceFlag {
        &self.flag
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}
