//! Work items for the analysis queue.

use std::cmp::Ordering;

use ravel_core::Data;

/// A queued request: decode code at an address, or analyze a datum.
///
/// Items order by address ascending; at the same address, code work
/// runs before data work. The data payload does not participate in the
/// ordering.
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// Target address.
    pub address: u64,
    /// `None` means "decode code here"; `Some` carries the datum to
    /// analyze.
    pub data: Option<Data>,
}

impl WorkItem {
    /// Creates a code work item.
    pub fn code(address: u64) -> Self {
        Self {
            address,
            data: None,
        }
    }

    /// Creates a data work item.
    pub fn data(data: Data) -> Self {
        Self {
            address: data.address(),
            data: Some(data),
        }
    }

    /// Returns true for code work.
    pub fn is_code(&self) -> bool {
        self.data.is_none()
    }

    fn rank(&self) -> u8 {
        if self.data.is_none() {
            0
        } else {
            1
        }
    }
}

impl Ord for WorkItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address
            .cmp(&other.address)
            .then_with(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialOrd for WorkItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for WorkItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for WorkItem {}
