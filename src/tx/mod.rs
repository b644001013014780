//! Transaction management.
//!
//! Every mutating repository operation runs in exactly one `ReadWrite`
//! transaction: read the current places, compute, write back, commit.

use serde::{Deserialize, Serialize};

/// Transaction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxMode {
    ReadOnly,
    ReadWrite,
}

impl TxMode {
    pub fn allows_writes(self) -> bool {
        matches!(self, TxMode::ReadWrite)
    }
}

/// Opaque transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(pub u64);

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx{}", self.0)
    }
}

/// Transaction trait that all backends must implement.
pub trait Transaction: Send + Sync {
    fn mode(&self) -> TxMode;
    fn id(&self) -> TxId;
}
