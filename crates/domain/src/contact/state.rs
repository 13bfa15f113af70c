//! Captured contact state.

use serde::{Deserialize, Serialize};

/// Domain fields of a contact, as stored in its snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactState {
    pub name: String,
    pub city: String,
    pub address: String,
    pub country: String,
    #[serde(default)]
    pub deleted: bool,
}
