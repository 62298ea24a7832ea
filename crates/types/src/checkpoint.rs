use crate::scalars::{Amount, Version};
use serde::{Deserialize, Serialize};

/// A single checkpoint: "as of `version`, the tracked quantity equals
/// `value`".
///
/// Checkpoints for one key form a sequence strictly increasing in
/// `version`; only the final entry of a sequence may be overwritten in
/// place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: Version,
    pub value: Amount,
}

impl Checkpoint {
    pub fn new(version: Version, value: Amount) -> Self {
        Self { version, value }
    }
}
