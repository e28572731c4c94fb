use serde::{Deserialize, Serialize};

/// What the sinogram decoder does with a leaf pair whose midpoint lands
/// outside `[1, numberOfProjections]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MidpointPolicy {
    /// Fail the decode with a format error naming the offending pair.
    #[default]
    Reject,
    /// Pull the column back to the nearest valid projection.
    Clamp,
    /// Skip the pair.
    Drop,
}
