use serde::{Deserialize, Serialize};

/// What extraction does once an entry fails verification. There is no
/// default: the caller has to pick one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    /// Materialize every entry that verifies; report the rest.
    BestEffort,
    /// Verify every requested entry first; materialize nothing if any fails.
    /// A write failure after that rolls back what the sink created.
    AllOrNothing,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub failure_mode: FailureMode,
    /// When false, symlink entries are reported as failed instead of created.
    #[serde(default = "default_true")]
    pub allow_symlinks: bool,
}

impl Policy {
    pub fn new(failure_mode: FailureMode) -> Self {
        Self {
            failure_mode,
            allow_symlinks: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Bounds applied while parsing an untrusted manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_entries: Option<u64>,
    /// Upper bound on the sum of all entry sizes.
    pub max_uncompressed: Option<u64>,
}
