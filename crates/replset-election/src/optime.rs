//! Replication log positions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How much replicated data a member has applied.
///
/// Ordered by `secs` first, then by `inc` (the counter of operations
/// within the same second). Two members with equal optimes are tied.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct OpTime {
    /// Seconds component of the timestamp.
    pub secs: u32,
    /// Ordinal of the operation within `secs`.
    pub inc: u32,
}

impl OpTime {
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.secs, self.inc)
    }
}

/// Parses `"secs:inc"` or a bare `"secs"` (inc defaults to 0).
impl FromStr for OpTime {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (secs, inc) = match s.split_once(':') {
            Some((secs, inc)) => (secs, inc),
            None => (s, "0"),
        };
        let secs = secs
            .parse()
            .map_err(|_| format!("invalid optime seconds: '{s}'"))?;
        let inc = inc
            .parse()
            .map_err(|_| format!("invalid optime increment: '{s}'"))?;
        Ok(Self { secs, inc })
    }
}
