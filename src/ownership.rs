//! The record of ownership moves the compiler observed.
//!
//! Each entry says which name gave up a heap value and which name (a variable, a function
//! receiving an argument, or a function returning a value) took it. The log is diagnostic
//! only; the VM never reads it. It serialises to a JSON array for external visualisers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipTransfer {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnershipLog {
    transfers: Vec<OwnershipTransfer>,
}

impl OwnershipLog {
    pub fn new() -> Self {
        OwnershipLog::default()
    }

    pub(crate) fn record(&mut self, from: &str, to: &str) {
        self.transfers.push(OwnershipTransfer {
            from: from.to_owned(),
            to: to.to_owned(),
        });
    }

    pub fn transfers(&self) -> &[OwnershipTransfer] {
        &self.transfers
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    /// `(from, to)` pairs, for compact assertions
    pub fn pairs(&self) -> Vec<(&str, &str)> {
        self.transfers
            .iter()
            .map(|t| (t.from.as_str(), t.to.as_str()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string(self)
            .map_err(|e| Error::Internal(format!("cannot serialise ownership log: {e}")))
    }
}

impl fmt::Display for OwnershipLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for transfer in &self.transfers {
            writeln!(f, "{} -> {}", transfer.from, transfer.to)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_json_export() {
        let mut log = OwnershipLog::new();
        log.record("x", "f");
        log.record("f", "y");

        assert_eq!(
            log.to_json().unwrap(),
            r#"[{"from":"x","to":"f"},{"from":"f","to":"y"}]"#
        );
        let back: OwnershipLog = serde_json::from_str(&log.to_json().unwrap()).unwrap();
        assert_eq!(back, log);
        assert_eq!(log.to_string(), "x -> f\nf -> y\n");
        assert_eq!(log.pairs(), vec![("x", "f"), ("f", "y")]);
    }
}
