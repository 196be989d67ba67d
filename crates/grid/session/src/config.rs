use serde::{Deserialize, Serialize};

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Origin string bound into the derivation message.
    #[serde(default = "default_origin")]
    pub origin: String,

    /// Lamports moved to the session wallet by `fund`.
    #[serde(default = "default_fee_reserve_lamports")]
    pub fee_reserve_lamports: u64,

    /// Consecutive unresolved submissions before the user is told the
    /// ledger looks unreachable.
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

fn default_origin() -> String {
    "gridctl://localhost".to_string()
}

fn default_fee_reserve_lamports() -> u64 {
    10_000_000
}

fn default_escalation_threshold() -> u32 {
    3
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            fee_reserve_lamports: default_fee_reserve_lamports(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.fee_reserve_lamports, 10_000_000);
        assert_eq!(config.escalation_threshold, 3);
    }
}
