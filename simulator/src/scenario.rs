//! Simulation scenarios.

use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Opening balance of every asset for every trader.
    #[serde(default = "default_opening_balance")]
    pub opening_balance: String,
    /// Steps in the scenario.
    pub steps: Vec<ScenarioStep>,
}

fn default_opening_balance() -> String {
    "100".to_string()
}

/// A step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ScenarioStep {
    /// Wait for a duration.
    Wait { millis: u64 },
    /// Place an order; `label` names it for later steps.
    PlaceOrder {
        label: String,
        trader: String,
        from: String,
        to: String,
        amount: String,
        /// Expect the placement to be rejected.
        #[serde(default)]
        expect_rejection: bool,
    },
    /// Cancel a labelled order.
    CancelOrder { label: String, trader: String },
    /// Re-run settlement for a labelled order.
    Resettle { label: String },
    /// Inject a fault.
    InjectFault { fault_type: FaultType },
    /// Clear all faults.
    ClearFaults,
    /// Assert a condition.
    Assert { condition: AssertCondition },
}

/// Types of faults that can be injected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FaultType {
    /// Every ledger operation fails.
    LedgerOffline,
    /// Every order store operation fails.
    OrderStoreOffline,
    /// Both stores answer slowly.
    StoreLatency { delay_ms: u64 },
    /// The next ledger writes fail.
    FailAdjustments { count: u32 },
    /// Writes to one trader's balances fail.
    FreezeAccount { trader: String },
}

/// Conditions that can be asserted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AssertCondition {
    /// Trader balance equals.
    BalanceEquals {
        trader: String,
        asset: String,
        amount: String,
    },
    /// Labelled order has a status and settled amount.
    OrderState {
        label: String,
        status: String,
        settled: String,
    },
    /// Labelled order no longer exists.
    OrderRemoved { label: String },
    /// Pending volume on a pair, at reporting scale.
    BacklogEquals { pair: String, amount: String },
    /// Ledger and journal agree and every fill landed on both sides.
    Conserved,
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file by path.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "escrow-only" => Ok(Self::escrow_only()),
            "partial-fill" => Ok(Self::partial_fill()),
            "cancel-partial" => Ok(Self::cancel_partial()),
            "same-asset" => Ok(Self::same_asset()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            path if path.ends_with(".json") => {
                let raw = std::fs::read_to_string(path)?;
                Ok(serde_json::from_str(&raw)?)
            }
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Names of the built-in scenarios.
    pub fn builtin() -> [&'static str; 5] {
        [
            "escrow-only",
            "partial-fill",
            "cancel-partial",
            "same-asset",
            "failure-recovery",
        ]
    }

    fn place(label: &str, trader: &str, from: &str, to: &str, amount: &str) -> ScenarioStep {
        ScenarioStep::PlaceOrder {
            label: label.to_string(),
            trader: trader.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            amount: amount.to_string(),
            expect_rejection: false,
        }
    }

    fn balance(trader: &str, asset: &str, amount: &str) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::BalanceEquals {
                trader: trader.to_string(),
                asset: asset.to_string(),
                amount: amount.to_string(),
            },
        }
    }

    fn state(label: &str, status: &str, settled: &str) -> ScenarioStep {
        ScenarioStep::Assert {
            condition: AssertCondition::OrderState {
                label: label.to_string(),
                status: status.to_string(),
                settled: settled.to_string(),
            },
        }
    }

    /// An order with no counter side only escrows.
    fn escrow_only() -> Self {
        Self {
            name: "escrow-only".to_string(),
            description: "Unmatched order stays pending with its escrow taken".to_string(),
            opening_balance: "100".to_string(),
            steps: vec![
                Self::place("p1", "P", "STABLE-A", "NATIVE", "40"),
                Self::state("p1", "pending", "0"),
                Self::balance("P", "STABLE-A", "60"),
                ScenarioStep::Assert {
                    condition: AssertCondition::BacklogEquals {
                        pair: "STABLE-A->NATIVE".to_string(),
                        amount: "40.00".to_string(),
                    },
                },
                ScenarioStep::Assert {
                    condition: AssertCondition::Conserved,
                },
            ],
        }
    }

    /// A larger order partially consumes a smaller counter-order.
    fn partial_fill() -> Self {
        Self {
            name: "partial-fill".to_string(),
            description: "Counter-order completes, initiator stays partial".to_string(),
            opening_balance: "100".to_string(),
            steps: vec![
                Self::place("q1", "Q", "NATIVE", "STABLE-A", "30"),
                Self::place("p1", "P", "STABLE-A", "NATIVE", "40"),
                Self::state("q1", "done", "30"),
                Self::state("p1", "partial", "30"),
                Self::balance("Q", "STABLE-A", "130"),
                Self::balance("Q", "NATIVE", "70"),
                Self::balance("P", "NATIVE", "100"),
                Self::balance("P", "STABLE-A", "60"),
                ScenarioStep::Assert {
                    condition: AssertCondition::Conserved,
                },
            ],
        }
    }

    /// Cancelling a partial order credits what settled.
    fn cancel_partial() -> Self {
        let mut scenario = Self::partial_fill();
        scenario.name = "cancel-partial".to_string();
        scenario.description = "Cancel credits the settled part and forfeits the rest".to_string();
        scenario.steps.extend([
            ScenarioStep::CancelOrder {
                label: "p1".to_string(),
                trader: "P".to_string(),
            },
            Self::state("p1", "done", "30"),
            Self::balance("P", "NATIVE", "130"),
            Self::balance("P", "STABLE-A", "60"),
            ScenarioStep::Assert {
                condition: AssertCondition::BacklogEquals {
                    pair: "STABLE-A->NATIVE".to_string(),
                    amount: "0.00".to_string(),
                },
            },
        ]);
        scenario
    }

    /// Same-asset conversion is refused before anything moves.
    fn same_asset() -> Self {
        Self {
            name: "same-asset".to_string(),
            description: "Same-asset placement is rejected".to_string(),
            opening_balance: "100".to_string(),
            steps: vec![
                ScenarioStep::PlaceOrder {
                    label: "p1".to_string(),
                    trader: "P".to_string(),
                    from: "STABLE-A".to_string(),
                    to: "STABLE-A".to_string(),
                    amount: "10".to_string(),
                    expect_rejection: true,
                },
                Self::balance("P", "STABLE-A", "100"),
            ],
        }
    }

    /// A counter credit fails mid-settlement and is resumed.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Interrupted settlement resumes without double credit".to_string(),
            opening_balance: "100".to_string(),
            steps: vec![
                Self::place("q1", "Q", "NATIVE", "STABLE-B", "25"),
                ScenarioStep::InjectFault {
                    fault_type: FaultType::FreezeAccount {
                        trader: "Q".to_string(),
                    },
                },
                Self::place("p1", "P", "STABLE-B", "NATIVE", "25"),
                Self::state("q1", "done", "25"),
                Self::balance("Q", "STABLE-B", "100"),
                ScenarioStep::ClearFaults,
                ScenarioStep::Resettle {
                    label: "q1".to_string(),
                },
                ScenarioStep::Resettle {
                    label: "p1".to_string(),
                },
                ScenarioStep::Resettle {
                    label: "q1".to_string(),
                },
                Self::balance("Q", "STABLE-B", "125"),
                Self::balance("P", "NATIVE", "125"),
                ScenarioStep::Assert {
                    condition: AssertCondition::Conserved,
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scenarios_load() {
        for name in Scenario::builtin() {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert!(!scenario.steps.is_empty());
        }
        assert!(Scenario::load("no-such-scenario").is_err());
    }

    #[test]
    fn test_scenario_json_shape() {
        let json = r#"{
            "name": "custom",
            "description": "from file",
            "steps": [
                {"PlaceOrder": {"label": "a", "trader": "P", "from": "NATIVE", "to": "STABLE-B", "amount": "5"}},
                {"Wait": {"millis": 10}},
                {"Assert": {"condition": "Conserved"}}
            ]
        }"#;
        let scenario: Scenario = serde_json::from_str(json).unwrap();
        assert_eq!(scenario.opening_balance, "100");
        assert_eq!(scenario.steps.len(), 3);
        assert!(matches!(
            &scenario.steps[0],
            ScenarioStep::PlaceOrder { expect_rejection: false, .. }
        ));
    }
}
