//! Turn and price budgets for a run.

use hacxgent_core::error::ConversationLimit;
use hacxgent_core::model::ModelConfig;
use hacxgent_core::provider::Usage;
use serde::{Deserialize, Serialize};

/// Caller-supplied ceilings; `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub max_turns: Option<u32>,
    /// USD
    pub max_price: Option<f64>,
}

impl Limits {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    pub fn with_max_price(mut self, max_price: f64) -> Self {
        self.max_price = Some(max_price);
        self
    }
}

/// Running totals checked before every backend round-trip.
#[derive(Debug, Clone, Default)]
pub struct Budget {
    limits: Limits,
    turns_used: u32,
    spent: f64,
    usage: Usage,
}

impl Budget {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    /// Fails if the next round-trip would exceed a limit.
    ///
    /// The price check projects the prompt cost of the next call on top of
    /// what has been spent so far.
    pub fn check(
        &self,
        model: &ModelConfig,
        estimated_prompt_tokens: usize,
    ) -> Result<(), ConversationLimit> {
        if let Some(max_turns) = self.limits.max_turns
            && self.turns_used >= max_turns
        {
            return Err(ConversationLimit::MaxTurns { max_turns });
        }
        self.check_price(model, estimated_prompt_tokens)
    }

    /// The price half of [`Self::check`], for calls that are not turns.
    pub fn check_price(
        &self,
        model: &ModelConfig,
        estimated_prompt_tokens: usize,
    ) -> Result<(), ConversationLimit> {
        if let Some(max_price) = self.limits.max_price {
            let projected =
                self.spent + estimated_prompt_tokens as f64 * model.input_price / 1_000_000.0;
            if projected > max_price {
                return Err(ConversationLimit::MaxPrice {
                    max_price,
                    projected,
                });
            }
        }
        Ok(())
    }

    /// Account for one finished round-trip.
    pub fn record(&mut self, model: &ModelConfig, usage: Usage) {
        self.turns_used += 1;
        self.record_extra(model, usage);
    }

    /// Account for spend outside a turn, such as a compaction summary.
    pub fn record_extra(&mut self, model: &ModelConfig, usage: Usage) {
        self.spent += model.cost(usage.prompt_tokens, usage.completion_tokens);
        self.usage.add(usage);
    }

    pub fn turns_used(&self) -> u32 {
        self.turns_used
    }

    pub fn spent(&self) -> f64 {
        self.spent
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    /// Zero the counters, keeping the limits.
    pub fn reset(&mut self) {
        *self = Self::new(self.limits);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::model;

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    #[test]
    fn unlimited_never_stops() {
        let mut budget = Budget::new(Limits::unlimited());
        let m = model(5.0, 5.0);
        for _ in 0..100 {
            budget.record(&m, usage(1000, 1000));
        }
        assert!(budget.check(&m, 1_000_000).is_ok());
    }

    #[test]
    fn turn_limit_applies_before_the_next_round_trip() {
        let mut budget = Budget::new(Limits::unlimited().with_max_turns(3));
        let m = model(0.0, 0.0);
        for _ in 0..3 {
            assert!(budget.check(&m, 10).is_ok());
            budget.record(&m, usage(10, 5));
        }
        assert_eq!(
            budget.check(&m, 10),
            Err(ConversationLimit::MaxTurns { max_turns: 3 })
        );
        assert_eq!(budget.usage().total(), 45);
    }

    #[test]
    fn price_projection_includes_next_prompt() {
        let mut budget = Budget::new(Limits::unlimited().with_max_price(0.01));
        let m = model(2.0, 8.0);
        budget.record(&m, usage(1_000, 500));
        assert!((budget.spent() - 0.006).abs() < 1e-12);

        assert!(budget.check(&m, 1_000).is_ok());
        match budget.check(&m, 3_000) {
            Err(ConversationLimit::MaxPrice { projected, .. }) => {
                assert!((projected - 0.012).abs() < 1e-12)
            }
            other => panic!("expected price limit, got {other:?}"),
        }
    }

    #[test]
    fn extra_spend_counts_against_price_but_not_turns() {
        let mut budget =
            Budget::new(Limits::unlimited().with_max_turns(1).with_max_price(0.5));
        let m = model(1.0, 1.0);
        budget.record_extra(&m, usage(1_000_000, 0));

        assert_eq!(budget.turns_used(), 0);
        assert!((budget.spent() - 1.0).abs() < 1e-12);
        assert_eq!(budget.usage().prompt_tokens, 1_000_000);
        assert!(matches!(
            budget.check_price(&m, 0),
            Err(ConversationLimit::MaxPrice { .. })
        ));
        assert!(matches!(
            budget.check(&m, 0),
            Err(ConversationLimit::MaxPrice { .. })
        ));
    }

    #[test]
    fn reset_keeps_limits() {
        let mut budget = Budget::new(Limits::unlimited().with_max_turns(1));
        budget.record(&model(0.0, 0.0), usage(1, 1));
        budget.reset();
        assert_eq!(budget.turns_used(), 0);
        assert_eq!(budget.limits().max_turns, Some(1));
    }
}
