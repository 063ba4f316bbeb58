//! Engagement gate.
//!
//! Decides whether a recorded message should lead to a reply. Messages aimed
//! at the assistant always pass; other chatter passes with a probability that
//! depends on how warm the conversation is.

use chatter_common::config::EngagementConfig;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngagementGate {
    /// Percent chance once history reaches the threshold
    warm_probability: u32,
    /// Percent chance while history is shorter than the threshold
    cold_probability: u32,
    warm_history_threshold: usize,
}

impl Default for EngagementGate {
    fn default() -> Self {
        Self::from_config(&EngagementConfig::default())
    }
}

impl EngagementGate {
    /// Build a gate from percent probabilities; values above 100 act as 100.
    pub fn new(warm_probability: u32, cold_probability: u32, warm_history_threshold: usize) -> Self {
        Self {
            warm_probability: warm_probability.min(100),
            cold_probability: cold_probability.min(100),
            warm_history_threshold,
        }
    }

    pub fn from_config(config: &EngagementConfig) -> Self {
        Self::new(
            config.warm_probability,
            config.cold_probability,
            config.warm_history_threshold,
        )
    }

    /// Percent chance of replying to undirected chatter at this history length.
    pub const fn probability(&self, history_len: usize) -> u32 {
        if history_len < self.warm_history_threshold {
            self.cold_probability
        } else {
            self.warm_probability
        }
    }

    /// Decide using the thread-local generator.
    pub fn should_engage(&self, directed_at_bot: bool, history_len: usize) -> bool {
        self.should_engage_with(&mut rand::thread_rng(), directed_at_bot, history_len)
    }

    /// Decide using the given generator.
    pub fn should_engage_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        directed_at_bot: bool,
        history_len: usize,
    ) -> bool {
        if directed_at_bot {
            return true;
        }
        rng.gen_range(0..100) < self.probability(history_len)
    }
}
