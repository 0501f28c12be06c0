//! [`ConsolidationTrigger`] – decides when a consolidation pass is due.
//!
//! A pass is worth running only if the graph changed since the previous one.
//! Given that, it fires when either:
//!
//! - at least `mutation_threshold` mutations accumulated, or
//! - the mean confirmation count across all observations reached
//!   `avg_confirmation_threshold`, meaning many facts are being re-asserted.
//!
//! # Example
//!
//! ```rust
//! use cortex_memory::graph::GraphState;
//! use cortex_memory::store::add_entity;
//! use cortex_runtime::trigger::ConsolidationTrigger;
//! use cortex_types::EntityType;
//!
//! let mut trigger = ConsolidationTrigger::new(2, 10.0);
//! let mut state = GraphState::new();
//!
//! add_entity(&mut state, "Redis", EntityType::Technology, &["cache"], "explicit");
//! assert!(!trigger.should_run(&state));
//!
//! add_entity(&mut state, "Redis", EntityType::Technology, &["pub/sub"], "explicit");
//! assert!(trigger.should_run(&state));
//!
//! trigger.record_pass(state.version());
//! assert!(!trigger.should_run(&state));
//! ```

use cortex_memory::consolidation::avg_confirmations;
use cortex_memory::graph::GraphState;

/// Mutation- and confirmation-driven consolidation scheduler.
#[derive(Debug, Clone)]
pub struct ConsolidationTrigger {
    mutation_threshold: u64,
    avg_confirmation_threshold: f64,
    /// Graph version right after the last pass.
    last_pass_version: u64,
}

impl ConsolidationTrigger {
    pub fn new(mutation_threshold: u64, avg_confirmation_threshold: f64) -> Self {
        Self {
            mutation_threshold,
            avg_confirmation_threshold,
            last_pass_version: 0,
        }
    }

    /// Mutations applied to `state` since the last recorded pass.
    pub fn pending_mutations(&self, state: &GraphState) -> u64 {
        state.version().wrapping_sub(self.last_pass_version)
    }

    /// `true` when a consolidation pass should run now.
    pub fn should_run(&self, state: &GraphState) -> bool {
        let pending = self.pending_mutations(state);
        if pending == 0 {
            return false;
        }
        if pending >= self.mutation_threshold {
            return true;
        }
        let observations = state.entities().flat_map(|e| e.observations.iter());
        avg_confirmations(observations) >= self.avg_confirmation_threshold
    }

    /// Record that a pass finished with the graph at `version`.
    pub fn record_pass(&mut self, version: u64) {
        self.last_pass_version = version;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cortex_memory::store::add_entity;
    use cortex_types::EntityType;

    #[test]
    fn clean_graph_never_triggers() {
        let trigger = ConsolidationTrigger::new(1, 0.0);
        assert!(!trigger.should_run(&GraphState::new()));
    }

    #[test]
    fn triggers_at_mutation_threshold() {
        let trigger = ConsolidationTrigger::new(3, 100.0);
        let mut state = GraphState::new();
        add_entity(&mut state, "A", EntityType::Concept, &["a"], "explicit");
        add_entity(&mut state, "B", EntityType::Concept, &["b"], "explicit");
        assert!(!trigger.should_run(&state));
        add_entity(&mut state, "C", EntityType::Concept, &["c"], "explicit");
        assert!(trigger.should_run(&state));
    }

    #[test]
    fn triggers_on_high_average_confirmations() {
        let trigger = ConsolidationTrigger::new(100, 2.0);
        let mut state = GraphState::new();
        add_entity(&mut state, "A", EntityType::Concept, &["likes tea"], "explicit");
        assert!(!trigger.should_run(&state));
        add_entity(&mut state, "A", EntityType::Concept, &["likes tea"], "session");
        assert!(trigger.should_run(&state));
    }

    #[test]
    fn record_pass_resets_pending() {
        let mut trigger = ConsolidationTrigger::new(1, 100.0);
        let mut state = GraphState::new();
        add_entity(&mut state, "A", EntityType::Concept, &["a"], "explicit");
        assert_eq!(trigger.pending_mutations(&state), 1);
        trigger.record_pass(state.version());
        assert_eq!(trigger.pending_mutations(&state), 0);
        assert!(!trigger.should_run(&state));
    }

    #[test]
    fn high_average_without_new_mutations_stays_quiet() {
        let mut trigger = ConsolidationTrigger::new(100, 1.0);
        let mut state = GraphState::new();
        add_entity(&mut state, "A", EntityType::Concept, &["a"], "explicit");
        assert!(trigger.should_run(&state));
        trigger.record_pass(state.version());
        assert!(!trigger.should_run(&state));
    }
}
