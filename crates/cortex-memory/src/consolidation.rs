//! Consolidation Engine – stage promotion and near-duplicate merging.
//!
//! Observations climb the lifecycle one stage at a time:
//!
//! ```text
//! observation ──► episode ──► fact ──► belief ──► trait
//! ```
//!
//! Each transition has its own [`TransitionRule`]; every threshold of the
//! rule must hold for the step to be taken.  Within an entity, observations
//! whose content is identical or contained in one another are merged into the
//! longer of the two, pairwise and first-match-wins.
//!
//! [`consolidate`] runs one full pass over a [`GraphState`]: merge, then at
//! most one promotion per surviving observation.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use cortex_types::{Evidence, MemoryStage, Observation};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::GraphState;
use crate::store::is_session_summary;

/// A shorter content must exceed this many characters to count as a
/// near-duplicate of a longer one that contains it.
pub const MIN_SUBSTRING_CHARS: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Promotion configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Thresholds for a single stage transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub min_confirmations: u32,
    /// Minimum time since the evidence was first seen.
    #[serde(default)]
    pub min_age_secs: u64,
    /// Minimum [`evidence_confidence`]; unchecked when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_confidence: Option<f64>,
}

/// Per-transition promotion thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    pub observation_to_episode: TransitionRule,
    pub episode_to_fact: TransitionRule,
    pub fact_to_belief: TransitionRule,
    pub belief_to_trait: TransitionRule,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            observation_to_episode: TransitionRule {
                min_confirmations: 3,
                min_age_secs: 60 * 60,
                min_confidence: None,
            },
            episode_to_fact: TransitionRule {
                min_confirmations: 5,
                min_age_secs: 24 * 60 * 60,
                min_confidence: None,
            },
            fact_to_belief: TransitionRule {
                min_confirmations: 8,
                min_age_secs: 7 * 24 * 60 * 60,
                min_confidence: Some(0.9),
            },
            belief_to_trait: TransitionRule {
                min_confirmations: 12,
                min_age_secs: 30 * 24 * 60 * 60,
                min_confidence: Some(0.95),
            },
        }
    }
}

impl PromotionConfig {
    /// The rule governing the step out of `stage`; `None` for the terminal
    /// stage.
    pub fn rule_from(&self, stage: MemoryStage) -> Option<&TransitionRule> {
        match stage {
            MemoryStage::Observation => Some(&self.observation_to_episode),
            MemoryStage::Episode => Some(&self.episode_to_fact),
            MemoryStage::Fact => Some(&self.fact_to_belief),
            MemoryStage::Belief => Some(&self.belief_to_trait),
            MemoryStage::Trait => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Promotion
// ─────────────────────────────────────────────────────────────────────────────

/// Confidence implied by the confirmation count: `1 − 0.5^confirmations`.
pub fn evidence_confidence(evidence: &Evidence) -> f64 {
    let exponent = i32::try_from(evidence.confirmations).unwrap_or(i32::MAX);
    1.0 - 0.5_f64.powi(exponent)
}

/// The stage `observation` should move to, or `None` if it stays put.
///
/// Advances at most one step.  Pure.
pub fn compute_promotion(
    observation: &Observation,
    age: Duration,
    confidence: f64,
    config: &PromotionConfig,
) -> Option<MemoryStage> {
    let next = observation.stage.next()?;
    let rule = config.rule_from(observation.stage)?;

    if observation.evidence.confirmations < rule.min_confirmations {
        return None;
    }
    let min_age = i64::try_from(rule.min_age_secs).unwrap_or(i64::MAX);
    if age.num_seconds() < min_age {
        return None;
    }
    if rule.min_confidence.is_some_and(|min| confidence < min) {
        return None;
    }
    Some(next)
}

// ─────────────────────────────────────────────────────────────────────────────
// Near-duplicate merging
// ─────────────────────────────────────────────────────────────────────────────

/// Result of [`merge_near_duplicates`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub merges: usize,
    /// Indices folded into a survivor, ascending.
    pub absorbed: Vec<usize>,
}

impl MergeOutcome {
    /// Delete the absorbed entries, highest index first so the remaining
    /// indices stay valid.
    pub fn remove_absorbed(&self, observations: &mut Vec<Observation>) {
        for &idx in self.absorbed.iter().rev() {
            if idx < observations.len() {
                observations.remove(idx);
            }
        }
    }
}

/// `true` when two contents are the same text, or one contains the other
/// and the shorter is long enough to be meaningful.
pub fn is_near_duplicate(a: &str, b: &str) -> bool {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    if a == b {
        return true;
    }
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (&a, &b)
    } else {
        (&b, &a)
    };
    shorter.chars().count() > MIN_SUBSTRING_CHARS && longer.contains(shorter.as_str())
}

/// Fold near-duplicate observations into one another in place.
///
/// Pairs are examined in index order; once an index has been absorbed it
/// takes no further part.  The longer content survives (ties keep the
/// earlier entry) and receives the other's evidence and the higher stage.
/// Absorbed entries are left in the slice for the caller to remove with
/// [`MergeOutcome::remove_absorbed`].  Session summaries never take part.
pub fn merge_near_duplicates(observations: &mut [Observation]) -> MergeOutcome {
    let n = observations.len();
    let mut gone = vec![false; n];
    let mut outcome = MergeOutcome::default();

    for i in 0..n {
        if gone[i] || is_session_summary(&observations[i]) {
            continue;
        }
        for j in (i + 1)..n {
            if gone[j] || is_session_summary(&observations[j]) {
                continue;
            }
            if !is_near_duplicate(&observations[i].content, &observations[j].content) {
                continue;
            }
            let len_i = observations[i].content.trim().chars().count();
            let len_j = observations[j].content.trim().chars().count();
            let (keep, drop) = if len_j > len_i { (j, i) } else { (i, j) };

            let absorbed = observations[drop].clone();
            let survivor = &mut observations[keep];
            survivor.evidence.absorb(&absorbed.evidence);
            survivor.stage = survivor.stage.max(absorbed.stage);
            debug!(kept = %survivor.content, dropped = %absorbed.content, "merged near-duplicate");

            gone[drop] = true;
            outcome.merges += 1;
            if drop == i {
                break;
            }
        }
    }

    outcome.absorbed = gone
        .iter()
        .enumerate()
        .filter_map(|(idx, &g)| g.then_some(idx))
        .collect();
    outcome
}

/// Mean confirmation count; `0.0` when there are no observations.
pub fn avg_confirmations<'a>(observations: impl IntoIterator<Item = &'a Observation>) -> f64 {
    let (sum, count) = observations
        .into_iter()
        .fold((0u64, 0u64), |(sum, count), obs| {
            (sum + u64::from(obs.evidence.confirmations), count + 1)
        });
    if count == 0 {
        0.0
    } else {
        sum as f64 / count as f64
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Full pass
// ─────────────────────────────────────────────────────────────────────────────

/// Summary of one [`consolidate`] pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsolidationReport {
    pub entities_scanned: usize,
    pub merges: usize,
    /// Promotions keyed by the stage reached.
    pub promotions: BTreeMap<MemoryStage, usize>,
}

impl ConsolidationReport {
    pub fn total_promotions(&self) -> usize {
        self.promotions.values().sum()
    }

    /// `true` when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.merges == 0 && self.promotions.is_empty()
    }
}

/// Merge near-duplicates and promote eligible observations across every
/// entity.  Marks the state dirty only when something changed.
pub fn consolidate(
    state: &mut GraphState,
    config: &PromotionConfig,
    now: DateTime<Utc>,
) -> ConsolidationReport {
    let mut report = ConsolidationReport::default();

    for entity in state.entities.values_mut() {
        report.entities_scanned += 1;
        let mut changed = false;

        let outcome = merge_near_duplicates(&mut entity.observations);
        if outcome.merges > 0 {
            outcome.remove_absorbed(&mut entity.observations);
            report.merges += outcome.merges;
            changed = true;
        }

        for obs in &mut entity.observations {
            let age = now - obs.evidence.first_seen;
            let confidence = evidence_confidence(&obs.evidence);
            if let Some(next) = compute_promotion(obs, age, confidence, config) {
                debug!(entity = %entity.name, content = %obs.content, from = %obs.stage, to = %next, "promoted observation");
                obs.stage = next;
                *report.promotions.entry(next).or_insert(0) += 1;
                changed = true;
            }
        }

        if changed {
            entity.updated_at = now;
        }
    }

    if !report.is_noop() {
        state.mark_dirty();
        info!(
            entities = report.entities_scanned,
            merges = report.merges,
            promotions = report.total_promotions(),
            "consolidation pass complete"
        );
    }
    report
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{add_entity, update_session_context};
    use cortex_types::EntityType;

    fn obs_with(content: &str, confirmations: u32, stage: MemoryStage) -> Observation {
        let mut obs = Observation::new(content, "explicit", Utc::now());
        obs.evidence.confirmations = confirmations;
        obs.stage = stage;
        obs
    }

    // ── evidence_confidence ──────────────────────────────────────────────────

    #[test]
    fn confidence_grows_with_confirmations() {
        let mut ev = Evidence::fresh("explicit");
        assert!((evidence_confidence(&ev) - 0.5).abs() < 1e-9);
        ev.confirmations = 3;
        assert!((evidence_confidence(&ev) - 0.875).abs() < 1e-9);
        ev.contradictions = 10;
        assert!((evidence_confidence(&ev) - 0.875).abs() < 1e-9);
    }

    // ── compute_promotion ────────────────────────────────────────────────────

    #[test]
    fn promotes_when_all_thresholds_hold() {
        let config = PromotionConfig::default();
        let obs = obs_with("uses vim", 3, MemoryStage::Observation);
        let next = compute_promotion(&obs, Duration::hours(2), 0.875, &config);
        assert_eq!(next, Some(MemoryStage::Episode));
    }

    #[test]
    fn single_confirmation_is_not_promoted() {
        let config = PromotionConfig::default();
        let obs = obs_with("uses vim", 1, MemoryStage::Observation);
        assert_eq!(compute_promotion(&obs, Duration::days(365), 0.5, &config), None);
    }

    #[test]
    fn too_young_is_not_promoted() {
        let config = PromotionConfig::default();
        let obs = obs_with("uses vim", 10, MemoryStage::Observation);
        assert_eq!(compute_promotion(&obs, Duration::minutes(5), 0.99, &config), None);
    }

    #[test]
    fn confidence_gate_applies_to_later_transitions() {
        let config = PromotionConfig::default();
        let obs = obs_with("prefers rust", 8, MemoryStage::Fact);
        assert_eq!(compute_promotion(&obs, Duration::days(8), 0.8, &config), None);
        assert_eq!(
            compute_promotion(&obs, Duration::days(8), 0.99, &config),
            Some(MemoryStage::Belief)
        );
    }

    #[test]
    fn trait_is_terminal() {
        let config = PromotionConfig::default();
        let obs = obs_with("kind", 1000, MemoryStage::Trait);
        assert_eq!(compute_promotion(&obs, Duration::days(3650), 1.0, &config), None);
    }

    #[test]
    fn promotion_advances_one_step_only() {
        let config = PromotionConfig::default();
        let obs = obs_with("always tests first", 50, MemoryStage::Observation);
        assert_eq!(
            compute_promotion(&obs, Duration::days(3650), 1.0, &config),
            Some(MemoryStage::Episode)
        );
    }

    #[test]
    fn lowered_threshold_is_honoured() {
        let mut config = PromotionConfig::default();
        config.observation_to_episode.min_confirmations = 2;
        config.observation_to_episode.min_age_secs = 0;
        let obs = obs_with("likes tea", 2, MemoryStage::Observation);
        assert_eq!(
            compute_promotion(&obs, Duration::zero(), 0.75, &config),
            Some(MemoryStage::Episode)
        );
    }

    // ── merge_near_duplicates ────────────────────────────────────────────────

    #[test]
    fn near_duplicate_rules() {
        assert!(is_near_duplicate("Likes Tea", "  likes tea "));
        assert!(is_near_duplicate("prefers dark mode", "prefers dark mode in every editor"));
        assert!(!is_near_duplicate("uses vim", "uses vim daily"), "shorter side too short");
        assert!(!is_near_duplicate("prefers dark mode", "prefers light mode"));
    }

    #[test]
    fn merge_keeps_longer_and_folds_evidence() {
        let mut list = vec![
            obs_with("prefers dark mode", 2, MemoryStage::Fact),
            obs_with("prefers dark mode in every editor", 1, MemoryStage::Observation),
        ];
        list[0].evidence.sources = vec!["session".to_string()];

        let outcome = merge_near_duplicates(&mut list);
        assert_eq!(outcome.merges, 1);
        assert_eq!(outcome.absorbed, vec![0]);

        outcome.remove_absorbed(&mut list);
        assert_eq!(list.len(), 1);
        let survivor = &list[0];
        assert_eq!(survivor.content, "prefers dark mode in every editor");
        assert_eq!(survivor.evidence.confirmations, 3);
        assert_eq!(survivor.stage, MemoryStage::Fact);
        assert!(survivor.evidence.has_source("session"));
        assert!(survivor.evidence.has_source("explicit"));
    }

    #[test]
    fn equal_length_tie_keeps_earlier() {
        let mut list = vec![
            obs_with("Works Remotely", 1, MemoryStage::Observation),
            obs_with("works remotely", 1, MemoryStage::Episode),
        ];
        let outcome = merge_near_duplicates(&mut list);
        assert_eq!(outcome.absorbed, vec![1]);
        assert_eq!(list[0].content, "Works Remotely");
        assert_eq!(list[0].stage, MemoryStage::Episode);
    }

    #[test]
    fn merging_is_pairwise_first_match_wins() {
        let mut list = vec![
            obs_with("likes strong coffee", 1, MemoryStage::Observation),
            obs_with("likes strong coffee in the morning", 1, MemoryStage::Observation),
            obs_with("coffee in the morning with oat milk", 1, MemoryStage::Observation),
            obs_with("likes strong coffee", 1, MemoryStage::Observation),
        ];
        let outcome = merge_near_duplicates(&mut list);
        // 0 is absorbed into 1 and stops; 1 then absorbs 3; 2 matches nothing.
        assert_eq!(outcome.merges, 2);
        assert_eq!(outcome.absorbed, vec![0, 3]);
        outcome.remove_absorbed(&mut list);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].evidence.confirmations, 3);
    }

    #[test]
    fn distinct_observations_untouched() {
        let mut list = vec![
            obs_with("uses vim", 1, MemoryStage::Observation),
            obs_with("drinks tea", 1, MemoryStage::Observation),
        ];
        let outcome = merge_near_duplicates(&mut list);
        assert_eq!(outcome, MergeOutcome::default());
    }

    // ── avg_confirmations ────────────────────────────────────────────────────

    #[test]
    fn average_confirmations() {
        let list = vec![
            obs_with("a", 1, MemoryStage::Observation),
            obs_with("b", 4, MemoryStage::Observation),
        ];
        assert!((avg_confirmations(&list) - 2.5).abs() < 1e-9);
        assert_eq!(avg_confirmations(&Vec::<Observation>::new()), 0.0);
    }

    // ── consolidate ──────────────────────────────────────────────────────────

    #[test]
    fn consolidate_merges_then_promotes() {
        let mut state = GraphState::new();
        add_entity(
            &mut state,
            "Dana",
            EntityType::Person,
            &["prefers dark mode", "prefers dark mode in every editor"],
            "explicit",
        );
        add_entity(&mut state, "Dana", EntityType::Person, &["prefers dark mode"], "extracted");
        state.mark_persisted(state.version());

        let mut config = PromotionConfig::default();
        config.observation_to_episode.min_age_secs = 0;
        let report = consolidate(&mut state, &config, Utc::now());

        assert_eq!(report.entities_scanned, 1);
        assert_eq!(report.merges, 1);
        assert_eq!(report.promotions.get(&MemoryStage::Episode), Some(&1));
        assert!(state.is_dirty());

        let dana = state.entity("dana").unwrap();
        assert_eq!(dana.observations.len(), 1);
        assert_eq!(dana.observations[0].stage, MemoryStage::Episode);
        assert_eq!(dana.observations[0].evidence.confirmations, 3);
    }

    #[test]
    fn consolidate_without_changes_stays_clean() {
        let mut state = GraphState::new();
        add_entity(&mut state, "Eve", EntityType::Person, &["new hire"], "explicit");
        state.mark_persisted(state.version());

        let report = consolidate(&mut state, &PromotionConfig::default(), Utc::now());
        assert!(report.is_noop());
        assert!(!state.is_dirty());
    }

    #[test]
    fn fact_quoted_in_session_summary_survives_next_session() {
        let mut state = GraphState::new();
        add_entity(&mut state, "Dana", EntityType::Person, &["debugging the CI pipeline"], "explicit");
        update_session_context(&mut state, "Dana", "debugging the CI pipeline today");

        let report = consolidate(&mut state, &PromotionConfig::default(), Utc::now());
        assert_eq!(report.merges, 0);

        update_session_context(&mut state, "Dana", "next chat");
        let contents: Vec<_> = state
            .entity("dana")
            .unwrap()
            .observations
            .iter()
            .map(|o| o.content.as_str())
            .collect();
        assert_eq!(contents, vec!["debugging the CI pipeline", "[session] next chat"]);
    }

    #[test]
    fn merge_skips_session_summaries() {
        let mut obs = vec![
            obs_with("deploys on fridays", 1, MemoryStage::Observation),
            Observation::new("[session] deploys on fridays again", "session", Utc::now()),
        ];
        let outcome = merge_near_duplicates(&mut obs);
        assert_eq!(outcome, MergeOutcome::default());
    }
}
