use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Derive the identity key of an entity from its display name.
///
/// Trims, collapses internal whitespace runs to a single space and
/// lowercases, so `"  Redis   Cluster "` and `"redis cluster"` share a key.
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Coarse classification of an entity the agent knows about.
///
/// Unknown type strings parse to [`EntityType::Other`], which is also the only
/// type an existing entity may be upgraded from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Person,
    Technology,
    Project,
    Organization,
    Service,
    File,
    Concept,
    Preference,
    #[default]
    Other,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Technology => "technology",
            EntityType::Project => "project",
            EntityType::Organization => "organization",
            EntityType::Service => "service",
            EntityType::File => "file",
            EntityType::Concept => "concept",
            EntityType::Preference => "preference",
            EntityType::Other => "other",
        }
    }

    /// `true` for every type except [`EntityType::Other`].
    pub fn is_specific(&self) -> bool {
        *self != EntityType::Other
    }

    /// Parse a type label, mapping anything unrecognised to
    /// [`EntityType::Other`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "person" => EntityType::Person,
            "technology" => EntityType::Technology,
            "project" => EntityType::Project,
            "organization" => EntityType::Organization,
            "service" => EntityType::Service,
            "file" => EntityType::File,
            "concept" => EntityType::Concept,
            "preference" => EntityType::Preference,
            _ => EntityType::Other,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_label(s))
    }
}

impl<'de> Deserialize<'de> for EntityType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::from_label(&label))
    }
}

/// Lifecycle position of an observation, in increasing order of confidence.
///
/// The derived `Ord` follows declaration order, so `stage_a.max(stage_b)`
/// picks the later stage.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStage {
    #[default]
    Observation,
    Episode,
    Fact,
    Belief,
    Trait,
}

impl MemoryStage {
    pub const ALL: [MemoryStage; 5] = [
        MemoryStage::Observation,
        MemoryStage::Episode,
        MemoryStage::Fact,
        MemoryStage::Belief,
        MemoryStage::Trait,
    ];

    /// The stage one step further along the lifecycle, or `None` for
    /// [`MemoryStage::Trait`].
    pub fn next(self) -> Option<MemoryStage> {
        match self {
            MemoryStage::Observation => Some(MemoryStage::Episode),
            MemoryStage::Episode => Some(MemoryStage::Fact),
            MemoryStage::Fact => Some(MemoryStage::Belief),
            MemoryStage::Belief => Some(MemoryStage::Trait),
            MemoryStage::Trait => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStage::Observation => "observation",
            MemoryStage::Episode => "episode",
            MemoryStage::Fact => "fact",
            MemoryStage::Belief => "belief",
            MemoryStage::Trait => "trait",
        }
    }
}

impl fmt::Display for MemoryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence bookkeeping backing one [`Observation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    /// Times the same content has been asserted. Always `>= 1`.
    pub confirmations: u32,
    /// Conflicting re-assertions. Recorded only; promotion ignores it.
    #[serde(default)]
    pub contradictions: u32,
    /// Provenance labels in first-seen order, without duplicates.
    pub sources: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
}

impl Evidence {
    /// Evidence for a first assertion made now by `source`.
    pub fn fresh(source: &str) -> Self {
        Self::fresh_at(source, Utc::now())
    }

    pub fn fresh_at(source: &str, now: DateTime<Utc>) -> Self {
        Self {
            confirmations: 1,
            contradictions: 0,
            sources: vec![source.to_string()],
            first_seen: now,
            last_confirmed_at: now,
        }
    }

    /// Record one more assertion of the same content.
    pub fn reinforce(&mut self, source: &str, now: DateTime<Utc>) {
        self.confirmations = self.confirmations.saturating_add(1);
        self.add_source(source);
        self.last_confirmed_at = now;
    }

    /// Fold the evidence of a discarded duplicate into this record.
    ///
    /// Confirmations and contradictions are summed, sources unioned and both
    /// timestamps widened to cover the two records.
    pub fn absorb(&mut self, other: &Evidence) {
        self.confirmations = self.confirmations.saturating_add(other.confirmations);
        self.contradictions = self.contradictions.saturating_add(other.contradictions);
        for source in &other.sources {
            self.add_source(source);
        }
        self.first_seen = self.first_seen.min(other.first_seen);
        self.last_confirmed_at = self.last_confirmed_at.max(other.last_confirmed_at);
    }

    pub fn has_source(&self, source: &str) -> bool {
        self.sources.iter().any(|s| s == source)
    }

    fn add_source(&mut self, source: &str) {
        if !self.has_source(source) {
            self.sources.push(source.to_string());
        }
    }
}

/// One fact or belief attached to an [`Entity`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub content: String,
    pub stage: MemoryStage,
    pub evidence: Evidence,
    /// Provenance label of the first assertion (`explicit`, `extracted`, ...).
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl Observation {
    /// A new observation always starts at [`MemoryStage::Observation`].
    pub fn new(content: impl Into<String>, source: &str, now: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            stage: MemoryStage::Observation,
            evidence: Evidence::fresh_at(source, now),
            source: source.to_string(),
            created_at: now,
        }
    }

    /// Case-insensitive, trim-insensitive content equality.
    pub fn has_content(&self, content: &str) -> bool {
        self.content.trim().to_lowercase() == content.trim().to_lowercase()
    }
}

/// What the last search that hit an entity was looking for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessContext {
    pub intent: String,
    pub score: f64,
    pub accessed_at: DateTime<Utc>,
}

/// A named thing the agent has knowledge about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub access_count: u64,
    #[serde(default, rename = "lastAccessContext")]
    pub last_access: Option<AccessContext>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    pub fn new(name: impl Into<String>, entity_type: EntityType, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            entity_type,
            observations: Vec::new(),
            access_count: 0,
            last_access: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Identity key, see [`normalize_key`].
    pub fn key(&self) -> String {
        normalize_key(&self.name)
    }
}

/// A directed, typed, weighted edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: String,
    pub to: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    pub weight: f64,
    /// Absent means the relation never expires.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<DateTime<Utc>>,
}

impl Relation {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.valid_until, Some(until) if until <= now)
    }

    /// `true` when either endpoint has the given normalized key.
    pub fn touches(&self, key: &str) -> bool {
        normalize_key(&self.from) == key || normalize_key(&self.to) == key
    }
}

/// Direction of a relation as seen from the queried entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Engine-level failures surfaced to hosting layers.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum CortexError {
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Skill store error: {0}")]
    SkillStore(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn normalize_key_collapses_case_and_whitespace() {
        assert_eq!(normalize_key("  Redis   Cluster "), "redis cluster");
        assert_eq!(normalize_key("REDIS"), normalize_key("redis"));
        assert_eq!(normalize_key("a\tb\nc"), "a b c");
    }

    #[test]
    fn entity_type_parses_known_and_unknown() {
        assert_eq!("Technology".parse::<EntityType>().unwrap(), EntityType::Technology);
        assert_eq!(" person ".parse::<EntityType>().unwrap(), EntityType::Person);
        assert_eq!("spaceship".parse::<EntityType>().unwrap(), EntityType::Other);
        assert!(!EntityType::Other.is_specific());
        assert!(EntityType::Service.is_specific());
    }

    #[test]
    fn unknown_entity_type_deserializes_to_other() {
        let t: EntityType = serde_json::from_str("\"gadget\"").unwrap();
        assert_eq!(t, EntityType::Other);
    }

    #[test]
    fn memory_stage_ordering_follows_lifecycle() {
        for pair in MemoryStage::ALL.windows(2) {
            assert!(pair[0] < pair[1]);
            assert_eq!(pair[0].next(), Some(pair[1]));
        }
        assert_eq!(MemoryStage::Trait.next(), None);
        assert_eq!(MemoryStage::Fact.max(MemoryStage::Episode), MemoryStage::Fact);
    }

    #[test]
    fn fresh_evidence_has_one_confirmation() {
        let ev = Evidence::fresh("explicit");
        assert_eq!(ev.confirmations, 1);
        assert_eq!(ev.contradictions, 0);
        assert_eq!(ev.sources, vec!["explicit".to_string()]);
        assert_eq!(ev.first_seen, ev.last_confirmed_at);
    }

    #[test]
    fn reinforce_dedups_sources() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(30);
        let mut ev = Evidence::fresh_at("explicit", t0);
        ev.reinforce("explicit", t1);
        ev.reinforce("extracted", t1);
        assert_eq!(ev.confirmations, 3);
        assert_eq!(ev.sources, vec!["explicit", "extracted"]);
        assert_eq!(ev.last_confirmed_at, t1);
        assert_eq!(ev.first_seen, t0);
    }

    #[test]
    fn absorb_sums_and_unions() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::hours(1);
        let mut a = Evidence::fresh_at("explicit", t1);
        let mut b = Evidence::fresh_at("session", t0);
        b.reinforce("extracted", t0);
        a.absorb(&b);
        assert_eq!(a.confirmations, 3);
        assert_eq!(a.sources, vec!["explicit", "session", "extracted"]);
        assert_eq!(a.first_seen, t0);
        assert_eq!(a.last_confirmed_at, t1);
    }

    #[test]
    fn new_observation_starts_at_observation_stage() {
        let obs = Observation::new("Uses Rust", "explicit", Utc::now());
        assert_eq!(obs.stage, MemoryStage::Observation);
        assert_eq!(obs.evidence.confirmations, 1);
        assert!(obs.has_content("  uses rust "));
    }

    #[test]
    fn relation_expiry_is_evaluated_against_now() {
        let now = Utc::now();
        let mut rel = Relation {
            from: "Alice".to_string(),
            to: "Acme".to_string(),
            relation_type: "works_at".to_string(),
            weight: 1.0,
            valid_until: None,
        };
        assert!(!rel.is_expired_at(now));
        rel.valid_until = Some(now - Duration::seconds(1));
        assert!(rel.is_expired_at(now));
        rel.valid_until = Some(now + Duration::days(1));
        assert!(!rel.is_expired_at(now));
        assert!(rel.touches("alice"));
        assert!(!rel.touches("bob"));
    }

    #[test]
    fn entity_serializes_with_camel_case_fields() {
        let entity = Entity::new("Redis", EntityType::Technology, Utc::now());
        let json = serde_json::to_string(&entity).unwrap();
        assert!(json.contains("\"type\":\"technology\""));
        assert!(json.contains("\"accessCount\":0"));
        assert!(json.contains("\"lastAccessContext\":null"));
        let back: Entity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entity);
    }

    #[test]
    fn cortex_error_display() {
        let err = CortexError::EntityNotFound("Redis".to_string());
        assert!(err.to_string().contains("Redis"));
    }
}
