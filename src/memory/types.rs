use serde::{Deserialize, Serialize};

/// The five semantic sectors a memory is embedded into.
///
/// The primary sector drives the decay multiplier and consolidation
/// eligibility; all five sectors carry an embedding vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    Episodic,
    Semantic,
    Procedural,
    Emotional,
    Reflective,
}

impl Sector {
    /// All sectors in canonical order.
    pub const ALL: [Sector; 5] = [
        Sector::Episodic,
        Sector::Semantic,
        Sector::Procedural,
        Sector::Emotional,
        Sector::Reflective,
    ];

    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Emotional => "emotional",
            Self::Reflective => "reflective",
        }
    }
}

impl std::fmt::Display for Sector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Sector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "emotional" => Ok(Self::Emotional),
            "reflective" => Ok(Self::Reflective),
            _ => Err(format!("unknown sector: {s}")),
        }
    }
}

/// Typed edge categories in the waypoint graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Semantic,
    Causal,
    Temporal,
    Analogical,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Semantic => "semantic",
            Self::Causal => "causal",
            Self::Temporal => "temporal",
            Self::Analogical => "analogical",
        }
    }
}

impl std::fmt::Display for LinkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LinkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "semantic" => Ok(Self::Semantic),
            "causal" => Ok(Self::Causal),
            "temporal" => Ok(Self::Temporal),
            "analogical" => Ok(Self::Analogical),
            _ => Err(format!("unknown link type: {s}")),
        }
    }
}

/// How a reinforcement event was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReinforcementType {
    Access,
    Explicit,
    Importance,
}

impl ReinforcementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Explicit => "explicit",
            Self::Importance => "importance",
        }
    }
}

impl std::fmt::Display for ReinforcementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReinforcementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(Self::Access),
            "explicit" => Ok(Self::Explicit),
            "importance" => Ok(Self::Importance),
            _ => Err(format!("unknown reinforcement type: {s}")),
        }
    }
}

/// Optional metadata sidecar attached to a memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MemoryMetadata {
    pub keywords: Vec<String>,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    pub is_atomic: bool,
    /// Consolidation sources when this memory is a summary.
    pub parent_ids: Vec<String>,
}

/// Partial metadata update. `None` leaves the stored value untouched;
/// `Some(empty)` / `Some(None)` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataPatch {
    pub keywords: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    #[serde(with = "double_option")]
    pub category: Option<Option<String>>,
    #[serde(with = "double_option")]
    pub context: Option<Option<String>>,
    #[serde(with = "double_option")]
    pub importance: Option<Option<f64>>,
    pub is_atomic: Option<bool>,
    pub parent_ids: Option<Vec<String>>,
}

/// Treat a present-but-null JSON field as `Some(None)` (an explicit clear),
/// distinct from an absent field (`None`, no change).
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

impl MetadataPatch {
    /// True when every field is absent — such a patch performs no SQL.
    pub fn is_empty(&self) -> bool {
        self.keywords.is_none()
            && self.tags.is_none()
            && self.category.is_none()
            && self.context.is_none()
            && self.importance.is_none()
            && self.is_atomic.is_none()
            && self.parent_ids.is_none()
    }

    /// Apply this patch to existing metadata, producing the merged result.
    pub fn apply(&self, base: &MemoryMetadata) -> MemoryMetadata {
        MemoryMetadata {
            keywords: self.keywords.clone().unwrap_or_else(|| base.keywords.clone()),
            tags: self.tags.clone().unwrap_or_else(|| base.tags.clone()),
            category: match &self.category {
                Some(v) => v.clone(),
                None => base.category.clone(),
            },
            context: match &self.context {
                Some(v) => v.clone(),
                None => base.context.clone(),
            },
            importance: match &self.importance {
                Some(v) => *v,
                None => base.importance,
            },
            is_atomic: self.is_atomic.unwrap_or(base.is_atomic),
            parent_ids: self
                .parent_ids
                .clone()
                .unwrap_or_else(|| base.parent_ids.clone()),
        }
    }
}

/// A directed, typed, weighted edge between two memories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaypointLink {
    pub source_id: String,
    pub target_id: String,
    pub link_type: LinkType,
    pub weight: f64,
    pub created_at: String,
}

/// A memory record with its metadata sidecar and incident links.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub content: String,
    pub primary_sector: Sector,
    pub created_at: String,
    pub last_accessed: String,
    pub access_count: u32,
    pub strength: f64,
    pub salience: f64,
    /// Effective λ at creation time, stored for audit.
    pub decay_rate: f64,
    pub metadata: MemoryMetadata,
    #[serde(default)]
    pub links: Vec<WaypointLink>,
}

/// One row of the append-only reinforcement history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinforcementEvent {
    pub memory_id: String,
    pub event_type: ReinforcementType,
    pub boost: f64,
    pub strength_before: f64,
    pub strength_after: f64,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sector_round_trips_through_str() {
        for sector in Sector::ALL {
            assert_eq!(sector.as_str().parse::<Sector>().unwrap(), sector);
        }
        assert!("spatial".parse::<Sector>().is_err());
    }

    #[test]
    fn link_type_round_trips_through_str() {
        for lt in [
            LinkType::Semantic,
            LinkType::Causal,
            LinkType::Temporal,
            LinkType::Analogical,
        ] {
            assert_eq!(lt.as_str().parse::<LinkType>().unwrap(), lt);
        }
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(MetadataPatch::default().is_empty());
        let patch = MetadataPatch {
            tags: Some(vec![]),
            ..MetadataPatch::default()
        };
        assert!(!patch.is_empty());
    }

    #[test]
    fn patch_merges_over_base() {
        let base = MemoryMetadata {
            keywords: vec!["rust".into()],
            tags: vec!["lang".into()],
            category: Some("notes".into()),
            context: None,
            importance: Some(0.7),
            is_atomic: true,
            parent_ids: vec![],
        };
        let patch = MetadataPatch {
            tags: Some(vec![]),                 // explicit clear
            category: Some(None),               // explicit clear
            importance: Some(Some(0.9)),        // replace
            ..MetadataPatch::default()
        };
        let merged = patch.apply(&base);
        assert_eq!(merged.keywords, vec!["rust".to_string()]); // untouched
        assert!(merged.tags.is_empty());
        assert!(merged.category.is_none());
        assert_eq!(merged.importance, Some(0.9));
        assert!(merged.is_atomic);
    }

    #[test]
    fn patch_null_field_deserializes_as_clear() {
        let patch: MetadataPatch =
            serde_json::from_str(r#"{"category": null, "importance": 0.4}"#).unwrap();
        assert_eq!(patch.category, Some(None));
        assert_eq!(patch.importance, Some(Some(0.4)));
        assert!(patch.context.is_none());
    }
}
