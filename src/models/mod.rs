use serde::{Deserialize, Deserializer, Serialize, Serializer};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Which vote table a record came from. Each category is its own item
/// namespace so a menu named "12" never shares a column with place 12.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VoteCategory {
    #[default]
    Place,
    Menu,
    Date,
}

impl VoteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteCategory::Place => "place",
            VoteCategory::Menu => "menu",
            VoteCategory::Date => "date",
        }
    }
}

impl FromStr for VoteCategory {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "place" => Ok(VoteCategory::Place),
            "menu" => Ok(VoteCategory::Menu),
            "date" => Ok(VoteCategory::Date),
            other => Err(anyhow::anyhow!("Unknown vote category: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteAction {
    Like,
    Unlike,
    Neutral,
}

impl VoteAction {
    pub fn score(&self) -> f64 {
        match self {
            VoteAction::Like => 1.0,
            VoteAction::Unlike => -1.0,
            VoteAction::Neutral => 0.0,
        }
    }

    /// Menu and date votes are stored as a nullable yes/no flag.
    pub fn from_flag(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => VoteAction::Like,
            Some(false) => VoteAction::Unlike,
            None => VoteAction::Neutral,
        }
    }
}

/// Column key of the interaction matrix. Ordered the same way as its
/// `category:value` string form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub category: VoteCategory,
    pub value: String,
}

impl ItemKey {
    pub fn new(category: VoteCategory, value: impl Into<String>) -> Self {
        Self {
            category,
            value: value.into(),
        }
    }

    pub fn place(value: impl Into<String>) -> Self {
        Self::new(VoteCategory::Place, value)
    }

    pub fn menu(value: impl Into<String>) -> Self {
        Self::new(VoteCategory::Menu, value)
    }

    pub fn date(value: impl Into<String>) -> Self {
        Self::new(VoteCategory::Date, value)
    }
}

impl Ord for ItemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // No category name is a prefix of another, so comparing the parts
        // matches comparing the joined strings.
        self.category
            .as_str()
            .cmp(other.category.as_str())
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for ItemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category.as_str(), self.value)
    }
}

impl FromStr for ItemKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((category, value)) if !value.is_empty() => {
                Ok(ItemKey::new(category.parse()?, value))
            }
            _ => Err(anyhow::anyhow!("Invalid item key: {}", s)),
        }
    }
}

impl Serialize for ItemKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ItemKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Accepts `"42"` and `42` alike; place ids are integers in the vote tables.
fn string_or_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
    })
}

/// Accepts `"like"`/`"unlike"`/`"neutral"` and the nullable yes/no flag the
/// menu and date tables store.
fn action_or_flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<VoteAction, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Action(VoteAction),
        Flag(Option<bool>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Action(action) => action,
        Raw::Flag(flag) => VoteAction::from_flag(flag),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub user_id: String,
    #[serde(default)]
    pub category: VoteCategory,
    #[serde(deserialize_with = "string_or_int")]
    pub item_id: String,
    #[serde(deserialize_with = "action_or_flag")]
    pub action: VoteAction,
    pub timestamp: DateTime<Utc>,
}

impl VoteRecord {
    pub fn new(
        user_id: impl Into<String>,
        item_id: impl Into<String>,
        action: VoteAction,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            category: VoteCategory::Place,
            item_id: item_id.into(),
            action,
            timestamp,
        }
    }

    pub fn with_category(mut self, category: VoteCategory) -> Self {
        self.category = category;
        self
    }

    pub fn item_key(&self) -> ItemKey {
        ItemKey::new(self.category, self.item_id.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    CollaborativeUser,
    CollaborativeItem,
    LatentFactor,
    VectorSimilarity,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::CollaborativeUser => "collaborative_user",
            SourceTag::CollaborativeItem => "collaborative_item",
            SourceTag::LatentFactor => "latent_factor",
            SourceTag::VectorSimilarity => "vector_similarity",
        }
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored item proposed by a single source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: ItemKey,
    pub score: f64,
    pub sources: BTreeSet<SourceTag>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Candidate {
    pub fn new(item_id: ItemKey, score: f64, source: SourceTag) -> Self {
        Self {
            item_id,
            score,
            sources: BTreeSet::from([source]),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }
}

/// Provenance of one source's contribution to a merged recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceScore {
    pub raw: f64,
    pub normalized: f64,
    pub weight: f64,
}

impl SourceScore {
    pub fn contribution(&self) -> f64 {
        self.weight * self.normalized
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedRecommendation {
    pub item_id: ItemKey,
    pub combined_score: f64,
    pub sources: BTreeSet<SourceTag>,
    pub source_scores: BTreeMap<SourceTag, SourceScore>,
    #[serde(default)]
    pub metadata: Metadata,
    pub rationale: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: String,
    pub num_recommendations: usize,
    pub query_text: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: String,
    pub recommendations: Vec<RankedRecommendation>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarUser {
    pub user_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarItem {
    pub item_id: ItemKey,
    pub similarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_key_round_trips_through_display() {
        let key = ItemKey::menu("kimchi stew");
        assert_eq!(key.to_string(), "menu:kimchi stew");
        assert_eq!("menu:kimchi stew".parse::<ItemKey>().unwrap(), key);
        assert!("nocolon".parse::<ItemKey>().is_err());
        assert!("drink:cola".parse::<ItemKey>().is_err());
    }

    #[test]
    fn test_vote_record_accepts_integer_item_ids() {
        let json = r#"{"user_id":"84927","item_id":12,"action":"like","timestamp":"2024-05-01T12:00:00Z"}"#;
        let record: VoteRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.item_id, "12");
        assert_eq!(record.category, VoteCategory::Place);
        assert_eq!(record.item_key(), ItemKey::place("12"));
    }

    #[test]
    fn test_action_scores() {
        assert_eq!(VoteAction::Like.score(), 1.0);
        assert_eq!(VoteAction::Unlike.score(), -1.0);
        assert_eq!(VoteAction::Neutral.score(), 0.0);
    }

    #[test]
    fn test_item_keys_order_like_their_string_form() {
        let mut keys = vec![
            ItemKey::place("z"),
            ItemKey::menu("a"),
            ItemKey::place("a"),
            ItemKey::date("2024-05-01"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ItemKey::date("2024-05-01"),
                ItemKey::menu("a"),
                ItemKey::place("a"),
                ItemKey::place("z"),
            ]
        );

        let strings: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        let mut sorted = strings.clone();
        sorted.sort();
        assert_eq!(strings, sorted);
    }
}
