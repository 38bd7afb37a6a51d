use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wildcard category that matches every record. Never sent to the classifier.
pub const ALL_CATEGORY: &str = "All";

/// Label used whenever classification cannot produce one.
pub const FALLBACK_CATEGORY: &str = "Abstract";

pub const DEFAULT_CATEGORIES: &[&str] = &[
    ALL_CATEGORY,
    "Nature",
    "Urban",
    "Sci-Fi",
    "Animals",
    "Abstract",
    "Characters",
];

/// One cell of the gallery grid.
///
/// While `is_loading` is set the `url` is empty; a settled record always
/// carries an inline `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_loading: bool,
    #[serde(default)]
    pub category: String,
}

impl ImageRecord {
    pub fn placeholder(id: String, prompt: &str, category: &str, timestamp: i64) -> Self {
        Self {
            id,
            url: String::new(),
            prompt: prompt.to_string(),
            timestamp,
            is_loading: true,
            category: category.to_string(),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.is_loading
    }

    /// Resolved and carrying a payload that can be shown or saved.
    pub fn is_displayable(&self) -> bool {
        !self.is_loading && !self.url.is_empty()
    }
}

/// Ordered, duplicate-free category labels that always start with the wildcard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CategorySet {
    labels: Vec<String>,
}

impl CategorySet {
    pub fn defaults() -> Self {
        Self::from(
            DEFAULT_CATEGORIES
                .iter()
                .map(|label| (*label).to_string())
                .collect::<Vec<String>>(),
        )
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.iter().any(|existing| existing == label)
    }

    /// Appends `label` when absent. Returns whether the set grew.
    pub fn insert(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() || self.contains(label) {
            return false;
        }
        self.labels.push(label.to_string());
        true
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Labels the classifier may choose from (wildcard excluded).
    pub fn classifier_labels(&self) -> Vec<&str> {
        self.labels
            .iter()
            .map(String::as_str)
            .filter(|label| *label != ALL_CATEGORY)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for CategorySet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl From<Vec<String>> for CategorySet {
    fn from(raw: Vec<String>) -> Self {
        let mut labels: Vec<String> = vec![ALL_CATEGORY.to_string()];
        for label in raw {
            let trimmed = label.trim();
            if trimmed.is_empty() || labels.iter().any(|existing| existing == trimmed) {
                continue;
            }
            labels.push(trimmed.to_string());
        }
        Self { labels }
    }
}

impl From<CategorySet> for Vec<String> {
    fn from(set: CategorySet) -> Self {
        set.labels
    }
}

/// Everything that is persisted between sessions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub categories: CategorySet,
}

impl AppState {
    pub fn find(&self, id: &str) -> Option<&ImageRecord> {
        self.images.iter().find(|image| image.id == id)
    }

    pub fn has_category_images(&self, category: &str) -> bool {
        self.images.iter().any(|image| image.category == category)
    }

    pub fn pending_count(&self) -> usize {
        self.images.iter().filter(|image| image.is_pending()).count()
    }

    /// Drops records whose generation can no longer settle. Returns how many were removed.
    pub fn discard_pending(&mut self) -> usize {
        let before = self.images.len();
        self.images.retain(|image| !image.is_pending());
        before - self.images.len()
    }
}

/// Time-derived record ids: `<epoch-millis><index>`.
///
/// Keeps the last millisecond handed out and moves forward past it, so two
/// batches created within the same millisecond never share an id.
#[derive(Debug, Clone, Default)]
pub struct IdSource {
    last_millis: i64,
}

impl IdSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_batch(&mut self, count: usize) -> Vec<String> {
        let millis = self.reserve_millis();
        (0..count).map(|idx| format!("{millis}{idx}")).collect()
    }

    pub fn next_id(&mut self) -> String {
        self.reserve_millis().to_string()
    }

    fn reserve_millis(&mut self) -> i64 {
        let now = now_millis();
        let millis = if now > self.last_millis {
            now
        } else {
            self.last_millis + 1
        };
        self.last_millis = millis;
        millis
    }
}

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}
