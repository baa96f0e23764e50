//! Label selectors for finding trace objects

use crate::meta::LabelConfig;

/// Which traces an operation applies to
///
/// Precedence: `id` beats `name`; with neither, every trace matches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub name: Option<String>,
    pub id: Option<String>,
}

impl JobFilter {
    /// Match every trace created with these labels
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            id: None,
        }
    }

    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            name: None,
            id: Some(id.into()),
        }
    }

    /// Label selector string for list calls
    ///
    /// An empty result means nothing can match and callers skip the query.
    pub fn selector(&self, labels: &LabelConfig) -> String {
        if let Some(id) = &self.id {
            return format!("{}={}", labels.id_label_key, id);
        }
        if let Some(name) = &self.name {
            return format!("{}={}", labels.name_label_key, name);
        }
        // Existence filter on the id label
        labels.id_label_key.clone()
    }
}
