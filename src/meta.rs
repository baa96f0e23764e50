//! Identity and labeling of trace objects
//!
//! Every ConfigMap and Job created for a trace carries two labels (and the
//! same two annotations): the trace name and the trace id. Those labels are
//! the only link between the pair, and the only way to find them again.

use std::collections::BTreeMap;

use crate::k8s::ObjectMeta;

/// Label keys and naming prefix for trace objects
///
/// Passed into the lifecycle manager at construction so tests (or a second
/// tool sharing the cluster) can use their own keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelConfig {
    /// Label holding the human name of a trace
    pub name_label_key: String,
    /// Label holding the unique trace id
    pub id_label_key: String,
    /// Prefix for generated object names
    pub object_name_prefix: String,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            name_label_key: "iovisor.org/kubectl-trace".to_string(),
            id_label_key: "iovisor.org/kubectl-trace-id".to_string(),
            object_name_prefix: "kubectl-trace-".to_string(),
        }
    }
}

impl LabelConfig {
    /// Generated object name for a trace id
    pub fn object_name(&self, id: &str) -> String {
        format!("{}{}", self.object_name_prefix, id)
    }

    /// The name/id label pair
    pub fn labels(&self, name: &str, id: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(self.name_label_key.clone(), name.to_string());
        labels.insert(self.id_label_key.clone(), id.to_string());
        labels
    }

    /// Metadata shared by the ConfigMap, the Job and its pod template
    pub fn object_meta(&self, name: &str, id: &str, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: name.to_string(),
            namespace: namespace.to_string(),
            uid: String::new(),
            labels: self.labels(name, id),
            annotations: self.labels(name, id),
        }
    }

    /// Read back (name, id) from an object's labels; missing labels are empty
    pub fn identity(&self, meta: &ObjectMeta) -> (String, String) {
        let name = meta
            .labels
            .get(&self.name_label_key)
            .cloned()
            .unwrap_or_default();
        let id = meta
            .labels
            .get(&self.id_label_key)
            .cloned()
            .unwrap_or_default();
        (name, id)
    }
}
