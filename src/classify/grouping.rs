//! Partition a flat file listing into resource bundles

use super::{Classifier, FileKind};
use crate::error::Error;
use crate::storage::StorageObject;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::{debug, warn};

/// How files are bundled into resources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GroupingPolicy {
    /// Each file's own identity token is the key
    #[default]
    ByIdentity,
    /// Files sharing a label join the folder of the first identity seen for it
    ByLabel,
}

impl std::fmt::Display for GroupingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupingPolicy::ByIdentity => write!(f, "by-identity"),
            GroupingPolicy::ByLabel => write!(f, "by-label"),
        }
    }
}

impl FromStr for GroupingPolicy {
    type Err = Error;

    fn from_str(s: &str) -> crate::error::Result<Self> {
        match s.to_lowercase().as_str() {
            "by-identity" | "identity" => Ok(GroupingPolicy::ByIdentity),
            "by-label" | "label" => Ok(GroupingPolicy::ByLabel),
            _ => Err(Error::Config(format!("Unknown grouping policy: {}", s))),
        }
    }
}

/// A file that could not be assigned to any bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationError {
    pub path: String,
    pub reason: String,
}

/// Result of grouping one listing
#[derive(Debug, Clone, Default)]
pub struct Grouping {
    /// Bundles keyed by canonical identity; members keep input order
    pub groups: BTreeMap<String, Vec<StorageObject>>,
    pub errors: Vec<ClassificationError>,
}

impl Grouping {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Group files by identity.
///
/// `ByLabel` is order-sensitive: the identity of the first file seen for a
/// label becomes the folder key for every later file with that label, so
/// callers feed listings in lexicographic path order.
pub fn group_files(
    files: &[StorageObject],
    policy: GroupingPolicy,
    classifier: &Classifier,
) -> Grouping {
    let mut grouping = Grouping::default();
    let mut label_keys: HashMap<String, String> = HashMap::new();

    for file in files {
        let Some(identity) = classifier.identity(&file.path) else {
            warn!(path = %file.path, "No identity token in file name; excluded from grouping");
            grouping.errors.push(ClassificationError {
                path: file.path.clone(),
                reason: "missing identity token".to_string(),
            });
            continue;
        };

        let key = match policy {
            GroupingPolicy::ByIdentity => identity,
            GroupingPolicy::ByLabel => {
                let Some(label) = classifier.label(&file.path) else {
                    warn!(path = %file.path, "No label in file name; excluded from grouping");
                    grouping.errors.push(ClassificationError {
                        path: file.path.clone(),
                        reason: "missing label".to_string(),
                    });
                    continue;
                };
                label_keys.entry(label).or_insert(identity).clone()
            }
        };

        debug!(path = %file.path, key = %key, "Grouped file");
        grouping.groups.entry(key).or_default().push(file.clone());
    }

    grouping
}

/// Newer version first; on equal versions the smaller file, then the smaller path
fn preference(classifier: &Classifier, a: &StorageObject, b: &StorageObject) -> Ordering {
    let va = classifier.version(&a.path);
    let vb = classifier.version(&b.path);
    va.cmp(&vb)
        .then_with(|| Reverse(a.size).cmp(&Reverse(b.size)))
        .then_with(|| Reverse(&a.path).cmp(&Reverse(&b.path)))
}

/// Pick the preferred file of a kind from a bundle
pub fn select_preferred<'a, I>(
    files: I,
    kind: FileKind,
    classifier: &Classifier,
) -> Option<&'a StorageObject>
where
    I: IntoIterator<Item = &'a StorageObject>,
{
    files
        .into_iter()
        .filter(|f| classifier.kind(&f.path) == kind)
        .max_by(|a, b| preference(classifier, a, b))
}

/// Preferred companion document of a bundle
pub fn best_document<'a>(
    files: &'a [StorageObject],
    classifier: &Classifier,
) -> Option<&'a StorageObject> {
    select_preferred(files, FileKind::Document, classifier)
}

/// Preferred media file of a bundle
pub fn best_media<'a>(
    files: &'a [StorageObject],
    classifier: &Classifier,
) -> Option<&'a StorageObject> {
    select_preferred(files, FileKind::Media, classifier)
}
