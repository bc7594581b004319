//! Media resolution for a companion document

use super::document;
use crate::classify::{file_name, parent_dir, select_preferred, Classifier, FileKind};
use crate::error::Result;
use crate::storage::{Storage, StorageObject};
use tracing::debug;

/// How the media file was found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaOrigin {
    /// Next to the document, in the same bundle
    SameDirectory,
    /// Named inside the document and confirmed on storage
    DocumentReference,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub path: String,
    pub size: u64,
    pub version: u32,
    pub origin: MediaOrigin,
}

/// Preferred media file sharing the document's directory
pub fn same_directory_media(
    document: &StorageObject,
    group: &[StorageObject],
    classifier: &Classifier,
) -> Option<ResolvedMedia> {
    let dir = parent_dir(&document.path);
    select_preferred(
        group.iter().filter(|f| parent_dir(&f.path) == dir),
        FileKind::Media,
        classifier,
    )
    .map(|m| ResolvedMedia {
        path: m.path.clone(),
        size: m.size,
        version: classifier.version(&m.path),
        origin: MediaOrigin::SameDirectory,
    })
}

/// Check a media reference from inside a document against storage.
///
/// Lookup order: the reference next to the document, the reference as a
/// storage path, then its bare file name at the storage root.
pub async fn verify_reference(
    storage: &dyn Storage,
    document_path: &str,
    reference: &str,
    classifier: &Classifier,
) -> Result<Option<ResolvedMedia>> {
    let reference = reference.trim().trim_start_matches('/');
    if reference.is_empty() || classifier.kind(reference) != FileKind::Media {
        return Ok(None);
    }

    let dir = parent_dir(document_path);
    let mut candidates: Vec<String> = Vec::new();
    if !dir.is_empty() {
        candidates.push(format!("{}/{}", dir, reference));
    }
    candidates.push(reference.to_string());
    candidates.push(file_name(reference).to_string());
    let mut tried = std::collections::HashSet::new();
    candidates.retain(|c| tried.insert(c.clone()));

    for candidate in candidates {
        if storage.exists(&candidate).await? {
            let size = storage.size(&candidate).await?;
            debug!(document = %document_path, media = %candidate, "Media reference verified");
            return Ok(Some(ResolvedMedia {
                version: classifier.version(file_name(&candidate)),
                path: candidate,
                size,
                origin: MediaOrigin::DocumentReference,
            }));
        }
    }

    debug!(document = %document_path, reference = %reference, "Media reference not on storage");
    Ok(None)
}

/// Outcome of Gate A
#[derive(Debug, Default)]
pub struct MediaResolution {
    pub media: Option<ResolvedMedia>,
    /// Document contents, when they had to be read to find the reference
    pub document_bytes: Option<Vec<u8>>,
}

/// Gate A: same-directory media first, else the reference read from the document
pub async fn resolve_media(
    storage: &dyn Storage,
    document: &StorageObject,
    group: &[StorageObject],
    classifier: &Classifier,
) -> Result<MediaResolution> {
    if let Some(media) = same_directory_media(document, group, classifier) {
        return Ok(MediaResolution {
            media: Some(media),
            document_bytes: None,
        });
    }

    let bytes = storage.read(&document.path).await?;
    let reference = document::read_lenient(&bytes, classifier, &document.path).media_reference;
    let media = match reference {
        Some(reference) => verify_reference(storage, &document.path, &reference, classifier).await?,
        None => None,
    };
    Ok(MediaResolution {
        media,
        document_bytes: Some(bytes),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn classifier() -> Classifier {
        Classifier::new(
            "CNNA-ST1-",
            vec!["xml".to_string()],
            vec!["mp4".to_string()],
        )
        .unwrap()
    }

    fn obj(path: &str, size: u64) -> StorageObject {
        StorageObject {
            path: path.to_string(),
            size,
        }
    }

    #[test]
    fn test_same_directory_prefers_newest_then_smallest() {
        let doc = obj("feed/a/STORY_CNNA-ST1-1000000000000001_1.xml", 10);
        let group = vec![
            doc.clone(),
            obj("feed/a/STORY_CNNA-ST1-1000000000000001_1.mp4", 500),
            obj("feed/a/STORY_CNNA-ST1-1000000000000001_2.mp4", 900),
            obj("feed/a/STORY_CNNA-ST1-1000000000000001_2b_2.mp4", 800),
            // newer but elsewhere
            obj("feed/b/STORY_CNNA-ST1-1000000000000001_9.mp4", 100),
        ];
        let media = same_directory_media(&doc, &group, &classifier()).unwrap();
        assert_eq!(media.path, "feed/a/STORY_CNNA-ST1-1000000000000001_2b_2.mp4");
        assert_eq!(media.version, 2);
        assert_eq!(media.origin, MediaOrigin::SameDirectory);
    }

    #[tokio::test]
    async fn test_reference_fallback_is_verified() {
        let storage = MemoryStorage::new("mem");
        storage.insert("feed/a/clip_CNNA-ST1-1000000000000001_3.mp4", vec![0u8; 64]);
        let doc = obj("feed/a/STORY_CNNA-ST1-1000000000000001_1.xml", 10);
        let c = classifier();

        let media = verify_reference(&storage, &doc.path, "clip_CNNA-ST1-1000000000000001_3.mp4", &c)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(media.path, "feed/a/clip_CNNA-ST1-1000000000000001_3.mp4");
        assert_eq!(media.size, 64);
        assert_eq!(media.version, 3);
        assert_eq!(media.origin, MediaOrigin::DocumentReference);

        let missing = verify_reference(&storage, &doc.path, "gone.mp4", &c).await.unwrap();
        assert!(missing.is_none());
        let not_media = verify_reference(&storage, &doc.path, "notes.txt", &c).await.unwrap();
        assert!(not_media.is_none());
    }

    #[tokio::test]
    async fn test_reference_with_directory() {
        let storage = MemoryStorage::new("mem");
        storage.insert("feed/a/clips/clip_1.mp4", vec![0u8; 8]);
        storage.insert("archive/clip_2.mp4", vec![0u8; 16]);
        storage.insert("clip_3.mp4", vec![0u8; 32]);
        let doc = "feed/a/STORY_CNNA-ST1-1000000000000001_1.xml";
        let c = classifier();

        // relative to the document
        let near = verify_reference(&storage, doc, "clips/clip_1.mp4", &c).await.unwrap().unwrap();
        assert_eq!(near.path, "feed/a/clips/clip_1.mp4");

        // a storage path
        let rooted = verify_reference(&storage, doc, "/archive/clip_2.mp4", &c).await.unwrap().unwrap();
        assert_eq!(rooted.path, "archive/clip_2.mp4");

        // only the bare name exists
        let bare = verify_reference(&storage, doc, "old/clip_3.mp4", &c).await.unwrap().unwrap();
        assert_eq!(bare.path, "clip_3.mp4");
    }

    #[tokio::test]
    async fn test_resolve_media_reads_document_only_when_needed() {
        let storage = MemoryStorage::new("mem");
        let c = classifier();

        storage.insert("feed/a/STORY_CNNA-ST1-1000000000000001_1.mp4", vec![0u8; 4]);
        let doc = obj("feed/a/STORY_CNNA-ST1-1000000000000001_1.xml", 10);
        let group = vec![doc.clone(), obj("feed/a/STORY_CNNA-ST1-1000000000000001_1.mp4", 4)];
        let found = resolve_media(&storage, &doc, &group, &c).await.unwrap();
        assert_eq!(found.media.unwrap().origin, MediaOrigin::SameDirectory);
        assert!(found.document_bytes.is_none());

        storage.insert(
            "feed/b/STORY_CNNA-ST1-2000000000000002_1.xml",
            r#"<story><asset href="clips/STORY_CNNA-ST1-2000000000000002_4.mp4"/></story>"#,
        );
        storage.insert("feed/b/clips/STORY_CNNA-ST1-2000000000000002_4.mp4", vec![0u8; 12]);
        let doc = obj("feed/b/STORY_CNNA-ST1-2000000000000002_1.xml", 70);
        let found = resolve_media(&storage, &doc, std::slice::from_ref(&doc), &c)
            .await
            .unwrap();
        let media = found.media.unwrap();
        assert_eq!(media.path, "feed/b/clips/STORY_CNNA-ST1-2000000000000002_4.mp4");
        assert_eq!(media.version, 4);
        assert!(found.document_bytes.is_some());

        storage.insert("feed/c/STORY_CNNA-ST1-3000000000000003_1.xml", "<story/>");
        let doc = obj("feed/c/STORY_CNNA-ST1-3000000000000003_1.xml", 8);
        let none = resolve_media(&storage, &doc, std::slice::from_ref(&doc), &c)
            .await
            .unwrap();
        assert!(none.media.is_none());
    }
}
