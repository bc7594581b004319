//! Versioned prompt sets
//!
//! A prompt version is persisted with every analysis result, so a published
//! set is never edited in place; add a new version instead.

use crate::error::{Error, Result};

/// Prompts for the three kinds of analysis call
#[derive(Debug)]
pub struct PromptSet {
    pub version: &'static str,
    /// Companion document text to metadata
    pub document: &'static str,
    /// Media to summary, transcript and tags
    pub video: &'static str,
    /// Document text and media together, both payloads in one answer
    pub full: &'static str,
}

const V1: PromptSet = PromptSet {
    version: "v1",
    document: "You are given the companion metadata document of a news agency video. \
Return a JSON object with the keys \"title\", \"published_at\" (ISO 8601), \
\"duration_seconds\" (integer) and \"media_reference\" (the file name of the video, if named). \
Use null for anything the document does not state. Return JSON only.",
    video: "Watch this news agency video. Return a JSON object with the keys \
\"summary\" (two or three sentences), \"transcript\" (verbatim speech), \
\"translation\" (English translation of the transcript, or null if already English), \
\"importance\" (integer 1-5), \"topics\" (array of strings), \"keywords\" (array of strings) \
and \"bites\" (array of notable quotes). Return JSON only.",
    full: "You are given a news agency video and its companion metadata document. \
Return a JSON object with two keys: \"metadata\" holding \"title\", \"published_at\", \
\"duration_seconds\" and \"media_reference\", and \"analysis\" holding \"summary\", \
\"transcript\", \"translation\", \"importance\" (1-5), \"topics\", \"keywords\" and \"bites\". \
Return JSON only.",
};

const V2: PromptSet = PromptSet {
    version: "v2",
    document: "Extract structured metadata from the news agency document below. \
Respond with exactly one JSON object and no prose:\n\
{\"title\": string|null, \"published_at\": ISO-8601 string|null, \
\"duration_seconds\": integer|null, \"media_reference\": string|null}\n\
`media_reference` is the video file name the document refers to, when it names one.",
    video: "Analyse the attached news agency video for an editorial desk. \
Respond with exactly one JSON object and no prose:\n\
{\"summary\": string, \"transcript\": string|null, \"translation\": string|null, \
\"importance\": integer 1-5, \"topics\": [string], \"keywords\": [string], \"bites\": [string]}\n\
`translation` is English and null when the speech is already English. \
`bites` are short verbatim quotes worth clipping.",
    full: "Analyse the attached news agency video together with its companion document below. \
Respond with exactly one JSON object and no prose:\n\
{\"metadata\": {\"title\": string|null, \"published_at\": ISO-8601 string|null, \
\"duration_seconds\": integer|null, \"media_reference\": string|null}, \
\"analysis\": {\"summary\": string, \"transcript\": string|null, \"translation\": string|null, \
\"importance\": integer 1-5, \"topics\": [string], \"keywords\": [string], \"bites\": [string]}}",
};

static PROMPT_SETS: [PromptSet; 2] = [V1, V2];

/// Look up a prompt set by version name
pub fn prompt_set(version: &str) -> Result<&'static PromptSet> {
    PROMPT_SETS
        .iter()
        .find(|p| p.version.eq_ignore_ascii_case(version))
        .ok_or_else(|| {
            Error::Config(format!(
                "Unknown prompt version '{}'; available: {}",
                version,
                available_versions().join(", ")
            ))
        })
}

pub fn available_versions() -> Vec<&'static str> {
    PROMPT_SETS.iter().map(|p| p.version).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(prompt_set("v2").unwrap().version, "v2");
        assert_eq!(prompt_set("V1").unwrap().version, "v1");
        assert!(matches!(prompt_set("v9"), Err(Error::Config(_))));
    }

    #[test]
    fn test_every_prompt_asks_for_json() {
        for set in PROMPT_SETS.iter() {
            for prompt in [set.document, set.video, set.full] {
                assert!(prompt.contains("JSON"), "{} prompt lacks JSON", set.version);
            }
        }
    }
}
