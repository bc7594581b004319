//! Default values for configuration

/// Default analysis service base URL
pub fn default_analysis_base_url() -> String {
    std::env::var("NEWSREEL_ANALYSIS_URL")
        .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string())
}

/// Default analysis model
pub fn default_analysis_model() -> String {
    "gemini-2.5-flash".to_string()
}

/// Default environment variable name for the analysis API key
pub fn default_analysis_api_key_env() -> String {
    "NEWSREEL_ANALYSIS_API_KEY".to_string()
}

/// Default per-call timeout (10 minutes; media uploads are slow)
pub fn default_analysis_timeout() -> u64 {
    600
}

/// Default fixed pause after every analysis call
pub fn default_post_call_delay_ms() -> u64 {
    2000
}

/// Default media size ceiling in MB
pub fn default_max_media_mb() -> u64 {
    300
}

/// Default prompt version
pub fn default_prompt_version() -> String {
    "v2".to_string()
}

/// Default: stop the batch on auth/quota/server failures
pub fn default_halt_on_api_error() -> bool {
    true
}

/// Default stuck-job timeout (1 hour)
pub fn default_stuck_timeout_secs() -> u64 {
    3600
}

/// Default retry window for failed resources
pub fn default_retry_window_days() -> u32 {
    3
}

/// Default run lease lifetime (6 hours)
pub fn default_lock_ttl_secs() -> u64 {
    6 * 3600
}

/// Default storage kind
pub fn default_storage_kind() -> String {
    "local".to_string()
}

/// Default storage name
pub fn default_storage_name() -> String {
    "local".to_string()
}

/// Default identity token prefix
pub fn default_identity_prefix() -> String {
    "CNNA-ST1-".to_string()
}

/// Default: version tracking disabled
pub fn default_version_check() -> bool {
    false
}

/// Default companion document extensions
pub fn default_document_extensions() -> Vec<String> {
    vec!["xml".to_string()]
}

/// Default media extensions
pub fn default_media_extensions() -> Vec<String> {
    ["mp4", "mov", "mxf", "m4v", "avi", "mkv", "webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
