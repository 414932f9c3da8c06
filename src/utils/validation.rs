//! URL and input validation utilities

use anyhow::{anyhow, Result};
use url::Url;

/// Validate URL syntax
pub fn validate_url(url: &str) -> Result<Url> {
    Url::parse(url).map_err(|e| anyhow!("Invalid URL format: {}", e))
}

/// Check if URL is a downloadable http(s) URL
pub fn is_valid_media_url(url: &str) -> bool {
    if let Ok(parsed) = Url::parse(url) {
        let scheme = parsed.scheme();
        scheme == "http" || scheme == "https"
    } else {
        false
    }
}
