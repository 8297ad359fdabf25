//! Utility functions and helpers.

pub mod http;

use url::Url;

use crate::error::Result;

/// Resolve a relative endpoint path against the API base URL.
pub fn resolve_url(base: &Url, path: &str) -> Result<String> {
    Ok(base.join(path)?.to_string())
}

/// Parse a base URL, making sure it ends with a slash so joins append.
pub fn parse_base_url(base_url: &str) -> Result<Url> {
    if base_url.ends_with('/') {
        Ok(Url::parse(base_url)?)
    } else {
        Ok(Url::parse(&format!("{base_url}/"))?)
    }
}
