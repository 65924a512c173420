//! Instagram profile links: validation and handle extraction.

use std::sync::OnceLock;

use regex::Regex;

const HOSTS: [&str; 2] = ["instagram.com", "instagr.am"];

fn handle_pattern() -> &'static Regex {
    static HANDLE_RE: OnceLock<Regex> = OnceLock::new();
    HANDLE_RE.get_or_init(|| {
        Regex::new(r"(?:instagram\.com|instagr\.am)/([A-Za-z0-9_.]+)")
            .expect("instagram handle regex should compile")
    })
}

/// True when the link mentions one of the Instagram hosts.
pub fn is_instagram_url(url: &str) -> bool {
    HOSTS.iter().any(|host| url.contains(host))
}

/// Profile handle from a link such as `https://instagram.com/foo.bar/`.
pub fn extract_handle(url: &str) -> Option<String> {
    handle_pattern()
        .captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Name shown on a prospect card: stored username, else the handle in the
/// link, else a placeholder.
pub fn display_name(username: Option<&str>, url: &str) -> String {
    resolve(username, url).unwrap_or_else(|| "Usuario Desconocido".to_string())
}

/// `@handle` line shown under the name.
pub fn display_handle(username: Option<&str>, url: &str) -> String {
    resolve(username, url).unwrap_or_else(|| "usuario".to_string())
}

fn resolve(username: Option<&str>, url: &str) -> Option<String> {
    username
        .filter(|u| !u.is_empty())
        .map(str::to_string)
        .or_else(|| extract_handle(url))
}
