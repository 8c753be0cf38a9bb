//! URL building for controller actions.

use crate::error::{Error, Result};

/// Builds `base/controller/method/?query` style URLs.
#[derive(Clone, Debug)]
pub struct LinksManager {
    relative_base: String,
    absolute_base: Option<String>,
}

impl LinksManager {
    pub fn new(relative_base: impl Into<String>, absolute_base: Option<String>) -> Self {
        Self { relative_base: relative_base.into(), absolute_base }
    }

    /// URL relative to the site root. The method is ignored without a
    /// controller; query parameters are URL-encoded.
    pub fn make_url(&self, controller: &str, method: &str, params: &[(String, String)]) -> String {
        let mut url = self.relative_base.clone();
        if !controller.is_empty() {
            url.push_str(controller);
            url.push('/');
            if !method.is_empty() {
                url.push_str(method);
                url.push('/');
            }
        }
        if !params.is_empty() {
            let query: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect();
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }

    /// Same as [`make_url`](LinksManager::make_url) but prefixed with the
    /// absolute base URL.
    ///
    /// # Errors
    ///
    /// Fails when no absolute base URL is configured.
    pub fn make_absolute_url(&self, controller: &str, method: &str, params: &[(String, String)]) -> Result<String> {
        let base = self
            .absolute_base
            .as_deref()
            .ok_or_else(|| Error::not_implemented("absolute base URL is not configured"))?;
        let url = self.make_url(controller, method, params);
        let url = if base.ends_with('/') { url.strip_prefix('/').unwrap_or(&url) } else { &url };
        Ok(format!("{base}{url}"))
    }
}

impl Default for LinksManager {
    fn default() -> Self {
        Self::new("/", None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_urls() {
        let links = LinksManager::default();
        assert_eq!(links.make_url("", "", &[]), "/");
        assert_eq!(links.make_url("", "ignored", &[]), "/");
        assert_eq!(links.make_url("users", "", &[]), "/users/");
        assert_eq!(
            links.make_url("users", "edit", &[("id".into(), "4".into()), ("q".into(), "a b".into())]),
            "/users/edit/?id=4&q=a%20b"
        );
    }

    #[test]
    fn absolute_urls_need_a_base() {
        assert!(LinksManager::default().make_absolute_url("a", "", &[]).is_err());

        let links = LinksManager::new("/", Some("https://example.com/".into()));
        assert_eq!(links.make_absolute_url("a", "b", &[]).unwrap(), "https://example.com/a/b/");

        let links = LinksManager::new("/app/", Some("https://example.com".into()));
        assert_eq!(links.make_absolute_url("", "", &[]).unwrap(), "https://example.com/app/");
    }
}
