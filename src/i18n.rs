//! Localization hook.

/// Looks up user-facing text.
pub trait Localization: Send + Sync {
    /// Text for `key` in `group`, with `params` substituted by the
    /// implementation.
    fn text(&self, key: &str, group: &str, params: &[String]) -> String;
}

/// Returns `"group:key"`, which makes untranslated strings easy to spot.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyLocalization;

impl Localization for KeyLocalization {
    fn text(&self, key: &str, group: &str, _params: &[String]) -> String {
        format!("{group}:{key}")
    }
}
