//! Application-wide context shared by every request.
//!
//! [`AppContext`] is built once at startup and handed to the [`App`](crate::App)
//! inside an `Arc`. It is read-only while requests are served; anything
//! request-scoped (the session, the request itself) lives on the
//! [`ActionContext`](crate::controller::ActionContext) instead.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;

use crate::config::Config;
use crate::error::Result;
use crate::i18n::{KeyLocalization, Localization};
use crate::links::LinksManager;
use crate::present::{Builder, Presenter};
use crate::request::Request;
use crate::session::{MemorySession, Session};
use crate::template::{HandlebarsEngine, Plugin, TemplateConfig, TemplateEngine};

/// Opens the session for a request.
pub type SessionFactory = Arc<dyn Fn(&Request) -> Box<dyn Session> + Send + Sync>;

#[derive(Clone)]
pub struct AppContext {
    config: Config,
    root_dir: PathBuf,
    present_format: String,
    action_initiator: String,
    builder: Builder,
    json_pretty: bool,
    base_template_var: Option<String>,
    templates: Option<Arc<dyn TemplateEngine>>,
    localization: Arc<dyn Localization>,
    locale: String,
    relative_base_url: String,
    absolute_base_url: Option<String>,
    session_factory: SessionFactory,
    debug: bool,
}

impl AppContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            root_dir: PathBuf::new(),
            present_format: String::new(),
            action_initiator: String::new(),
            builder: Builder::new(),
            json_pretty: false,
            base_template_var: None,
            templates: None,
            localization: Arc::new(KeyLocalization),
            locale: String::new(),
            relative_base_url: "/".to_owned(),
            absolute_base_url: None,
            session_factory: Arc::new(|_: &Request| -> Box<dyn Session> { Box::new(MemorySession::new()) }),
            debug: false,
        }
    }

    // ── Builders ──────────────────────────────────────────────────────────────

    pub fn with_root_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_dir = dir.into();
        self
    }

    /// Forces every response into `format`, overriding controllers and
    /// requests alike.
    pub fn with_present_format(mut self, format: impl Into<String>) -> Self {
        self.present_format = format.into();
        self
    }

    /// Tags where requests come from (`"web"`, `"cli"`, `"cron"`, ...).
    pub fn with_action_initiator(mut self, initiator: impl Into<String>) -> Self {
        self.action_initiator = initiator.into();
        self
    }

    pub fn with_builder(mut self, builder: Builder) -> Self {
        self.builder = builder;
        self
    }

    /// Registers an extra output format.
    pub fn with_presenter(mut self, presenter: impl Presenter + 'static) -> Self {
        self.builder.register(presenter);
        self
    }

    pub fn with_default_format(mut self, format: impl Into<String>) -> Self {
        self.builder = self.builder.with_default_format(format);
        self
    }

    pub fn with_json_pretty(mut self, enable: bool) -> Self {
        self.json_pretty = enable;
        self
    }

    pub fn with_templates(mut self, engine: Arc<dyn TemplateEngine>) -> Self {
        self.templates = Some(engine);
        self
    }

    /// Loads handlebars templates from `<root_dir>/templates` unless
    /// `config` says otherwise, and enables `plugins` with this context's
    /// localization and links. Set those up first.
    pub fn with_handlebars(mut self, config: Option<TemplateConfig>, plugins: &[Plugin]) -> Result<Self> {
        let config = config.unwrap_or_else(|| TemplateConfig::new(self.root_dir.join("templates")));
        let engine = HandlebarsEngine::new(config)?;
        engine.enable_plugins(plugins, Arc::clone(&self.localization), self.links());
        self.templates = Some(Arc::new(engine));
        Ok(self)
    }

    /// Name of the variable that carries the rendered page into the base
    /// template. Layouts are only applied when this is set.
    pub fn with_base_template_var(mut self, name: impl Into<String>) -> Self {
        self.base_template_var = Some(name.into());
        self
    }

    pub fn with_localization(mut self, localization: Arc<dyn Localization>) -> Self {
        self.localization = localization;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_base_urls(mut self, relative: impl Into<String>, absolute: Option<String>) -> Self {
        self.relative_base_url = relative.into();
        self.absolute_base_url = absolute;
        self
    }

    pub fn with_session_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn(&Request) -> Box<dyn Session> + Send + Sync + 'static,
    {
        self.session_factory = Arc::new(factory);
        self
    }

    pub fn with_debug_mode(mut self, enable: bool) -> Self {
        self.debug = enable;
        self
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The forced output format, if any.
    pub fn present_format(&self) -> Option<&str> {
        Some(self.present_format.as_str()).filter(|f| !f.is_empty())
    }

    pub fn action_initiator(&self) -> &str {
        &self.action_initiator
    }

    pub fn builder(&self) -> &Builder {
        &self.builder
    }

    pub fn json_pretty(&self) -> bool {
        self.json_pretty
    }

    pub fn templates(&self) -> Option<&dyn TemplateEngine> {
        self.templates.as_deref()
    }

    pub fn base_template_var(&self) -> Option<&str> {
        self.base_template_var.as_deref()
    }

    pub fn trace_errors(&self) -> bool {
        self.config.trace_errors
    }

    pub fn in_debug_mode(&self) -> bool {
        self.debug
    }

    /// A config setting by name, built-in keys included.
    pub fn setting(&self, name: &str) -> Option<Value> {
        self.config.get(name)
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    /// Localized text through the configured [`Localization`].
    pub fn text(&self, key: &str, group: &str, params: &[String]) -> String {
        self.localization.text(key, group, params)
    }

    pub fn localization(&self) -> &Arc<dyn Localization> {
        &self.localization
    }

    pub fn links(&self) -> LinksManager {
        LinksManager::new(self.relative_base_url.clone(), self.absolute_base_url.clone())
    }

    pub fn open_session(&self, request: &Request) -> Box<dyn Session> {
        let mut session = (self.session_factory)(request);
        session.start();
        session
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("root_dir", &self.root_dir)
            .field("present_format", &self.present_format)
            .field("builder", &self.builder)
            .field("templates", &self.templates.is_some())
            .field("locale", &self.locale)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults() {
        let cx = AppContext::default();
        assert_eq!(cx.present_format(), None);
        assert_eq!(cx.builder().default_format(), "html");
        assert!(cx.templates().is_none());
        assert!(!cx.trace_errors());
        assert_eq!(cx.links().make_url("a", "", &[]), "/a/");
        assert_eq!(cx.text("k", "g", &[]), "g:k");
    }

    #[test]
    fn settings_come_from_config() {
        let config = Config { trace_errors: true, ..Config::default() }.with_setting("sitename", "Demo");
        let cx = AppContext::new(config).with_present_format("json").with_default_format("raw");

        assert_eq!(cx.setting("sitename"), Some(json!("Demo")));
        assert_eq!(cx.setting("traceErrors"), Some(json!(true)));
        assert_eq!(cx.setting("missing"), None);
        assert_eq!(cx.present_format(), Some("json"));
        assert_eq!(cx.builder().default_format(), "raw");
    }

    #[test]
    fn sessions_come_from_the_factory() {
        let cx = AppContext::default().with_session_factory(|req| {
            let mut session = MemorySession::new();
            if let Some(user) = req.header("X-User") {
                session.set_user_id(user);
            }
            Box::new(session)
        });

        let request = Request::new().with_header("X-User", "u-7");
        assert_eq!(cx.open_session(&request).user_id(), "u-7");
        assert!(!cx.open_session(&Request::new()).is_logged_in());
    }

    #[test]
    fn handlebars_needs_a_template_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(AppContext::default().with_root_dir(dir.path()).with_handlebars(None, &[]).is_err());

        std::fs::create_dir(dir.path().join("templates")).unwrap();
        let cx = AppContext::default()
            .with_root_dir(dir.path())
            .with_handlebars(None, &[Plugin::Translate])
            .unwrap();
        assert!(cx.templates().is_some());
    }
}
