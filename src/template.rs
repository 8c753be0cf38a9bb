//! Template rendering for the HTML presenter.
//!
//! The presenter talks to a [`TemplateEngine`]; [`HandlebarsEngine`] is the
//! stock implementation. It loads every file with the configured extension
//! below the template directory, naming each template after its path
//! without the extension (`users/list.htm` → `users/list`).

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext, RenderErrorReason,
};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::i18n::Localization;
use crate::links::LinksManager;
use crate::value;

/// Renders named templates.
pub trait TemplateEngine: Send + Sync {
    fn render(&self, name: &str, data: &Value) -> Result<String>;
}

#[derive(Clone, Debug)]
pub struct TemplateConfig {
    pub dir: PathBuf,
    /// File extension without the dot.
    pub extension: String,
    /// Reload templates from disk before every render.
    pub dev_mode: bool,
    /// Fail on missing variables.
    pub strict: bool,
}

impl TemplateConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            extension: "htm".to_owned(),
            dev_mode: false,
            strict: false,
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into().trim_start_matches('.').to_owned();
        self
    }

    pub fn with_dev_mode(mut self, enable: bool) -> Self {
        self.dev_mode = enable;
        self
    }

    pub fn with_strict(mut self, enable: bool) -> Self {
        self.strict = enable;
        self
    }
}

/// Optional helpers available to templates.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Plugin {
    /// `{{t key="title" group="home" p1=name}}`
    Translate,
    /// `{{link c="users" m="edit" id=user.id}}`, `a=true` for absolute URLs.
    Link,
    /// `{{jsonencode items}}`
    JsonEncode,
    /// `{{humandatetime created_at}}` → `Sat, 01 Mar 2025 14:05`
    HumanDateTime,
}

/// Handlebars-backed [`TemplateEngine`].
#[derive(Clone)]
pub struct HandlebarsEngine {
    registry: Arc<RwLock<Registry>>,
    config: TemplateConfig,
}

struct Registry {
    handlebars: Handlebars<'static>,
    /// Names of the templates that came from the template directory.
    from_disk: BTreeSet<String>,
}

impl HandlebarsEngine {
    /// Loads all templates from `config.dir`.
    ///
    /// # Errors
    ///
    /// Fails when the directory does not exist or a template does not parse.
    pub fn new(config: TemplateConfig) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(config.strict);

        let registry = Registry { handlebars, from_disk: BTreeSet::new() };
        let engine = Self { registry: Arc::new(RwLock::new(registry)), config };
        engine.reload()?;
        Ok(engine)
    }

    pub fn config(&self) -> &TemplateConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_sources(&self) -> Result<Vec<(String, String)>> {
        if !self.config.dir.is_dir() {
            return Err(Error::internal(format!(
                "Templates path does not exist: {}",
                self.config.dir.display()
            )));
        }
        let mut sources = Vec::new();
        self.read_dir(&self.config.dir, &mut sources)?;
        Ok(sources)
    }

    fn read_dir(&self, dir: &Path, sources: &mut Vec<(String, String)>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.read_dir(&path, sources)?;
                continue;
            }
            if path.extension().is_none_or(|ext| ext != self.config.extension.as_str()) {
                continue;
            }
            let name = path
                .strip_prefix(&self.config.dir)
                .unwrap_or(&path)
                .with_extension("")
                .to_string_lossy()
                .replace('\\', "/");
            sources.push((name, std::fs::read_to_string(&path)?));
        }
        Ok(())
    }

    /// Loads the template directory again.
    ///
    /// Files are read and compiled into a copy of the registry, which then
    /// replaces the live one in a single step: renders never see a half
    /// loaded registry, and a template that fails to parse leaves the
    /// previous set in place. Templates added with
    /// [`register_template`](Self::register_template) and helpers are kept.
    pub fn reload(&self) -> Result<()> {
        let sources = self.read_sources()?;

        let mut registry = self.write();
        let mut staged = registry.handlebars.clone();
        for name in &registry.from_disk {
            staged.unregister_template(name);
        }
        for (name, source) in &sources {
            staged.register_template_string(name, source)?;
        }

        registry.handlebars = staged;
        registry.from_disk = sources.into_iter().map(|(name, _)| name).collect();
        Ok(())
    }

    pub fn register_template(&self, name: &str, source: &str) -> Result<()> {
        self.write().handlebars.register_template_string(name, source)?;
        Ok(())
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.read().handlebars.has_template(name)
    }

    pub fn register_helper(&self, name: &str, helper: impl HelperDef + Send + Sync + 'static) {
        self.write().handlebars.register_helper(name, Box::new(helper));
    }

    /// Direct access to the registry for application-specific setup, e.g.
    /// registering extra helpers or partials.
    pub fn configure<F>(&self, setup: F)
    where
        F: FnOnce(&mut Handlebars<'static>),
    {
        setup(&mut self.write().handlebars);
    }

    /// Registers the given plugins. `t` and `link` use `localization` and
    /// `links` respectively.
    pub fn enable_plugins(&self, plugins: &[Plugin], localization: Arc<dyn Localization>, links: LinksManager) {
        let mut guard = self.write();
        let registry = &mut guard.handlebars;
        for plugin in plugins {
            match plugin {
                Plugin::Translate     => registry.register_helper("t", Box::new(TranslateHelper { localization: Arc::clone(&localization) })),
                Plugin::Link          => registry.register_helper("link", Box::new(LinkHelper { links: links.clone() })),
                Plugin::JsonEncode    => registry.register_helper("jsonencode", Box::new(json_encode_helper)),
                Plugin::HumanDateTime => registry.register_helper("humandatetime", Box::new(human_datetime_helper)),
            }
        }
    }
}

impl TemplateEngine for HandlebarsEngine {
    fn render(&self, name: &str, data: &Value) -> Result<String> {
        if self.config.dev_mode {
            self.reload()?;
        }
        Ok(self.read().handlebars.render(name, data)?)
    }
}

impl fmt::Debug for HandlebarsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlebarsEngine").field("config", &self.config).finish_non_exhaustive()
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn hash_str(h: &Helper<'_>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|name| h.hash_get(name))
        .map(|p| value::to_string(p.value()))
}

struct TranslateHelper {
    localization: Arc<dyn Localization>,
}

impl HelperDef for TranslateHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let key = hash_str(h, &["key", "k"]).unwrap_or_default();
        let group = hash_str(h, &["group", "g"]).unwrap_or_default();
        // p1..p5, stopping at the first gap
        let params: Vec<String> = ["p1", "p2", "p3", "p4", "p5"]
            .iter()
            .map_while(|name| h.hash_get(name).map(|p| value::to_string(p.value())))
            .collect();

        out.write(&self.localization.text(&key, &group, &params))?;
        Ok(())
    }
}

struct LinkHelper {
    links: LinksManager,
}

impl HelperDef for LinkHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _: &'reg Handlebars<'reg>,
        _: &'rc Context,
        _: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        const RESERVED: [&str; 6] = ["controller", "c", "method", "m", "absolute", "a"];

        let controller = hash_str(h, &["controller", "c"]).unwrap_or_default();
        let method = hash_str(h, &["method", "m"]).unwrap_or_default();
        let absolute = ["absolute", "a"]
            .iter()
            .find_map(|name| h.hash_get(name))
            .is_some_and(|p| value::to_bool(p.value()));
        let params: Vec<(String, String)> = h
            .hash()
            .iter()
            .filter(|(name, _)| !RESERVED.contains(*name))
            .map(|(name, p)| ((*name).to_owned(), value::to_string(p.value())))
            .collect();

        let url = if absolute {
            self.links
                .make_absolute_url(&controller, &method, &params)
                .map_err(|e| RenderErrorReason::Other(e.to_string()))?
        } else {
            self.links.make_url(&controller, &method, &params)
        };
        out.write(&url)?;
        Ok(())
    }
}

/// Collections as JSON, anything else (or an empty collection) as nothing.
fn json_encode_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let encoded = match h.param(0).map(|p| p.value()) {
        Some(v @ Value::Array(items)) if !items.is_empty() => v.to_string(),
        Some(v @ Value::Object(map)) if !map.is_empty() => v.to_string(),
        _ => String::new(),
    };
    out.write(&encoded)?;
    Ok(())
}

fn human_datetime_helper(
    h: &Helper,
    _: &Handlebars,
    _: &Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let raw = h.param(0).map(|p| value::to_string(p.value())).unwrap_or_default();
    if raw.is_empty() {
        return Ok(());
    }
    let parsed = parse_datetime(&raw)
        .ok_or_else(|| RenderErrorReason::Other(format!("humandatetime: cannot parse {raw:?}")))?;
    out.write(&parsed.format("%a, %d %b %Y %H:%M").to_string())?;
    Ok(())
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD` or a unix timestamp.
fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.naive_local())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().and_then(|d| d.and_hms_opt(0, 0, 0)))
        .or_else(|| {
            raw.parse::<i64>()
                .ok()
                .and_then(|ts| DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.naive_utc())
        })
}
