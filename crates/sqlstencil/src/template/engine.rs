//! The query engine.
//!
//! [`QueryEngine`] owns the MiniJinja environment, the [`FilterRegistry`] and
//! the template search path. It compiles templates, hands out
//! [`QueryTemplate`]s and offers one-call render helpers.
//!
//! # Environment setup
//!
//! Every template source (added inline, loaded from disk, included or
//! extended) is rewritten before MiniJinja compiles it, so that each `{{ }}`
//! expression ends in the emit filter. Auto escaping is switched to a custom
//! `sql` mode: MiniJinja then marks captured blocks and macro output as safe,
//! which keeps the markers inside them from being bound a second time. The
//! output formatter writes values verbatim.
//!
//! Each registered filter name gets a dispatcher installed in the environment
//! that resolves the filter in the registry at call time.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use minijinja::value::Rest;
use minijinja::{AutoEscape, Environment, Error, ErrorKind, Output, State, UndefinedBehavior, Value};
use tracing::debug;

use super::loader::SearchPath;
use super::renderer::{finish, render_sequential, render_suspending, QueryTemplate, RenderOptions};
use super::rewrite::{rewrite, EMIT_FILTER};
use super::scope;
use crate::classify::ClassifiedValue;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::error::{FilterError, QueryError, Result};
use crate::filters::{Filter, FilterRegistry, FilterScope};
use crate::format::RenderedQuery;

/// Compiles and renders query templates.
///
/// # Example
///
/// ```rust
/// use sqlstencil::{Context, ParamStyle, QueryEngine, RenderOptions};
///
/// let engine = QueryEngine::new();
/// let ctx = Context::new()
///     .with("table", "users")
///     .with("email", "user@mail.com");
/// let options = RenderOptions::new()
///     .with_style(ParamStyle::Named)
///     .with_identifier_quote(None);
///
/// let query = engine
///     .render_str_with(
///         "SELECT * FROM {{ table | identifier }} WHERE email = {{ email }}",
///         &ctx,
///         &options,
///     )
///     .unwrap();
/// assert_eq!(query.query, "SELECT * FROM users WHERE email = :email");
/// assert_eq!(query.params.get("email").and_then(|v| v.as_str()), Some("user@mail.com"));
/// ```
#[derive(Debug)]
pub struct QueryEngine {
    env: Environment<'static>,
    filters: Arc<RwLock<FilterRegistry>>,
    dispatchers: HashSet<String>,
    search_path: Arc<RwLock<SearchPath>>,
    inline: BTreeSet<String>,
    config: EngineConfig,
}

impl Default for QueryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryEngine {
    /// Creates an engine with the default configuration.
    pub fn new() -> Self {
        Self::build(EngineConfig::default(), SearchPath::new())
    }

    /// Creates an engine from a configuration.
    ///
    /// # Errors
    ///
    /// [`QueryError::Load`] if a configured search path is not a directory.
    pub fn with_config(config: EngineConfig) -> Result<Self> {
        let mut search_path = SearchPath::new();
        for dir in &config.search_paths {
            search_path.add_dir(dir)?;
        }
        Ok(Self::build(config, search_path))
    }

    fn build(config: EngineConfig, search_path: SearchPath) -> Self {
        let mut env = Environment::new();
        env.set_undefined_behavior(if config.strict_undefined {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        });
        env.set_trim_blocks(config.trim_blocks);
        env.set_lstrip_blocks(config.lstrip_blocks);
        env.set_keep_trailing_newline(config.keep_trailing_newline);
        env.set_auto_escape_callback(|_name: &str| AutoEscape::Custom("sql"));
        env.set_formatter(write_verbatim);
        env.add_filter(EMIT_FILTER, scope::emit);

        let search_path = Arc::new(RwLock::new(search_path));
        let loader_path = search_path.clone();
        env.set_loader(move |name: &str| -> std::result::Result<Option<String>, Error> {
            let loaded = loader_path
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .load(name);
            match loaded {
                Ok(Some(source)) => Ok(Some(rewrite(&source)?)),
                Ok(None) => Ok(None),
                Err(err) => Err(Error::new(ErrorKind::InvalidOperation, "failed to load template")
                    .with_source(err)),
            }
        });

        let mut registry = FilterRegistry::with_builtins();
        registry.set_allow_override(config.allow_filter_override);
        let names: Vec<String> = registry.names().into_iter().map(str::to_string).collect();

        let mut engine = Self {
            env,
            filters: Arc::new(RwLock::new(registry)),
            dispatchers: HashSet::new(),
            search_path,
            inline: BTreeSet::new(),
            config,
        };
        for name in names {
            engine.install_dispatcher(&name);
        }
        engine
    }

    fn install_dispatcher(&mut self, name: &str) {
        if !self.dispatchers.insert(name.to_string()) {
            return;
        }
        let registry = self.filters.clone();
        let filter_name = name.to_string();
        self.env.add_filter(
            name.to_string(),
            move |state: &State, value: Value, args: Rest<Value>| {
                scope::dispatch(&registry, &filter_name, state, value, args)
            },
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Default per-render options, from the configuration.
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            param_style: self.config.param_style.clone(),
            identifier_quote: self.config.identifier_quote,
        }
    }

    /// Compiles a template and registers it under `name`.
    ///
    /// A template added this way takes precedence over files of the same name
    /// in the search path.
    ///
    /// # Errors
    ///
    /// [`QueryError::TemplateSyntax`] for malformed source.
    pub fn add_template(&mut self, name: impl Into<String>, source: impl AsRef<str>) -> Result<()> {
        let name = name.into();
        let rewritten = rewrite(source.as_ref())?;
        self.env.add_template_owned(name.clone(), rewritten)?;
        debug!(template = %name, "compiled query template");
        self.inline.insert(name);
        Ok(())
    }

    /// Adds a directory to load templates from.
    pub fn add_search_path(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        self.search_path
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .add_dir(dir)?;
        self.config.search_paths.push(dir.to_path_buf());
        debug!(dir = %dir.display(), "added template search path");
        Ok(())
    }

    /// Names of all templates: added ones and those found in the search path.
    pub fn template_names(&self) -> Result<Vec<String>> {
        let mut names = self.inline.clone();
        let found = self
            .search_path
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .template_names()?;
        names.extend(found);
        Ok(names.into_iter().collect())
    }

    /// Looks up a template, loading it from the search path if needed.
    pub fn get_template(&self, name: &str) -> Result<QueryTemplate<'_>> {
        let template = self.env.get_template(name).map_err(|err| {
            if err.kind() == ErrorKind::TemplateNotFound {
                QueryError::TemplateNotFound(name.to_string())
            } else {
                QueryError::from(err)
            }
        })?;
        Ok(QueryTemplate::new(template, self.render_options()))
    }

    /// Renders the named template with the default options.
    pub fn render(&self, name: &str, ctx: &Context) -> Result<RenderedQuery> {
        self.get_template(name)?.render(ctx)
    }

    pub fn render_with(&self, name: &str, ctx: &Context, options: &RenderOptions) -> Result<RenderedQuery> {
        self.get_template(name)?.render_with(ctx, options)
    }

    /// Suspending render of the named template.
    pub async fn render_async(&self, name: &str, ctx: &Context) -> Result<RenderedQuery> {
        self.get_template(name)?.render_async(ctx).await
    }

    pub async fn render_async_with(
        &self,
        name: &str,
        ctx: &Context,
        options: &RenderOptions,
    ) -> Result<RenderedQuery> {
        self.get_template(name)?.render_async_with(ctx, options).await
    }

    /// Compiles and renders a one-off template.
    pub fn render_str(&self, source: &str, ctx: &Context) -> Result<RenderedQuery> {
        self.render_str_with(source, ctx, &self.render_options())
    }

    pub fn render_str_with(
        &self,
        source: &str,
        ctx: &Context,
        options: &RenderOptions,
    ) -> Result<RenderedQuery> {
        let rewritten = rewrite(source)?;
        let run = |root: Value| self.env.render_str(&rewritten, root);
        let marked = render_sequential(&run, ctx, options)?;
        finish("<string>", marked, options)
    }

    /// Suspending render of a one-off template.
    pub async fn render_str_async(&self, source: &str, ctx: &Context) -> Result<RenderedQuery> {
        self.render_str_async_with(source, ctx, &self.render_options())
            .await
    }

    pub async fn render_str_async_with(
        &self,
        source: &str,
        ctx: &Context,
        options: &RenderOptions,
    ) -> Result<RenderedQuery> {
        let rewritten = rewrite(source)?;
        let run = |root: Value| self.env.render_str(&rewritten, root);
        let marked = render_suspending(&run, ctx, options).await?;
        finish("<string>", marked, options)
    }

    /// Registers a filter.
    ///
    /// # Errors
    ///
    /// See [`FilterRegistry::register`].
    pub fn register(&mut self, name: impl Into<String>, filter: Filter) -> Result<()> {
        let name = name.into();
        let is_async = filter.is_async();
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(name.clone(), filter)?;
        self.install_dispatcher(&name);
        debug!(filter = %name, is_async, "registered filter");
        Ok(())
    }

    /// Registers a synchronous filter.
    ///
    /// ```rust
    /// use sqlstencil::{ClassifiedValue, Context, QueryEngine};
    ///
    /// let mut engine = QueryEngine::new();
    /// engine
    ///     .register_filter("lower", |_, value, _| match value {
    ///         ClassifiedValue::Parameter { value, name_hint } => Ok(ClassifiedValue::Parameter {
    ///             value: value.as_str().unwrap_or_default().to_lowercase().into(),
    ///             name_hint,
    ///         }),
    ///         raw => Ok(raw),
    ///     })
    ///     .unwrap();
    ///
    /// let query = engine
    ///     .render_str("{{ email | lower }}", &Context::new().with("email", "A@B.C"))
    ///     .unwrap();
    /// assert_eq!(query.params.get("email").and_then(|v| v.as_str()), Some("a@b.c"));
    /// ```
    pub fn register_filter<F>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&FilterScope<'_>, ClassifiedValue, &[Value]) -> std::result::Result<ClassifiedValue, FilterError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Filter::from_fn(f))
    }

    /// Registers a filter whose evaluation suspends.
    ///
    /// Templates using it can only be rendered with the `*_async` functions.
    pub fn register_async_filter<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<()>
    where
        F: Fn(&FilterScope<'_>, ClassifiedValue, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = std::result::Result<ClassifiedValue, FilterError>>
            + Send
            + 'static,
    {
        self.register(name, Filter::from_async_fn(f))
    }

    /// Removes a filter. Later uses of the name fail with [`QueryError::UnknownFilter`].
    pub fn unregister_filter(&mut self, name: &str) -> bool {
        let removed = self
            .filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .unregister(name)
            .is_some();
        if removed {
            debug!(filter = %name, "unregistered filter");
        }
        removed
    }

    /// Registered filter names, sorted.
    pub fn filter_names(&self) -> Vec<String> {
        self.filters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Writes values as they are; escaping is the emit filter's job.
fn write_verbatim(out: &mut Output, _state: &State, value: &Value) -> std::result::Result<(), Error> {
    write!(out, "{}", value)
        .map_err(|_| Error::new(ErrorKind::WriteFailure, "failed to write rendered output"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::Params;

    #[test]
    fn test_add_template_rejects_bad_syntax() {
        let mut engine = QueryEngine::new();
        let err = engine.add_template("bad", "{% if x %}").unwrap_err();
        assert!(err.is_syntax_error());
        let err = engine.add_template("empty", "{{ }}").unwrap_err();
        assert!(err.is_syntax_error());
    }

    #[test]
    fn test_get_template_not_found() {
        let engine = QueryEngine::new();
        let err = engine.get_template("missing").unwrap_err();
        assert!(matches!(err, QueryError::TemplateNotFound(name) if name == "missing"));
    }

    #[test]
    fn test_render_options_follow_config() {
        let config = EngineConfig::default()
            .with_param_style(crate::ParamStyle::Qmark)
            .with_identifier_quote(Some('`'));
        let engine = QueryEngine::with_config(config).unwrap();
        let options = engine.render_options();
        assert_eq!(options.param_style.name(), "qmark");
        assert_eq!(options.identifier_quote, Some('`'));
    }

    #[test]
    fn test_template_names_include_inline() {
        let mut engine = QueryEngine::new();
        engine.add_template("b", "SELECT 2").unwrap();
        engine.add_template("a", "SELECT 1").unwrap();
        assert_eq!(engine.template_names().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_filter_names() {
        let mut engine = QueryEngine::new();
        engine
            .register_filter("noop", |_, value, _| Ok(value))
            .unwrap();
        assert!(engine.filter_names().contains(&"noop".to_string()));
        assert!(engine.unregister_filter("noop"));
        assert!(!engine.unregister_filter("noop"));
    }

    #[test]
    fn test_duplicate_filter_with_overrides_disabled() {
        let config = EngineConfig {
            allow_filter_override: false,
            ..EngineConfig::default()
        };
        let mut engine = QueryEngine::with_config(config).unwrap();
        let err = engine
            .register_filter("identifier", |_, value, _| Ok(value))
            .unwrap_err();
        assert!(matches!(err, QueryError::DuplicateFilter(_)));
    }

    #[test]
    fn test_missing_search_path() {
        let config = EngineConfig::default().with_search_path("/definitely/not/here");
        let err = QueryEngine::with_config(config).unwrap_err();
        assert!(matches!(err, QueryError::Load(_)));
    }

    #[test]
    fn test_render_str_named() {
        let engine = QueryEngine::new();
        let ctx = Context::new().with("id", 7);
        let query = engine.render_str("id = {{ id }}", &ctx).unwrap();
        assert_eq!(query.query, "id = :id");
        let Params::Named(map) = query.params else {
            panic!("named style binds a mapping");
        };
        assert_eq!(map.get("id"), Some(&Value::from(7)));
    }
}
