//! Compiled query templates and the render driver.
//!
//! A render turns a template and a [`Context`] into a [`MarkedQuery`] (the
//! renderer's output, with marker tokens where parameters were bound), then
//! formats it into a [`RenderedQuery`] for the requested [`ParamStyle`].
//!
//! # Sequential and suspending renders
//!
//! [`QueryTemplate::render`] evaluates every expression to completion before
//! the next. Reaching an async filter or a deferred context value fails with
//! [`QueryError::RequiresSuspending`].
//!
//! [`QueryTemplate::render_async`] drives the template as a sequence of passes
//! (see [`crate::suspend`]). Each pass stops at the first unresolved suspension
//! point; the driver awaits it and replays. The result is identical to a
//! sequential render of the same template with the resolved values.
//!
//! Either way a render is atomic: it returns a complete query or an error,
//! never partial text or a partial parameter list.

use std::sync::Arc;

use minijinja::{Error, Template, Value};
use tracing::{debug, trace};

use super::scope::{PassOutcome, RenderScope};
use crate::context::Context;
use crate::error::{QueryError, Result};
use crate::format::{MarkedQuery, RenderedQuery};
use crate::style::ParamStyle;
use crate::suspend::{EvalMode, FilterOutputs, Resolutions};

/// Per-render settings.
///
/// Engines hand out their configured defaults through
/// [`QueryEngine::render_options`](crate::QueryEngine::render_options).
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Placeholder style of the rendered query.
    pub param_style: ParamStyle,
    /// Quote character for the `identifier` filter; `None` inlines validated bare names.
    pub identifier_quote: Option<char>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            param_style: ParamStyle::Named,
            identifier_quote: Some('"'),
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the parameter style.
    pub fn with_style(mut self, style: ParamStyle) -> Self {
        self.param_style = style;
        self
    }

    /// Sets the identifier quote character.
    pub fn with_identifier_quote(mut self, quote: Option<char>) -> Self {
        self.identifier_quote = quote;
        self
    }
}

/// A compiled query template.
///
/// Rendering never mutates the template; one template can serve any number of
/// concurrent renders.
///
/// # Example
///
/// ```rust
/// use sqlstencil::{Context, QueryEngine};
///
/// let mut engine = QueryEngine::new();
/// engine
///     .add_template("by_email", "SELECT * FROM users WHERE email = {{ email }}")
///     .unwrap();
///
/// let template = engine.get_template("by_email").unwrap();
/// let query = template
///     .render(&Context::new().with("email", "user@mail.com"))
///     .unwrap();
/// assert_eq!(query.query, "SELECT * FROM users WHERE email = :email");
/// ```
#[derive(Debug)]
pub struct QueryTemplate<'e> {
    template: Template<'e, 'e>,
    defaults: RenderOptions,
}

impl<'e> QueryTemplate<'e> {
    pub(crate) fn new(template: Template<'e, 'e>, defaults: RenderOptions) -> Self {
        Self { template, defaults }
    }

    /// Template name.
    pub fn name(&self) -> &str {
        self.template.name()
    }

    /// Renders with the engine's default options.
    pub fn render(&self, ctx: &Context) -> Result<RenderedQuery> {
        self.render_with(ctx, &self.defaults)
    }

    /// Renders with explicit options.
    pub fn render_with(&self, ctx: &Context, options: &RenderOptions) -> Result<RenderedQuery> {
        let marked = self.render_marked_with(ctx, options)?;
        finish(self.name(), marked, options)
    }

    /// Renders, awaiting async filters and deferred values in evaluation order.
    ///
    /// The template is replayed once per suspension point, so a render that
    /// awaits N times runs N + 1 passes. Registered filters run once per
    /// evaluation, as in [`render`](Self::render); MiniJinja's own filters and
    /// plain lookups are repeated by each pass.
    pub async fn render_async(&self, ctx: &Context) -> Result<RenderedQuery> {
        self.render_async_with(ctx, &self.defaults).await
    }

    /// Suspending render with explicit options.
    pub async fn render_async_with(
        &self,
        ctx: &Context,
        options: &RenderOptions,
    ) -> Result<RenderedQuery> {
        let run = |root: Value| self.template.render(root);
        let marked = render_suspending(&run, ctx, options).await?;
        finish(self.name(), marked, options)
    }

    /// Renderer output before placeholder formatting.
    pub fn render_marked(&self, ctx: &Context) -> Result<MarkedQuery> {
        self.render_marked_with(ctx, &self.defaults)
    }

    /// Renderer output before placeholder formatting, with explicit options.
    pub fn render_marked_with(&self, ctx: &Context, options: &RenderOptions) -> Result<MarkedQuery> {
        let run = |root: Value| self.template.render(root);
        render_sequential(&run, ctx, options)
    }
}

/// Renders a template once, failing on any suspension point.
pub(crate) fn render_sequential(
    run: &(dyn Fn(Value) -> std::result::Result<String, Error> + Sync),
    ctx: &Context,
    options: &RenderOptions,
) -> Result<MarkedQuery> {
    ctx.validate()?;
    match pass(run, ctx, options, EvalMode::Sequential, Arc::default(), Arc::default()) {
        PassOutcome::Complete(marked) => Ok(marked),
        PassOutcome::Failed(err) => Err(err),
        PassOutcome::Suspended(suspension) => Err(QueryError::RequiresSuspending {
            name: suspension.name().to_string(),
        }),
    }
}

/// Renders a template pass by pass, awaiting one suspension point between passes.
pub(crate) async fn render_suspending(
    run: &(dyn Fn(Value) -> std::result::Result<String, Error> + Sync),
    ctx: &Context,
    options: &RenderOptions,
) -> Result<MarkedQuery> {
    ctx.validate()?;
    let mut resolutions = Arc::new(Resolutions::default());
    let filter_outputs = Arc::new(FilterOutputs::default());

    loop {
        match pass(
            run,
            ctx,
            options,
            EvalMode::Suspending,
            resolutions.clone(),
            filter_outputs.clone(),
        ) {
            PassOutcome::Complete(marked) => {
                trace!(resolved = resolutions.len(), "suspending render complete");
                return Ok(marked);
            }
            PassOutcome::Failed(err) => return Err(err),
            PassOutcome::Suspended(suspension) => {
                trace!(
                    name = suspension.name(),
                    resolved = resolutions.len(),
                    "awaiting suspension point before replay"
                );
                Arc::make_mut(&mut resolutions).resolve(suspension).await?;
            }
        }
    }
}

fn pass(
    run: &(dyn Fn(Value) -> std::result::Result<String, Error> + Sync),
    ctx: &Context,
    options: &RenderOptions,
    mode: EvalMode,
    resolutions: Arc<Resolutions>,
    filter_outputs: Arc<FilterOutputs>,
) -> PassOutcome {
    let scope = RenderScope::new(ctx.clone(), options.clone(), mode, resolutions, filter_outputs);
    let result = run(scope.to_value());
    scope.finish(result)
}

pub(crate) fn finish(
    name: &str,
    marked: MarkedQuery,
    options: &RenderOptions,
) -> Result<RenderedQuery> {
    let rendered = marked.format(&options.param_style)?;
    debug!(
        template = name,
        style = %options.param_style,
        params = rendered.params.len(),
        "rendered query"
    );
    Ok(rendered)
}
