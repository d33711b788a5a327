//! Placeholder resolution over configuration values.
//!
//! Two syntaxes are recognized anywhere inside the string values of `env`,
//! `args`, `headers`, `url`, and `command`:
//!
//! - `${NAME}` - substitute `NAME` from the resolution context
//! - `${cmd: …}` - run `…` through the OS shell and substitute its stdout
//!
//! plus two deprecated legacy forms: a standalone `$NAME` element of `args`,
//! and a leading `$: …` in an env value (equivalent to `${cmd: …}`).
//!
//! The context starts from the process environment. `env` is resolved first
//! (iteratively, so entries may reference each other) and layered onto the
//! context before the remaining fields are resolved. Resolution is
//! functional: the input config is never mutated.

mod command;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::config::ServerConfig;
use crate::error::{HubError, HubResult};

pub use command::{CommandError, CommandExecutor, ShellExecutor, DEFAULT_COMMAND_TIMEOUT};

/// Maximum env resolution passes before concluding a cycle.
pub const DEFAULT_MAX_ENV_PASSES: usize = 10;

/// Behavior knobs for one resolution run.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Strict mode fails on missing variables, failed commands, and cycles.
    /// Lenient mode leaves the offending placeholder verbatim and logs.
    pub strict: bool,
    /// Upper bound on env resolution passes.
    pub max_env_passes: usize,
}

impl ResolverOptions {
    pub fn strict() -> Self {
        Self {
            strict: true,
            max_env_passes: DEFAULT_MAX_ENV_PASSES,
        }
    }

    pub fn lenient() -> Self {
        Self {
            strict: false,
            max_env_passes: DEFAULT_MAX_ENV_PASSES,
        }
    }
}

/// One parsed piece of a value string.
#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    /// `${NAME}`; `raw` is the original spelling, kept for lenient fallback.
    Var { name: String, raw: String },
    /// `${cmd: body}`; `raw` is the original spelling.
    Cmd { body: String, raw: String },
}

/// Split a value into literal and placeholder segments. `${cmd: …}` bodies
/// may contain nested `${…}` references, so closing braces are matched with
/// a depth counter. An unterminated placeholder is treated as literal text.
fn parse_segments(input: &str) -> Vec<Segment> {
    let bytes = input.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let mut depth = 1usize;
            let mut j = i + 2;
            while j < bytes.len() {
                if bytes[j] == b'$' && j + 1 < bytes.len() && bytes[j + 1] == b'{' {
                    depth += 1;
                    j += 2;
                    continue;
                }
                if bytes[j] == b'}' {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                j += 1;
            }
            if depth != 0 {
                // Unterminated; keep the rest as a literal.
                break;
            }

            if literal_start < i {
                segments.push(Segment::Literal(input[literal_start..i].to_string()));
            }

            let raw = input[i..=j].to_string();
            let inner = &input[i + 2..j];
            if let Some(body) = inner.strip_prefix("cmd:") {
                segments.push(Segment::Cmd {
                    body: body.trim_start().to_string(),
                    raw,
                });
            } else {
                segments.push(Segment::Var {
                    name: inner.trim().to_string(),
                    raw,
                });
            }
            i = j + 1;
            literal_start = i;
        } else {
            i += 1;
        }
    }

    if literal_start < input.len() {
        segments.push(Segment::Literal(input[literal_start..].to_string()));
    }
    segments
}

/// Outcome of one resolution attempt over a string.
enum Attempt {
    Resolved(String),
    /// References an env sibling that has not resolved yet; retry next pass.
    NotYet,
    Failed(HubError),
}

type AttemptFuture<'a> = Pin<Box<dyn Future<Output = Attempt> + Send + 'a>>;

/// The resolution engine. Cheap to construct; one instance per connect
/// attempt is the expected usage.
pub struct PlaceholderResolver {
    options: ResolverOptions,
    executor: Arc<dyn CommandExecutor>,
    base_context: Option<BTreeMap<String, String>>,
}

impl PlaceholderResolver {
    pub fn new(options: ResolverOptions, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            options,
            executor,
            base_context: None,
        }
    }

    /// Default strict resolver shelling out with the standard timeout.
    pub fn strict() -> Self {
        Self::new(ResolverOptions::strict(), Arc::new(ShellExecutor::new()))
    }

    /// Replace the process environment with a fixed context (tests).
    pub fn with_base_context(mut self, context: BTreeMap<String, String>) -> Self {
        self.base_context = Some(context);
        self
    }

    fn initial_context(&self) -> BTreeMap<String, String> {
        match &self.base_context {
            Some(ctx) => ctx.clone(),
            None => std::env::vars().collect(),
        }
    }

    /// Resolve every placeholder in `config`, returning a new config.
    ///
    /// Given the same input and the same process environment the output is
    /// identical, modulo `${cmd: …}` execution which is behind
    /// [`CommandExecutor`] and stubbed in tests.
    pub async fn resolve(&self, config: &ServerConfig) -> HubResult<ServerConfig> {
        let mut context = self.initial_context();
        let mut out = config.clone();

        out.env = self.resolve_env(&config.env, &mut context).await?;

        if let Some(command) = &config.command {
            out.command = Some(self.resolve_field(command, "command", &context).await?);
        }

        let mut args = Vec::with_capacity(config.args.len());
        for arg in &config.args {
            args.push(self.resolve_arg(arg, &context).await?);
        }
        out.args = args;

        if let Some(url) = &config.url {
            out.url = Some(self.resolve_field(url, "url", &context).await?);
        }

        let mut headers = BTreeMap::new();
        for (key, value) in &config.headers {
            let field = format!("headers.{key}");
            headers.insert(key.clone(), self.resolve_field(value, &field, &context).await?);
        }
        out.headers = headers;

        Ok(out)
    }

    /// Resolve the `env` mapping. Values are resolved iteratively so entries
    /// may reference each other in any order; resolved values are layered
    /// onto `context` for the fields resolved afterwards.
    async fn resolve_env(
        &self,
        env: &BTreeMap<String, Option<String>>,
        context: &mut BTreeMap<String, String>,
    ) -> HubResult<BTreeMap<String, Option<String>>> {
        let mut pending: BTreeMap<String, String> = BTreeMap::new();
        let mut resolved: BTreeMap<String, Option<String>> = BTreeMap::new();

        for (key, value) in env {
            let raw = match value.as_deref() {
                // Null or empty falls back to the like-named process-env
                // variable.
                None | Some("") => match context.get(key) {
                    Some(inherited) => inherited.clone(),
                    None => {
                        if self.options.strict {
                            return Err(HubError::VariableNotFound {
                                name: key.clone(),
                                field: format!("env.{key}"),
                            });
                        }
                        debug!(key = %key, "[Resolver] No fallback for empty env value");
                        String::new()
                    }
                },
                Some(value) => value.to_string(),
            };

            let raw = match raw.strip_prefix("$:") {
                Some(rest) => {
                    warn!(
                        key = %key,
                        "[Resolver] '$: command' env syntax is deprecated, use '${{cmd: command}}'"
                    );
                    format!("${{cmd: {}}}", rest.trim_start())
                }
                None => raw,
            };

            pending.insert(key.clone(), raw);
        }

        for _pass in 0..self.options.max_env_passes {
            if pending.is_empty() {
                break;
            }
            let mut progressed = false;
            let waiting: BTreeSet<String> = pending.keys().cloned().collect();

            for key in waiting.iter() {
                let raw = pending[key].clone();
                let field = format!("env.{key}");
                match self
                    .resolve_text(&raw, &field, context, Some(&waiting))
                    .await
                {
                    Attempt::Resolved(value) => {
                        context.insert(key.clone(), value.clone());
                        resolved.insert(key.clone(), Some(value));
                        pending.remove(key);
                        progressed = true;
                    }
                    Attempt::NotYet => {}
                    Attempt::Failed(err) => return Err(err),
                }
            }

            if !progressed {
                break;
            }
        }

        if !pending.is_empty() {
            let keys: Vec<&String> = pending.keys().collect();
            if self.options.strict {
                let first = keys[0].clone();
                return Err(HubError::VariableNotFound {
                    name: first.clone(),
                    field: format!("env.{first} (circular reference among {keys:?})"),
                });
            }
            warn!(
                keys = ?keys,
                "[Resolver] Circular env references left unresolved"
            );
            for (key, raw) in pending {
                resolved.insert(key, Some(raw));
            }
        }

        Ok(resolved)
    }

    /// Resolve a non-env field against the finished context.
    async fn resolve_field(
        &self,
        input: &str,
        field: &str,
        context: &BTreeMap<String, String>,
    ) -> HubResult<String> {
        match self.resolve_text(input, field, context, None).await {
            Attempt::Resolved(value) => Ok(value),
            // Without a pending set, NotYet is unreachable.
            Attempt::NotYet => Ok(input.to_string()),
            Attempt::Failed(err) => Err(err),
        }
    }

    /// Resolve one `args` element, honoring the legacy standalone `$NAME`
    /// form.
    async fn resolve_arg(
        &self,
        arg: &str,
        context: &BTreeMap<String, String>,
    ) -> HubResult<String> {
        if let Some(name) = legacy_var_name(arg) {
            warn!(
                arg = %arg,
                "[Resolver] '$NAME' argument syntax is deprecated, use '${{NAME}}'"
            );
            return match context.get(name) {
                Some(value) => Ok(value.clone()),
                None if self.options.strict => Err(HubError::VariableNotFound {
                    name: name.to_string(),
                    field: "args".to_string(),
                }),
                None => {
                    debug!(name = %name, "[Resolver] Legacy arg variable not found, keeping literal");
                    Ok(arg.to_string())
                }
            };
        }
        self.resolve_field(arg, "args", context).await
    }

    /// The recursive workhorse: expand `input` against `context`. When
    /// `pending` is given (env resolution), a reference to a still-pending
    /// sibling yields [`Attempt::NotYet`] so the caller retries next pass.
    fn resolve_text<'a>(
        &'a self,
        input: &'a str,
        field: &'a str,
        context: &'a BTreeMap<String, String>,
        pending: Option<&'a BTreeSet<String>>,
    ) -> AttemptFuture<'a> {
        Box::pin(async move {
            let mut result = String::with_capacity(input.len());

            for segment in parse_segments(input) {
                match segment {
                    Segment::Literal(text) => result.push_str(&text),
                    Segment::Var { name, raw } => match context.get(&name) {
                        Some(value) => result.push_str(value),
                        None => {
                            if pending.is_some_and(|p| p.contains(&name)) {
                                return Attempt::NotYet;
                            }
                            if self.options.strict {
                                return Attempt::Failed(HubError::VariableNotFound {
                                    name,
                                    field: field.to_string(),
                                });
                            }
                            debug!(
                                name = %name,
                                field = %field,
                                "[Resolver] Variable not found, keeping placeholder"
                            );
                            result.push_str(&raw);
                        }
                    },
                    Segment::Cmd { body, raw } => {
                        // The command text is itself resolved before execution,
                        // enabling `${cmd: cat ${RUNTIME_DIR}/token}`.
                        let command = match self.resolve_text(&body, field, context, pending).await
                        {
                            Attempt::Resolved(command) => command,
                            Attempt::NotYet => return Attempt::NotYet,
                            Attempt::Failed(err) => return Attempt::Failed(err),
                        };
                        match self.executor.run(&command).await {
                            Ok(output) => result.push_str(&output),
                            Err(err) => {
                                if self.options.strict {
                                    return Attempt::Failed(HubError::CmdExecutionFailed {
                                        field: field.to_string(),
                                        reason: err.to_string(),
                                    });
                                }
                                warn!(
                                    field = %field,
                                    error = %err,
                                    "[Resolver] Command resolver failed, keeping placeholder"
                                );
                                result.push_str(&raw);
                            }
                        }
                    }
                }
            }

            Attempt::Resolved(result)
        })
    }
}

/// `$NAME` as the entire argument, nothing else.
fn legacy_var_name(arg: &str) -> Option<&str> {
    let name = arg.strip_prefix('$')?;
    if name.is_empty() || name.starts_with('{') || name.starts_with(':') {
        return None;
    }
    let mut chars = name.chars();
    let first = chars.next()?;
    if !(first.is_ascii_alphabetic() || first == '_') {
        return None;
    }
    if chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Some(name)
    } else {
        None
    }
}
