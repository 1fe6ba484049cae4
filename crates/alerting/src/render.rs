//! Message Renderer
//!
//! Renders alerts through a hot-reloadable handlebars template. Rendering
//! never fails: a template that errors at render time is replaced by the
//! built-in default for that message.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use handlebars::Handlebars;
use serde_json::{Map, Value};
use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error, info, warn};

use crate::{Alert, FieldMapping, RenderError};

/// Built-in message template
pub const DEFAULT_TEMPLATE: &str = r#"[{{status}}] {{summary}}
> Instance: {{instance}}
> Level: {{level}}{{#if (eq status "firing")}}
> Start: {{startsAt}}{{else}}
> Start: {{startsAt}}
> End: {{endsAt}}{{/if}}
> Description: {{description}}"#;

/// Default display format for `startsAt` / `endsAt`
pub const DEFAULT_TIME_FORMAT: &str = "%m/%d %H:%M:%S %Z";

const TEMPLATE_NAME: &str = "message";

/// Parse an IANA timezone name. Blank names mean UTC.
pub fn parse_timezone(name: &str) -> Option<Tz> {
    let name = name.trim();
    if name.is_empty() {
        return Some(Tz::UTC);
    }
    name.parse::<Tz>().ok()
}

/// Alert message renderer
pub struct Renderer {
    /// Currently loaded template, swapped whole on reload
    active: RwLock<Arc<Handlebars<'static>>>,
    /// Built-in template used when the active one fails
    fallback: Handlebars<'static>,
    mapping: FieldMapping,
    timezone: Tz,
    time_format: String,
}

impl Renderer {
    /// Create a renderer with the default template active
    pub fn new(
        mapping: FieldMapping,
        timezone: Tz,
        time_format: impl Into<String>,
    ) -> Result<Self, RenderError> {
        let fallback = compile(DEFAULT_TEMPLATE, false)?;
        let active = Arc::new(compile(DEFAULT_TEMPLATE, false)?);
        Ok(Self {
            active: RwLock::new(active),
            fallback,
            mapping,
            timezone,
            time_format: time_format.into(),
        })
    }

    /// Load a template file and make it active.
    ///
    /// A relative path that does not exist is retried next to the executable.
    /// On any failure the previous template stays active.
    pub fn load_from_path(&self, path: &Path) -> Result<(), RenderError> {
        info!("Loading message template from {}", path.display());
        let source = read_template(path)?;
        self.load_template_str(&source)
    }

    /// Compile a template source and make it active
    pub fn load_template_str(&self, source: &str) -> Result<(), RenderError> {
        let compiled = Arc::new(compile(source, true)?);
        *self.active.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        Ok(())
    }

    /// Make the built-in template active again
    pub fn load_default(&self) {
        info!("Loading default message template");
        if let Ok(compiled) = compile(DEFAULT_TEMPLATE, false) {
            *self.active.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(compiled);
        }
    }

    /// Render an alert with the active template, falling back to the default
    pub fn render(&self, alert: &Alert, fingerprint: &str) -> String {
        let vars = self.variables(alert, fingerprint);
        debug!(fingerprint, "Template variables: {:?}", vars);

        let active = Arc::clone(&self.active.read().unwrap_or_else(PoisonError::into_inner));
        match active.render(TEMPLATE_NAME, &vars) {
            Ok(message) => message,
            Err(e) => {
                warn!(fingerprint, error = %e, "Template render failed, using default template");
                self.fallback.render(TEMPLATE_NAME, &vars).unwrap_or_else(|e| {
                    error!(fingerprint, error = %e, "Default template render failed");
                    format!(
                        "[{}] {} ({})",
                        alert.status,
                        alert.label(&self.mapping.alertname),
                        alert.label(&self.mapping.instance)
                    )
                })
            }
        }
    }

    /// Template variables for an alert
    pub fn variables(&self, alert: &Alert, fingerprint: &str) -> Map<String, Value> {
        let mut vars = Map::new();
        for (name, value) in alert.labels.iter().chain(alert.annotations.iter()) {
            vars.insert(name.clone(), Value::from(value.as_str()));
        }
        for (role, name) in self.mapping.label_roles() {
            vars.insert(role.to_string(), Value::from(alert.label(name)));
        }
        for (role, name) in self.mapping.annotation_roles() {
            vars.insert(role.to_string(), Value::from(alert.annotation(name)));
        }

        let ends_at = alert.ends_at.map(|t| self.format_time(t)).unwrap_or_default();
        vars.insert("status".to_string(), Value::from(alert.status.as_str()));
        vars.insert("startsAt".to_string(), Value::from(self.format_time(alert.starts_at)));
        vars.insert("endsAt".to_string(), Value::from(ends_at));
        vars.insert("fingerprint".to_string(), Value::from(fingerprint));
        vars
    }

    fn format_time(&self, time: DateTime<Utc>) -> String {
        let local = time.with_timezone(&self.timezone);
        let mut out = String::new();
        // An invalid format specifier surfaces as a fmt error here.
        if write!(out, "{}", local.format(&self.time_format)).is_err() {
            return local.to_rfc3339();
        }
        out
    }
}

fn compile(source: &str, strict: bool) -> Result<Handlebars<'static>, RenderError> {
    let mut registry = Handlebars::new();
    registry.set_strict_mode(strict);
    registry.register_escape_fn(handlebars::no_escape);
    registry
        .register_template_string(TEMPLATE_NAME, source)
        .map_err(Box::new)?;
    Ok(registry)
}

fn read_template(path: &Path) -> Result<String, RenderError> {
    match std::fs::read_to_string(path) {
        Ok(source) => Ok(source),
        Err(e) if e.kind() == io::ErrorKind::NotFound && path.is_relative() => {
            let beside_exe = std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join(path)));
            match beside_exe {
                Some(candidate) => std::fs::read_to_string(&candidate).map_err(|source| {
                    RenderError::Io {
                        path: candidate,
                        source,
                    }
                }),
                None => Err(RenderError::Io {
                    path: PathBuf::from(path),
                    source: e,
                }),
            }
        }
        Err(source) => Err(RenderError::Io {
            path: PathBuf::from(path),
            source,
        }),
    }
}
