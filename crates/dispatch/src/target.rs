//! Target Registry

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use url::Url;

use crate::ForwardError;

/// Placeholder in `params` replaced by the URL-encoded message
pub const MESSAGE_PLACEHOLDER: &str = "[[message]]";

/// Downstream endpoint for one alert level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Endpoint URL
    pub api: String,
    /// `POST` or `GET`, case-insensitive
    #[serde(default = "default_method")]
    pub method: String,
    /// Form body or query string containing [`MESSAGE_PLACEHOLDER`]
    #[serde(default)]
    pub params: String,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Outbound call for one forward attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForwardRequest {
    /// `application/x-www-form-urlencoded` body
    Post { url: String, form: String },
    Get { url: String },
}

impl ForwardRequest {
    pub fn url(&self) -> &str {
        match self {
            ForwardRequest::Post { url, .. } | ForwardRequest::Get { url } => url,
        }
    }
}

impl Target {
    pub fn new(api: impl Into<String>, method: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            api: api.into(),
            method: method.into(),
            params: params.into(),
        }
    }

    /// Parameters with the trimmed, URL-encoded message substituted
    pub fn encode_params(&self, message: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(message.trim().as_bytes()).collect();
        self.params.replace(MESSAGE_PLACEHOLDER, &encoded)
    }

    /// Build the outbound request for a rendered message
    pub fn request(&self, message: &str) -> Result<ForwardRequest, ForwardError> {
        let method = self.method.trim().to_ascii_uppercase();
        if method != "POST" && method != "GET" {
            return Err(ForwardError::UnsupportedMethod(self.method.clone()));
        }

        let url = Url::parse(&self.api).map_err(|e| ForwardError::InvalidUrl {
            url: self.api.clone(),
            reason: e.to_string(),
        })?;
        let params = self.encode_params(message);

        if method == "POST" {
            return Ok(ForwardRequest::Post {
                url: url.into(),
                form: params,
            });
        }

        if params.is_empty() {
            return Ok(ForwardRequest::Get { url: url.into() });
        }
        let separator = if url.query().is_some() { '&' } else { '?' };
        Ok(ForwardRequest::Get {
            url: format!("{}{}{}", url, separator, params),
        })
    }
}

/// Level to target mapping. Levels match case-insensitively; configuration
/// keys arrive lowercased.
#[derive(Debug, Clone, Default)]
pub struct TargetRegistry {
    targets: HashMap<String, Target>,
}

impl TargetRegistry {
    pub fn new(targets: HashMap<String, Target>) -> Self {
        let targets = targets
            .into_iter()
            .map(|(level, target)| (level.to_lowercase(), target))
            .collect();
        Self { targets }
    }

    pub fn get(&self, level: &str) -> Option<&Target> {
        self.targets.get(&level.to_lowercase())
    }

    pub fn contains(&self, level: &str) -> bool {
        self.get(level).is_some()
    }

    /// Configured levels, sorted
    pub fn levels(&self) -> Vec<&str> {
        let mut levels: Vec<&str> = self.targets.keys().map(String::as_str).collect();
        levels.sort_unstable();
        levels
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl FromIterator<(String, Target)> for TargetRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Target)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
