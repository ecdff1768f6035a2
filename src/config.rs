/// Parser and renderer configuration

use serde::{Deserialize, Serialize};

/// A configuration loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration is not valid JSON, or has fields of the wrong type.
    #[error("config error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field has a value the parser cannot work with.
    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        /// The offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Tunables shared by the parser and the renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Nesting limit for recursive parsing. Past this depth every token is
    /// plain text.
    ///
    /// Runs of unclosed openers are retried once per depth level, so parse
    /// time on such input grows with both input length and this limit. A few
    /// kilobytes of `[[span]]**//` repeated take seconds at the default.
    /// Callers rendering untrusted input should cap its size or lower this.
    pub max_depth: usize,
    /// How many times one parse may splice an included article into its
    /// token stream.
    pub max_includes: usize,
    /// Prefix forced onto user-supplied element ids.
    pub id_prefix: String,
    /// CSS class for links to articles that do not exist.
    pub missing_link_class: String,
    /// Default label of a folded collapsible block.
    pub collapsible_show: String,
    /// Default label of an unfolded collapsible block.
    pub collapsible_hide: String,
    /// Error text for a missing include. `{name}` is replaced by the escaped
    /// article name.
    pub missing_include_text: String,
    /// Text of the link that creates the missing article.
    pub missing_include_create_text: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_depth: 64,
            max_includes: 32,
            id_prefix: "u-".to_string(),
            missing_link_class: "newpage".to_string(),
            collapsible_show: "+ открыть блок".to_string(),
            collapsible_hide: "- закрыть блок".to_string(),
            missing_include_text: "Вставленная страница &quot;{name}&quot; не существует"
                .to_string(),
            missing_include_create_text: "создать её сейчас".to_string(),
        }
    }
}

impl Config {
    /// Load a configuration from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_depth == 0 {
            return Err(ConfigError::Invalid {
                field: "max_depth",
                reason: "must be at least 1",
            });
        }
        if self.id_prefix.is_empty() {
            return Err(ConfigError::Invalid {
                field: "id_prefix",
                reason: "must not be empty",
            });
        }
        Ok(())
    }
}
