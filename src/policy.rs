//! Path-based compression eligibility.
//!
//! Compressing a response that reflects attacker-controlled input next to a
//! secret lets an observer recover the secret from the compressed size
//! (BREACH). POST responses are therefore only compressed for an explicit,
//! short allow-list, while other methods use a broader one.

use crate::error::ConfigError;
use http::Method;
use regex::Regex;
use std::env;

/// Environment variable holding the allow-list for POST responses.
pub const POST_RESPONSE_ALLOW_LIST_VAR: &str = "GZIP_POST_RESPONSE_ALLOW_LIST";

/// Environment variable holding the allow-list for all other responses.
pub const RESPONSE_ALLOW_LIST_VAR: &str = "GZIP_RESPONSE_ALLOW_LIST";

/// Patterns used for POST responses when no override is configured.
pub const DEFAULT_POST_RESPONSE_ALLOW_LIST: &[&str] = &[r"^/?api/projects/\d+/query/?$"];

/// Patterns used for non-POST responses when no override is configured.
pub const DEFAULT_RESPONSE_ALLOW_LIST: &[&str] = &[
    r"^/?api/plugin_config/\d+/frontend/?$",
    r"^/?api/projects/@current/property_definitions/?$",
    r"^/?api/projects/\d+/event_definitions/?$",
    r"^/?api/projects/\d+/insights/(trend|funnel)/?$",
    r"^/?api/projects/\d+/insights/?$",
    r"^/?api/projects/\d+/insights/\d+/?$",
    r"^/?api/projects/\d+/dashboards/\d+/?$",
    r"^/?api/projects/\d+/dashboards/?$",
    r"^/?api/projects/\d+/actions/?$",
    r"^/?api/projects/\d+/session_recordings/?$",
    r"^/?api/projects/\d+/session_recordings/.*$",
    r"^/?api/projects/\d+/session_recording_playlists/?$",
    r"^/?api/projects/\d+/session_recording_playlists/.*$",
    r"^/?api/projects/\d+/performance_events/?$",
    r"^/?api/projects/\d+/performance_events/.*$",
    r"^/?api/projects/\d+/exports/\d+/content/?$",
    r"^/?api/projects/\d+/activity_log/important_changes/?$",
    r"^/?api/projects/\d+/uploaded_media/?$",
    r"^/uploaded_media/.*$",
    r"^/year_in_posthog/.*$",
    r"^/api/element/stats/?$",
    r"^/api/projects/\d+/groups/property_definitions/?$",
    r"^/api/projects/\d+/cohorts/?$",
    r"^/api/projects/\d+/persons/?$",
    r"^/api/organizations/@current/plugins/?$",
    r"^api/projects/@current/feature_flags/my_flags/?$",
    r"^/?api/projects/\d+/query/?$",
    r"^/?api/instance_status/?$",
    r"^/array/.*$",
];

/// Splits a comma-separated setting into trimmed, non-empty items.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Maps the result of reading `name` from the environment to an optional value.
fn env_value(
    name: &str,
    value: Result<String, env::VarError>,
) -> Result<Option<String>, ConfigError> {
    match value {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            variable: name.to_string(),
        }),
    }
}

/// An ordered list of path patterns. A path is allowed if any pattern matches.
#[derive(Debug, Clone)]
pub struct AllowList {
    patterns: Vec<Regex>,
}

impl AllowList {
    /// Compiles the given patterns, in order.
    ///
    /// `variable` names the setting the patterns came from and is only used
    /// in error messages.
    pub fn from_patterns<I, S>(variable: &str, patterns: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                let pattern = pattern.as_ref();
                Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                    variable: variable.to_string(),
                    pattern: pattern.to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { patterns })
    }

    /// Builds a list from a raw setting value.
    ///
    /// Falls back to `defaults` when the value is absent or contains no
    /// patterns once parsed.
    pub fn from_env_value(
        variable: &str,
        value: Option<&str>,
        defaults: &[&str],
    ) -> Result<Self, ConfigError> {
        let parsed = value.map(parse_list).unwrap_or_default();
        if parsed.is_empty() {
            Self::from_patterns(variable, defaults)
        } else {
            Self::from_patterns(variable, parsed)
        }
    }

    /// Returns true if any pattern matches `path`.
    pub fn is_match(&self, path: &str) -> bool {
        self.patterns.iter().any(|re| re.is_match(path))
    }

    /// The patterns as originally written, in configuration order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(Regex::as_str)
    }

    /// Number of patterns in the list.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// Returns true if the list has no patterns.
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Decides which responses may be compressed, based on request method and path.
#[derive(Debug, Clone)]
pub struct CompressionPolicy {
    post: AllowList,
    general: AllowList,
}

impl CompressionPolicy {
    /// Creates a policy from explicit allow-lists.
    pub fn new(post: AllowList, general: AllowList) -> Self {
        Self { post, general }
    }

    /// Creates a policy from the built-in default lists.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::load(|_| Ok(None))
    }

    /// Loads the policy from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(|name| env_value(name, env::var(name)))
    }

    /// Loads the policy through a custom lookup, e.g. a settings map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::load(|name| Ok(lookup(name)))
    }

    fn load<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<Option<String>, ConfigError>,
    {
        let post_value = lookup(POST_RESPONSE_ALLOW_LIST_VAR)?;
        let general_value = lookup(RESPONSE_ALLOW_LIST_VAR)?;

        let post = AllowList::from_env_value(
            POST_RESPONSE_ALLOW_LIST_VAR,
            post_value.as_deref(),
            DEFAULT_POST_RESPONSE_ALLOW_LIST,
        )?;
        let general = AllowList::from_env_value(
            RESPONSE_ALLOW_LIST_VAR,
            general_value.as_deref(),
            DEFAULT_RESPONSE_ALLOW_LIST,
        )?;

        tracing::info!(
            post_patterns = post.len(),
            patterns = general.len(),
            post_overridden = post_value.is_some_and(|v| !parse_list(&v).is_empty()),
            overridden = general_value.is_some_and(|v| !parse_list(&v).is_empty()),
            "loaded response compression allow-lists"
        );

        Ok(Self { post, general })
    }

    /// Returns true if a response to `method` on `path` may be compressed.
    ///
    /// `path` must not include the query string and should already be
    /// percent-decoded; the compression service decodes it before asking.
    pub fn is_eligible(&self, method: &Method, path: &str) -> bool {
        if *method == Method::POST {
            self.post.is_match(path)
        } else {
            self.general.is_match(path)
        }
    }

    /// The allow-list applied to POST requests.
    pub fn post_allow_list(&self) -> &AllowList {
        &self.post
    }

    /// The allow-list applied to every other method.
    pub fn allow_list(&self) -> &AllowList {
        &self.general
    }
}
