use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A parameter a script asks its caller to choose a value for.
///
/// Scripts declare parameters as `name = "opt1|opt2|opt3"`; the first option
/// doubles as the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub default: String,
    pub options: Vec<String>,
}

impl ParamSpec {
    /// Build a spec from the pipe-joined option string a script declares.
    pub fn from_options(name: impl Into<String>, joined: &str) -> Self {
        let options: Vec<String> = joined.split('|').map(str::to_string).collect();
        let default = options.first().cloned().unwrap_or_default();
        Self {
            name: name.into(),
            default,
            options,
        }
    }
}

/// Invoked when an executing script requests parameters. Returns the chosen
/// value for each parameter name. Runs in a detached thread; a reply that
/// arrives after the callback timeout is discarded.
pub type ParamCallback = Box<dyn FnOnce(Vec<ParamSpec>) -> HashMap<String, String> + Send>;

/// The fallback choice: every parameter gets its default.
pub fn default_param_values(specs: &[ParamSpec]) -> HashMap<String, String> {
    specs
        .iter()
        .map(|s| (s.name.clone(), s.default.clone()))
        .collect()
}
