use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maps site-local machine codes to the station names used in the history table.
///
/// Unknown codes resolve to themselves.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct MachineResolver {
    table: HashMap<String, String>,
}

impl MachineResolver {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            table: entries
                .into_iter()
                .map(|(k, v)| (k.into().trim().to_string(), v.into()))
                .collect(),
        }
    }

    pub fn resolve<'a>(&'a self, code: &'a str) -> &'a str {
        self.table
            .get(code.trim())
            .map(String::as_str)
            .unwrap_or(code)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
