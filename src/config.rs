use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Key holding the consumer group identifier. Required by every consumer.
pub const GROUP_ID: &str = "group.id";

/// Free-form client configuration.
///
/// Apart from [`GROUP_ID`], which the consumer checks itself, entries are
/// passed through untouched to the transport behind the consumer.
///
/// # Examples
///
/// ```
/// use kafka_group::Configuration;
///
/// let mut config = Configuration::new();
/// config
///     .set("bootstrap.servers", "localhost:9092")
///     .set("group.id", "billing");
/// assert_eq!(config.group_id(), Some("billing"));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a flat JSON object of string values.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Builder-style variant of [`Configuration::set`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// The configured group id, if present and non-blank.
    pub fn group_id(&self) -> Option<&str> {
        self.get(GROUP_ID).filter(|id| !id.trim().is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<HashMap<String, String>> for Configuration {
    fn from(map: HashMap<String, String>) -> Self {
        Configuration {
            values: map.into_iter().collect(),
        }
    }
}

impl<K, V> FromIterator<(K, V)> for Configuration
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Configuration {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
