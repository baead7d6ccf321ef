use kvobj_store::Extremity;
use serde::{Deserialize, Serialize};

use crate::error::{ObjectError, ObjectResult};

/// Which end of a priority queue `pop` takes from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityOrder {
    /// Lowest priority value first.
    #[default]
    Ascending,
    /// Highest priority value first.
    Descending,
}

impl PriorityOrder {
    /// The sorted-set end that is the front of the queue.
    pub fn front(self) -> Extremity {
        match self {
            PriorityOrder::Ascending => Extremity::Min,
            PriorityOrder::Descending => Extremity::Max,
        }
    }
}

/// Settings shared by every accessor an [`ObjectClient`](crate::ObjectClient)
/// hands out.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// Prefix joined with `:` onto every key, isolating tenants that share
    /// one store.
    pub namespace: Option<String>,
    /// Pop direction for priority queues.
    pub priority_order: PriorityOrder,
    /// Count hint for each page of a hash scan.
    pub scan_batch: usize,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            priority_order: PriorityOrder::Ascending,
            scan_batch: 100,
        }
    }
}

impl ObjectConfig {
    /// Parse a TOML document; missing settings keep their defaults.
    pub fn from_toml_str(text: &str) -> ObjectResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| ObjectError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ObjectResult<()> {
        if self.scan_batch == 0 {
            return Err(ObjectError::InvalidConfig("scan_batch must be at least 1".into()));
        }
        if self.namespace.as_deref() == Some("") {
            return Err(ObjectError::InvalidConfig("namespace must not be empty".into()));
        }
        Ok(())
    }

    /// Full store key for a collection name.
    pub fn key(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{name}"),
            None => name.to_string(),
        }
    }
}
