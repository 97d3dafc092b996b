use std::collections::HashSet;

use serde::Deserialize;

use crate::{Error, Result};

/// Selection of service-info groups for one unit. `false` (or an
/// absent field) disables the group, `true` or an empty value selects
/// everything, a list picks specific group ids.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    Toggle(Option<bool>),
    Ids(Vec<String>),
}

impl Default for Selection {
    fn default() -> Self {
        Selection::Toggle(Some(false))
    }
}

impl Selection {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Selection::Toggle(Some(false)))
    }

    pub fn selects(&self, id: &str) -> bool {
        match self {
            Selection::Toggle(Some(false)) => false,
            Selection::Toggle(_) => true,
            Selection::Ids(ids) => ids.iter().any(|i| i == id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitConfig {
    pub unit: u32,
    #[serde(default)]
    pub categories: Selection,
    #[serde(default)]
    pub statuses: Selection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SystemConfig {
    pub system_id: u32,
    #[serde(default)]
    pub units: Vec<UnitConfig>,
}

/// Configuration for one integration entry. A validation failure is
/// fatal to this entry's setup only; other entries are unaffected.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EntryConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    #[serde(default)]
    pub write_access: bool,
    #[serde(default)]
    pub systems: Vec<SystemConfig>,
}

impl EntryConfig {
    /// OAuth2 scope matching the requested access level.
    pub fn scope(&self) -> &'static str {
        if self.write_access {
            "READSYSTEM WRITESYSTEM"
        } else {
            "READSYSTEM"
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(Error::InvalidConfig("client_id is empty".to_string()));
        }
        if self.client_secret.trim().is_empty() {
            return Err(Error::InvalidConfig("client_secret is empty".to_string()));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(Error::InvalidConfig("redirect_uri is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for system in &self.systems {
            if system.system_id == 0 {
                return Err(Error::InvalidConfig("system id must be positive".to_string()));
            }
            if !seen.insert(system.system_id) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate system id {}",
                    system.system_id
                )));
            }
            let mut units = HashSet::new();
            for unit in &system.units {
                if !units.insert(unit.unit) {
                    return Err(Error::InvalidConfig(format!(
                        "duplicate unit {} for system {}",
                        unit.unit, system.system_id
                    )));
                }
            }
        }
        Ok(())
    }
}
