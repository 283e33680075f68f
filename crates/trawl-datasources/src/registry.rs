//! Datasource registry: type name to factory.
//!
//! The server builds its [`DatasourceSet`] from `[datasources.<id>]`
//! configuration tables. Each table names a `type`; the registry looks up
//! the factory registered under that type and hands it the remaining
//! options.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use trawl_core::{Datasource, DatasourceError, DatasourceSet};

use crate::live::{self, LiveDatasource, LiveOptions};
use crate::memory::{self, MemoryDatasource, MemoryOptions};

/// Errors raised while building datasources from configuration.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The table has no `type` key.
    #[error("datasource '{0}' has no type")]
    MissingType(String),

    /// No factory is registered for the type.
    #[error("datasource '{id}': unknown type '{kind}'")]
    UnknownType {
        /// Configured id.
        id: String,
        /// Requested type name.
        kind: String,
    },

    /// The options could not be parsed.
    #[error("datasource '{id}': invalid options: {message}")]
    InvalidOptions {
        /// Configured id.
        id: String,
        /// Parser message.
        message: String,
    },

    /// The factory failed to construct the datasource.
    #[error("datasource '{id}': {source}")]
    Build {
        /// Configured id.
        id: String,
        /// Underlying failure.
        #[source]
        source: DatasourceError,
    },
}

/// One `[datasources.<id>]` table.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasourceSpec {
    /// Configured id.
    pub id: String,
    /// Type name used to select the factory.
    pub kind: String,
    /// Display name, defaults to the id.
    pub name: String,
    /// Remaining type-specific options.
    pub options: toml::Table,
}

impl DatasourceSpec {
    /// Splits a configuration table into type, name and options.
    pub fn from_table(id: &str, table: &toml::Table) -> Result<Self, RegistryError> {
        let mut options = table.clone();
        let kind = match options.remove("type") {
            Some(toml::Value::String(kind)) => kind,
            _ => return Err(RegistryError::MissingType(id.to_string())),
        };
        let name = match options.remove("name") {
            Some(toml::Value::String(name)) => name,
            Some(_) => {
                return Err(RegistryError::InvalidOptions {
                    id: id.to_string(),
                    message: "name must be a string".into(),
                })
            }
            None => id.to_string(),
        };
        Ok(Self {
            id: id.to_string(),
            kind,
            name,
            options,
        })
    }

    /// Deserializes the options into a typed struct.
    pub fn parse_options<T>(&self) -> Result<T, RegistryError>
    where
        T: serde::de::DeserializeOwned,
    {
        toml::Value::Table(self.options.clone())
            .try_into()
            .map_err(|e: toml::de::Error| RegistryError::InvalidOptions {
                id: self.id.clone(),
                message: e.message().to_string(),
            })
    }
}

/// Factory building a datasource from its configuration.
pub type DatasourceFactory =
    Arc<dyn Fn(&DatasourceSpec) -> Result<Arc<dyn Datasource>, RegistryError> + Send + Sync>;

/// Registry of datasource factories.
pub struct DatasourceRegistry {
    factories: RwLock<HashMap<String, DatasourceFactory>>,
}

impl DatasourceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a registry with the built-in `memory` and `live` types.
    #[must_use]
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(memory::KIND, Arc::new(build_memory));
        registry.register(live::KIND, Arc::new(build_live));
        registry
    }

    /// Registers (or replaces) the factory for `kind`.
    pub fn register(&self, kind: impl Into<String>, factory: DatasourceFactory) {
        self.factories.write().insert(kind.into(), factory);
    }

    /// Registered type names, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Builds a single datasource.
    pub fn build(&self, spec: &DatasourceSpec) -> Result<Arc<dyn Datasource>, RegistryError> {
        let factory = self
            .factories
            .read()
            .get(&spec.kind)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType {
                id: spec.id.clone(),
                kind: spec.kind.clone(),
            })?;
        factory(spec)
    }

    /// Builds every configured datasource.
    ///
    /// Tables that fail to build are logged and skipped so one broken entry
    /// does not keep the gateway from starting.
    #[must_use]
    pub fn build_set(&self, tables: &BTreeMap<String, toml::Table>) -> DatasourceSet {
        let mut set = DatasourceSet::new();
        for (id, table) in tables {
            let built = DatasourceSpec::from_table(id, table)
                .and_then(|spec| self.build(&spec).map(|ds| (spec, ds)));
            match built {
                Ok((spec, datasource)) => {
                    info!(datasource = %spec.id, kind = %spec.kind, "datasource configured");
                    set.insert(spec.id, spec.name, datasource);
                }
                Err(e) => warn!(datasource = %id, error = %e, "skipping datasource"),
            }
        }
        set
    }
}

fn build_memory(spec: &DatasourceSpec) -> Result<Arc<dyn Datasource>, RegistryError> {
    let options: MemoryOptions = spec.parse_options()?;
    let datasource = MemoryDatasource::from_options(options).map_err(|source| {
        RegistryError::Build {
            id: spec.id.clone(),
            source,
        }
    })?;
    Ok(Arc::new(datasource))
}

fn build_live(spec: &DatasourceSpec) -> Result<Arc<dyn Datasource>, RegistryError> {
    let options: LiveOptions = spec.parse_options()?;
    Ok(Arc::new(LiveDatasource::new(&options)))
}

impl Default for DatasourceRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for DatasourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasourceRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(source: &str) -> BTreeMap<String, toml::Table> {
        toml::from_str(source).unwrap()
    }

    #[test]
    fn test_builtin_kinds() {
        assert_eq!(DatasourceRegistry::with_builtin().kinds(), ["live", "memory"]);
    }

    #[test]
    fn test_spec_from_table() {
        let table: toml::Table = toml::from_str(
            r#"
            type = "memory"
            name = "People"
            channel_capacity = 8
            "#,
        )
        .unwrap();
        let spec = DatasourceSpec::from_table("people", &table).unwrap();
        assert_eq!(spec.kind, "memory");
        assert_eq!(spec.name, "People");
        assert_eq!(spec.options.len(), 1);
    }

    #[test]
    fn test_name_defaults_to_id() {
        let table: toml::Table = toml::from_str(r#"type = "live""#).unwrap();
        let spec = DatasourceSpec::from_table("feed", &table).unwrap();
        assert_eq!(spec.name, "feed");
    }

    #[test]
    fn test_missing_type() {
        let table = toml::Table::new();
        assert!(matches!(
            DatasourceSpec::from_table("x", &table),
            Err(RegistryError::MissingType(_))
        ));
    }

    #[test]
    fn test_build_set_skips_broken_entries() {
        let registry = DatasourceRegistry::with_builtin();
        let set = registry.build_set(&tables(
            r#"
            [people]
            type = "memory"
            records = [{ id = "1", name = "alice" }]

            [feed]
            type = "live"

            [broken]
            type = "elasticsearch"

            [typo]
            type = "memory"
            recods = []
            "#,
        ));

        let ids: Vec<_> = set.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, ["feed", "people"]);
        assert_eq!(set.get("feed").unwrap().kind(), "live");
        assert!(set.get("feed").unwrap().as_receiver().is_some());
    }

    #[test]
    fn test_unknown_type_error() {
        let registry = DatasourceRegistry::new();
        let spec = DatasourceSpec {
            id: "x".into(),
            kind: "nope".into(),
            name: "x".into(),
            options: toml::Table::new(),
        };
        let err = registry.build(&spec).err().unwrap();
        assert_eq!(err.to_string(), "datasource 'x': unknown type 'nope'");
    }

    #[test]
    fn test_custom_factory() {
        let registry = DatasourceRegistry::new();
        registry.register(
            "fixed",
            Arc::new(
                |_spec: &DatasourceSpec| -> Result<Arc<dyn Datasource>, RegistryError> {
                    Ok(Arc::new(MemoryDatasource::new(Vec::new())))
                },
            ),
        );
        let set = registry.build_set(&tables("[a]\ntype = \"fixed\"\n"));
        assert_eq!(set.len(), 1);
    }
}
