//! CLI context store backed by a JSON file.
//!
//! A context names a deployment target (an ACI subscription/resource group,
//! or an ECS profile) and the store remembers which one is current.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{NimbusError, Result};

/// Deployment target data for an ACI context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AciContextData {
    /// Azure subscription ID.
    pub subscription_id: String,
    /// Resource group hosting the container groups.
    pub resource_group: String,
    /// Azure region, e.g. `eastus`.
    pub location: String,
}

/// Deployment target data for an ECS context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcsContextData {
    /// AWS profile name from the shared credentials file.
    pub profile: String,
    /// AWS region, e.g. `eu-west-3`.
    pub region: String,
}

/// Backend-specific payload of a context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContextKind {
    /// Azure Container Instances target.
    Aci(AciContextData),
    /// AWS ECS target (delegated to an external plugin at execution time).
    Ecs(EcsContextData),
}

impl ContextKind {
    /// Short type name shown in `context ls`.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Aci(_) => "aci",
            Self::Ecs(_) => "ecs",
        }
    }
}

/// A named deployment context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// Unique context name.
    pub name: String,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Backend payload.
    pub kind: ContextKind,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current: Option<String>,
    #[serde(default)]
    contexts: Vec<ContextEntry>,
}

/// Context store backed by a JSON file under the config directory.
#[derive(Debug)]
pub struct ContextStore {
    store_path: PathBuf,
}

impl ContextStore {
    /// Opens or creates a context store at the given file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created.
    pub fn open(store_path: impl Into<PathBuf>) -> Result<Self> {
        let store_path = store_path.into();
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NimbusError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        Ok(Self { store_path })
    }

    /// Lists all contexts in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store file cannot be read or parsed.
    pub fn list(&self) -> Result<Vec<ContextEntry>> {
        Ok(self.read_file()?.contexts)
    }

    /// Returns the context with the given name.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` if no such context exists.
    pub fn get(&self, name: &str) -> Result<ContextEntry> {
        self.read_file()?
            .contexts
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| NimbusError::NotFound {
                kind: "context",
                id: name.to_owned(),
            })
    }

    /// Returns the current context, if one has been selected.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` if no context is selected or the
    /// selected context has been removed.
    pub fn current(&self) -> Result<ContextEntry> {
        let file = self.read_file()?;
        let name = file.current.ok_or(NimbusError::NotFound {
            kind: "current context",
            id: String::new(),
        })?;
        file.contexts
            .into_iter()
            .find(|c| c.name == name)
            .ok_or(NimbusError::NotFound {
                kind: "context",
                id: name,
            })
    }

    /// Registers a new context and makes it current.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::AlreadyExists` if the name is taken.
    pub fn create(&self, entry: ContextEntry) -> Result<()> {
        let mut file = self.read_file()?;
        if file.contexts.iter().any(|c| c.name == entry.name) {
            return Err(NimbusError::AlreadyExists {
                kind: "context",
                id: entry.name,
            });
        }
        file.current = Some(entry.name.clone());
        file.contexts.push(entry);
        self.write_file(&file)
    }

    /// Selects the named context as current.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` if no such context exists.
    pub fn set_current(&self, name: &str) -> Result<()> {
        let mut file = self.read_file()?;
        if !file.contexts.iter().any(|c| c.name == name) {
            return Err(NimbusError::NotFound {
                kind: "context",
                id: name.to_owned(),
            });
        }
        file.current = Some(name.to_owned());
        self.write_file(&file)
    }

    /// Removes a context by name, clearing the current pointer if needed.
    ///
    /// # Errors
    ///
    /// Returns `NimbusError::NotFound` if no such context exists.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut file = self.read_file()?;
        let before = file.contexts.len();
        file.contexts.retain(|c| c.name != name);
        if file.contexts.len() == before {
            return Err(NimbusError::NotFound {
                kind: "context",
                id: name.to_owned(),
            });
        }
        if file.current.as_deref() == Some(name) {
            file.current = None;
        }
        self.write_file(&file)
    }

    fn read_file(&self) -> Result<ContextFile> {
        if !self.store_path.exists() {
            return Ok(ContextFile::default());
        }
        let content = std::fs::read_to_string(&self.store_path).map_err(|e| NimbusError::Io {
            path: self.store_path.clone(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    fn write_file(&self, file: &ContextFile) -> Result<()> {
        let json = serde_json::to_string_pretty(file)?;
        std::fs::write(&self.store_path, json).map_err(|e| NimbusError::Io {
            path: self.store_path.clone(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aci_entry(name: &str) -> ContextEntry {
        ContextEntry {
            name: name.to_owned(),
            description: None,
            kind: ContextKind::Aci(AciContextData {
                subscription_id: "subID".to_owned(),
                resource_group: "group1".to_owned(),
                location: "eastus".to_owned(),
            }),
        }
    }

    fn temp_store() -> (tempfile::TempDir, ContextStore) {
        #[allow(clippy::unwrap_used)]
        let dir = tempfile::tempdir().unwrap();
        #[allow(clippy::unwrap_used)]
        let store = ContextStore::open(dir.path().join("contexts.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn create_makes_context_current() {
        let (_dir, store) = temp_store();
        store.create(aci_entry("azure")).expect("create");
        let current = store.current().expect("current");
        assert_eq!(current.name, "azure");
        assert_eq!(current.kind.type_name(), "aci");
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let (_dir, store) = temp_store();
        store.create(aci_entry("azure")).expect("create");
        let err = store.create(aci_entry("azure")).expect_err("duplicate");
        assert!(matches!(err, NimbusError::AlreadyExists { .. }));
    }

    #[test]
    fn remove_clears_current_pointer() {
        let (_dir, store) = temp_store();
        store.create(aci_entry("azure")).expect("create");
        store.remove("azure").expect("remove");
        let err = store.current().expect_err("no current");
        assert!(matches!(err, NimbusError::NotFound { .. }));
    }

    #[test]
    fn set_current_requires_existing_context() {
        let (_dir, store) = temp_store();
        let err = store.set_current("missing").expect_err("missing");
        assert!(matches!(err, NimbusError::NotFound { .. }));
    }

    #[test]
    fn contexts_survive_reopen() {
        let (dir, store) = temp_store();
        store.create(aci_entry("azure")).expect("create");
        drop(store);
        let reopened =
            ContextStore::open(dir.path().join("contexts.json")).expect("reopen");
        assert_eq!(reopened.list().expect("list").len(), 1);
    }
}
