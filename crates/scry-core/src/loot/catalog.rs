use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub short_name: String,
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub important: bool,
}

impl CatalogItem {
    /// Short name if present, full name otherwise.
    pub fn display_name(&self) -> &str {
        if self.short_name.is_empty() {
            &self.name
        } else {
            &self.short_name
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogContainer {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    items: Vec<CatalogItem>,
    #[serde(default)]
    containers: Vec<CatalogContainer>,
}

/// Known item and container templates, keyed by template id.
#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    items: HashMap<String, CatalogItem>,
    containers: HashMap<String, CatalogContainer>,
}

impl ItemCatalog {
    pub fn new(items: Vec<CatalogItem>, containers: Vec<CatalogContainer>) -> Self {
        Self {
            items: items.into_iter().map(|i| (i.id.clone(), i)).collect(),
            containers: containers.into_iter().map(|c| (c.id.clone(), c)).collect(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        Ok(Self::new(file.items, file.containers))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let catalog = Self::from_json(&content)?;
        info!(
            "Loaded item catalog from {} ({} items, {} containers)",
            path.as_ref().display(),
            catalog.items.len(),
            catalog.containers.len()
        );
        Ok(catalog)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut file = CatalogFile {
            items: self.items.values().cloned().collect(),
            containers: self.containers.values().cloned().collect(),
        };
        file.items.sort_by(|a, b| a.id.cmp(&b.id));
        file.containers.sort_by(|a, b| a.id.cmp(&b.id));
        fs::write(path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }

    pub fn item(&self, id: &str) -> Option<&CatalogItem> {
        self.items.get(id)
    }

    pub fn container(&self, id: &str) -> Option<&CatalogContainer> {
        self.containers.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_catalog() {
        let temp = NamedTempFile::new().unwrap();
        std::fs::write(
            temp.path(),
            r#"{
                "items": [
                    { "id": "5c0530ee86f774697952d952", "name": "LEDX Skin Transilluminator", "short_name": "LEDX", "value": 900000, "important": true },
                    { "id": "57347ca924597744596b4e71", "name": "Graphics card" }
                ],
                "containers": [ { "id": "578f87a3245977356274f2cb", "name": "Duffle bag" } ]
            }"#,
        )
        .unwrap();

        let catalog = ItemCatalog::load(temp.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        let ledx = catalog.item("5c0530ee86f774697952d952").unwrap();
        assert_eq!(ledx.display_name(), "LEDX");
        assert!(ledx.important);
        let gpu = catalog.item("57347ca924597744596b4e71").unwrap();
        assert_eq!(gpu.display_name(), "Graphics card");
        assert_eq!(gpu.value, 0);
        assert_eq!(
            catalog.container("578f87a3245977356274f2cb").unwrap().name,
            "Duffle bag"
        );
    }

    #[test]
    fn test_save_and_reload() {
        let catalog = ItemCatalog::new(
            vec![CatalogItem {
                id: "a".into(),
                name: "Alpha".into(),
                short_name: String::new(),
                value: 10,
                important: false,
            }],
            Vec::new(),
        );
        let temp = NamedTempFile::new().unwrap();
        catalog.save(temp.path()).unwrap();
        let reloaded = ItemCatalog::load(temp.path()).unwrap();
        assert_eq!(reloaded.item("a"), catalog.item("a"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = ItemCatalog::load("/nonexistent/catalog.json").unwrap_err();
        assert!(err.is_not_found());
    }
}
