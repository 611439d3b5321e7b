use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::{attribution::Attribution, config::Config};

/// Static mapping from `theme_leadtype_creative` to a lead-magnet file.
/// An unknown key or a file missing on disk resolves to nothing; there is
/// no fallback file.
#[derive(Debug, Clone)]
pub struct LeadCatalog {
    dir: PathBuf,
    files: BTreeMap<String, String>,
}

impl LeadCatalog {
    pub fn new(dir: impl Into<PathBuf>, files: BTreeMap<String, String>) -> Self {
        Self {
            dir: dir.into(),
            files,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.leads_dir(), config.lead_files.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn resolve(&self, attribution: &Attribution) -> Option<PathBuf> {
        let key = attribution.lead_key()?;
        let file_name = self.files.get(&key)?.trim();
        if file_name.is_empty() {
            return None;
        }
        let path = self.dir.join(file_name);
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn catalog(dir: &Path) -> LeadCatalog {
        let mut files = BTreeMap::new();
        files.insert("TH1_CL_01".to_string(), "checklist_24h.pdf".to_string());
        files.insert("TH2_MG_01".to_string(), "missing.pdf".to_string());
        LeadCatalog::new(dir, files)
    }

    #[test]
    fn resolves_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("checklist_24h.pdf"), b"%PDF").unwrap();

        let resolved = catalog(dir.path()).resolve(&Attribution::parse("yt_TH1_CL_01"));
        assert_eq!(resolved, Some(dir.path().join("checklist_24h.pdf")));
    }

    #[test]
    fn unknown_key_or_missing_file_resolves_to_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog(dir.path());

        assert_eq!(catalog.resolve(&Attribution::parse("yt_TH2_MG_01")), None);
        assert_eq!(catalog.resolve(&Attribution::parse("yt_TH3_QZ_01")), None);
        assert_eq!(catalog.resolve(&Attribution::parse("yt_TH1")), None);
    }
}
