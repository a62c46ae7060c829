use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_CONFIG_FILE: &str = "kira-ba.json";
pub const DEFAULT_ID_FIELD: &str = "PUBCHEM_SUBSTANCE_ID";
pub const DEFAULT_NOTATION_FIELD: &str = "PUBCHEM_SMILES";
pub const DEFAULT_REQUEST_INTERVAL_MS: u64 = 200;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub database: Option<Utf8PathBuf>,
    #[serde(default)]
    pub bioassay_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub substance_dir: Option<Utf8PathBuf>,
    #[serde(default)]
    pub protein_xrefs: Option<Utf8PathBuf>,
    #[serde(default)]
    pub protein_only: Option<bool>,
    #[serde(default)]
    pub record_empty_assays: Option<bool>,
    #[serde(default)]
    pub skip_sources: Option<Vec<String>>,
    #[serde(default)]
    pub substance_id_field: Option<String>,
    #[serde(default)]
    pub line_notation_field: Option<String>,
    #[serde(default)]
    pub request_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub database: Utf8PathBuf,
    pub bioassay_dir: Option<Utf8PathBuf>,
    pub substance_dir: Option<Utf8PathBuf>,
    pub protein_xrefs: Option<Utf8PathBuf>,
    pub protein_only: bool,
    pub record_empty_assays: bool,
    pub skip_sources: Vec<String>,
    pub substance_id_field: String,
    pub line_notation_field: String,
    pub request_interval_ms: u64,
}

impl ResolvedConfig {
    pub fn skips_source(&self, source: &str) -> bool {
        let source = source.to_ascii_lowercase();
        self.skip_sources.iter().any(|skipped| *skipped == source)
    }

    pub fn bioassay_dir(&self) -> Result<&Utf8PathBuf, KiraError> {
        self.bioassay_dir
            .as_ref()
            .ok_or(KiraError::MissingInput("bioassay_dir"))
    }

    pub fn substance_dir(&self) -> Result<&Utf8PathBuf, KiraError> {
        self.substance_dir
            .as_ref()
            .ok_or(KiraError::MissingInput("substance_dir"))
    }

    pub fn protein_xrefs(&self) -> Result<&Utf8PathBuf, KiraError> {
        self.protein_xrefs
            .as_ref()
            .ok_or(KiraError::MissingInput("protein_xrefs"))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_or_default(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        match Self::resolve(path) {
            Err(KiraError::MissingConfig) => {
                tracing::debug!("no {DEFAULT_CONFIG_FILE} found; using defaults");
                Self::resolve_config(Config::default())
            }
            other => other,
        }
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let database = match config.database {
            Some(path) => path,
            None => default_database_path()?,
        };

        let skip_sources = config
            .skip_sources
            .unwrap_or_else(default_skip_sources)
            .into_iter()
            .map(|source| source.trim().to_ascii_lowercase())
            .filter(|source| !source.is_empty())
            .collect();

        Ok(ResolvedConfig {
            schema_version,
            database,
            bioassay_dir: config.bioassay_dir,
            substance_dir: config.substance_dir,
            protein_xrefs: config.protein_xrefs,
            protein_only: config.protein_only.unwrap_or(true),
            record_empty_assays: config.record_empty_assays.unwrap_or(false),
            skip_sources,
            substance_id_field: config
                .substance_id_field
                .unwrap_or_else(|| DEFAULT_ID_FIELD.to_string()),
            line_notation_field: config
                .line_notation_field
                .unwrap_or_else(|| DEFAULT_NOTATION_FIELD.to_string()),
            request_interval_ms: config
                .request_interval_ms
                .unwrap_or(DEFAULT_REQUEST_INTERVAL_MS),
        })
    }
}

pub fn default_skip_sources() -> Vec<String> {
    vec!["chembl".to_string()]
}

pub fn default_database_path() -> Result<Utf8PathBuf, KiraError> {
    let base = BaseDirs::new()
        .ok_or_else(|| KiraError::Filesystem("cannot determine home directory".to_string()))?;
    let dir = Utf8PathBuf::from_path_buf(base.data_local_dir().to_path_buf())
        .map_err(|path| KiraError::Filesystem(format!("non UTF-8 data dir {}", path.display())))?;
    Ok(dir.join("kira-bioassay").join("pubchem.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config {
            database: Some(Utf8PathBuf::from("/tmp/x.db")),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert!(resolved.protein_only);
        assert!(!resolved.record_empty_assays);
        assert_eq!(resolved.skip_sources, vec!["chembl".to_string()]);
        assert_eq!(resolved.substance_id_field, DEFAULT_ID_FIELD);
        assert_eq!(resolved.request_interval_ms, 200);
    }

    #[test]
    fn source_filter_ignores_case() {
        let config = Config {
            database: Some(Utf8PathBuf::from("/tmp/x.db")),
            skip_sources: Some(vec![" ChEMBL ".to_string()]),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert!(resolved.skips_source("CHEMBL"));
        assert!(!resolved.skips_source("DTP/NCI"));
    }
}
