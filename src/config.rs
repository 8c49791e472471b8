use std::path::Path;

use serde::Deserialize;

use crate::cli::Cli;
use crate::error::{Error, Result};
use crate::grammar::{FileType, GrammarRegistry, default_file_types, validate_separator};
use crate::key::DEFAULT_SEPARATOR;

/// Config file read when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = ".agilereview.toml";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub separator: Option<char>,
    pub store_dir: Option<String>,
    pub author: Option<String>,
    pub review: Option<String>,
    pub file_types: Option<Vec<FileType>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub separator: char,
    pub store_dir: String,
    pub author: Option<String>,
    pub review: Option<String>,
    pub file_types: Vec<FileType>,
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Self> {
        let file_config = match cli.config.as_deref() {
            Some(path) => {
                let config_path = Path::new(path);
                if !config_path.exists() {
                    return Err(Error::ConfigNotFound(config_path.to_path_buf()));
                }
                parse_config(&std::fs::read_to_string(config_path)?)?
            }
            None => {
                let config_path = Path::new(DEFAULT_CONFIG_PATH);
                if config_path.exists() {
                    parse_config(&std::fs::read_to_string(config_path)?)?
                } else {
                    ConfigFile::default()
                }
            }
        };

        let config = merge(file_config, cli);
        validate_separator(config.separator)?;
        Ok(config)
    }

    /// Compile the configured file types.
    pub fn registry(&self) -> Result<GrammarRegistry> {
        GrammarRegistry::new(&self.file_types, self.separator)
    }
}

pub fn parse_config(content: &str) -> Result<ConfigFile> {
    let config: ConfigFile = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ConfigFile) -> Result<()> {
    if let Some(separator) = config.separator {
        validate_separator(separator)?;
    }
    if let Some(ref store_dir) = config.store_dir
        && store_dir.trim().is_empty()
    {
        return Err(Error::ConfigValidation(
            "store_dir must not be empty".to_string(),
        ));
    }
    if let Some(ref file_types) = config.file_types {
        if file_types.is_empty() {
            return Err(Error::ConfigValidation(
                "file_types must list at least one entry".to_string(),
            ));
        }
        for file_type in file_types {
            if file_type.extensions.is_empty() {
                return Err(Error::ConfigValidation(format!(
                    "file type with tokens '{}' '{}' lists no extensions",
                    file_type.open, file_type.close
                )));
            }
            if file_type.open.trim().is_empty() || file_type.close.trim().is_empty() {
                return Err(Error::ConfigValidation(
                    "file type tokens must not be empty".to_string(),
                ));
            }
        }
    }
    Ok(())
}

pub fn merge(file: ConfigFile, cli: &Cli) -> Config {
    Config {
        separator: cli
            .separator
            .or(file.separator)
            .unwrap_or(DEFAULT_SEPARATOR),
        store_dir: cli
            .store_dir
            .clone()
            .or(file.store_dir)
            .unwrap_or_else(|| ".agilereview/reviews".to_string()),
        author: file.author,
        review: file.review,
        file_types: file.file_types.unwrap_or_else(default_file_types),
    }
}
