//! Configuration file format and attach-argument parsing (§6).
//!
//! The daemon accepts either a TOML configuration file or command-line
//! attach arguments; both resolve into the same [`ImageSpec`] list that
//! [`crate::daemon::Daemon`] consumes at startup.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("could not parse config file {path}: {source}")]
    Parse { path: String, source: toml::de::Error },

    #[error("invalid target id {0}, must be 0..7")]
    InvalidTargetId(u8),

    #[error("invalid lun {0}, must be 0..7")]
    InvalidLun(u8),

    #[error("unrecognized image type {0:?}")]
    UnrecognizedType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Hdf,
    Hds,
    Mo,
    Cd,
    Bridge,
}

impl ImageType {
    /// Infers the image type from a path's extension, per §6's
    /// extension table. Recognizes the bare keywords `bridge`/`mo`/`cd`
    /// for images with no backing file.
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        let lower = path.to_ascii_lowercase();
        match lower.as_str() {
            "bridge" => return Ok(ImageType::Bridge),
            "mo" => return Ok(ImageType::Mo),
            "cd" => return Ok(ImageType::Cd),
            _ => {}
        }
        let ext = lower.rsplit('.').next().unwrap_or("");
        match ext {
            "hdf" => Ok(ImageType::Hdf),
            "hds" | "hdn" | "hdi" | "nhd" | "hda" => Ok(ImageType::Hds),
            "mos" => Ok(ImageType::Mo),
            "iso" => Ok(ImageType::Cd),
            _ => Err(ConfigError::UnrecognizedType(path.to_string())),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageSpec {
    pub id: u8,
    pub lun: u8,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub write_protected: bool,
}

impl ImageSpec {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.id > 7 {
            return Err(ConfigError::InvalidTargetId(self.id));
        }
        if self.lun > 7 {
            return Err(ConfigError::InvalidLun(self.lun));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default)]
    pub images: Vec<ImageSpec>,
}

impl Config {
    pub fn from_str(contents: &str, path: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        for image in &config.images {
            image.validate()?;
        }
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_str(&contents, &path.display().to_string())
    }

    pub fn control_port(&self) -> u16 {
        self.control_port.unwrap_or(6868)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_type_inferred_from_extension() {
        assert_eq!(ImageType::from_path("/img/a.hds").unwrap(), ImageType::Hds);
        assert_eq!(ImageType::from_path("/img/a.hdi").unwrap(), ImageType::Hds);
        assert_eq!(ImageType::from_path("/img/a.iso").unwrap(), ImageType::Cd);
        assert_eq!(ImageType::from_path("/img/a.mos").unwrap(), ImageType::Mo);
    }

    #[test]
    fn bare_keywords_are_recognized_case_insensitively() {
        assert_eq!(ImageType::from_path("Bridge").unwrap(), ImageType::Bridge);
        assert_eq!(ImageType::from_path("MO").unwrap(), ImageType::Mo);
    }

    #[test]
    fn unrecognized_extension_is_an_error() {
        assert!(ImageType::from_path("/img/a.bin").is_err());
    }

    #[test]
    fn parses_minimal_toml_config() {
        let toml = r#"
            control_port = 6868

            [[images]]
            id = 0
            lun = 0
            type = "hds"
            path = "/img/a.hds"
        "#;
        let config = Config::from_str(toml, "test.toml").unwrap();
        assert_eq!(config.control_port(), 6868);
        assert_eq!(config.images.len(), 1);
        assert_eq!(config.images[0].image_type, ImageType::Hds);
    }

    #[test]
    fn rejects_out_of_range_target_id() {
        let toml = r#"
            [[images]]
            id = 8
            lun = 0
            type = "hds"
            path = "/img/a.hds"
        "#;
        assert!(Config::from_str(toml, "test.toml").is_err());
    }

    #[test]
    fn missing_control_port_uses_default() {
        let config = Config::default();
        assert_eq!(config.control_port(), 6868);
    }
}
