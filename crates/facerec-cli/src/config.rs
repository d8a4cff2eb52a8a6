use anyhow::{Context, Result};
use facerec_core::DEFAULT_TOLERANCE;
use facerec_onnx::ModelPaths;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional on-disk settings, read from the file named by `FACEREC_CONFIG`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    tolerance: Option<f64>,
    jitters: Option<u32>,
    upsample: Option<u32>,
}

/// CLI configuration: TOML file, then `FACEREC_*` environment overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Match distance threshold.
    pub tolerance: f64,
    /// Perturbed copies averaged per descriptor.
    pub jitters: u32,
    /// Detector upsample level.
    pub upsample: u32,
}

impl Config {
    pub fn load() -> Result<Self> {
        let file = match std::env::var_os("FACEREC_CONFIG") {
            Some(path) => read_file(Path::new(&path))?,
            None => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let model_dir = env("FACEREC_MODEL_DIR")
            .map(PathBuf::from)
            .or(file.model_dir)
            .unwrap_or_else(facerec_onnx::default_model_dir);

        Self {
            model_dir,
            tolerance: env_parse(&env, "FACEREC_TOLERANCE")
                .or(file.tolerance)
                .unwrap_or(DEFAULT_TOLERANCE),
            jitters: env_parse(&env, "FACEREC_JITTERS")
                .or(file.jitters)
                .unwrap_or(1),
            upsample: env_parse(&env, "FACEREC_UPSAMPLE")
                .or(file.upsample)
                .unwrap_or(1),
        }
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths::in_dir(&self.model_dir)
    }
}

fn read_file(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let file = toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(file)
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::resolve(FileConfig::default(), env_of(&[]));
        assert_eq!(c.tolerance, 0.6);
        assert_eq!(c.jitters, 1);
        assert_eq!(c.upsample, 1);
        assert!(c.model_dir.ends_with("models"));
    }

    #[test]
    fn test_file_values() {
        let file: FileConfig = toml::from_str(
            r#"
            model_dir = "/srv/models"
            tolerance = 0.5
            jitters = 10
            "#,
        )
        .unwrap();
        let c = Config::resolve(file, env_of(&[]));
        assert_eq!(c.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(c.tolerance, 0.5);
        assert_eq!(c.jitters, 10);
        assert_eq!(c.upsample, 1);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = FileConfig {
            tolerance: Some(0.5),
            upsample: Some(2),
            ..FileConfig::default()
        };
        let c = Config::resolve(
            file,
            env_of(&[("FACEREC_TOLERANCE", "0.45"), ("FACEREC_MODEL_DIR", "/tmp/m")]),
        );
        assert_eq!(c.tolerance, 0.45);
        assert_eq!(c.upsample, 2);
        assert_eq!(c.model_paths().detector, PathBuf::from("/tmp/m/det_10g.onnx"));
    }

    #[test]
    fn test_unparseable_env_falls_back() {
        let c = Config::resolve(FileConfig::default(), env_of(&[("FACEREC_JITTERS", "many")]));
        assert_eq!(c.jitters, 1);
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        assert!(toml::from_str::<FileConfig>("camera = \"/dev/video0\"").is_err());
    }
}
