//! Model file layout and session loading.

use crate::OnnxError;
use ort::session::Session;
use std::path::{Path, PathBuf};

pub const DETECTOR_FILE: &str = "det_10g.onnx";
pub const LANDMARKS_68_FILE: &str = "landmarks_68.onnx";
pub const LANDMARKS_5_FILE: &str = "landmarks_5.onnx";
pub const ENCODER_FILE: &str = "face_encoder_128.onnx";

/// Paths to the four model files. The 5-point landmark model is optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub landmarks_68: PathBuf,
    pub landmarks_5: PathBuf,
    pub encoder: PathBuf,
}

/// Presence of one model file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStatus {
    pub name: &'static str,
    pub path: PathBuf,
    pub required: bool,
    pub present: bool,
}

impl ModelPaths {
    /// Standard file names under `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            detector: dir.join(DETECTOR_FILE),
            landmarks_68: dir.join(LANDMARKS_68_FILE),
            landmarks_5: dir.join(LANDMARKS_5_FILE),
            encoder: dir.join(ENCODER_FILE),
        }
    }

    fn entries(&self) -> [(&'static str, &Path, bool); 4] {
        [
            ("detector", self.detector.as_path(), true),
            ("landmarks_68", self.landmarks_68.as_path(), true),
            ("landmarks_5", self.landmarks_5.as_path(), false),
            ("encoder", self.encoder.as_path(), true),
        ]
    }

    /// Fail on the first required model that is missing.
    pub fn validate_required(&self) -> Result<(), OnnxError> {
        for (name, path, required) in self.entries() {
            if required && !path.exists() {
                return Err(OnnxError::ModelNotFound {
                    name,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        self.entries()
            .into_iter()
            .map(|(name, path, required)| ModelStatus {
                name,
                path: path.to_path_buf(),
                required,
                present: path.exists(),
            })
            .collect()
    }
}

impl Default for ModelPaths {
    fn default() -> Self {
        Self::in_dir(default_model_dir())
    }
}

/// `$XDG_DATA_HOME/facerec/models`, else `$HOME/.local/share/facerec/models`,
/// else `./models`.
pub fn default_model_dir() -> PathBuf {
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME")
                .filter(|v| !v.is_empty())
                .map(|home| PathBuf::from(home).join(".local/share"))
        });

    match data_home {
        Some(base) => base.join("facerec").join("models"),
        None => PathBuf::from("models"),
    }
}

/// Open an ONNX session for `path`, logging its signature.
pub(crate) fn load_session(name: &'static str, path: &Path) -> Result<Session, OnnxError> {
    if !path.exists() {
        return Err(OnnxError::ModelNotFound {
            name,
            path: path.to_path_buf(),
        });
    }

    let session = Session::builder()?
        .with_intra_threads(2)?
        .commit_from_file(path)?;

    tracing::info!(
        model = name,
        path = %path.display(),
        inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
        outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
        "loaded model"
    );

    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facerec-models-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_in_dir_file_names() {
        let paths = ModelPaths::in_dir("/opt/models");
        assert_eq!(paths.detector, Path::new("/opt/models/det_10g.onnx"));
        assert_eq!(paths.landmarks_68, Path::new("/opt/models/landmarks_68.onnx"));
        assert_eq!(paths.landmarks_5, Path::new("/opt/models/landmarks_5.onnx"));
        assert_eq!(paths.encoder, Path::new("/opt/models/face_encoder_128.onnx"));
    }

    #[test]
    fn test_validate_required_reports_first_missing() {
        let dir = scratch_dir("missing");
        std::fs::write(dir.join(DETECTOR_FILE), b"").unwrap();

        let err = ModelPaths::in_dir(&dir).validate_required().unwrap_err();
        let _ = std::fs::remove_dir_all(&dir);
        match err {
            OnnxError::ModelNotFound { name, path } => {
                assert_eq!(name, "landmarks_68");
                assert!(path.ends_with(LANDMARKS_68_FILE));
            }
            other => panic!("expected ModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_optional_model_not_required() {
        let dir = scratch_dir("optional");
        for f in [DETECTOR_FILE, LANDMARKS_68_FILE, ENCODER_FILE] {
            std::fs::write(dir.join(f), b"").unwrap();
        }

        let paths = ModelPaths::in_dir(&dir);
        let ok = paths.validate_required();
        let status = paths.status();
        let _ = std::fs::remove_dir_all(&dir);

        assert!(ok.is_ok());
        let small = status.iter().find(|s| s.name == "landmarks_5").unwrap();
        assert!(!small.required);
        assert!(!small.present);
        assert!(status.iter().filter(|s| s.required).all(|s| s.present));
    }

    #[test]
    fn test_load_session_missing_file() {
        let err = load_session("detector", Path::new("/nonexistent/det_10g.onnx")).unwrap_err();
        assert!(matches!(err, OnnxError::ModelNotFound { name: "detector", .. }));
    }
}
