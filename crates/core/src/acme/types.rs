use std::path::{Path, PathBuf};
use std::time::Duration;

use super::ToolError;

/// Exported file names, in the order they are reported.
pub const ARTIFACT_FILES: [&str; 4] = ["cert.cer", "key.key", "ca.cer", "fullchain.cer"];

/// Captured result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` if the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Stdout followed by stderr, trimmed.
    pub fn combined(&self) -> String {
        format!("{}\n{}", self.stdout.trim(), self.stderr.trim())
            .trim()
            .to_string()
    }

    /// Turns a non-zero exit into an error.
    pub fn into_result(self) -> Result<ToolOutput, ToolError> {
        if self.success() {
            Ok(self)
        } else {
            Err(ToolError::NonZeroExit {
                code: self.exit_code,
                output: self.combined(),
            })
        }
    }
}

/// Locations of the four certificate artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca: PathBuf,
    pub fullchain: PathBuf,
}

impl ArtifactPaths {
    /// Export layout: fixed file names inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            cert: dir.join(ARTIFACT_FILES[0]),
            key: dir.join(ARTIFACT_FILES[1]),
            ca: dir.join(ARTIFACT_FILES[2]),
            fullchain: dir.join(ARTIFACT_FILES[3]),
        }
    }

    /// Layout of the tool's private per-domain store.
    pub fn in_store(store_dir: &Path, domain: &str) -> Self {
        Self {
            cert: store_dir.join(format!("{}.cer", domain)),
            key: store_dir.join(format!("{}.key", domain)),
            ca: store_dir.join("ca.cer"),
            fullchain: store_dir.join("fullchain.cer"),
        }
    }

    /// `(export file name, path)` pairs in `ARTIFACT_FILES` order.
    pub fn entries(&self) -> [(&'static str, &Path); 4] {
        [
            (ARTIFACT_FILES[0], self.cert.as_path()),
            (ARTIFACT_FILES[1], self.key.as_path()),
            (ARTIFACT_FILES[2], self.ca.as_path()),
            (ARTIFACT_FILES[3], self.fullchain.as_path()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(code: Option<i32>) -> ToolOutput {
        ToolOutput {
            exit_code: code,
            stdout: "  out \n".to_string(),
            stderr: "err".to_string(),
            duration: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_into_result() {
        assert!(output(Some(0)).into_result().is_ok());
        match output(Some(1)).into_result() {
            Err(ToolError::NonZeroExit { code, output }) => {
                assert_eq!(code, Some(1));
                assert_eq!(output, "out\nerr");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(output(None).into_result().is_err());
    }

    #[test]
    fn test_store_layout() {
        let paths = ArtifactPaths::in_store(Path::new("/acme/example.com_ecc"), "example.com");
        assert_eq!(paths.cert, PathBuf::from("/acme/example.com_ecc/example.com.cer"));
        assert_eq!(paths.key, PathBuf::from("/acme/example.com_ecc/example.com.key"));
        assert_eq!(paths.ca, PathBuf::from("/acme/example.com_ecc/ca.cer"));
    }

    #[test]
    fn test_export_layout_order() {
        let paths = ArtifactPaths::in_dir(Path::new("/export/example.com"));
        let names: Vec<&str> = paths.entries().iter().map(|(name, _)| *name).collect();
        assert_eq!(names, ARTIFACT_FILES.to_vec());
        assert_eq!(
            paths.fullchain,
            PathBuf::from("/export/example.com/fullchain.cer")
        );
    }
}
