//! Wrapper around the external margin-cropping utility.

use crate::error::{Board2PdfError, Result};
use crate::types::pdf_number;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CropTool {
    program: PathBuf,
}

impl CropTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Arguments for cropping `input` to its content plus `whitespace`
    /// points and writing the result to `output`.
    pub fn arguments(input: &Path, output: &Path, whitespace: f32) -> Vec<String> {
        vec![
            "-p".to_string(),
            "0".to_string(),
            "-a".to_string(),
            format!("-{}", pdf_number(whitespace)),
            "-t".to_string(),
            "250".to_string(),
            "-A".to_string(),
            "-o".to_string(),
            output.to_string_lossy().into_owned(),
            input.to_string_lossy().into_owned(),
        ]
    }

    /// Runs the utility and waits for it. A non-zero exit, or an exit that
    /// leaves no output file, is a [`Board2PdfError::Crop`].
    pub fn crop(&self, input: &Path, output: &Path, whitespace: f32) -> Result<()> {
        log::info!(
            "cropping {} with {} (whitespace {whitespace})",
            input.display(),
            self.program.display()
        );
        let result = Command::new(&self.program)
            .args(Self::arguments(input, output, whitespace))
            .output()
            .map_err(|e| Board2PdfError::io("crop", input, e))?;
        log::debug!(
            "crop utility stdout: {}",
            String::from_utf8_lossy(&result.stdout).trim()
        );
        if !result.status.success() || !output.is_file() {
            return Err(Board2PdfError::Crop {
                file: input.to_path_buf(),
                exit_code: result.status.code(),
                stderr: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arguments_put_output_before_input() {
        let args = CropTool::arguments(Path::new("in.pdf"), Path::new("out.pdf"), 12.5);
        assert_eq!(
            args,
            vec!["-p", "0", "-a", "-12.5", "-t", "250", "-A", "-o", "out.pdf", "in.pdf"]
        );
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = CropTool::new(dir.path().join("no-such-cropper"));
        let err = tool
            .crop(&dir.path().join("a.pdf"), &dir.path().join("b.pdf"), 10.0)
            .expect_err("missing tool");
        assert!(matches!(err, Board2PdfError::Io { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn failing_program_reports_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let tool = CropTool::new("false");
        let err = tool
            .crop(&dir.path().join("a.pdf"), &dir.path().join("b.pdf"), 10.0)
            .expect_err("failing tool");
        match err {
            Board2PdfError::Crop { exit_code, .. } => assert_eq!(exit_code, Some(1)),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
