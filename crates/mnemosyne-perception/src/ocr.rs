//! OCR fallback over a Tesseract subprocess.
//!
//! Used when a window is phantom and only its screenshot survives. A missing
//! `tesseract` binary degrades the engine to unavailable instead of failing
//! the pipeline.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{Error, Result};

pub const DEFAULT_LANGUAGES: &str = "eng+rus";

pub struct OcrEngine {
    languages: String,
    available: bool,
}

impl OcrEngine {
    pub fn new(languages: impl Into<String>) -> Self {
        let available = std::process::Command::new("tesseract")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        if !available {
            tracing::warn!("tesseract not found in PATH, OCR fallback disabled");
        }

        Self {
            languages: languages.into(),
            available,
        }
    }

    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Extract text from an image file. Empty output is not an error.
    pub async fn extract_text(&self, image_path: &Path) -> Result<String> {
        if !self.available {
            return Err(Error::OcrUnavailable);
        }
        if !image_path.exists() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("image not found: {}", image_path.display()),
            )));
        }

        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .stderr(Stdio::null())
            .output()
            .await?;

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(chars = text.len(), path = %image_path.display(), "OCR extraction");
        Ok(text)
    }

    /// Extract text from in-memory image bytes via stdin.
    pub async fn extract_from_bytes(&self, image_bytes: &[u8]) -> Result<String> {
        if !self.available {
            return Err(Error::OcrUnavailable);
        }

        let mut child = Command::new("tesseract")
            .arg("stdin")
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(image_bytes).await?;
        }
        let output = child.wait_with_output().await?;

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Extract text plus the mean per-word confidence in `[0, 1]`, parsed
    /// from Tesseract's TSV output.
    pub async fn extract_with_confidence(&self, image_path: &Path) -> Result<(String, f64)> {
        let text = self.extract_text(image_path).await?;

        let output = Command::new("tesseract")
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&self.languages)
            .arg("tsv")
            .stderr(Stdio::null())
            .output()
            .await?;

        let tsv = String::from_utf8_lossy(&output.stdout);
        let confidence = mean_confidence(&tsv);
        Ok((text, confidence))
    }
}

/// Average the `conf` column of a Tesseract TSV dump over recognized words
/// (conf > 0), scaled to `[0, 1]`.
fn mean_confidence(tsv: &str) -> f64 {
    let mut lines = tsv.lines();
    let Some(header) = lines.next() else {
        return 0.0;
    };
    let Some(conf_idx) = header.split('\t').position(|col| col == "conf") else {
        return 0.0;
    };

    let confidences: Vec<f64> = lines
        .filter_map(|line| line.split('\t').nth(conf_idx))
        .filter_map(|value| value.parse::<f64>().ok())
        .filter(|conf| *conf > 0.0)
        .collect();

    if confidences.is_empty() {
        return 0.0;
    }
    confidences.iter().sum::<f64>() / confidences.len() as f64 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_confidence_averages_positive_words() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   5\t1\t1\t1\t1\t1\t0\t0\t10\t10\t90\thello\n\
                   5\t1\t1\t1\t1\t2\t0\t0\t10\t10\t70\tworld\n\
                   5\t1\t1\t1\t1\t3\t0\t0\t10\t10\t-1\t\n";
        let conf = mean_confidence(tsv);
        assert!((conf - 0.80).abs() < 1e-9);
    }

    #[test]
    fn mean_confidence_empty_input_is_zero() {
        assert_eq!(mean_confidence(""), 0.0);
        assert_eq!(mean_confidence("no\ttabs\there\n"), 0.0);
    }

    #[tokio::test]
    async fn missing_image_is_an_error() {
        let engine = OcrEngine::new(DEFAULT_LANGUAGES);
        if !engine.is_available() {
            return;
        }
        let err = engine
            .extract_text(Path::new("/nonexistent/shot.png"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
