//! External subtitle upload validation

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::engine::TextTrackSource;
use crate::errors::{PlayerError, PlayerResult};

/// Uploads larger than this are rejected
pub const MAX_SUBTITLE_BYTES: usize = 5 * 1024 * 1024;

const UNDETERMINED_LANGUAGE: &str = "und";

/// A user-supplied subtitle file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtitleUpload {
    pub file_name: String,
    pub content: String,
    pub language: String,
    /// Display label; the file stem when absent
    pub label: Option<String>,
}

impl SubtitleUpload {
    pub fn new<F: Into<String>, C: Into<String>, L: Into<String>>(file_name: F, content: C, language: L) -> Self {
        Self {
            file_name: file_name.into(),
            content: content.into(),
            language: language.into(),
            label: None,
        }
    }

    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum SubtitleFormat {
    #[strum(serialize = "vtt")]
    WebVtt,
}

impl SubtitleFormat {
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, extension) = file_name.rsplit_once('.')?;
        match extension.to_ascii_lowercase().as_str() {
            "vtt" => Some(Self::WebVtt),
            _ => None,
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::WebVtt => "text/vtt",
        }
    }

    fn has_valid_header(self, content: &str) -> bool {
        match self {
            Self::WebVtt => {
                let body = content.strip_prefix('\u{feff}').unwrap_or(content);
                match body.strip_prefix("WEBVTT") {
                    Some(rest) => rest.is_empty() || rest.starts_with([' ', '\t', '\n', '\r']),
                    None => false,
                }
            }
        }
    }
}

/// An upload that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSubtitle {
    pub format: SubtitleFormat,
    pub label: String,
    pub language: String,
    content: String,
}

impl ValidatedSubtitle {
    /// Inline `data:` URI carrying the subtitle body
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.format.mime_type(), STANDARD.encode(self.content.as_bytes()))
    }

    pub fn to_source(&self) -> TextTrackSource {
        TextTrackSource {
            uri: self.data_uri(),
            language: self.language.clone(),
            kind: "subtitle".to_string(),
            format: self.format.to_string(),
            label: self.label.clone(),
        }
    }
}

pub fn validate(upload: &SubtitleUpload) -> PlayerResult<ValidatedSubtitle> {
    let format = SubtitleFormat::from_file_name(&upload.file_name).ok_or_else(|| {
        PlayerError::validation(format!(
            "'{}' is not a supported subtitle file (expected .vtt)",
            upload.file_name
        ))
    })?;

    if upload.content.len() > MAX_SUBTITLE_BYTES {
        return Err(PlayerError::validation(format!(
            "subtitle file is {} bytes (max: {})",
            upload.content.len(),
            MAX_SUBTITLE_BYTES
        )));
    }

    if !format.has_valid_header(&upload.content) {
        return Err(PlayerError::validation(format!(
            "'{}' does not start with a WEBVTT header",
            upload.file_name
        )));
    }

    let label = match &upload.label {
        Some(label) => label.trim().to_string(),
        None => upload
            .file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(&upload.file_name)
            .trim()
            .to_string(),
    };
    if label.is_empty() {
        return Err(PlayerError::validation("subtitle label must not be empty"));
    }

    let language = match upload.language.trim() {
        "" => UNDETERMINED_LANGUAGE.to_string(),
        language => language.to_string(),
    };

    Ok(ValidatedSubtitle {
        format,
        label,
        language,
        content: upload.content.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const CUE: &str = "WEBVTT\n\n00:00.000 --> 00:02.000\nHello\n";

    #[test]
    fn test_valid_upload() {
        let validated = validate(&SubtitleUpload::new("Director Commentary.vtt", CUE, "en")).unwrap();
        assert_eq!(validated.label, "Director Commentary");
        assert_eq!(validated.language, "en");
        assert_eq!(validated.format, SubtitleFormat::WebVtt);

        let source = validated.to_source();
        assert_eq!(source.format, "vtt");
        assert_eq!(source.kind, "subtitle");
        assert!(source.uri.starts_with("data:text/vtt;base64,"));
    }

    #[test]
    fn test_data_uri_roundtrips_content() {
        let validated = validate(&SubtitleUpload::new("a.vtt", CUE, "en")).unwrap();
        let encoded = validated.data_uri();
        let payload = encoded.trim_start_matches("data:text/vtt;base64,");
        assert_eq!(STANDARD.decode(payload).unwrap(), CUE.as_bytes());
    }

    #[rstest]
    #[case("subs.srt", CUE)]
    #[case("subs", CUE)]
    #[case("subs.vtt", "1\n00:00:00,000 --> 00:00:02,000\nHello\n")]
    #[case("subs.vtt", "WEBVTTX\n")]
    #[case("subs.vtt", "")]
    #[case(".vtt", CUE)]
    fn test_rejected_uploads(#[case] file_name: &str, #[case] content: &str) {
        let result = validate(&SubtitleUpload::new(file_name, content, "en"));
        assert!(matches!(result, Err(PlayerError::Validation { .. })));
    }

    #[rstest]
    #[case("WEBVTT")]
    #[case("WEBVTT - Commentary\n\n")]
    #[case("\u{feff}WEBVTT\r\n")]
    fn test_accepted_headers(#[case] content: &str) {
        assert!(validate(&SubtitleUpload::new("x.VTT", content, "sl")).is_ok());
    }

    #[test]
    fn test_explicit_label_and_missing_language() {
        let upload = SubtitleUpload::new("file.vtt", CUE, "  ").with_label("Forced");
        let validated = validate(&upload).unwrap();
        assert_eq!(validated.label, "Forced");
        assert_eq!(validated.language, "und");
    }

    #[test]
    fn test_oversized_upload_rejected() {
        let content = format!("WEBVTT\n{}", "a".repeat(MAX_SUBTITLE_BYTES));
        let result = validate(&SubtitleUpload::new("big.vtt", content, "en"));
        assert!(matches!(result, Err(PlayerError::Validation { .. })));
    }
}
