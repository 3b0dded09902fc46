use crate::session::Artifact;

const FALLBACK_FILE_STEM: &str = "visualization";

/// Media type of a saved visualization.
pub const DOWNLOAD_MEDIA_TYPE: &str = "text/html";

/// A generated document packaged for saving to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HtmlDownload {
    pub file_name: String,
    pub media_type: &'static str,
    pub body: String,
}

impl HtmlDownload {
    #[must_use]
    pub fn from_artifact(artifact: &Artifact) -> Self {
        Self {
            file_name: format!("{}.html", sanitize_file_stem(&artifact.title)),
            media_type: DOWNLOAD_MEDIA_TYPE,
            body: artifact.html.clone(),
        }
    }

    /// Value for the `Content-Disposition` header.
    #[must_use]
    pub fn content_disposition(&self) -> String {
        format!("attachment; filename=\"{}\"", self.file_name)
    }
}

/// Every character outside `[A-Za-z0-9]` becomes `_`, then lower-cased.
#[must_use]
pub fn sanitize_file_stem(title: &str) -> String {
    if title.is_empty() {
        return FALLBACK_FILE_STEM.to_string();
    }
    title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(title: &str) -> Artifact {
        Artifact {
            title: title.to_string(),
            html: "<html></html>".to_string(),
            instruction: None,
        }
    }

    #[test]
    fn file_name_is_derived_from_the_title() {
        let download = HtmlDownload::from_artifact(&artifact("Attention Is All You Need"));
        assert_eq!(download.file_name, "attention_is_all_you_need.html");
        assert_eq!(download.media_type, "text/html");
        assert_eq!(download.body, "<html></html>");
        assert_eq!(
            download.content_disposition(),
            "attachment; filename=\"attention_is_all_you_need.html\""
        );
    }

    #[test]
    fn non_ascii_and_punctuation_are_replaced() {
        assert_eq!(sanitize_file_stem("MemGPT: LLMs as OSes"), "memgpt__llms_as_oses");
        assert_eq!(sanitize_file_stem("Café-2"), "caf__2");
    }

    #[test]
    fn empty_title_uses_fallback_name() {
        assert_eq!(
            HtmlDownload::from_artifact(&artifact("")).file_name,
            "visualization.html"
        );
    }
}
