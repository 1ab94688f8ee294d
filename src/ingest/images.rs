use std::path::{Path, PathBuf};

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;
use ring::digest::{digest, SHA256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::graph::models::Attachment;
use crate::sanitizer::rewrite::{CidRewriter, RegexRewriter};

const HASH_HEX_LEN: usize = 24;
const MESSAGE_PREFIX_LEN: usize = 8;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("attachment {0} has no content bytes")]
    MissingBytes(String),

    #[error("attachment {content_id} is not valid base64: {source}")]
    Decode {
        content_id: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedOutcome {
    pub html: String,
    pub hero_image_path: Option<String>,
    /// True only if at least one `cid:` reference was actually rewritten.
    pub had_inline_images: bool,
}

/// Saves referenced inline images and points the HTML at their local copies.
pub struct InlineImageProcessor {
    uploads_dir: PathBuf,
    static_prefix: String,
    rewriter: Box<dyn CidRewriter>,
}

impl InlineImageProcessor {
    pub fn new(uploads_dir: impl Into<PathBuf>, static_prefix: &str) -> Self {
        Self::with_rewriter(uploads_dir, static_prefix, Box::new(RegexRewriter))
    }

    pub fn with_rewriter(
        uploads_dir: impl Into<PathBuf>,
        static_prefix: &str,
        rewriter: Box<dyn CidRewriter>,
    ) -> Self {
        Self {
            uploads_dir: uploads_dir.into(),
            static_prefix: static_prefix.trim_end_matches('/').to_string(),
            rewriter,
        }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn embed(&self, html: &str, attachments: &[Attachment], message_id: &str) -> EmbedOutcome {
        let mut outcome = EmbedOutcome {
            html: html.to_string(),
            hero_image_path: None,
            had_inline_images: false,
        };

        let referenced = self.rewriter.cid_references(html);
        if referenced.is_empty() || attachments.is_empty() {
            return outcome;
        }

        for (index, attachment) in attachments.iter().enumerate() {
            let Some(content_id) = attachment.normalized_content_id() else {
                debug!("skipping attachment without content-id on {message_id}");
                continue;
            };
            let Some(extension) = image_extension(attachment) else {
                debug!("skipping non-image attachment {content_id}");
                continue;
            };
            if !referenced.contains(&content_id.to_lowercase()) {
                debug!("attachment {content_id} is not referenced in the body");
                continue;
            }

            let url = match self.save(attachment, content_id, message_id, index, extension) {
                Ok(url) => url,
                Err(err) => {
                    warn!("skipping inline image for {message_id}: {err}");
                    continue;
                }
            };

            let (rewritten, replacements) =
                self.rewriter.replace_cid(&outcome.html, content_id, &url);
            if replacements == 0 {
                continue;
            }
            debug!("rewrote {replacements} reference(s) to {content_id} as {url}");
            outcome.html = rewritten;
            outcome.had_inline_images = true;
            if outcome.hero_image_path.is_none() {
                outcome.hero_image_path = Some(url);
            }
        }

        if outcome.had_inline_images {
            info!("embedded inline images for {message_id}");
        }
        outcome
    }

    /// Writes the decoded payload and returns its public URL.
    fn save(
        &self,
        attachment: &Attachment,
        content_id: &str,
        message_id: &str,
        index: usize,
        extension: &str,
    ) -> Result<String, ImageError> {
        let payload = attachment
            .content_bytes
            .as_deref()
            .ok_or_else(|| ImageError::MissingBytes(content_id.to_string()))?;
        let bytes = decode_payload(payload).map_err(|source| ImageError::Decode {
            content_id: content_id.to_string(),
            source,
        })?;
        if bytes.is_empty() {
            return Err(ImageError::MissingBytes(content_id.to_string()));
        }

        std::fs::create_dir_all(&self.uploads_dir).map_err(|source| ImageError::Io {
            path: self.uploads_dir.clone(),
            source,
        })?;
        let file_name = stored_file_name(message_id, content_id, index, extension);
        let path = self.uploads_dir.join(&file_name);
        std::fs::write(&path, &bytes).map_err(|source| ImageError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(format!("{}/{}", self.static_prefix, file_name))
    }
}

fn decode_payload(payload: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| STANDARD_NO_PAD.decode(compact.trim_end_matches('=').as_bytes()))
}

/// Deterministic per (message, content-id, position) so re-syncs overwrite
/// the same file instead of piling up copies.
pub fn stored_file_name(message_id: &str, content_id: &str, index: usize, extension: &str) -> String {
    let prefix: String = message_id
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MESSAGE_PREFIX_LEN)
        .collect();
    let prefix = if prefix.is_empty() { "msg".to_string() } else { prefix };

    let mut input = Vec::with_capacity(message_id.len() + content_id.len() + 8);
    input.extend_from_slice(message_id.as_bytes());
    input.push(0);
    input.extend_from_slice(content_id.to_lowercase().as_bytes());
    input.push(0);
    input.extend_from_slice(index.to_string().as_bytes());
    let hash = digest(&SHA256, &input);
    let hex: String = hash
        .as_ref()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect();

    format!("{prefix}_{}.{extension}", &hex[..HASH_HEX_LEN])
}

/// Raster formats only; SVG can carry script.
fn image_extension(attachment: &Attachment) -> Option<&'static str> {
    let content_type = attachment.content_type.as_deref()?.trim().to_ascii_lowercase();
    let mime = content_type.split(';').next().unwrap_or_default().trim();
    match mime {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/bmp" => Some("bmp"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::{stored_file_name, InlineImageProcessor};
    use crate::graph::models::Attachment;

    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mP8z8BQDwAEhQGAhKmMIQAAAABJRU5ErkJggg==";

    fn temp_uploads() -> PathBuf {
        std::env::temp_dir().join(format!("newsletter-images-{}", Uuid::new_v4()))
    }

    fn inline(cid: &str, content_type: &str, bytes: Option<&str>) -> Attachment {
        Attachment {
            content_id: Some(cid.to_string()),
            content_type: Some(content_type.to_string()),
            content_bytes: bytes.map(str::to_string),
            name: Some("image001.png".to_string()),
            is_inline: true,
        }
    }

    #[test]
    fn embeds_referenced_images_and_picks_hero() {
        let dir = temp_uploads();
        let processor = InlineImageProcessor::new(&dir, "/static/newsletters/");
        let html = r#"<img src="cid:ABC123"><p>x</p><img src="cid:&lt;second@01&gt;">"#;
        let attachments = vec![
            inline("<abc123>", "image/png", Some(PNG_B64)),
            inline("second@01", "image/jpeg", Some(PNG_B64)),
        ];

        let outcome = processor.embed(html, &attachments, "AAMkADc3-message");

        assert!(outcome.had_inline_images);
        assert!(!outcome.html.to_lowercase().contains("cid:"));
        let hero = outcome.hero_image_path.expect("hero image");
        assert!(hero.starts_with("/static/newsletters/AAMkADc3_"));
        assert!(hero.ends_with(".png"));
        let file = dir.join(hero.trim_start_matches("/static/newsletters/"));
        assert!(file.exists());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn unreferenced_and_undecodable_attachments_are_skipped() {
        let dir = temp_uploads();
        let processor = InlineImageProcessor::new(&dir, "/static/newsletters");
        let html = r#"<img src="cid:broken"><img src="cid:good">"#;
        let attachments = vec![
            inline("unused", "image/png", Some(PNG_B64)),
            inline("broken", "image/png", Some("!!not base64!!")),
            inline("svg", "image/svg+xml", Some(PNG_B64)),
            Attachment {
                content_id: None,
                ..inline("x", "image/png", Some(PNG_B64))
            },
            inline("good", "image/gif", Some(PNG_B64)),
        ];

        let outcome = processor.embed(html, &attachments, "msg-2");
        assert!(outcome.had_inline_images);
        assert!(outcome.html.contains("cid:broken"));
        assert!(!outcome.html.contains("cid:good"));
        assert!(outcome
            .hero_image_path
            .as_deref()
            .is_some_and(|hero| hero.ends_with(".gif")));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn present_but_unused_attachments_do_not_count() {
        let dir = temp_uploads();
        let processor = InlineImageProcessor::new(&dir, "/static/newsletters");
        let outcome = processor.embed(
            "<p>no images</p>",
            &[inline("logo", "image/png", Some(PNG_B64))],
            "msg-3",
        );
        assert!(!outcome.had_inline_images);
        assert!(outcome.hero_image_path.is_none());
        assert_eq!(outcome.html, "<p>no images</p>");
        assert!(!dir.exists());
    }

    #[test]
    fn file_names_are_stable_and_distinct() {
        let a = stored_file_name("AAMk/ADc=", "image001.png@01", 0, "png");
        assert_eq!(a, stored_file_name("AAMk/ADc=", "IMAGE001.PNG@01", 0, "png"));
        assert_ne!(a, stored_file_name("AAMk/ADc=", "image001.png@02", 0, "png"));
        assert_ne!(a, stored_file_name("AAMk/ADc=", "image001.png@01", 1, "png"));
        assert_ne!(a, stored_file_name("AAMk/ADd=", "image001.png@01", 0, "png"));
        assert!(a.starts_with("AAMkADc_"));
        assert!(!a.contains('/'));
    }
}
