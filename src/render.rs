//! Turns reply parts into transcript blocks and the affordances attached to them.

use anyhow::{anyhow, bail, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use ratatui::text::Line;

use crate::gemini::Part;
use crate::markdown::render_markdown;

#[derive(Debug, Clone)]
pub struct TextBlock {
    pub lines: Vec<Line<'static>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageState {
    /// Not decoded yet; its height is unknown.
    Pending,
    Loaded { width: u32, height: u32, bytes: usize },
    Broken(String),
}

#[derive(Debug, Clone)]
pub struct ImageBlock {
    pub mime_type: String,
    /// Base64 payload as received.
    pub data: String,
    pub state: ImageState,
}

/// Image types that may be handed to the system viewer, with the extension
/// they are saved under.
const VIEWABLE: [(&str, ImageFormat, &str); 4] = [
    ("image/png", ImageFormat::Png, "png"),
    ("image/jpeg", ImageFormat::Jpeg, "jpg"),
    ("image/gif", ImageFormat::Gif, "gif"),
    ("image/webp", ImageFormat::WebP, "webp"),
];

impl ImageBlock {
    pub fn decode(&self) -> Result<Vec<u8>> {
        Ok(STANDARD.decode(self.data.trim())?)
    }

    /// Decoded bytes and file extension, only for known image types whose
    /// content matches the declared mime type.
    pub fn viewer_file(&self) -> Result<(Vec<u8>, &'static str)> {
        let (_, format, extension) = VIEWABLE
            .iter()
            .find(|(mime, _, _)| *mime == self.mime_type)
            .ok_or_else(|| anyhow!("refusing to open {} data", self.mime_type))?;
        let bytes = self.decode()?;
        let detected = image::guess_format(&bytes)
            .map_err(|e| anyhow!("unrecognized image data: {e}"))?;
        if detected != *format {
            bail!("{} data is actually {:?}", self.mime_type, detected);
        }
        Ok((bytes, *extension))
    }
}

#[derive(Debug, Clone)]
pub enum Block {
    Text(TextBlock),
    Image(ImageBlock),
}

/// Something the user can activate on a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Affordance {
    /// Send this literal code to the preview surface.
    RunCode { code: String },
    /// Speak this text.
    ReadAloud { text: String },
}

#[derive(Debug, Clone, Default)]
pub struct RenderedBody {
    pub blocks: Vec<Block>,
    pub affordances: Vec<Affordance>,
}

impl RenderedBody {
    pub fn run_code_affordances(&self) -> impl Iterator<Item = &str> {
        self.affordances.iter().filter_map(|a| match a {
            Affordance::RunCode { code } => Some(code.as_str()),
            _ => None,
        })
    }

    pub fn read_aloud_text(&self) -> Option<&str> {
        self.affordances.iter().find_map(|a| match a {
            Affordance::ReadAloud { text } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = (usize, &ImageBlock)> {
        self.blocks.iter().enumerate().filter_map(|(i, b)| match b {
            Block::Image(image) => Some((i, image)),
            _ => None,
        })
    }
}

/// Accumulation context for one message.
#[derive(Default)]
struct RenderContext {
    body: RenderedBody,
    speech: String,
}

impl RenderContext {
    fn render_part(&mut self, part: &Part) {
        match part {
            Part::Text { text } => {
                let rendered = render_markdown(text);
                for block in &rendered.code_blocks {
                    self.body.affordances.push(Affordance::RunCode {
                        code: block.code.clone(),
                    });
                }
                self.speech.push_str(text);
                self.speech.push(' ');
                self.body.blocks.push(Block::Text(TextBlock {
                    lines: rendered.lines,
                }));
            }
            Part::InlineData { inline_data } => {
                self.body.blocks.push(Block::Image(ImageBlock {
                    mime_type: inline_data.mime_type.clone(),
                    data: inline_data.data.clone(),
                    state: ImageState::Pending,
                }));
            }
            Part::Unsupported(fields) => {
                tracing::debug!(
                    keys = ?fields.keys().collect::<Vec<_>>(),
                    "skipping unsupported part"
                );
            }
        }
    }

    fn finish(mut self) -> RenderedBody {
        if !self.speech.trim().is_empty() {
            self.body
                .affordances
                .push(Affordance::ReadAloud { text: self.speech });
        }
        self.body
    }
}

pub fn render_parts(parts: &[Part]) -> RenderedBody {
    let mut context = RenderContext::default();
    for part in parts {
        context.render_part(part);
    }
    context.finish()
}

/// Decodes an inline image far enough to know its size.
pub fn load_image(mime_type: &str, data: &str) -> Result<ImageState> {
    let bytes = STANDARD.decode(data.trim())?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| anyhow!("cannot decode {mime_type} image: {e}"))?;
    Ok(ImageState::Loaded {
        width: image.width(),
        height: image.height(),
        bytes: bytes.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    // 1x1 transparent PNG.
    const PIXEL_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn text_without_code_gets_only_read_aloud() {
        let body = render_parts(&[Part::text("Hi there")]);
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.run_code_affordances().count(), 0);
        assert_eq!(body.read_aloud_text(), Some("Hi there "));
    }

    #[test]
    fn each_code_block_gets_a_run_affordance() {
        let body = render_parts(&[Part::text(
            "```html\n<p>a</p>\n```\n\n```html\n<p>b</p>\n```",
        )]);
        let codes: Vec<&str> = body.run_code_affordances().collect();
        assert_eq!(codes, vec!["<p>a</p>", "<p>b</p>"]);
    }

    #[test]
    fn speech_accumulates_raw_text_across_parts() {
        let body = render_parts(&[Part::text("**One**"), Part::text("# Two")]);
        assert_eq!(body.read_aloud_text(), Some("**One** # Two "));
        assert_eq!(
            body.affordances
                .iter()
                .filter(|a| matches!(a, Affordance::ReadAloud { .. }))
                .count(),
            1
        );
    }

    #[test]
    fn images_only_have_no_read_aloud() {
        let body = render_parts(&[Part::inline_data("image/png", PIXEL_PNG)]);
        assert!(body.affordances.is_empty());
        let (index, image) = body.images().next().unwrap();
        assert_eq!(index, 0);
        assert_eq!(image.state, ImageState::Pending);
        assert_eq!(image.mime_type, "image/png");
    }

    #[test]
    fn whitespace_only_text_has_no_read_aloud() {
        let body = render_parts(&[Part::text("   ")]);
        assert!(body.read_aloud_text().is_none());
    }

    #[test]
    fn unsupported_parts_are_skipped() {
        let body = render_parts(&[Part::Unsupported(Map::new()), Part::text("ok")]);
        assert_eq!(body.blocks.len(), 1);
        assert!(matches!(body.blocks[0], Block::Text(_)));
    }

    #[test]
    fn loads_image_dimensions() {
        let state = load_image("image/png", PIXEL_PNG).unwrap();
        assert!(matches!(state, ImageState::Loaded { width: 1, height: 1, .. }));
    }

    #[test]
    fn garbage_image_data_is_an_error() {
        assert!(load_image("image/png", "not base64!").is_err());
        assert!(load_image("image/png", "aGVsbG8=").is_err());
    }

    #[test]
    fn only_matching_known_image_types_reach_the_viewer() {
        let image = |mime: &str, data: &str| ImageBlock {
            mime_type: mime.to_string(),
            data: data.to_string(),
            state: ImageState::Pending,
        };

        let (bytes, extension) = image("image/png", PIXEL_PNG).viewer_file().unwrap();
        assert_eq!(extension, "png");
        assert!(bytes.starts_with(b"\x89PNG"));

        for mime in ["image/bat", "image/desktop", "application/x-sh", "image/png/../../x"] {
            assert!(image(mime, PIXEL_PNG).viewer_file().is_err(), "{mime}");
        }
        // Declared jpeg, actually png
        assert!(image("image/jpeg", PIXEL_PNG).viewer_file().is_err());
    }
}
