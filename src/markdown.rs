use pulldown_cmark::{CodeBlockKind, Event, Parser, Tag, TagEnd};
use ratatui::prelude::*;

const CODE_FG: Color = Color::Rgb(180, 180, 180);
const CODE_BG: Color = Color::Rgb(45, 45, 45);
const HEADING_COLOR: Color = Color::Rgb(138, 180, 248);
const DIM_COLOR: Color = Color::Rgb(100, 100, 100);
const QUOTE_COLOR: Color = Color::Rgb(160, 160, 160);

/// A code block found while rendering, with its literal source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub lang: Option<String>,
    pub code: String,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedMarkdown {
    pub lines: Vec<Line<'static>>,
    pub code_blocks: Vec<CodeBlock>,
}

/// Render markdown text to styled lines and collect its code blocks.
///
/// Code blocks are drawn as a framed block so they stand out in the
/// transcript; their content is reported verbatim in `code_blocks`.
pub fn render_markdown(text: &str) -> RenderedMarkdown {
    let mut out = RenderedMarkdown::default();
    let mut current: Vec<Span<'static>> = Vec::new();

    let mut bold = false;
    let mut italic = false;
    let mut in_heading = false;
    let mut quote_depth = 0usize;
    let mut link_dest: Option<String> = None;

    let mut code: Option<CodeBlock> = None;

    // One entry per open list; `Some(n)` is the next number of an ordered list.
    let mut lists: Vec<Option<u64>> = Vec::new();

    for event in Parser::new(text) {
        if code.is_some() {
            match event {
                Event::Text(t) => {
                    if let Some(block) = code.as_mut() {
                        block.code.push_str(&t);
                    }
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some(mut block) = code.take() {
                        // The parser terminates the last code line with '\n'.
                        if block.code.ends_with('\n') {
                            block.code.pop();
                        }
                        push_code_block(&mut out.lines, &block);
                        out.code_blocks.push(block);
                    }
                }
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(Tag::Paragraph) => {}
            Event::End(TagEnd::Paragraph) => {
                flush(&mut out.lines, &mut current, quote_depth);
                if lists.is_empty() {
                    out.lines.push(Line::default());
                }
            }

            Event::Start(Tag::Heading { level, .. }) => {
                flush(&mut out.lines, &mut current, quote_depth);
                in_heading = true;
                let marker = "#".repeat(level as usize);
                current.push(Span::styled(
                    format!("{marker} "),
                    Style::default().fg(DIM_COLOR),
                ));
            }
            Event::End(TagEnd::Heading { .. }) => {
                flush(&mut out.lines, &mut current, quote_depth);
                out.lines.push(Line::default());
                in_heading = false;
            }

            Event::Start(Tag::Strong) => bold = true,
            Event::End(TagEnd::Strong) => bold = false,
            Event::Start(Tag::Emphasis) => italic = true,
            Event::End(TagEnd::Emphasis) => italic = false,

            Event::Start(Tag::BlockQuote { .. }) => {
                flush(&mut out.lines, &mut current, quote_depth);
                quote_depth += 1;
            }
            Event::End(TagEnd::BlockQuote { .. }) => {
                flush(&mut out.lines, &mut current, quote_depth);
                quote_depth = quote_depth.saturating_sub(1);
            }

            Event::Start(Tag::List(start)) => {
                flush(&mut out.lines, &mut current, quote_depth);
                lists.push(start);
            }
            Event::End(TagEnd::List { .. }) => {
                flush(&mut out.lines, &mut current, quote_depth);
                lists.pop();
                if lists.is_empty() {
                    out.lines.push(Line::default());
                }
            }
            Event::Start(Tag::Item) => {
                flush(&mut out.lines, &mut current, quote_depth);
                let indent = "  ".repeat(lists.len().saturating_sub(1));
                let bullet = match lists.last_mut() {
                    Some(Some(n)) => {
                        let label = format!("{indent}{n}. ");
                        *n += 1;
                        label
                    }
                    _ => format!("{indent}• "),
                };
                current.push(Span::styled(bullet, Style::default().fg(DIM_COLOR)));
            }
            Event::End(TagEnd::Item) => flush(&mut out.lines, &mut current, quote_depth),

            Event::Start(Tag::CodeBlock(kind)) => {
                flush(&mut out.lines, &mut current, quote_depth);
                let lang = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(
                        lang.split_whitespace()
                            .next()
                            .unwrap_or_default()
                            .to_string(),
                    ),
                    _ => None,
                };
                code = Some(CodeBlock {
                    lang,
                    code: String::new(),
                });
            }

            Event::Start(Tag::Link { dest_url, .. }) => {
                link_dest = Some(dest_url.to_string());
            }
            Event::End(TagEnd::Link) => {
                if let Some(dest) = link_dest.take() {
                    current.push(Span::styled(
                        format!(" ({dest})"),
                        Style::default().fg(DIM_COLOR),
                    ));
                }
            }

            Event::Text(t) => {
                let mut style = Style::default();
                if bold {
                    style = style.add_modifier(Modifier::BOLD);
                }
                if italic {
                    style = style.add_modifier(Modifier::ITALIC);
                }
                if in_heading {
                    style = style.fg(HEADING_COLOR).add_modifier(Modifier::BOLD);
                }
                if link_dest.is_some() {
                    style = style.add_modifier(Modifier::UNDERLINED);
                }
                current.push(Span::styled(t.to_string(), style));
            }
            Event::Code(t) => {
                current.push(Span::styled(
                    t.to_string(),
                    Style::default().fg(CODE_FG).bg(CODE_BG),
                ));
            }
            Event::Html(t) | Event::InlineHtml(t) => {
                current.push(Span::raw(t.trim_end_matches('\n').to_string()));
                if t.ends_with('\n') {
                    flush(&mut out.lines, &mut current, quote_depth);
                }
            }
            Event::SoftBreak => current.push(Span::raw(" ")),
            Event::HardBreak => flush(&mut out.lines, &mut current, quote_depth),
            Event::Rule => {
                flush(&mut out.lines, &mut current, quote_depth);
                out.lines.push(Line::from(Span::styled(
                    "─".repeat(40),
                    Style::default().fg(DIM_COLOR),
                )));
            }
            _ => {}
        }
    }

    flush(&mut out.lines, &mut current, quote_depth);
    while out.lines.last().is_some_and(|l| l.spans.is_empty()) {
        out.lines.pop();
    }
    out
}

fn flush(lines: &mut Vec<Line<'static>>, current: &mut Vec<Span<'static>>, quote_depth: usize) {
    if current.is_empty() {
        return;
    }
    let mut spans = Vec::with_capacity(current.len() + 1);
    if quote_depth > 0 {
        spans.push(Span::styled(
            "│ ".repeat(quote_depth),
            Style::default().fg(QUOTE_COLOR),
        ));
    }
    spans.append(current);
    lines.push(Line::from(spans));
}

fn push_code_block(lines: &mut Vec<Line<'static>>, block: &CodeBlock) {
    let frame = Style::default().fg(DIM_COLOR);
    lines.push(Line::from(Span::styled(
        format!("┌─ {} ", block.lang.as_deref().unwrap_or("code")),
        frame,
    )));
    for line in block.code.lines() {
        lines.push(Line::from(vec![
            Span::styled("│ ", frame),
            Span::styled(line.to_string(), Style::default().fg(CODE_FG)),
        ]));
    }
    lines.push(Line::from(Span::styled("└─", frame)));
    lines.push(Line::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(line: &Line) -> String {
        line.spans.iter().map(|s| s.content.as_ref()).collect()
    }

    #[test]
    fn fenced_code_is_reported_verbatim() {
        let source = "<h1>Hi</h1>\n<script>alert(\"x\")</script>";
        let text = format!("Try this:\n\n```html\n{source}\n```\n\nDone.");
        let rendered = render_markdown(&text);

        assert_eq!(rendered.code_blocks.len(), 1);
        assert_eq!(rendered.code_blocks[0].lang.as_deref(), Some("html"));
        assert_eq!(rendered.code_blocks[0].code, source);
    }

    #[test]
    fn code_blocks_are_framed() {
        let rendered = render_markdown("```\nlet x = 1;\n```");
        let text: Vec<String> = rendered.lines.iter().map(plain).collect();
        assert_eq!(text[0], "┌─ code ");
        assert_eq!(text[1], "│ let x = 1;");
        assert_eq!(text[2], "└─");
    }

    #[test]
    fn plain_text_has_no_code_blocks() {
        let rendered = render_markdown("Hi there");
        assert!(rendered.code_blocks.is_empty());
        assert_eq!(rendered.lines.len(), 1);
        assert_eq!(plain(&rendered.lines[0]), "Hi there");
    }

    #[test]
    fn inline_code_is_not_a_code_block() {
        let rendered = render_markdown("Call `main()` first");
        assert!(rendered.code_blocks.is_empty());
        assert_eq!(plain(&rendered.lines[0]), "Call main() first");
    }

    #[test]
    fn emphasis_markers_are_styled_not_printed() {
        let rendered = render_markdown("This is **bold** and *soft*");
        let line = &rendered.lines[0];
        assert_eq!(plain(line), "This is bold and soft");
        assert!(line
            .spans
            .iter()
            .any(|s| s.content == "bold" && s.style.add_modifier.contains(Modifier::BOLD)));
    }

    #[test]
    fn ordered_lists_are_numbered() {
        let rendered = render_markdown("1. one\n2. two\n");
        let text: Vec<String> = rendered.lines.iter().map(plain).collect();
        assert_eq!(text, vec!["1. one", "2. two"]);
    }

    #[test]
    fn multiple_code_blocks_keep_order() {
        let rendered = render_markdown("```js\na()\n```\n\ntext\n\n```css\nb{}\n```\n");
        let codes: Vec<&str> = rendered.code_blocks.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["a()", "b{}"]);
    }
}
