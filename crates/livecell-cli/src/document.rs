//! Fenced code block discovery
//!
//! Uses pulldown-cmark to find the fenced blocks a renderer would hand to
//! the cell manager.

use pulldown_cmark::{CodeBlockKind, Event, Parser as MdParser, Tag, TagEnd};
use serde::Serialize;

/// Fenced block of a Markdown document
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct FencedBlock {
    /// First word of the info string, empty if none
    pub(crate) language: String,
    /// Block body as the renderer sees it
    pub(crate) raw_text: String,
    /// Index among all fenced blocks of the document
    pub(crate) position: usize,
}

/// Every fenced block of `source`, in document order
///
/// Indented code blocks are not cells and do not count towards positions.
pub(crate) fn fenced_blocks(source: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<FencedBlock> = None;

    for event in MdParser::new(source) {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let language = info.split_whitespace().next().unwrap_or_default();
                current = Some(FencedBlock {
                    language: language.to_ascii_lowercase(),
                    raw_text: String::new(),
                    position: blocks.len(),
                });
            }
            Event::Text(text) => {
                if let Some(block) = current.as_mut() {
                    block.raw_text.push_str(&text);
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(mut block) = current.take() {
                    if block.raw_text.ends_with('\n') {
                        block.raw_text.pop();
                    }
                    blocks.push(block);
                }
            }
            _ => {}
        }
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn finds_fenced_blocks_in_order() {
        let doc = "# Title\n\n```python\n#%autorun\nprint(1)\n```\n\ntext\n\n```sh extra\necho hi\n```\n";
        let blocks = fenced_blocks(doc);
        assert_eq!(
            blocks,
            vec![
                FencedBlock {
                    language: "python".into(),
                    raw_text: "#%autorun\nprint(1)".into(),
                    position: 0,
                },
                FencedBlock {
                    language: "sh".into(),
                    raw_text: "echo hi".into(),
                    position: 1,
                },
            ]
        );
    }

    #[test]
    fn unlabeled_and_indented_blocks() {
        let doc = "```\nplain\n```\n\n    indented code\n\n~~~Python\nx = 1\n~~~\n";
        let blocks = fenced_blocks(doc);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language, "");
        assert_eq!(blocks[1].language, "python");
        assert_eq!(blocks[1].position, 1);
    }

    #[test]
    fn empty_document() {
        assert!(fenced_blocks("").is_empty());
        assert!(fenced_blocks("just prose").is_empty());
    }
}
