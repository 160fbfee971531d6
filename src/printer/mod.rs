//! Terminal echo of model responses: plain (owo-colors) or markdown (termimad).

use std::io;

use is_terminal::IsTerminal;
use owo_colors::{AnsiColors, OwoColorize};
use termimad::MadSkin;

pub struct TextPrinter {
    pub color: Option<AnsiColors>,
}

impl TextPrinter {
    /// Colors only when stdout is a terminal so redirected output stays clean.
    pub fn print(&self, text: &str) {
        match self.color.filter(|_| io::stdout().is_terminal()) {
            Some(color) => println!("{}", text.color(color)),
            None => println!("{text}"),
        }
    }
}

pub struct MarkdownPrinter {
    pub skin: MadSkin,
    pub width: usize,
}

impl Default for MarkdownPrinter {
    fn default() -> Self {
        Self { skin: MadSkin::default(), width: 100 }
    }
}

impl MarkdownPrinter {
    pub fn print(&self, text: &str) {
        println!("{}", self.skin.text(text, Some(self.width)));
    }
}

/// How verbose interfaces echo model responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Echo {
    #[default]
    Plain,
    Markdown,
}

impl Echo {
    pub fn from_markdown_flag(markdown: bool) -> Self {
        if markdown { Self::Markdown } else { Self::Plain }
    }

    pub fn print(self, text: &str) {
        match self {
            Self::Plain => TextPrinter { color: Some(AnsiColors::Cyan) }.print(text),
            Self::Markdown => MarkdownPrinter::default().print(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_flag_selects_echo() {
        assert_eq!(Echo::from_markdown_flag(true), Echo::Markdown);
        assert_eq!(Echo::from_markdown_flag(false), Echo::Plain);
        assert_eq!(Echo::default(), Echo::Plain);
    }
}
