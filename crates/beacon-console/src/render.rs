//! HTML projection of console text.
//!
//! Text is escaped first, then ANSI SGR sequences are turned into
//! `<span class="ansi-...">` markup. Any other escape sequence (cursor
//! movement, line clearing) is stripped.

use regex::Regex;
use std::fmt::Write;
use std::sync::LazyLock;

// Matches CSI sequences; the final letter tells SGR (`m`) apart from the rest.
static CSI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[([0-9;?]*)([A-Za-z])").unwrap());

const COLORS: [&str; 8] = [
    "black", "red", "green", "yellow", "blue", "magenta", "cyan", "white",
];

/// Escape characters that are significant in HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape `text` and convert its ANSI styling into spans.
pub fn render_ansi(text: &str) -> String {
    ansi_to_html(&escape_html(text))
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Style {
    bold: bool,
    faint: bool,
    italic: bool,
    underline: bool,
    fg: Option<String>,
    bg: Option<String>,
}

impl Style {
    fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    fn classes(&self) -> String {
        let mut classes = Vec::new();
        if self.bold {
            classes.push("ansi-bold".to_string());
        }
        if self.faint {
            classes.push("ansi-faint".to_string());
        }
        if self.italic {
            classes.push("ansi-italic".to_string());
        }
        if self.underline {
            classes.push("ansi-underline".to_string());
        }
        if let Some(fg) = &self.fg {
            classes.push(format!("ansi-fg-{fg}"));
        }
        if let Some(bg) = &self.bg {
            classes.push(format!("ansi-bg-{bg}"));
        }
        classes.join(" ")
    }

    fn apply(&mut self, params: &str) {
        let codes: Vec<u32> = if params.is_empty() {
            vec![0]
        } else {
            params
                .split(';')
                .map(|p| p.parse().unwrap_or(0))
                .collect()
        };

        let mut i = 0;
        while i < codes.len() {
            match codes[i] {
                0 => *self = Style::default(),
                1 => self.bold = true,
                2 => self.faint = true,
                3 => self.italic = true,
                4 => self.underline = true,
                22 => {
                    self.bold = false;
                    self.faint = false;
                }
                23 => self.italic = false,
                24 => self.underline = false,
                code @ 30..=37 => self.fg = Some(COLORS[(code - 30) as usize].to_string()),
                code @ 90..=97 => {
                    self.fg = Some(format!("bright-{}", COLORS[(code - 90) as usize]))
                }
                39 => self.fg = None,
                code @ 40..=47 => self.bg = Some(COLORS[(code - 40) as usize].to_string()),
                code @ 100..=107 => {
                    self.bg = Some(format!("bright-{}", COLORS[(code - 100) as usize]))
                }
                49 => self.bg = None,
                code @ (38 | 48) => {
                    // 256-colour form `38;5;n`; truecolour `38;2;r;g;b` is skipped.
                    match codes.get(i + 1).copied() {
                        Some(5) => {
                            if let Some(n) = codes.get(i + 2) {
                                let color = Some(n.to_string());
                                if code == 38 {
                                    self.fg = color;
                                } else {
                                    self.bg = color;
                                }
                            }
                            i += 2;
                        }
                        Some(2) => i += 4,
                        _ => {}
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }
}

/// Convert ANSI escape sequences in already-escaped text into spans.
pub fn ansi_to_html(escaped: &str) -> String {
    let mut out = String::with_capacity(escaped.len());
    let mut style = Style::default();
    let mut open = false;
    let mut last = 0;

    for caps in CSI_REGEX.captures_iter(escaped) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&escaped[last..whole.start()]);
        last = whole.end();

        if &caps[2] != "m" {
            continue;
        }

        style.apply(&caps[1]);
        if open {
            out.push_str("</span>");
            open = false;
        }
        if !style.is_plain() {
            let _ = write!(out, "<span class=\"{}\">", style.classes());
            open = true;
        }
    }

    out.push_str(&escaped[last..]);
    if open {
        out.push_str("</span>");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(render_ansi("cargo build"), "cargo build");
    }

    #[test]
    fn test_color_and_reset() {
        let html = render_ansi("\x1b[1;31merror\x1b[0m: boom");
        assert_eq!(
            html,
            "<span class=\"ansi-bold ansi-fg-red\">error</span>: boom"
        );
    }

    #[test]
    fn test_bright_and_256_colors() {
        assert_eq!(
            render_ansi("\x1b[92mok\x1b[m"),
            "<span class=\"ansi-fg-bright-green\">ok</span>"
        );
        assert_eq!(
            render_ansi("\x1b[38;5;208mwarn"),
            "<span class=\"ansi-fg-208\">warn</span>"
        );
    }

    #[test]
    fn test_non_sgr_sequences_stripped() {
        assert_eq!(render_ansi("\x1b[2Kprogress\x1b[1A"), "progress");
    }

    #[test]
    fn test_escaping_happens_before_markup() {
        let html = render_ansi("\x1b[33m<script>\x1b[0m");
        assert_eq!(
            html,
            "<span class=\"ansi-fg-yellow\">&lt;script&gt;</span>"
        );
    }

    #[test]
    fn test_render_is_idempotent() {
        let text = "\x1b[4munder\x1b[24m line";
        assert_eq!(render_ansi(text), render_ansi(text));
    }
}
