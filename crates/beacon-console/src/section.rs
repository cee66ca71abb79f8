//! Console sections.

use chrono::{NaiveTime, TimeDelta};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write;

use crate::render::render_ansi;

/// Which marker opened a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Lines seen before any marker.
    Preamble,
    /// Opened by a `|##` header line.
    Header,
    /// Opened by a `|Step` line.
    Step,
}

/// One console line after its timestamp prefix has been split off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsoleLine {
    /// UTC time parsed from the `HH:MM:SS|` prefix.
    pub time: Option<NaiveTime>,
    /// `time` shifted to the display offset.
    pub display_time: Option<String>,
    pub text: String,
}

/// A contiguous run of console lines between two marker lines.
#[derive(Debug, Clone, Serialize)]
pub struct Section {
    /// Index (among non-empty lines) of the line that opened this section.
    pub line_index: usize,
    pub kind: SectionKind,
    pub label: String,
    pub started_at: Option<NaiveTime>,
    pub ended_at: Option<NaiveTime>,
    pub truncated: bool,
    pub rendered: String,
    #[serde(skip)]
    lines: VecDeque<ConsoleLine>,
    #[serde(skip)]
    max_lines: usize,
}

impl Section {
    pub(crate) fn new(
        line_index: usize,
        kind: SectionKind,
        label: impl Into<String>,
        started_at: Option<NaiveTime>,
        max_lines: usize,
    ) -> Self {
        Self {
            line_index,
            kind,
            label: label.into(),
            started_at,
            ended_at: None,
            truncated: false,
            rendered: String::new(),
            lines: VecDeque::new(),
            max_lines,
        }
    }

    /// Retained lines, oldest first.
    pub fn lines(&self) -> impl Iterator<Item = &ConsoleLine> {
        self.lines.iter()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Elapsed time between start and end; a section crossing midnight wraps.
    pub fn duration(&self) -> Option<TimeDelta> {
        let (start, end) = (self.started_at?, self.ended_at?);
        let delta = end.signed_duration_since(start);
        if delta < TimeDelta::zero() {
            Some(delta + TimeDelta::days(1))
        } else {
            Some(delta)
        }
    }

    pub(crate) fn push(&mut self, line: ConsoleLine) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
            self.truncated = true;
        }
        self.render();
    }

    /// Regenerate `rendered` from the retained lines.
    pub(crate) fn render(&mut self) {
        let mut out = String::new();
        if self.truncated {
            let _ = writeln!(
                out,
                "<div class=\"console-truncated\">Output truncated, showing only the last {} lines.</div>",
                self.max_lines
            );
        }
        for line in &self.lines {
            out.push_str("<div class=\"console-line\">");
            if let Some(time) = &line.display_time {
                let _ = write!(out, "<span class=\"console-time\">{time}</span>");
            }
            let _ = write!(
                out,
                "<span class=\"console-text\">{}</span>",
                render_ansi(&line.text)
            );
            out.push_str("</div>\n");
        }
        self.rendered = out;
    }
}
