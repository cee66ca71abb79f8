//! Line-oriented section assembly.

use beacon_config::ConsoleConfig;
use chrono::{DateTime, FixedOffset, NaiveTime, TimeDelta, Utc};
use std::collections::BTreeSet;

use crate::section::{ConsoleLine, Section, SectionKind};

const SECTION_MARKER: &str = "|##";
const STEP_MARKER: &str = "|Step";

/// Where the assembler is in a job's log lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    NoSection,
    InSection,
    /// The job is terminal; further input is ignored.
    Finalized,
}

/// Turns raw console chunks of one job into sections.
///
/// Chunks may split lines anywhere; an unterminated tail is held back until
/// the next chunk (or [`finalize`](Self::finalize)) completes it.
#[derive(Debug)]
pub struct LogAssembler {
    max_lines: usize,
    marker_window: usize,
    display_offset: FixedOffset,
    sections: Vec<Section>,
    carry: String,
    lines_seen: usize,
    state: AssemblerState,
    updated: BTreeSet<usize>,
}

impl LogAssembler {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            max_lines: config.max_section_lines.max(1),
            marker_window: config.marker_window,
            display_offset: config.display_offset,
            sections: Vec::new(),
            carry: String::new(),
            lines_seen: 0,
            state: AssemblerState::NoSection,
            updated: BTreeSet::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        self.state
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Feed a raw chunk of console output.
    pub fn push_chunk(&mut self, chunk: &str) {
        if self.state == AssemblerState::Finalized {
            return;
        }

        self.carry.push_str(chunk);
        let Some(last_newline) = self.carry.rfind('\n') else {
            return;
        };

        let rest = self.carry.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.carry, rest);
        for line in complete.split('\n') {
            self.push_line(line);
        }
    }

    /// Feed one complete line (without its trailing newline).
    pub fn push_line(&mut self, raw: &str) {
        if self.state == AssemblerState::Finalized {
            return;
        }

        let raw = raw.trim_end_matches('\r');
        if raw.trim().is_empty() {
            return;
        }

        let index = self.lines_seen;
        self.lines_seen += 1;
        let (time, text) = split_timestamp(raw);

        if let Some((kind, label)) = self.marker(raw) {
            self.open_section(index, kind, label, time);
            return;
        }

        if self.state == AssemblerState::NoSection {
            self.open_section(index, SectionKind::Preamble, String::new(), time);
        }

        let line = ConsoleLine {
            time,
            display_time: time.map(|t| self.display(t)),
            text: text.to_string(),
        };
        let current = self.sections.len() - 1;
        self.sections[current].push(line);
        self.updated.insert(current);
    }

    /// Mark the log complete. The last section ends at `ended_at` (the job's
    /// end time) or, failing that, at its last line's timestamp.
    pub fn finalize(&mut self, ended_at: Option<DateTime<Utc>>) {
        if self.state == AssemblerState::Finalized {
            return;
        }

        if !self.carry.is_empty() {
            let tail = std::mem::take(&mut self.carry);
            self.push_line(&tail);
        }

        if let Some(last) = self.sections.last_mut() {
            if last.ended_at.is_none() {
                last.ended_at = ended_at
                    .map(|t| t.time())
                    .or_else(|| last.lines().filter_map(|l| l.time).last());
            }
            last.render();
            self.updated.insert(self.sections.len() - 1);
        }

        self.state = AssemblerState::Finalized;
    }

    /// Indexes of sections changed since the previous call, in order.
    pub fn take_updated(&mut self) -> Vec<usize> {
        std::mem::take(&mut self.updated).into_iter().collect()
    }

    fn marker(&self, line: &str) -> Option<(SectionKind, String)> {
        if let Some(pos) = self.find_in_window(line, SECTION_MARKER) {
            let label = line[pos + SECTION_MARKER.len()..]
                .trim_start_matches('#')
                .trim();
            return Some((SectionKind::Header, label.to_string()));
        }
        if let Some(pos) = self.find_in_window(line, STEP_MARKER) {
            let label = line[pos + 1..].trim();
            return Some((SectionKind::Step, label.to_string()));
        }
        None
    }

    fn find_in_window(&self, line: &str, marker: &str) -> Option<usize> {
        line.find(marker).filter(|&pos| pos <= self.marker_window)
    }

    fn open_section(
        &mut self,
        index: usize,
        kind: SectionKind,
        label: String,
        time: Option<NaiveTime>,
    ) {
        if let Some(previous) = self.sections.last_mut() {
            previous.ended_at = time;
            previous.render();
            self.updated.insert(self.sections.len() - 1);
        }

        let mut section = Section::new(index, kind, label, time, self.max_lines);
        section.render();
        self.sections.push(section);
        self.updated.insert(self.sections.len() - 1);
        self.state = AssemblerState::InSection;
    }

    fn display(&self, time: NaiveTime) -> String {
        let shift = TimeDelta::try_seconds(i64::from(self.display_offset.local_minus_utc()))
            .unwrap_or(TimeDelta::zero());
        let (local, _) = time.overflowing_add_signed(shift);
        local.format("%H:%M:%S").to_string()
    }
}

/// Split a `HH:MM:SS|rest` line into its UTC time and the rest. Lines without
/// a parseable prefix are returned whole.
fn split_timestamp(line: &str) -> (Option<NaiveTime>, &str) {
    if let Some(pos) = line.find('|') {
        if let Ok(time) = NaiveTime::parse_from_str(line[..pos].trim(), "%H:%M:%S") {
            return (Some(time), &line[pos + 1..]);
        }
    }
    (None, line)
}
