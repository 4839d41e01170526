use std::io::{self, Write};

use client_core::{ChatEvent, StreamPhase};
use shared::{domain::Reference, protocol::AssistantFile};

const SIZE_UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];

/// Human readable size, rounded to the nearest whole unit.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Byte".to_string();
    }
    let mut unit = 0;
    while unit + 1 < SIZE_UNITS.len() && bytes >= 1024u64.pow(unit as u32 + 1) {
        unit += 1;
    }
    let scaled = (bytes as f64 / 1024f64.powi(unit as i32)).round();
    format!("{scaled} {}", SIZE_UNITS[unit])
}

pub fn format_file(file: &AssistantFile) -> String {
    let created = file
        .created_at
        .to_utc()
        .map(|created| created.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "{}  Size: {}  Created: {created}",
        file.name,
        format_file_size(file.size)
    )
}

pub fn write_files(out: &mut impl Write, files: &[AssistantFile]) -> io::Result<()> {
    writeln!(out, "Assistant Files")?;
    if files.is_empty() {
        writeln!(out, "  (none)")?;
    }
    for file in files {
        writeln!(out, "  {}", format_file(file))?;
    }
    Ok(())
}

/// One line per reference; those naming a known assistant file are marked.
pub fn format_references(references: &[Reference], files: &[AssistantFile]) -> Vec<String> {
    references
        .iter()
        .enumerate()
        .map(|(index, reference)| {
            let marker = if files.iter().any(|file| file.name == reference.name) {
                " [file]"
            } else {
                ""
            };
            format!(
                "  [{}] {} <{}>{marker}",
                index + 1,
                reference.name,
                reference.url
            )
        })
        .collect()
}

/// Renders the events of one response as they arrive.
pub struct ResponseView<'a> {
    files: &'a [AssistantFile],
    references: Option<Vec<Reference>>,
}

impl<'a> ResponseView<'a> {
    pub fn new(files: &'a [AssistantFile]) -> Self {
        Self {
            files,
            references: None,
        }
    }

    pub fn apply(&mut self, event: ChatEvent, out: &mut impl Write) -> io::Result<()> {
        match event {
            ChatEvent::ContentDelta { delta, .. } => {
                write!(out, "{delta}")?;
                out.flush()?;
            }
            ChatEvent::ReferencesUpdated { references, .. } => {
                self.references = Some(references);
            }
            ChatEvent::TurnSealed { .. } => {
                writeln!(out)?;
                if let Some(references) = self.references.take() {
                    writeln!(out, "References:")?;
                    for line in format_references(&references, self.files) {
                        writeln!(out, "{line}")?;
                    }
                }
            }
            ChatEvent::PhaseChanged(StreamPhase::Cancelled) => {
                writeln!(out, "[cancelled]")?;
            }
            ChatEvent::Error(message) => {
                writeln!(out, "Error: {message}")?;
            }
            ChatEvent::PhaseChanged(_) | ChatEvent::TurnAppended { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/render_tests.rs"]
mod tests;
