use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::app::{CacheResult, ProgressEvent, ProgressSink};
use crate::gdc::{FetchedRecord, SearchPage};
use crate::record::MetadataRecord;

const TITLE_MAX_CHARS: usize = 50;
const WRAP_WIDTH: usize = 70;
const SKIPPED_LINK_RELS: &[&str] = &["root", "self", "alternate", "collection"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Text,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_json<T: Serialize + ?Sized>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Progress reported through the log.
pub struct LogSink;

impl ProgressSink for LogSink {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!("{} ({} ms)", event.message, elapsed.as_millis()),
            None => info!("{}", event.message),
        }
    }
}

pub struct TextOutput;

impl TextOutput {
    pub fn print_cache(result: &CacheResult) -> io::Result<()> {
        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "Cached {} files from {} into {}",
            result.file_count, result.source_url, result.directory
        )?;
        if let Some(previous) = &result.previous {
            writeln!(
                stdout,
                "Replaced {} files from {} downloaded at {}",
                previous.file_count, previous.source_url, previous.downloaded_at
            )?;
        }
        writeln!(stdout, "Done")
    }

    pub fn print_search(page: &SearchPage) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(render_search(page).as_bytes())
    }

    pub fn print_record(fetched: &FetchedRecord) -> io::Result<()> {
        let mut stdout = io::stdout();
        stdout.write_all(render_record(fetched).as_bytes())
    }
}

pub fn render_search(page: &SearchPage) -> String {
    let mut out = String::new();
    let count = page
        .number_matched
        .map(|count| count.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let plural = if page.number_matched == Some(1) { "" } else { "s" };
    out.push_str(&format!("Results: {count} record{plural}\n"));
    if page.records.is_empty() {
        return out;
    }

    let header = ["id", "centre", "title", "data policy"];
    let rows = page
        .records
        .iter()
        .map(|record| {
            [
                record.id.clone(),
                record.centre_id.clone().unwrap_or_default(),
                truncate(&record.title, TITLE_MAX_CHARS),
                data_policy_label(record).to_string(),
            ]
        })
        .collect::<Vec<_>>();

    let mut widths = header.map(|name| name.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator = widths
        .iter()
        .map(|width| "-".repeat(width + 2))
        .collect::<Vec<_>>()
        .join("+");
    let line = |cells: &[&str]| {
        let cells = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!(" {cell:<width$} ", width = *width))
            .collect::<Vec<_>>()
            .join("|");
        format!("|{cells}|\n")
    };

    out.push_str(&format!("+{separator}+\n"));
    out.push_str(&line(&header[..]));
    out.push_str(&format!("+{separator}+\n"));
    for row in &rows {
        let cells = row.iter().map(|cell| cell.as_str()).collect::<Vec<_>>();
        out.push_str(&line(&cells));
    }
    out.push_str(&format!("+{separator}+\n"));
    if let Some(next) = &page.next {
        out.push_str(&format!("Next page: {next}\n"));
    }
    out
}

pub fn render_record(fetched: &FetchedRecord) -> String {
    let record = &fetched.record;
    let id = record.record_id();
    let mut out = String::new();
    out.push_str(&format!("Record: {}\n\n", record.title));
    out.push_str(&format!("\tID: {}\n", record.id));
    out.push_str(&format!("\tCountry: {}\n", id.country().unwrap_or("-")));
    out.push_str(&format!("\tCentre: {}\n", id.centre_id().unwrap_or("-")));
    out.push_str(&format!("\tData policy: {}\n", data_policy_label(record)));
    if let Some(organization) = &record.organization {
        out.push_str(&format!("\tOrganization: {organization}\n"));
    }
    let description = wrap(record.description.as_deref().unwrap_or_default(), WRAP_WIDTH);
    out.push_str(&format!("\tDescription: {}\n", description.join("\n\t\t")));
    out.push_str("\tLinks:\n");
    for link in record
        .links
        .iter()
        .filter(|link| !SKIPPED_LINK_RELS.contains(&link.rel.as_deref().unwrap_or_default()))
    {
        out.push_str(&format!("\t\t{}\n", link.href));
    }
    out.push_str(&format!("\n\tURL to full metadata: {}\n", fetched.url));
    out
}

fn data_policy_label(record: &MetadataRecord) -> &str {
    match (&record.data_policy_name, record.data_policy) {
        (Some(name), _) => name,
        (None, Some(policy)) => policy.as_str(),
        (None, None) => "missing",
    }
}

fn truncate(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let head = value.chars().take(max_chars).collect::<String>();
    format!("{head}...")
}

fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.chars().count() + 1 + word.chars().count() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
