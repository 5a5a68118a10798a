use std::collections::HashMap;

pub type TabularRow = HashMap<String, String>;

/// Splits delimited text into records of fields. Quoted fields may contain
/// commas, doubled quotes and line breaks.
fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut fields: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    while i < chars.len() {
        let ch = chars[i];
        if ch == '"' {
            if in_quotes && i + 1 < chars.len() && chars[i + 1] == '"' {
                buf.push('"');
                i += 2;
                continue;
            }
            in_quotes = !in_quotes;
            i += 1;
            continue;
        }
        if !in_quotes && ch == ',' {
            fields.push(std::mem::take(&mut buf));
            i += 1;
            continue;
        }
        if !in_quotes && (ch == '\n' || ch == '\r') {
            if ch == '\r' && i + 1 < chars.len() && chars[i + 1] == '\n' {
                i += 1;
            }
            fields.push(std::mem::take(&mut buf));
            records.push(std::mem::take(&mut fields));
            i += 1;
            continue;
        }
        buf.push(ch);
        i += 1;
    }
    if !buf.is_empty() || !fields.is_empty() {
        fields.push(buf);
        records.push(fields);
    }
    records
}

fn is_blank_record(fields: &[String]) -> bool {
    fields.iter().all(|f| f.is_empty())
}

/// Header-keyed rows. The first non-blank record is the header; blank lines
/// are skipped; missing trailing cells read as "" and extra cells are dropped.
pub fn parse_rows(text: &str) -> Vec<TabularRow> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text)
        .into_iter()
        .filter(|r| !is_blank_record(r));
    let Some(header) = records.next() else {
        return Vec::new();
    };
    let header = header
        .into_iter()
        .map(|h| h.trim().to_string())
        .collect::<Vec<_>>();

    records
        .map(|fields| {
            header
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty())
                .map(|(i, h)| (h.clone(), fields.get(i).cloned().unwrap_or_default()))
                .collect::<TabularRow>()
        })
        .collect()
}

pub fn quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

pub fn header_line(labels: &[&str]) -> String {
    let mut line = labels.iter().map(|l| quote(l)).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}
