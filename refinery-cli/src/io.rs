//! JSON and JSON Lines record files.

use anyhow::Context;
use refinery_core::Record;
use serde_json::Value;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn is_json_lines(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("jsonl" | "ndjson")
    )
}

/// Read records from a JSON array, a single JSON object, or JSON Lines
/// (chosen by the `.jsonl`/`.ndjson` extension). Blank lines are skipped.
pub fn read_records(path: &Path) -> anyhow::Result<Vec<Record>> {
    let file =
        std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let source_id = path.display().to_string();

    let values: Vec<Value> = if is_json_lines(path) {
        let mut values = Vec::new();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let value = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid JSON", source_id, line_no + 1))?;
            values.push(value);
        }
        values
    } else {
        match serde_json::from_reader::<_, Value>(BufReader::new(file))
            .with_context(|| format!("{source_id}: invalid JSON"))?
        {
            Value::Array(items) => items,
            other => vec![other],
        }
    };

    Ok(values
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let mut record = Record::from_value(value).with_source("file", source_id.clone());
            if record.metadata.record_id.is_none() {
                record.metadata.record_id = Some(format!("{source_id}#{i}"));
            }
            record.extracted_at = Some(chrono::Utc::now());
            record
        })
        .collect())
}

fn render(record: &Record, with_metadata: bool) -> anyhow::Result<Value> {
    Ok(if with_metadata {
        serde_json::to_value(record)?
    } else {
        Value::Object(record.data.clone())
    })
}

/// Write records to `path`, or stdout when `path` is `None`. JSON Lines
/// extensions get one record per line; anything else a pretty JSON array.
pub fn write_records(
    path: Option<&Path>,
    records: &[Record],
    with_metadata: bool,
) -> anyhow::Result<()> {
    let lines = path.is_some_and(is_json_lines);
    let mut out: Box<dyn Write> = match path {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            Box::new(BufWriter::new(
                std::fs::File::create(p).with_context(|| format!("cannot create {}", p.display()))?,
            ))
        }
        None => Box::new(BufWriter::new(std::io::stdout().lock())),
    };

    if lines {
        for record in records {
            serde_json::to_writer(&mut out, &render(record, with_metadata)?)?;
            out.write_all(b"\n")?;
        }
    } else {
        let values = records
            .iter()
            .map(|r| render(r, with_metadata))
            .collect::<anyhow::Result<Vec<_>>>()?;
        serde_json::to_writer_pretty(&mut out, &values)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_read_json_array_and_lines() {
        let dir = TempDir::new().unwrap();
        let array = dir.path().join("in.json");
        std::fs::write(&array, r#"[{"a": 1}, {"a": 2}]"#).unwrap();
        let lines = dir.path().join("in.jsonl");
        std::fs::write(&lines, "{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();

        let from_array = read_records(&array).unwrap();
        let from_lines = read_records(&lines).unwrap();
        assert_eq!(from_array.len(), 2);
        assert_eq!(from_lines.len(), 2);
        assert_eq!(from_lines[1].get("a"), Some(&json!(2)));
        assert_eq!(from_array[0].metadata.source_type, "file");
        assert!(from_array[0].metadata.record_id.as_deref().unwrap().ends_with("#0"));
    }

    #[test]
    fn test_bad_line_reports_position() {
        let dir = TempDir::new().unwrap();
        let lines = dir.path().join("in.jsonl");
        std::fs::write(&lines, "{\"a\": 1}\n{oops\n").unwrap();
        let err = read_records(&lines).unwrap_err();
        assert!(format!("{err:#}").contains(":2:"));
    }

    #[test]
    fn test_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let records = vec![Record::from_value(json!({"b": 2, "a": 1}))];
        for name in ["out.json", "out.jsonl"] {
            let path = dir.path().join(name);
            write_records(Some(&path), &records, false).unwrap();
            let back = read_records(&path).unwrap();
            assert_eq!(back[0].data, records[0].data);
        }
    }

    #[test]
    fn test_write_with_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.json");
        let records = vec![Record::from_value(json!({"a": 1})).with_quality(0.5)];
        write_records(Some(&path), &records, true).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value[0]["metadata"]["quality_score"], json!(0.5));
        assert_eq!(value[0]["data"]["a"], json!(1));
    }
}
