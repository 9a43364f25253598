use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use serde_json::{Map, Number, Value};

use super::{TrackingError, TrackingRun};
use crate::TrainingError;

/// Appends one JSON object per row to a file:
/// `{"name":"Loss curve","step":10,"loss":2.30}`.
pub struct JsonLinesRun {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonLinesRun {
    pub fn create(path: &Path) -> Result<Self, TrainingError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| {
                TrainingError::initialization(format!(
                    "failed to create directory {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| {
                TrainingError::initialization(format!(
                    "failed to open row log {}: {err}",
                    path.display()
                ))
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrackingRun for JsonLinesRun {
    fn log_row(
        &mut self,
        name: &str,
        step: i64,
        fields: &[(&str, f64)],
    ) -> Result<(), TrackingError> {
        let mut object = Map::new();
        object.insert("name".to_string(), Value::String(name.to_string()));
        object.insert("step".to_string(), Value::Number(Number::from(step)));
        for (key, value) in fields {
            // Non-finite values have no JSON representation and become null.
            let value = Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null);
            object.insert(key.to_string(), value);
        }

        serde_json::to_writer(&mut self.writer, &Value::Object(object))
            .map_err(|err| TrackingError::Encode(err.to_string()))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrackingError> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Drop for JsonLinesRun {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rows_are_appended_as_json_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("runs").join("rows.jsonl");

        let mut run = JsonLinesRun::create(&path).unwrap();
        assert_eq!(run.path(), path.as_path());
        run.log_row("Loss curve", 10, &[("loss", 2.5)]).unwrap();
        run.log_row("Throughput", 10, &[("ips", f64::INFINITY)])
            .unwrap();
        run.flush().unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let rows: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["name"], "Loss curve");
        assert_eq!(rows[0]["step"], 10);
        assert_eq!(rows[0]["loss"], 2.5);
        assert!(rows[1]["ips"].is_null());
    }

    #[test]
    fn reopening_appends() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("rows.jsonl");

        for step in [10, 20] {
            let mut run = JsonLinesRun::create(&path).unwrap();
            run.log_row("Loss curve", step, &[("loss", 1.0)]).unwrap();
        }

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }
}
