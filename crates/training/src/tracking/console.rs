use std::io::{self, Stdout, Write};

use super::{TrackingError, TrackingRun};

/// Prints one line per row, e.g. `Loss curve step=10 loss=2.3026`.
pub struct ConsoleRun<W: Write = Stdout> {
    out: W,
}

impl ConsoleRun<Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleRun<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TrackingRun for ConsoleRun<W> {
    fn log_row(
        &mut self,
        name: &str,
        step: i64,
        fields: &[(&str, f64)],
    ) -> Result<(), TrackingError> {
        let mut line = format!("{name} step={step}");
        for (key, value) in fields {
            line.push_str(&format!(" {key}={}", format_value(*value)));
        }
        writeln!(self.out, "{line}")?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrackingError> {
        self.out.flush()?;
        Ok(())
    }
}

fn format_value(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && (magnitude < 1e-3 || magnitude >= 1e6) {
        format!("{value:.5e}")
    } else {
        format!("{value:.4}")
    }
}
