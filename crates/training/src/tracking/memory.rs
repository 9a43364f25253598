use super::{Row, TrackingError, TrackingRun};

/// Keeps every row in memory, in logging order.
#[derive(Debug, Default)]
pub struct InMemoryRun {
    rows: Vec<Row>,
    flushes: usize,
    reject_with: Option<String>,
}

impl InMemoryRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// A run that refuses every row with `message`, the way an unreachable
    /// tracking service would.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            reject_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn series<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Row> + 'a {
        self.rows.iter().filter(move |row| row.name == name)
    }

    /// Steps at which `name` received a row.
    pub fn steps(&self, name: &str) -> Vec<i64> {
        self.series(name).map(|row| row.step).collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes
    }
}

impl TrackingRun for InMemoryRun {
    fn log_row(
        &mut self,
        name: &str,
        step: i64,
        fields: &[(&str, f64)],
    ) -> Result<(), TrackingError> {
        if let Some(message) = &self.reject_with {
            return Err(TrackingError::Rejected(message.clone()));
        }
        self.rows.push(Row::new(name, step, fields));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TrackingError> {
        self.flushes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_filters_by_name() {
        let mut run = InMemoryRun::new();
        run.log_row("Loss curve", 10, &[("loss", 2.0)]).unwrap();
        run.log_row("Throughput", 10, &[("ips", 64.0)]).unwrap();
        run.log_row("Loss curve", 20, &[("loss", 1.0)]).unwrap();

        assert_eq!(run.steps("Loss curve"), vec![10, 20]);
        assert_eq!(run.steps("Throughput"), vec![10]);
        assert!(run.steps("Learning rate schedule").is_empty());
    }

    #[test]
    fn rejecting_run_records_nothing() {
        let mut run = InMemoryRun::rejecting("unauthorized");
        assert!(run.log_row("Loss curve", 10, &[("loss", 2.0)]).is_err());
        assert!(run.rows().is_empty());
    }
}
