use crate::error::{GatewayError, Result};
use crate::formatter::ResultFormatter;
use crate::statement::StatementKind;
use crate::warehouse::Warehouse;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

pub const MUTATION_DONE: &str = "Operation executed successfully.";

/// Runs resolved statements and renders their rows. Warehouse failures come
/// back as `Execution` so the gateway can explain them in the reply.
pub struct Executor {
    warehouse: Arc<dyn Warehouse>,
    formatter: ResultFormatter,
}

impl Executor {
    pub fn new(warehouse: Arc<dyn Warehouse>, formatter: ResultFormatter) -> Self {
        Self {
            warehouse,
            formatter,
        }
    }

    pub async fn run(&self, sql: &str, kind: StatementKind) -> Result<String> {
        let started = Instant::now();
        let rows = self.warehouse.execute(sql).await.map_err(|e| {
            error!("{:?} statement failed: {}", kind, e);
            GatewayError::Execution(e.to_string())
        })?;

        info!(
            "{:?} statement returned {} rows in {}ms",
            kind,
            rows.len(),
            started.elapsed().as_millis()
        );
        if kind == StatementKind::Mutating && rows.is_empty() {
            Ok(MUTATION_DONE.to_string())
        } else {
            Ok(self.formatter.format(&rows))
        }
    }
}
