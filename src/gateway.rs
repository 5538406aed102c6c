//! Conversational Query Gateway
//!
//! Entry point for one chat turn. Control flow:
//! 1. `CONFIRM` goes straight to the confirmation gate.
//! 2. A rule-table hit yields a template statement (no schema, no model).
//! 3. Otherwise the live schema grounds a model translation.
//! 4. Every resolved statement is classified: reads run now, anything else
//!    is parked until the session confirms.
//!
//! Only schema failures escape as errors. Everything else is explained to
//! the user in the reply.

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::confirmation::ConfirmationGate;
use crate::error::{GatewayError, Result};
use crate::executor::Executor;
use crate::formatter::ResultFormatter;
use crate::llm::{LanguageModel, LlmClient};
use crate::pending::{InMemoryPendingStore, PendingStore, SqlitePendingStore};
use crate::prompt_classifier::{Classification, PromptClassifier, QueryScope};
use crate::schema::{is_dataset_name, SchemaCache, SchemaIntrospector};
use crate::statement::{classify_statement, StatementKind};
use crate::translator::SqlTranslator;
use crate::warehouse::{HttpWarehouse, Warehouse};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

pub const NOTHING_TO_CONFIRM: &str = "There is no pending operation to confirm.";
pub const CONFIRMATION_EXPIRED: &str =
    "The pending operation expired before it was confirmed. Please resubmit your original request.";
pub const NOT_UNDERSTOOD: &str =
    "Sorry, I could not understand the request. Please try rephrasing it.";
pub const INVALID_DATASET: &str =
    "The dataset name is not valid. Use letters, digits and underscores only.";
pub const TRANSLATION_UNAVAILABLE: &str = "Sorry, I could not process the request right now";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub prompt: String,
    /// Caller-side classification hint, passed through untouched.
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl GatewayRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_dataset(mut self, dataset: impl Into<String>) -> Self {
        self.dataset = Some(dataset.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub success: bool,
    pub reply: String,
}

impl GatewayResponse {
    fn reply(reply: impl Into<String>) -> Self {
        Self {
            success: true,
            reply: reply.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl GatewayErrorResponse {
    pub fn from_error(summary: &str, err: &GatewayError) -> Self {
        Self {
            error: summary.to_string(),
            details: Some(err.to_string()),
        }
    }
}

pub struct QueryGateway {
    config: GatewayConfig,
    classifier: PromptClassifier,
    introspector: SchemaIntrospector,
    translator: SqlTranslator,
    gate: ConfirmationGate,
    executor: Executor,
}

impl QueryGateway {
    pub fn new(
        config: GatewayConfig,
        warehouse: Arc<dyn Warehouse>,
        llm: Arc<dyn LanguageModel>,
        store: Arc<dyn PendingStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cache = SchemaCache::new(config.schema_cache_ttl, clock.clone());
        Self {
            classifier: PromptClassifier::new(config.confirmation_keyword.clone()),
            introspector: SchemaIntrospector::new(warehouse.clone(), cache),
            translator: SqlTranslator::new(llm, config.project_id.clone()),
            gate: ConfirmationGate::new(store, clock, config.confirmation_ttl),
            executor: Executor::new(warehouse, ResultFormatter::new(config.max_rendered_rows)),
            config,
        }
    }

    /// Wire up the HTTP warehouse, the chat-completions client and the
    /// configured pending store.
    pub fn from_config(config: GatewayConfig) -> Result<Self> {
        let warehouse = HttpWarehouse::new(
            config.warehouse_url.clone(),
            config.project_id.clone(),
            config.warehouse_token.clone(),
        )?;

        let api_key = config.llm_api_key.clone().unwrap_or_else(|| {
            warn!("OPENAI_API_KEY not set; requests that need translation will fail");
            String::new()
        });
        let llm = LlmClient::new(api_key, config.llm_model.clone(), config.llm_base_url.clone())?;

        let store: Arc<dyn PendingStore> = match &config.pending_db {
            Some(path) => Arc::new(SqlitePendingStore::open(path)?),
            None => Arc::new(InMemoryPendingStore::new()),
        };

        Ok(Self::new(
            config,
            Arc::new(warehouse),
            Arc::new(llm),
            store,
            Arc::new(SystemClock),
        ))
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn gate(&self) -> &ConfirmationGate {
        &self.gate
    }

    /// Handle one chat turn. `Err` only for configuration failures.
    pub async fn handle(&self, request: GatewayRequest) -> Result<GatewayResponse> {
        let session = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.config.default_session.clone());
        let span = tracing::info_span!(
            "request",
            request_id = %Uuid::new_v4(),
            session = %session
        );
        self.handle_in_session(request, session).instrument(span).await
    }

    async fn handle_in_session(
        &self,
        request: GatewayRequest,
        session: String,
    ) -> Result<GatewayResponse> {
        let prompt = request.prompt.trim();
        if prompt.is_empty() {
            return Ok(GatewayResponse::reply("Please enter a request."));
        }
        if let Some(context) = &request.context {
            debug!("Caller context: {}", context);
        }

        let dataset = request
            .dataset
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| self.config.default_dataset.clone());
        if !is_dataset_name(&dataset) {
            warn!("Rejected request for invalid dataset {:?}", dataset);
            return Ok(GatewayResponse::reply(INVALID_DATASET));
        }
        let scope = QueryScope::new(self.config.project_id.clone(), dataset);

        let sql = match self.classifier.classify(prompt, &scope) {
            Classification::Confirm => return Ok(self.confirm(&session).await),
            Classification::DirectQuery { rule, sql } => {
                info!("Matched direct query rule {}", rule);
                sql
            }
            Classification::NeedsTranslation => {
                let schema = self.introspector.describe(&scope.dataset).await?;
                match self.translator.translate(prompt, &schema).await {
                    Ok(sql) => sql,
                    Err(GatewayError::Translation(_)) => {
                        return Ok(GatewayResponse::reply(NOT_UNDERSTOOD))
                    }
                    Err(e) => {
                        warn!("Translation failed: {}", e);
                        return Ok(GatewayResponse::reply(format!(
                            "{}: {}",
                            TRANSLATION_UNAVAILABLE, e
                        )));
                    }
                }
            }
        };

        Ok(self.dispatch(&session, &sql).await)
    }

    async fn dispatch(&self, session: &str, sql: &str) -> GatewayResponse {
        match classify_statement(sql) {
            StatementKind::ReadOnly => self.execute(sql, StatementKind::ReadOnly).await,
            StatementKind::Mutating => match self.gate.propose(session, sql).await {
                Ok(_) => GatewayResponse::reply(format!(
                    "This request will modify data:\n\n{}\n\nReply {} within {} to run it.",
                    sql,
                    self.config.confirmation_keyword,
                    describe_ttl(self.gate.ttl())
                )),
                Err(e) => {
                    warn!("Could not store pending operation: {}", e);
                    GatewayResponse::reply(format!(
                        "Could not queue the operation for confirmation: {}",
                        e
                    ))
                }
            },
        }
    }

    async fn confirm(&self, session: &str) -> GatewayResponse {
        match self.gate.confirm(session).await {
            Ok(op) => self.execute(&op.sql_text, StatementKind::Mutating).await,
            Err(GatewayError::NoPendingOperation(_)) => GatewayResponse::reply(NOTHING_TO_CONFIRM),
            Err(GatewayError::ExpiredConfirmation(_)) => {
                GatewayResponse::reply(CONFIRMATION_EXPIRED)
            }
            Err(e) => {
                warn!("Confirmation failed: {}", e);
                GatewayResponse::reply(format!("Could not confirm the operation: {}", e))
            }
        }
    }

    async fn execute(&self, sql: &str, kind: StatementKind) -> GatewayResponse {
        match self.executor.run(sql, kind).await {
            Ok(reply) => GatewayResponse::reply(reply),
            Err(GatewayError::Execution(detail)) => {
                GatewayResponse::reply(format!("The query failed: {}", detail))
            }
            Err(e) => GatewayResponse::reply(format!("The query failed: {}", e)),
        }
    }
}

/// Whole minutes when the TTL is a whole number of minutes, seconds otherwise.
fn describe_ttl(ttl: Duration) -> String {
    let secs = ttl.num_seconds();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} minute(s)", secs / 60)
    } else {
        format!("{} second(s)", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_ttl() {
        assert_eq!(describe_ttl(Duration::minutes(5)), "5 minute(s)");
        assert_eq!(describe_ttl(Duration::seconds(30)), "30 second(s)");
        assert_eq!(describe_ttl(Duration::seconds(90)), "90 second(s)");
        assert_eq!(describe_ttl(Duration::seconds(60)), "1 minute(s)");
    }
}
