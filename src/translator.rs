//! NL-to-SQL translation
//!
//! Grounds the language model in the live schema and pulls exactly one SQL
//! statement out of its reply. If the reply has no ```sql fenced block the
//! translator fails with `Translation`; nothing is guessed from free text.

use crate::error::{GatewayError, Result};
use crate::llm::LanguageModel;
use crate::schema::SchemaDescriptor;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, warn};

lazy_static! {
    static ref SQL_BLOCK: Regex =
        Regex::new(r"(?is)```[ \t]*sql\b[ \t]*\r?\n?(.*?)```").expect("valid SQL block pattern");
}

pub struct SqlTranslator {
    llm: Arc<dyn LanguageModel>,
    project_id: String,
}

impl SqlTranslator {
    pub fn new(llm: Arc<dyn LanguageModel>, project_id: String) -> Self {
        Self { llm, project_id }
    }

    pub fn build_prompt(&self, user_text: &str, schema: &SchemaDescriptor) -> String {
        format!(
            r#"You are a SQL assistant for a business analytics warehouse.

Project: {project}
Dataset: {dataset}

Tables and columns:
{tables}

Rules:
1. Always answer with exactly one SQL statement inside a single ```sql fenced code block.
2. Always fully qualify table references as `{project}.{dataset}.<table>`.
3. Prefer SELECT statements when the user wants to read or inspect data.
4. Any statement that is not a SELECT will be shown to the user and requires separate confirmation before it runs.

User request: "{request}""#,
            project = self.project_id,
            dataset = schema.dataset,
            tables = schema.render(),
            request = user_text,
        )
    }

    /// Translate `user_text` into one SQL statement. `Translation` means the
    /// model answered but produced no usable statement; transport failures
    /// come back as `Llm`.
    pub async fn translate(&self, user_text: &str, schema: &SchemaDescriptor) -> Result<String> {
        let prompt = self.build_prompt(user_text, schema);
        debug!("Translation prompt:\n{}", prompt);

        let response = self.llm.complete(&prompt).await?;
        match extract_sql(&response) {
            Some(statement) => {
                info!("Model produced SQL: {}", statement);
                Ok(statement)
            }
            None => {
                warn!("Model response contained no ```sql block");
                Err(GatewayError::Translation(
                    "model response contained no ```sql block".to_string(),
                ))
            }
        }
    }
}

/// First ```sql fenced block, trimmed and without a trailing semicolon.
pub fn extract_sql(response: &str) -> Option<String> {
    let captured = SQL_BLOCK.captures(response)?.get(1)?.as_str();
    let statement = captured.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        None
    } else {
        Some(statement.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_first_sql_block() {
        let response = "Here you go:\n```sql\nSELECT * FROM `p.d.projects`;\n```\nand also\n```sql\nDROP TABLE x\n```";
        assert_eq!(
            extract_sql(response).as_deref(),
            Some("SELECT * FROM `p.d.projects`")
        );
    }

    #[test]
    fn test_tag_is_case_insensitive() {
        let response = "```SQL\nUPDATE t SET a = 1\n```";
        assert_eq!(extract_sql(response).as_deref(), Some("UPDATE t SET a = 1"));
    }

    #[test]
    fn test_single_line_block() {
        assert_eq!(extract_sql("```sql SELECT 1```").as_deref(), Some("SELECT 1"));
    }

    #[test]
    fn test_untagged_block_is_rejected() {
        assert!(extract_sql("```\nSELECT 1\n```").is_none());
        assert!(extract_sql("```sqlite\nSELECT 1\n```").is_none());
        assert!(extract_sql("SELECT 1").is_none());
    }

    #[test]
    fn test_empty_block_is_rejected() {
        assert!(extract_sql("```sql\n  ;\n```").is_none());
    }

    struct Canned(&'static str);

    #[async_trait::async_trait]
    impl LanguageModel for Canned {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_translate_without_block_is_translation_error() {
        let mut schema = SchemaDescriptor::new("business_data");
        schema.add_column("clients", "client_name", "STRING");

        let translator = SqlTranslator::new(Arc::new(Canned("DELETE FROM clients")), "acme".to_string());
        let err = translator.translate("tidy clients", &schema).await.unwrap_err();
        assert!(matches!(err, GatewayError::Translation(_)));

        let translator = SqlTranslator::new(Arc::new(Canned("```sql\nSELECT 1\n```")), "acme".to_string());
        assert_eq!(translator.translate("one", &schema).await.unwrap(), "SELECT 1");
    }

    #[test]
    fn test_prompt_contains_grounding() {
        struct Unused;
        #[async_trait::async_trait]
        impl LanguageModel for Unused {
            async fn complete(&self, _prompt: &str) -> Result<String> {
                unreachable!()
            }
        }

        let translator = SqlTranslator::new(Arc::new(Unused), "acme-prod".to_string());
        let mut schema = SchemaDescriptor::new("business_data");
        schema.add_column("invoices", "amount", "NUMERIC");

        let prompt = translator.build_prompt("total invoiced this year", &schema);
        assert!(prompt.contains("Project: acme-prod"));
        assert!(prompt.contains("Dataset: business_data"));
        assert!(prompt.contains("- invoices: amount (NUMERIC)"));
        assert!(prompt.contains("`acme-prod.business_data.<table>`"));
        assert!(prompt.contains("requires separate confirmation"));
        assert!(prompt.contains("total invoiced this year"));
    }
}
