//! Prompt Classifier
//!
//! Decides whether a request is a confirmation, a known safe query that can
//! be answered from a fixed template, or something the language model has
//! to translate. Rules are evaluated in order and the first match wins, so
//! the order of [`default_rules`] is part of the behaviour.

use serde::{Deserialize, Serialize};

/// Where direct-query templates point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryScope {
    pub project_id: String,
    pub dataset: String,
}

impl QueryScope {
    pub fn new(project_id: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            dataset: dataset.into(),
        }
    }

    /// Fully qualified, backtick-quoted table reference.
    pub fn table(&self, name: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset, name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Classification {
    Confirm,
    DirectQuery { rule: String, sql: String },
    NeedsTranslation,
}

/// One entry of the rule table. `all_of` is a conjunction of keyword
/// groups; a group is satisfied when the lower-cased input contains any of
/// its keywords.
pub struct DirectQueryRule {
    pub name: &'static str,
    pub all_of: &'static [&'static [&'static str]],
    pub build: fn(&QueryScope) -> String,
}

impl DirectQueryRule {
    pub fn matches(&self, lowered: &str) -> bool {
        self.all_of
            .iter()
            .all(|group| group.iter().any(|keyword| lowered.contains(keyword)))
    }
}

const LIST: &[&str] = &["list"];
const COUNT: &[&str] = &["how many", "count", "number of"];
const RECENT: &[&str] = &["recent", "latest"];

pub fn default_rules() -> Vec<DirectQueryRule> {
    vec![
        DirectQueryRule {
            name: "list_projects",
            all_of: &[LIST, &["projects"]],
            build: |scope| {
                format!(
                    "SELECT project_id, project_name, client_name, status, start_date, end_date \
                     FROM {} ORDER BY start_date DESC LIMIT 50",
                    scope.table("projects")
                )
            },
        },
        DirectQueryRule {
            name: "count_projects",
            all_of: &[COUNT, &["projects"]],
            build: |scope| format!("SELECT COUNT(*) AS total_projects FROM {}", scope.table("projects")),
        },
        DirectQueryRule {
            name: "list_clients",
            all_of: &[LIST, &["clients"]],
            build: |scope| {
                format!(
                    "SELECT client_id, client_name, email, status FROM {} ORDER BY client_name LIMIT 50",
                    scope.table("clients")
                )
            },
        },
        DirectQueryRule {
            name: "count_clients",
            all_of: &[COUNT, &["clients"]],
            build: |scope| format!("SELECT COUNT(*) AS total_clients FROM {}", scope.table("clients")),
        },
        DirectQueryRule {
            name: "list_contracts",
            all_of: &[LIST, &["contracts"]],
            build: |scope| {
                format!(
                    "SELECT contract_number, client_name, status, total_amount, start_date, end_date \
                     FROM {} ORDER BY start_date DESC LIMIT 50",
                    scope.table("contracts")
                )
            },
        },
        DirectQueryRule {
            name: "count_contracts",
            all_of: &[COUNT, &["contracts"]],
            build: |scope| format!("SELECT COUNT(*) AS total_contracts FROM {}", scope.table("contracts")),
        },
        DirectQueryRule {
            name: "recent_transactions",
            all_of: &[RECENT, &["transactions"]],
            build: |scope| {
                format!(
                    "SELECT transaction_date, description, amount FROM {} \
                     ORDER BY transaction_date DESC LIMIT 10",
                    scope.table("transactions")
                )
            },
        },
    ]
}

pub struct PromptClassifier {
    confirmation_keyword: String,
    rules: Vec<DirectQueryRule>,
}

impl PromptClassifier {
    pub fn new(confirmation_keyword: impl Into<String>) -> Self {
        Self::with_rules(confirmation_keyword, default_rules())
    }

    pub fn with_rules(confirmation_keyword: impl Into<String>, rules: Vec<DirectQueryRule>) -> Self {
        Self {
            confirmation_keyword: confirmation_keyword.into(),
            rules,
        }
    }

    pub fn is_confirmation(&self, text: &str) -> bool {
        text.trim().eq_ignore_ascii_case(&self.confirmation_keyword)
    }

    pub fn classify(&self, text: &str, scope: &QueryScope) -> Classification {
        let text = text.trim();
        if self.is_confirmation(text) {
            return Classification::Confirm;
        }

        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(|rule| Classification::DirectQuery {
                rule: rule.name.to_string(),
                sql: (rule.build)(scope),
            })
            .unwrap_or(Classification::NeedsTranslation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> QueryScope {
        QueryScope::new("acme", "business_data")
    }

    fn rule_for(text: &str) -> Option<String> {
        match PromptClassifier::new("CONFIRM").classify(text, &scope()) {
            Classification::DirectQuery { rule, .. } => Some(rule),
            _ => None,
        }
    }

    #[test]
    fn test_confirm_is_whole_input_case_insensitive() {
        let classifier = PromptClassifier::new("CONFIRM");
        assert_eq!(classifier.classify("  confirm ", &scope()), Classification::Confirm);
        assert_eq!(classifier.classify("Confirm", &scope()), Classification::Confirm);
        assert_ne!(classifier.classify("confirm it", &scope()), Classification::Confirm);
    }

    #[test]
    fn test_rule_table_order() {
        let names: Vec<&str> = default_rules().iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "list_projects",
                "count_projects",
                "list_clients",
                "count_clients",
                "list_contracts",
                "count_contracts",
                "recent_transactions",
            ]
        );
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Satisfies both list_projects and count_projects.
        assert_eq!(rule_for("list the number of projects").as_deref(), Some("list_projects"));
        // Satisfies count_projects and count_clients.
        assert_eq!(
            rule_for("how many projects and how many clients").as_deref(),
            Some("count_projects")
        );
    }

    #[test]
    fn test_each_rule_reachable() {
        assert_eq!(rule_for("List all projects").as_deref(), Some("list_projects"));
        assert_eq!(rule_for("How many projects").as_deref(), Some("count_projects"));
        assert_eq!(rule_for("list clients").as_deref(), Some("list_clients"));
        assert_eq!(rule_for("count clients").as_deref(), Some("count_clients"));
        assert_eq!(rule_for("list contracts").as_deref(), Some("list_contracts"));
        assert_eq!(rule_for("number of contracts").as_deref(), Some("count_contracts"));
        assert_eq!(rule_for("show latest transactions").as_deref(), Some("recent_transactions"));
    }

    #[test]
    fn test_no_match_needs_translation() {
        let classifier = PromptClassifier::new("CONFIRM");
        assert_eq!(
            classifier.classify("which invoices are overdue?", &scope()),
            Classification::NeedsTranslation
        );
    }

    #[test]
    fn test_templates_are_qualified_and_deterministic() {
        let classifier = PromptClassifier::new("CONFIRM");
        let first = classifier.classify("how many projects", &scope());
        let second = classifier.classify("how many projects", &scope());
        assert_eq!(first, second);
        match first {
            Classification::DirectQuery { sql, .. } => {
                assert_eq!(
                    sql,
                    "SELECT COUNT(*) AS total_projects FROM `acme.business_data.projects`"
                );
            }
            other => panic!("expected direct query, got {:?}", other),
        }
    }
}
