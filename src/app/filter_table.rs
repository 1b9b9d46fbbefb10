use std::sync::Arc;

use serde::Serialize;

use crate::api::{ApiError, Backend, NewRule, RulePatch};
use crate::model::Rule;

/// Id of the synthetic trailing row summarizing URLs no rule matches.
pub const UNMATCHED_ROW_ID: i64 = -1;

/// One rendered table row. The synthetic unmatched row is neither editable
/// nor draggable and always comes last.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleRow {
    pub id: i64,
    pub rule: String,
    pub count: u64,
    pub cumulative_count: u64,
    pub include: bool,
    pub page_type: Option<String>,
    pub position: i64,
    pub editable: bool,
    pub draggable: bool,
}

/// Editor state for one filter set. Match counts and rule positions are
/// server-owned: every mutation except delete is followed by a refetch of
/// the filter set and the unmatched summary instead of a local update.
pub struct FilterTable {
    backend: Arc<dyn Backend>,
    filter_set_id: i64,
    crawl_job_id: i64,
    name: String,
    rules: Vec<Rule>,
    remaining_urls: u64,
    unmatched_urls: Vec<String>,
    selected: Option<i64>,
    detail_urls: Vec<String>,
}

impl FilterTable {
    pub async fn open(
        backend: Arc<dyn Backend>,
        filter_set_id: i64,
        crawl_job_id: i64,
    ) -> Result<Self, ApiError> {
        let mut table = Self {
            backend,
            filter_set_id,
            crawl_job_id,
            name: String::new(),
            rules: Vec::new(),
            remaining_urls: 0,
            unmatched_urls: Vec::new(),
            selected: None,
            detail_urls: Vec::new(),
        };
        table.refetch().await?;
        table.detail_urls = table.unmatched_urls.clone();
        Ok(table)
    }

    pub fn filter_set_id(&self) -> i64 {
        self.filter_set_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn selected(&self) -> Option<i64> {
        self.selected
    }

    pub fn detail_urls(&self) -> &[String] {
        &self.detail_urls
    }

    pub fn remaining_urls(&self) -> u64 {
        self.remaining_urls
    }

    /// Rows in render order: real rules by ascending position, then the
    /// synthetic unmatched row.
    pub fn rows(&self) -> Vec<RuleRow> {
        let mut rows: Vec<RuleRow> = self
            .rules
            .iter()
            .map(|rule| RuleRow {
                id: rule.id,
                rule: rule.rule.clone(),
                count: rule.count,
                cumulative_count: rule.cumulative_count,
                include: rule.include,
                page_type: rule.page_type.clone(),
                position: rule.position,
                editable: true,
                draggable: true,
            })
            .collect();

        let position = rows.last().map(|row| row.position + 1).unwrap_or(0);
        rows.push(RuleRow {
            id: UNMATCHED_ROW_ID,
            rule: String::new(),
            count: self.remaining_urls,
            cumulative_count: self.remaining_urls,
            include: false,
            page_type: None,
            position,
            editable: false,
            draggable: false,
        });
        rows
    }

    /// Commit an edited pattern. A changed pattern can shift the match
    /// counts of every rule, so the whole set is refetched.
    pub async fn commit_edit(&mut self, rule_id: i64, pattern: &str) -> Result<(), ApiError> {
        if rule_id == UNMATCHED_ROW_ID {
            tracing::warn!(rule_id, "ignoring edit of the synthetic unmatched row");
            return Ok(());
        }

        self.backend
            .update_rule(
                rule_id,
                &RulePatch {
                    rule: Some(pattern.to_string()),
                    ..RulePatch::default()
                },
            )
            .await?;
        self.refetch().await
    }

    pub async fn toggle_include(&mut self, rule_id: i64) -> Result<(), ApiError> {
        if rule_id == UNMATCHED_ROW_ID {
            tracing::warn!(rule_id, "ignoring include toggle on the synthetic unmatched row");
            return Ok(());
        }
        let Some(rule) = self.rules.iter().find(|r| r.id == rule_id) else {
            tracing::warn!(rule_id, "include toggle on unknown rule");
            return Ok(());
        };

        self.backend
            .update_rule(
                rule_id,
                &RulePatch {
                    include: Some(!rule.include),
                    ..RulePatch::default()
                },
            )
            .await?;
        self.refetch().await
    }

    /// Create a rule placed after the row with the maximum existing id.
    pub async fn add_rule(&mut self, pattern: &str) -> Result<(), ApiError> {
        let position = self
            .rules
            .iter()
            .max_by_key(|rule| rule.id)
            .map(|rule| rule.position + 1);

        self.backend
            .create_rule(&NewRule {
                filter_set: self.filter_set_id,
                rule: pattern.to_string(),
                include: true,
                position,
            })
            .await?;
        self.refetch().await
    }

    /// Request the server to move a rule to the hovered position. The local
    /// order is not touched; the refetched list carries the server's
    /// renumbering.
    pub async fn move_rule(&mut self, rule_id: i64, position: i64) -> Result<(), ApiError> {
        if rule_id == UNMATCHED_ROW_ID {
            tracing::warn!(rule_id, "ignoring drag of the synthetic unmatched row");
            return Ok(());
        }

        self.backend
            .update_rule(
                rule_id,
                &RulePatch {
                    position: Some(position),
                    ..RulePatch::default()
                },
            )
            .await?;
        self.refetch().await
    }

    /// Delete a rule; the row disappears locally without a refetch.
    pub async fn delete_rule(&mut self, rule_id: i64) -> Result<(), ApiError> {
        if rule_id == UNMATCHED_ROW_ID {
            tracing::warn!(rule_id, "ignoring delete of the synthetic unmatched row");
            return Ok(());
        }

        self.backend.delete_rule(rule_id).await?;
        self.rules.retain(|rule| rule.id != rule_id);
        if self.selected == Some(rule_id) {
            self.selected = None;
            self.detail_urls = self.unmatched_urls.clone();
        }
        Ok(())
    }

    /// Select a rule (detail shows its newly matched URLs) or nothing
    /// (detail shows URLs unmatched by any rule). The synthetic row selects
    /// the latter.
    pub async fn select(&mut self, rule_id: Option<i64>) -> Result<(), ApiError> {
        match rule_id.filter(|id| *id != UNMATCHED_ROW_ID) {
            Some(id) => {
                let matches = self.backend.rule_matches(id, self.crawl_job_id).await?;
                self.selected = Some(id);
                self.detail_urls = matches.new_matches;
            }
            None => {
                let unmatched = self
                    .backend
                    .unmatched(self.filter_set_id, self.crawl_job_id)
                    .await?;
                self.selected = None;
                self.unmatched_urls = unmatched.unmatched_urls.clone();
                self.detail_urls = unmatched.unmatched_urls;
            }
        }
        Ok(())
    }

    async fn refetch(&mut self) -> Result<(), ApiError> {
        let filter_set = self.backend.get_filter_set(self.filter_set_id).await?;
        let unmatched = self
            .backend
            .unmatched(self.filter_set_id, self.crawl_job_id)
            .await?;

        self.name = filter_set.name;
        self.rules = filter_set.rules;
        self.rules.sort_by_key(|rule| (rule.position, rule.id));
        self.remaining_urls = filter_set.remaining_urls;
        self.unmatched_urls = unmatched.unmatched_urls;
        if self.selected.is_none() {
            self.detail_urls = self.unmatched_urls.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::api::testing::FakeBackend;
    use crate::model::{FilterSet, RuleMatches};

    use super::*;

    fn rule(id: i64, pattern: &str, include: bool, position: i64) -> Rule {
        Rule {
            id,
            rule: pattern.to_string(),
            count: 10,
            cumulative_count: 10,
            include,
            page_type: None,
            position,
        }
    }

    fn backend_with_rules(rules: Vec<Rule>) -> Arc<FakeBackend> {
        Arc::new(FakeBackend::with_filter_set(
            FilterSet {
                id: 5,
                crawl_job: 9,
                name: "content filter".to_string(),
                rules,
                remaining_urls: 3,
            },
            vec![
                "https://example.org/a".to_string(),
                "https://example.org/b".to_string(),
                "https://example.org/c".to_string(),
            ],
        ))
    }

    async fn open_table(backend: Arc<FakeBackend>) -> FilterTable {
        FilterTable::open(backend, 5, 9).await.expect("open table")
    }

    #[tokio::test]
    async fn unmatched_row_is_synthetic_and_last() {
        let backend = backend_with_rules(vec![
            rule(2, "/docs/*", true, 0),
            rule(1, "/blog/*", false, 1),
        ]);
        let table = open_table(backend).await;

        let rows = table.rows();
        assert_eq!(rows.len(), 3);
        let last = rows.last().expect("unmatched row");
        assert_eq!(last.id, UNMATCHED_ROW_ID);
        assert_eq!(last.cumulative_count, table.remaining_urls());
        assert!(!last.editable);
        assert!(!last.draggable);
        assert!(rows[..2].iter().all(|row| row.editable && row.draggable));
        // Real rows keep server order.
        assert_eq!(rows[0].id, 2);
        assert_eq!(rows[1].id, 1);
    }

    #[tokio::test]
    async fn commit_edit_refetches_filter_set_and_unmatched_once() {
        let backend = backend_with_rules(vec![rule(1, "/docs/*", true, 0)]);
        let mut table = open_table(Arc::clone(&backend)).await;

        backend.reset_counters();
        table.commit_edit(1, "/docs/guide/*").await.expect("edit");

        let state = backend.state.lock().expect("state");
        assert_eq!(state.filter_set_gets, 1);
        assert_eq!(state.unmatched_gets, 1);
        assert_eq!(
            state.rule_patches,
            vec![(
                1,
                RulePatch {
                    rule: Some("/docs/guide/*".to_string()),
                    ..RulePatch::default()
                }
            )]
        );
    }

    #[tokio::test]
    async fn synthetic_row_is_excluded_from_edit_and_drag() {
        let backend = backend_with_rules(vec![rule(1, "/docs/*", true, 0)]);
        let mut table = open_table(Arc::clone(&backend)).await;

        backend.reset_counters();
        table.commit_edit(UNMATCHED_ROW_ID, "x").await.expect("edit");
        table.move_rule(UNMATCHED_ROW_ID, 0).await.expect("move");
        table.delete_rule(UNMATCHED_ROW_ID).await.expect("delete");

        let state = backend.state.lock().expect("state");
        assert!(state.rule_patches.is_empty());
        assert!(state.deleted_rules.is_empty());
        assert_eq!(state.filter_set_gets, 0);
        assert_eq!(state.unmatched_gets, 0);
    }

    #[tokio::test]
    async fn toggle_include_flips_server_value() {
        let backend = backend_with_rules(vec![rule(1, "/docs/*", true, 0)]);
        let mut table = open_table(Arc::clone(&backend)).await;

        table.toggle_include(1).await.expect("toggle");

        let state = backend.state.lock().expect("state");
        assert_eq!(
            state.rule_patches,
            vec![(
                1,
                RulePatch {
                    include: Some(false),
                    ..RulePatch::default()
                }
            )]
        );
        drop(state);
        assert!(!table.rows()[0].include);
    }

    #[tokio::test]
    async fn add_rule_goes_after_the_max_id_row() {
        // Max id (7) sits first by position; insertion goes after it, not
        // after the visually last row.
        let backend = backend_with_rules(vec![
            rule(7, "/docs/*", true, 0),
            rule(3, "/blog/*", true, 1),
        ]);
        let mut table = open_table(Arc::clone(&backend)).await;

        table.add_rule("/news/*").await.expect("add");

        let state = backend.state.lock().expect("state");
        assert_eq!(state.created_rules.len(), 1);
        assert_eq!(state.created_rules[0].position, Some(1));
        assert_eq!(state.created_rules[0].filter_set, 5);
        assert!(state.created_rules[0].include);
    }

    #[tokio::test]
    async fn move_sends_target_position_and_adopts_server_order() {
        let backend = backend_with_rules(vec![
            rule(1, "/a/*", true, 0),
            rule(2, "/b/*", true, 1),
            rule(3, "/c/*", true, 2),
        ]);
        let mut table = open_table(Arc::clone(&backend)).await;

        table.move_rule(3, 0).await.expect("move");

        let state = backend.state.lock().expect("state");
        assert_eq!(
            state.rule_patches,
            vec![(
                3,
                RulePatch {
                    position: Some(0),
                    ..RulePatch::default()
                }
            )]
        );
        drop(state);

        let ids: Vec<i64> = table.rows().iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![3, 1, 2, UNMATCHED_ROW_ID]);
    }

    #[tokio::test]
    async fn delete_removes_locally_without_refetch() {
        let backend = backend_with_rules(vec![
            rule(1, "/a/*", true, 0),
            rule(2, "/b/*", true, 1),
        ]);
        let mut table = open_table(Arc::clone(&backend)).await;

        backend.reset_counters();
        table.delete_rule(1).await.expect("delete");

        let state = backend.state.lock().expect("state");
        assert_eq!(state.deleted_rules, vec![1]);
        assert_eq!(state.filter_set_gets, 0);
        assert_eq!(state.unmatched_gets, 0);
        drop(state);

        let ids: Vec<i64> = table.rows().iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![2, UNMATCHED_ROW_ID]);
    }

    #[tokio::test]
    async fn selection_switches_between_matches_and_unmatched() {
        let backend = backend_with_rules(vec![rule(1, "/docs/*", true, 0)]);
        {
            let mut state = backend.state.lock().expect("state");
            state.matches_by_rule = HashMap::from([(
                1,
                RuleMatches {
                    new_matches: vec!["https://example.org/docs/intro".to_string()],
                    other_matches: vec!["https://example.org/docs/old".to_string()],
                },
            )]);
        }
        let mut table = open_table(Arc::clone(&backend)).await;

        table.select(Some(1)).await.expect("select rule");
        assert_eq!(table.selected(), Some(1));
        assert_eq!(table.detail_urls(), ["https://example.org/docs/intro"]);

        table.select(None).await.expect("deselect");
        assert_eq!(table.selected(), None);
        assert_eq!(table.detail_urls().len(), 3);

        // Clicking the synthetic row behaves like deselecting.
        table.select(Some(UNMATCHED_ROW_ID)).await.expect("select synthetic");
        assert_eq!(table.selected(), None);
    }
}
