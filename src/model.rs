use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse crawler state shown on the dashboard. The backend's full `state`
/// enum is carried alongside as an opaque string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SimpleState {
    Draft,
    Running,
    Idle,
    Error,
}

impl SimpleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    pub id: i64,
    pub guid: String,
    pub title: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
}

impl SourceItem {
    /// Default crawl start URL from the source record's `ccm:wwwurl`
    /// property. The backend stores it either as a plain string or as a
    /// one-element array.
    pub fn default_start_url(&self) -> Option<String> {
        let value = self.data.get("properties")?.get("ccm:wwwurl")?;
        match value {
            serde_json::Value::String(s) => non_empty(s),
            serde_json::Value::Array(values) => {
                values.iter().find_map(|v| non_empty(v.as_str()?))
            }
            _ => None,
        }
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crawler {
    pub id: i64,
    pub name: String,
    pub state: String,
    pub simple_state: SimpleState,
    pub source_item: String,
    pub start_url: String,
    #[serde(default)]
    pub inherited_fields: Vec<String>,
    #[serde(default)]
    pub crawl_jobs: Vec<CrawlJob>,
}

impl Crawler {
    /// The job whose filter set the console edits: the most recent one.
    pub fn latest_crawl_job(&self) -> Option<&CrawlJob> {
        self.crawl_jobs.iter().max_by_key(|job| job.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlJob {
    pub id: i64,
    pub start_url: String,
    pub follow_links: bool,
    pub state: String,
    pub crawled_url_count: u64,
    pub crawler: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSet {
    pub id: i64,
    pub crawl_job: i64,
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
    pub remaining_urls: u64,
}

/// A single URL-pattern filter. `position` is the server-assigned ordering
/// key; the console never renumbers positions itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub id: i64,
    pub rule: String,
    pub count: u64,
    pub cumulative_count: u64,
    pub include: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_type: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmatchedSummary {
    #[serde(default)]
    pub unmatched_urls: Vec<String>,
    pub total_count: u64,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMatches {
    #[serde(default)]
    pub new_matches: Vec<String>,
    #[serde(default)]
    pub other_matches: Vec<String>,
}

/// One inheritable metadata field of a source item. The value shape is a
/// tagged union; adding a backend variant without handling it here is a
/// compile error in `is_missing` and friends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldInfo {
    pub id: String,
    pub caption: String,
    #[serde(default)]
    pub inheritable: bool,
    #[serde(default)]
    pub recommended: bool,
    #[serde(flatten)]
    pub value: FieldValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldValue {
    Text {
        #[serde(default)]
        value: Option<String>,
    },
    Date {
        #[serde(default)]
        value: Option<String>,
    },
    Singleoption {
        #[serde(default)]
        value: Option<String>,
    },
    Multioption {
        #[serde(default)]
        values: Vec<String>,
    },
    Multivalue {
        #[serde(default)]
        values: Vec<String>,
    },
    License {
        #[serde(default)]
        url: Option<String>,
    },
    Range {
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
    },
}

impl FieldInfo {
    /// A missing field has nothing to inherit. What counts as missing is
    /// defined per variant.
    pub fn is_missing(&self) -> bool {
        match &self.value {
            FieldValue::Text { value }
            | FieldValue::Date { value }
            | FieldValue::Singleoption { value } => {
                value.as_deref().is_none_or(|v| v.trim().is_empty())
            }
            FieldValue::Multioption { values } | FieldValue::Multivalue { values } => {
                values.is_empty()
            }
            FieldValue::License { url } => url.as_deref().is_none_or(|v| v.trim().is_empty()),
            FieldValue::Range { from, to } => from.is_none() && to.is_none(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: String,
    pub display: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub fields: Vec<String>,
}

impl GroupInfo {
    /// The `general` group spans the full layout width; all others half.
    pub fn spans_full_width(&self) -> bool {
        self.id == "general"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InheritableFields {
    #[serde(default)]
    pub fields: Vec<FieldInfo>,
    #[serde(default)]
    pub groups: Vec<GroupInfo>,
}

/// One message on a crawler's status stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    CrawlJobUpdate {
        crawler_id: i64,
        crawl_job: CrawlJobProgress,
        #[serde(default)]
        items_processed: u64,
        #[serde(default)]
        current_url: Option<String>,
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlJobProgress {
    pub id: i64,
    pub state: String,
    pub crawled_url_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_field(id: &str, recommended: bool, value: Option<&str>) -> FieldInfo {
        FieldInfo {
            id: id.to_string(),
            caption: id.to_string(),
            inheritable: true,
            recommended,
            value: FieldValue::Text {
                value: value.map(str::to_string),
            },
        }
    }

    #[test]
    fn text_field_missing_on_absent_or_empty_value() {
        assert!(text_field("title", false, None).is_missing());
        assert!(text_field("title", false, Some("")).is_missing());
        assert!(!text_field("title", false, Some("A title")).is_missing());
    }

    #[test]
    fn multi_value_field_missing_iff_values_empty() {
        let mut field = FieldInfo {
            id: "keywords".to_string(),
            caption: "Keywords".to_string(),
            inheritable: true,
            recommended: true,
            value: FieldValue::Multivalue { values: Vec::new() },
        };
        assert!(field.is_missing());

        field.value = FieldValue::Multivalue {
            values: vec!["math".to_string()],
        };
        assert!(!field.is_missing());
    }

    #[test]
    fn range_field_missing_iff_both_bounds_absent() {
        let range = |from: Option<&str>, to: Option<&str>| FieldInfo {
            id: "age".to_string(),
            caption: "Age range".to_string(),
            inheritable: true,
            recommended: false,
            value: FieldValue::Range {
                from: from.map(str::to_string),
                to: to.map(str::to_string),
            },
        };
        assert!(range(None, None).is_missing());
        assert!(!range(Some("6"), None).is_missing());
        assert!(!range(None, Some("10")).is_missing());
    }

    #[test]
    fn field_info_round_trips_with_type_tag() {
        let json = serde_json::json!({
            "id": "license",
            "caption": "License",
            "inheritable": true,
            "recommended": true,
            "type": "license",
            "url": "https://creativecommons.org/licenses/by/4.0/",
        });
        let field: FieldInfo = serde_json::from_value(json).expect("deserialize field");
        assert!(matches!(field.value, FieldValue::License { .. }));
        assert!(!field.is_missing());

        let back = serde_json::to_value(&field).expect("serialize field");
        assert_eq!(back["type"], "license");
    }

    #[test]
    fn default_start_url_reads_string_or_array() {
        let as_string: SourceItem = serde_json::from_value(serde_json::json!({
            "id": 1,
            "guid": "abc",
            "title": "Source",
            "data": {"properties": {"ccm:wwwurl": "https://example.org/"}},
        }))
        .expect("deserialize source item");
        assert_eq!(
            as_string.default_start_url().as_deref(),
            Some("https://example.org/")
        );

        let as_array: SourceItem = serde_json::from_value(serde_json::json!({
            "id": 2,
            "guid": "def",
            "title": "Source",
            "data": {"properties": {"ccm:wwwurl": ["https://example.org/docs"]}},
        }))
        .expect("deserialize source item");
        assert_eq!(
            as_array.default_start_url().as_deref(),
            Some("https://example.org/docs")
        );

        let absent: SourceItem = serde_json::from_value(serde_json::json!({
            "id": 3,
            "guid": "ghi",
            "title": "Source",
            "data": {"properties": {}},
        }))
        .expect("deserialize source item");
        assert_eq!(absent.default_start_url(), None);
    }

    #[test]
    fn stream_event_parses_tagged_payload() {
        let json = r#"{
            "type": "crawl_job_update",
            "crawler_id": 4,
            "crawl_job": {"id": 9, "state": "running", "crawled_url_count": 120},
            "items_processed": 80,
            "current_url": "https://example.org/page",
            "timestamp": "2026-01-05T10:00:00Z"
        }"#;
        let event: StreamEvent = serde_json::from_str(json).expect("parse event");
        let StreamEvent::CrawlJobUpdate {
            crawler_id,
            crawl_job,
            ..
        } = event
        else {
            panic!("expected crawl_job_update");
        };
        assert_eq!(crawler_id, 4);
        assert_eq!(crawl_job.crawled_url_count, 120);
    }
}
