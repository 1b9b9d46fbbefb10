use serde::{Deserialize, Serialize};

/// Where the user is in the crawler-creation flow. Derived from the route
/// path; views may also set it explicitly after navigation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    Dashboard,
    SelectSource,
    AddCrawler,
    MetadataInheritance,
    FilterCrawls,
    CrawlerDetails,
}

impl Step {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::SelectSource => "select-source",
            Self::AddCrawler => "add-crawler",
            Self::MetadataInheritance => "metadata-inheritance",
            Self::FilterCrawls => "filter-crawls",
            Self::CrawlerDetails => "crawler-details",
        }
    }

    /// Derive the step from a route path. Unknown paths fall back to the
    /// dashboard.
    pub fn from_path(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Self::Dashboard,
            ["sources"] => Self::SelectSource,
            ["crawlers", "new"] => Self::AddCrawler,
            ["crawlers", _id] => Self::CrawlerDetails,
            ["crawlers", _id, "metadata-inheritance"] => Self::MetadataInheritance,
            ["crawlers", _id, "filter-crawls"] => Self::FilterCrawls,
            _ => Self::Dashboard,
        }
    }
}

/// Route of a step for a known crawler. Steps before crawler creation have
/// fixed routes.
pub fn step_route(step: Step, crawler_id: Option<i64>) -> String {
    match (step, crawler_id) {
        (Step::Dashboard, _) => "/".to_string(),
        (Step::SelectSource, _) => "/sources".to_string(),
        (Step::AddCrawler, _) => "/crawlers/new".to_string(),
        (Step::MetadataInheritance, Some(id)) => format!("/crawlers/{id}/metadata-inheritance"),
        (Step::FilterCrawls, Some(id)) => format!("/crawlers/{id}/filter-crawls"),
        (Step::CrawlerDetails, Some(id)) => format!("/crawlers/{id}"),
        // Crawler-scoped steps without an id cannot be addressed.
        (_, None) => "/".to_string(),
    }
}

/// Where the console navigates right after a crawler is created.
pub fn next_route_after_create(crawler_id: i64) -> String {
    step_route(Step::MetadataInheritance, Some(crawler_id))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Crumb {
    pub label: String,
    pub route: String,
}

/// Breadcrumb trail for a step. The crawler name replaces the generic label
/// once it is known.
pub fn breadcrumbs(step: Step, crawler: Option<(i64, &str)>) -> Vec<Crumb> {
    let mut crumbs = vec![Crumb {
        label: "Dashboard".to_string(),
        route: step_route(Step::Dashboard, None),
    }];

    let crawler_id = crawler.map(|(id, _)| id);
    let crawler_label = |fallback: &str| {
        crawler
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| fallback.to_string())
    };

    match step {
        Step::Dashboard => {}
        Step::SelectSource => crumbs.push(Crumb {
            label: "Select source".to_string(),
            route: step_route(Step::SelectSource, None),
        }),
        Step::AddCrawler => crumbs.push(Crumb {
            label: "New crawler".to_string(),
            route: step_route(Step::AddCrawler, None),
        }),
        Step::CrawlerDetails => crumbs.push(Crumb {
            label: crawler_label("Crawler"),
            route: step_route(Step::CrawlerDetails, crawler_id),
        }),
        Step::MetadataInheritance | Step::FilterCrawls => {
            crumbs.push(Crumb {
                label: crawler_label("Crawler"),
                route: step_route(Step::CrawlerDetails, crawler_id),
            });
            let label = if step == Step::MetadataInheritance {
                "Metadata inheritance"
            } else {
                "Filter crawls"
            };
            crumbs.push(Crumb {
                label: label.to_string(),
                route: step_route(step, crawler_id),
            });
        }
    }
    crumbs
}
