use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use anyhow::Context as _;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, Json};
use axum::routing::{delete, get, patch, post};
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::Stream;
use tower_http::trace::TraceLayer;

use crate::api::{ApiError, Backend, CrawlerPatch, HttpBackend, NewCrawler};
use crate::app::filter_table::{FilterTable, RuleRow};
use crate::app::wizard;
use crate::cli::ServeArgs;
use crate::config::{BackendConfig, ConsoleConfig};
use crate::events::{StatusWatcher, WatchPolicy, WatchUpdate};
use crate::model::{CrawlJob, Crawler, InheritableFields, SourceItem};

#[derive(Clone)]
struct AppState {
    backend: Arc<dyn Backend>,
    backend_config: BackendConfig,
    // One editor session per filter set, like the single-page view it backs.
    tables: Arc<Mutex<HashMap<i64, FilterTable>>>,
}

pub async fn run(args: ServeArgs, config: ConsoleConfig) -> anyhow::Result<()> {
    let backend: Arc<dyn Backend> =
        Arc::new(HttpBackend::new(&config.backend).context("build backend client")?);
    let state = AppState {
        backend,
        backend_config: config.backend.clone(),
        tables: Arc::new(Mutex::new(HashMap::new())),
    };

    let addr = args.addr.unwrap_or(config.serve.addr);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {addr}: {err}"))?;
    tracing::info!(%addr, backend = %config.backend.base_url, "console listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/api/crawlers", get(list_crawlers).post(create_crawler))
        .route(
            "/api/crawlers/:id",
            get(crawler_detail)
                .patch(update_crawler)
                .delete(delete_crawler),
        )
        .route("/api/crawlers/:id/start_crawl", post(start_crawl))
        .route(
            "/api/crawlers/:id/start_content_crawl",
            post(start_content_crawl),
        )
        .route("/api/crawlers/:id/inherited_fields", post(save_inherited_fields))
        .route("/api/crawlers/:id/live", get(live_stream))
        .route("/api/crawl_jobs/:id/cancel", post(cancel_crawl_job))
        .route("/api/crawl_jobs/:id", delete(delete_crawl_job))
        .route("/api/source_items", get(list_source_items))
        .route("/api/source_items/:guid", get(source_item_detail))
        .route("/api/source_items/:guid/fields", get(source_item_fields))
        .route("/api/filter_view/:id", get(filter_view))
        .route("/api/filter_view/:id/rules", post(add_rule))
        .route("/api/filter_view/:id/rules/:rule_id", patch(edit_rule).delete(remove_rule))
        .route(
            "/api/filter_view/:id/rules/:rule_id/toggle_include",
            post(toggle_include),
        )
        .route("/api/filter_view/:id/rules/:rule_id/move", post(move_rule))
        .route("/api/filter_view/:id/select", post(select_rule))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

type HandlerError = (StatusCode, String);

/// REST failures surface as 502 towards the page; the page logs them and
/// keeps its current (possibly stale) state.
fn bad_gateway(err: ApiError) -> HandlerError {
    tracing::error!(?err, "backend call failed");
    (StatusCode::BAD_GATEWAY, format!("backend call failed: {err}"))
}

async fn index() -> Html<&'static str> {
    Html(CONSOLE_PAGE)
}

async fn list_crawlers(State(state): State<AppState>) -> Result<Json<Vec<Crawler>>, HandlerError> {
    let crawlers = state.backend.list_crawlers().await.map_err(bad_gateway)?;
    Ok(Json(crawlers))
}

#[derive(Debug, Deserialize)]
struct CreateCrawlerBody {
    name: String,
    source_item: String,
    #[serde(default)]
    start_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreatedCrawler {
    crawler: Crawler,
    /// Wizard route the page navigates to next.
    next: String,
}

async fn create_crawler(
    State(state): State<AppState>,
    Json(body): Json<CreateCrawlerBody>,
) -> Result<Json<CreatedCrawler>, HandlerError> {
    let start_url = match body.start_url.filter(|url| !url.trim().is_empty()) {
        Some(url) => url,
        None => {
            // Fall back to the source record's own URL.
            let source = state
                .backend
                .get_source_item(&body.source_item)
                .await
                .map_err(bad_gateway)?;
            source.default_start_url().ok_or((
                StatusCode::BAD_REQUEST,
                "source item has no default start url; provide start_url".to_string(),
            ))?
        }
    };

    let crawler = state
        .backend
        .create_crawler(&NewCrawler {
            name: body.name,
            source_item: body.source_item,
            start_url,
        })
        .await
        .map_err(bad_gateway)?;

    let next = wizard::next_route_after_create(crawler.id);
    Ok(Json(CreatedCrawler { crawler, next }))
}

async fn crawler_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Crawler>, HandlerError> {
    let crawlers = state.backend.list_crawlers().await.map_err(bad_gateway)?;
    let crawler = crawlers
        .into_iter()
        .find(|c| c.id == id)
        .ok_or((StatusCode::NOT_FOUND, format!("no crawler {id}")))?;
    Ok(Json(crawler))
}

async fn update_crawler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<CrawlerPatch>,
) -> Result<Json<Crawler>, HandlerError> {
    let crawler = state
        .backend
        .update_crawler(id, &patch)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(crawler))
}

async fn delete_crawler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, HandlerError> {
    state.backend.delete_crawler(id).await.map_err(bad_gateway)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn start_crawl(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CrawlJob>, HandlerError> {
    let job = state.backend.start_crawl(id).await.map_err(bad_gateway)?;
    Ok(Json(job))
}

async fn start_content_crawl(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<CrawlJob>, HandlerError> {
    let job = state
        .backend
        .start_content_crawl(id)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(job))
}

async fn save_inherited_fields(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(fields): Json<Vec<String>>,
) -> Result<Json<Crawler>, HandlerError> {
    let crawler = state
        .backend
        .update_crawler(
            id,
            &CrawlerPatch {
                inherited_fields: Some(fields),
                ..CrawlerPatch::default()
            },
        )
        .await
        .map_err(bad_gateway)?;
    Ok(Json(crawler))
}

async fn cancel_crawl_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, HandlerError> {
    state.backend.cancel_crawl_job(id).await.map_err(bad_gateway)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn delete_crawl_job(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, HandlerError> {
    state.backend.delete_crawl_job(id).await.map_err(bad_gateway)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_source_items(
    State(state): State<AppState>,
) -> Result<Json<Vec<SourceItem>>, HandlerError> {
    let items = state.backend.list_source_items().await.map_err(bad_gateway)?;
    Ok(Json(items))
}

async fn source_item_detail(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> Result<Json<SourceItem>, HandlerError> {
    let item = state
        .backend
        .get_source_item(&guid)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(item))
}

async fn source_item_fields(
    State(state): State<AppState>,
    Path(guid): Path<String>,
) -> Result<Json<InheritableFields>, HandlerError> {
    let catalog = state
        .backend
        .inheritable_fields(&guid)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(catalog))
}

#[derive(Debug, Serialize)]
struct FilterViewSnapshot {
    filter_set: i64,
    name: String,
    rows: Vec<RuleRow>,
    selected: Option<i64>,
    detail_urls: Vec<String>,
    remaining_urls: u64,
}

fn snapshot(table: &FilterTable) -> FilterViewSnapshot {
    FilterViewSnapshot {
        filter_set: table.filter_set_id(),
        name: table.name().to_string(),
        rows: table.rows(),
        selected: table.selected(),
        detail_urls: table.detail_urls().to_vec(),
        remaining_urls: table.remaining_urls(),
    }
}

#[derive(Debug, Deserialize)]
struct FilterViewQuery {
    crawl_job: i64,
}

async fn filter_view(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<FilterViewQuery>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    if !tables.contains_key(&id) {
        let table = FilterTable::open(Arc::clone(&state.backend), id, query.crawl_job)
            .await
            .map_err(bad_gateway)?;
        tables.insert(id, table);
    }
    let table = tables.get(&id).expect("table just ensured");
    Ok(Json(snapshot(table)))
}

fn open_table(
    tables: &mut HashMap<i64, FilterTable>,
    id: i64,
) -> Result<&mut FilterTable, HandlerError> {
    tables.get_mut(&id).ok_or((
        StatusCode::NOT_FOUND,
        format!("filter view {id} is not open"),
    ))
}

#[derive(Debug, Deserialize)]
struct RulePatternBody {
    rule: String,
}

async fn add_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<RulePatternBody>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    let table = open_table(&mut tables, id)?;
    table.add_rule(&body.rule).await.map_err(bad_gateway)?;
    Ok(Json(snapshot(table)))
}

async fn edit_rule(
    State(state): State<AppState>,
    Path((id, rule_id)): Path<(i64, i64)>,
    Json(body): Json<RulePatternBody>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    let table = open_table(&mut tables, id)?;
    table
        .commit_edit(rule_id, &body.rule)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(snapshot(table)))
}

async fn toggle_include(
    State(state): State<AppState>,
    Path((id, rule_id)): Path<(i64, i64)>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    let table = open_table(&mut tables, id)?;
    table.toggle_include(rule_id).await.map_err(bad_gateway)?;
    Ok(Json(snapshot(table)))
}

#[derive(Debug, Deserialize)]
struct MoveRuleBody {
    position: i64,
}

async fn move_rule(
    State(state): State<AppState>,
    Path((id, rule_id)): Path<(i64, i64)>,
    Json(body): Json<MoveRuleBody>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    let table = open_table(&mut tables, id)?;
    table
        .move_rule(rule_id, body.position)
        .await
        .map_err(bad_gateway)?;
    Ok(Json(snapshot(table)))
}

async fn remove_rule(
    State(state): State<AppState>,
    Path((id, rule_id)): Path<(i64, i64)>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    let table = open_table(&mut tables, id)?;
    table.delete_rule(rule_id).await.map_err(bad_gateway)?;
    Ok(Json(snapshot(table)))
}

#[derive(Debug, Deserialize)]
struct SelectBody {
    #[serde(default)]
    rule_id: Option<i64>,
}

async fn select_rule(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SelectBody>,
) -> Result<Json<FilterViewSnapshot>, HandlerError> {
    let mut tables = state.tables.lock().await;
    let table = open_table(&mut tables, id)?;
    table.select(body.rule_id).await.map_err(bad_gateway)?;
    Ok(Json(snapshot(table)))
}

/// Relays a crawler's status stream to the page. Dropping the response body
/// cancels the upstream watcher.
struct LiveStream {
    rx: mpsc::Receiver<WatchUpdate>,
    _watcher: StatusWatcher,
}

impl Stream for LiveStream {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(update)) => Poll::Ready(Some(Event::default().json_data(&update))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

async fn live_stream(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Sse<LiveStream>, HandlerError> {
    let (watcher, rx) = StatusWatcher::spawn(&state.backend_config, id, WatchPolicy::default())
        .map_err(|err| {
            tracing::error!(?err, crawler_id = id, "spawn status watcher failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "spawn status watcher failed".to_string(),
            )
        })?;

    let stream = LiveStream {
        rx,
        _watcher: watcher,
    };
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

static CONSOLE_PAGE: &str = r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8">
    <title>crawlboard</title>
  </head>
  <body>
    <h1>crawlboard</h1>
    <p id="status">loading…</p>
    <table border="1" cellpadding="4">
      <thead>
        <tr><th>id</th><th>name</th><th>state</th><th>start url</th><th>crawled</th></tr>
      </thead>
      <tbody id="crawlers"></tbody>
    </table>
    <script>
      const live = new Map();

      function watch(id, cell) {
        if (live.has(id)) return;
        const source = new EventSource(`/api/crawlers/${id}/live`);
        live.set(id, source);
        source.onmessage = (msg) => {
          const update = JSON.parse(msg.data);
          if (update.kind === "event" && update.event.type === "crawl_job_update") {
            cell.textContent = update.event.crawl_job.crawled_url_count;
          }
          if (update.kind === "state" && update.state === "gave_up") {
            cell.textContent += " (stream lost)";
            source.close();
          }
        };
        source.onerror = (err) => console.error("live stream", id, err);
      }

      async function refresh() {
        const status = document.getElementById("status");
        try {
          const resp = await fetch("/api/crawlers");
          if (!resp.ok) throw new Error(`${resp.status}`);
          const crawlers = await resp.json();
          const tbody = document.getElementById("crawlers");
          tbody.replaceChildren();
          for (const crawler of crawlers) {
            const row = document.createElement("tr");
            for (const value of [crawler.id, crawler.name, crawler.simple_state, crawler.start_url]) {
              const cell = document.createElement("td");
              cell.textContent = value;
              row.appendChild(cell);
            }
            const progress = document.createElement("td");
            progress.textContent = "–";
            row.appendChild(progress);
            tbody.appendChild(row);
            if (crawler.simple_state === "running") watch(crawler.id, progress);
          }
          status.textContent = `${crawlers.length} crawler(s)`;
        } catch (err) {
          console.error("refresh failed", err);
          status.textContent = "backend unreachable";
        }
      }

      refresh();
    </script>
  </body>
</html>
"#;
