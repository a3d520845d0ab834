//! Web server for the quakesearch dashboard.
//!
//! Provides a map-based search page using:
//! - Axum for HTTP server
//! - SSE (Server-Sent Events) for pushing session snapshots
//! - Leaflet for the map, plain DOM for the table and charts
//!
//! Every request goes through a [`SessionHandle`]; the handlers never touch
//! the coordinator directly.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        Html, IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};

use crate::client::{CatalogClient, REQUEST_TIMEOUT_SECS};
use crate::coordinator::{FormEdit, Snapshot};
use crate::errors::SessionClosed;
use crate::geo::LatLngBounds;
use crate::models::SearchResult;
use crate::query::{DateRules, SearchParameters, USGS_QUERY_URL};
use crate::session::{self, DEFAULT_SLOW_AFTER, Intent, SessionConfig, SessionHandle};
use crate::views::{
    self, HistogramBar, Marker, ScatterPoint, TablePage, TableQuery,
};

/// Marker scale used when the page does not ask for one.
const DEFAULT_MARKER_SCALE: u8 = 3;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub base_url: String,
    pub timeout: Duration,
    pub slow_after: Duration,
    pub rules: DateRules,
    /// Initial form values
    pub params: SearchParameters,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            base_url: USGS_QUERY_URL.to_string(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            slow_after: DEFAULT_SLOW_AFTER,
            rules: DateRules::default(),
            params: SearchParameters::default(),
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    session: SessionHandle,
}

impl AppState {
    #[must_use]
    pub fn new(session: SessionHandle) -> Self {
        Self { session }
    }
}

impl IntoResponse for SessionClosed {
    fn into_response(self) -> Response {
        (StatusCode::SERVICE_UNAVAILABLE, self.to_string()).into_response()
    }
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/api/state", get(state_handler))
        .route("/api/stream", get(sse_handler))
        .route("/api/params", post(params_handler))
        .route("/api/search", post(search_handler))
        .route("/api/selection/{id}", post(selection_handler))
        .route("/api/notice/dismiss", post(dismiss_handler))
        .route("/api/table", get(table_handler))
        .route("/api/histogram", get(histogram_handler))
        .route("/api/scatter", get(scatter_handler))
        .route("/api/markers", get(markers_handler))
        .route("/api/framing", get(framing_handler))
        .with_state(state)
}

/// Start the web server.
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let client = CatalogClient::new(config.timeout)?;
    let session_config = SessionConfig {
        base_url: config.base_url.clone(),
        slow_after: config.slow_after,
        rules: config.rules,
        ..Default::default()
    };
    let (session, task) = session::spawn(Arc::new(client), config.params.clone(), session_config);

    let app = create_router(AppState::new(session.clone()));

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("🌍 quakesearch UI starting at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    // Cancels a search that is still in flight
    let _ = session.shutdown().await;
    let _ = task.await;
    Ok(())
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Main page handler - serves the HTML UI.
async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Health check endpoint.
async fn health_handler() -> &'static str {
    "OK"
}

async fn state_handler(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.session.snapshot())
}

/// SSE stream of snapshots, interleaved with failure notices.
async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let snapshots = WatchStream::new(state.session.subscribe()).filter_map(|snapshot| {
        match Event::default().event("snapshot").json_data(&snapshot) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("failed to encode snapshot: {e}");
                None
            }
        }
    });
    let notices = BroadcastStream::new(state.session.notices()).filter_map(|result| {
        match result {
            Ok(text) => Some(Ok(Event::default().event("notice").data(text))),
            Err(_) => None,
        }
    });

    Sse::new(snapshots.merge(notices)).keep_alive(KeepAlive::default())
}

async fn params_handler(
    State(state): State<AppState>,
    Json(edit): Json<FormEdit>,
) -> Result<StatusCode, SessionClosed> {
    state.session.edit(edit).await?;
    Ok(StatusCode::ACCEPTED)
}

/// Submit the current form. A no-op while invalid or already searching.
async fn search_handler(State(state): State<AppState>) -> Result<StatusCode, SessionClosed> {
    state.session.submit().await?;
    Ok(StatusCode::ACCEPTED)
}

async fn selection_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, SessionClosed> {
    let known = state
        .session
        .snapshot()
        .result
        .is_some_and(|r| r.get(&id).is_some());
    if !known {
        return Ok(StatusCode::NOT_FOUND);
    }
    state.session.toggle_selection(id).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn dismiss_handler(State(state): State<AppState>) -> Result<StatusCode, SessionClosed> {
    state.session.send(Intent::DismissNotice).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn table_handler(
    State(state): State<AppState>,
    Query(query): Query<TableQuery>,
) -> Json<TablePage> {
    let snapshot = state.session.snapshot();
    let result = snapshot.result.unwrap_or_default();
    Json(views::table_page(&result, &snapshot.selection, &query))
}

async fn histogram_handler(State(state): State<AppState>) -> Json<Vec<HistogramBar>> {
    let result = current_result(&state);
    Json(views::histogram_bars(&result.events))
}

async fn scatter_handler(State(state): State<AppState>) -> Json<Vec<ScatterPoint>> {
    let result = current_result(&state);
    Json(views::scatter_points(&result.events))
}

#[derive(Debug, Deserialize)]
struct MarkerQuery {
    scale: Option<u8>,
}

async fn markers_handler(
    State(state): State<AppState>,
    Query(query): Query<MarkerQuery>,
) -> Json<Vec<Marker>> {
    let snapshot = state.session.snapshot();
    let result = snapshot.result.unwrap_or_default();
    let scale = query.scale.unwrap_or(DEFAULT_MARKER_SCALE);
    Json(views::markers(&result, &snapshot.selection, scale))
}

async fn framing_handler(State(state): State<AppState>) -> Json<Option<LatLngBounds>> {
    let snapshot = state.session.snapshot();
    Json(views::map_framing(snapshot.last_searched, snapshot.result.as_ref()))
}

fn current_result(state: &AppState) -> SearchResult {
    state.session.snapshot().result.unwrap_or_default()
}

// ============================================================================
// HTML Template (embedded for single-binary deployment)
// ============================================================================

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>quakesearch</title>

    <!-- Leaflet -->
    <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
    <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>

    <style>
        :root {
            --font: -apple-system, BlinkMacSystemFont, 'Inter', sans-serif;
            --bg: #0f0f12;
            --panel: #1c1c1f;
            --border: #27272a;
            --text: #fafafa;
            --muted: #a1a1aa;
            --accent: #6366f1;
            --danger: #ef4444;
            --radius: 10px;
        }
        * { box-sizing: border-box; }
        body { margin: 0; font-family: var(--font); background: var(--bg); color: var(--text); }
        header { padding: 12px 20px; border-bottom: 1px solid var(--border); display: flex; gap: 16px; align-items: center; }
        header h1 { font-size: 18px; margin: 0; }
        #status { color: var(--muted); font-size: 13px; }
        main { display: grid; grid-template-columns: 320px 1fr; gap: 16px; padding: 16px; }
        .panel { background: var(--panel); border: 1px solid var(--border); border-radius: var(--radius); padding: 14px; }
        label { display: block; font-size: 12px; color: var(--muted); margin-top: 10px; }
        input { width: 100%; padding: 6px 8px; background: var(--bg); color: var(--text); border: 1px solid var(--border); border-radius: 6px; }
        input.invalid { border-color: var(--danger); }
        button { margin-top: 14px; padding: 8px 14px; background: var(--accent); color: white; border: 0; border-radius: 6px; cursor: pointer; }
        button:disabled { opacity: 0.4; cursor: not-allowed; }
        #errors { color: var(--danger); font-size: 12px; margin-top: 8px; }
        #notice { display: none; background: var(--danger); padding: 10px 14px; border-radius: 6px; margin: 0 16px; }
        #map { height: 420px; border-radius: var(--radius); }
        table { width: 100%; border-collapse: collapse; font-size: 13px; }
        th, td { text-align: left; padding: 6px; border-bottom: 1px solid var(--border); }
        th { cursor: pointer; color: var(--muted); }
        tr.selected { background: rgba(99, 102, 241, 0.2); }
        .bars { display: flex; align-items: flex-end; gap: 4px; height: 120px; }
        .bar { flex: 1; background: var(--accent); position: relative; }
        .bar span { position: absolute; bottom: -18px; width: 100%; text-align: center; font-size: 11px; color: var(--muted); }
        .charts { display: grid; grid-template-columns: 1fr 1fr; gap: 16px; margin-top: 16px; }
        svg circle { fill: var(--accent); }
    </style>
</head>
<body>
    <header>
        <h1>🌍 quakesearch</h1>
        <div id="status">Idle</div>
    </header>
    <div id="notice"><span id="notice-text"></span> <button id="dismiss">Dismiss</button></div>
    <main>
        <section class="panel">
            <label>Latitude <input id="lat" type="number" step="0.01"></label>
            <label>Longitude <input id="lng" type="number" step="0.01"></label>
            <label>Start date <input id="start_date" type="text" placeholder="YYYY-MM-DD"></label>
            <label>End date <input id="end_date" type="text" placeholder="YYYY-MM-DD or today"></label>
            <label>Min magnitude <input id="min_magnitude" type="number" step="0.1" min="0" max="10"></label>
            <label>Max magnitude <input id="max_magnitude" type="number" step="0.1" min="0" max="10"></label>
            <label>Radius (km) <input id="radius_km" type="number" step="100" min="100" max="20000"></label>
            <label>Result limit <input id="result_limit" type="number" step="10" min="10" max="1000"></label>
            <label><input id="show_pin" type="checkbox" checked style="width:auto"> Show pin and radius</label>
            <button id="search">Search</button>
            <div id="errors"></div>
        </section>
        <section>
            <div id="map"></div>
            <div class="panel results" style="margin-top:16px">
                <div id="found"></div>
                <table>
                    <thead><tr><th>Place</th><th data-sort="magnitude">Magnitude</th><th data-sort="date">Date</th></tr></thead>
                    <tbody id="rows"></tbody>
                </table>
                <div>
                    <button id="prev">‹</button>
                    <span id="page"></span>
                    <button id="next">›</button>
                </div>
            </div>
            <div class="charts results">
                <div class="panel"><div>Magnitude vs. Count</div><div class="bars" id="histogram"></div></div>
                <div class="panel"><div>Magnitude over time</div><svg id="scatter" viewBox="0 0 400 140" width="100%"></svg></div>
            </div>
        </section>
    </main>

    <script>
        const map = L.map('map').setView([38.46, -144.56], 3);
        L.tileLayer('https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png', { attribution: '© OpenStreetMap' }).addTo(map);
        const layer = L.layerGroup().addTo(map);
        let centerMarker = null;
        let radiusCircle = null;
        let lastParams = null;
        let table = { sort: 'magnitude', desc: null, page: 0 };
        let lastResultKey = null;

        const fieldInputs = {
            location: ['lat', 'lng'],
            start_date: ['start_date'],
            end_date: ['end_date'],
            magnitude: ['min_magnitude', 'max_magnitude'],
            radius: ['radius_km'],
            result_limit: ['result_limit'],
        };

        async function edit(field, value) {
            await fetch('/api/params', {
                method: 'POST',
                headers: { 'Content-Type': 'application/json' },
                body: JSON.stringify({ field, value }),
            });
        }

        function editLocation() {
            const lat = parseFloat(document.getElementById('lat').value);
            const lng = parseFloat(document.getElementById('lng').value);
            edit('location', isNaN(lat) || isNaN(lng) ? null : { lat, lng });
        }

        document.getElementById('lat').onchange = editLocation;
        document.getElementById('lng').onchange = editLocation;
        for (const id of ['start_date', 'end_date']) {
            document.getElementById(id).onchange = e => edit(id, e.target.value || null);
        }
        for (const id of ['min_magnitude', 'max_magnitude', 'radius_km', 'result_limit']) {
            document.getElementById(id).onchange = e => edit(id, Number(e.target.value));
        }
        map.on('click', e => edit('location', { lat: e.latlng.lat, lng: e.latlng.lng }));
        document.getElementById('search').onclick = () => fetch('/api/search', { method: 'POST' });
        document.getElementById('dismiss').onclick = () => fetch('/api/notice/dismiss', { method: 'POST' });
        document.getElementById('prev').onclick = () => { table.page--; loadTable(); };
        document.getElementById('next').onclick = () => { table.page++; loadTable(); };
        document.querySelectorAll('th[data-sort]').forEach(th => th.onclick = () => {
            const sort = th.dataset.sort;
            table.desc = table.sort === sort && table.desc !== null ? !table.desc : null;
            table.sort = sort;
            table.page = 0;
            loadTable();
        });

        function setValue(id, value) {
            const el = document.getElementById(id);
            if (document.activeElement !== el) el.value = value ?? '';
        }

        function render(s) {
            const p = s.params;
            setValue('lat', p.location?.lat);
            setValue('lng', p.location?.lng);
            setValue('start_date', p.start);
            setValue('end_date', p.end);
            setValue('min_magnitude', p.min_magnitude);
            setValue('max_magnitude', p.max_magnitude);
            setValue('radius_km', p.radius_km);
            setValue('result_limit', p.result_limit);

            document.querySelectorAll('input').forEach(i => i.classList.remove('invalid'));
            for (const f of s.invalid_fields) {
                for (const id of fieldInputs[f] || []) document.getElementById(id).classList.add('invalid');
            }
            document.getElementById('errors').textContent = s.validation.map(v => v.kind.replaceAll('_', ' ')).join(', ');
            document.getElementById('search').disabled = !s.can_submit;

            const status = { idle: 'Idle', in_flight: 'Searching…', in_flight_slow: 'Gathering data...', succeeded: 'Done', failed: 'Failed' };
            document.getElementById('status').textContent = status[s.status] || s.status;

            const notice = document.getElementById('notice');
            notice.style.display = s.notice ? 'block' : 'none';
            document.getElementById('notice-text').textContent = s.notice || '';

            lastParams = p;
            drawPin();

            // Table and charts only make sense for more than one event
            const many = (s.result?.events.length || 0) > 1;
            document.querySelectorAll('.results').forEach(el => el.style.display = many ? '' : 'none');

            const key = JSON.stringify([s.result?.events.map(e => e.id), s.selection]);
            if (key !== lastResultKey) {
                const fresh = lastResultKey === null || JSON.parse(lastResultKey)[0]?.join() !== (s.result?.events.map(e => e.id) || []).join();
                lastResultKey = key;
                refreshResults(fresh);
            }
        }

        function drawPin() {
            if (centerMarker) map.removeLayer(centerMarker);
            if (radiusCircle) map.removeLayer(radiusCircle);
            centerMarker = radiusCircle = null;
            const p = lastParams;
            if (!p || !p.location || !document.getElementById('show_pin').checked) return;
            const at = [p.location.lat, p.location.lng];
            centerMarker = L.marker(at).addTo(map);
            radiusCircle = L.circle(at, { radius: p.radius_km * 1000, color: '#6366f1', fillOpacity: 0.08 }).addTo(map);
        }
        document.getElementById('show_pin').onchange = drawPin;

        async function refreshResults(reframe) {
            const count = (await (await fetch('/api/table')).json()).total;
            document.getElementById('found').textContent = `${count} Earthquake${count === 1 ? '' : 's'} Found`;
            loadTable();
            loadMarkers();
            loadCharts();
            if (reframe) {
                const b = await (await fetch('/api/framing')).json();
                if (b) map.fitBounds([[b.south, b.west], [b.north, b.east]]);
            }
        }

        async function loadTable() {
            const q = new URLSearchParams({ sort: table.sort, page: Math.max(0, table.page) });
            if (table.desc !== null) q.set('desc', table.desc);
            const t = await (await fetch('/api/table?' + q)).json();
            table.page = t.page;
            table.desc = t.desc;
            const rows = document.getElementById('rows');
            rows.innerHTML = '';
            for (const r of t.rows) {
                const tr = document.createElement('tr');
                if (r.selected) tr.className = 'selected';
                tr.innerHTML = `<td></td><td>${r.magnitude}</td><td>${r.date}</td>`;
                tr.firstChild.textContent = r.place;
                tr.onclick = () => fetch('/api/selection/' + encodeURIComponent(r.id), { method: 'POST' });
                rows.appendChild(tr);
            }
            document.getElementById('page').textContent = `${t.page + 1} / ${t.page_count}`;
            document.getElementById('prev').disabled = !t.can_previous;
            document.getElementById('next').disabled = !t.can_next;
        }

        async function loadMarkers() {
            const markers = await (await fetch('/api/markers')).json();
            layer.clearLayers();
            for (const m of markers) {
                L.circleMarker([m.lat, m.lng], {
                    radius: m.size_px / 2,
                    color: m.selected ? '#f59e0b' : '#ef4444',
                    weight: m.selected ? 3 : 1,
                })
                    .bindTooltip(m.tooltip.map(t => t.replace(/</g, '&lt;')).join('<br>'))
                    .on('click', () => fetch('/api/selection/' + encodeURIComponent(m.id), { method: 'POST' }))
                    .addTo(layer);
            }
        }

        async function loadCharts() {
            const bars = await (await fetch('/api/histogram')).json();
            const max = Math.max(1, ...bars.map(b => b.count));
            const hist = document.getElementById('histogram');
            hist.innerHTML = '';
            for (const b of bars) {
                const div = document.createElement('div');
                div.className = 'bar';
                div.style.height = (b.count / max * 100) + '%';
                div.title = `${b.label}: ${b.count}`;
                div.innerHTML = `<span>${b.magnitude}</span>`;
                hist.appendChild(div);
            }

            const points = await (await fetch('/api/scatter')).json();
            const svg = document.getElementById('scatter');
            svg.innerHTML = '';
            if (points.length === 0) return;
            const xs = points.map(p => p.x);
            const minX = Math.min(...xs), spanX = Math.max(1, Math.max(...xs) - minX);
            for (const p of points) {
                const c = document.createElementNS('http://www.w3.org/2000/svg', 'circle');
                c.setAttribute('cx', 10 + (p.x - minX) / spanX * 380);
                c.setAttribute('cy', 130 - p.y / 10 * 120);
                c.setAttribute('r', 3);
                svg.appendChild(c);
            }
        }

        const source = new EventSource('/api/stream');
        source.addEventListener('snapshot', e => render(JSON.parse(e.data)));
    </script>
</body>
</html>
"##;
