/// Shop HTTP API
/// Small HTTP/1.1 JSON server: public board, admin editing, and /health, /ready, /metrics for monitoring.
///
/// One request per connection (`Connection: close`). Admin routes need the
/// password in the `X-Admin-Password` header.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{change_password, AuthError};
use crate::backup::{self, BackupError};
use crate::catalog::{self, CatalogError, OfferDraft, OfferPatch, ProductDraft, ProductPatch};
use crate::model::{EarlyClosing, Offer, Product, ShopConfig, ShopPatch, ShopStatus};
use crate::status::{BoardSnapshot, Rule, StatusResolver};
use crate::store::{ShopStore, StoreError};

/// Timeout for reading an HTTP request (prevents slow-loris attacks)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Request line plus headers may not exceed this
const MAX_HEAD_BYTES: usize = 8 * 1024;

pub const ADMIN_PASSWORD_HEADER: &str = "x-admin-password";

/// Counters exposed on /health and /metrics
#[derive(Debug)]
pub struct ServerMetrics {
    requests_ok: AtomicU64,
    requests_failed: AtomicU64,
    auth_failures: AtomicU64,
    shop_open: AtomicBool,
    last_evaluation_time: AtomicU64,
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self {
            requests_ok: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            shop_open: AtomicBool::new(false),
            last_evaluation_time: AtomicU64::new(0),
        }
    }
}

/// Point-in-time copy of ServerMetrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_ok: u64,
    pub requests_failed: u64,
    pub auth_failures: u64,
    pub shop_open: bool,
    /// Unix epoch seconds of the last status evaluation, 0 before the first
    pub last_evaluation_time: u64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a response by its status code
    pub fn record_response(&self, status: u16) {
        if status < 400 {
            self.requests_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Remember the latest effective status
    pub fn record_status(&self, status: ShopStatus) {
        self.shop_open.store(status.is_open(), Ordering::Relaxed);
        self.last_evaluation_time.store(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            Ordering::Relaxed,
        );
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_ok: self.requests_ok.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            shop_open: self.shop_open.load(Ordering::Relaxed),
            last_evaluation_time: self.last_evaluation_time.load(Ordering::Relaxed),
        }
    }
}

/// Everything a request handler needs
pub struct AppState {
    pub store: Arc<dyn ShopStore>,
    pub resolver: StatusResolver,
    pub metrics: Arc<ServerMetrics>,
    pub max_body_bytes: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("request body too large")]
    PayloadTooLarge,

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Backup(#[from] BackupError),
}

impl ApiError {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::Unauthorized => 401,
            ApiError::BadRequest(_) => 400,
            ApiError::NotFound => 404,
            ApiError::PayloadTooLarge => 413,
            ApiError::Store(_) => 500,
            ApiError::Catalog(CatalogError::MissingField(_)) => 400,
            ApiError::Catalog(_) => 404,
            ApiError::Auth(AuthError::IncorrectPassword) => 401,
            ApiError::Auth(_) => 400,
            ApiError::Backup(_) => 400,
        }
    }
}

/// A parsed request
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.to_string()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Parse the request line and headers (everything before the blank line)
    pub fn parse_head(head: &str) -> Option<Self> {
        let mut lines = head.lines();
        let mut request_line = lines.next()?.split_whitespace();
        let method = request_line.next()?;
        let path = request_line.next()?;

        let mut request = Self::new(method, path);
        for line in lines {
            if line.is_empty() {
                break;
            }
            let (name, value) = line.split_once(':')?;
            request = request.with_header(name.trim(), value.trim());
        }
        Some(request)
    }

    fn content_length(&self) -> Result<usize, ApiError> {
        match self.header("content-length") {
            None => Ok(0),
            Some(v) => v
                .parse()
                .map_err(|_| ApiError::BadRequest("invalid Content-Length".to_string())),
        }
    }

    /// Path segments without the query string
    fn segments(&self) -> Vec<&str> {
        let path = self.path.split('?').next().unwrap_or("");
        path.split('/').filter(|s| !s.is_empty()).collect()
    }

    fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
    }
}

/// A response ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => {
                error!("Failed to serialize response: {}", e);
                Self::error(500, "internal error")
            }
        }
    }

    pub fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }

    pub fn text(status: u16, content_type: &'static str, body: String) -> Self {
        Self {
            status,
            content_type,
            body,
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            201 => "Created",
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            413 => "Payload Too Large",
            503 => "Service Unavailable",
            _ => "Internal Server Error",
        }
    }

    /// Serialize to the wire format
    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-cache, no-store, must-revalidate\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }
}

impl From<ApiError> for HttpResponse {
    fn from(err: ApiError) -> Self {
        let status = err.status_code();
        if status >= 500 {
            error!("Request failed: {}", err);
            HttpResponse::error(status, "internal error")
        } else {
            HttpResponse::error(status, &err.to_string())
        }
    }
}

/// What the public page shows
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardView {
    pub shop_name: String,
    pub status: ShopStatus,
    pub decided_by: Rule,
    /// Only while closed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_message: Option<String>,
    /// Opening time from the schedule, only while closed with a schedule enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_open_time: Option<String>,
    pub active_offers: Vec<Offer>,
    pub upcoming_offers: Vec<Offer>,
    /// Only while the early closing notice should be shown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub early_closing: Option<EarlyClosing>,
    pub products: Vec<Product>,
    pub unavailable_count: usize,
}

impl BoardView {
    pub fn build(config: &ShopConfig, snapshot: BoardSnapshot) -> Self {
        let products: Vec<Product> = catalog::available_products(config)
            .into_iter()
            .cloned()
            .collect();

        Self {
            shop_name: config.shop_name.clone(),
            status: snapshot.effective_status,
            decided_by: snapshot.decided_by,
            close_message: (!snapshot.effective_status.is_open())
                .then(|| config.close_message.clone()),
            next_open_time: config
                .active_schedule()
                .filter(|_| !snapshot.effective_status.is_open())
                .map(|schedule| schedule.open_time.clone()),
            active_offers: snapshot.active_offers,
            upcoming_offers: snapshot.upcoming_offers,
            early_closing: if snapshot.early_closing_banner_visible {
                config.early_closing.clone()
            } else {
                None
            },
            unavailable_count: config.products.len() - products.len(),
            products,
        }
    }
}

impl AppState {
    /// Evaluate the board for `config` and note the status in metrics
    pub fn board(&self, config: &ShopConfig) -> BoardView {
        let snapshot = self.resolver.snapshot(config);
        self.metrics.record_status(snapshot.effective_status);
        BoardView::build(config, snapshot)
    }

    fn require_admin(&self, request: &HttpRequest) -> Result<(), ApiError> {
        let password = request.header(ADMIN_PASSWORD_HEADER).unwrap_or("");
        if !password.is_empty() && self.store.auth()?.verify(password) {
            Ok(())
        } else {
            self.metrics.record_auth_failure();
            Err(ApiError::Unauthorized)
        }
    }

    /// Read, edit and write back the whole offer or product list
    fn edit_config<T>(
        &self,
        edit: impl FnOnce(&mut ShopConfig) -> Result<T, CatalogError>,
        patch: impl FnOnce(ShopConfig) -> ShopPatch,
    ) -> Result<T, ApiError> {
        let mut config = self.store.read()?;
        let out = edit(&mut config)?;
        self.store.replace(patch(config))?;
        Ok(out)
    }
}

fn offers_patch(config: ShopConfig) -> ShopPatch {
    ShopPatch {
        offers: Some(config.offers),
        ..ShopPatch::default()
    }
}

fn products_patch(config: ShopConfig) -> ShopPatch {
    ShopPatch {
        products: Some(config.products),
        ..ShopPatch::default()
    }
}

fn parse_id(raw: &str) -> Result<u32, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid id '{}'", raw)))
}

/// Dispatch one request. Store calls are synchronous and short.
pub fn route(request: &HttpRequest, state: &AppState) -> HttpResponse {
    let segments = request.segments();
    let result = match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["api", "board"]) => get_board(state),
        ("GET", ["api", "status"]) => Ok(get_status(state)),
        ("POST", ["api", "status"]) => post_status(request, state),

        ("POST", ["api", "offers"]) => add_offer(request, state),
        ("PUT", ["api", "offers", id]) => update_offer(request, state, id),
        ("DELETE", ["api", "offers", id]) => remove_offer(request, state, id),

        ("POST", ["api", "products"]) => add_product(request, state),
        ("PUT", ["api", "products", id]) => update_product(request, state, id),
        ("DELETE", ["api", "products", id]) => remove_product(request, state, id),
        ("POST", ["api", "products", id, "toggle"]) => toggle_product(request, state, id),

        ("POST", ["api", "admin", "login"]) => login(request, state),
        ("POST", ["api", "admin", "password"]) => post_password(request, state),
        ("GET", ["api", "admin", "export"]) => export_backup(request, state),
        ("POST", ["api", "admin", "import"]) => import_backup(request, state),

        ("GET", ["health"]) | ("GET", ["healthz"]) => Ok(build_health_response(state)),
        ("GET", ["ready"]) | ("GET", ["readyz"]) => Ok(build_ready_response(state)),
        ("GET", ["metrics"]) => Ok(build_metrics_response(&state.metrics.snapshot())),

        _ => Err(ApiError::NotFound),
    };

    result.unwrap_or_else(HttpResponse::from)
}

fn get_board(state: &AppState) -> Result<HttpResponse, ApiError> {
    let config = state.store.read()?;
    Ok(HttpResponse::json(200, &state.board(&config)))
}

/// Raw shop data. Falls back to first-run data if the store cannot be read.
fn get_status(state: &AppState) -> HttpResponse {
    match state.store.read() {
        Ok(config) => HttpResponse::json(200, &config),
        Err(e) => {
            warn!("Shop record unavailable, serving defaults: {}", e);
            HttpResponse::json(200, &ShopConfig::default())
        }
    }
}

fn post_status(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;

    let body: Value = request.json()?;
    let status_ok = matches!(
        body.get("status").and_then(Value::as_str),
        Some("open") | Some("closed")
    );
    if !status_ok {
        return Err(ApiError::BadRequest("Invalid status".to_string()));
    }

    let patch: ShopPatch = serde_json::from_value(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid shop data: {}", e)))?;
    let updated = state.store.replace(patch)?;
    info!("Shop data updated (manual status: {})", updated.manual_status);
    Ok(HttpResponse::json(200, &updated))
}

fn add_offer(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let draft: OfferDraft = request.json()?;
    let offer = state.edit_config(|c| catalog::add_offer(c, draft).cloned(), offers_patch)?;
    info!("Offer {} added: {}", offer.id, offer.title);
    Ok(HttpResponse::json(201, &offer))
}

fn update_offer(request: &HttpRequest, state: &AppState, id: &str) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let id = parse_id(id)?;
    let patch: OfferPatch = request.json()?;
    let offer = state.edit_config(|c| catalog::update_offer(c, id, patch).cloned(), offers_patch)?;
    Ok(HttpResponse::json(200, &offer))
}

fn remove_offer(request: &HttpRequest, state: &AppState, id: &str) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let id = parse_id(id)?;
    let offer = state.edit_config(|c| catalog::remove_offer(c, id), offers_patch)?;
    info!("Offer {} removed", offer.id);
    Ok(HttpResponse::json(200, &offer))
}

fn add_product(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let draft: ProductDraft = request.json()?;
    let product = state.edit_config(|c| catalog::add_product(c, draft).cloned(), products_patch)?;
    info!("Product {} added: {}", product.id, product.name);
    Ok(HttpResponse::json(201, &product))
}

fn update_product(request: &HttpRequest, state: &AppState, id: &str) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let id = parse_id(id)?;
    let patch: ProductPatch = request.json()?;
    let product =
        state.edit_config(|c| catalog::update_product(c, id, patch).cloned(), products_patch)?;
    Ok(HttpResponse::json(200, &product))
}

fn remove_product(request: &HttpRequest, state: &AppState, id: &str) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let id = parse_id(id)?;
    let product = state.edit_config(|c| catalog::remove_product(c, id), products_patch)?;
    info!("Product {} removed", product.id);
    Ok(HttpResponse::json(200, &product))
}

fn toggle_product(request: &HttpRequest, state: &AppState, id: &str) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let id = parse_id(id)?;
    let product =
        state.edit_config(|c| catalog::toggle_product(c, id).cloned(), products_patch)?;
    Ok(HttpResponse::json(200, &product))
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    password: String,
}

fn login(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    let body: LoginRequest = request.json()?;
    if state.store.auth()?.verify(&body.password) {
        Ok(HttpResponse::json(200, &serde_json::json!({ "ok": true })))
    } else {
        state.metrics.record_auth_failure();
        Err(ApiError::Unauthorized)
    }
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct PasswordChange {
    current_password: String,
    new_password: String,
    confirm_password: String,
}

fn post_password(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    let body: PasswordChange = request.json()?;
    let current = state.store.auth()?;
    let updated = change_password(
        &current,
        &body.current_password,
        &body.new_password,
        &body.confirm_password,
    )
    .inspect_err(|e| {
        if *e == AuthError::IncorrectPassword {
            state.metrics.record_auth_failure();
        }
    })?;
    state.store.set_auth(updated)?;
    info!("Admin password changed");
    Ok(HttpResponse::json(200, &serde_json::json!({ "ok": true })))
}

fn export_backup(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let text = backup::export(&state.store.record()?)?;
    Ok(HttpResponse::text(200, "application/json", text))
}

fn import_backup(request: &HttpRequest, state: &AppState) -> Result<HttpResponse, ApiError> {
    state.require_admin(request)?;
    let text = std::str::from_utf8(&request.body)
        .map_err(|_| ApiError::BadRequest("backup must be UTF-8".to_string()))?;
    let imported = backup::parse_import(text)?;
    let password_updated = imported.auth.is_some();
    state.store.restore(imported.data, imported.auth)?;
    info!("Backup imported (password updated: {})", password_updated);
    Ok(HttpResponse::json(
        200,
        &serde_json::json!({ "ok": true, "passwordUpdated": password_updated }),
    ))
}

fn build_health_response(state: &AppState) -> HttpResponse {
    let m = state.metrics.snapshot();
    HttpResponse::json(
        200,
        &serde_json::json!({
            "status": "healthy",
            "requests_ok": m.requests_ok,
            "requests_failed": m.requests_failed,
            "auth_failures": m.auth_failures,
            "shop_open": m.shop_open,
            "last_evaluation_time": m.last_evaluation_time,
        }),
    )
}

/// Ready once the shop record can be read
fn build_ready_response(state: &AppState) -> HttpResponse {
    match state.store.read() {
        Ok(_) => HttpResponse::json(200, &serde_json::json!({ "ready": true })),
        Err(e) => {
            debug!("Not ready: {}", e);
            HttpResponse::json(503, &serde_json::json!({ "ready": false }))
        }
    }
}

fn build_metrics_response(m: &MetricsSnapshot) -> HttpResponse {
    // Prometheus-compatible metrics format
    let body = format!(
        "# HELP cafeboard_requests_total Total number of HTTP requests handled\n\
         # TYPE cafeboard_requests_total counter\n\
         cafeboard_requests_total{{result=\"ok\"}} {}\n\
         cafeboard_requests_total{{result=\"error\"}} {}\n\
         # HELP cafeboard_auth_failures_total Rejected admin password attempts\n\
         # TYPE cafeboard_auth_failures_total counter\n\
         cafeboard_auth_failures_total {}\n\
         # HELP cafeboard_shop_open Whether the shop was open (1) or closed (0) at the last evaluation\n\
         # TYPE cafeboard_shop_open gauge\n\
         cafeboard_shop_open {}\n\
         # HELP cafeboard_last_evaluation_timestamp Unix timestamp of the last status evaluation\n\
         # TYPE cafeboard_last_evaluation_timestamp gauge\n\
         cafeboard_last_evaluation_timestamp {}\n",
        m.requests_ok,
        m.requests_failed,
        m.auth_failures,
        if m.shop_open { 1 } else { 0 },
        m.last_evaluation_time
    );
    HttpResponse::text(200, "text/plain; version=0.0.4", body)
}

/// Read one request: head up to the blank line, then Content-Length bytes of body
async fn read_request(socket: &mut TcpStream, max_body_bytes: usize) -> Result<Option<HttpRequest>, ApiError> {
    let mut buf: Vec<u8> = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ApiError::BadRequest("request head too large".to_string()));
        }
        let n = socket
            .read(&mut chunk)
            .await
            .map_err(|e| ApiError::BadRequest(format!("read failed: {}", e)))?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(ApiError::BadRequest("incomplete request".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]);
    let mut request = HttpRequest::parse_head(&head)
        .ok_or_else(|| ApiError::BadRequest("malformed request".to_string()))?;

    let length = request.content_length()?;
    if length > max_body_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let mut body = buf.split_off(head_end + 4);
    while body.len() < length {
        let n = socket
            .read(&mut chunk)
            .await
            .map_err(|e| ApiError::BadRequest(format!("read failed: {}", e)))?;
        if n == 0 {
            return Err(ApiError::BadRequest("incomplete body".to_string()));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);
    request.body = body;

    Ok(Some(request))
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Run `route` on the blocking pool; the file store does synchronous disk I/O
async fn route_blocking(request: HttpRequest, state: Arc<AppState>) -> HttpResponse {
    match tokio::task::spawn_blocking(move || route(&request, &state)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Request handler failed: {}", e);
            HttpResponse::error(500, "internal error")
        }
    }
}

async fn handle_connection(socket: &mut TcpStream, state: Arc<AppState>) -> std::io::Result<()> {
    // Apply timeout to prevent slow-loris attacks
    let response = match timeout(REQUEST_TIMEOUT, read_request(socket, state.max_body_bytes)).await {
        Ok(Ok(Some(request))) => {
            debug!("{} {}", request.method, request.path);
            route_blocking(request, state.clone()).await
        }
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e)) => HttpResponse::from(e),
        Err(_) => {
            debug!("Request timeout after {:?}", REQUEST_TIMEOUT);
            return Ok(());
        }
    };

    state.metrics.record_response(response.status);
    socket.write_all(response.to_http().as_bytes()).await?;
    socket.flush().await?;
    Ok(())
}

/// Serve on an already-bound listener until cancelled
pub async fn run_server(listener: TcpListener, state: Arc<AppState>, cancel_token: CancellationToken) {
    if let Ok(addr) = listener.local_addr() {
        info!("Shop API listening on http://{}", addr);
    }

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((mut socket, peer_addr)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(&mut socket, state).await {
                                debug!("Error handling request from {}: {}", peer_addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!("Shop API shutting down");
                break;
            }
        }
    }
}

/// Bind `addr` and serve until cancelled
pub async fn serve(addr: SocketAddr, state: Arc<AppState>, cancel_token: CancellationToken) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    run_server(listener, state, cancel_token).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthState;
    use crate::model::AutoSchedule;
    use crate::store::MemoryStore;
    use crate::time_window::test_support::window_at;

    const PASSWORD: &str = "secret1";

    fn state_at(hour: u32, minute: u32) -> AppState {
        let mut config = ShopConfig::default();
        config.auto_schedule = Some(AutoSchedule {
            enabled: true,
            open_time: "09:00 AM".to_string(),
            close_time: "10:00 PM".to_string(),
        });
        AppState {
            store: Arc::new(MemoryStore::new(config, AuthState::from_password(PASSWORD))),
            resolver: StatusResolver::new(window_at(hour, minute)),
            metrics: Arc::new(ServerMetrics::new()),
            max_body_bytes: 64 * 1024,
        }
    }

    fn admin(method: &str, path: &str, body: &str) -> HttpRequest {
        HttpRequest::new(method, path)
            .with_header("X-Admin-Password", PASSWORD)
            .with_body(body)
    }

    fn json(response: &HttpResponse) -> Value {
        serde_json::from_str(&response.body).unwrap()
    }

    // === request parsing ===

    #[test]
    fn test_parse_head() {
        let head = "POST /api/status HTTP/1.1\r\nHost: localhost\r\nContent-Length: 12\r\nX-Admin-Password: pw";
        let request = HttpRequest::parse_head(head).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/api/status");
        assert_eq!(request.header("content-length"), Some("12"));
        assert_eq!(request.header("x-admin-password"), Some("pw"));
        assert_eq!(request.content_length().unwrap(), 12);
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        assert!(HttpRequest::parse_head("").is_none());
        assert!(HttpRequest::parse_head("GET").is_none());
        assert!(HttpRequest::parse_head("GET / HTTP/1.1\r\nno colon here").is_none());
    }

    #[test]
    fn test_segments_strip_query() {
        let request = HttpRequest::new("GET", "/api/board?lang=en");
        assert_eq!(request.segments(), vec!["api", "board"]);
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nbody"), Some(14));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_response_wire_format() {
        let response = HttpResponse::error(404, "not found");
        let wire = response.to_http();
        assert!(wire.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(wire.contains("Cache-Control: no-cache, no-store, must-revalidate"));
        assert!(wire.contains(&format!("Content-Length: {}", response.body.len())));
        assert!(wire.ends_with("{\"error\":\"not found\"}"));
    }

    // === public routes ===

    #[test]
    fn test_board_open_inside_hours() {
        let state = state_at(11, 0);
        let response = route(&HttpRequest::new("GET", "/api/board"), &state);
        assert_eq!(response.status, 200);

        let body = json(&response);
        assert_eq!(body["status"], "open");
        assert_eq!(body["decidedBy"], "autoSchedule");
        assert!(body.get("closeMessage").is_none());
        assert_eq!(body["products"].as_array().unwrap().len(), 3);
        assert!(state.metrics.snapshot().shop_open);
    }

    #[test]
    fn test_board_closed_shows_message() {
        let state = state_at(23, 0);
        state
            .store
            .replace(ShopPatch {
                manual_status: Some(ShopStatus::Closed),
                ..ShopPatch::default()
            })
            .unwrap();

        let body = json(&route(&HttpRequest::new("GET", "/api/board"), &state));
        assert_eq!(body["status"], "closed");
        assert!(body["closeMessage"].as_str().unwrap().contains("closed"));
        assert_eq!(body["nextOpenTime"], "09:00 AM");
        assert!(!state.metrics.snapshot().shop_open);
    }

    #[test]
    fn test_board_open_has_no_next_open_time() {
        let body = json(&route(&HttpRequest::new("GET", "/api/board"), &state_at(11, 0)));
        assert_eq!(body["status"], "open");
        assert!(body.get("nextOpenTime").is_none());
    }

    #[test]
    fn test_get_status_returns_raw_config() {
        let state = state_at(11, 0);
        let body = json(&route(&HttpRequest::new("GET", "/api/status"), &state));
        assert_eq!(body["status"], "open");
        assert_eq!(body["autoSchedule"]["enabled"], true);
    }

    #[test]
    fn test_unknown_route() {
        let state = state_at(11, 0);
        assert_eq!(route(&HttpRequest::new("GET", "/nope"), &state).status, 404);
        assert_eq!(route(&HttpRequest::new("PATCH", "/api/status"), &state).status, 404);
    }

    // === admin routes ===

    #[test]
    fn test_post_status_requires_password() {
        let state = state_at(11, 0);
        let request = HttpRequest::new("POST", "/api/status").with_body(r#"{"status":"closed"}"#);
        assert_eq!(route(&request, &state).status, 401);

        let request = request.with_header("X-Admin-Password", "wrong");
        assert_eq!(route(&request, &state).status, 401);
        assert_eq!(state.metrics.snapshot().auth_failures, 2);
        assert_eq!(state.store.read().unwrap().manual_status, ShopStatus::Open);
    }

    #[test]
    fn test_post_status_validates_status() {
        let state = state_at(11, 0);
        for body in [r#"{"closeMessage":"x"}"#, r#"{"status":"maybe"}"#, r#"{"status":1}"#] {
            let response = route(&admin("POST", "/api/status", body), &state);
            assert_eq!(response.status, 400, "body {}", body);
            assert_eq!(json(&response)["error"], "Invalid status");
        }
        assert_eq!(route(&admin("POST", "/api/status", "nope"), &state).status, 400);
    }

    #[test]
    fn test_post_status_partial_update() {
        let state = state_at(11, 0);
        let response = route(
            &admin("POST", "/api/status", r#"{"status":"closed","closeMessage":"Back at 5"}"#),
            &state,
        );
        assert_eq!(response.status, 200);
        let config = state.store.read().unwrap();
        assert_eq!(config.manual_status, ShopStatus::Closed);
        assert_eq!(config.close_message, "Back at 5");
        assert_eq!(config.products.len(), 3);
    }

    #[test]
    fn test_offer_routes() {
        let state = state_at(11, 0);
        let created = route(
            &admin(
                "POST",
                "/api/offers",
                r#"{"title":"Chai hour","description":"Second cup free","startTime":"10:00 AM","endTime":"12:00 PM"}"#,
            ),
            &state,
        );
        assert_eq!(created.status, 201);
        assert_eq!(json(&created)["id"], 1);

        let board = json(&route(&HttpRequest::new("GET", "/api/board"), &state));
        assert_eq!(board["activeOffers"][0]["title"], "Chai hour");

        let updated = route(&admin("PUT", "/api/offers/1", r#"{"enabled":false}"#), &state);
        assert_eq!(json(&updated)["enabled"], false);

        assert_eq!(route(&admin("DELETE", "/api/offers/1", ""), &state).status, 200);
        assert_eq!(route(&admin("DELETE", "/api/offers/1", ""), &state).status, 404);
        assert_eq!(route(&admin("DELETE", "/api/offers/abc", ""), &state).status, 400);
        assert!(state.store.read().unwrap().offers.is_empty());
    }

    #[test]
    fn test_offer_requires_title() {
        let state = state_at(11, 0);
        let response = route(&admin("POST", "/api/offers", r#"{"description":"x"}"#), &state);
        assert_eq!(response.status, 400);
        assert_eq!(json(&response)["error"], "title is required");
    }

    #[test]
    fn test_product_routes() {
        let state = state_at(11, 0);
        let created = route(
            &admin("POST", "/api/products", r#"{"name":"Poha","price":"30"}"#),
            &state,
        );
        assert_eq!(created.status, 201);
        assert_eq!(json(&created)["id"], 4);

        let toggled = route(&admin("POST", "/api/products/4/toggle", ""), &state);
        assert_eq!(json(&toggled)["available"], false);

        let board = json(&route(&HttpRequest::new("GET", "/api/board"), &state));
        assert_eq!(board["unavailableCount"], 1);

        let updated = route(&admin("PUT", "/api/products/4", r#"{"price":"35"}"#), &state);
        assert_eq!(json(&updated)["price"], "35");
        assert_eq!(route(&admin("DELETE", "/api/products/4", ""), &state).status, 200);
        assert_eq!(route(&admin("POST", "/api/products/99/toggle", ""), &state).status, 404);
    }

    #[test]
    fn test_login() {
        let state = state_at(11, 0);
        let ok = HttpRequest::new("POST", "/api/admin/login").with_body(r#"{"password":"secret1"}"#);
        assert_eq!(route(&ok, &state).status, 200);

        let bad = HttpRequest::new("POST", "/api/admin/login").with_body(r#"{"password":"nope"}"#);
        assert_eq!(route(&bad, &state).status, 401);
    }

    #[test]
    fn test_change_password() {
        let state = state_at(11, 0);
        let mismatch = HttpRequest::new("POST", "/api/admin/password").with_body(
            r#"{"currentPassword":"secret1","newPassword":"newpass1","confirmPassword":"other"}"#,
        );
        let response = route(&mismatch, &state);
        assert_eq!(response.status, 400);
        assert_eq!(json(&response)["error"], "New password and confirmation do not match");

        let wrong = HttpRequest::new("POST", "/api/admin/password").with_body(
            r#"{"currentPassword":"bad","newPassword":"newpass1","confirmPassword":"newpass1"}"#,
        );
        assert_eq!(route(&wrong, &state).status, 401);

        let good = HttpRequest::new("POST", "/api/admin/password").with_body(
            r#"{"currentPassword":"secret1","newPassword":"newpass1","confirmPassword":"newpass1"}"#,
        );
        assert_eq!(route(&good, &state).status, 200);
        assert!(state.store.auth().unwrap().verify("newpass1"));
    }

    #[test]
    fn test_export_and_import() {
        let state = state_at(11, 0);
        let exported = route(&admin("GET", "/api/admin/export", ""), &state);
        assert_eq!(exported.status, 200);
        assert!(exported.body.contains("passwordHash"));

        let legacy = r#"{"shopName":"Imported","status":"closed","products":[]}"#;
        let response = route(&admin("POST", "/api/admin/import", legacy), &state);
        assert_eq!(response.status, 200);
        assert_eq!(json(&response)["passwordUpdated"], false);
        assert_eq!(state.store.read().unwrap().shop_name, "Imported");

        // Full backup puts the original data back
        let response = route(&admin("POST", "/api/admin/import", &exported.body), &state);
        assert_eq!(json(&response)["passwordUpdated"], true);
        assert_eq!(state.store.read().unwrap().products.len(), 3);

        let invalid = route(&admin("POST", "/api/admin/import", r#"{"x":1}"#), &state);
        assert_eq!(invalid.status, 400);
    }

    // === monitoring ===

    #[test]
    fn test_health_ready_metrics() {
        let state = state_at(11, 0);
        state.metrics.record_response(200);
        state.metrics.record_response(404);

        let health = route(&HttpRequest::new("GET", "/health"), &state);
        assert_eq!(json(&health)["status"], "healthy");
        assert_eq!(json(&health)["requests_ok"], 1);

        let ready = route(&HttpRequest::new("GET", "/readyz"), &state);
        assert_eq!(json(&ready)["ready"], true);

        let metrics = route(&HttpRequest::new("GET", "/metrics"), &state);
        assert!(metrics.content_type.starts_with("text/plain"));
        assert!(metrics.body.contains("cafeboard_requests_total{result=\"ok\"} 1"));
        assert!(metrics.body.contains("cafeboard_requests_total{result=\"error\"} 1"));
    }

    #[test]
    fn test_metrics_defaults() {
        let snapshot = ServerMetrics::new().snapshot();
        assert_eq!(snapshot.requests_ok, 0);
        assert_eq!(snapshot.last_evaluation_time, 0);
        assert!(!snapshot.shop_open);
    }

    // === over TCP ===

    async fn send(addr: SocketAddr, raw: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(raw.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn test_server_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state_at(11, 0));
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(run_server(listener, state.clone(), cancel_token.clone()));

        let response = send(addr, "GET /api/board HTTP/1.1\r\nHost: x\r\n\r\n").await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("\"status\":\"open\""));

        let body = r#"{"status":"closed"}"#;
        let raw = format!(
            "POST /api/status HTTP/1.1\r\nX-Admin-Password: {}\r\nContent-Length: {}\r\n\r\n{}",
            PASSWORD,
            body.len(),
            body
        );
        let response = send(addr, &raw).await;
        assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        assert_eq!(state.store.read().unwrap().manual_status, ShopStatus::Closed);

        cancel_token.cancel();
        tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("Server should shutdown within timeout")
            .expect("Server should complete without panic");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_server_handles_concurrent_writes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(state_at(11, 0));
        let cancel_token = CancellationToken::new();
        tokio::spawn(run_server(listener, state.clone(), cancel_token.clone()));

        let mut handles = Vec::new();
        for i in 0..16 {
            let body = if i % 2 == 0 {
                r#"{"status":"closed"}"#.to_string()
            } else {
                format!(r#"{{"closeMessage":"Back at {}"}}"#, i)
            };
            let raw = format!(
                "POST /api/status HTTP/1.1\r\nX-Admin-Password: {}\r\nContent-Length: {}\r\n\r\n{}",
                PASSWORD,
                body.len(),
                body
            );
            handles.push(tokio::spawn(async move { send(addr, &raw).await }));
            handles.push(tokio::spawn(async move {
                send(addr, "GET /api/board HTTP/1.1\r\nHost: x\r\n\r\n").await
            }));
        }

        for handle in handles {
            let response = tokio::time::timeout(Duration::from_secs(5), handle)
                .await
                .expect("response within timeout")
                .unwrap();
            assert!(response.starts_with("HTTP/1.1 200 OK"), "{}", response);
        }

        let config = state.store.read().unwrap();
        assert_eq!(config.manual_status, ShopStatus::Closed);
        assert!(config.close_message.starts_with("Back at"));
        assert_eq!(state.metrics.snapshot().requests_ok, 32);
        cancel_token.cancel();
    }

    #[tokio::test]
    async fn test_server_rejects_oversized_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut state = state_at(11, 0);
        state.max_body_bytes = 16;
        let cancel_token = CancellationToken::new();
        tokio::spawn(run_server(listener, Arc::new(state), cancel_token.clone()));

        let response = send(
            addr,
            "POST /api/status HTTP/1.1\r\nContent-Length: 1000\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 413"), "{}", response);
        cancel_token.cancel();
    }
}
