#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use actix_web::http::StatusCode;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{App, HttpRequest, HttpResponse, HttpServer, web};
use async_trait::async_trait;
use layerscope_services::{
    HubService, ImageStore, Inspector, MemoryQueue, NotificationService, QueueMessage, QueueName,
    QueueService, RegistryClient, RegistryConfig, SecretsService,
};
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde_json::{Value, json};

pub const SITE_URL: &str = "https://inspector.test";

/// In-memory SQLite with every migration applied. A single connection keeps
/// the in-memory database alive and shared.
pub async fn setup_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options.max_connections(1).sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .expect("Failed to open in-memory database");
    migration::Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    db
}

/// Token service, registry, hub API and webhook receiver in one fake server.
#[derive(Default)]
pub struct FakeRegistry {
    /// Tag list for every repository; `None` answers 404.
    pub tags: Mutex<Option<Vec<String>>>,
    /// Status to answer tag list requests with instead of the list.
    pub tags_status: AtomicU16,
    pub manifests: Mutex<HashMap<String, String>>,
    pub blobs: Mutex<HashMap<String, usize>>,
    /// Blob probes answer 429 while set.
    pub rate_limited: AtomicBool,
    /// Number of upcoming registry requests to answer 401.
    pub unauthorized: AtomicUsize,
    pub hub_info: Mutex<Option<Value>>,
    /// Status for webhook posts; 0 means 200.
    pub webhook_status: AtomicU16,
    /// Status for token requests; 0 means 200.
    pub token_status: AtomicU16,

    pub token_requests: AtomicUsize,
    pub token_auth: Mutex<Vec<Option<String>>>,
    pub blob_requests: AtomicUsize,
    pub webhook_bodies: Mutex<Vec<Value>>,
}

impl FakeRegistry {
    pub fn set_tags(&self, tags: Option<&[&str]>) {
        *self.tags.lock().unwrap() = tags.map(|t| t.iter().map(|s| s.to_string()).collect());
    }

    pub fn set_manifest(&self, tag: &str, body: String) {
        self.manifests.lock().unwrap().insert(tag.to_string(), body);
    }

    pub fn set_blob(&self, blob_sum: &str, size: usize) {
        self.blobs.lock().unwrap().insert(blob_sum.to_string(), size);
    }

    pub fn set_hub_info(&self, info: Option<Value>) {
        *self.hub_info.lock().unwrap() = info;
    }

    pub fn blob_requests(&self) -> usize {
        self.blob_requests.load(Ordering::SeqCst)
    }

    pub fn token_requests(&self) -> usize {
        self.token_requests.load(Ordering::SeqCst)
    }

    pub fn webhook_bodies(&self) -> Vec<Value> {
        self.webhook_bodies.lock().unwrap().clone()
    }
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap()
}

async fn handle(req: HttpRequest, body: web::Bytes, fake: web::Data<FakeRegistry>) -> HttpResponse {
    let path = req.path().to_string();

    if path == "/token" {
        let n = fake.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
        let auth = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        fake.token_auth.lock().unwrap().push(auth);
        let code = fake.token_status.load(Ordering::SeqCst);
        if code != 0 {
            return HttpResponse::build(status(code)).finish();
        }
        return HttpResponse::Ok().json(json!({ "token": format!("token-{}", n) }));
    }

    if path.starts_with("/hooks/") {
        if let Ok(value) = serde_json::from_slice::<Value>(&body) {
            fake.webhook_bodies.lock().unwrap().push(value);
        }
        let code = match fake.webhook_status.load(Ordering::SeqCst) {
            0 => 200,
            code => code,
        };
        return HttpResponse::build(status(code)).body("thanks");
    }

    if path.starts_with("/v2/repositories/") {
        return match fake.hub_info.lock().unwrap().clone() {
            Some(info) => HttpResponse::Ok().json(info),
            None => HttpResponse::NotFound().finish(),
        };
    }

    if path.starts_with("/v2/") {
        let reject = fake
            .unauthorized
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if reject {
            return HttpResponse::Unauthorized().finish();
        }

        if path.ends_with("/tags/list") {
            let code = fake.tags_status.load(Ordering::SeqCst);
            if code != 0 {
                return HttpResponse::build(status(code)).finish();
            }
            return match fake.tags.lock().unwrap().clone() {
                Some(tags) => HttpResponse::Ok().json(json!({ "name": "repo", "tags": tags })),
                None => HttpResponse::NotFound().finish(),
            };
        }

        if let Some((_, tag)) = path.split_once("/manifests/") {
            return match fake.manifests.lock().unwrap().get(tag) {
                Some(manifest) => HttpResponse::Ok()
                    .content_type("application/vnd.docker.distribution.manifest.v1+prettyjws")
                    .body(manifest.clone()),
                None => HttpResponse::NotFound().finish(),
            };
        }

        if let Some((_, blob)) = path.split_once("/blobs/") {
            fake.blob_requests.fetch_add(1, Ordering::SeqCst);
            if fake.rate_limited.load(Ordering::SeqCst) {
                return HttpResponse::TooManyRequests().finish();
            }
            return match fake.blobs.lock().unwrap().get(blob) {
                Some(size) => HttpResponse::Ok().body(vec![0u8; *size]),
                None => HttpResponse::NotFound().finish(),
            };
        }
    }

    HttpResponse::NotFound().finish()
}

/// Starts the fake on a random local port and returns its base URL.
pub fn start(fake: Arc<FakeRegistry>) -> String {
    let data = web::Data::from(fake);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .default_service(web::to(handle))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("Failed to bind fake registry");

    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    format!("http://{}", addr)
}

pub fn registry_config(base_url: &str) -> RegistryConfig {
    RegistryConfig {
        registry_url: base_url.to_string(),
        auth_url: base_url.to_string(),
        service: "registry.test".to_string(),
        timeout: Duration::from_secs(5),
        rate_limit_delay: Duration::from_millis(200),
    }
}

/// One history entry of a schema v1 manifest: version id, blob and the raw
/// shell command that built it.
pub struct Entry<'a> {
    pub id: &'a str,
    pub blob: &'a str,
    pub cmd: &'a str,
}

/// Manifest body with entries given newest first, the way the registry
/// orders them. The first entry's id is the version sha.
pub fn manifest(name: &str, entries: &[Entry], created: &str) -> String {
    let history: Vec<Value> = entries
        .iter()
        .map(|e| {
            let v1 = json!({
                "id": e.id,
                "created": created,
                "author": "builder",
                "config": { "Labels": { "org.label-schema.license": "MIT" } },
                "container_config": { "Cmd": ["/bin/sh", "-c", e.cmd] },
            });
            json!({ "v1Compatibility": v1.to_string() })
        })
        .collect();
    let fs_layers: Vec<Value> = entries.iter().map(|e| json!({ "blobSum": e.blob })).collect();

    json!({
        "schemaVersion": 1,
        "name": name,
        "history": history,
        "fsLayers": fs_layers,
    })
    .to_string()
}

pub fn hub_info(name: &str, last_updated: &str) -> Value {
    json!({
        "name": name,
        "namespace": "org",
        "description": "A test image",
        "full_description": "",
        "is_automated": false,
        "is_private": false,
        "last_updated": last_updated,
        "pull_count": 42,
        "star_count": 3,
    })
}

/// Passes everything through to a [`MemoryQueue`], except that it can be
/// told to refuse the next few sends.
pub struct UnreliableQueue {
    inner: Arc<MemoryQueue>,
    failing_sends: AtomicUsize,
}

impl UnreliableQueue {
    pub fn fail_next_sends(&self, n: usize) {
        self.failing_sends.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueService for UnreliableQueue {
    async fn send(&self, queue: QueueName, body: String) -> anyhow::Result<()> {
        let refuse = self
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            anyhow::bail!("queue down");
        }
        self.inner.send(queue, body).await
    }

    async fn receive(&self, queue: QueueName) -> anyhow::Result<Option<QueueMessage>> {
        self.inner.receive(queue).await
    }

    async fn delete(&self, queue: QueueName, message: &QueueMessage) -> anyhow::Result<()> {
        self.inner.delete(queue, message).await
    }
}

/// Everything an inspection needs, wired against one fake server.
pub struct Harness {
    pub fake: Arc<FakeRegistry>,
    pub base_url: String,
    pub store: ImageStore,
    pub queue: Arc<MemoryQueue>,
    /// What the services send through; wraps `queue`.
    pub unreliable: Arc<UnreliableQueue>,
    pub registry: RegistryClient,
    pub notifications: NotificationService,
    pub inspector: Inspector,
}

pub async fn harness(secrets: Option<Arc<dyn SecretsService>>) -> Harness {
    harness_with_visibility(secrets, Duration::from_secs(30)).await
}

pub async fn harness_with_visibility(
    secrets: Option<Arc<dyn SecretsService>>,
    visibility: Duration,
) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let fake = Arc::new(FakeRegistry::default());
    let base_url = start(fake.clone());

    let store = ImageStore::new(setup_db().await, SITE_URL);
    let queue = Arc::new(MemoryQueue::new(visibility));
    let unreliable = Arc::new(UnreliableQueue {
        inner: queue.clone(),
        failing_sends: AtomicUsize::new(0),
    });
    let dyn_queue: Arc<dyn QueueService> = unreliable.clone();

    let registry = RegistryClient::new(registry_config(&base_url)).unwrap();
    let hub = HubService::new(&base_url, Duration::from_secs(5)).unwrap();
    let notifications =
        NotificationService::new(store.clone(), dyn_queue.clone(), Duration::from_secs(5), 3).unwrap();
    let inspector = Inspector::new(
        store.clone(),
        registry.clone(),
        hub,
        dyn_queue,
        notifications.clone(),
        secrets,
    );

    Harness {
        fake,
        base_url,
        store,
        queue,
        unreliable,
        registry,
        notifications,
        inspector,
    }
}
