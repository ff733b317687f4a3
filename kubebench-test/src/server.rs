//! Exposes an in-process fake API server for use in integration tests.
//!
//! ```
//! use kubebench_test::server::TestServer;
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new().await;
//!    let client = server.client();
//!    // use the client in tests...
//! }
//! ```
//!
//! The server implements the subset of the Kubernetes API used by the harness:
//!
//! - creating and reading namespaces, which become `Active` immediately
//! - reading and replacing custom resource definitions, seeded with `foos.stable.example.com`
//! - create, list, watch and delete-collection for `endpoints` and CRD-backed resources
//!
//! When the served version of a CRD carries `x-kubernetes-validations` on `spec`, creates are
//! checked against the filler grammar the harness generates. All state is held in memory.

use std::collections::{BTreeMap, HashMap};
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures::StreamExt;
use futures::stream::BoxStream;
use kubebench_harness::environment::{FOO_CRD, FOO_VERSION, validation_schema};
use kubebench_harness::payload::is_filler;
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

const CRD_GROUP: &str = "apiextensions.k8s.io";
const CRD_VERSION: &str = "v1";
const EVENT_CAPACITY: usize = 4096;

/// An in-process fake API server for use in integration tests.
///
/// It listens on a random available port on localhost. All state is discarded when the server is
/// dropped.
#[derive(Debug)]
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    shared: Arc<Shared>,
}

impl TestServer {
    /// Starts a new server with no namespaces and the `Foo` CRD installed without validation.
    pub async fn new() -> Self {
        // Several TLS providers may be linked into a test binary.
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();

        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let shared = Arc::new(Shared::default());
        shared.lock().seed_foo_crd();
        let app = router(shared.clone());

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            shared,
        }
    }

    /// Returns the base URL of the server.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.socket.port())
    }

    /// Returns a client connected to this server.
    pub fn client(&self) -> kube::Client {
        let config = kube::Config::new(self.url().parse().unwrap());
        kube::Client::try_from(config).unwrap()
    }

    /// Number of namespaces created since the server started.
    pub fn namespace_creations(&self) -> usize {
        self.shared.lock().namespace_creations
    }

    /// Number of CRD replacements since the server started.
    pub fn validation_updates(&self) -> usize {
        self.shared.lock().validation_updates
    }

    /// Returns all stored objects of `resource` in `namespace`, ordered by name.
    pub fn objects(&self, namespace: &str, resource: &str) -> Vec<Value> {
        let store = self.shared.lock();
        store
            .collections
            .iter()
            .filter(|(key, _)| key.namespace == namespace && key.resource == resource)
            .flat_map(|(_, collection)| collection.objects.values().cloned())
            .collect()
    }

    /// Returns the stored definition of the named CRD.
    pub fn crd(&self, name: &str) -> Option<Value> {
        self.shared.lock().crds.get(name).cloned()
    }

    /// The `resourceVersion` parameter of every list request, in arrival order.
    ///
    /// Watch requests are not included.
    pub fn list_versions(&self) -> Vec<Option<String>> {
        self.shared.lock().list_versions.clone()
    }

    /// Makes watches opened from now on end after delivering `events` events.
    pub fn close_watches_after(&self, events: usize) {
        self.shared.lock().watch_fault = Some(WatchFault::Close { after: events });
    }

    /// Makes watches opened from now on deliver an `Expired` error event after `events` events.
    pub fn fail_watches_after(&self, events: usize) {
        self.shared.lock().watch_fault = Some(WatchFault::Expire { after: events });
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[derive(Debug, Default)]
struct Shared {
    store: Mutex<Store>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct CollectionKey {
    group: String,
    version: String,
    namespace: String,
    resource: String,
}

impl CollectionKey {
    fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

#[derive(Debug)]
struct Collection {
    list_kind: String,
    objects: BTreeMap<String, Value>,
    events: broadcast::Sender<String>,
}

#[derive(Clone, Copy, Debug)]
enum WatchFault {
    Close { after: usize },
    Expire { after: usize },
}

#[derive(Debug, Default)]
struct Store {
    revision: u64,
    namespaces: BTreeMap<String, Value>,
    crds: BTreeMap<String, Value>,
    collections: HashMap<CollectionKey, Collection>,
    namespace_creations: usize,
    validation_updates: usize,
    list_versions: Vec<Option<String>>,
    watch_fault: Option<WatchFault>,
}

impl Store {
    fn next_revision(&mut self) -> String {
        self.revision += 1;
        self.revision.to_string()
    }

    fn seed_foo_crd(&mut self) {
        let schema = serde_json::to_value(validation_schema(false).unwrap()).unwrap();
        let revision = self.next_revision();
        let crd = json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": FOO_CRD, "resourceVersion": revision },
            "spec": {
                "group": "stable.example.com",
                "names": {
                    "kind": "Foo",
                    "listKind": "FooList",
                    "plural": "foos",
                    "singular": "foo",
                },
                "scope": "Namespaced",
                "versions": [{
                    "name": FOO_VERSION,
                    "served": true,
                    "storage": true,
                    "schema": schema,
                }],
            },
        });
        self.crds.insert(FOO_CRD.to_owned(), crd);
    }

    /// Returns the CRD serving `key`, or an error if the resource is unknown.
    fn served_crd(&self, key: &CollectionKey) -> ApiResult<&Value> {
        let name = format!("{}.{}", key.resource, key.group);
        let crd = self.crds.get(&name).ok_or_else(|| ApiError::unknown_resource(key))?;
        if served_version(crd, &key.version).is_none() {
            return Err(ApiError::unknown_resource(key));
        }
        Ok(crd)
    }

    fn collection(&mut self, key: &CollectionKey) -> ApiResult<&mut Collection> {
        let list_kind = if key.group.is_empty() {
            if key.version != "v1" || key.resource != "endpoints" {
                return Err(ApiError::unknown_resource(key));
            }
            "EndpointsList".to_owned()
        } else {
            let crd = self.served_crd(key)?;
            let kind = crd
                .pointer("/spec/names/kind")
                .and_then(Value::as_str)
                .unwrap_or_default();
            format!("{kind}List")
        };

        if !self.namespaces.contains_key(&key.namespace) {
            return Err(ApiError::not_found("namespaces", &key.namespace));
        }

        Ok(self
            .collections
            .entry(key.clone())
            .or_insert_with(|| Collection {
                list_kind,
                objects: BTreeMap::new(),
                events: broadcast::channel(EVENT_CAPACITY).0,
            }))
    }

    /// Checks an object against the validation rules of the serving CRD.
    fn validate(&self, key: &CollectionKey, object: &Value) -> ApiResult<()> {
        if key.group.is_empty() {
            return Ok(());
        }

        let crd = self.served_crd(key)?;
        let has_rules = served_version(crd, &key.version)
            .and_then(|version| {
                version.pointer("/schema/openAPIV3Schema/properties/spec/x-kubernetes-validations")
            })
            .and_then(Value::as_array)
            .is_some_and(|rules| !rules.is_empty());

        let data = object.pointer("/spec/data").and_then(Value::as_str);
        if has_rules && !data.is_some_and(is_filler) {
            return Err(ApiError::invalid("spec: Invalid value: data must be in expected format."));
        }
        Ok(())
    }
}

fn served_version<'a>(crd: &'a Value, version: &str) -> Option<&'a Value> {
    crd.pointer("/spec/versions")?
        .as_array()?
        .iter()
        .find(|v| v["name"] == version && v["served"] == true)
}

#[derive(Debug)]
struct ApiError {
    code: StatusCode,
    reason: &'static str,
    message: String,
}

type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn not_found(kind: &str, name: &str) -> Self {
        Self {
            code: StatusCode::NOT_FOUND,
            reason: "NotFound",
            message: format!("{kind} \"{name}\" not found"),
        }
    }

    fn unknown_resource(key: &CollectionKey) -> Self {
        Self {
            code: StatusCode::NOT_FOUND,
            reason: "NotFound",
            message: format!(
                "the server could not find the requested resource {}/{}",
                key.api_version(),
                key.resource
            ),
        }
    }

    fn already_exists(kind: &str, name: &str) -> Self {
        Self {
            code: StatusCode::CONFLICT,
            reason: "AlreadyExists",
            message: format!("{kind} \"{name}\" already exists"),
        }
    }

    fn invalid(message: &str) -> Self {
        Self {
            code: StatusCode::UNPROCESSABLE_ENTITY,
            reason: "Invalid",
            message: message.to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": self.message,
            "reason": self.reason,
            "code": self.code.as_u16(),
        });
        (self.code, Json(status)).into_response()
    }
}

fn router(shared: Arc<Shared>) -> Router {
    Router::new()
        .route("/api/{version}/namespaces", get(list_namespaces).post(create_namespace))
        .route("/api/{version}/namespaces/{namespace}", get(get_namespace))
        .route(
            "/api/{version}/namespaces/{namespace}/{resource}",
            get(core_list)
                .post(core_create)
                .delete(core_delete_collection),
        )
        .route(
            "/apis/{group}/{version}/namespaces/{namespace}/{resource}",
            get(group_list)
                .post(group_create)
                .delete(group_delete_collection),
        )
        .route(
            "/apis/{group}/{version}/customresourcedefinitions/{name}",
            get(get_crd).put(replace_crd),
        )
        .with_state(shared)
}

fn object_name(object: &Value) -> ApiResult<String> {
    object
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| ApiError::invalid("metadata.name: Required value: name is required"))
}

fn check_core_version(version: &str) -> ApiResult<()> {
    if version == "v1" {
        Ok(())
    } else {
        Err(ApiError::not_found("version", version))
    }
}

async fn list_namespaces(
    State(shared): State<Arc<Shared>>,
    Path(version): Path<String>,
) -> ApiResult<Json<Value>> {
    check_core_version(&version)?;
    let store = shared.lock();
    Ok(Json(json!({
        "apiVersion": "v1",
        "kind": "NamespaceList",
        "metadata": { "resourceVersion": store.revision.to_string() },
        "items": store.namespaces.values().collect::<Vec<_>>(),
    })))
}

async fn get_namespace(
    State(shared): State<Arc<Shared>>,
    Path((version, namespace)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    check_core_version(&version)?;
    let store = shared.lock();
    let namespace = store
        .namespaces
        .get(&namespace)
        .ok_or_else(|| ApiError::not_found("namespaces", &namespace))?;
    Ok(Json(namespace.clone()))
}

async fn create_namespace(
    State(shared): State<Arc<Shared>>,
    Path(version): Path<String>,
    Json(mut namespace): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    check_core_version(&version)?;
    let name = object_name(&namespace)?;

    let mut store = shared.lock();
    if store.namespaces.contains_key(&name) {
        return Err(ApiError::already_exists("namespaces", &name));
    }

    let revision = store.next_revision();
    namespace["apiVersion"] = json!("v1");
    namespace["kind"] = json!("Namespace");
    namespace["metadata"]["resourceVersion"] = json!(revision);
    namespace["metadata"]["uid"] = json!(uuid::Uuid::new_v4().to_string());
    namespace["status"] = json!({ "phase": "Active" });

    store.namespaces.insert(name.clone(), namespace.clone());
    store.namespace_creations += 1;
    tracing::debug!(namespace = %name, "created namespace");

    Ok((StatusCode::CREATED, Json(namespace)))
}

async fn core_list(
    State(shared): State<Arc<Shared>>,
    Path((version, namespace, resource)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let key = CollectionKey {
        group: String::new(),
        version,
        namespace,
        resource,
    };
    list_or_watch(&shared, key, &query)
}

async fn group_list(
    State(shared): State<Arc<Shared>>,
    Path((group, version, namespace, resource)): Path<(String, String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> ApiResult<Response> {
    let key = CollectionKey {
        group,
        version,
        namespace,
        resource,
    };
    list_or_watch(&shared, key, &query)
}

async fn core_create(
    State(shared): State<Arc<Shared>>,
    Path((version, namespace, resource)): Path<(String, String, String)>,
    Json(object): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let key = CollectionKey {
        group: String::new(),
        version,
        namespace,
        resource,
    };
    create(&shared, key, object)
}

async fn group_create(
    State(shared): State<Arc<Shared>>,
    Path((group, version, namespace, resource)): Path<(String, String, String, String)>,
    Json(object): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let key = CollectionKey {
        group,
        version,
        namespace,
        resource,
    };
    create(&shared, key, object)
}

async fn core_delete_collection(
    State(shared): State<Arc<Shared>>,
    Path((version, namespace, resource)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let key = CollectionKey {
        group: String::new(),
        version,
        namespace,
        resource,
    };
    delete_collection(&shared, key)
}

async fn group_delete_collection(
    State(shared): State<Arc<Shared>>,
    Path((group, version, namespace, resource)): Path<(String, String, String, String)>,
) -> ApiResult<Json<Value>> {
    let key = CollectionKey {
        group,
        version,
        namespace,
        resource,
    };
    delete_collection(&shared, key)
}

fn event_line(kind: &str, object: &Value) -> String {
    let mut line = json!({ "type": kind, "object": object }).to_string();
    line.push('\n');
    line
}

fn expired_line() -> String {
    let status = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": "too old resource version",
        "reason": "Expired",
        "code": 410,
    });
    event_line("ERROR", &status)
}

fn list_or_watch(
    shared: &Shared,
    key: CollectionKey,
    query: &HashMap<String, String>,
) -> ApiResult<Response> {
    let mut store = shared.lock();
    let revision = store.revision.to_string();
    let fault = store.watch_fault;
    let api_version = key.api_version();
    let collection = store.collection(&key)?;

    let is_watch = query
        .get("watch")
        .is_some_and(|watch| watch == "true" || watch == "1");

    if is_watch {
        let receiver = collection.events.subscribe();

        // Without a specific version, a watch starts with the current state.
        let from_any = query
            .get("resourceVersion")
            .is_none_or(|version| version.is_empty() || version == "0");
        let initial: Vec<String> = if from_any {
            collection
                .objects
                .values()
                .map(|object| event_line("ADDED", object))
                .collect()
        } else {
            Vec::new()
        };
        drop(store);

        let live = BroadcastStream::new(receiver)
            .take_while(|event| futures::future::ready(event.is_ok()))
            .filter_map(|event| futures::future::ready(event.ok()));
        let lines: BoxStream<'static, String> = futures::stream::iter(initial).chain(live).boxed();
        let lines = match fault {
            None => lines,
            Some(WatchFault::Close { after }) => lines.take(after).boxed(),
            Some(WatchFault::Expire { after }) => lines
                .take(after)
                .chain(futures::stream::once(futures::future::ready(expired_line())))
                .boxed(),
        };
        let events = lines.map(Ok::<_, Infallible>);

        let headers = [(header::CONTENT_TYPE, "application/json")];
        return Ok((headers, Body::from_stream(events)).into_response());
    }

    store.list_versions.push(query.get("resourceVersion").cloned());
    let collection = store.collection(&key)?;

    let limit = query
        .get("limit")
        .and_then(|limit| limit.parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(usize::MAX);
    let items: Vec<&Value> = collection.objects.values().take(limit).collect();

    let list = json!({
        "apiVersion": api_version,
        "kind": collection.list_kind,
        "metadata": { "resourceVersion": revision },
        "items": items,
    });
    Ok(Json(list).into_response())
}

fn create(
    shared: &Shared,
    key: CollectionKey,
    mut object: Value,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if !object.is_object() {
        return Err(ApiError::invalid("object must be a JSON object"));
    }
    let name = object_name(&object)?;

    let mut store = shared.lock();
    store.collection(&key)?;
    store.validate(&key, &object)?;

    let revision = store.next_revision();
    object["metadata"]["namespace"] = json!(key.namespace);
    object["metadata"]["resourceVersion"] = json!(revision);
    object["metadata"]["uid"] = json!(uuid::Uuid::new_v4().to_string());

    let collection = store.collection(&key)?;
    if collection.objects.contains_key(&name) {
        return Err(ApiError::already_exists(&key.resource, &name));
    }
    collection.objects.insert(name, object.clone());
    // No receivers is fine; nobody is watching.
    collection.events.send(event_line("ADDED", &object)).ok();

    Ok((StatusCode::CREATED, Json(object)))
}

fn delete_collection(shared: &Shared, key: CollectionKey) -> ApiResult<Json<Value>> {
    let mut store = shared.lock();
    let api_version = key.api_version();
    let collection = store.collection(&key)?;

    let deleted = std::mem::take(&mut collection.objects);
    for object in deleted.values() {
        collection.events.send(event_line("DELETED", object)).ok();
    }
    let list_kind = collection.list_kind.clone();
    let revision = store.next_revision();

    Ok(Json(json!({
        "apiVersion": api_version,
        "kind": list_kind,
        "metadata": { "resourceVersion": revision },
        "items": deleted.into_values().collect::<Vec<_>>(),
    })))
}

async fn get_crd(
    State(shared): State<Arc<Shared>>,
    Path((group, version, name)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    check_crd_api(&group, &version)?;
    let store = shared.lock();
    let crd = store
        .crds
        .get(&name)
        .ok_or_else(|| ApiError::not_found("customresourcedefinitions", &name))?;
    Ok(Json(crd.clone()))
}

async fn replace_crd(
    State(shared): State<Arc<Shared>>,
    Path((group, version, name)): Path<(String, String, String)>,
    Json(mut crd): Json<Value>,
) -> ApiResult<Json<Value>> {
    check_crd_api(&group, &version)?;
    if object_name(&crd)? != name {
        return Err(ApiError::invalid(
            "metadata.name: Invalid value: does not match the request path",
        ));
    }

    let mut store = shared.lock();
    if !store.crds.contains_key(&name) {
        return Err(ApiError::not_found("customresourcedefinitions", &name));
    }

    let revision = store.next_revision();
    crd["metadata"]["resourceVersion"] = json!(revision);
    store.crds.insert(name.clone(), crd.clone());
    store.validation_updates += 1;
    tracing::debug!(crd = %name, "replaced custom resource definition");

    Ok(Json(crd))
}

fn check_crd_api(group: &str, version: &str) -> ApiResult<()> {
    if group == CRD_GROUP && version == CRD_VERSION {
        Ok(())
    } else {
        Err(ApiError::not_found("customresourcedefinitions", group))
    }
}
