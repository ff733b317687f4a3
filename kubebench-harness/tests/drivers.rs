use std::collections::BTreeSet;
use std::time::Duration;

use kubebench_harness::bench::{cleanup_scenario, run_scenario};
use kubebench_harness::client::{self, ListOptions, SharedClient};
use kubebench_harness::driver;
use kubebench_harness::environment::{Environment, Settle};
use kubebench_harness::resource::{GroupVersionResource, ResourceDescriptor};
use kubebench_harness::scenario::{LARGE_DATA_NAMESPACE, Resolver, Templates};
use kubebench_harness::template::Template;
use kubebench_harness::{Error, Measurement, Workloads};
use kubebench_test::server::TestServer;
use serde_json::Value;

async fn prepared(server: &TestServer, namespace: &str) -> Environment {
    let settle = Settle {
        timeout: Duration::from_secs(5),
        interval: Duration::from_millis(10),
    };
    let environment = Environment::new(server.client(), settle);
    environment.ensure_namespace(namespace).await.unwrap();
    environment
}

fn connect(server: &TestServer, descriptor: ResourceDescriptor) -> SharedClient {
    let template = match descriptor {
        ResourceDescriptor::Dynamic(ref gvr) if *gvr == GroupVersionResource::foos() => {
            Template::foo().unwrap()
        }
        _ => Template::endpoints().unwrap(),
    };
    client::connect(
        server.client(),
        &descriptor,
        "empty",
        &template,
        ListOptions::consistent(),
    )
    .unwrap()
}

fn foos(server: &TestServer) -> SharedClient {
    connect(
        server,
        ResourceDescriptor::Dynamic(GroupVersionResource::foos()),
    )
}

fn names(objects: &[Value]) -> BTreeSet<String> {
    objects
        .iter()
        .map(|object| object["metadata"]["name"].as_str().unwrap().to_owned())
        .collect()
}

#[tokio::test]
async fn create_latency_times_every_call() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;

    let report = driver::create_latency(&foos(&server), 5).await.unwrap();

    assert_eq!(report.timings.count(), 5);
    assert_eq!(server.objects("empty", "foos").len(), 5);
}

#[tokio::test]
async fn create_throughput_uses_unique_names() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;

    let report = driver::create_throughput(&foos(&server), 50).await.unwrap();
    assert_eq!(report.count, 50);
    assert!(report.per_second() > 0.0);

    let objects = server.objects("empty", "foos");
    assert_eq!(objects.len(), 50);
    assert_eq!(names(&objects).len(), 50);
}

#[tokio::test]
async fn list_populates_before_timing() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = foos(&server);

    let report = driver::list(&client, 20, 3).await.unwrap();

    assert_eq!(report.timings.count(), 3);
    assert_eq!(client.list().await.unwrap().len(), 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watch_delivers_every_event_to_every_watcher() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = foos(&server);

    // Objects created before the watch must not be delivered.
    client.create(0).await.unwrap();

    let report = driver::watch(&client, 20, 5).await.unwrap();

    assert_eq!(report.watchers, 20);
    assert_eq!(report.events, 5);
    assert_eq!(report.deliveries, 100);
    assert_eq!(server.objects("empty", "foos").len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watch_closed_early_fails_run() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = foos(&server);
    server.close_watches_after(2);

    let result = tokio::time::timeout(Duration::from_secs(10), driver::watch(&client, 3, 5))
        .await
        .expect("watch run did not finish");

    let Err(err) = result else {
        panic!("watch run succeeded on closed streams");
    };
    assert!(
        matches!(err, Error::WatchClosed { seen: 2, expected: 5 }),
        "{err:?}"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn watch_error_event_fails_run() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = foos(&server);
    server.fail_watches_after(0);

    let result = tokio::time::timeout(Duration::from_secs(10), driver::watch(&client, 3, 5))
        .await
        .expect("watch run did not finish");

    let Err(err) = result else {
        panic!("watch run succeeded despite error events");
    };
    assert!(
        matches!(err, Error::Kube(kube::Error::Api(ref response)) if response.code == 410),
        "{err:?}"
    );
}

#[tokio::test]
async fn watch_starts_from_consistent_version() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = client::connect(
        server.client(),
        &ResourceDescriptor::Dynamic(GroupVersionResource::foos()),
        "empty",
        &Template::foo().unwrap(),
        ListOptions::any(),
    )
    .unwrap();

    client.list().await.unwrap();
    let stream = client.watch().await.unwrap();
    stream.stop();

    assert_eq!(server.list_versions(), [Some("0".to_owned()), None]);
}

#[tokio::test]
async fn not_found_resource_fails_at_server() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = connect(
        &server,
        ResourceDescriptor::Dynamic(GroupVersionResource::not_found()),
    );

    let err = driver::create_latency(&client, 3).await.unwrap_err();
    assert!(matches!(err, Error::Kube(kube::Error::Api(response)) if response.code == 404));
}

#[tokio::test]
async fn typed_and_dynamic_clients_are_equivalent() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;

    let typed = connect(&server, ResourceDescriptor::Endpoints);
    let dynamic = connect(
        &server,
        ResourceDescriptor::Dynamic(GroupVersionResource::endpoints()),
    );

    let normalize = |mut value: Value| {
        let metadata = value["metadata"].as_object_mut().unwrap();
        metadata.remove("name");
        metadata.remove("uid");
        metadata.remove("resourceVersion");
        value
    };

    let from_typed = normalize(typed.create(0).await.unwrap().to_value().unwrap());
    let from_dynamic = normalize(dynamic.create(1).await.unwrap().to_value().unwrap());
    assert_eq!(from_typed, from_dynamic);
    assert_eq!(from_typed["kind"], "Endpoints");

    assert_eq!(typed.count().await.unwrap(), 2);
    assert_eq!(dynamic.count().await.unwrap(), 2);
}

#[tokio::test]
async fn delete_collection_empties_collection() {
    let server = TestServer::new().await;
    prepared(&server, "empty").await;
    let client = connect(&server, ResourceDescriptor::Endpoints);

    driver::create_throughput(&client, 10).await.unwrap();
    client.delete_collection().await.unwrap();

    assert!(client.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn runs_resolved_scenario() {
    kubebench_test::tracing::init();
    let server = TestServer::new().await;
    let environment = prepared(&server, "empty").await;

    let mut resolver = Resolver::builder(Templates::builtin().unwrap())
        .large_data_size(2_000)
        .seed(3)
        .build();
    let scenario = resolver
        .resolve("CreateThroughput_CR_Validation_LargeData")
        .unwrap();
    let workloads = Workloads {
        throughput_fanout: 10,
        ..Default::default()
    };

    let measurement = run_scenario(server.client(), &environment, &scenario, &workloads)
        .await
        .unwrap();
    assert!(matches!(measurement, Measurement::CreateThroughput(ref report) if report.count == 10));

    // The enlarged payload passes the installed validation rule.
    assert_eq!(server.validation_updates(), 1);
    let objects = server.objects(LARGE_DATA_NAMESPACE, "foos");
    assert_eq!(objects.len(), 10);
    let data = objects[0]["spec"]["data"].as_str().unwrap();
    assert!(data.len() >= 1_999);

    cleanup_scenario(server.client(), &scenario).await.unwrap();
    assert!(server.objects(LARGE_DATA_NAMESPACE, "foos").is_empty());
}
