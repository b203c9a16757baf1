//! End-to-end lifecycle tests: a real listener, real workers and a real
//! sweeper, driven over HTTP.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::{sleep, timeout};

use jobq_server::config::{Config, EnvDuration};
use jobq_server::processor::{ProcessError, Processor, SleepProcessor};
use jobq_server::server;

/// Succeeds once `failures` attempts have failed.
struct FlakyProcessor {
    failures: u32,
    attempts: AtomicU32,
}

impl FlakyProcessor {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Processor for FlakyProcessor {
    async fn process(&self, _job: &jobq_common::registry::Job) -> Result<(), ProcessError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(ProcessError::new("synthetic failure"))
        } else {
            Ok(())
        }
    }
}

fn test_config(max_attempts: u32) -> Config {
    Config {
        host: "127.0.0.1".to_owned(),
        port: 0,
        worker_count: 2,
        queue_capacity: 16,
        max_attempts,
        sweeper_interval: EnvDuration(Duration::from_millis(50)),
        request_body_limit: 1_048_576,
        request_timeout: EnvDuration(Duration::from_secs(5)),
        server_shutdown_timeout: EnvDuration(Duration::from_secs(2)),
        processing_duration: EnvDuration(Duration::from_millis(20)),
    }
}

struct Service {
    address: SocketAddr,
    trigger: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<eyre::Result<()>>,
}

impl Service {
    async fn start(config: Config, processor: Arc<dyn Processor>) -> Self {
        let listener = TcpListener::bind(config.bind())
            .await
            .expect("failed to bind test listener");
        let address = listener.local_addr().expect("listener has no address");

        let (trigger, stopped) = oneshot::channel();
        let task = tokio::spawn(server::serve(config, processor, listener, async move {
            stopped.await.ok();
        }));

        Self {
            address,
            trigger,
            task,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.address)
    }

    async fn stop(self) {
        self.trigger.send(()).expect("service already stopped");
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("shutdown took too long")
            .expect("service task panicked")
            .expect("service returned an error");
    }
}

async fn create_job(client: &reqwest::Client, service: &Service) -> String {
    let response = client
        .post(service.url("/jobs"))
        .json(&json!({"type": "email", "payload": {"to": "a@b"}}))
        .send()
        .await
        .expect("create request failed");
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    let body: Value = response.json().await.expect("create body should be json");
    assert_eq!(body["status"], "pending");

    body["id"].as_str().expect("id should be a string").to_owned()
}

async fn wait_for_job(
    client: &reqwest::Client,
    service: &Service,
    id: &str,
    predicate: impl Fn(&Value) -> bool,
) -> Value {
    for _ in 0..200 {
        let jobs: Value = client
            .get(service.url("/jobs"))
            .send()
            .await
            .expect("list request failed")
            .json()
            .await
            .expect("list body should be json");

        let job = jobs
            .as_array()
            .expect("list should be an array")
            .iter()
            .find(|job| job["id"] == id)
            .cloned();

        if let Some(job) = job {
            if predicate(&job) {
                return job;
            }
        }

        sleep(Duration::from_millis(25)).await;
    }

    panic!("job {id} never reached the expected state");
}

async fn fetch_metrics(client: &reqwest::Client, service: &Service) -> Value {
    client
        .get(service.url("/metrics"))
        .send()
        .await
        .expect("metrics request failed")
        .json()
        .await
        .expect("metrics body should be json")
}

#[tokio::test]
async fn test_job_completes_end_to_end() {
    let service = Service::start(
        test_config(3),
        Arc::new(SleepProcessor::new(Duration::from_millis(20))),
    )
    .await;
    let client = reqwest::Client::new();

    let health: Value = client
        .get(service.url("/health"))
        .send()
        .await
        .expect("health request failed")
        .json()
        .await
        .expect("health body should be json");
    assert_eq!(health["status"], "ok");

    let id = create_job(&client, &service).await;
    let job = wait_for_job(&client, &service, &id, |job| job["status"] == "completed").await;

    assert_eq!(job["attempts"], 1);
    assert_eq!(job["last_error"], Value::Null);
    assert_eq!(job["payload"], json!({"to": "a@b"}));

    let metrics = fetch_metrics(&client, &service).await;
    assert_eq!(metrics["total_jobs_created"], 1);
    assert_eq!(metrics["jobs_completed"], 1);
    assert_eq!(metrics["jobs_in_progress"], 0);

    service.stop().await;
}

#[tokio::test]
async fn test_failed_job_retries_until_success() {
    let service = Service::start(test_config(3), Arc::new(FlakyProcessor::new(2))).await;
    let client = reqwest::Client::new();

    let id = create_job(&client, &service).await;
    let job = wait_for_job(&client, &service, &id, |job| job["status"] == "completed").await;

    assert_eq!(job["attempts"], 3);

    let metrics = fetch_metrics(&client, &service).await;
    assert_eq!(metrics["jobs_failed"], 2);
    assert_eq!(metrics["jobs_retried"], 2);
    assert_eq!(metrics["jobs_completed"], 1);

    service.stop().await;
}

#[tokio::test]
async fn test_job_fails_permanently_after_max_attempts() {
    let service = Service::start(test_config(3), Arc::new(FlakyProcessor::new(u32::MAX))).await;
    let client = reqwest::Client::new();

    let id = create_job(&client, &service).await;
    let job = wait_for_job(&client, &service, &id, |job| {
        job["status"] == "failed" && job["attempts"] == 3
    })
    .await;

    assert_eq!(job["last_error"], "synthetic failure");

    // The sweeper must not pick the job up again: metrics settle at two
    // retries and three failures.
    sleep(Duration::from_millis(200)).await;
    let metrics = fetch_metrics(&client, &service).await;
    assert_eq!(metrics["jobs_failed"], 3);
    assert_eq!(metrics["jobs_retried"], 2);
    assert_eq!(metrics["jobs_completed"], 0);

    let job: Value = wait_for_job(&client, &service, &id, |job| job["status"] == "failed").await;
    assert_eq!(job["attempts"], 3);

    service.stop().await;
}

#[tokio::test]
async fn test_server_shuts_down_cleanly_while_processing() {
    let service = Service::start(
        test_config(3),
        Arc::new(SleepProcessor::new(Duration::from_secs(30))),
    )
    .await;
    let client = reqwest::Client::new();

    let id = create_job(&client, &service).await;
    wait_for_job(&client, &service, &id, |job| job["status"] == "processing").await;

    let metrics = fetch_metrics(&client, &service).await;
    assert_eq!(metrics["jobs_in_progress"], 1);

    // The in-flight job far outlives the shutdown budget; the sequence
    // must still finish promptly, failing the job on the way out.
    service.stop().await;
}

#[tokio::test]
async fn test_admissions_rejected_once_shutdown_begins() {
    let config = test_config(3);
    let service = Service::start(
        config,
        Arc::new(SleepProcessor::new(Duration::from_millis(20))),
    )
    .await;
    let client = reqwest::Client::new();

    // Trigger shutdown but keep the service handle alive long enough to
    // observe the very first phase racing against admissions.
    let address = service.address;
    let stop_task = tokio::spawn(async move {
        service.stop().await;
    });

    // Whichever side of the race each request lands on, the only possible
    // outcomes are 201 (still accepting), 503 (admissions closed) or a
    // connection error (listener gone).
    for _ in 0..10 {
        let result = client
            .post(format!("http://{address}/jobs"))
            .json(&json!({"type": "email", "payload": {}}))
            .send()
            .await;

        if let Ok(response) = result {
            let status = response.status();
            assert!(
                status == reqwest::StatusCode::CREATED
                    || status == reqwest::StatusCode::SERVICE_UNAVAILABLE,
                "unexpected status during shutdown: {status}"
            );
        }
    }

    timeout(Duration::from_secs(5), stop_task)
        .await
        .expect("shutdown took too long")
        .expect("shutdown task panicked");
}
