use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::{Command, Output};
use std::sync::Arc;
use vizbridge::remote::RemoteClient;
use vizbridge::{
    ApplyOutcome, BridgeConfig, BridgeError, DataRef, LoadState, QueryOrchestrator, Row, Schema,
    VisualizationSpec,
};

const CARS_CSV: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/test/cars.csv");
const CARS_JSON: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/test/cars.json");
const CARS_SPEC: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/test/cars_spec.json");

/// In-memory stand-in for the remote store. Records every call it serves.
#[derive(Default)]
struct FakeStore {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    calls: Mutex<Vec<String>>,
    query_rows: Vec<Row>,
    fail_insert: bool,
    recommend_bodies: Mutex<Vec<Value>>,
}

type Shared = Arc<FakeStore>;

fn name_of(body: &Value) -> String {
    body["name"].as_str().unwrap_or_default().to_string()
}

async fn check_exists(State(store): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let name = name_of(&body);
    store.calls.lock().push(format!("checkExistsSql {}", name));
    let exists = store.tables.lock().contains_key(&name);
    Json(json!({ "exists": exists }))
}

async fn create(State(store): State<Shared>, Json(body): Json<Value>) -> StatusCode {
    let name = name_of(&body);
    assert!(body["data"].is_object(), "createSql needs a representative row");
    store.calls.lock().push(format!("createSql {}", name));
    store.tables.lock().insert(name, Vec::new());
    StatusCode::OK
}

async fn insert(
    State(store): State<Shared>,
    Json(body): Json<Value>,
) -> Result<StatusCode, (StatusCode, String)> {
    let name = name_of(&body);
    let rows: Vec<Row> = serde_json::from_value(body["data"].clone()).unwrap();
    store.calls.lock().push(format!("insertSql {} {}", name, rows.len()));
    if store.fail_insert {
        return Err((StatusCode::INTERNAL_SERVER_ERROR, "disk full".to_string()));
    }
    store.tables.lock().entry(name).or_default().extend(rows);
    Ok(StatusCode::OK)
}

async fn build(State(store): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let name = name_of(&body);
    store.calls.lock().push(format!("build {}", name));
    let rows = store.tables.lock().get(&name).cloned().unwrap_or_default();
    Json(serde_json::to_value(Schema::infer(&rows)).unwrap())
}

async fn query(State(store): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let sql = body["data"]["query"].as_str().unwrap_or_default().to_string();
    store.calls.lock().push(format!("querySql {}", sql));
    Json(json!({ "rows": store.query_rows }))
}

fn recommendation() -> Value {
    json!({
        "plots": [{"mark": "bar", "encoding": {"x": {"field": "Origin"}}}],
        "score": 0.5
    })
}

async fn recommend(State(store): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    store.calls.lock().push("recommend".to_string());
    store.recommend_bodies.lock().push(body);
    Json(recommendation())
}

async fn spawn_store(store: Shared) -> String {
    let app = Router::new()
        .route("/checkExistsSql", post(check_exists))
        .route("/createSql", post(create))
        .route("/insertSql", post(insert))
        .route("/build", post(build))
        .route("/querySql", post(query))
        .route("/recommend", post(recommend))
        .with_state(store);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_remote_recommend_passes_through() {
    let store = Arc::new(FakeStore::default());
    let url = spawn_store(store.clone()).await;
    let client = RemoteClient::new(format!("{}/", url), None).unwrap();

    let rows = numbered_rows(3);
    let schema = Schema::infer(&rows);
    let query = json!({"mark": "?", "encodings": [{"channel": "x", "field": "label"}]});
    let data = json!({"name": "numbers"});

    let reply = client.recommend(&query, &schema, &data).await.unwrap();

    assert_eq!(reply, recommendation());
    assert_eq!(*store.calls.lock(), vec!["recommend"]);
    let bodies = store.recommend_bodies.lock();
    assert_eq!(bodies.len(), 1);
    let body = bodies[0].as_object().unwrap();
    let mut keys: Vec<&str> = body.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["data", "query", "schema"]);
    assert_eq!(body["query"], query);
    assert_eq!(body["data"], data);
    assert_eq!(body["schema"], serde_json::to_value(&schema).unwrap());
}

fn numbered_rows(n: usize) -> Vec<Row> {
    (0..n)
        .map(|i| match json!({"id": i % 10, "label": format!("r{:02}", i)}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        })
        .collect()
}

fn remote_orchestrator(url: String, chunk_bytes: usize) -> QueryOrchestrator {
    let config = BridgeConfig {
        chunk_bytes,
        request_timeout_secs: Some(10),
        ..BridgeConfig::default()
    }
    .with_server_url(url);
    QueryOrchestrator::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_remote_load_creates_and_inserts_in_chunks() {
    let store = Arc::new(FakeStore::default());
    let url = spawn_store(store.clone()).await;

    let rows = numbered_rows(25);
    let row_bytes = serde_json::to_vec(&rows[0]).unwrap().len();
    let orchestrator = remote_orchestrator(url, row_bytes * 10 + row_bytes - 1);

    let data = DataRef::Inline {
        values: Value::Array(rows.into_iter().map(Value::Object).collect()),
        name: Some("numbers".to_string()),
    };
    let dataset = orchestrator.load_dataset("numbers", &data).await.unwrap();

    assert_eq!(
        *store.calls.lock(),
        vec![
            "checkExistsSql numbers",
            "createSql numbers",
            "insertSql numbers 10",
            "insertSql numbers 10",
            "insertSql numbers 5",
            "build numbers",
        ]
    );
    assert_eq!(store.tables.lock()["numbers"].len(), 25);
    assert!(dataset.rows.is_empty());
    let schema = dataset.schema.unwrap();
    assert_eq!(schema.field_names().collect::<Vec<_>>(), vec!["id", "label"]);
    assert_eq!(orchestrator.state(), LoadState::Received);
}

#[tokio::test]
async fn test_remote_existing_table_is_not_reingested() {
    let store = Arc::new(FakeStore::default());
    store.tables.lock().insert("numbers".to_string(), numbered_rows(3));
    let url = spawn_store(store.clone()).await;
    let orchestrator = remote_orchestrator(url, 1024);

    let data = DataRef::Inline {
        values: json!([{"id": 1}]),
        name: None,
    };
    orchestrator.load_dataset("numbers", &data).await.unwrap();

    assert_eq!(*store.calls.lock(), vec!["checkExistsSql numbers", "build numbers"]);
    assert_eq!(store.tables.lock()["numbers"].len(), 3);
}

#[tokio::test]
async fn test_remote_url_dataset_is_fetched_and_ingested() {
    let store = Arc::new(FakeStore::default());
    let url = spawn_store(store.clone()).await;
    let orchestrator = remote_orchestrator(url, 10 * 1024 * 1024);

    let data = DataRef::Url {
        url: CARS_JSON.to_string(),
        name: None,
    };
    orchestrator.load_dataset("cars", &data).await.unwrap();

    assert_eq!(
        *store.calls.lock(),
        vec!["checkExistsSql cars", "createSql cars", "insertSql cars 7", "build cars"]
    );
}

#[tokio::test]
async fn test_remote_query_publishes_rows() {
    let rows = vec![
        json!({"origin": "USA", "avg": 145.0}),
        json!({"origin": "Japan", "avg": 91.5}),
    ]
    .into_iter()
    .map(|v| match v {
        Value::Object(map) => map,
        _ => unreachable!(),
    })
    .collect();
    let store = Arc::new(FakeStore {
        query_rows: rows,
        ..Default::default()
    });
    let url = spawn_store(store.clone()).await;
    let orchestrator = remote_orchestrator(url, 1024);

    let spec = VisualizationSpec::from_json_str(&std::fs::read_to_string(CARS_SPEC).unwrap()).unwrap();
    let outcome = orchestrator.apply_spec(spec).await.unwrap();

    let ApplyOutcome::Published(view) = outcome else {
        panic!("expected a published view");
    };
    assert_eq!(view.rows.len(), 2);
    assert_eq!(
        *store.calls.lock(),
        vec!["querySql SELECT Origin, avg(Horsepower) FROM cars GROUP BY Origin;"]
    );
    let spec = view.spec.clone().unwrap();
    let y = spec.encoding.get(vizbridge::Channel::Y).unwrap();
    assert_eq!(y.field, "avg");
    assert!(!y.is_aggregate());
}

#[tokio::test]
async fn test_remote_insert_failure_stops_ingest() {
    let store = Arc::new(FakeStore {
        fail_insert: true,
        ..Default::default()
    });
    let url = spawn_store(store.clone()).await;
    let rows = numbered_rows(25);
    let row_bytes = serde_json::to_vec(&rows[0]).unwrap().len();
    let orchestrator = remote_orchestrator(url, row_bytes * 10);

    let data = DataRef::Inline {
        values: Value::Array(rows.into_iter().map(Value::Object).collect()),
        name: None,
    };
    let err = orchestrator.load_dataset("numbers", &data).await.unwrap_err();

    match err {
        BridgeError::Ingest { offset, source, .. } => {
            assert_eq!(offset, 0);
            assert!(matches!(*source, BridgeError::Status { status: 500, ref body, .. } if body == "disk full"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(
        *store.calls.lock(),
        vec!["checkExistsSql numbers", "createSql numbers", "insertSql numbers 10"]
    );
    assert!(matches!(orchestrator.state(), LoadState::Failed(_)));
}

#[tokio::test]
async fn test_unreachable_store_fails_without_fallback() {
    let orchestrator = remote_orchestrator("http://127.0.0.1:1".to_string(), 1024);
    let err = orchestrator
        .load_dataset("cars", &DataRef::named("cars"))
        .await
        .unwrap_err();
    assert!(matches!(err, BridgeError::Transport { .. }), "{:?}", err);
}

/// Run the vizbridge binary without inheriting a store URL from the
/// environment.
fn run_vizbridge(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_vizbridge"))
        .args(args)
        .env_remove("VIZBRIDGE_SERVER_URL")
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to spawn vizbridge")
}

fn stdout_json(output: &Output) -> Value {
    assert!(
        output.status.success(),
        "vizbridge failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

#[test]
fn test_cli_translate_shorthand() {
    let output = run_vizbridge(&[
        "translate",
        "--table",
        "cars",
        "--encoding",
        "x: Origin, y: mean(Horsepower)",
    ]);
    let value = stdout_json(&output);
    assert_eq!(value["sql"], "SELECT Origin, avg(Horsepower) FROM cars GROUP BY Origin;");
    assert_eq!(value["spec"]["encoding"]["y"]["field"], "avg");
    assert_eq!(value["spec"]["encoding"]["x"]["field"], "origin");
}

#[test]
fn test_cli_translate_spec_file() {
    let output = run_vizbridge(&["translate", "--spec", CARS_SPEC]);
    let value = stdout_json(&output);
    assert_eq!(value["sql"], "SELECT Origin, avg(Horsepower) FROM cars GROUP BY Origin;");
    assert_eq!(value["spec"]["mark"], "bar");
    assert_eq!(value["spec"]["encoding"]["y"]["aggregate"], "");
    assert!(value["spec"]["encoding"]["x"].get("aggregate").is_none());
}

#[test]
fn test_cli_rejects_unknown_channel() {
    let output = run_vizbridge(&["translate", "--table", "cars", "--encoding", "tooltip: Name"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown encoding channel 'tooltip'"));
}

#[test]
fn test_cli_local_query_over_csv() {
    let output = run_vizbridge(&[
        "query",
        "--name",
        "cars",
        "--data",
        CARS_CSV,
        "--encoding",
        "x: Origin, y: count()",
    ]);
    let value = stdout_json(&output);
    assert_eq!(value["sql"], "SELECT Origin, count(*) FROM cars GROUP BY Origin;");
    assert_eq!(
        value["rows"],
        json!([
            {"origin": "USA", "count": 3},
            {"origin": "Japan", "count": 2},
            {"origin": "Europe", "count": 2}
        ])
    );
}

#[test]
fn test_cli_local_load_prints_schema() {
    let output = run_vizbridge(&["load", "--name", "cars", "--data", CARS_JSON]);
    let value = stdout_json(&output);
    let names: Vec<&str> = value["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Name", "Origin", "Horsepower", "Cylinders"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cli_remote_load() {
    let store = Arc::new(FakeStore::default());
    let url = spawn_store(store.clone()).await;

    let output = tokio::task::spawn_blocking(move || {
        run_vizbridge(&["--server", &url, "load", "--name", "cars", "--data", CARS_CSV])
    })
    .await
    .unwrap();
    stdout_json(&output);

    assert_eq!(
        *store.calls.lock(),
        vec!["checkExistsSql cars", "createSql cars", "insertSql cars 7", "build cars"]
    );
}
