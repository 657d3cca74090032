// crates/core/tests/agent_pipeline.rs

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_shim_core::loader::AgentPipeline;
use agent_shim_core::{
    CapabilityClient, ChatMessage, Environment, InMemoryCapabilityClient, LoadStage,
    RuntimeContext, ShimError,
};

const ECHO_AGENT: &str = r#"
(module
  (import "host" "get_last_message" (func $last (param i32 i32 i32 i32) (result i32)))
  (import "host" "add_reply" (func $reply (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "user")
  (func (export "default")
    (local $n i32)
    (local.set $n (call $last (i32.const 0) (i32.const 4) (i32.const 1024) (i32.const 4096)))
    (if (i32.gt_s (local.get $n) (i32.const 0))
      (then (drop (call $reply (i32.const 1024) (local.get $n)))))))
"#;

fn reply_agent(text: &str) -> String {
    format!(
        r#"
(module
  (import "host" "add_reply" (func $reply (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "{text}")
  (func (export "default")
    (drop (call $reply (i32.const 0) (i32.const {len})))))
"#,
        len = text.len()
    )
}

fn assert_scratch_empty(scratch: &Path) {
    let left: Vec<_> = fs::read_dir(scratch).unwrap().collect();
    assert!(left.is_empty(), "run directories left behind: {left:?}");
}

fn write(dir: &Path, name: &str, source: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, source).unwrap();
    path
}

fn environment(client: Arc<InMemoryCapabilityClient>) -> Environment {
    let client: Arc<dyn CapabilityClient> = client;
    Environment::new(Arc::new(RuntimeContext::with_client("t-1", client)))
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_agent_replies_with_last_user_message() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(src.path(), "agent.wat", ECHO_AGENT);

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    client.push_message("user", "ping");

    let report = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client.clone()))
        .await
        .unwrap();

    assert!(report.invoked);
    assert_eq!(report.entry, entry);
    assert!(report.capability_errors.is_empty());
    assert_scratch_empty(scratch.path());

    let messages = client.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, "assistant");
    assert_eq!(messages[1].content, "ping");
}

#[tokio::test(flavor = "multi_thread")]
async fn entry_imports_sibling_module() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    write(
        src.path(),
        "helpers.wat",
        r#"(module (func (export "answer") (result i32) (i32.const 42)))"#,
    );
    let entry = write(
        src.path(),
        "agent.wat",
        r#"
(module
  (import "helpers" "answer" (func $answer (result i32)))
  (import "host" "add_reply" (func $reply (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "forty-two")
  (func (export "default")
    (if (i32.eq (call $answer) (i32.const 42))
      (then (drop (call $reply (i32.const 0) (i32.const 9)))))))
"#,
    );

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    let report = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client.clone()))
        .await
        .unwrap();

    assert!(report.invoked);
    assert_scratch_empty(scratch.path());
    assert_eq!(client.messages()[0].content, "forty-two");
}

#[tokio::test(flavor = "multi_thread")]
async fn module_without_default_export_is_not_invoked() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(src.path(), "agent.wat", r#"(module (func (export "other")))"#);

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    let report = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client))
        .await
        .unwrap();

    assert!(!report.invoked);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_export_output_is_captured() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(
        src.path(),
        "agent.wat",
        r#"
(module
  (import "wasi_snapshot_preview1" "fd_write"
    (func $fd_write (param i32 i32 i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "\08\00\00\00\06\00\00\00")
  (data (i32.const 8) "hello\n")
  (func (export "_start")
    (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 100)))))
"#,
    );

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    let report = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client))
        .await
        .unwrap();

    assert!(report.invoked);
    assert_eq!(report.stdout, "hello\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_capability_is_reported_not_trapped() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(
        src.path(),
        "agent.wat",
        r#"
(module
  (import "host" "completion" (func $complete (param i32 i32 i32 i32) (result i32)))
  (import "host" "add_reply" (func $reply (param i32 i32) (result i32)))
  (memory (export "memory") 1)
  (data (i32.const 0) "[{\"role\":\"user\",\"content\":\"hi\"}]")
  (data (i32.const 512) "failed")
  (func (export "default")
    (if (i32.eq
          (call $complete (i32.const 0) (i32.const 32) (i32.const 1024) (i32.const 1024))
          (i32.const -4))
      (then (drop (call $reply (i32.const 512) (i32.const 6)))))))
"#,
    );

    let client = Arc::new(
        InMemoryCapabilityClient::new("t-1").with_responder(Arc::new(|_: &[ChatMessage]| {
            Err(ShimError::remote(Some(503), "model overloaded"))
        })),
    );
    let report = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client.clone()))
        .await
        .unwrap();

    assert!(report.invoked);
    assert_eq!(report.capability_errors.len(), 1);
    assert!(report.capability_errors[0].contains("model overloaded"));
    assert_eq!(client.completion_requests()[0][0].content, "hi");
    assert_eq!(client.messages()[0].content, "failed");
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_source_fails_translation() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(src.path(), "agent.wat", "(module (func");

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    let err = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client))
        .await
        .unwrap_err();

    match err {
        ShimError::AgentLoad { file, stage, .. } => {
            assert_eq!(file, entry);
            assert_eq!(stage, LoadStage::Translate);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn trapping_agent_fails_invoke() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(
        src.path(),
        "agent.wat",
        r#"(module (func (export "default") unreachable))"#,
    );

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    let err = AgentPipeline::new(scratch.path())
        .prepare_and_run(&entry, environment(client))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ShimError::AgentLoad {
            stage: LoadStage::Invoke,
            ..
        }
    ));
    assert_scratch_empty(scratch.path());
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_runs_share_scratch_dir() {
    let scratch = tempfile::tempdir().unwrap();
    let src_a = tempfile::tempdir().unwrap();
    let src_b = tempfile::tempdir().unwrap();
    let entry_a = write(src_a.path(), "agent.wat", &reply_agent("A"));
    let entry_b = write(src_b.path(), "agent.wat", &reply_agent("B"));

    for _ in 0..8 {
        let client_a = Arc::new(InMemoryCapabilityClient::new("t-a"));
        let client_b = Arc::new(InMemoryCapabilityClient::new("t-b"));
        let pipeline_a = AgentPipeline::new(scratch.path());
        let pipeline_b = AgentPipeline::new(scratch.path());

        let (a, b) = tokio::join!(
            pipeline_a.prepare_and_run(&entry_a, environment(client_a.clone())),
            pipeline_b.prepare_and_run(&entry_b, environment(client_b.clone())),
        );
        assert!(a.unwrap().invoked);
        assert!(b.unwrap().invoked);

        let replies_a: Vec<_> = client_a.messages().into_iter().map(|m| m.content).collect();
        let replies_b: Vec<_> = client_b.messages().into_iter().map(|m| m.content).collect();
        assert_eq!(replies_a, ["A"]);
        assert_eq!(replies_b, ["B"]);
    }
    assert_scratch_empty(scratch.path());
}

#[tokio::test(flavor = "multi_thread")]
async fn fuel_bounds_runaway_agent() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(
        src.path(),
        "agent.wat",
        r#"(module (func (export "default") (loop $spin (br $spin))))"#,
    );

    let client = Arc::new(InMemoryCapabilityClient::new("t-1"));
    let err = AgentPipeline::new(scratch.path())
        .with_fuel(10_000)
        .prepare_and_run(&entry, environment(client))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ShimError::AgentLoad {
            stage: LoadStage::Invoke,
            ..
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_launches_agent() {
    let src = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let entry = write(src.path(), "agent.wat", ECHO_AGENT);

    let config = serde_json::json!({
        "thread_id": "t-fixture",
        "client": "local",
        "scratch_dir": scratch.path(),
        "fixture": { "messages": [{ "role": "user", "content": "from fixture" }] }
    });

    let ctx = Arc::new(RuntimeContext::new());
    let run = ctx
        .initialize(&config.to_string(), &entry)
        .unwrap()
        .expect("first initialize launches");
    let report = run.await.unwrap().expect("agent run succeeds");
    assert!(report.invoked);

    let messages = ctx
        .client()
        .unwrap()
        .list_messages(None, None, agent_shim_core::SortOrder::Ascending)
        .await
        .unwrap();
    assert_eq!(messages.last().unwrap().content, "from fixture");
    assert_eq!(messages.last().unwrap().role, "assistant");
}
