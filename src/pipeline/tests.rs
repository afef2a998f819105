use super::*;
use crate::apply::ApplyOutcome;
use crate::llm::models::{EngineReply, EngineRequest};
use crate::llm::testing::{serve_once, ScriptedEngine};
use crate::llm::{EngineClient, EngineSettings};
use crate::workspace::{DirEntry, FsWorkspace, Workspace};
use serde_json::json;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::sync::mpsc;

/// Delays every reply so tests can overlap or cancel tasks.
struct SlowEngine {
    delay: Duration,
    inner: ScriptedEngine,
}

impl CompletionEngine for SlowEngine {
    async fn complete(&self, request: &EngineRequest) -> SpliceResult<EngineReply> {
        tokio::time::sleep(self.delay).await;
        self.inner.complete(request).await
    }
}

fn workspace(files: &[(&str, &str)]) -> (TempDir, FsWorkspace) {
    let dir = tempdir().unwrap();
    for (name, content) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }
    let ws = FsWorkspace::new(dir.path());
    (dir, ws)
}

fn symbols_reply(symbols: serde_json::Value) -> SpliceResult<String> {
    Ok(json!({ "symbols": symbols }).to_string())
}

fn edits_reply(files: serde_json::Value) -> SpliceResult<String> {
    Ok(json!({ "files": files }).to_string())
}

fn snapshot(root: &Path) -> Vec<(String, String)> {
    let mut files: Vec<(String, String)> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.path().components().any(|c| c.as_os_str() == STATE_DIR))
        .map(|e| {
            (
                e.path().display().to_string(),
                fs::read_to_string(e.path()).unwrap_or_default(),
            )
        })
        .collect();
    files.sort();
    files
}

#[tokio::test]
async fn test_full_task_updates_selected_declaration() {
    let (dir, ws) = workspace(&[
        ("a.py", "def foo():\n    pass\n\n\ndef bar():\n    return 2\n"),
        ("b.py", "class Unrelated:\n    pass\n"),
    ]);
    let engine = ScriptedEngine::new(vec![
        symbols_reply(json!([{
            "file": dir.path().join("a.py").display().to_string(),
            "kind": "Function",
            "name": "foo",
            "description": "the function to change",
            "parent_signature": ""
        }])),
        edits_reply(json!([{
            "file_name": "a.py",
            "description": "return one",
            "code": "def foo():\n    \"\"\"Return one.\"\"\"\n    return 1\n",
            "user_message": "foo now returns 1",
            "update_mode": "update_element",
            "parent_signature": null,
            "target_file": null
        }])),
    ]);
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let report = pipeline
        .run("  make foo return 1 ", &CancelToken::new(), Some(&tx))
        .await
        .unwrap();
    drop(tx);

    assert_eq!(
        fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "def foo():\n    \"\"\"Return one.\"\"\"\n    return 1\n\n\ndef bar():\n    return 2\n"
    );
    assert_eq!(report.applied.len(), 1);
    assert!(report.failed.is_empty());
    assert!(!report.cancelled);
    assert_eq!(report.index.file_count, 2);
    assert_eq!(report.changed_files(), vec![dir.path().join("a.py")]);
    assert!(matches!(report.applied[0].outcome, ApplyOutcome::ElementReplaced { .. }));
    assert!(report.finished_at >= report.started_at);

    let mut kinds = Vec::new();
    while let Some(event) = rx.recv().await {
        kinds.push(match event {
            PipelineEvent::IndexBuilt(_) => "index",
            PipelineEvent::SymbolsSelected(_) => "selected",
            PipelineEvent::ContextAssembled { blocks, .. } => {
                assert_eq!(blocks, 1);
                "context"
            }
            PipelineEvent::EditsGenerated(_) => "generated",
            PipelineEvent::EditApplied(_) => "applied",
            PipelineEvent::EditFailed { .. } => "failed",
        });
    }
    assert_eq!(kinds, vec!["index", "selected", "context", "generated", "applied"]);

    let requests = pipeline.engine.inner_requests();
    assert_eq!(requests.len(), 2);
    // Filter sees the index; the generator sees the selected source.
    assert!(requests[0].messages[1].content.contains("Function: foo"));
    assert!(requests[1].messages[1].content.contains("def foo():\n    pass"));
    assert_eq!(requests[1].messages[2].content, "make foo return 1");
}

#[tokio::test]
async fn test_http_failure_aborts_before_any_write() {
    let (dir, ws) = workspace(&[("a.py", "def foo():\n    pass")]);
    let before = snapshot(dir.path());

    let (endpoint, _server) = serve_once(500, "{\"error\": \"internal\"}".to_string()).await;
    let client = EngineClient::new(EngineSettings {
        api_key: "sk-test".to_string(),
        model: "m".to_string(),
        endpoint,
        timeout: Duration::from_secs(5),
    })
    .unwrap();
    let pipeline = Pipeline::new(client, ws, PipelineSettings::default());

    let err = pipeline.run("anything", &CancelToken::new(), None).await.unwrap_err();
    assert!(matches!(err, SpliceError::EngineRequest { status: Some(500), .. }));
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_generation_failure_leaves_workspace_untouched() {
    let (dir, ws) = workspace(&[("a.py", "def foo():\n    pass\n")]);
    let before = snapshot(dir.path());
    let engine = ScriptedEngine::new(vec![
        symbols_reply(json!([])),
        Ok("{\"files\": \"not a list\"}".to_string()),
    ]);
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let err = pipeline.run("t", &CancelToken::new(), None).await.unwrap_err();
    assert!(matches!(err, SpliceError::EngineResponseShape { .. }));
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_empty_selection_still_generates_without_context() {
    let (dir, ws) = workspace(&[("a.py", "x = 1\n")]);
    let engine = ScriptedEngine::new(vec![
        symbols_reply(json!([])),
        edits_reply(json!([{
            "file_name": "snake.py",
            "description": "new game",
            "code": "def main():\n    pass\n",
            "user_message": "created snake.py",
            "update_mode": null,
            "parent_signature": null,
            "target_file": null
        }])),
    ]);
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let report = pipeline.run("write a snake game", &CancelToken::new(), None).await.unwrap();
    assert_eq!(report.applied[0].outcome, ApplyOutcome::FileCreated);
    assert_eq!(
        fs::read_to_string(dir.path().join("snake.py")).unwrap(),
        "def main():\n    pass\n"
    );
    let requests = pipeline.engine.inner_requests();
    assert_eq!(requests[1].messages.len(), 2);
}

#[tokio::test]
async fn test_failed_edit_does_not_stop_the_batch() {
    let (dir, ws) = workspace(&[("a.py", "def foo():\n    pass\n")]);
    let engine = ScriptedEngine::new(vec![
        symbols_reply(json!([])),
        edits_reply(json!([
            {
                "file_name": "a.py", "description": "", "code": "def missing():\n    pass",
                "user_message": "", "update_mode": "update_element",
                "parent_signature": null, "target_file": null
            },
            {
                "file_name": "a.py", "description": "", "code": "def extra():\n    pass",
                "user_message": "", "update_mode": "create_element",
                "parent_signature": null, "target_file": null
            }
        ])),
    ]);
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let report = pipeline.run("t", &CancelToken::new(), None).await.unwrap();
    assert_eq!(report.failed.len(), 1);
    assert!(report.failed[0].error.contains("def missing"));
    assert_eq!(report.applied.len(), 1);
    assert_eq!(
        fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "def foo():\n    pass\n\n\ndef extra():\n    pass\n"
    );
}

#[tokio::test]
async fn test_empty_task_is_rejected_before_any_work() {
    let (_dir, ws) = workspace(&[]);
    let pipeline = Pipeline::new(ScriptedEngine::new(vec![]), ws, PipelineSettings::default());
    let err = pipeline.run(" \n\t", &CancelToken::new(), None).await.unwrap_err();
    assert!(matches!(err, SpliceError::EmptyTask));
    assert!(pipeline.engine.inner_requests().is_empty());
}

#[tokio::test]
async fn test_overlapping_run_is_busy() {
    let (_dir, ws) = workspace(&[("a.py", "def foo():\n    pass\n")]);
    let engine = SlowEngine {
        delay: Duration::from_millis(300),
        inner: ScriptedEngine::new(vec![symbols_reply(json!([])), edits_reply(json!([]))]),
    };
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let first_cancel = CancelToken::new();
    let first = pipeline.run("first", &first_cancel, None);
    let second = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        pipeline.run("second", &CancelToken::new(), None).await
    };
    let (first, second) = tokio::join!(first, second);
    assert!(first.is_ok());
    assert!(matches!(second, Err(SpliceError::Busy)));
}

#[tokio::test]
async fn test_queued_run_waits_for_the_first() {
    let (_dir, ws) = workspace(&[("a.py", "def foo():\n    pass\n")]);
    let engine = SlowEngine {
        delay: Duration::from_millis(50),
        inner: ScriptedEngine::new(vec![
            symbols_reply(json!([])),
            edits_reply(json!([])),
            symbols_reply(json!([])),
            edits_reply(json!([])),
        ]),
    };
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let first_cancel = CancelToken::new();
    let first = pipeline.run("first", &first_cancel, None);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.run_queued("second", &CancelToken::new(), None).await
    };
    let (first, second) = tokio::join!(first, second);
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(pipeline.engine.inner_requests().len(), 4);
}

#[tokio::test]
async fn test_other_process_lock_is_busy() {
    let (dir, ws) = workspace(&[("a.py", "x = 1\n")]);
    let _held = TaskLock::acquire(dir.path()).unwrap();
    let pipeline = Pipeline::new(ScriptedEngine::new(vec![]), ws, PipelineSettings::default());
    let err = pipeline.run("t", &CancelToken::new(), None).await.unwrap_err();
    assert!(matches!(err, SpliceError::Busy));
}

#[tokio::test]
async fn test_cancel_during_engine_call_writes_nothing() {
    let (dir, ws) = workspace(&[("a.py", "def foo():\n    pass\n")]);
    let before = snapshot(dir.path());
    let engine = SlowEngine {
        delay: Duration::from_secs(30),
        inner: ScriptedEngine::new(vec![symbols_reply(json!([]))]),
    };
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());
    let cancel = CancelToken::new();
    let remote = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        remote.cancel();
    });

    let err = pipeline.run("t", &cancel, None).await.unwrap_err();
    assert!(matches!(err, SpliceError::Cancelled));
    assert_eq!(snapshot(dir.path()), before);
}

#[tokio::test]
async fn test_queued_run_cancelled_while_waiting() {
    let (_dir, ws) = workspace(&[("a.py", "def foo():\n    pass\n")]);
    let engine = SlowEngine {
        delay: Duration::from_millis(200),
        inner: ScriptedEngine::new(vec![symbols_reply(json!([])), edits_reply(json!([]))]),
    };
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let first_cancel = CancelToken::new();
    let queued_cancel = CancelToken::new();
    let remote = queued_cancel.clone();
    let first = pipeline.run("first", &first_cancel, None);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        pipeline.run_queued("second", &queued_cancel, None).await
    };
    let cancel_later = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        remote.cancel();
    };
    let (first, second, ()) = tokio::join!(first, second, cancel_later);
    assert!(first.is_ok());
    assert!(matches!(second, Err(SpliceError::Cancelled)));
    // The queued task never reached the engine.
    assert_eq!(pipeline.engine.inner_requests().len(), 2);
}

/// Cancels its token as soon as the first file is written.
struct CancelOnWrite {
    inner: FsWorkspace,
    cancel: CancelToken,
}

impl Workspace for CancelOnWrite {
    fn root(&self) -> &Path {
        self.inner.root()
    }

    fn read_file(&self, path: &Path) -> io::Result<Option<String>> {
        self.inner.read_file(path)
    }

    fn write_file(&self, path: &Path, content: &str) -> io::Result<()> {
        self.inner.write_file(path, content)?;
        self.cancel.cancel();
        Ok(())
    }

    fn list_children(&self, dir: &Path) -> io::Result<Vec<DirEntry>> {
        self.inner.list_children(dir)
    }

    fn create_file(&self, relative: &Path, content: &str) -> io::Result<PathBuf> {
        let path = self.inner.create_file(relative, content)?;
        self.cancel.cancel();
        Ok(path)
    }
}

#[tokio::test]
async fn test_cancel_between_edits_keeps_committed_work() {
    let (dir, inner) = workspace(&[
        ("a.py", "def foo():\n    pass\n"),
        ("b.py", "def bar():\n    pass\n"),
    ]);
    let cancel = CancelToken::new();
    let ws = CancelOnWrite {
        inner,
        cancel: cancel.clone(),
    };
    let engine = ScriptedEngine::new(vec![
        symbols_reply(json!([])),
        edits_reply(json!([
            {
                "file_name": "a.py", "description": "", "code": "def foo():\n    return 1",
                "user_message": "", "update_mode": "update_element",
                "parent_signature": null, "target_file": null
            },
            {
                "file_name": "b.py", "description": "", "code": "def bar():\n    return 2",
                "user_message": "", "update_mode": "update_element",
                "parent_signature": null, "target_file": null
            }
        ])),
    ]);
    let pipeline = Pipeline::new(engine, ws, PipelineSettings::default());

    let report = pipeline.run("t", &cancel, None).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.applied.len(), 1);
    assert!(report.failed.is_empty());
    assert_eq!(
        fs::read_to_string(dir.path().join("a.py")).unwrap(),
        "def foo():\n    return 1\n"
    );
    assert_eq!(
        fs::read_to_string(dir.path().join("b.py")).unwrap(),
        "def bar():\n    pass\n"
    );
}

trait InnerRequests {
    fn inner_requests(&self) -> Vec<EngineRequest>;
}

impl InnerRequests for ScriptedEngine {
    fn inner_requests(&self) -> Vec<EngineRequest> {
        self.requests()
    }
}

impl InnerRequests for SlowEngine {
    fn inner_requests(&self) -> Vec<EngineRequest> {
        self.inner.requests()
    }
}
