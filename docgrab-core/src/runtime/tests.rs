#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::sync::Semaphore;

    use crate::runtime::admission::Admission;
    use crate::runtime::coordinator::{Coordinator, CoordinatorConfig};
    use crate::runtime::extractor::{interpret_output, resolve_artifact, tail, Extractor};
    use crate::runtime::storage::TaskStore;
    use crate::runtime::types::{
        validate_url, Artifact, CoordinatorError, TaskFailure, TaskId, TaskStatus, TaskStatusView,
    };

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// Extractor whose outcome is chosen by the URL path:
    /// `/ok/<name>` completes, `/fail` fails, `/hang` never finishes,
    /// `/panic` panics, `/gated` waits for a permit on `gate`.
    struct FakeExtractor {
        gate: Arc<Semaphore>,
    }

    impl FakeExtractor {
        fn new() -> Self {
            Self { gate: Arc::new(Semaphore::new(0)) }
        }
    }

    #[async_trait]
    impl Extractor for FakeExtractor {
        async fn extract(&self, url: &str) -> Result<Artifact, TaskFailure> {
            let path = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
            let path = path.split_once('/').map(|(_, p)| p).unwrap_or("");
            match path.split('/').collect::<Vec<_>>().as_slice() {
                ["ok", name] => Ok(Artifact::new(*name, format!("pdf for {url}").into_bytes())),
                ["fail"] => Err(TaskFailure::ExitCode { code: 2, tail: "boom".into() }),
                ["hang"] => std::future::pending().await,
                ["panic"] => panic!("extractor exploded"),
                ["gated", name] => {
                    let _permit = self.gate.acquire().await.map_err(|e| TaskFailure::Io(e.to_string()))?;
                    Ok(Artifact::new(*name, b"gated".to_vec()))
                }
                _ => Err(TaskFailure::MissingMarker),
            }
        }
    }

    fn coordinator(extractor: FakeExtractor, config: CoordinatorConfig) -> Coordinator {
        Coordinator::new(config, Arc::new(extractor))
    }

    async fn wait_terminal(coordinator: &Coordinator, id: TaskId) -> TaskStatusView {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let view = coordinator.status(id).await;
                if view.status.is_terminal() {
                    break view;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("task should finish within 5 s")
    }

    // ── Types ─────────────────────────────────────────────────────────────────

    #[test]
    fn accepts_http_and_https_only() {
        assert_eq!(validate_url("https://www.scribd.com/document/1"), Ok("https://www.scribd.com/document/1"));
        assert!(validate_url("http://example.com").is_ok());
        assert_eq!(validate_url("ftp://example.com"), Err(CoordinatorError::InvalidUrl));
        assert_eq!(validate_url("example.com"), Err(CoordinatorError::InvalidUrl));
        assert_eq!(validate_url(""), Err(CoordinatorError::InvalidUrl));
    }

    #[test]
    fn status_view_omits_error_unless_failed() {
        let json = serde_json::to_value(TaskStatusView::processing()).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "processing" }));

        let json = serde_json::to_value(TaskStatusView::error("bad")).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "error", "error": "bad" }));

        assert_eq!(TaskStatus::Unknown.as_ref(), "unknown");
    }

    #[test]
    fn task_id_round_trips_through_string() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("not-a-uuid".parse::<TaskId>().is_err());
    }

    #[test]
    fn download_name_strips_directories() {
        assert_eq!(Artifact::new("output/My Doc.pdf", Vec::new()).download_name(), "My Doc.pdf");
        assert_eq!(Artifact::new("out.pdf", Vec::new()).download_name(), "out.pdf");
    }

    // ── Output contract ───────────────────────────────────────────────────────

    #[test]
    fn nonzero_exit_reports_code_and_last_five_lines() {
        let output = lines(&["L1", "L2", "L3", "L4", "L5", "L6", "L7", "L8"]);
        let err = interpret_output(Some(2), &output).unwrap_err();
        assert_eq!(
            err,
            TaskFailure::ExitCode { code: 2, tail: "L4\nL5\nL6\nL7\nL8".into() }
        );
        assert_eq!(err.to_string(), "Command failed with exit code 2\nL4\nL5\nL6\nL7\nL8");
    }

    #[test]
    fn short_output_keeps_every_line_in_tail() {
        assert_eq!(tail(&lines(&["only"]), 5), "only");
        assert_eq!(tail(&[], 5), "");
    }

    #[test]
    fn first_generated_line_names_the_artifact() {
        let output = lines(&[
            "Downloading...",
            "Generated: output/first.pdf",
            "Generated: output/second.pdf",
        ]);
        assert_eq!(interpret_output(Some(0), &output).unwrap(), "output/first.pdf");
    }

    #[test]
    fn success_without_marker_is_a_contract_violation() {
        let output = lines(&["done", "generated: lowercase does not count"]);
        let err = interpret_output(Some(0), &output).unwrap_err();
        assert_eq!(err, TaskFailure::MissingMarker);
        assert_eq!(err.to_string(), "No Generated file found in output");

        let err = interpret_output(Some(0), &lines(&["Generated:   "])).unwrap_err();
        assert_eq!(err, TaskFailure::MissingMarker);
    }

    #[test]
    fn signal_termination_has_no_exit_code() {
        let err = interpret_output(None, &lines(&["a"])).unwrap_err();
        assert!(matches!(err, TaskFailure::Signalled { .. }));
    }

    #[test]
    fn artifact_path_must_stay_in_work_dir() {
        let dir = std::path::Path::new("/srv/extractor");
        assert_eq!(
            resolve_artifact(dir, "output/a.pdf").unwrap(),
            dir.join("output/a.pdf")
        );
        assert!(matches!(
            resolve_artifact(dir, "../secret.pdf"),
            Err(TaskFailure::EscapesWorkDir { .. })
        ));
        assert!(matches!(
            resolve_artifact(dir, "/etc/passwd"),
            Err(TaskFailure::EscapesWorkDir { .. })
        ));
    }

    // ── Admission control ─────────────────────────────────────────────────────

    #[test]
    fn admission_rejects_beyond_limit_and_recovers() {
        let admission = Admission::new(1, 1);
        assert_eq!(admission.limit(), 2);

        let p1 = admission.try_admit().expect("first permit");
        let _p2 = admission.try_admit().expect("second permit");
        let err = admission.try_admit().unwrap_err();
        assert!(matches!(err, CoordinatorError::Busy { running: 2, limit: 2 }));

        drop(p1);
        assert_eq!(admission.in_flight(), 1);
        let _p3 = admission.try_admit().expect("permit after release");
    }

    // ── Store ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn terminal_transition_happens_once() {
        let store = TaskStore::new(8, Duration::from_secs(60));
        let id = store.create("https://a").await.unwrap();

        assert!(store.complete(id, Artifact::new("a.pdf", b"A".to_vec())).await);
        assert!(!store.fail(id, TaskFailure::MissingMarker).await);
        assert!(!store.complete(id, Artifact::new("b.pdf", b"B".to_vec())).await);

        assert_eq!(store.status(id).await, TaskStatusView::completed());
        assert_eq!(store.artifact(id).await.unwrap().filename, "a.pdf");
    }

    #[tokio::test]
    async fn full_store_evicts_oldest_finished_but_never_processing() {
        let store = TaskStore::new(2, Duration::from_secs(3600));
        let a = store.create("https://a").await.unwrap();
        let b = store.create("https://b").await.unwrap();

        let err = store.create("https://c").await.unwrap_err();
        assert_eq!(err, CoordinatorError::StoreFull { capacity: 2 });

        store.fail(b, TaskFailure::MissingMarker).await;
        let c = store.create("https://c").await.unwrap();

        assert_eq!(store.status(b).await.status, TaskStatus::Unknown);
        assert_eq!(store.status(a).await.status, TaskStatus::Processing);
        assert_eq!(store.status(c).await.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_finished_records() {
        let store = TaskStore::new(8, Duration::from_secs(60));
        let old = store.create("https://old").await.unwrap();
        let fresh = store.create("https://fresh").await.unwrap();
        let running = store.create("https://running").await.unwrap();

        store.fail(old, TaskFailure::MissingMarker).await;
        store.complete(fresh, Artifact::new("f.pdf", Vec::new())).await;
        store
            .set_finished_at(old, Utc::now() - chrono::Duration::seconds(120))
            .await;

        assert_eq!(store.sweep_at(Utc::now()).await, 1);
        assert_eq!(store.status(old).await.status, TaskStatus::Unknown);
        assert_eq!(store.status(fresh).await.status, TaskStatus::Completed);
        assert_eq!(store.status(running).await.status, TaskStatus::Processing);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn subscribers_see_terminal_state() {
        let store = TaskStore::new(8, Duration::from_secs(60));
        let id = store.create("https://a").await.unwrap();
        let mut rx = store.subscribe(id).await.expect("task exists");
        assert_eq!(rx.borrow_and_update().status, TaskStatus::Processing);

        store.fail(id, TaskFailure::Cancelled).await;
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow(), TaskStatusView::error("Task cancelled"));
    }

    // ── Coordinator ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn unknown_ids_are_unknown_and_not_retrievable() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        let id = TaskId::new();
        assert_eq!(c.status(id).await, TaskStatusView::unknown());
        assert!(c.retrieve(id).await.is_none());
        assert_eq!(c.status_str("garbage").await.status, TaskStatus::Unknown);
        assert!(c.retrieve_str("garbage").await.is_none());
    }

    #[tokio::test]
    async fn invalid_url_creates_no_task() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        assert_eq!(c.submit("file:///etc/passwd").await, Err(CoordinatorError::InvalidUrl));
        assert!(c.store().is_empty().await);
    }

    #[tokio::test]
    async fn submissions_get_unique_ids() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        let mut seen = HashSet::new();
        for _ in 0..10 {
            let id = c.submit("https://host/ok/a.pdf").await.unwrap();
            assert!(seen.insert(id), "id reused");
            wait_terminal(&c, id).await;
        }
    }

    #[tokio::test]
    async fn concurrent_submissions_are_independent() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        let (good, bad) = tokio::join!(c.submit("https://host/ok/good.pdf"), c.submit("https://host/fail"));
        let (good, bad) = (good.unwrap(), bad.unwrap());

        assert_eq!(wait_terminal(&c, good).await, TaskStatusView::completed());
        let failed = wait_terminal(&c, bad).await;
        assert_eq!(failed.error.as_deref(), Some("Command failed with exit code 2\nboom"));

        let artifact = c.retrieve(good).await.expect("completed task has artifact");
        assert_eq!(artifact.filename, "good.pdf");
        assert_eq!(&artifact.content[..], b"pdf for https://host/ok/good.pdf");
        assert!(c.retrieve(bad).await.is_none());
    }

    #[tokio::test]
    async fn processing_task_is_not_retrievable() {
        let extractor = FakeExtractor::new();
        let gate = Arc::clone(&extractor.gate);
        let c = coordinator(extractor, CoordinatorConfig::default());

        let id = c.submit("https://host/gated/late.pdf").await.unwrap();
        assert_eq!(c.status(id).await.status, TaskStatus::Processing);
        assert!(c.retrieve(id).await.is_none());

        gate.add_permits(1);
        assert_eq!(wait_terminal(&c, id).await.status, TaskStatus::Completed);
        assert_eq!(c.retrieve(id).await.unwrap().filename, "late.pdf");
    }

    #[tokio::test]
    async fn full_pool_rejects_with_busy() {
        let extractor = FakeExtractor::new();
        let gate = Arc::clone(&extractor.gate);
        let config = CoordinatorConfig { max_concurrent: 1, queue_capacity: 1, ..Default::default() };
        let c = coordinator(extractor, config);

        let running = c.submit("https://host/gated/1.pdf").await.unwrap();
        let queued = c.submit("https://host/gated/2.pdf").await.unwrap();
        let err = c.submit("https://host/gated/3.pdf").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Busy { limit: 2, .. }));
        assert_eq!(c.store().len().await, 2);

        gate.add_permits(2);
        wait_terminal(&c, running).await;
        wait_terminal(&c, queued).await;
        assert!(c.submit("https://host/ok/4.pdf").await.is_ok());
    }

    #[tokio::test]
    async fn cancel_marks_processing_task_failed() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        let id = c.submit("https://host/hang").await.unwrap();

        assert!(c.cancel(id).await);
        assert_eq!(c.status(id).await, TaskStatusView::error("Task cancelled"));
        assert!(!c.cancel(id).await, "already finished");
        assert!(!c.cancel(TaskId::new()).await, "unknown id");
    }

    #[tokio::test]
    async fn timeout_fails_hung_task() {
        let config = CoordinatorConfig {
            timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let c = coordinator(FakeExtractor::new(), config);
        let id = c.submit("https://host/hang").await.unwrap();

        let view = wait_terminal(&c, id).await;
        assert_eq!(view.status, TaskStatus::Error);
        assert_eq!(view.error.as_deref(), Some("Command timed out after 50ms"));
    }

    #[tokio::test]
    async fn panicking_extractor_still_finishes_task() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        let id = c.submit("https://host/panic").await.unwrap();
        let view = wait_terminal(&c, id).await;
        assert_eq!(view.error.as_deref(), Some("Unexpected error: worker panicked"));
    }

    #[tokio::test]
    async fn list_reports_every_task() {
        let c = coordinator(FakeExtractor::new(), CoordinatorConfig::default());
        let id = c.submit("https://host/ok/listed.pdf").await.unwrap();
        wait_terminal(&c, id).await;

        let tasks = c.list().await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, id);
        assert_eq!(tasks[0].status, TaskStatus::Completed);
        assert_eq!(tasks[0].filename.as_deref(), Some("listed.pdf"));
        assert!(tasks[0].finished_at.is_some());
    }

    // ── External command ──────────────────────────────────────────────────────

    #[cfg(unix)]
    mod command {
        use super::*;
        use crate::runtime::extractor::CommandExtractor;
        use tracing_test::traced_test;

        fn sh(dir: &std::path::Path, script: &str) -> CommandExtractor {
            // `sh -c SCRIPT sh URL` exposes the URL as `$1`.
            CommandExtractor::new("sh", dir).args(["-c", script, "sh"])
        }

        #[tokio::test]
        #[traced_test]
        async fn generated_file_is_read_from_work_dir() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "printf '%%PDF-1.4 body' > out.pdf; echo 'Saving...'; echo 'Generated: out.pdf'");

            let artifact = ex.extract("https://example.com/doc").await.unwrap();
            assert_eq!(artifact.filename, "out.pdf");
            assert_eq!(&artifact.content[..], b"%PDF-1.4 body");
        }

        #[tokio::test]
        async fn url_is_passed_as_last_argument() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "echo \"$1\" > url.txt; echo \"Generated: url.txt\"");

            let url = "https://example.com/a b;rm -rf /";
            let artifact = ex.extract(url).await.unwrap();
            assert_eq!(String::from_utf8_lossy(&artifact.content), format!("{url}\n"));
        }

        #[tokio::test]
        async fn failing_command_reports_tail() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "for i in 1 2 3 4 5 6 7 8; do echo \"L$i\"; done; exit 2");

            let err = ex.extract("https://example.com").await.unwrap_err();
            assert_eq!(err, TaskFailure::ExitCode { code: 2, tail: "L4\nL5\nL6\nL7\nL8".into() });
        }

        #[tokio::test]
        async fn interleaved_stdout_and_stderr_keep_their_order() {
            let dir = tempfile::tempdir().unwrap();
            let script = r#"
                i=1
                while [ $i -le 400 ]; do
                    if [ $((i % 2)) -eq 1 ]; then echo "L$i"; else echo "L$i" >&2; fi
                    i=$((i + 1))
                done
                exit 2
            "#;
            let ex = sh(dir.path(), script);

            for _ in 0..5 {
                let err = ex.extract("https://example.com").await.unwrap_err();
                assert_eq!(
                    err,
                    TaskFailure::ExitCode { code: 2, tail: "L396\nL397\nL398\nL399\nL400".into() }
                );
            }
        }

        #[tokio::test]
        async fn stderr_is_part_of_the_output() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "echo 'fatal: no browser' >&2; exit 3");

            let err = ex.extract("https://example.com").await.unwrap_err();
            assert_eq!(err, TaskFailure::ExitCode { code: 3, tail: "fatal: no browser".into() });
        }

        #[tokio::test]
        async fn success_without_marker_fails() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "echo done");
            assert_eq!(ex.extract("https://example.com").await.unwrap_err(), TaskFailure::MissingMarker);
        }

        #[tokio::test]
        async fn marker_pointing_at_missing_file_fails() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "echo 'Generated: ghost.pdf'");

            let err = ex.extract("https://example.com").await.unwrap_err();
            let expected = dir.path().join("ghost.pdf").display().to_string();
            assert_eq!(err, TaskFailure::MissingArtifact { path: expected });
        }

        #[tokio::test]
        async fn missing_program_is_a_launch_failure() {
            let dir = tempfile::tempdir().unwrap();
            let ex = CommandExtractor::new("/nonexistent/docgrab-extractor", dir.path());
            let err = ex.extract("https://example.com").await.unwrap_err();
            assert!(matches!(err, TaskFailure::Launch(_)));
            assert!(err.to_string().starts_with("Subprocess error: "));
        }

        #[tokio::test]
        async fn coordinator_runs_real_command_end_to_end() {
            let dir = tempfile::tempdir().unwrap();
            let ex = sh(dir.path(), "mkdir -p output && printf PDF > output/doc.pdf && echo 'Generated: output/doc.pdf'");
            let c = Coordinator::new(CoordinatorConfig::default(), Arc::new(ex));

            let id = c.submit("https://example.com/document/42").await.unwrap();
            assert_eq!(wait_terminal(&c, id).await, TaskStatusView::completed());
            let artifact = c.retrieve(id).await.unwrap();
            assert_eq!(artifact.filename, "output/doc.pdf");
            assert_eq!(artifact.download_name(), "doc.pdf");
            assert_eq!(&artifact.content[..], b"PDF");
        }

        /// Gone or a zombie waiting to be reaped.
        #[cfg(target_os = "linux")]
        fn is_dead(pid: &str) -> bool {
            match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
                Err(_) => true,
                Ok(stat) => stat.rsplit(')').next().is_some_and(|rest| rest.trim_start().starts_with('Z')),
            }
        }

        /// `sh` backgrounds a `sleep` that shares its output pipe and
        /// records its pid, then waits on it.
        const SPAWNS_GRANDCHILD: &str = "sleep 30 & echo $! > grandchild.pid; wait";

        async fn grandchild_pid(dir: &std::path::Path) -> String {
            let path = dir.join("grandchild.pid");
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if let Ok(pid) = tokio::fs::read_to_string(&path).await {
                        if !pid.trim().is_empty() {
                            break pid.trim().to_owned();
                        }
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("grandchild pid written")
        }

        #[cfg(target_os = "linux")]
        async fn assert_dies(pid: &str) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while !is_dead(pid) {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                }
            })
            .await
            .expect("grandchild should be killed with its process group");
        }

        #[tokio::test]
        async fn timeout_kills_the_whole_process_group() {
            let dir = tempfile::tempdir().unwrap();
            let config = CoordinatorConfig {
                timeout: Some(Duration::from_millis(500)),
                ..Default::default()
            };
            let c = Coordinator::new(config, Arc::new(sh(dir.path(), SPAWNS_GRANDCHILD)));

            let id = c.submit("https://example.com").await.unwrap();
            let pid = grandchild_pid(dir.path()).await;
            let view = wait_terminal(&c, id).await;
            assert_eq!(view.error.as_deref(), Some("Command timed out after 500ms"));

            #[cfg(target_os = "linux")]
            assert_dies(&pid).await;
            #[cfg(not(target_os = "linux"))]
            let _ = pid;
        }

        #[tokio::test]
        async fn cancel_kills_the_whole_process_group() {
            let dir = tempfile::tempdir().unwrap();
            let c = Coordinator::new(
                CoordinatorConfig::default(),
                Arc::new(sh(dir.path(), SPAWNS_GRANDCHILD)),
            );

            let id = c.submit("https://example.com").await.unwrap();
            let pid = grandchild_pid(dir.path()).await;
            assert!(c.cancel(id).await);
            assert_eq!(c.status(id).await, TaskStatusView::error("Task cancelled"));

            #[cfg(target_os = "linux")]
            assert_dies(&pid).await;
            #[cfg(not(target_os = "linux"))]
            let _ = pid;
        }
    }
}
