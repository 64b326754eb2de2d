//! Scenario tests for the summary poller.

#[cfg(test)]
mod tests {
    use crate::errors::{HostError, PollerError};
    use crate::events::{MockNotifier, ModelConfig, NotificationKind};
    use crate::poller::{
        PollResponse, SummaryPoller, SummaryRequest, SummaryResult, SummaryStatus, SummaryUpdate,
        TIMEOUT_MESSAGE,
    };
    use crate::testing::{
        fast_poller_options, test_model, test_request, InMemoryResultStore, PollerFixture,
        ScriptedWorker, UpdateRecorder,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    async fn wait_for(recorder: &Arc<UpdateRecorder>, status: SummaryStatus) -> SummaryUpdate {
        tokio::time::timeout(Duration::from_secs(3600), recorder.wait_for(status))
            .await
            .unwrap_or_else(|_| panic!("no {status} update, saw {:?}", recorder.statuses()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_completed_markdown_is_displayed() {
        let fx = PollerFixture::new();
        fx.worker
            .script_ok("m1", [PollResponse::completed(json!({ "markdown": "# Summary" }))]);
        let recorder = UpdateRecorder::new();

        let handle = fx
            .poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        assert_eq!(handle.process_id, "process-1");

        let done = wait_for(&recorder, SummaryStatus::Completed).await;
        assert_eq!(
            done.result.as_ref().and_then(SummaryResult::as_markdown),
            Some("# Summary")
        );
        assert_eq!(
            recorder.statuses(),
            vec![SummaryStatus::Processing, SummaryStatus::Completed]
        );
        assert_eq!(fx.poller.status("m1"), SummaryStatus::Completed);
        assert_eq!(fx.poller.last_result("m1"), done.result);
        assert!(fx.poller.active_sessions().is_empty());

        let successes = fx.notifier.of_kind(NotificationKind::Success);
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].title, "Summary generated");
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_updates_and_legacy_sections() {
        let fx = PollerFixture::new();
        fx.worker.script_ok(
            "m1",
            [
                PollResponse::status("processing"),
                PollResponse::status("summarizing"),
                PollResponse::completed(json!({
                    "MeetingName": "Release planning",
                    "KeyItems": { "title": "Key Items", "blocks": [
                        { "id": "k1", "type": "bullet", "content": " Ship Friday " }
                    ]},
                    "_section_order": ["KeyItems"]
                })),
            ],
        );
        let recorder = UpdateRecorder::new();

        fx.poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        let done = wait_for(&recorder, SummaryStatus::Completed).await;

        assert_eq!(
            recorder.statuses(),
            vec![
                SummaryStatus::Processing,
                SummaryStatus::Processing,
                SummaryStatus::Summarizing,
                SummaryStatus::Completed,
            ]
        );
        let messages: Vec<_> = recorder
            .updates()
            .into_iter()
            .map(|u| u.message)
            .collect();
        assert_eq!(messages[0].as_deref(), Some("Processing transcript..."));
        assert_eq!(messages[2].as_deref(), Some("Generating summary..."));

        let result = done.result.unwrap();
        assert_eq!(result.meeting_title.as_deref(), Some("Release planning"));
        let sections = result.sections().unwrap();
        assert_eq!(sections[0].title, "Key Items");
        assert_eq!(sections[0].blocks[0].content, "Ship Friday");
        assert_eq!(fx.worker.poll_count("m1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_regeneration_restores_persisted_summary() {
        let fx = PollerFixture::new();
        fx.store.insert("m1", SummaryResult::markdown("old"));
        fx.worker.script_ok(
            "m1",
            [
                PollResponse::status("processing"),
                PollResponse::failed("LLM timeout"),
            ],
        );
        let recorder = UpdateRecorder::new();

        fx.poller
            .regenerate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        let done = wait_for(&recorder, SummaryStatus::Completed).await;

        assert_eq!(
            done.result.as_ref().and_then(SummaryResult::as_markdown),
            Some("old")
        );
        assert_eq!(done.error, None);
        assert_eq!(
            recorder.statuses(),
            vec![
                SummaryStatus::Regenerating,
                SummaryStatus::Regenerating,
                SummaryStatus::Completed,
            ]
        );
        assert_eq!(
            recorder.updates()[0].message.as_deref(),
            Some("Regenerating summary...")
        );
        assert_eq!(fx.poller.status("m1"), SummaryStatus::Completed);

        let errors = fx.notifier.of_kind(NotificationKind::Error);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].title, "Summary regeneration failed");
        assert!(errors[0].body.as_deref().unwrap_or_default().contains("LLM timeout"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_regeneration_without_backup_reports_error() {
        let fx = PollerFixture::new();
        fx.worker
            .script_ok("m1", [PollResponse::failed("LLM timeout")]);
        let recorder = UpdateRecorder::new();

        fx.poller
            .regenerate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        let failed = wait_for(&recorder, SummaryStatus::Error).await;

        assert_eq!(failed.error.as_deref(), Some("LLM timeout"));
        assert_eq!(fx.poller.status("m1"), SummaryStatus::Error);
        assert_eq!(fx.notifier.settings_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_falls_back_to_error() {
        let fx = PollerFixture::new();
        fx.store.fail_with(HostError::message("database locked"));
        fx.worker.script_ok("m1", [PollResponse::failed("boom")]);
        let recorder = UpdateRecorder::new();

        fx.poller
            .regenerate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        let failed = wait_for(&recorder, SummaryStatus::Error).await;

        assert_eq!(failed.error.as_deref(), Some("boom"));
        assert_eq!(fx.store.load_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_failure_with_missing_model_opens_settings() {
        let fx = PollerFixture::new();
        fx.worker.script_ok(
            "m1",
            [PollResponse::failed("Summary model not configured")],
        );
        let recorder = UpdateRecorder::new();

        fx.poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        let failed = wait_for(&recorder, SummaryStatus::Error).await;

        assert_eq!(failed.error.as_deref(), Some("Summary model not configured"));
        assert_eq!(fx.notifier.settings_requests(), 1);
        assert_eq!(fx.store.load_count(), 0);
        let errors = fx.notifier.of_kind(NotificationKind::Error);
        assert_eq!(errors[0].title, "Summary generation failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_session_supersedes_previous() {
        let fx = PollerFixture::new();
        let first = UpdateRecorder::new();
        let second = UpdateRecorder::new();

        let first_handle = fx
            .poller
            .generate(test_request("m1"), first.callback())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        let seen_by_first = first.updates().len();
        assert_eq!(seen_by_first, 2);

        let second_handle = fx
            .poller
            .regenerate(test_request("m1"), second.callback())
            .await
            .unwrap();
        assert_ne!(first_handle.session_id, second_handle.session_id);
        fx.worker
            .script_ok("m1", [PollResponse::completed(json!({ "markdown": "# New" }))]);

        wait_for(&second, SummaryStatus::Completed).await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(first.updates().len(), seen_by_first);
        assert_eq!(
            second.statuses(),
            vec![SummaryStatus::Regenerating, SummaryStatus::Completed]
        );
        // One poll from the first session, one from the second.
        assert_eq!(fx.worker.poll_count("m1"), 2);
        assert!(fx.poller.active_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_error() {
        let fx = PollerFixture::with_options(
            fast_poller_options().with_timeout(Duration::from_secs(30)),
        );
        let recorder = UpdateRecorder::new();

        fx.poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        let failed = wait_for(&recorder, SummaryStatus::Error).await;

        assert_eq!(failed.error.as_deref(), Some(TIMEOUT_MESSAGE));
        assert_eq!(fx.worker.poll_count("m1"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_remote_and_resets_to_idle() {
        let fx = PollerFixture::new();
        let recorder = UpdateRecorder::new();

        fx.poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(fx.poller.is_active("m1"));

        assert!(fx.poller.stop("m1").await);
        assert_eq!(fx.worker.cancels(), vec!["m1".to_string()]);
        assert_eq!(fx.poller.status("m1"), SummaryStatus::Idle);
        assert_eq!(recorder.last().map(|u| u.status), Some(SummaryStatus::Idle));

        let polls = fx.worker.poll_count("m1");
        let updates = recorder.updates().len();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.worker.poll_count("m1"), polls);
        assert_eq!(recorder.updates().len(), updates);
        assert!(!fx.poller.is_active("m1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cleans_up_when_remote_cancel_fails() {
        let fx = PollerFixture::new();
        fx.worker.fail_cancel(HostError::message("worker unreachable"));
        let recorder = UpdateRecorder::new();

        fx.poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();

        assert!(fx.poller.stop("m1").await);
        assert_eq!(fx.poller.status("m1"), SummaryStatus::Idle);
        assert!(fx.poller.active_sessions().is_empty());
        assert!(!fx.poller.stop("m1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all() {
        let fx = PollerFixture::new();
        for meeting in ["a", "b", "c"] {
            fx.poller
                .generate(test_request(meeting), |_| {})
                .await
                .unwrap();
        }
        assert_eq!(fx.poller.active_sessions().len(), 3);

        assert_eq!(fx.poller.stop_all().await, 3);
        assert!(fx.poller.active_sessions().is_empty());
        let mut cancels = fx.worker.cancels();
        cancels.sort();
        assert_eq!(cancels, vec!["a", "b", "c"]);
        assert_eq!(fx.poller.stop_all().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_cancel_restores_or_goes_idle() {
        let fx = PollerFixture::new();
        fx.store.insert("m1", SummaryResult::markdown("kept"));
        fx.worker
            .script_ok("m1", [PollResponse::status("cancelled")]);
        fx.worker
            .script_ok("m2", [PollResponse::status("cancelled")]);
        let restored = UpdateRecorder::new();
        let idle = UpdateRecorder::new();

        fx.poller
            .generate(test_request("m1"), restored.callback())
            .await
            .unwrap();
        fx.poller
            .generate(test_request("m2"), idle.callback())
            .await
            .unwrap();

        let done = wait_for(&restored, SummaryStatus::Completed).await;
        assert_eq!(
            done.result.as_ref().and_then(SummaryResult::as_markdown),
            Some("kept")
        );
        wait_for(&idle, SummaryStatus::Idle).await;
        assert_eq!(fx.poller.status("m2"), SummaryStatus::Idle);
        assert_eq!(fx.notifier.of_kind(NotificationKind::Info).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let fx = PollerFixture::new();
        fx.worker.fail_next_submit(HostError::message("network error"));
        fx.worker.script(
            "m1",
            [
                Err(HostError::message("upstream status: 503")),
                Ok(PollResponse::completed(json!({ "markdown": "ok" }))),
            ],
        );
        let recorder = UpdateRecorder::new();

        let handle = fx
            .poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap();
        wait_for(&recorder, SummaryStatus::Completed).await;

        assert_eq!(handle.process_id, "process-1");
        assert_eq!(fx.worker.submissions().len(), 2);
        assert_eq!(fx.worker.poll_count("m1"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_submit_failure() {
        let fx = PollerFixture::new();
        fx.worker
            .fail_next_submit(HostError::message("invalid transcript, status: 400"));
        let recorder = UpdateRecorder::new();

        let err = fx
            .poller
            .generate(test_request("m1"), recorder.callback())
            .await
            .unwrap_err();

        match err {
            PollerError::Submit {
                meeting_id,
                message,
            } => {
                assert_eq!(meeting_id, "m1");
                assert_eq!(message, "invalid transcript, status: 400");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fx.worker.submissions().len(), 1);
        assert_eq!(
            recorder.statuses(),
            vec![SummaryStatus::Processing, SummaryStatus::Error]
        );
        assert!(fx.poller.active_sessions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_requests_are_rejected() {
        let fx = PollerFixture::new();

        let empty = SummaryRequest::new("m1", "   ", ModelConfig::new("ollama", "llama3.2"));
        assert!(matches!(
            fx.poller.generate(empty, |_| {}).await,
            Err(PollerError::InvalidRequest(_))
        ));

        let no_model = SummaryRequest::new("m1", "text", ModelConfig::default());
        assert!(matches!(
            fx.poller.generate(no_model, |_| {}).await,
            Err(PollerError::InvalidRequest(_))
        ));
        assert_eq!(fx.notifier.settings_requests(), 1);
        assert!(fx.worker.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_model_notifies_and_opens_settings() {
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n| n.kind == NotificationKind::Error && n.title == "Summary model not configured")
            .times(1)
            .return_const(());
        notifier.expect_request_model_settings().times(1).return_const(());
        let worker = Arc::new(ScriptedWorker::new());
        let poller = SummaryPoller::new(
            worker.clone(),
            Arc::new(InMemoryResultStore::new()),
            Arc::new(notifier),
            fast_poller_options(),
        );

        let request = SummaryRequest::new("m1", "text", ModelConfig::new("ollama", ""));
        assert!(matches!(
            poller.generate(request, |_| {}).await,
            Err(PollerError::InvalidRequest(_))
        ));
        assert!(worker.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_may_shut_down_the_poller() {
        let fx = PollerFixture::new();
        fx.worker
            .script_ok("m1", [PollResponse::completed(json!({ "markdown": "done" }))]);
        fx.poller
            .generate(test_request("m2"), |_| {})
            .await
            .unwrap();

        let recorder = UpdateRecorder::new();
        let record = recorder.callback();
        let poller = fx.poller.clone();
        fx.poller
            .generate(test_request("m1"), move |update| {
                if update.status == SummaryStatus::Completed {
                    poller.shutdown();
                }
                record(update);
            })
            .await
            .unwrap();

        let done = wait_for(&recorder, SummaryStatus::Completed).await;
        assert_eq!(
            done.result.as_ref().and_then(SummaryResult::as_markdown),
            Some("done")
        );
        assert!(fx.poller.active_sessions().is_empty());

        let polls = fx.worker.poll_count("m2");
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fx.worker.poll_count("m2"), polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_meeting_id_is_trimmed_everywhere() {
        let fx = PollerFixture::new();
        let request = SummaryRequest::new(" m1 ", "text", test_model());

        let handle = fx.poller.generate(request, |_| {}).await.unwrap();
        assert_eq!(handle.meeting_id, "m1");
        assert_eq!(fx.worker.submissions()[0].meeting_id, "m1");
        assert!(fx.poller.is_active(" m1 "));
        assert_eq!(fx.poller.status(" m1 "), SummaryStatus::Processing);

        assert!(fx.poller.stop(" m1 ").await);
        assert_eq!(fx.worker.cancels(), vec!["m1"]);
        assert_eq!(fx.poller.status("m1"), SummaryStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_meetings_poll_independently() {
        let fx = PollerFixture::new();
        fx.worker.script_ok(
            "a",
            [
                PollResponse::status("processing"),
                PollResponse::completed(json!({ "markdown": "A" })),
            ],
        );
        fx.worker
            .script_ok("b", [PollResponse::completed(json!({ "markdown": "B" }))]);
        let rec_a = UpdateRecorder::new();
        let rec_b = UpdateRecorder::new();

        fx.poller
            .generate(test_request("a"), rec_a.callback())
            .await
            .unwrap();
        fx.poller
            .generate(test_request("b"), rec_b.callback())
            .await
            .unwrap();
        let ids: Vec<_> = fx
            .poller
            .active_sessions()
            .into_iter()
            .map(|s| s.meeting_id)
            .collect();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        wait_for(&rec_b, SummaryStatus::Completed).await;
        assert!(fx.poller.is_active("a"));
        wait_for(&rec_a, SummaryStatus::Completed).await;
        assert_eq!(fx.poller.last_result("a").unwrap().as_markdown(), Some("A"));
        assert_eq!(fx.poller.last_result("b").unwrap().as_markdown(), Some("B"));
    }
}
