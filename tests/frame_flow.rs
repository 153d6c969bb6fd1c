mod common;

use std::collections::VecDeque;
use std::fs;
use std::time::{Duration, Instant};

use common::{FakeSource, Harness, cached_files};
use eink_photo_frame::events::{FrameEvent, SyncTrigger};
use eink_photo_frame::state::{StateStore, Style};
use eink_photo_frame::sync::SyncStatus;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_sync_queues_new_images_and_refreshes_once() {
    let h = Harness::new(FakeSource::with_assets(&["x", "y"]));

    h.frame.sync_and_refresh(SyncTrigger::Manual).await;

    assert_eq!(h.renderer.rendered_files(), ["x.jpg"]);
    assert_eq!(h.frame.current_image().await.as_deref(), Some("x.jpg"));
    let state = h.frame.state_snapshot().await;
    assert_eq!(state.unseen_queue, VecDeque::from(["y.jpg".to_string()]));
    assert!(state.seen.contains("x.jpg"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manual_sync_without_new_images_still_refreshes_once() {
    let h = Harness::new(FakeSource::with_assets(&["x", "y"]));
    h.frame.sync_and_refresh(SyncTrigger::Manual).await;

    h.frame.sync_and_refresh(SyncTrigger::Manual).await;

    assert_eq!(h.renderer.renders().len(), 2);
    assert_eq!(h.renderer.rendered_files()[1], "y.jpg");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn fatal_sync_leaves_panel_and_state_alone() {
    let source = FakeSource::with_assets(&["x"]);
    source.fail_listing();
    let h = Harness::new(source);
    let state_before = fs::read(h.state_path()).unwrap();

    h.frame.sync_and_refresh(SyncTrigger::Midnight).await;

    assert!(h.renderer.renders().is_empty());
    assert_eq!(h.frame.current_image().await, None);
    assert_eq!(fs::read(h.state_path()).unwrap(), state_before);
    assert!(cached_files(&h.cache_dir()).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn advance_drains_unseen_queue_oldest_first() {
    let h = Harness::new(FakeSource::with_assets(&["a", "b", "c"]));
    let report = h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.status, SyncStatus::Complete);
    assert!(h.renderer.renders().is_empty());

    for _ in 0..3 {
        h.frame.handle(FrameEvent::Advance).await;
    }

    assert_eq!(h.renderer.rendered_files(), ["a.jpg", "b.jpg", "c.jpg"]);
    let state = h.frame.state_snapshot().await;
    assert!(state.unseen_queue.is_empty());
    assert_eq!(
        state.history.iter().collect::<Vec<_>>(),
        ["a.jpg", "b.jpg", "c.jpg"]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn style_change_is_persisted_without_redraw() {
    let h = Harness::new(FakeSource::with_assets(&["x"]));
    h.frame.run_sync(SyncTrigger::Manual).await.unwrap();

    h.frame.handle(FrameEvent::SetStyle(Style::Painterly)).await;

    assert!(h.renderer.renders().is_empty());
    assert_eq!(StateStore::new(h.state_path()).load().style, Style::Painterly);

    h.frame.handle(FrameEvent::Advance).await;
    assert_eq!(h.renderer.renders()[0].1, Style::Painterly);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_render_still_consumes_the_selection() {
    let h = Harness::new(FakeSource::with_assets(&["x"]));
    h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    h.renderer.set_failing(true);

    assert_eq!(h.frame.refresh_display().await, None);

    let state = h.frame.state_snapshot().await;
    assert!(state.unseen_queue.is_empty());
    assert!(state.seen.contains("x.jpg"));
    assert_eq!(StateStore::new(h.state_path()).load(), state);
    assert_eq!(h.frame.current_image().await, None);

    h.renderer.set_failing(false);
    assert_eq!(h.frame.refresh_display().await.as_deref(), Some("x.jpg"));
    assert_eq!(h.frame.current_image().await.as_deref(), Some("x.jpg"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unrenderable_image_does_not_stall_rotation() {
    let h = Harness::new(FakeSource::with_assets(&["a", "b", "c"]));
    h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    h.renderer.reject("a.jpg");

    for _ in 0..3 {
        h.frame.handle(FrameEvent::Advance).await;
    }

    assert_eq!(h.renderer.rendered_files(), ["b.jpg", "c.jpg"]);
    assert!(h.frame.state_snapshot().await.unseen_queue.is_empty());
    assert_eq!(h.frame.current_image().await.as_deref(), Some("c.jpg"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn style_change_is_not_blocked_by_a_slow_render() {
    let h = Harness::new(FakeSource::with_assets(&["x"]));
    h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    h.renderer.set_delay(Duration::from_millis(1500));

    let (shown, waited) = tokio::join!(h.frame.refresh_display(), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let started = Instant::now();
        h.frame.set_style(Style::Posterize).await;
        let snapshot = h.frame.state_snapshot().await;
        (started.elapsed(), snapshot.style)
    });

    assert_eq!(shown.as_deref(), Some("x.jpg"));
    let (elapsed, style) = waited;
    assert!(elapsed < Duration::from_millis(500), "set_style waited {elapsed:?}");
    assert_eq!(style, Style::Posterize);
    assert_eq!(h.renderer.renders()[0].1, Style::Normal);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn displayed_orphan_is_kept_out_of_rotation_then_deleted() {
    let h = Harness::new(FakeSource::with_assets(&["x", "y"]));
    h.frame.sync_and_refresh(SyncTrigger::Manual).await;
    assert_eq!(h.frame.current_image().await.as_deref(), Some("x.jpg"));

    h.source.remove("x");
    let report = h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.deferred.len(), 1);
    assert!(h.cache_dir().join("x.jpg").is_file());

    for _ in 0..5 {
        h.frame.refresh_display().await;
    }
    assert!(
        h.renderer.rendered_files()[1..].iter().all(|f| f == "y.jpg"),
        "{:?}",
        h.renderer.rendered_files()
    );

    let report = h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(cached_files(&h.cache_dir()), ["y.jpg"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deferred_orphan_stays_out_of_rotation_after_restart() {
    let h = Harness::new(FakeSource::with_assets(&["x", "y"]));
    h.frame.sync_and_refresh(SyncTrigger::Manual).await;
    h.source.remove("x");
    let report = h.frame.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.deferred.len(), 1);

    let restarted = h.restarted();
    for _ in 0..5 {
        assert_eq!(restarted.refresh_display().await.as_deref(), Some("y.jpg"));
    }

    let report = restarted.run_sync(SyncTrigger::Manual).await.unwrap();
    assert_eq!(report.removed.len(), 1);
    assert_eq!(cached_files(&h.cache_dir()), ["y.jpg"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_images_leave_the_unseen_queue() {
    let h = Harness::new(FakeSource::with_assets(&["x", "y", "z"]));
    h.frame.run_sync(SyncTrigger::Manual).await.unwrap();

    h.source.remove("y");
    h.frame.run_sync(SyncTrigger::Manual).await.unwrap();

    let state = h.frame.state_snapshot().await;
    assert_eq!(
        state.unseen_queue,
        VecDeque::from(["x.jpg".to_string(), "z.jpg".to_string()])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_cache_renders_nothing() {
    let h = Harness::new(FakeSource::default());

    assert_eq!(h.frame.refresh_display().await, None);
    h.frame.sync_and_refresh(SyncTrigger::Manual).await;

    assert!(h.renderer.renders().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn state_survives_restart() {
    let h = Harness::new(FakeSource::with_assets(&["x", "y", "z"]));
    h.frame.sync_and_refresh(SyncTrigger::Manual).await;
    h.frame.handle(FrameEvent::SetStyle(Style::Posterize)).await;
    h.frame.handle(FrameEvent::Advance).await;

    let restarted = h.restarted();

    assert_eq!(
        restarted.state_snapshot().await,
        h.frame.state_snapshot().await
    );
}
