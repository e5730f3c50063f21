mod common;

use common::{temp_store, FakePlayer, FakeSensor};
use postbox::playback::{PlaybackController, PlaybackError, PlaybackOutcome, PlayerPhase};
use postbox::shutdown::Shutdown;
use postbox::state::{Lifecycle, Transition};
use postbox::storage::StateStore;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn controller(store: &StateStore, sensor: &FakeSensor, player: &FakePlayer) -> PlaybackController<FakeSensor, FakePlayer> {
    PlaybackController::new(store.clone(), sensor.clone(), player.clone(), Duration::from_millis(5), 1)
}

fn arm_with_payload(store: &StateStore, dir: &Path, id: &str) -> PathBuf {
    let payload = dir.join(format!("{}.mp3", id));
    std::fs::write(&payload, b"audio").unwrap();
    store
        .update(|s| {
            s.transition(Transition::Arm {
                id: id.into(),
                payload: payload.clone(),
            })
        })
        .unwrap()
        .unwrap();
    payload
}

#[tokio::test]
async fn trigger_plays_and_marks_listened() {
    let (dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);
    let mut controller = controller(&store, &sensor, &player);
    let payload = arm_with_payload(&store, dir.path(), "42");

    assert_eq!(controller.step(&mut shutdown).await.unwrap(), PlayerPhase::Armed);
    sensor.set(true);
    assert_eq!(controller.step(&mut shutdown).await.unwrap(), PlayerPhase::Idle);

    assert_eq!(player.played(), vec![payload.clone()]);
    let state = store.read();
    assert_eq!(state.lifecycle().unwrap(), Lifecycle::Listened { id: Some("42".into()) });
    assert!(!state.playing);
    assert!(!payload.exists());
}

#[tokio::test]
async fn failed_render_still_retires_the_message() {
    let (dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Failed("decoder error".into()));
    let mut controller = controller(&store, &sensor, &player);
    let payload = arm_with_payload(&store, dir.path(), "1");

    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);
    controller.step(&mut shutdown).await.unwrap();

    assert!(store.read().message_listened);
    assert!(!payload.exists());
}

#[tokio::test]
async fn held_trigger_does_not_fire_for_a_new_message() {
    let (dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);
    let mut controller = controller(&store, &sensor, &player);

    sensor.set(true);
    controller.step(&mut shutdown).await.unwrap();
    arm_with_payload(&store, dir.path(), "2");
    for _ in 0..3 {
        assert_eq!(controller.step(&mut shutdown).await.unwrap(), PlayerPhase::Armed);
    }
    assert!(player.played().is_empty());

    sensor.set(false);
    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);
    controller.step(&mut shutdown).await.unwrap();
    assert_eq!(player.played().len(), 1);
}

#[tokio::test]
async fn sensor_read_error_is_not_a_release() {
    let (dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);
    let mut controller =
        PlaybackController::new(store.clone(), sensor.clone(), player.clone(), Duration::from_millis(5), 2);
    arm_with_payload(&store, dir.path(), "3");

    sensor.set(true);
    controller.step(&mut shutdown).await.unwrap();
    controller.step(&mut shutdown).await.unwrap();
    sensor.fail_reads(true);
    controller.step(&mut shutdown).await.unwrap();
    sensor.fail_reads(false);
    for _ in 0..3 {
        assert_eq!(controller.step(&mut shutdown).await.unwrap(), PlayerPhase::Armed);
    }
    assert!(player.played().is_empty());

    sensor.set(false);
    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);
    controller.step(&mut shutdown).await.unwrap();
    controller.step(&mut shutdown).await.unwrap();
    assert_eq!(player.played().len(), 1);
}

#[tokio::test]
async fn trigger_without_pending_message_does_nothing() {
    let (_dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);
    let mut controller = controller(&store, &sensor, &player);

    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);
    assert_eq!(controller.step(&mut shutdown).await.unwrap(), PlayerPhase::Idle);
    assert!(player.played().is_empty());
    assert!(!store.path().exists());
}

#[tokio::test]
async fn shutdown_during_playback_reverts_to_pending_and_propagates() {
    let (dir, store) = temp_store();
    let (trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::hanging();
    let mut controller = controller(&store, &sensor, &player);
    let payload = arm_with_payload(&store, dir.path(), "7");

    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);

    let observer = player.clone();
    let observed_store = store.clone();
    let (result, playing_seen) = tokio::join!(controller.step(&mut shutdown), async move {
        observer.wait_started().await;
        let playing = observed_store.read().playing;
        trigger.trigger();
        playing
    });

    assert!(playing_seen);
    match result {
        Err(PlaybackError::Interrupted { id }) => assert_eq!(id, "7"),
        other => panic!("unexpected result: {:?}", other),
    }
    let state = store.read();
    assert!(!state.playing);
    assert_eq!(
        state.lifecycle().unwrap(),
        Lifecycle::Pending {
            id: "7".into(),
            payload: payload.clone()
        }
    );
    assert!(payload.exists());
}

#[tokio::test]
async fn run_propagates_interruption() {
    let (dir, store) = temp_store();
    let (trigger, shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::hanging();
    arm_with_payload(&store, dir.path(), "8");

    let handle = tokio::spawn(controller(&store, &sensor, &player).run(shutdown));
    tokio::time::sleep(Duration::from_millis(30)).await;
    sensor.set(true);
    tokio::time::timeout(Duration::from_secs(5), player.wait_started())
        .await
        .unwrap();
    trigger.trigger();

    let result = handle.await.unwrap();
    assert!(matches!(result, Err(PlaybackError::Interrupted { .. })));
    assert!(!store.read().playing);
    assert!(store.read().message_pending);
}

#[tokio::test]
async fn run_stops_cleanly_when_idle() {
    let (_dir, store) = temp_store();
    let (trigger, shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);

    let handle = tokio::spawn(controller(&store, &sensor, &player).run(shutdown));
    tokio::time::sleep(Duration::from_millis(20)).await;
    trigger.trigger();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test]
async fn player_interruption_returns_message_to_pending() {
    let (dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Interrupted);
    let mut controller = controller(&store, &sensor, &player);
    arm_with_payload(&store, dir.path(), "3");

    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);
    assert_eq!(controller.step(&mut shutdown).await.unwrap(), PlayerPhase::Armed);
    let state = store.read();
    assert!(state.message_pending);
    assert!(!state.playing);
}

#[tokio::test]
async fn missing_payload_counts_as_failed_render() {
    let (dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);
    let mut controller = controller(&store, &sensor, &player);
    let payload = arm_with_payload(&store, dir.path(), "4");
    std::fs::remove_file(&payload).unwrap();

    controller.step(&mut shutdown).await.unwrap();
    sensor.set(true);
    controller.step(&mut shutdown).await.unwrap();

    assert!(player.played().is_empty());
    assert_eq!(
        store.read().lifecycle().unwrap(),
        Lifecycle::Listened { id: Some("4".into()) }
    );
}

#[tokio::test]
async fn orphaned_playback_is_recovered_at_startup() {
    let (dir, store) = temp_store();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);

    let payload = arm_with_payload(&store, dir.path(), "5");
    store.update(|s| s.transition(Transition::BeginPlayback)).unwrap().unwrap();
    let recovered = controller(&store, &sensor, &player).recover_orphaned_playback();
    assert_eq!(
        recovered,
        Some(Lifecycle::Pending {
            id: "5".into(),
            payload: payload.clone()
        })
    );

    store.update(|s| s.transition(Transition::BeginPlayback)).unwrap().unwrap();
    std::fs::remove_file(&payload).unwrap();
    let recovered = controller(&store, &sensor, &player).recover_orphaned_playback();
    assert_eq!(recovered, Some(Lifecycle::Listened { id: Some("5".into()) }));
    assert!(!store.read().playing);

    assert_eq!(controller(&store, &sensor, &player).recover_orphaned_playback(), None);
}

#[tokio::test]
async fn stray_playing_flag_is_cleared() {
    let (_dir, store) = temp_store();
    let (_trigger, mut shutdown) = Shutdown::new();
    let sensor = FakeSensor::default();
    let player = FakePlayer::new(PlaybackOutcome::Completed);
    let mut controller = controller(&store, &sensor, &player);

    store.update(|s| s.playing = true).unwrap();
    controller.step(&mut shutdown).await.unwrap();
    assert!(!store.read().playing);
}
