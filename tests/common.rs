//! Test fakes for every collaborator trait plus small fixtures.
//! Each fake is cheap to clone and clones share state, so a test keeps one handle
//! while the component under test owns another.
#![allow(dead_code)]

use async_trait::async_trait;
use postbox::command::CommandError;
use postbox::ingest::{DownloadError, Downloader, MessageDescriptor, MessageSource, SourceError};
use postbox::lights::{LightStrip, Rgb};
use postbox::monitor::{Portal, Probe};
use postbox::playback::{PlaybackOutcome, Player, Sensor};
use postbox::recovery::NetworkJoiner;
use postbox::storage::StateStore;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A store in a fresh temp dir. Keep the `TempDir` alive for the test's duration.
pub fn temp_store() -> (tempfile::TempDir, StateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = StateStore::open(dir.path().join("state.json")).unwrap();
    (dir, store)
}

fn command_failure(program: &str) -> CommandError {
    CommandError::Failed {
        program: program.into(),
        status: "exit status: 1".into(),
        stderr: String::new(),
    }
}

/// Probe answering from a script, then repeating `fallback`.
#[derive(Clone)]
pub struct FakeProbe {
    script: Arc<Mutex<VecDeque<bool>>>,
    fallback: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl FakeProbe {
    pub fn always(reachable: bool) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Arc::new(AtomicBool::new(reachable)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn scripted(answers: &[bool], fallback: bool) -> Self {
        let probe = Self::always(fallback);
        probe.script.lock().unwrap().extend(answers.iter().copied());
        probe
    }

    pub fn set(&self, reachable: bool) {
        self.fallback.store(reachable, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn reachable(&self) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Default)]
pub struct FakePortal {
    activations: Arc<AtomicUsize>,
    deactivations: Arc<AtomicUsize>,
    fail_activate: Arc<AtomicBool>,
    fail_deactivate: Arc<AtomicBool>,
}

impl FakePortal {
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }

    pub fn deactivations(&self) -> usize {
        self.deactivations.load(Ordering::SeqCst)
    }

    pub fn fail_activate(&self, fail: bool) {
        self.fail_activate.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deactivate(&self, fail: bool) {
        self.fail_deactivate.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl Portal for FakePortal {
    async fn activate(&self) -> Result<(), CommandError> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if self.fail_activate.load(Ordering::SeqCst) {
            return Err(command_failure("activate"));
        }
        Ok(())
    }

    async fn deactivate(&self) -> Result<(), CommandError> {
        self.deactivations.fetch_add(1, Ordering::SeqCst);
        if self.fail_deactivate.load(Ordering::SeqCst) {
            return Err(command_failure("deactivate"));
        }
        Ok(())
    }
}

/// Message source serving queued descriptors and recording acknowledgments.
#[derive(Clone)]
pub struct FakeSource {
    queue: Arc<Mutex<VecDeque<Result<Option<MessageDescriptor>, String>>>>,
    acknowledged: Arc<Mutex<Vec<String>>>,
    ack_result: Arc<AtomicBool>,
    polls: Arc<AtomicUsize>,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            queue: Arc::default(),
            acknowledged: Arc::default(),
            ack_result: Arc::new(AtomicBool::new(true)),
            polls: Arc::default(),
        }
    }
}

impl FakeSource {
    pub fn push(&self, id: &str, url: &str) {
        self.queue.lock().unwrap().push_back(Ok(Some(MessageDescriptor {
            id: id.into(),
            payload_url: url.into(),
        })));
    }

    pub fn push_error(&self, reason: &str) {
        self.queue.lock().unwrap().push_back(Err(reason.into()));
    }

    pub fn set_ack_result(&self, ok: bool) {
        self.ack_result.store(ok, Ordering::SeqCst);
    }

    pub fn acknowledged(&self) -> Vec<String> {
        self.acknowledged.lock().unwrap().clone()
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn poll(&self) -> Result<Option<MessageDescriptor>, SourceError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().unwrap().pop_front() {
            Some(Ok(d)) => Ok(d),
            Some(Err(reason)) => Err(SourceError::Malformed(reason)),
            None => Ok(None),
        }
    }

    async fn acknowledge(&self, id: &str) -> bool {
        self.acknowledged.lock().unwrap().push(id.to_string());
        self.ack_result.load(Ordering::SeqCst)
    }
}

/// Downloader writing a small file named after the URL's last segment.
#[derive(Clone)]
pub struct FakeDownloader {
    dir: PathBuf,
    fail: Arc<AtomicBool>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl FakeDownloader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            fail: Arc::default(),
            fetched: Arc::default(),
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(&self, url: &str) -> Result<PathBuf, DownloadError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(DownloadError::Status(503));
        }
        let name = postbox::validation::payload_filename(url)?;
        std::fs::create_dir_all(&self.dir).unwrap();
        let path = self.dir.join(name);
        std::fs::write(&path, b"ID3 fake audio").unwrap();
        Ok(path)
    }
}

#[derive(Clone, Default)]
pub struct FakeSensor {
    level: Arc<AtomicBool>,
    failing: Arc<AtomicBool>,
}

impl FakeSensor {
    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::SeqCst);
    }

    /// While set, every read fails with an I/O error.
    pub fn fail_reads(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Sensor for FakeSensor {
    fn is_triggered(&mut self) -> std::io::Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "gpio value unreadable"));
        }
        Ok(self.level.load(Ordering::SeqCst))
    }
}

/// Player returning a fixed outcome. A hanging player never finishes; a gated one
/// finishes once `release` is called.
#[derive(Clone)]
pub struct FakePlayer {
    outcome: Arc<Mutex<PlaybackOutcome>>,
    hang: Arc<AtomicBool>,
    gated: Arc<AtomicBool>,
    gate: Arc<tokio::sync::Notify>,
    started: Arc<tokio::sync::Notify>,
    played: Arc<Mutex<Vec<PathBuf>>>,
}

impl FakePlayer {
    pub fn new(outcome: PlaybackOutcome) -> Self {
        Self {
            outcome: Arc::new(Mutex::new(outcome)),
            hang: Arc::default(),
            gated: Arc::default(),
            gate: Arc::new(tokio::sync::Notify::new()),
            started: Arc::new(tokio::sync::Notify::new()),
            played: Arc::default(),
        }
    }

    pub fn hanging() -> Self {
        let player = Self::new(PlaybackOutcome::Completed);
        player.hang.store(true, Ordering::SeqCst);
        player
    }

    pub fn gated(outcome: PlaybackOutcome) -> Self {
        let player = Self::new(outcome);
        player.gated.store(true, Ordering::SeqCst);
        player
    }

    pub fn release(&self) {
        self.gate.notify_one();
    }

    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }

    /// Resolves once a playback has started.
    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn play(&self, path: &Path) -> PlaybackOutcome {
        self.played.lock().unwrap().push(path.to_path_buf());
        self.started.notify_one();
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.outcome.lock().unwrap().clone()
    }
}

/// Joiner counting calls; fails while `fail` is set.
#[derive(Clone, Default)]
pub struct FakeJoiner {
    joins: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
}

impl FakeJoiner {
    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl NetworkJoiner for FakeJoiner {
    async fn join(&self) -> Result<(), CommandError> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(command_failure("wpa_cli"));
        }
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct RecordingStrip {
    frames: Arc<Mutex<Vec<Vec<Rgb>>>>,
}

impl RecordingStrip {
    pub fn frames(&self) -> Vec<Vec<Rgb>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<Vec<Rgb>> {
        self.frames.lock().unwrap().last().cloned()
    }
}

impl LightStrip for RecordingStrip {
    fn set_pattern(&mut self, frame: &[Rgb]) -> std::io::Result<()> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}
