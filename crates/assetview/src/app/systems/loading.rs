//! Background loading.
//!
//! Fetch, decode and normalization run on a worker thread so the render loop
//! never blocks. Results are drained once per frame and handed to the
//! session, which decides whether they are still wanted.

use bevy::prelude::*;
use bevy::window::FileDragAndDrop;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use crate::lib::codecs::Codecs;
use crate::lib::error::{AssetError, AssetResult};
use crate::lib::pipeline::{load_file, LoadedAsset};
use crate::lib::session::{LoadHandle, LoadOutcome, ViewerSession};
use crate::lib::status::StatusSink;

pub struct AssetLoadingPlugin;

impl Plugin for AssetLoadingPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(AssetLoadWorker::new())
            .init_resource::<StatusLine>()
            .init_resource::<InitialAnimation>()
            .add_message::<OpenAsset>()
            .add_message::<SceneReplaced>()
            .add_systems(
                Update,
                (queue_dropped_files, queue_requested_loads, process_completed_loads).chain(),
            );
    }
}

/// Ask the viewer to open a file.
#[derive(Message, Debug, Clone)]
pub struct OpenAsset(pub PathBuf);

/// Sent after a new object has been installed in the session.
#[derive(Message, Debug, Clone, Copy)]
pub struct SceneReplaced;

/// Latest human-readable status from the loader.
#[derive(Resource, Debug, Clone, Default)]
pub struct StatusLine(pub String);

/// Clip requested on the command line, applied to the first load only.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct InitialAnimation(pub Option<usize>);

struct LoadRequest {
    handle: LoadHandle,
    path: PathBuf,
    point_size: f32,
    codecs: Arc<Codecs>,
}

struct LoadResult {
    handle: LoadHandle,
    result: AssetResult<LoadedAsset>,
}

enum WorkerMessage {
    Load(LoadRequest),
    Shutdown,
}

struct StatusUpdate {
    handle: LoadHandle,
    message: String,
}

/// Forwards one load's status strings from the worker to the main thread.
struct ChannelStatus<'a> {
    handle: LoadHandle,
    sender: &'a Sender<StatusUpdate>,
}

impl StatusSink for ChannelStatus<'_> {
    fn status(&self, message: &str) {
        let _ = self.sender.send(StatusUpdate {
            handle: self.handle,
            message: message.to_string(),
        });
    }
}

/// Signature of the function the worker runs for each request.
pub type LoadFn = fn(&Path, f32, &Codecs, &dyn StatusSink) -> AssetResult<LoadedAsset>;

#[derive(Resource)]
pub struct AssetLoadWorker {
    request_sender: Sender<WorkerMessage>,
    result_receiver: Receiver<LoadResult>,
    status_receiver: Receiver<StatusUpdate>,
    worker: Option<thread::JoinHandle<()>>,
}

impl AssetLoadWorker {
    pub fn new() -> Self {
        Self::with_loader(load_file)
    }

    pub fn with_loader(loader: LoadFn) -> Self {
        let (request_tx, request_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        let (status_tx, status_rx) = unbounded();

        let worker =
            thread::spawn(move || worker_thread(loader, request_rx, result_tx, status_tx));

        Self {
            request_sender: request_tx,
            result_receiver: result_rx,
            status_receiver: status_rx,
            worker: Some(worker),
        }
    }

    fn queue(&self, request: LoadRequest) -> Result<(), String> {
        self.request_sender
            .send(WorkerMessage::Load(request))
            .map_err(|_| "load worker is not running".to_string())
    }

    fn poll_completed(&self) -> Vec<LoadResult> {
        self.result_receiver.try_iter().collect()
    }

    /// Latest status line that belongs to the current load.
    fn poll_status(&self, session: &ViewerSession) -> Option<String> {
        self.status_receiver
            .try_iter()
            .filter(|update| session.is_current(update.handle))
            .last()
            .map(|update| update.message)
    }

    pub fn shutdown(&mut self) {
        let _ = self.request_sender.send(WorkerMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for AssetLoadWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for AssetLoadWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_thread(
    loader: LoadFn,
    receiver: Receiver<WorkerMessage>,
    sender: Sender<LoadResult>,
    status: Sender<StatusUpdate>,
) {
    debug!("Load worker started");
    while let Ok(message) = receiver.recv() {
        let request = match message {
            WorkerMessage::Load(request) => request,
            WorkerMessage::Shutdown => break,
        };
        debug!("Load #{} reading {:?}", request.handle.id(), request.path);
        let sink = ChannelStatus {
            handle: request.handle,
            sender: &status,
        };
        // A parser panic fails this load only; the worker keeps serving.
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            loader(&request.path, request.point_size, &request.codecs, &sink)
        }))
        .unwrap_or_else(|payload| {
            let message = format!("decoder crashed: {}", panic_message(payload.as_ref()));
            error!("Load #{} {}", request.handle.id(), message);
            sink.status(&message);
            Err(AssetError::Decode(message))
        });
        drop(request.codecs);
        if sender
            .send(LoadResult {
                handle: request.handle,
                result,
            })
            .is_err()
        {
            break;
        }
    }
    debug!("Load worker exited");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

/// Turn files dropped on the window into open requests.
pub fn queue_dropped_files(
    mut drops: MessageReader<FileDragAndDrop>,
    mut open: MessageWriter<OpenAsset>,
) {
    for event in drops.read() {
        if let FileDragAndDrop::DroppedFile { path_buf, .. } = event {
            open.write(OpenAsset(path_buf.clone()));
        }
    }
}

pub fn queue_requested_loads(
    mut requests: MessageReader<OpenAsset>,
    mut session: ResMut<ViewerSession>,
    worker: Res<AssetLoadWorker>,
    mut status: ResMut<StatusLine>,
) {
    for OpenAsset(path) in requests.read() {
        let (handle, codecs) = session.begin_load();
        info!("Queueing load #{} for {:?}", handle.id(), path);
        let request = LoadRequest {
            handle,
            path: path.clone(),
            point_size: session.settings.point_size(),
            codecs,
        };
        if let Err(err) = worker.queue(request) {
            error!("{}", err);
            session.complete_load(handle, Err(AssetError::Decode(err.clone())));
            status.0 = err;
        }
    }
}

pub fn process_completed_loads(
    worker: Res<AssetLoadWorker>,
    mut session: ResMut<ViewerSession>,
    mut status: ResMut<StatusLine>,
    mut initial: ResMut<InitialAnimation>,
    mut replaced: MessageWriter<SceneReplaced>,
) {
    if let Some(line) = worker.poll_status(&session) {
        status.0 = line;
    }
    for LoadResult { handle, result } in worker.poll_completed() {
        match session.complete_load(handle, result) {
            LoadOutcome::Installed(metadata) => {
                if let Some(index) = initial.0.take() {
                    session.select_animation(index);
                }
                status.0 = format!("loaded {}", metadata.name);
                replaced.write(SceneReplaced);
            }
            LoadOutcome::Failed(message) => status.0 = message,
            LoadOutcome::Stale => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lib::pipeline::load_bytes;
    use crate::lib::session::LoadTracker;
    use std::time::Duration;

    fn flaky_loader(
        path: &Path,
        point_size: f32,
        codecs: &Codecs,
        status: &dyn StatusSink,
    ) -> AssetResult<LoadedAsset> {
        if path.ends_with("broken.xyz") {
            panic!("index out of bounds");
        }
        load_bytes("ok.xyz", b"0 0 0\n1 1 1\n".to_vec(), None, point_size, codecs, status)
    }

    fn request(handle: LoadHandle, path: &str) -> LoadRequest {
        LoadRequest {
            handle,
            path: PathBuf::from(path),
            point_size: 0.05,
            codecs: Arc::new(Codecs::default()),
        }
    }

    fn next_result(worker: &AssetLoadWorker) -> LoadResult {
        worker
            .result_receiver
            .recv_timeout(Duration::from_secs(10))
            .expect("worker did not answer")
    }

    #[test]
    fn test_worker_survives_a_panicking_decoder() {
        let worker = AssetLoadWorker::with_loader(flaky_loader);
        let mut tracker = LoadTracker::default();
        let broken = tracker.issue();
        let fine = tracker.issue();

        worker.queue(request(broken, "broken.xyz")).unwrap();
        let first = next_result(&worker);
        assert_eq!(first.handle, broken);
        match first.result {
            Err(AssetError::Decode(message)) => assert!(message.contains("index out of bounds")),
            other => panic!("expected a decode error, got {:?}", other.map(|_| ())),
        }

        worker.queue(request(fine, "fine.xyz")).unwrap();
        let second = next_result(&worker);
        assert_eq!(second.handle, fine);
        assert_eq!(second.result.unwrap().object.name, "ok.xyz");
    }

    #[test]
    fn test_status_of_superseded_load_is_ignored() {
        let worker = AssetLoadWorker::with_loader(flaky_loader);
        let mut session = ViewerSession::default();
        let (old, _) = session.begin_load();
        let (current, _) = session.begin_load();

        worker.queue(request(current, "fine.xyz")).unwrap();
        next_result(&worker);
        worker.queue(request(old, "broken.xyz")).unwrap();
        next_result(&worker);

        let line = worker.poll_status(&session).unwrap();
        assert!(!line.contains("crashed"), "{line}");
    }
}
