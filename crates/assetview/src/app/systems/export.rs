//! Export the live object to a GLB file on a worker thread.
//!
//! The progress indicator animates while the worker runs and only turns
//! into success or failure once the worker reports back.

use bevy::prelude::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::PathBuf;
use std::thread;

use crate::lib::export::{AssetExporter, ExportConfig, ExportError, ExportProgress, ExportedAsset};
use crate::lib::session::{ExportJob, ViewerSession};

pub struct ExportPlugin;

impl Plugin for ExportPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(ExportWorker::new())
            .init_resource::<ExportProgress>()
            .init_resource::<ExportConfig>()
            .init_resource::<ExportDirectory>()
            .add_message::<RequestExport>()
            .add_systems(
                Update,
                (start_export, tick_export_progress, process_finished_exports).chain(),
            );
    }
}

/// Export the current object with the configured options.
#[derive(Message, Debug, Clone, Copy)]
pub struct RequestExport;

/// Where exported files are written.
#[derive(Resource, Debug, Clone)]
pub struct ExportDirectory(pub PathBuf);

impl Default for ExportDirectory {
    fn default() -> Self {
        Self(PathBuf::from("."))
    }
}

struct ExportRequest {
    job: ExportJob,
    config: ExportConfig,
    directory: PathBuf,
}

enum ExportResult {
    Encoded {
        result: Result<ExportedAsset, ExportError>,
        path: Option<PathBuf>,
    },
    WriteFailed {
        path: PathBuf,
        error: std::io::Error,
    },
}

enum WorkerMessage {
    Export(Box<ExportRequest>),
    Shutdown,
}

#[derive(Resource)]
pub struct ExportWorker {
    request_sender: Sender<WorkerMessage>,
    result_receiver: Receiver<ExportResult>,
    worker: Option<thread::JoinHandle<()>>,
}

impl ExportWorker {
    pub fn new() -> Self {
        let (request_tx, request_rx) = unbounded();
        let (result_tx, result_rx) = unbounded();
        let worker = thread::spawn(move || worker_thread(request_rx, result_tx));
        Self {
            request_sender: request_tx,
            result_receiver: result_rx,
            worker: Some(worker),
        }
    }

    fn queue(&self, request: ExportRequest) -> Result<(), String> {
        self.request_sender
            .send(WorkerMessage::Export(Box::new(request)))
            .map_err(|_| "export worker is not running".to_string())
    }

    fn poll_completed(&self) -> Vec<ExportResult> {
        self.result_receiver.try_iter().collect()
    }

    pub fn shutdown(&mut self) {
        let _ = self.request_sender.send(WorkerMessage::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Default for ExportWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExportWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_thread(receiver: Receiver<WorkerMessage>, sender: Sender<ExportResult>) {
    while let Ok(WorkerMessage::Export(request)) = receiver.recv() {
        let ExportRequest {
            job,
            config,
            directory,
        } = *request;
        let result = AssetExporter::export(&job.object, &job.clips, &config, &job.codecs);
        let outcome = match result {
            Ok(asset) => {
                let path = directory.join(&asset.file_name);
                match std::fs::write(&path, &asset.bytes) {
                    Ok(()) => ExportResult::Encoded {
                        result: Ok(asset),
                        path: Some(path),
                    },
                    Err(error) => ExportResult::WriteFailed { path, error },
                }
            }
            Err(err) => ExportResult::Encoded {
                result: Err(err),
                path: None,
            },
        };
        if sender.send(outcome).is_err() {
            break;
        }
    }
    debug!("Export worker exited");
}

pub fn start_export(
    mut requests: MessageReader<RequestExport>,
    session: Res<ViewerSession>,
    config: Res<ExportConfig>,
    directory: Res<ExportDirectory>,
    worker: Res<ExportWorker>,
    mut progress: ResMut<ExportProgress>,
) {
    if requests.read().count() == 0 {
        return;
    }
    if progress.is_running() {
        info!("Export already running");
        return;
    }
    let job = match session.export_job() {
        Ok(job) => job,
        Err(err) => {
            *progress = ExportProgress::Failed {
                message: err.to_string(),
            };
            return;
        }
    };
    let mut config = config.clone();
    config.source_name = job.object.name.clone();
    let request = ExportRequest {
        job,
        config,
        directory: directory.0.clone(),
    };
    match worker.queue(request) {
        Ok(()) => progress.start(),
        Err(message) => *progress = ExportProgress::Failed { message },
    }
}

pub fn tick_export_progress(time: Res<Time>, mut progress: ResMut<ExportProgress>) {
    if progress.is_running() {
        progress.tick(time.delta_secs());
    }
}

pub fn process_finished_exports(worker: Res<ExportWorker>, mut progress: ResMut<ExportProgress>) {
    for outcome in worker.poll_completed() {
        match outcome {
            ExportResult::Encoded { result, path } => {
                match (&result, path) {
                    (Ok(asset), Some(path)) => {
                        info!("Exported {} bytes to {}", asset.bytes.len(), path.display())
                    }
                    (Err(err), _) => error!("Export failed: {}", err),
                    _ => {}
                }
                progress.finish(&result);
            }
            ExportResult::WriteFailed { path, error } => {
                error!("Could not write {}: {}", path.display(), error);
                *progress = ExportProgress::Failed {
                    message: format!("could not write {}: {}", path.display(), error),
                };
            }
        }
    }
}
