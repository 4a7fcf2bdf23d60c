//! Viewer session state: the one live object and everything bound to it.
//!
//! A load is started with [`ViewerSession::begin_load`], which hands out a
//! [`LoadHandle`] and a fresh codec bundle for the worker. The result comes
//! back through [`ViewerSession::complete_load`]; only the most recently
//! issued handle can install anything, so an older load that finishes late
//! is dropped instead of overwriting the newer one.

use bevy::prelude::*;
use std::sync::Arc;

use crate::lib::animation::{AnimationClip, AnimationRuntime};
use crate::lib::camera::{CameraFramer, CameraState, Framing};
use crate::lib::codecs::{CodecConfig, Codecs};
use crate::lib::error::{AssetError, AssetResult};
use crate::lib::export::{AssetExporter, ExportConfig, ExportedAsset};
use crate::lib::metadata::{MetadataExtractor, ModelMetadata};
use crate::lib::pipeline::LoadedAsset;
use crate::lib::scene::SceneObject;
use crate::lib::settings::{SceneSettings, SettingsApplier, SkeletonOverlay};

/// Identifies one load request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadHandle(u64);

impl LoadHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Issues increasing handles and remembers the latest one.
#[derive(Debug, Default, Clone)]
pub struct LoadTracker {
    next: u64,
    latest: Option<LoadHandle>,
}

impl LoadTracker {
    pub fn issue(&mut self) -> LoadHandle {
        let handle = LoadHandle(self.next);
        self.next += 1;
        self.latest = Some(handle);
        handle
    }

    pub fn is_current(&self, handle: LoadHandle) -> bool {
        self.latest == Some(handle)
    }

    pub fn latest(&self) -> Option<LoadHandle> {
        self.latest
    }
}

/// What happened to a finished load.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Installed(ModelMetadata),
    /// The load failed; the previous object is still shown.
    Failed(String),
    /// A newer load was started after this one.
    Stale,
}

pub type MetadataCallback = Box<dyn Fn(&ModelMetadata) + Send + Sync>;

/// Everything needed to run an export away from the session.
pub struct ExportJob {
    pub object: SceneObject,
    pub clips: Vec<AnimationClip>,
    pub codecs: Arc<Codecs>,
}

#[derive(Resource)]
pub struct ViewerSession {
    pub settings: SceneSettings,
    pub codec_config: CodecConfig,
    tracker: LoadTracker,
    pending: Option<LoadHandle>,
    codecs: Option<Arc<Codecs>>,
    object: Option<SceneObject>,
    animation: AnimationRuntime,
    metadata: Option<ModelMetadata>,
    overlay: Option<SkeletonOverlay>,
    applier: SettingsApplier,
    frame_pending: bool,
    on_metadata: Option<MetadataCallback>,
}

impl Default for ViewerSession {
    fn default() -> Self {
        Self::new(SceneSettings::default(), CodecConfig::default())
    }
}

impl ViewerSession {
    pub fn new(settings: SceneSettings, codec_config: CodecConfig) -> Self {
        Self {
            settings,
            codec_config,
            tracker: LoadTracker::default(),
            pending: None,
            codecs: None,
            object: None,
            animation: AnimationRuntime::default(),
            metadata: None,
            overlay: None,
            applier: SettingsApplier::default(),
            frame_pending: false,
            on_metadata: None,
        }
    }

    /// Called once with the metadata of every installed asset.
    pub fn set_metadata_callback(&mut self, callback: MetadataCallback) {
        self.on_metadata = Some(callback);
    }

    /// Start a new load. Any previous codec bundle is released here.
    pub fn begin_load(&mut self) -> (LoadHandle, Arc<Codecs>) {
        self.release_codecs();
        let codecs = Arc::new(Codecs::new(&self.codec_config));
        self.codecs = Some(codecs.clone());
        let handle = self.tracker.issue();
        self.pending = Some(handle);
        info!("Starting load #{}", handle.id());
        (handle, codecs)
    }

    /// Drop the session's reference to the current codec bundle.
    pub fn release_codecs(&mut self) {
        if self.codecs.take().is_some() {
            debug!("Releasing codecs of the previous load");
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether `handle` belongs to the most recently started load.
    pub fn is_current(&self, handle: LoadHandle) -> bool {
        self.tracker.is_current(handle)
    }

    /// Install the result of load `handle` if it is still the latest one.
    ///
    /// Success replaces the object, rebuilds animation playback starting at
    /// clip 0, computes metadata once and queues camera framing. Failure
    /// leaves the current object and metadata as they were.
    pub fn complete_load(&mut self, handle: LoadHandle, result: AssetResult<LoadedAsset>) -> LoadOutcome {
        if !self.tracker.is_current(handle) {
            info!("Discarding result of superseded load #{}", handle.id());
            return LoadOutcome::Stale;
        }
        self.pending = None;

        let LoadedAsset { object, clips } = match result {
            Ok(asset) => asset,
            Err(err) => {
                warn!("Load #{} failed: {}", handle.id(), err);
                return LoadOutcome::Failed(err.to_string());
            }
        };

        let metadata = MetadataExtractor::extract(&object, &clips);
        self.overlay = None;
        self.applier.reset();
        self.settings.active_animation_index = 0;

        self.animation = AnimationRuntime::new(clips, &object.graph);
        self.animation.set_playing(self.settings.play_animation);
        self.animation.select(0);
        self.object = Some(object);
        self.apply_settings();

        self.metadata = Some(metadata.clone());
        self.frame_pending = true;
        info!(
            "Installed {} ({} vertices, {} triangles, {} clips)",
            metadata.name,
            metadata.vertex_count,
            metadata.triangle_count,
            metadata.animations.len()
        );
        if let Some(callback) = &self.on_metadata {
            callback(&metadata);
        }
        LoadOutcome::Installed(metadata)
    }

    pub fn object(&self) -> Option<&SceneObject> {
        self.object.as_ref()
    }

    pub fn metadata(&self) -> Option<&ModelMetadata> {
        self.metadata.as_ref()
    }

    pub fn animation(&self) -> &AnimationRuntime {
        &self.animation
    }

    pub fn overlay(&self) -> Option<&SkeletonOverlay> {
        self.overlay.as_ref()
    }

    /// Push changed display settings onto the object. Cheap when nothing
    /// changed.
    pub fn apply_settings(&mut self) -> bool {
        match self.object.as_mut() {
            Some(object) => self.applier.apply(object, &mut self.overlay, &self.settings),
            None => false,
        }
    }

    /// Switch the active clip. Out-of-range indices leave playback alone
    /// and the setting is put back to the clip actually playing.
    pub fn select_animation(&mut self, index: usize) -> bool {
        let changed = self.animation.select(index);
        self.settings.active_animation_index = self.animation.active_index().unwrap_or(0);
        changed
    }

    /// One frame: follow the settings, advance the clock, pose the object.
    pub fn tick(&mut self, dt: f32) {
        self.apply_settings();
        if self.animation.active_index() != Some(self.settings.active_animation_index)
            && !self.animation.clips().is_empty()
        {
            self.select_animation(self.settings.active_animation_index);
        }
        self.animation.set_playing(self.settings.play_animation);
        self.animation.tick(dt);
        if let Some(object) = self.object.as_mut() {
            self.animation.apply(&mut object.graph);
        }
    }

    /// True once after each install; the caller frames the camera then.
    pub fn take_frame_request(&mut self) -> bool {
        std::mem::take(&mut self.frame_pending)
    }

    pub fn frame_camera(&self, camera: &CameraState) -> Option<Framing> {
        self.object
            .as_ref()
            .and_then(|object| CameraFramer::frame(object, camera))
    }

    /// Copy of what an export needs, so it can run on another thread.
    pub fn export_job(&self) -> AssetResult<ExportJob> {
        let object = self
            .object
            .clone()
            .ok_or_else(|| AssetError::Encode("no asset is loaded".into()))?;
        let codecs = self
            .codecs
            .clone()
            .unwrap_or_else(|| Arc::new(Codecs::new(&self.codec_config)));
        Ok(ExportJob {
            object,
            clips: self.animation.clips().to_vec(),
            codecs,
        })
    }

    /// Export the live object synchronously.
    pub fn export(&self, config: &ExportConfig) -> AssetResult<ExportedAsset> {
        let job = self.export_job()?;
        Ok(AssetExporter::export(&job.object, &job.clips, config, &job.codecs)?)
    }
}
