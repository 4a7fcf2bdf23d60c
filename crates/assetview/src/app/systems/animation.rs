use bevy::prelude::*;

use crate::app::systems::loading::process_completed_loads;
use crate::lib::session::ViewerSession;

pub struct PlaybackPlugin;

impl Plugin for PlaybackPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Update, advance_animation.after(process_completed_loads));
    }
}

/// Apply pending settings and advance the active clip by one frame.
pub fn advance_animation(time: Res<Time>, mut session: ResMut<ViewerSession>) {
    session.tick(time.delta_secs());
}
