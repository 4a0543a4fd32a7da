//! Shared application state, passed explicitly into every handler and job.

use fleet_transport::FlashManager;

use crate::builder::BuildManager;
use crate::config::AppPaths;
use crate::fleet::FleetStore;
use crate::profiles::ProfileStore;
use crate::tasks::TaskStore;

pub struct AppState {
    pub paths: AppPaths,
    pub fleet: FleetStore,
    pub profiles: ProfileStore,
    pub builder: BuildManager,
    pub tasks: TaskStore,
    pub flash: FlashManager,
}

impl AppState {
    pub fn new(paths: AppPaths) -> Self {
        let fleet = FleetStore::new(paths.fleet_file());
        let profiles = ProfileStore::new(paths.profiles_dir.clone());
        let builder = BuildManager::new(paths.klipper_dir.clone(), paths.artifacts_dir.clone());
        let flash = FlashManager::new(paths.tool_paths());
        Self {
            paths,
            fleet,
            profiles,
            builder,
            tasks: TaskStore::new(),
            flash,
        }
    }
}
