use std::collections::HashMap;

use sortie_proto::FlightMode;

use crate::mission::CommandList;
use crate::store::MissionStore;

/// A single connected vehicle, as seen by a session.
///
/// Handles are passed explicitly to whatever needs them (see
/// [`SyncController::new`](crate::sync::SyncController::new)).
pub trait VehicleHandle {
    type Store: MissionStore;

    /// The vehicle's mission, synchronised with its onboard store.
    fn commands(&mut self) -> &mut CommandList<Self::Store>;

    /// Snapshot of the parameters received so far.
    fn parameters(&self) -> HashMap<String, f32>;

    /// Last reported flight mode, if a heartbeat has been seen.
    fn mode(&self) -> Option<FlightMode>;
}
