use std::time::{Duration, Instant};

use sortie_proto::FlightMode;

#[derive(Debug, Clone, Default)]
pub struct FcStatus {
    pub connected: bool,
    pub url: Option<String>,
    pub last_heartbeat: Option<Instant>,
    pub last_msg: Option<String>,
    pub link_error: Option<String>,
}

impl FcStatus {
    pub fn hb_age(&self) -> Option<Duration> {
        self.last_heartbeat.map(|t| t.elapsed())
    }
}

/// What we know about one vehicle (MAVLink system id).
#[derive(Debug, Clone)]
pub struct SystemState {
    pub last_heartbeat: Instant,
    pub mode: FlightMode,
    pub armed: bool,
}

impl SystemState {
    pub fn is_alive(&self, link_timeout: Duration) -> bool {
        self.last_heartbeat.elapsed() < link_timeout
    }
}
