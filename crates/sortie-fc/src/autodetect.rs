use anyhow::Result;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::mav::FcLink;

#[derive(Debug, Clone)]
pub struct AttemptResult {
    pub url: String,
    pub hb_seen: bool,
    pub sys_id: Option<u8>,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone)]
pub struct AutodetectResult {
    pub chosen: Option<String>,
    pub attempts: Vec<AttemptResult>,
}

/// SITL first, then the usual USB / telemetry radio ports.
pub fn default_candidate_urls() -> Vec<String> {
    vec![
        "tcpout:127.0.0.1:5760".into(),
        "udpin:0.0.0.0:14550".into(),
        "serial:/dev/ttyACM0:115200".into(),
        "serial:/dev/ttyACM1:115200".into(),
        "serial:/dev/ttyUSB0:57600".into(),
        "serial:/dev/ttyUSB1:57600".into(),
        "serial:/dev/serial0:57600".into(),
    ]
}

/// Try each url in order and pick the first that yields a vehicle HEARTBEAT.
pub fn autodetect_fc(
    candidate_urls: Vec<String>,
    heartbeat_timeout: Duration,
    sys_id: u8,
    comp_id: u8,
) -> Result<AutodetectResult> {
    let mut attempts = Vec::new();

    for url in candidate_urls {
        let start = Instant::now();
        let mut seen = None;

        let note = match FcLink::open(&url, sys_id, comp_id) {
            Ok(link) => {
                seen = wait_heartbeat(Arc::new(link), heartbeat_timeout);
                match seen {
                    Some(sys) => format!("heartbeat from sys {}", sys),
                    None => "no heartbeat".into(),
                }
            }
            Err(e) => {
                warn!("fc autodetect attempt failed url={} err={:#}", url, e);
                format!("open/connect failed: {:#}", e)
            }
        };

        attempts.push(AttemptResult {
            url: url.clone(),
            hb_seen: seen.is_some(),
            sys_id: seen,
            elapsed_ms: start.elapsed().as_millis() as u64,
            note,
        });

        if seen.is_some() {
            info!("fc autodetect: OK {}", url);
            return Ok(AutodetectResult {
                chosen: Some(url),
                attempts,
            });
        }
    }

    Ok(AutodetectResult {
        chosen: None,
        attempts,
    })
}

// recv blocks, so each attempt reads on a helper thread and we wait on a channel.
// A helper stuck on a silent link stays parked until the process exits.
fn wait_heartbeat(link: Arc<FcLink>, timeout: Duration) -> Option<u8> {
    let (tx, rx) = mpsc::channel();
    let reader = link.clone();
    let spawned = std::thread::Builder::new().name("mav-autodetect".into()).spawn(move || {
        let start = Instant::now();
        while start.elapsed() < timeout {
            match reader.recv() {
                Ok(Some((hdr, msg))) if msg.is_vehicle_heartbeat() => {
                    let _ = tx.send(hdr.system_id);
                    return;
                }
                Ok(_) => std::thread::sleep(Duration::from_millis(5)),
                Err(_) => return,
            }
        }
    });
    if spawned.is_err() {
        return None;
    }

    // some endpoints only talk once they hear from us
    let _ = link.send_heartbeat();
    rx.recv_timeout(timeout).ok()
}

// helper trait-ish on mavlink message without leaking mavlink type to callers
trait HeartbeatCheck {
    fn is_vehicle_heartbeat(&self) -> bool;
}

impl HeartbeatCheck for mavlink::common::MavMessage {
    fn is_vehicle_heartbeat(&self) -> bool {
        matches!(
            self,
            mavlink::common::MavMessage::HEARTBEAT(hb)
                if hb.mavtype != mavlink::common::MavType::MAV_TYPE_GCS
        )
    }
}
