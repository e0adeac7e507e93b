use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use mavlink::{
    common::{HEARTBEAT_DATA, MavAutopilot, MavMessage, MavModeFlag, MavState, MavType},
    error::MessageReadError,
    MavConnection, MavHeader,
};
use tokio_serial::SerialPortBuilderExt;
use tracing::debug;

/// Outbound half of a MAVLink link.
pub trait MavSink: Send + Sync {
    fn send(&self, msg: &MavMessage) -> Result<()>;
}

/// A MAVLink connection to a flight controller, shared between the reader
/// thread and the senders.
pub struct FcLink {
    conn: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    url: String,
    sys_id: u8,
    comp_id: u8,
    sequence: AtomicU8,
}

impl FcLink {
    /// `url` is a mavlink connection string: `tcpout:host:port`,
    /// `udpin:addr:port`, `serial:/dev/ttyACM0:115200`, ...
    pub fn open(url: &str, sys_id: u8, comp_id: u8) -> Result<Self> {
        if let Some(rest) = url.strip_prefix("serial:") {
            // quick validate device
            let (dev, baud) = rest
                .rsplit_once(':')
                .context("serial url must be serial:<dev>:<baud>")?;
            let baud: u32 = baud.parse().with_context(|| format!("bad baud in {}", url))?;
            let _ = tokio_serial::new(dev, baud)
                .open_native_async()
                .with_context(|| format!("open fc serial device {}", dev))?;
        }

        let conn = mavlink::connect::<MavMessage>(url)
            .with_context(|| format!("mavlink connect {}", url))?;

        Ok(Self {
            conn: Arc::from(conn),
            url: url.to_string(),
            sys_id,
            comp_id,
            sequence: AtomicU8::new(0),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Blocking receive. Returns Ok(None) on parse errors and read timeouts;
    /// only a dead transport is an error.
    pub fn recv(&self) -> Result<Option<(MavHeader, MavMessage)>> {
        match self.conn.recv() {
            Ok(pair) => Ok(Some(pair)),
            Err(MessageReadError::Io(e)) => match e.kind() {
                std::io::ErrorKind::WouldBlock
                | std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::Interrupted => Ok(None),
                _ => Err(anyhow::Error::new(e).context("mavlink recv")),
            },
            Err(e) => {
                debug!("mavlink parse error: {:?}", e);
                Ok(None)
            }
        }
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        let hb = HEARTBEAT_DATA {
            custom_mode: 0,
            mavtype: MavType::MAV_TYPE_GCS,
            autopilot: MavAutopilot::MAV_AUTOPILOT_INVALID,
            base_mode: MavModeFlag::empty(),
            system_status: MavState::MAV_STATE_ACTIVE,
            mavlink_version: 3,
        };
        self.send(&MavMessage::HEARTBEAT(hb))
    }
}

impl MavSink for FcLink {
    fn send(&self, msg: &MavMessage) -> Result<()> {
        let hdr = MavHeader {
            system_id: self.sys_id,
            component_id: self.comp_id,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed),
        };
        self.conn.send(&hdr, msg).context("mavlink send")?;
        Ok(())
    }
}
