use serde::{Deserialize, Serialize};

/// Coordinate frame of a mission item. Ids follow MAV_FRAME in the common dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    Global,
    LocalNed,
    Mission,
    GlobalRelativeAlt,
    LocalEnu,
    GlobalTerrainAlt,
}

impl Frame {
    pub fn id(self) -> u8 {
        match self {
            Frame::Global => 0,
            Frame::LocalNed => 1,
            Frame::Mission => 2,
            Frame::GlobalRelativeAlt => 3,
            Frame::LocalEnu => 4,
            Frame::GlobalTerrainAlt => 10,
        }
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Frame::Global,
            1 => Frame::LocalNed,
            2 => Frame::Mission,
            3 => Frame::GlobalRelativeAlt,
            4 => Frame::LocalEnu,
            10 => Frame::GlobalTerrainAlt,
            _ => return None,
        })
    }

    pub fn is_global(self) -> bool {
        matches!(self, Frame::Global | Frame::GlobalRelativeAlt | Frame::GlobalTerrainAlt)
    }

    /// Multiplier applied to x/y before they go on the wire as i32.
    /// Global frames carry degrees * 1e7, local frames metres * 1e4.
    pub fn xy_scale(self) -> f64 {
        match self {
            Frame::Global | Frame::GlobalRelativeAlt | Frame::GlobalTerrainAlt => 1e7,
            Frame::LocalNed | Frame::LocalEnu => 1e4,
            Frame::Mission => 1.0,
        }
    }
}

/// Mission command type. Ids follow MAV_CMD in the common dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Waypoint,
    LoiterUnlim,
    LoiterTurns,
    LoiterTime,
    ReturnToLaunch,
    Land,
    Takeoff,
    DoChangeSpeed,
    DoSetHome,
    /// Reported by a vehicle but not named here. Can be compared, not uploaded.
    Other(u16),
}

impl CommandKind {
    pub fn id(self) -> u16 {
        match self {
            CommandKind::Waypoint => 16,
            CommandKind::LoiterUnlim => 17,
            CommandKind::LoiterTurns => 18,
            CommandKind::LoiterTime => 19,
            CommandKind::ReturnToLaunch => 20,
            CommandKind::Land => 21,
            CommandKind::Takeoff => 22,
            CommandKind::DoChangeSpeed => 178,
            CommandKind::DoSetHome => 179,
            CommandKind::Other(id) => id,
        }
    }

    pub fn from_id(id: u16) -> Self {
        match id {
            16 => CommandKind::Waypoint,
            17 => CommandKind::LoiterUnlim,
            18 => CommandKind::LoiterTurns,
            19 => CommandKind::LoiterTime,
            20 => CommandKind::ReturnToLaunch,
            21 => CommandKind::Land,
            22 => CommandKind::Takeoff,
            178 => CommandKind::DoChangeSpeed,
            179 => CommandKind::DoSetHome,
            other => CommandKind::Other(other),
        }
    }

    pub fn is_nav(self) -> bool {
        self.id() < 100
    }
}
