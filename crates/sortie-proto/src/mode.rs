use serde::{Deserialize, Serialize};

/// ArduCopter flight modes, as reported in HEARTBEAT.custom_mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlightMode {
    Stabilize,
    Acro,
    AltHold,
    Auto,
    Guided,
    Loiter,
    Rtl,
    Circle,
    Land,
    Drift,
    Sport,
    Flip,
    AutoTune,
    PosHold,
    Brake,
    Throw,
    AvoidAdsb,
    GuidedNoGps,
    SmartRtl,
    FlowHold,
    Follow,
    ZigZag,
    SystemId,
    AutoRotate,
    AutoRtl,
    Turtle,
    Unknown(u32),
}

impl FlightMode {
    pub fn from_custom_mode(mode: u32) -> Self {
        match mode {
            0 => FlightMode::Stabilize,
            1 => FlightMode::Acro,
            2 => FlightMode::AltHold,
            3 => FlightMode::Auto,
            4 => FlightMode::Guided,
            5 => FlightMode::Loiter,
            6 => FlightMode::Rtl,
            7 => FlightMode::Circle,
            9 => FlightMode::Land,
            11 => FlightMode::Drift,
            13 => FlightMode::Sport,
            14 => FlightMode::Flip,
            15 => FlightMode::AutoTune,
            16 => FlightMode::PosHold,
            17 => FlightMode::Brake,
            18 => FlightMode::Throw,
            19 => FlightMode::AvoidAdsb,
            20 => FlightMode::GuidedNoGps,
            21 => FlightMode::SmartRtl,
            22 => FlightMode::FlowHold,
            23 => FlightMode::Follow,
            24 => FlightMode::ZigZag,
            25 => FlightMode::SystemId,
            26 => FlightMode::AutoRotate,
            27 => FlightMode::AutoRtl,
            28 => FlightMode::Turtle,
            other => FlightMode::Unknown(other),
        }
    }

    pub fn custom_mode(self) -> u32 {
        match self {
            FlightMode::Stabilize => 0,
            FlightMode::Acro => 1,
            FlightMode::AltHold => 2,
            FlightMode::Auto => 3,
            FlightMode::Guided => 4,
            FlightMode::Loiter => 5,
            FlightMode::Rtl => 6,
            FlightMode::Circle => 7,
            FlightMode::Land => 9,
            FlightMode::Drift => 11,
            FlightMode::Sport => 13,
            FlightMode::Flip => 14,
            FlightMode::AutoTune => 15,
            FlightMode::PosHold => 16,
            FlightMode::Brake => 17,
            FlightMode::Throw => 18,
            FlightMode::AvoidAdsb => 19,
            FlightMode::GuidedNoGps => 20,
            FlightMode::SmartRtl => 21,
            FlightMode::FlowHold => 22,
            FlightMode::Follow => 23,
            FlightMode::ZigZag => 24,
            FlightMode::SystemId => 25,
            FlightMode::AutoRotate => 26,
            FlightMode::AutoRtl => 27,
            FlightMode::Turtle => 28,
            FlightMode::Unknown(m) => m,
        }
    }

    /// Name as ground stations print it (e.g. "ALT_HOLD").
    pub fn name(self) -> String {
        let s = match self {
            FlightMode::Stabilize => "STABILIZE",
            FlightMode::Acro => "ACRO",
            FlightMode::AltHold => "ALT_HOLD",
            FlightMode::Auto => "AUTO",
            FlightMode::Guided => "GUIDED",
            FlightMode::Loiter => "LOITER",
            FlightMode::Rtl => "RTL",
            FlightMode::Circle => "CIRCLE",
            FlightMode::Land => "LAND",
            FlightMode::Drift => "DRIFT",
            FlightMode::Sport => "SPORT",
            FlightMode::Flip => "FLIP",
            FlightMode::AutoTune => "AUTOTUNE",
            FlightMode::PosHold => "POSHOLD",
            FlightMode::Brake => "BRAKE",
            FlightMode::Throw => "THROW",
            FlightMode::AvoidAdsb => "AVOID_ADSB",
            FlightMode::GuidedNoGps => "GUIDED_NOGPS",
            FlightMode::SmartRtl => "SMART_RTL",
            FlightMode::FlowHold => "FLOWHOLD",
            FlightMode::Follow => "FOLLOW",
            FlightMode::ZigZag => "ZIGZAG",
            FlightMode::SystemId => "SYSTEMID",
            FlightMode::AutoRotate => "AUTOROTATE",
            FlightMode::AutoRtl => "AUTO_RTL",
            FlightMode::Turtle => "TURTLE",
            FlightMode::Unknown(m) => return format!("MODE({})", m),
        };
        s.to_string()
    }
}
