use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{CommandKind, Frame};

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid command: {field}={value} {reason}")]
pub struct InvalidCommand {
    pub field: &'static str,
    pub value: f64,
    pub reason: &'static str,
}

/// Unvalidated, named-field description of a mission command.
/// This is what mission files and callers write; [`Command::new`] validates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandSpec {
    pub frame: Frame,
    pub command: CommandKind,
    pub current: bool,
    pub autocontinue: bool,
    pub param1: f64,
    pub param2: f64,
    pub param3: f64,
    pub param4: f64,
    /// Latitude (global frames) or x position.
    pub x: f64,
    /// Longitude (global frames) or y position.
    pub y: f64,
    /// Altitude or z position.
    pub z: f64,
}

impl Default for CommandSpec {
    fn default() -> Self {
        Self {
            frame: Frame::GlobalRelativeAlt,
            command: CommandKind::Waypoint,
            current: false,
            autocontinue: true,
            param1: 0.0,
            param2: 0.0,
            param3: 0.0,
            param4: 0.0,
            x: 0.0,
            y: 0.0,
            z: 0.0,
        }
    }
}

/// A mission item exactly as MISSION_ITEM_INT carries it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawItem {
    pub seq: u16,
    pub frame: Frame,
    pub command: CommandKind,
    pub current: bool,
    pub autocontinue: bool,
    pub param1: f32,
    pub param2: f32,
    pub param3: f32,
    pub param4: f32,
    pub x: i32,
    pub y: i32,
    pub z: f32,
}

/// A validated navigation command.
///
/// Values are held in their wire representation, so an item that survives an
/// upload/download cycle compares equal to the one that was built locally.
/// `seq` is owned by the remote store and is ignored by [`Command::diff`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    seq: u16,
    frame: Frame,
    command: CommandKind,
    current: bool,
    autocontinue: bool,
    param1: f32,
    param2: f32,
    param3: f32,
    param4: f32,
    x: i32,
    y: i32,
    z: f32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMismatch {
    pub field: &'static str,
    pub expected: String,
    pub actual: String,
}

impl Command {
    pub fn new(spec: CommandSpec) -> Result<Self, InvalidCommand> {
        check_kind(spec.command)?;
        if spec.frame.is_global() {
            check_lat_lon(spec.x, spec.y)?;
        }

        let scale = spec.frame.xy_scale();
        Ok(Self {
            seq: 0,
            frame: spec.frame,
            command: spec.command,
            current: spec.current,
            autocontinue: spec.autocontinue,
            param1: to_f32("param1", spec.param1)?,
            param2: to_f32("param2", spec.param2)?,
            param3: to_f32("param3", spec.param3)?,
            param4: to_f32("param4", spec.param4)?,
            x: to_scaled_i32("x", spec.x, scale)?,
            y: to_scaled_i32("y", spec.y, scale)?,
            z: to_f32("z", spec.z)?,
        })
    }

    /// Takeoff to `alt` metres above home. `pitch` is the minimum pitch (param1).
    pub fn takeoff(pitch: f64, alt: f64) -> Result<Self, InvalidCommand> {
        Self::new(CommandSpec {
            command: CommandKind::Takeoff,
            param1: pitch,
            z: alt,
            ..Default::default()
        })
    }

    pub fn waypoint(lat: f64, lon: f64, alt: f64) -> Result<Self, InvalidCommand> {
        Self::new(CommandSpec {
            command: CommandKind::Waypoint,
            x: lat,
            y: lon,
            z: alt,
            ..Default::default()
        })
    }

    pub fn loiter_unlim(lat: f64, lon: f64, alt: f64) -> Result<Self, InvalidCommand> {
        Self::new(CommandSpec {
            command: CommandKind::LoiterUnlim,
            x: lat,
            y: lon,
            z: alt,
            ..Default::default()
        })
    }

    /// Same command with a store-assigned index.
    pub fn with_seq(&self, seq: u16) -> Self {
        Self { seq, ..self.clone() }
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn frame(&self) -> Frame {
        self.frame
    }

    pub fn kind(&self) -> CommandKind {
        self.command
    }

    pub fn current(&self) -> bool {
        self.current
    }

    pub fn autocontinue(&self) -> bool {
        self.autocontinue
    }

    pub fn param1(&self) -> f32 {
        self.param1
    }

    pub fn param2(&self) -> f32 {
        self.param2
    }

    pub fn param3(&self) -> f32 {
        self.param3
    }

    pub fn param4(&self) -> f32 {
        self.param4
    }

    pub fn z(&self) -> f32 {
        self.z
    }

    /// x in user units (degrees for global frames).
    pub fn x(&self) -> f64 {
        self.x as f64 / self.frame.xy_scale()
    }

    /// y in user units (degrees for global frames).
    pub fn y(&self) -> f64 {
        self.y as f64 / self.frame.xy_scale()
    }

    /// The seven parameters in user units, in MAVLink order.
    pub fn params(&self) -> [f64; 7] {
        [
            self.param1 as f64,
            self.param2 as f64,
            self.param3 as f64,
            self.param4 as f64,
            self.x(),
            self.y(),
            self.z as f64,
        ]
    }

    /// Check a command that was not built through [`Command::new`], such as
    /// one rebuilt from a downloaded [`RawItem`].
    pub fn validate(&self) -> Result<(), InvalidCommand> {
        check_kind(self.command)?;
        let floats = [
            ("param1", self.param1),
            ("param2", self.param2),
            ("param3", self.param3),
            ("param4", self.param4),
            ("z", self.z),
        ];
        for (field, v) in floats {
            if !v.is_finite() {
                return Err(InvalidCommand {
                    field,
                    value: v as f64,
                    reason: "is not finite",
                });
            }
        }
        if self.frame.is_global() {
            check_lat_lon(self.x(), self.y())?;
        }
        Ok(())
    }

    pub fn to_raw(&self) -> RawItem {
        RawItem {
            seq: self.seq,
            frame: self.frame,
            command: self.command,
            current: self.current,
            autocontinue: self.autocontinue,
            param1: self.param1,
            param2: self.param2,
            param3: self.param3,
            param4: self.param4,
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }

    /// First field that differs from `other`, ignoring `seq`.
    pub fn diff(&self, other: &Command) -> Option<FieldMismatch> {
        fn mismatch<T: fmt::Debug>(field: &'static str, a: T, b: T) -> Option<FieldMismatch> {
            Some(FieldMismatch {
                field,
                expected: format!("{:?}", a),
                actual: format!("{:?}", b),
            })
        }

        if self.frame != other.frame {
            return mismatch("frame", self.frame, other.frame);
        }
        if self.command != other.command {
            return mismatch("command", self.command, other.command);
        }
        if self.current != other.current {
            return mismatch("current", self.current, other.current);
        }
        if self.autocontinue != other.autocontinue {
            return mismatch("autocontinue", self.autocontinue, other.autocontinue);
        }
        let floats = [
            ("param1", self.param1, other.param1),
            ("param2", self.param2, other.param2),
            ("param3", self.param3, other.param3),
            ("param4", self.param4, other.param4),
        ];
        for (field, a, b) in floats {
            if !same_f32(a, b) {
                return mismatch(field, a, b);
            }
        }
        if self.x != other.x {
            return mismatch("x", self.x(), other.x());
        }
        if self.y != other.y {
            return mismatch("y", self.y(), other.y());
        }
        if !same_f32(self.z, other.z) {
            return mismatch("z", self.z, other.z);
        }
        None
    }
}

impl From<RawItem> for Command {
    fn from(raw: RawItem) -> Self {
        Self {
            seq: raw.seq,
            frame: raw.frame,
            command: raw.command,
            current: raw.current,
            autocontinue: raw.autocontinue,
            param1: raw.param1,
            param2: raw.param2,
            param3: raw.param3,
            param4: raw.param4,
            x: raw.x,
            y: raw.y,
            z: raw.z,
        }
    }
}

impl TryFrom<CommandSpec> for Command {
    type Error = InvalidCommand;

    fn try_from(spec: CommandSpec) -> Result<Self, Self::Error> {
        Command::new(spec)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {:?} frame={:?} current={} autocontinue={} p=[{}, {}, {}, {}] x={} y={} z={}",
            self.seq,
            self.command,
            self.frame,
            self.current as u8,
            self.autocontinue as u8,
            self.param1,
            self.param2,
            self.param3,
            self.param4,
            self.x(),
            self.y(),
            self.z,
        )
    }
}

fn same_f32(a: f32, b: f32) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

fn check_kind(kind: CommandKind) -> Result<(), InvalidCommand> {
    if let CommandKind::Other(id) = kind {
        return Err(InvalidCommand {
            field: "command",
            value: id as f64,
            reason: "has no upload mapping",
        });
    }
    Ok(())
}

fn check_lat_lon(lat: f64, lon: f64) -> Result<(), InvalidCommand> {
    if !(-90.0..=90.0).contains(&lat) {
        return Err(InvalidCommand {
            field: "x",
            value: lat,
            reason: "latitude out of range",
        });
    }
    if !(-180.0..=180.0).contains(&lon) {
        return Err(InvalidCommand {
            field: "y",
            value: lon,
            reason: "longitude out of range",
        });
    }
    Ok(())
}

fn to_f32(field: &'static str, v: f64) -> Result<f32, InvalidCommand> {
    if !v.is_finite() {
        return Err(InvalidCommand {
            field,
            value: v,
            reason: "is not finite",
        });
    }
    if v.abs() > f32::MAX as f64 {
        return Err(InvalidCommand {
            field,
            value: v,
            reason: "exceeds f32 range",
        });
    }
    Ok(v as f32)
}

fn to_scaled_i32(field: &'static str, v: f64, scale: f64) -> Result<i32, InvalidCommand> {
    if !v.is_finite() {
        return Err(InvalidCommand {
            field,
            value: v,
            reason: "is not finite",
        });
    }
    let scaled = (v * scale).round();
    if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(InvalidCommand {
            field,
            value: v,
            reason: "exceeds i32 wire range",
        });
    }
    Ok(scaled as i32)
}
