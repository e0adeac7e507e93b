use mavlink::common::{MavCmd, MavFrame, MISSION_ITEM_INT_DATA};
use sortie_proto::{Command, CommandKind, Frame, InvalidCommand, RawItem};

use crate::error::MissionError;

pub fn to_mav_frame(frame: Frame) -> MavFrame {
    match frame {
        Frame::Global => MavFrame::MAV_FRAME_GLOBAL,
        Frame::LocalNed => MavFrame::MAV_FRAME_LOCAL_NED,
        Frame::Mission => MavFrame::MAV_FRAME_MISSION,
        Frame::GlobalRelativeAlt => MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT,
        Frame::LocalEnu => MavFrame::MAV_FRAME_LOCAL_ENU,
        Frame::GlobalTerrainAlt => MavFrame::MAV_FRAME_GLOBAL_TERRAIN_ALT,
    }
}

pub fn to_mav_cmd(kind: CommandKind) -> Result<MavCmd, InvalidCommand> {
    Ok(match kind {
        CommandKind::Waypoint => MavCmd::MAV_CMD_NAV_WAYPOINT,
        CommandKind::LoiterUnlim => MavCmd::MAV_CMD_NAV_LOITER_UNLIM,
        CommandKind::LoiterTurns => MavCmd::MAV_CMD_NAV_LOITER_TURNS,
        CommandKind::LoiterTime => MavCmd::MAV_CMD_NAV_LOITER_TIME,
        CommandKind::ReturnToLaunch => MavCmd::MAV_CMD_NAV_RETURN_TO_LAUNCH,
        CommandKind::Land => MavCmd::MAV_CMD_NAV_LAND,
        CommandKind::Takeoff => MavCmd::MAV_CMD_NAV_TAKEOFF,
        CommandKind::DoChangeSpeed => MavCmd::MAV_CMD_DO_CHANGE_SPEED,
        CommandKind::DoSetHome => MavCmd::MAV_CMD_DO_SET_HOME,
        CommandKind::Other(id) => {
            return Err(InvalidCommand {
                field: "command",
                value: id as f64,
                reason: "has no upload mapping",
            })
        }
    })
}

/// Encode `cmd` as MISSION_ITEM_INT with the given sequence number.
pub fn encode_item(
    cmd: &Command,
    seq: u16,
    target_system: u8,
    target_component: u8,
) -> Result<MISSION_ITEM_INT_DATA, MissionError> {
    let raw = cmd.to_raw();
    Ok(MISSION_ITEM_INT_DATA {
        param1: raw.param1,
        param2: raw.param2,
        param3: raw.param3,
        param4: raw.param4,
        x: raw.x,
        y: raw.y,
        z: raw.z,
        seq,
        command: to_mav_cmd(raw.command)?,
        target_system,
        target_component,
        frame: to_mav_frame(raw.frame),
        current: raw.current as u8,
        autocontinue: raw.autocontinue as u8,
    })
}

pub fn decode_item(item: &MISSION_ITEM_INT_DATA) -> Result<Command, MissionError> {
    let frame_id = item.frame as u8;
    let frame = Frame::from_id(frame_id).ok_or_else(|| {
        MissionError::Transport(format!("item {} has unsupported frame {}", item.seq, frame_id))
    })?;
    Ok(Command::from(RawItem {
        seq: item.seq,
        frame,
        command: CommandKind::from_id(item.command as u16),
        current: item.current != 0,
        autocontinue: item.autocontinue != 0,
        param1: item.param1,
        param2: item.param2,
        param3: item.param3,
        param4: item.param4,
        x: item.x,
        y: item.y,
        z: item.z,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loiter_item_encodes_scaled_coordinates() {
        let cmd = Command::loiter_unlim(-30.0, 30.0, 30.0).unwrap();
        let item = encode_item(&cmd, 4, 1, 1).unwrap();
        assert_eq!(item.seq, 4);
        assert_eq!(item.x, -300_000_000);
        assert_eq!(item.y, 300_000_000);
        assert_eq!(item.z, 30.0);
        assert_eq!(item.command, MavCmd::MAV_CMD_NAV_LOITER_UNLIM);
        assert_eq!(item.frame, MavFrame::MAV_FRAME_GLOBAL_RELATIVE_ALT);
        assert_eq!(item.autocontinue, 1);

        let back = decode_item(&item).unwrap();
        assert_eq!(back.seq(), 4);
        assert_eq!(cmd.diff(&back), None);
    }

    #[test]
    fn unknown_frames_are_transport_errors() {
        let mut item = encode_item(&Command::takeoff(10.0, 10.0).unwrap(), 1, 1, 1).unwrap();
        item.frame = MavFrame::MAV_FRAME_BODY_FRD;
        assert!(matches!(decode_item(&item), Err(MissionError::Transport(_))));
    }

    #[test]
    fn unnamed_commands_decode_as_other() {
        let mut item = encode_item(&Command::takeoff(10.0, 10.0).unwrap(), 1, 1, 1).unwrap();
        item.command = MavCmd::MAV_CMD_DO_SET_SERVO;
        let cmd = decode_item(&item).unwrap();
        assert_eq!(cmd.kind(), CommandKind::Other(183));
        assert!(to_mav_cmd(cmd.kind()).is_err());
    }
}
