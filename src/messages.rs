// Define message types for the runtime

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlatformError, Result};
use crate::kinematics::Pose;

// Request from a client -> runtime, plain text on the command topic:
// "get", "set x y z roll pitch yaw", or "exit"
#[derive(Debug, Clone, PartialEq)]
pub enum PoseRequest {
    Get,
    Set(Pose),
    Exit,
}

impl PoseRequest {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (verb, arguments) = text.split_once(char::is_whitespace).unwrap_or((text, ""));

        match verb.to_ascii_lowercase().as_str() {
            "get" => Ok(PoseRequest::Get),
            "set" => parse_pose(arguments).map(PoseRequest::Set),
            "exit" => Ok(PoseRequest::Exit),
            _ => Err(PlatformError::InvalidArgument(format!(
                "unknown request {:?}",
                text
            ))),
        }
    }
}

impl FromStr for PoseRequest {
    type Err = PlatformError;

    fn from_str(text: &str) -> Result<Self> {
        PoseRequest::parse(text)
    }
}

/// Parse six floats separated by whitespace and/or commas
pub fn parse_pose(text: &str) -> Result<Pose> {
    let values = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(str::parse::<f64>)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| PlatformError::InvalidArgument(format!("malformed pose {:?}: {}", text, e)))?;

    let values: [f64; 6] = values.try_into().map_err(|values: Vec<f64>| {
        PlatformError::InvalidArgument(format!("a pose has 6 values, got {}", values.len()))
    })?;
    Ok(Pose::from_array(values))
}

/// Six space-separated floats: x y z roll pitch yaw
pub fn format_pose(pose: &Pose) -> String {
    pose.as_array()
        .iter()
        .map(|value| value.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

// Reply from runtime -> client on the pose state topic
#[derive(Debug, Clone, PartialEq)]
pub enum PoseReply {
    Pose(Pose),
    Ack,
    Nack,
}

impl fmt::Display for PoseReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoseReply::Pose(pose) => write!(f, "{}", format_pose(pose)),
            PoseReply::Ack => write!(f, "ACK"),
            PoseReply::Nack => write!(f, "NACK"),
        }
    }
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Idle,
    Moving,
    Fault,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_requests() {
        assert_eq!(PoseRequest::parse("get").unwrap(), PoseRequest::Get);
        assert_eq!(PoseRequest::parse("  EXIT\n").unwrap(), PoseRequest::Exit);
        assert_eq!(
            "set 0 0 0.25 0 0 0".parse::<PoseRequest>().unwrap(),
            PoseRequest::Set(Pose::new(0.0, 0.0, 0.25, 0.0, 0.0, 0.0))
        );
        assert_eq!(
            PoseRequest::parse("set 0.01, -0.02, 0.23, 0.1, 0, -0.3").unwrap(),
            PoseRequest::Set(Pose::new(0.01, -0.02, 0.23, 0.1, 0.0, -0.3))
        );
    }

    #[test]
    fn test_parse_rejects_malformed_requests() {
        assert!(PoseRequest::parse("jump").is_err());
        assert!(PoseRequest::parse("set 1 2 3").is_err());
        assert!(PoseRequest::parse("set 1 2 3 4 5 x").is_err());
        assert!(PoseRequest::parse("").is_err());
    }

    #[test]
    fn test_format_pose_parses_back() {
        let pose = Pose::new(0.0123, -0.02, 0.25, 0.1, -0.2, 0.6);
        assert_eq!(format_pose(&pose), "0.0123 -0.02 0.25 0.1 -0.2 0.6");
        assert_eq!(parse_pose(&format_pose(&pose)).unwrap(), pose);
    }

    #[test]
    fn test_reply_text() {
        assert_eq!(PoseReply::Ack.to_string(), "ACK");
        assert_eq!(PoseReply::Nack.to_string(), "NACK");
    }

    #[test]
    fn test_health_serialization() {
        assert_eq!(serde_json::to_string(&RuntimeHealth::Moving).unwrap(), "\"moving\"");
        assert_eq!(
            serde_json::from_str::<RuntimeHealth>("\"fault\"").unwrap(),
            RuntimeHealth::Fault
        );
    }
}
