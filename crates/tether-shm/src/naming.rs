//! Buffer names shared with the simulator.
//!
//! Both processes derive these from the same scenario data; a mismatch
//! is silent on both sides, so every name is built here.

/// Serialized command text.
pub const COMMAND_BUFFER: &str = "command_buffer";
/// One-byte "commands pending" flag.
pub const COMMAND_BOOL: &str = "command_bool";
/// One-byte reset request flag.
pub const RESET: &str = "RESET";

/// Action buffer of an agent (the bare agent name).
pub fn action(agent: &str) -> String {
    agent.to_string()
}

/// Data buffer of a sensor.
pub fn sensor_data(agent: &str, sensor: &str) -> String {
    format!("{agent}_{sensor}_sensor_data")
}

/// Teleport request flag of an agent.
pub fn teleport_flag(agent: &str) -> String {
    format!("{agent}_teleport_flag")
}

/// Teleport target (location, rotation, velocity, angular velocity).
pub fn teleport_command(agent: &str) -> String {
    format!("{agent}_teleport_command")
}

/// Active control scheme of an agent.
pub fn control_scheme(agent: &str) -> String {
    format!("{agent}_control_scheme")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_agent_purpose_convention() {
        assert_eq!(sensor_data("auv0", "DynamicsSensor"), "auv0_DynamicsSensor_sensor_data");
        assert_eq!(teleport_command("auv0"), "auv0_teleport_command");
        assert_eq!(teleport_flag("auv0"), "auv0_teleport_flag");
        assert_eq!(control_scheme("auv0"), "auv0_control_scheme");
        assert_eq!(action("auv0"), "auv0");
    }
}
