//! Built-in tools available to every session, with or without an external catalog.

use crate::tools::ToolSpec;
use serde_json::{Value, json};
use tracing::info;

pub const TURN_ON_THE_LIGHTS: &str = "turn_on_the_lights";
pub const TURN_OFF_THE_LIGHTS: &str = "turn_off_the_lights";

/// Declarations for the built-in tools.
pub fn builtin_tools() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TURN_ON_THE_LIGHTS.to_string(),
            description: "Turn on the lights in the room.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "color": {
                        "type": "string",
                        "description": "The color to set the lights in hex format (e.g., #FFFFFF for white).",
                        "default": "#FFFFFF"
                    }
                },
                "required": ["color"]
            }),
        },
        ToolSpec {
            name: TURN_OFF_THE_LIGHTS.to_string(),
            description: "Turn off the lights in the room.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

/// Runs a built-in tool. Unknown names yield an explanatory result, not an error.
///
/// The lights themselves are rendered by the browser from the `function_call`
/// event, so the result is a fixed acknowledgement.
pub fn call_builtin(name: &str, args: &Value) -> Value {
    info!(name, %args, "Handling built-in function");
    let result = match name {
        TURN_ON_THE_LIGHTS => "Lights turned on! 💡".to_string(),
        TURN_OFF_THE_LIGHTS => "Lights turned off! 🌙".to_string(),
        other => format!("Unknown function: {other}"),
    };
    Value::String(result)
}
