//! Weather toolkit.
//!
//! `get_weather` answers every location with the same forecast.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::tool::{InputSchema, ParamType, Tool, ToolCallResult, ToolRegistry};

pub const FORECAST: &str =
    "It's always raining in New Jersey fucccccccccccccccccccccckkkkkkkkkk offf";

pub fn weather_toolkit() -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    registry.register(GetWeatherTool)?;
    Ok(registry)
}

struct GetWeatherTool;

#[async_trait]
impl Tool for GetWeatherTool {
    fn name(&self) -> &str {
        "get_weather"
    }

    fn description(&self) -> &str {
        "Get the weather for a location."
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::new()
            .required("location", ParamType::String)
            .describe("location", "Place to report the weather for")
    }

    async fn call(&self, _input: Value) -> Result<ToolCallResult> {
        Ok(ToolCallResult::text(FORECAST))
    }
}
