//! `getWeather`: current conditions from Open-Meteo.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use crate::error::BotError;
use crate::provider::http::shared_client;
use crate::tools::tool::{AgentTool, Tool, ToolExecutionContext};
use crate::tools::types::AgentToolParameters;

const TOOL_NAME: &str = "getWeather";
const DEFAULT_BASE_URL: &str = "https://api.open-meteo.com";
const CURRENT_FIELDS: &str = "temperature_2m,weathercode,relativehumidity_2m";

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    current: CurrentConditions,
}

#[derive(Debug, Deserialize)]
struct CurrentConditions {
    temperature_2m: serde_json::Value,
    weathercode: serde_json::Value,
    relativehumidity_2m: serde_json::Value,
}

fn to_result(forecast: ForecastResponse, city: &str) -> serde_json::Value {
    serde_json::json!({
        "temperature": forecast.current.temperature_2m,
        "weatherCode": forecast.current.weathercode,
        "humidity": forecast.current.relativehumidity_2m,
        "city": city,
    })
}

/// Create the weather tool. `base_url` overrides the Open-Meteo host.
pub fn weather_tool(base_url: Option<String>) -> Arc<dyn Tool> {
    let base_url = base_url
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string();

    Arc::new(AgentTool::new(
        TOOL_NAME,
        "Get the current weather at a location",
        AgentToolParameters::object()
            .number("latitude", "Latitude of the location", true)
            .number("longitude", "Longitude of the location", true)
            .string("city", "City name, used as a label in the reply", true)
            .build(),
        move |args, ctx: ToolExecutionContext| {
            let url = format!("{base_url}/v1/forecast");
            async move {
                let latitude = args.get_f64("latitude")?;
                let longitude = args.get_f64("longitude")?;
                let city = args.get_str("city")?.to_string();

                ctx.status.emit(format!("Fetching weather for {city}..."));
                debug!(latitude, longitude, city = %city, "requesting forecast");

                let response = shared_client()
                    .get(&url)
                    .query(&[
                        ("latitude", latitude.to_string()),
                        ("longitude", longitude.to_string()),
                        ("current", CURRENT_FIELDS.to_string()),
                        ("timezone", "auto".to_string()),
                    ])
                    .send()
                    .await
                    .map_err(|e| BotError::tool(TOOL_NAME, e.to_string()))?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(BotError::tool(
                        TOOL_NAME,
                        format!("forecast request failed ({}): {body}", status.as_u16()),
                    ));
                }

                let forecast: ForecastResponse = response
                    .json()
                    .await
                    .map_err(|e| BotError::tool(TOOL_NAME, format!("malformed forecast: {e}")))?;

                Ok(to_result(forecast, &city))
            }
        },
    ))
}
