use super::{Tool, ToolError};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, Timelike};
use serde_json::{json, Value};

fn spoken_time(time: &DateTime<Local>) -> String {
    let formatted = time.format("%I:%M %p").to_string();
    formatted.trim_start_matches('0').to_string()
}

/// Current local time
pub struct GetTime;

#[async_trait]
impl Tool for GetTime {
    fn name(&self) -> &str {
        "get_time"
    }

    fn description(&self) -> &str {
        "Get the current local time"
    }

    async fn invoke(&self, _input: Value) -> Result<Option<Value>, ToolError> {
        let now = Local::now();
        Ok(Some(json!({
            "current_time": spoken_time(&now),
            "timestamp": now.timestamp(),
            "hour": now.hour(),
            "minute": now.minute(),
            "period": now.format("%p").to_string()
        })))
    }
}

/// Time after a given offset from now
pub struct CalculateFutureTime;

#[async_trait]
impl Tool for CalculateFutureTime {
    fn name(&self) -> &str {
        "calculate_future_time"
    }

    fn description(&self) -> &str {
        "Calculate what time it will be in a specified number of hours and/or minutes from now"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "hours": {
                    "type": "integer",
                    "description": "Number of hours to add to current time"
                },
                "minutes": {
                    "type": "integer",
                    "description": "Number of minutes to add to current time"
                }
            },
            "required": ["hours", "minutes"]
        })
    }

    async fn invoke(&self, input: Value) -> Result<Option<Value>, ToolError> {
        let hours = offset(&input, "hours")?;
        let minutes = offset(&input, "minutes")?;

        let future = Local::now() + Duration::hours(hours) + Duration::minutes(minutes);
        Ok(Some(json!({
            "future_time": spoken_time(&future),
            "timestamp": future.timestamp(),
            "hours": hours,
            "minutes": minutes
        })))
    }
}

fn offset(input: &Value, field: &str) -> Result<i64, ToolError> {
    match input.get(field) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value.as_i64().ok_or_else(|| {
            ToolError::InvalidParameters(format!("'{}' must be an integer", field))
        }),
    }
}
