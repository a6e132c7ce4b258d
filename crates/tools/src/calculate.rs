//! The `calculate` tool, needed by the single-tool happy path: it
//! evaluates an arithmetic expression and returns the numeric result.

use agentcore_domain::tool::{Tool, ToolOutput};
use async_trait::async_trait;
use serde_json::Value;

pub struct CalculateTool;

#[async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression and return the numeric result."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {"type": "string", "description": "An arithmetic expression, e.g. '42*17'"},
            },
            "required": ["expression"],
        })
    }

    async fn invoke(&self, input: Value) -> ToolOutput {
        let Some(expr) = input.get("expression").and_then(|v| v.as_str()) else {
            return ToolOutput::error("missing required field 'expression'");
        };

        match fasteval::ez_eval(expr, &mut fasteval::EmptyNamespace) {
            Ok(value) => {
                let text = if value.fract() == 0.0 && value.is_finite() {
                    format!("{}", value as i64)
                } else {
                    format!("{value}")
                };
                ToolOutput::text(text)
            }
            Err(e) => ToolOutput::error(format!("could not evaluate expression: {e}")),
        }
    }
}
