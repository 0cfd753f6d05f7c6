//! Built-in tools available to the assistant.

use serde_json::{Value, json};

use super::{ArgumentSchema, ArgumentType, ToolDispatcherBuilder, ToolError, handler};

/// Register the gateway's built-in tools on `builder`.
pub fn register_builtin_tools(
    builder: ToolDispatcherBuilder,
) -> Result<ToolDispatcherBuilder, ToolError> {
    let builder = builder.register(
        "get_service_status",
        "Get the current status of all monitored services including servers and database. \
         Use this when the user asks about service health, server status, or system uptime.",
        ArgumentSchema::empty(),
        handler(|_args| async move { Ok(service_status()) }),
    )?;

    let builder = builder.register(
        "set_reminder",
        "Set a reminder with the given text. \
         Use this when the user wants to be reminded about something.",
        ArgumentSchema::empty().required(
            "text",
            ArgumentType::String,
            "The reminder text describing what the user wants to be reminded about.",
        ),
        handler(|args| async move {
            let text = args
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tracing::info!(reminder = %text, "Reminder set");
            Ok(Value::String("Success".to_string()))
        }),
    )?;

    Ok(builder)
}

fn service_status() -> Value {
    json!({
        "server_1": "online",
        "database": "online",
        "uptime": "99%",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{ToolCall, ToolOutcome};
    use serde_json::Map;

    fn dispatcher() -> crate::tools::ToolDispatcher {
        register_builtin_tools(ToolDispatcherBuilder::new())
            .unwrap()
            .build()
    }

    #[tokio::test]
    async fn test_service_status_reports_fixed_payload() {
        let result = dispatcher()
            .dispatch(ToolCall {
                id: "c1".to_string(),
                name: "get_service_status".to_string(),
                args: Map::new(),
            })
            .await;
        match result.outcome {
            ToolOutcome::Ok(value) => {
                assert_eq!(value["server_1"], "online");
                assert_eq!(value["uptime"], "99%");
            }
            _ => panic!("expected success"),
        }
    }

    #[tokio::test]
    async fn test_set_reminder_requires_text() {
        let d = dispatcher();
        let missing = d
            .dispatch(ToolCall {
                id: "c2".to_string(),
                name: "set_reminder".to_string(),
                args: Map::new(),
            })
            .await;
        assert!(!missing.is_ok());

        let mut args = Map::new();
        args.insert("text".to_string(), Value::String("buy milk".to_string()));
        let ok = d
            .dispatch(ToolCall {
                id: "c3".to_string(),
                name: "set_reminder".to_string(),
                args,
            })
            .await;
        match ok.outcome {
            ToolOutcome::Ok(Value::String(s)) => assert_eq!(s, "Success"),
            _ => panic!("expected success"),
        }
    }

    #[test]
    fn test_declarations_cover_both_tools() {
        let decls = dispatcher().declarations();
        let names: Vec<_> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["get_service_status", "set_reminder"]);
    }
}
