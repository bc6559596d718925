//! Tests for #[derive(Action)] macro

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stately_core::action::{Action as _, ActionTypeError, validate_action_type};
use stately_macros::Action;

#[derive(Action, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
enum TodoAction {
    #[command]
    #[serde(rename = "[Todo Page] Create Todo")]
    CreateTodo { title: String },

    #[command]
    #[serde(rename = "[Todo Page] Toggle Todo")]
    ToggleTodo,

    #[event]
    #[serde(rename = "[Todo API] Todo Created")]
    TodoCreated {
        id: String,
        title: String,
        timestamp: DateTime<Utc>,
    },

    #[event]
    #[serde(rename = "[Todo API] Todo Toggled", alias = "[Todo API] Toggled")]
    TodoToggled(bool),

    // Neither command nor event, no rename
    Reset,
}

#[derive(Action, Clone, Debug)]
enum Wrapper<T: Clone + std::fmt::Debug + Send + Sync + 'static> {
    #[command]
    Wrap(T),
    #[event]
    Wrapped,
}

#[test]
fn test_action_type_uses_serde_rename() {
    let action = TodoAction::CreateTodo {
        title: "Test".to_string(),
    };
    assert_eq!(action.action_type(), "[Todo Page] Create Todo");
    assert_eq!(TodoAction::TodoToggled(true).action_type(), "[Todo API] Todo Toggled");
}

#[test]
fn test_action_type_falls_back_to_variant_name() {
    assert_eq!(TodoAction::Reset.action_type(), "Reset");
    assert_eq!(TodoAction::RESET, "Reset");
}

#[test]
fn test_generated_constants() {
    assert_eq!(TodoAction::CREATE_TODO, "[Todo Page] Create Todo");
    assert_eq!(TodoAction::TOGGLE_TODO, "[Todo Page] Toggle Todo");
    assert_eq!(TodoAction::TODO_CREATED, "[Todo API] Todo Created");
    assert_eq!(TodoAction::TODO_TOGGLED, "[Todo API] Todo Toggled");
}

#[test]
fn test_action_types_in_declaration_order() {
    assert_eq!(
        TodoAction::ACTION_TYPES,
        &[
            "[Todo Page] Create Todo",
            "[Todo Page] Toggle Todo",
            "[Todo API] Todo Created",
            "[Todo API] Todo Toggled",
            "Reset",
        ]
    );
}

#[test]
fn test_is_command_and_is_event() {
    let commands = vec![
        TodoAction::CreateTodo {
            title: "Test".to_string(),
        },
        TodoAction::ToggleTodo,
    ];
    for cmd in commands {
        assert!(cmd.is_command(), "Expected command: {cmd:?}");
        assert!(!cmd.is_event(), "Should not be event: {cmd:?}");
    }

    let events = vec![
        TodoAction::TodoCreated {
            id: "1".to_string(),
            title: "Test".to_string(),
            timestamp: Utc::now(),
        },
        TodoAction::TodoToggled(false),
    ];
    for event in events {
        assert!(!event.is_command(), "Should not be command: {event:?}");
        assert!(event.is_event(), "Expected event: {event:?}");
    }

    assert!(!TodoAction::Reset.is_command());
    assert!(!TodoAction::Reset.is_event());
}

#[test]
fn test_wire_discriminator_matches_action_type() {
    let action = TodoAction::CreateTodo {
        title: "Write docs".to_string(),
    };
    let json = serde_json::to_value(&action).unwrap();

    assert_eq!(json["type"], action.action_type());
    assert_eq!(json["payload"]["title"], "Write docs");
}

#[test]
fn test_validate_generated_types() {
    assert_eq!(
        validate_action_type::<TodoAction>("[Todo API] Todo Created"),
        Ok(TodoAction::TODO_CREATED)
    );
    assert_eq!(
        validate_action_type::<TodoAction>("[Todo API] Todo Deleted"),
        Err(ActionTypeError::Unknown("[Todo API] Todo Deleted".to_string()))
    );
}

#[test]
fn test_generic_enum() {
    let action = Wrapper::Wrap(7_u32);
    assert_eq!(action.action_type(), "Wrap");
    assert!(action.is_command());
    assert!(Wrapper::<u32>::Wrapped.is_event());
    assert_eq!(Wrapper::<u32>::WRAPPED, "Wrapped");
}
