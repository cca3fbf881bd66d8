//! Tests for #[derive(Action)] macro

use chrono::{DateTime, Utc};
use walkin_macros::Action;

#[derive(Action, Clone, Debug, PartialEq)]
enum CounterAction {
    #[command]
    OpenCounter {
        office: String,
    },

    #[command]
    CallNext,

    #[command]
    RenameCounter(String),

    #[event]
    CounterOpened {
        office: String,
        at: DateTime<Utc>,
    },

    #[event]
    TicketCalled(u32),

    WriteFailed {
        error: String,
    },
}

#[test]
fn test_is_command() {
    let action = CounterAction::OpenCounter {
        office: "main".to_string(),
    };
    assert!(action.is_command());
    assert!(!action.is_event());
    assert!(CounterAction::CallNext.is_command());
    assert!(CounterAction::RenameCounter("desk".to_string()).is_command());
}

#[test]
fn test_is_event() {
    let action = CounterAction::CounterOpened {
        office: "main".to_string(),
        at: Utc::now(),
    };
    assert!(!action.is_command());
    assert!(action.is_event());
    assert!(CounterAction::TicketCalled(7).is_event());
}

#[test]
fn test_unmarked_variants_are_internal() {
    let action = CounterAction::WriteFailed {
        error: "disk full".to_string(),
    };
    assert!(!action.is_command());
    assert!(!action.is_event());
    assert_eq!(action.kind(), "internal");
}

#[test]
fn test_kind_and_name() {
    assert_eq!(CounterAction::CallNext.kind(), "command");
    assert_eq!(CounterAction::TicketCalled(1).kind(), "event");

    assert_eq!(CounterAction::CallNext.name(), "call_next");
    assert_eq!(
        CounterAction::OpenCounter {
            office: String::new()
        }
        .name(),
        "open_counter"
    );
    assert_eq!(CounterAction::TicketCalled(1).name(), "ticket_called");
    assert_eq!(
        CounterAction::WriteFailed {
            error: String::new()
        }
        .name(),
        "write_failed"
    );
}
