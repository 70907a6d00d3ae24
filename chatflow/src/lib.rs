//! Chatflow - table-driven conversation flows for Telegram bots

// Private API modules
pub(crate) mod api;

// Public flow module with re-exports
pub mod flow {
    // Re-export flow definition types from internal API
    pub use crate::api::flow::{
        Button, Flow, FlowCommand, InputKind, InputSpec, Keyboard, KeyboardKind, MultiSelect,
        Node, NodeId, SelectOption, Synonym, TextFormat,
    };
}

// Public error module with re-exports
pub mod error {
    pub use crate::api::error::{FlowError, StorageError};
}

// Public text module: placeholder substitution and input checks
pub mod text {
    pub use crate::api::template::{render_value, substitute, substitute_escaped, variables_for};
    pub use crate::api::validation::{InputRejection, validate_input};
}

// Public interpreter module with re-exports
pub mod interpreter {
    pub use crate::api::action::Action;
    pub use crate::api::interpreter::{Event, Interpreter, Trigger};
    pub use crate::api::screen::{
        InlineRows, Reply, Screen, ScreenButton, ScreenButtonKind, ScreenKeyboard,
    };
}

// Public storage module with re-exports
pub mod storage {
    pub use crate::api::storage::profile_storage::{
        FallbackProfileStorage, Profile, ProfileStorage, ProfileStorageTrait, UserInfo,
    };
    pub use crate::api::storage::session_storage::{
        PendingInput, Session, SessionStorage, SessionStorageTrait,
    };
}
