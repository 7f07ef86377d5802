use serde_json::{json, Value};

/// Initial shape of the state tree.
pub fn default_tree() -> Value {
    json!({
        "app": {
            "theme": "light",
            "sidebarCollapsed": false,
            "currentSection": "projects",
            "loading": false,
            "error": null
        },
        "user": {
            "name": "John Doe",
            "email": "john.doe@example.com",
            "plan": "free",
            "initials": "JD"
        },
        "projects": [],
        "chats": [],
        "artifacts": [],
        "knowledgeSources": [],
        "plugins": {
            "loaded": [],
            "enabled": [],
            "config": {}
        }
    })
}
