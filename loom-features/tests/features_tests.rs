use loom_bus::{EventBus, ListenerOptions};
use loom_features::{ArtifactDraft, ArtifactsPlugin, ChatPlugin, PanelState, register_core, send_message};
use loom_plugin_host::{
    LoadOptions, Plugin, PluginContext, PluginError, PluginHostError, PluginHostManager, PluginRegistry,
};
use loom_state::StateStore;
use loom_storage::StorageManager;
use loom_types::{ArtifactType, Role};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

type Journal = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

fn record(bus: &EventBus) -> Journal {
    let journal: Journal = Arc::default();
    let sink = Arc::clone(&journal);
    bus.on(
        "*",
        move |e| {
            sink.lock().unwrap().push((e.event.to_string(), e.args.to_vec()));
            Ok(())
        },
        ListenerOptions::default(),
    );
    journal
}

fn events_named(journal: &Journal, name: &str) -> Vec<Vec<Value>> {
    journal
        .lock()
        .unwrap()
        .iter()
        .filter(|(event, _)| event == name)
        .map(|(_, args)| args.clone())
        .collect()
}

fn notifications(journal: &Journal) -> Vec<(String, String)> {
    events_named(journal, "notification:show")
        .into_iter()
        .map(|args| {
            (
                args[0]["message"].as_str().unwrap().to_string(),
                args[0]["type"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

struct Harness {
    host: PluginHostManager,
    bus: EventBus,
    store: StateStore,
    storage: StorageManager,
    journal: Journal,
}

impl Harness {
    fn new() -> Self {
        let mut registry = PluginRegistry::new();
        register_core(&mut registry);
        let bus = EventBus::new();
        let store = StateStore::new();
        let storage = StorageManager::in_memory();
        let journal = record(&bus);
        let host = PluginHostManager::new(registry, bus.clone(), store.clone(), storage.clone());
        Self {
            host,
            bus,
            store,
            storage,
            journal,
        }
    }

    fn load(&self, name: &str) {
        self.host.load_plugin(name, LoadOptions::core()).unwrap();
    }

    fn call(&self, plugin: &str, method: &str, args: &[Value]) -> Result<Value, PluginHostError> {
        self.host.call_plugin_method(plugin, method, args)
    }

    fn context(&self, name: &str) -> PluginContext {
        PluginContext {
            name: name.to_string(),
            bus: self.bus.clone(),
            store: self.store.clone(),
            storage: self.storage.clone(),
            api: self.host.create_plugin_api(name),
            config: json!({}),
        }
    }

    fn chat(&self) -> ChatPlugin {
        let plugin = ChatPlugin::new(self.context("chat"));
        plugin.init().unwrap();
        plugin.enable().unwrap();
        plugin
    }

    fn artifacts(&self) -> ArtifactsPlugin {
        let plugin = ArtifactsPlugin::new(self.context("artifacts"));
        plugin.init().unwrap();
        plugin.enable().unwrap();
        plugin
    }
}

#[test]
fn core_registration() {
    let mut registry = PluginRegistry::new();
    register_core(&mut registry);
    assert_eq!(registry.names(), vec!["artifacts", "chat", "projects"]);
}

// ---------------------------------------------------------------------------
// projects
// ---------------------------------------------------------------------------

#[test]
fn creating_a_project_fills_defaults_and_persists() {
    let h = Harness::new();
    h.load("projects");

    let created = h
        .call("projects", "create", &[json!({"title": "  Roadmap  "})])
        .unwrap();
    assert_eq!(created["title"], "Roadmap");
    assert_eq!(created["description"], "No description provided");
    assert_eq!(created["status"], "active");
    assert!(created["knowledgeBase"].as_str().unwrap().starts_with("kb_"));

    let projects = h.store.get("projects").unwrap();
    assert_eq!(projects[0]["id"], created["id"]);

    let stored = h.storage.get("projects").unwrap();
    assert_eq!(stored.as_array().unwrap().len(), 1);
    assert_eq!(
        notifications(&h.journal),
        vec![("Project created successfully".to_string(), "success".to_string())]
    );
}

#[test]
fn blank_project_title_is_rejected() {
    let h = Harness::new();
    h.load("projects");

    let err = h.call("projects", "create", &[json!({"title": "   "})]).unwrap_err();
    assert!(matches!(
        err,
        PluginHostError::Plugin {
            source: PluginError::InvalidArgs(_),
            ..
        }
    ));
    assert_eq!(h.store.get("projects"), Some(json!([])));
}

#[test]
fn new_projects_go_first() {
    let h = Harness::new();
    h.load("projects");
    h.call("projects", "create", &[json!({"title": "First"})]).unwrap();
    h.call("projects", "create", &[json!({"title": "Second"})]).unwrap();

    let list = h.call("projects", "list", &[]).unwrap();
    let titles: Vec<&str> = list.as_array().unwrap().iter().map(|p| p["title"].as_str().unwrap()).collect();
    assert_eq!(titles, vec!["Second", "First"]);
}

#[test]
fn update_keeps_identity() {
    let h = Harness::new();
    h.load("projects");
    let created = h.call("projects", "create", &[json!({"title": "Draft"})]).unwrap();

    let updated = h
        .call(
            "projects",
            "update",
            &[created["id"].clone(), json!({"title": "Final", "status": "completed"})],
        )
        .unwrap();
    assert_eq!(updated["id"], created["id"]);
    assert_eq!(updated["createdAt"], created["createdAt"]);
    assert_eq!(updated["title"], "Final");
    assert_eq!(updated["status"], "completed");

    let missing = h.call(
        "projects",
        "update",
        &[json!("0190a0a0-0000-7000-8000-000000000000"), json!({"title": "x"})],
    );
    assert!(matches!(
        missing,
        Err(PluginHostError::Plugin {
            source: PluginError::NotFound(_),
            ..
        })
    ));
}

#[test]
fn duplicate_and_delete() {
    let h = Harness::new();
    h.load("projects");
    let original = h
        .call("projects", "create", &[json!({"title": "Website", "description": "Relaunch"})])
        .unwrap();

    let copy = h.call("projects", "duplicate", &[original["id"].clone()]).unwrap();
    assert_eq!(copy["title"], "Website (Copy)");
    assert_eq!(copy["description"], "Relaunch");
    assert_eq!(copy["lastActive"], "");
    assert_ne!(copy["id"], original["id"]);

    assert_eq!(h.call("projects", "delete", &[original["id"].clone()]).unwrap(), json!(true));
    assert_eq!(h.call("projects", "delete", &[original["id"].clone()]).unwrap(), json!(false));

    let remaining = h.storage.get("projects").unwrap();
    assert_eq!(remaining.as_array().unwrap().len(), 1);
    assert_eq!(remaining[0]["title"], "Website (Copy)");
}

#[test]
fn starting_a_chat_from_a_project() {
    let h = Harness::new();
    h.load("projects");
    h.load("chat");
    let project = h
        .call("projects", "create", &[json!({"title": "Launch", "knowledgeBase": "kb_launch"})])
        .unwrap();

    let chat = h.call("projects", "start_chat", &[project["id"].clone()]).unwrap();
    assert_eq!(chat["title"], "Chat: Launch");
    assert_eq!(chat["lastMessage"], "New chat started");
    assert_eq!(chat["projectId"], project["id"]);
    assert_eq!(chat["knowledgeBase"], "kb_launch");

    assert_eq!(h.store.get("chats").unwrap()[0]["id"], chat["id"]);
    assert_eq!(h.storage.get("chats").unwrap()[0]["id"], chat["id"]);
    assert_eq!(
        events_named(&h.journal, "router:navigate"),
        vec![vec![json!("active-chat")], vec![json!("active-chat")]]
    );
    assert_eq!(events_named(&h.journal, "chat:open"), vec![vec![chat["id"].clone()]]);
    assert_eq!(h.call("chat", "current", &[]).unwrap(), chat["id"]);
}

#[test]
fn status_labels_through_the_host() {
    let h = Harness::new();
    h.load("projects");
    assert_eq!(h.call("projects", "format_status", &[json!("planned")]).unwrap(), "Planned");
}

// ---------------------------------------------------------------------------
// persistence
// ---------------------------------------------------------------------------

#[test]
fn init_loads_the_stored_bucket() {
    let h = Harness::new();
    h.storage.set(
        "chats",
        &json!([{
            "id": "0190a0a0-0000-7000-8000-000000000001",
            "title": "Kept",
            "lastMessage": "hi",
            "timestamp": "2024-01-01T00:00:00Z"
        }]),
    );
    h.load("chat");

    let chats = h.store.get("chats").unwrap();
    assert_eq!(chats.as_array().unwrap().len(), 1);
    assert_eq!(chats[0]["title"], "Kept");
}

#[test]
fn a_missing_bucket_loads_empty() {
    let h = Harness::new();
    h.store.set("artifacts", json!([{"stale": true}]));
    h.load("artifacts");
    assert_eq!(h.store.get("artifacts"), Some(json!([])));
}

#[test]
fn disabled_plugins_stop_persisting() {
    let h = Harness::new();
    h.load("projects");
    h.call("projects", "create", &[json!({"title": "Saved"})]).unwrap();
    h.host.disable_plugin("projects").unwrap();

    h.store.push("projects", json!({"title": "Unsaved"}), true).unwrap();
    assert_eq!(h.storage.get("projects").unwrap().as_array().unwrap().len(), 1);

    h.host.enable_plugin("projects").unwrap();
    h.store.push("projects", json!({"title": "Saved again"}), true).unwrap();
    assert_eq!(h.storage.get("projects").unwrap().as_array().unwrap().len(), 3);
}

// ---------------------------------------------------------------------------
// chat
// ---------------------------------------------------------------------------

#[test]
fn creating_a_chat_opens_it() {
    let h = Harness::new();
    let chat = h.chat();

    let created = chat.create().unwrap();
    assert!(created.title.starts_with("New Chat "));
    assert_eq!(created.last_message, "No messages yet");
    assert_eq!(chat.current_chat_id(), Some(created.id));
    assert_eq!(events_named(&h.journal, "router:navigate"), vec![vec![json!("active-chat")]]);
    assert_eq!(
        notifications(&h.journal),
        vec![("New chat created".to_string(), "success".to_string())]
    );
}

#[test]
fn rename_and_filter() {
    let h = Harness::new();
    let chat = h.chat();
    let first = chat.create().unwrap();
    chat.create().unwrap();

    assert!(chat.rename(first.id, "Budget Review").unwrap());
    assert!(chat.rename(first.id, "  ").is_err());

    let hits = chat.filter("budget").unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, first.id);
    assert_eq!(chat.filter("no messages").unwrap().len(), 2);
    assert!(chat.filter("zebra").unwrap().is_empty());
    assert_eq!(chat.filter("").unwrap().len(), 2);
}

#[test]
fn deleting_the_open_chat_returns_to_the_list() {
    let h = Harness::new();
    let chat = h.chat();
    let created = chat.create().unwrap();

    assert!(chat.delete(created.id).unwrap());
    assert_eq!(chat.current_chat_id(), None);
    assert_eq!(
        events_named(&h.journal, "router:navigate").last(),
        Some(&vec![json!("chat")])
    );
    assert!(!chat.delete(created.id).unwrap());
}

#[test]
fn bus_events_drive_the_chat_plugin() {
    let h = Harness::new();
    let chat = h.chat();

    h.bus.emit("chat:create", &[]);
    let created = chat.list().unwrap().remove(0);
    assert_eq!(chat.current_chat_id(), Some(created.id));

    h.bus.emit("chat:delete", &[json!(created.id)]);
    assert!(chat.list().unwrap().is_empty());

    chat.disable().unwrap();
    h.bus.emit("chat:create", &[]);
    assert!(chat.list().unwrap().is_empty());
}

#[test]
fn messages_need_an_open_chat() {
    let h = Harness::new();
    let chat = h.chat();
    assert_eq!(chat.add_message(Role::User, "hello").unwrap(), None);

    let created = chat.create().unwrap();
    let message = chat.add_message(Role::User, "hello").unwrap().unwrap();
    assert_eq!(message.role, Role::User);
    let stored = chat.get(created.id).unwrap().unwrap();
    assert_eq!(stored.messages, vec![message]);
}

#[test]
fn metadata_summarises_the_exchange() {
    let h = Harness::new();
    let chat = h.chat();
    let created = chat.create().unwrap();

    let reply = "I can help with that. Here are the details you asked for, in order.";
    assert!(chat
        .update_metadata("What should our homepage say about pricing?", reply)
        .unwrap());

    let updated = chat.get(created.id).unwrap().unwrap();
    assert_eq!(updated.title, "What should our homepage say a...");
    assert_eq!(
        updated.last_message,
        "AI: I can help with that. Here are the details you ask..."
    );

    chat.update_metadata("A different question entirely", reply).unwrap();
    let unchanged = chat.get(created.id).unwrap().unwrap();
    assert_eq!(unchanged.title, "What should our homepage say a...");
}

#[test]
fn short_first_messages_become_the_title_verbatim() {
    let h = Harness::new();
    let chat = h.chat();
    let created = chat.create().unwrap();
    chat.update_metadata("Hi", "Hello").unwrap();
    assert_eq!(chat.get(created.id).unwrap().unwrap().title, "Hi");
}

#[tokio::test(start_paused = true)]
async fn send_message_round_trip() {
    let h = Harness::new();
    h.host.set_config("chat", json!({"response_delay_ms": 1500}));
    h.load("chat");
    let created = h.call("chat", "create", &[]).unwrap();

    let reply = send_message(&h.host, "  Plan the launch  ").await.unwrap().unwrap();
    assert_eq!(reply.role, Role::Assistant);

    let chats = h.store.get("chats").unwrap();
    assert_eq!(chats[0]["id"], created["id"]);
    let messages = chats[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["content"], "Plan the launch");
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(chats[0]["title"], "Plan the launch");

    assert_eq!(
        events_named(&h.journal, "chat:typing"),
        vec![vec![json!(true)], vec![json!(false)]]
    );
    assert_eq!(h.store.get("plugins.chat.typing"), Some(json!(false)));
}

#[tokio::test(start_paused = true)]
async fn send_message_without_open_chat_or_text() {
    let h = Harness::new();
    h.load("chat");

    assert!(send_message(&h.host, "hello").await.unwrap().is_none());
    h.call("chat", "create", &[]).unwrap();
    assert!(send_message(&h.host, "   ").await.unwrap().is_none());
    assert!(events_named(&h.journal, "chat:typing").is_empty());
}

#[test]
fn send_message_with_zero_delay_needs_no_timer() {
    let h = Harness::new();
    h.host.set_config("chat", json!({"response_delay_ms": 0}));
    h.load("chat");
    h.call("chat", "create", &[]).unwrap();

    let reply = tokio_test::block_on(send_message(&h.host, "hi")).unwrap().unwrap();
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(events_named(&h.journal, "chat:typing"), vec![vec![json!(true)], vec![json!(false)]]);
}

#[test]
fn chat_config_follows_the_host() {
    let h = Harness::new();
    h.load("chat");
    assert_eq!(h.call("chat", "response_delay_ms", &[]).unwrap(), json!(1500));
    h.host.set_config("chat", json!({"response_delay_ms": 20}));
    assert_eq!(h.call("chat", "response_delay_ms", &[]).unwrap(), json!(20));
}

// ---------------------------------------------------------------------------
// artifacts
// ---------------------------------------------------------------------------

#[test]
fn creating_an_artifact_applies_defaults_and_opens_it() {
    let h = Harness::new();
    let artifacts = h.artifacts();

    let created = artifacts.create(ArtifactDraft::default()).unwrap();
    assert_eq!(created.title, "Untitled Artifact");
    assert_eq!(created.artifact_type, ArtifactType::Text);
    assert_eq!(created.size, "0 B");

    assert_eq!(artifacts.current().unwrap(), Some(created.clone()));
    assert!(artifacts.panel().is_open);
    assert_eq!(events_named(&h.journal, "artifact:panel-opened").len(), 1);
    assert_eq!(h.storage.get("artifact-panel"), Some(json!({"width": 500, "isOpen": true})));
    assert_eq!(h.storage.get("artifacts").unwrap()[0]["type"], "text");
}

#[test]
fn viewing_an_unknown_artifact_notifies() {
    let h = Harness::new();
    let artifacts = h.artifacts();

    assert!(artifacts.view(loom_types::ArtifactId::new()).is_err());
    assert_eq!(
        notifications(&h.journal),
        vec![("Artifact not found".to_string(), "error".to_string())]
    );
    assert!(!artifacts.panel().is_open);
}

#[test]
fn view_last_reopens_the_previous_artifact() {
    let h = Harness::new();
    let artifacts = h.artifacts();

    assert_eq!(artifacts.view_last().unwrap(), None);
    assert_eq!(
        notifications(&h.journal),
        vec![("No recent artifacts to display".to_string(), "info".to_string())]
    );

    let created = artifacts
        .create(ArtifactDraft {
            title: Some("Landing page".into()),
            artifact_type: Some(ArtifactType::Html),
            content: Some("<h1>Hi</h1>".into()),
            preview: None,
        })
        .unwrap();
    artifacts.close();
    assert!(!artifacts.panel().is_open);
    assert_eq!(artifacts.current().unwrap(), None);
    assert_eq!(events_named(&h.journal, "artifact:panel-closed").len(), 1);

    assert_eq!(artifacts.view_last().unwrap().map(|a| a.id), Some(created.id));
    assert!(artifacts.panel().is_open);
}

#[test]
fn resizing_clamps_and_persists() {
    let h = Harness::new();
    let artifacts = h.artifacts();

    assert_eq!(artifacts.resize(2000), 900);
    assert_eq!(artifacts.resize(120), 300);
    assert_eq!(
        events_named(&h.journal, "artifact:panel-resized"),
        vec![vec![json!({"width": 900})], vec![json!({"width": 300})]]
    );
    assert_eq!(h.storage.get("artifact-panel").unwrap()["width"], 300);
}

#[test]
fn panel_state_is_restored_on_init() {
    let h = Harness::new();
    h.storage.set("artifact-panel", &json!({"width": 720, "isOpen": false}));
    let artifacts = h.artifacts();
    assert_eq!(artifacts.panel(), PanelState { width: 720, is_open: false });
}

#[test]
fn artifact_bus_events() {
    let h = Harness::new();
    let artifacts = h.artifacts();

    h.bus.emit("artifact:create", &[json!({"title": "Styles", "type": "css", "content": "a{}"})]);
    let created = artifacts.list().unwrap().remove(0);
    assert_eq!(created.artifact_type, ArtifactType::Css);
    assert_eq!(created.size, "3 B");

    artifacts.close();
    h.bus.emit("artifact:view", &[json!(created.id)]);
    assert_eq!(artifacts.current().unwrap().map(|a| a.id), Some(created.id));
}

#[test]
fn artifact_helpers_through_the_host() {
    let h = Harness::new();
    h.load("artifacts");
    assert_eq!(h.call("artifacts", "file_extension", &[json!("markdown")]).unwrap(), "md");
    assert_eq!(h.call("artifacts", "mime_type", &[json!("html")]).unwrap(), "text/html");
    assert_eq!(
        h.call("artifacts", "calculate_size", &[json!("x".repeat(2048))]).unwrap(),
        "2.0 KB"
    );

    let created = h
        .call("artifacts", "create", &[json!({"title": "Q3 notes", "type": "markdown"})])
        .unwrap();
    assert_eq!(
        h.call("artifacts", "download_name", &[created["id"].clone()]).unwrap(),
        "Q3_notes.md"
    );
}
