use loom_bus::{EventBus, ListenerOptions};
use loom_plugin_host::{
    LoadOptions, Plugin, PluginContext, PluginError, PluginHostError, PluginHostManager, PluginMetadata,
    PluginOrigin, PluginRegistry,
};
use loom_state::{StateStore, paths};
use loom_storage::StorageManager;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

/// Test plugin that logs its lifecycle hooks into a shared journal.
struct StubPlugin {
    name: String,
    deps: Vec<String>,
    journal: Arc<Mutex<Vec<String>>>,
    config: Mutex<Value>,
    fail_destroy: bool,
}

impl StubPlugin {
    fn note(&self, hook: &str) {
        self.journal.lock().unwrap().push(format!("{}:{hook}", self.name));
    }
}

impl Plugin for StubPlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata::new(&self.name, "1.0.0", "test plugin")
    }

    fn dependencies(&self) -> Vec<String> {
        self.deps.clone()
    }

    fn init(&self) -> Result<(), PluginError> {
        self.note("init");
        Ok(())
    }

    fn enable(&self) -> Result<(), PluginError> {
        self.note("enable");
        Ok(())
    }

    fn disable(&self) -> Result<(), PluginError> {
        self.note("disable");
        Ok(())
    }

    fn destroy(&self) -> Result<(), PluginError> {
        self.note("destroy");
        if self.fail_destroy {
            return Err(PluginError::Other(anyhow::anyhow!("cannot clean up")));
        }
        Ok(())
    }

    fn update_config(&self, config: &Value) {
        *self.config.lock().unwrap() = config.clone();
    }

    fn call(&self, method: &str, args: &[Value]) -> Result<Value, PluginError> {
        match method {
            "echo" => Ok(json!({ "from": self.name, "args": args })),
            "config" => Ok(self.config.lock().unwrap().clone()),
            "fail" => Err(PluginError::InvalidArgs("bad input".into())),
            other => Err(PluginError::MethodNotFound(other.into())),
        }
    }
}

struct Harness {
    host: PluginHostManager,
    bus: EventBus,
    store: StateStore,
    journal: Arc<Mutex<Vec<String>>>,
}

fn register(
    registry: &mut PluginRegistry,
    journal: &Arc<Mutex<Vec<String>>>,
    name: &str,
    origin: PluginOrigin,
    deps: &[&str],
) {
    let journal = Arc::clone(journal);
    let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
    let fail_destroy = name == "fragile";
    registry.register(name, origin, move |ctx: PluginContext| {
        Ok(Arc::new(StubPlugin {
            name: ctx.name.clone(),
            deps: deps.clone(),
            journal: Arc::clone(&journal),
            config: Mutex::new(ctx.config),
            fail_destroy,
        }) as Arc<dyn Plugin>)
    });
}

fn harness() -> Harness {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let mut registry = PluginRegistry::new();
    register(&mut registry, &journal, "base", PluginOrigin::Core, &[]);
    register(&mut registry, &journal, "feature", PluginOrigin::Core, &["base"]);
    register(&mut registry, &journal, "addon", PluginOrigin::Optional, &["feature"]);
    register(&mut registry, &journal, "loop-a", PluginOrigin::Optional, &["loop-b"]);
    register(&mut registry, &journal, "loop-b", PluginOrigin::Optional, &["loop-a"]);
    register(&mut registry, &journal, "broken", PluginOrigin::Optional, &["missing"]);
    register(&mut registry, &journal, "fragile", PluginOrigin::Optional, &[]);

    let bus = EventBus::new();
    let store = StateStore::new();
    let host = PluginHostManager::new(registry, bus.clone(), store.clone(), StorageManager::in_memory());
    Harness {
        host,
        bus,
        store,
        journal,
    }
}

fn record_events(bus: &EventBus) -> Arc<Mutex<Vec<String>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for name in ["plugin:loaded", "plugin:enabled", "plugin:disabled", "plugin:unloaded"] {
        let events = Arc::clone(&events);
        bus.on(
            name,
            move |e| {
                events
                    .lock()
                    .unwrap()
                    .push(format!("{} {}", e.event, e.arg(0).as_str().unwrap_or("")));
                Ok(())
            },
            ListenerOptions::default(),
        );
    }
    events
}

#[test]
fn load_runs_init_then_enable_and_mirrors_state() {
    let h = harness();
    let events = record_events(&h.bus);

    h.host.load_plugin("base", LoadOptions::core()).unwrap();

    assert_eq!(*h.journal.lock().unwrap(), vec!["base:init", "base:enable"]);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["plugin:enabled base", "plugin:loaded base"]
    );
    assert_eq!(h.store.get(paths::PLUGINS_LOADED), Some(json!(["base"])));
    assert_eq!(h.store.get(paths::PLUGINS_ENABLED), Some(json!(["base"])));

    h.host.load_plugin("base", LoadOptions::core()).unwrap();
    assert_eq!(h.journal.lock().unwrap().len(), 2);
}

#[test]
fn unknown_plugin_is_not_found() {
    let h = harness();
    let err = h.host.load_plugin("nowhere", LoadOptions::core()).unwrap_err();
    assert!(matches!(err, PluginHostError::PluginNotFound(n) if n == "nowhere"));
}

#[test]
fn enabling_pulls_in_dependencies() {
    let h = harness();
    h.host
        .load_plugin("addon", LoadOptions { core: false, auto_enable: false })
        .unwrap();
    assert!(!h.host.is_loaded("feature"));

    h.host.enable_plugin("addon").unwrap();

    assert!(h.host.is_enabled("base"));
    assert!(h.host.is_enabled("feature"));
    assert!(h.host.is_enabled("addon"));
    let journal = h.journal.lock().unwrap();
    let enables: Vec<&String> = journal.iter().filter(|j| j.ends_with(":enable")).collect();
    assert_eq!(enables, vec!["base:enable", "feature:enable", "addon:enable"]);
}

#[test]
fn enable_requires_load() {
    let h = harness();
    let err = h.host.enable_plugin("base").unwrap_err();
    assert!(matches!(err, PluginHostError::NotLoaded(_)));
}

#[test]
fn disable_is_blocked_by_enabled_dependents() {
    let h = harness();
    h.host.load_plugin("feature", LoadOptions::core()).unwrap();

    let err = h.host.disable_plugin("base").unwrap_err();
    match err {
        PluginHostError::HasDependents { plugin, dependents } => {
            assert_eq!(plugin, "base");
            assert_eq!(dependents, vec!["feature".to_string()]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.host.is_enabled("base"));

    h.host.disable_plugin("feature").unwrap();
    h.host.disable_plugin("base").unwrap();
    assert!(!h.host.is_enabled("base"));
    assert_eq!(h.store.get(paths::PLUGINS_ENABLED), Some(json!([])));
}

#[test]
fn disabling_a_disabled_plugin_is_a_no_op() {
    let h = harness();
    h.host.disable_plugin("base").unwrap();
    h.host
        .load_plugin("base", LoadOptions { core: true, auto_enable: false })
        .unwrap();
    h.host.disable_plugin("base").unwrap();
    assert!(!h.journal.lock().unwrap().iter().any(|j| j.ends_with(":disable")));
}

#[test]
fn dependency_cycles_are_detected() {
    let h = harness();
    let err = h.host.load_plugin("loop-a", LoadOptions::default()).unwrap_err();
    match err {
        PluginHostError::DependencyCycle(path) => {
            assert_eq!(path, vec!["loop-a", "loop-b", "loop-a"]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!h.host.is_enabled("loop-a"));
}

#[test]
fn missing_dependency_fails_enable() {
    let h = harness();
    let err = h.host.load_plugin("broken", LoadOptions::default()).unwrap_err();
    match err {
        PluginHostError::DependencyFailed { plugin, dependency, .. } => {
            assert_eq!(plugin, "broken");
            assert_eq!(dependency, "missing");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(h.host.is_loaded("broken"));
    assert!(!h.host.is_enabled("broken"));
}

#[test]
fn unload_disables_destroys_and_forgets() {
    let h = harness();
    let events = record_events(&h.bus);
    h.host.load_plugin("base", LoadOptions::core()).unwrap();
    events.lock().unwrap().clear();

    h.host.unload_plugin("base").unwrap();

    assert!(!h.host.is_loaded("base"));
    assert_eq!(
        *events.lock().unwrap(),
        vec!["plugin:disabled base", "plugin:unloaded base"]
    );
    assert!(h.journal.lock().unwrap().contains(&"base:destroy".to_string()));
    assert_eq!(h.store.get(paths::PLUGINS_LOADED), Some(json!([])));

    h.host.unload_plugin("base").unwrap();
}

#[test]
fn destroy_failure_does_not_block_unload() {
    let h = harness();
    h.host.load_plugin("fragile", LoadOptions::default()).unwrap();
    h.host.unload_plugin("fragile").unwrap();
    assert!(!h.host.is_loaded("fragile"));
}

#[test]
fn call_plugin_method_routes_and_maps_errors() {
    let h = harness();
    h.host.load_plugin("base", LoadOptions::core()).unwrap();

    let out = h.host.call_plugin_method("base", "echo", &[json!(1)]).unwrap();
    assert_eq!(out, json!({"from": "base", "args": [1]}));

    assert!(matches!(
        h.host.call_plugin_method("nobody", "echo", &[]),
        Err(PluginHostError::PluginNotFound(_))
    ));
    assert!(matches!(
        h.host.call_plugin_method("base", "missing", &[]),
        Err(PluginHostError::MethodNotFound { .. })
    ));
    assert!(matches!(
        h.host.call_plugin_method("base", "fail", &[]),
        Err(PluginHostError::Plugin { source: PluginError::InvalidArgs(_), .. })
    ));
}

#[test]
fn config_reaches_factory_and_instance() {
    let h = harness();
    h.host.set_config("base", json!({"level": 1}));
    h.host.load_plugin("base", LoadOptions::core()).unwrap();
    assert_eq!(h.host.call_plugin_method("base", "config", &[]).unwrap(), json!({"level": 1}));

    h.host.set_config("base", json!({"level": 2}));
    assert_eq!(h.host.call_plugin_method("base", "config", &[]).unwrap(), json!({"level": 2}));
    assert_eq!(h.host.get_config("unknown"), json!({}));
}

#[test]
fn plugin_api_is_scoped() {
    let h = harness();
    h.host.load_plugin("base", LoadOptions::core()).unwrap();
    let api = h.host.create_plugin_api("addon");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    h.bus.on(
        "plugin.addon.ping",
        move |e| {
            sink.lock().unwrap().push(e.arg(0).clone());
            Ok(())
        },
        ListenerOptions::default(),
    );
    assert!(api.emit("ping", json!("hello")));
    assert_eq!(*seen.lock().unwrap(), vec![json!("hello")]);

    api.set_state("counter", json!(3));
    assert_eq!(h.store.get("plugins.addon.counter"), Some(json!(3)));
    assert_eq!(api.get_state("counter"), Some(json!(3)));

    assert!(api.is_plugin_enabled("base"));
    assert_eq!(api.call_plugin("base", "echo", &[]).unwrap()["from"], json!("base"));

    api.update_config(json!({"a": 1}));
    api.update_config(json!({"b": 2}));
    assert_eq!(api.get_config(), json!({"a": 1, "b": 2}));
}

#[test]
fn plugin_list_and_dependents() {
    let h = harness();
    h.host.load_plugin("addon", LoadOptions::default()).unwrap();

    let names: Vec<String> = h.host.get_plugins().into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["addon", "base", "feature"]);
    assert!(h.host.get_plugins().iter().all(|p| p.loaded && p.enabled));
    assert_eq!(h.host.get_plugins()[0].metadata.version, "1.0.0");

    assert_eq!(h.host.get_dependents("feature"), vec!["addon".to_string()]);
    assert!(h.host.get_dependents("addon").is_empty());
}

#[test]
fn export_and_restore_state() {
    let h = harness();
    h.host.set_config("base", json!({"x": true}));
    h.host.load_plugin("feature", LoadOptions::core()).unwrap();
    let exported = h.host.export_state();
    assert_eq!(exported["enabled"], json!(["base", "feature"]));

    let fresh = harness();
    fresh.host.restore_state(&exported);
    assert!(fresh.host.is_enabled("feature"));
    assert!(fresh.host.is_enabled("base"));
    assert_eq!(fresh.host.get_config("base"), json!({"x": true}));
}
