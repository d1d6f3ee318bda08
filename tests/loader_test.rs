//! 依赖图加载器钩子集成测试

use std::sync::{Arc, Mutex};

use chips_boot::{
    DependencyGraphLoader, LoaderOptions, Module, ModuleHandle, ModuleLoaded, ModuleManifest,
    ModuleRegistry, StaticManifests,
};

struct Noop;

impl Module for Noop {}

fn loader(manifests: Vec<ModuleManifest>, prefix: Option<&str>) -> Arc<DependencyGraphLoader> {
    let mut registry = ModuleRegistry::new();
    registry.set_fallback(|_| Ok(ModuleHandle::new(Noop)));
    DependencyGraphLoader::new(
        LoaderOptions {
            namespace: "test".to_string(),
            name_prefix: prefix.map(str::to_string),
            ..LoaderOptions::default()
        },
        vec![Arc::new(StaticManifests::new(manifests))],
        registry,
    )
}

#[tokio::test]
async fn test_configs_loaded_observers_rewrite_manifests() {
    let loader = loader(
        vec![
            ModuleManifest::new("a", "/m/a"),
            ModuleManifest::new("b", "/m/b"),
            ModuleManifest::new("skip", "/m/skip"),
        ],
        None,
    );

    loader.configs_loaded_hook().tap(|configs| {
        Box::pin(async move {
            configs.remove("skip");
            if let Some(a) = configs.get_mut("a") {
                a.dependencies.insert("b".to_string());
            }
            Ok(())
        })
    });

    let report = loader.load().await.unwrap();
    assert_eq!(report.order, vec!["b", "a"]);
    assert!(loader.manifest("skip").await.is_none());
    assert_eq!(
        loader.dependency_graph().await.get_all_dependents("b"),
        vec!["a".to_string()]
    );
}

#[tokio::test]
async fn test_module_loaded_events_follow_load_order() {
    let loader = loader(
        vec![
            ModuleManifest::new("db", "/m/db"),
            ModuleManifest::new("api", "/m/api").with_dependency("db"),
        ],
        None,
    );

    let events: Arc<Mutex<Vec<(String, bool)>>> = Arc::default();
    let sink = events.clone();
    loader.module_loaded_hook().tap(move |event: ModuleLoaded| {
        sink.lock()
            .unwrap()
            .push((event.name().to_string(), event.is_ok()));
        async { Ok(()) }
    });
    let first = loader.module_loaded_hook().on_invoke();

    loader.load().await.unwrap();

    assert_eq!(first.await.unwrap().name(), "db");
    assert_eq!(
        *events.lock().unwrap(),
        vec![("db".to_string(), true), ("api".to_string(), true)]
    );
}

#[tokio::test]
async fn test_short_names_resolve_with_prefix() {
    let loader = loader(vec![ModuleManifest::new("chips-db", "/m/db")], Some("chips-"));

    let waiting = {
        let loader = loader.clone();
        tokio::spawn(async move { loader.wait_for_module("db").await })
    };
    loader.load().await.unwrap();

    let unit = waiting.await.unwrap().unwrap();
    assert_eq!(unit.name(), "chips-db");
}

#[tokio::test]
async fn test_load_runs_once() {
    let loader = loader(vec![ModuleManifest::new("a", "/m/a")], None);

    loader.load().await.unwrap();
    assert!(loader.load().await.is_err());
    assert_eq!(loader.order().await, vec!["a"]);
}
