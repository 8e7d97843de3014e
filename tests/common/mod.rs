//! Common test utilities for reqflow integration tests
//!
//! - engine and runner construction with a fixed encryption key
//! - collection builders for the usual folder shapes
//! - fixture files in temporary directories

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqflow::auth::AuthConfig;
use reqflow::config::EngineConfig;
use reqflow::crypto::HmacEncryptor;
use reqflow::engine::{CollectionRunner, Engine, InMemoryRunStateStore};
use reqflow::environment::{InMemoryEnvironmentStore, System};
use reqflow::models::collection::{Collection, NodeId};
use reqflow::models::request::Request;

pub const TEST_SECRET: &str = "integration-secret";

pub fn engine(config: &EngineConfig) -> Engine {
    engine_with_systems(config, Vec::new())
}

/// Engine whose environment store holds `systems` under the id `test`
pub fn engine_with_systems(config: &EngineConfig, systems: Vec<System>) -> Engine {
    let environments = Arc::new(InMemoryEnvironmentStore::new());
    environments.insert("test", systems);
    Engine::builder(config.clone())
        .environments(environments)
        .encryptor(Arc::new(HmacEncryptor::new(TEST_SECRET)))
        .build()
        .expect("engine should build")
}

pub fn runner(engine: &Engine, config: &EngineConfig) -> (CollectionRunner, Arc<InMemoryRunStateStore>) {
    let state = Arc::new(InMemoryRunStateStore::new());
    let runner = CollectionRunner::new(Arc::new(engine.session()), state.clone(), config);
    (runner, state)
}

/// `[Folder A [ReqX, ReqY], ReqZ]` against `base`
pub fn folder_tree(base: &str) -> (Collection, NodeId) {
    folder_tree_with(base, |_, req| req)
}

/// Same tree, letting `customize` adjust each request by name
pub fn folder_tree_with(base: &str, mut customize: impl FnMut(&str, Request) -> Request) -> (Collection, NodeId) {
    let mut c = Collection::new("scenario", AuthConfig::None);
    let root = c.root();
    let folder = c
        .add_folder(root, "Folder A", AuthConfig::InheritFromParent)
        .expect("folder");
    for (parent, name) in [(folder, "ReqX"), (folder, "ReqY"), (root, "ReqZ")] {
        let req = Request::new(name, "GET", format!("{}/{}", base, name.to_lowercase()))
            .with_id(name.to_lowercase())
            .with_auth(AuthConfig::InheritFromParent);
        c.add_request(parent, customize(name, req)).expect("request");
    }
    (c, folder)
}

pub fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}
