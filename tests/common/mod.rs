// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::Compression;
use flate2::write::GzEncoder;
use keg::bottle::SelectorPolicy;
use keg::cancel::CancellationToken;
use keg::cellar::{Cellar, Placer};
use keg::db::{ReceiptStore, SqliteReceiptStore};
use keg::exec::{CommandOutput, CommandRunner};
use keg::fetch::{FetchError, Fetcher, RetryPolicy, sha256_hex};
use keg::layout::PrefixLayout;
use keg::platform::PlatformDescriptor;
use keg::recipe::{Catalog, Kitchen, KitchenConfig, Recipe, parse_recipe};
use keg::tester::TestRunner;
use keg::Orchestrator;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const BOTTLE_ROOT: &str = "https://bottles.example.com";

/// Build a gzipped tarball from `(path, content, mode)` entries
pub fn tarball(entries: &[(&str, &str, u32)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content, mode) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(*mode);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    let tar = builder.into_inner().unwrap();
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&tar).unwrap();
    gz.finish().unwrap()
}

/// Source tarball for `name`: `<name>-<version>/bin/<name>`
pub fn source_tarball(name: &str, version: &str) -> Vec<u8> {
    let path = format!("{}-{}/bin/{}", name, version, name);
    let script = format!("#!/bin/sh\necho {} {}\n", name, version);
    tarball(&[(path.as_str(), script.as_str(), 0o755)])
}

/// Serves canned responses by URL and records every request
#[derive(Default)]
pub struct StubFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
    /// Tripped after the first request is served
    cancel_after_first: Mutex<Option<CancellationToken>>,
}

impl StubFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.responses.lock().unwrap().insert(url.into(), body.into());
    }

    pub fn cancel_after_first(&self, token: CancellationToken) {
        *self.cancel_after_first.lock().unwrap() = Some(token);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requested(&self, suffix: &str) -> bool {
        self.requests().iter().any(|u| u.ends_with(suffix))
    }
}

impl Fetcher for StubFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.requests.lock().unwrap().push(url.to_string());
        let body = self.responses.lock().unwrap().get(url).cloned();
        if let Some(token) = self.cancel_after_first.lock().unwrap().take() {
            token.cancel();
        }
        body.ok_or_else(|| FetchError::Permanent {
            url: url.to_string(),
            reason: "HTTP 404".to_string(),
        })
    }
}

/// Records commands and reports success without running anything
#[derive(Default)]
pub struct RecordingRunner {
    pub commands: Mutex<Vec<String>>,
}

impl CommandRunner for RecordingRunner {
    fn run(
        &self,
        command: &str,
        _env: &[(String, String)],
        _workdir: &Path,
    ) -> keg::Result<CommandOutput> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }
}

/// Fails every placement
pub struct FullDisk;

impl Placer for FullDisk {
    fn place(&self, _source: &Path, _target: &Path) -> keg::Result<()> {
        Err(keg::Error::IoError("No space left on device".to_string()))
    }
}

/// Recipe text for a source-built package that installs `bin/<name>`
///
/// `deps` are `(name, kind)` pairs; `extra` is appended verbatim.
pub fn recipe_toml(name: &str, version: &str, sha256: &str, deps: &[(&str, &str)], extra: &str) -> String {
    let mut text = format!(
        r#"
[package]
name = "{name}"
version = "{version}"
homepage = "https://example.com/{name}"

[source]
url = "https://example.com/src/{name}-%(version)s.tar.gz"
sha256 = "{sha256}"
"#
    );
    for (dep, kind) in deps {
        text.push_str(&format!(
            "\n[[dependencies]]\nname = \"{}\"\nkind = \"{}\"\n",
            dep, kind
        ));
    }
    text.push_str(&format!(
        r#"
[[install]]
step = "install"
from = ["bin/{name}"]
into = "%(bin)s"
"#
    ));
    text.push_str(extra);
    text
}

/// A prefix, a download cache, a receipt database and a catalog under one
/// temporary directory
pub struct TestEnv {
    pub dir: TempDir,
    pub layout: PrefixLayout,
    pub fetcher: Arc<StubFetcher>,
    pub runner: Arc<RecordingRunner>,
    pub catalog: Catalog,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let layout = PrefixLayout::new(dir.path().join("prefix"));
        Self {
            dir,
            layout,
            fetcher: Arc::new(StubFetcher::new()),
            runner: Arc::new(RecordingRunner::default()),
            catalog: Catalog::new(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("receipts.db")
    }

    pub fn store(&self) -> Arc<dyn ReceiptStore> {
        Arc::new(SqliteReceiptStore::open(&self.db_path()).unwrap())
    }

    pub fn add(&mut self, toml: &str) -> Recipe {
        let recipe = parse_recipe(toml).unwrap();
        self.catalog.insert(recipe.clone());
        recipe
    }

    /// Add a source-built recipe and serve its tarball
    pub fn add_source(&mut self, name: &str, version: &str, deps: &[(&str, &str)]) -> Recipe {
        self.add_source_with(name, version, deps, "")
    }

    pub fn add_source_with(&mut self, name: &str, version: &str, deps: &[(&str, &str)], extra: &str) -> Recipe {
        let tarball = source_tarball(name, version);
        let sha = sha256_hex(&tarball);
        self.fetcher.serve(
            format!("https://example.com/src/{}-{}.tar.gz", name, version),
            tarball,
        );
        self.add(&recipe_toml(name, version, &sha, deps, extra))
    }

    pub fn policy(&self) -> SelectorPolicy {
        SelectorPolicy {
            allow_bottles: true,
            force_source: false,
            local_cellar: self.layout.cellar().to_string_lossy().to_string(),
            root_url: BOTTLE_ROOT.to_string(),
        }
    }

    pub fn orchestrator(&self, platform: PlatformDescriptor) -> Orchestrator {
        self.orchestrator_with(platform, None)
    }

    pub fn orchestrator_with(&self, platform: PlatformDescriptor, placer: Option<Arc<dyn Placer>>) -> Orchestrator {
        self.build_orchestrator(platform, self.runner.clone(), placer)
    }

    /// An orchestrator whose build steps really run on the host
    pub fn orchestrator_running(&self, platform: PlatformDescriptor, runner: Arc<dyn CommandRunner>) -> Orchestrator {
        self.build_orchestrator(platform, runner, None)
    }

    fn build_orchestrator(
        &self,
        platform: PlatformDescriptor,
        runner: Arc<dyn CommandRunner>,
        placer: Option<Arc<dyn Placer>>,
    ) -> Orchestrator {
        let config = KitchenConfig {
            source_cache: self.dir.path().join("cache"),
            jobs: 2,
            retry: RetryPolicy::immediate(1),
        };
        let kitchen = Kitchen::new(
            config,
            self.layout.clone(),
            platform,
            self.fetcher.clone(),
            runner.clone(),
        );
        let mut cellar = Cellar::new(self.layout.clone(), self.store());
        if let Some(placer) = placer {
            cellar = cellar.with_placer(placer);
        }
        let tester = TestRunner::new(self.layout.clone(), runner);
        Orchestrator::new(
            Arc::new(self.catalog.clone()),
            kitchen,
            cellar,
            tester,
            self.policy(),
        )
    }
}

pub fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
