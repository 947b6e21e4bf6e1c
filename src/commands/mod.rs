// src/commands/mod.rs
//! Command handlers for the keg CLI

mod fetch;
mod install;
mod livecheck;
pub mod progress;
mod query;
mod remove;
mod test;

pub use fetch::cmd_fetch;
pub use install::{InstallArgs, cmd_install};
pub use livecheck::cmd_livecheck;
pub use query::{cmd_deps, cmd_list};
pub use remove::cmd_uninstall;
pub use test::cmd_test;

use crate::cli::GlobalArgs;
use anyhow::{Context, Result};
use keg::config::KegConfig;
use keg::db::{ReceiptStore, SqliteReceiptStore};
use keg::exec::{CommandRunner, SystemRunner};
use keg::fetch::{Fetcher, HttpFetcher};
use keg::layout::PrefixLayout;
use keg::cellar::Cellar;
use keg::orchestrator::Orchestrator;
use keg::platform::PlatformDescriptor;
use keg::recipe::{Catalog, Kitchen};
use keg::tester::TestRunner;
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs, built from config and global flags
pub struct Session {
    pub config: KegConfig,
    pub layout: PrefixLayout,
    pub platform: PlatformDescriptor,
    pub quiet: bool,
}

impl Session {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let mut config = KegConfig::discover(global.config.as_deref())?;
        if let Some(prefix) = &global.prefix {
            config.prefix = prefix.clone();
        }
        if let Some(catalog) = &global.catalog {
            config.catalog = Some(catalog.clone());
        }
        if let Some(cache) = &global.cache {
            config.cache = Some(cache.clone());
        }
        config.validate()?;

        let platform = PlatformDescriptor::detect().context("Failed to detect platform")?;
        debug!("Prefix {}, platform {}", config.prefix.display(), platform);
        Ok(Self {
            layout: config.layout(),
            config,
            platform,
            quiet: global.quiet,
        })
    }

    pub fn catalog(&self) -> Result<Catalog> {
        let dir = self.config.catalog_dir();
        Catalog::load_dir(&dir).with_context(|| format!("Failed to load recipes from {}", dir.display()))
    }

    pub fn store(&self) -> Result<Arc<dyn ReceiptStore>> {
        let path = self.config.database_path();
        let store = SqliteReceiptStore::open(&path)
            .with_context(|| format!("Failed to open receipt database {}", path.display()))?;
        Ok(Arc::new(store))
    }

    pub fn fetcher(&self) -> Result<Arc<dyn Fetcher>> {
        Ok(Arc::new(HttpFetcher::new()?))
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        match self.config.command_timeout() {
            Some(timeout) => Arc::new(SystemRunner::with_timeout(timeout)),
            None => Arc::new(SystemRunner::new()),
        }
    }

    pub fn tester(&self) -> TestRunner {
        TestRunner::new(self.layout.clone(), self.runner())
    }

    /// Wire the pipeline together over `catalog`
    pub fn orchestrator(&self, catalog: Catalog) -> Result<Orchestrator> {
        let runner = self.runner();
        let kitchen = Kitchen::new(
            self.config.kitchen_config(),
            self.layout.clone(),
            self.platform.clone(),
            self.fetcher()?,
            runner.clone(),
        );
        let cellar = Cellar::new(self.layout.clone(), self.store()?);
        let tester = TestRunner::new(self.layout.clone(), runner);
        Ok(Orchestrator::new(
            Arc::new(catalog),
            kitchen,
            cellar,
            tester,
            self.config.selector_policy(),
        ))
    }
}
