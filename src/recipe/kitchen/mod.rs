// src/recipe/kitchen/mod.rs

//! Kitchen: turns a recipe into a staged keg
//!
//! Two ways in, one way out:
//! - **Cook** builds from source: fetch every resource, unpack, patch,
//!   run the install steps with every keg path pointed into a staging root
//! - **Pour** unpacks a prebuilt bottle and relocates it if required
//!
//! Either way the result is a [`BuildArtifact`] whose staged keg mirrors
//! the final `<prefix>/Cellar/<name>/<version>` tree. Nothing outside the
//! artifact's temporary directory is touched until the Cellar commits it.

mod archive;
mod config;
mod cook;
mod patch;

pub use archive::{ArchiveKind, detect_archive, extract_archive};
pub use config::{ArtifactSource, BuildArtifact, KitchenConfig};
pub use cook::Cook;
pub use patch::{apply_unified_diff, inreplace};

use crate::bottle::{ArtifactChoice, BottleChoice, Relocation, relocate_placeholders};
use crate::cancel::CancellationToken;
use crate::error::{Error, Result};
use crate::exec::CommandRunner;
use crate::fetch::{DownloadCache, Fetcher};
use crate::filesystem::{is_empty_dir, move_tree, reroot};
use crate::layout::PrefixLayout;
use crate::platform::PlatformDescriptor;
use crate::recipe::format::{Recipe, ResourceSpec};
use archive::single_top_dir;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Everything a single build needs besides the Kitchen itself
pub struct CookRequest<'a> {
    pub recipe: &'a Recipe,
    /// Build options requested with `--with`
    pub options: &'a HashSet<String>,
    /// Recipes in the plan or already installed, for `dependency` predicates
    pub dependencies: &'a HashSet<String>,
    pub cancel: &'a CancellationToken,
}

/// The Kitchen: where recipes are cooked and bottles poured
pub struct Kitchen {
    pub(crate) config: KitchenConfig,
    layout: PrefixLayout,
    platform: PlatformDescriptor,
    fetcher: Arc<dyn Fetcher>,
    runner: Arc<dyn CommandRunner>,
    cache: DownloadCache,
}

impl Kitchen {
    pub fn new(
        config: KitchenConfig,
        layout: PrefixLayout,
        platform: PlatformDescriptor,
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        let cache = DownloadCache::new(&config.source_cache);
        Self {
            config,
            layout,
            platform,
            fetcher,
            runner,
            cache,
        }
    }

    pub fn layout(&self) -> &PrefixLayout {
        &self.layout
    }

    pub fn platform(&self) -> &PlatformDescriptor {
        &self.platform
    }

    pub fn cache(&self) -> &DownloadCache {
        &self.cache
    }

    /// Download and verify everything `choice` needs, without building
    ///
    /// Returns the cached paths. Running this first lets a later
    /// [`Kitchen::prepare`] proceed without network access.
    pub fn fetch(
        &self,
        recipe: &Recipe,
        choice: &ArtifactChoice,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        let resources = match choice {
            ArtifactChoice::UseBottle(bottle) => vec![bottle_resource(recipe, bottle)],
            ArtifactChoice::BuildFromSource { resources } => resources.clone(),
        };

        let mut fetched = Vec::with_capacity(resources.len());
        for resource in &resources {
            cancel.check()?;
            fetched.push(
                self.cache
                    .fetch(self.fetcher.as_ref(), resource, &self.config.retry, cancel)?,
            );
        }
        info!(
            "Fetched {} resource(s) for {}",
            fetched.len(),
            recipe.name()
        );
        Ok(fetched)
    }

    /// Produce a staged keg by whichever route `choice` names
    pub fn prepare(&self, request: &CookRequest<'_>, choice: &ArtifactChoice) -> Result<BuildArtifact> {
        match choice {
            ArtifactChoice::UseBottle(bottle) => self.pour(request.recipe, bottle, request.cancel),
            ArtifactChoice::BuildFromSource { resources } => self.cook(request, resources),
        }
    }

    /// Refuse a source build the host compiler is known to break
    pub fn check_compiler(&self, recipe: &Recipe) -> Result<()> {
        match recipe.fails_with_compiler(&self.platform.compiler) {
            Some(spec) => Err(Error::UnsupportedCompiler {
                recipe: recipe.name().to_string(),
                compiler: match &spec.cause {
                    Some(cause) => format!("{} ({})", self.platform.compiler, cause),
                    None => self.platform.compiler.to_string(),
                },
            }),
            None => Ok(()),
        }
    }

    /// Build a recipe from source
    ///
    /// 1. **Prep**: fetch sources, resources and remote patches
    /// 2. **Unpack**: extract the primary source, collapsing one top dir
    /// 3. **Patch**: apply patches whose condition holds
    /// 4. **Simmer**: interpret the install steps
    /// 5. **Plate**: check the staged keg and hand it over
    ///
    /// The cancellation token is checked between every phase and step.
    pub fn cook(&self, request: &CookRequest<'_>, resources: &[ResourceSpec]) -> Result<BuildArtifact> {
        let recipe = request.recipe;
        info!("Cooking {} {}", recipe.name(), recipe.pkg_version());

        self.check_compiler(recipe)?;

        let mut cook = Cook::new(self, request)?;

        info!("Prep: fetching ingredients...");
        cook.prep(resources)?;

        info!("Unpacking and patching sources...");
        cook.unpack()?;
        cook.patch()?;

        info!("Simmering: running install steps...");
        cook.simmer()?;

        request.cancel.check()?;
        cook.plate()
    }

    /// Unpack a bottle into a staged keg
    pub fn pour(
        &self,
        recipe: &Recipe,
        bottle: &BottleChoice,
        cancel: &CancellationToken,
    ) -> Result<BuildArtifact> {
        info!("Pouring {} bottle for {}", bottle.tag, recipe.name());
        cancel.check()?;

        let resource = bottle_resource(recipe, bottle);
        let archive = self
            .cache
            .fetch(self.fetcher.as_ref(), &resource, &self.config.retry, cancel)?;
        cancel.check()?;

        let build_dir = tempfile::Builder::new()
            .prefix(&format!("keg-{}-bottle-", recipe.name()))
            .tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create build directory: {}", e)))?;
        let unpacked = build_dir.path().join("bottle");

        let kind = detect_archive(&archive)?.ok_or_else(|| {
            Error::ParseError(format!("{} bottle is not a tar archive", recipe.name()))
        })?;
        extract_archive(&archive, kind, &unpacked)?;

        // Bottles are laid out `<name>/<version>/...`
        let pkg_version = recipe.pkg_version();
        let conventional = unpacked.join(recipe.name()).join(pkg_version.to_string());
        let root = if conventional.is_dir() {
            conventional
        } else {
            let mut root = unpacked.clone();
            while let Some(inner) = single_top_dir(&root)? {
                root = inner;
            }
            debug!("Bottle has no {}/{} directory, using {}", recipe.name(), pkg_version, root.display());
            root
        };

        if is_empty_dir(&root)? {
            return Err(Error::ParseError(format!("{} bottle is empty", recipe.name())));
        }

        let keg_path = self.layout.keg_path(recipe.name(), &pkg_version);
        let staged_keg = reroot(&build_dir.path().join("destdir"), &keg_path);
        if let Some(parent) = staged_keg.parent() {
            fs::create_dir_all(parent)?;
        }
        move_tree(&root, &staged_keg)?;

        let mut log = format!("Poured bottle {} ({})\n", bottle.tag, bottle.url);
        if bottle.relocation == Relocation::Placeholders {
            cancel.check()?;
            let n = relocate_placeholders(&staged_keg, self.layout.prefix(), &self.layout.cellar())?;
            log.push_str(&format!("Relocated {} file(s)\n", n));
        }

        Ok(BuildArtifact {
            name: recipe.name().to_string(),
            pkg_version,
            keg_path,
            source: ArtifactSource::Bottle {
                tag: bottle.tag.clone(),
                sha256: bottle.sha256.clone(),
                cellar: bottle.cellar.to_string(),
            },
            log,
            warnings: Vec::new(),
            staged_keg,
            build_dir,
        })
    }
}

fn bottle_resource(recipe: &Recipe, bottle: &BottleChoice) -> ResourceSpec {
    ResourceSpec {
        name: format!("{} bottle ({})", recipe.name(), bottle.tag),
        url: bottle.url.clone(),
        sha256: bottle.sha256.clone(),
    }
}
