// src/bottle/mod.rs

//! Artifact selection: bottle or source build
//!
//! Given a recipe and the platform, decide whether to pour a prebuilt bottle
//! or build from source. Falling back to source is fine when no compatible
//! bottle exists; it is *not* fine when a bottle exists for this platform but
//! was built for a different cellar. That case is an error, because pouring
//! it would install binaries with broken embedded paths and silently
//! building from source would hide the packaging mistake.

mod relocate;

pub use relocate::{is_text_file, relocate_placeholders, relocate_staged};

use crate::error::{Error, Result};
use crate::platform::{Arch, OsFamily, PlatformDescriptor};
use crate::recipe::{CellarMode, PatchSpec, Recipe, ResourceSpec};
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tracing::{debug, info};

/// Cellar a bottle was built for when the manifest does not say
pub fn default_cellar(platform: &PlatformDescriptor) -> &'static str {
    match (platform.os, platform.arch) {
        (OsFamily::Macos, Arch::Arm64) => "/opt/homebrew/Cellar",
        (OsFamily::Macos, Arch::X86_64) => "/usr/local/Cellar",
        (OsFamily::Linux, _) => "/home/linuxbrew/.linuxbrew/Cellar",
    }
}

/// What has to happen to embedded paths after pouring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Relocation {
    /// Install as-is
    None,
    /// Rewrite prefix/cellar placeholders in text files
    Placeholders,
}

/// A selected bottle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BottleChoice {
    pub tag: String,
    pub sha256: String,
    pub cellar: CellarMode,
    pub relocation: Relocation,
    pub url: String,
}

/// The selector's decision for one recipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactChoice {
    UseBottle(BottleChoice),
    /// Every resource the source build has to fetch, primary source first
    BuildFromSource { resources: Vec<ResourceSpec> },
}

impl ArtifactChoice {
    pub fn is_bottle(&self) -> bool {
        matches!(self, ArtifactChoice::UseBottle(_))
    }
}

/// Caller-controlled knobs for artifact selection
#[derive(Debug, Clone)]
pub struct SelectorPolicy {
    /// Bottles may be used at all
    pub allow_bottles: bool,
    /// User asked for a source build; always wins over an available bottle
    pub force_source: bool,
    /// Cellar path of the local prefix
    pub local_cellar: String,
    /// Base URL bottles are downloaded from, unless the manifest overrides it
    pub root_url: String,
}

/// Chooses between bottles and source builds
#[derive(Debug, Clone)]
pub struct ArtifactSelector {
    platform: PlatformDescriptor,
    policy: SelectorPolicy,
}

impl ArtifactSelector {
    pub fn new(platform: PlatformDescriptor, policy: SelectorPolicy) -> Self {
        Self { platform, policy }
    }

    pub fn platform(&self) -> &PlatformDescriptor {
        &self.platform
    }

    /// Decide how to install `recipe`
    pub fn select(&self, recipe: &Recipe) -> Result<ArtifactChoice> {
        if self.policy.force_source {
            debug!("{}: source build forced", recipe.name());
            return Ok(self.source_choice(recipe));
        }
        if !self.policy.allow_bottles {
            return Ok(self.source_choice(recipe));
        }
        let Some(manifest) = &recipe.bottle else {
            debug!("{}: no bottle manifest", recipe.name());
            return Ok(self.source_choice(recipe));
        };

        let found = self
            .platform
            .bottle_tag_chain()
            .into_iter()
            .find_map(|tag| manifest.files.get(&tag).map(|entry| (tag, entry)));

        let Some((tag, entry)) = found else {
            info!(
                "{}: no bottle for {}, building from source",
                recipe.name(),
                self.platform.bottle_tag()
            );
            return Ok(self.source_choice(recipe));
        };

        let cellar = entry
            .cellar
            .clone()
            .unwrap_or_else(|| CellarMode::Fixed(default_cellar(&self.platform).to_string()));

        let relocation = match &cellar {
            CellarMode::AnySkipRelocation => Relocation::None,
            CellarMode::Any => Relocation::Placeholders,
            CellarMode::Fixed(path) => {
                if path.trim_end_matches('/') != self.policy.local_cellar.trim_end_matches('/') {
                    return Err(Error::IncompatibleCellar {
                        tag,
                        expected: path.clone(),
                        actual: self.policy.local_cellar.clone(),
                    });
                }
                Relocation::None
            }
        };

        let root = manifest.root_url.as_deref().unwrap_or(&self.policy.root_url);
        let url = bottle_url(root, recipe, &tag, manifest.rebuild);
        info!("{}: using bottle {} ({})", recipe.name(), tag, cellar);

        Ok(ArtifactChoice::UseBottle(BottleChoice {
            tag,
            sha256: entry.sha256.clone(),
            cellar,
            relocation,
            url,
        }))
    }

    fn source_choice(&self, recipe: &Recipe) -> ArtifactChoice {
        ArtifactChoice::BuildFromSource {
            resources: source_resources(recipe),
        }
    }
}

/// Everything a source build downloads: primary source, secondary
/// resources, remote patches
pub fn source_resources(recipe: &Recipe) -> Vec<ResourceSpec> {
    let mut resources = vec![ResourceSpec {
        name: recipe.name().to_string(),
        url: recipe.source_url(),
        sha256: recipe.source.sha256.clone(),
    }];
    resources.extend(recipe.resources.iter().map(|r| ResourceSpec {
        name: r.name.clone(),
        url: recipe.substitute(&r.url, &Default::default()),
        sha256: r.sha256.clone(),
    }));
    for (i, patch) in recipe.patches.iter().enumerate() {
        if let PatchSpec::Diff {
            url: Some(url),
            sha256: Some(sha),
            ..
        } = patch
        {
            resources.push(ResourceSpec {
                name: patch_resource_name(i),
                url: url.clone(),
                sha256: sha.clone(),
            });
        }
    }
    resources
}

/// Resource name under which the remote patch at `index` is fetched
pub fn patch_resource_name(index: usize) -> String {
    format!("patch-{}", index)
}

/// `<root>/<name>-<version>.<tag>.bottle[.<rebuild>].tar.gz`
pub fn bottle_url(root: &str, recipe: &Recipe, tag: &str, rebuild: u32) -> String {
    let rebuild = if rebuild > 0 {
        format!(".{}", rebuild)
    } else {
        String::new()
    };
    format!(
        "{}/{}-{}.{}.bottle{}.tar.gz",
        root.trim_end_matches('/'),
        recipe.name(),
        recipe.pkg_version(),
        tag,
        rebuild
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MacosRelease;
    use crate::recipe::parse_recipe;

    const SHA_A: &str = "1111111111111111111111111111111111111111111111111111111111111111";
    const SHA_B: &str = "2222222222222222222222222222222222222222222222222222222222222222";

    fn recipe(bottles: &str) -> Recipe {
        parse_recipe(&format!(
            r#"
[package]
name = "luau"
version = "0.578"

[source]
url = "https://example.com/luau-%(version)s.tar.gz"
sha256 = "{SHA_A}"

[[patches]]
type = "diff"
url = "https://example.com/fix.patch"
sha256 = "{SHA_B}"

{bottles}
"#
        ))
        .unwrap()
    }

    fn policy(cellar: &str) -> SelectorPolicy {
        SelectorPolicy {
            allow_bottles: true,
            force_source: false,
            local_cellar: cellar.to_string(),
            root_url: "https://bottles.example.com".to_string(),
        }
    }

    #[test]
    fn test_newer_os_falls_back_to_older_bottle() {
        let r = recipe(&format!(
            r#"
[bottle.files.big_sur]
sha256 = "{SHA_A}"
cellar = "any_skip_relocation"
[bottle.files.monterey]
sha256 = "{SHA_B}"
cellar = "any_skip_relocation"
"#
        ));
        let selector = ArtifactSelector::new(
            PlatformDescriptor::macos(MacosRelease::Ventura, Arch::X86_64),
            policy("/usr/local/Cellar"),
        );
        match selector.select(&r).unwrap() {
            ArtifactChoice::UseBottle(b) => {
                assert_eq!(b.tag, "monterey");
                assert_eq!(b.sha256, SHA_B);
                assert_eq!(b.relocation, Relocation::None);
                assert_eq!(
                    b.url,
                    "https://bottles.example.com/luau-0.578.monterey.bottle.tar.gz"
                );
            }
            other => panic!("expected bottle, got {:?}", other),
        }
    }

    #[test]
    fn test_never_uses_newer_bottle() {
        let r = recipe(&format!(
            "[bottle.files.sonoma]\nsha256 = \"{SHA_A}\"\ncellar = \"any\"\n"
        ));
        let selector = ArtifactSelector::new(
            PlatformDescriptor::macos(MacosRelease::Monterey, Arch::X86_64),
            policy("/usr/local/Cellar"),
        );
        assert!(!selector.select(&r).unwrap().is_bottle());
    }

    #[test]
    fn test_any_requires_relocation() {
        let r = recipe(&format!(
            "[bottle]\nrebuild = 1\n[bottle.files.x86_64_linux]\nsha256 = \"{SHA_A}\"\ncellar = \"any\"\n"
        ));
        let selector =
            ArtifactSelector::new(PlatformDescriptor::linux(Arch::X86_64), policy("/tmp/p/Cellar"));
        match selector.select(&r).unwrap() {
            ArtifactChoice::UseBottle(b) => {
                assert_eq!(b.relocation, Relocation::Placeholders);
                assert!(b.url.ends_with("luau-0.578.x86_64_linux.bottle.1.tar.gz"));
            }
            other => panic!("expected bottle, got {:?}", other),
        }
    }

    #[test]
    fn test_fixed_cellar_mismatch_is_an_error() {
        // No cellar declared: built for the default linuxbrew cellar
        let r = recipe(&format!(
            "[bottle.files.x86_64_linux]\nsha256 = \"{SHA_A}\"\n"
        ));
        let selector =
            ArtifactSelector::new(PlatformDescriptor::linux(Arch::X86_64), policy("/tmp/p/Cellar"));
        assert!(matches!(
            selector.select(&r),
            Err(Error::IncompatibleCellar { .. })
        ));

        let matching = ArtifactSelector::new(
            PlatformDescriptor::linux(Arch::X86_64),
            policy("/home/linuxbrew/.linuxbrew/Cellar"),
        );
        assert!(matching.select(&r).unwrap().is_bottle());
    }

    #[test]
    fn test_force_source_wins() {
        let r = recipe(&format!(
            "[bottle.files.x86_64_linux]\nsha256 = \"{SHA_A}\"\ncellar = \"any_skip_relocation\"\n"
        ));
        let mut p = policy("/tmp/p/Cellar");
        p.force_source = true;
        let selector = ArtifactSelector::new(PlatformDescriptor::linux(Arch::X86_64), p);
        match selector.select(&r).unwrap() {
            ArtifactChoice::BuildFromSource { resources } => {
                assert_eq!(resources.len(), 2);
                assert_eq!(resources[0].url, "https://example.com/luau-0.578.tar.gz");
                assert_eq!(resources[1].name, "patch-0");
            }
            other => panic!("expected source build, got {:?}", other),
        }
    }
}
