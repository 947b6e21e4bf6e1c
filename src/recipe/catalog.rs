// src/recipe/catalog.rs

//! The set of known recipes
//!
//! A `Catalog` is an ordinary value handed to the resolver; there is no
//! process-wide registry.

use super::format::Recipe;
use super::parser::{parse_recipe_file, validate_recipe};
use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Recipes keyed by name
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    recipes: BTreeMap<String, Recipe>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from already-parsed recipes; later duplicates win
    pub fn from_recipes(recipes: impl IntoIterator<Item = Recipe>) -> Self {
        let mut catalog = Self::new();
        for recipe in recipes {
            catalog.insert(recipe);
        }
        catalog
    }

    /// Load every `*.toml` file in a directory
    ///
    /// Each recipe is validated; validation warnings are logged.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(Error::NotFound(format!(
                "Recipe directory {} does not exist",
                dir.display()
            )));
        }

        let mut catalog = Self::new();
        let mut entries: Vec<_> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        entries.sort();

        for path in entries {
            let recipe = parse_recipe_file(&path)?;
            for warning in validate_recipe(&recipe)? {
                warn!("{}: {}", recipe.name(), warning);
            }
            if catalog.recipes.contains_key(recipe.name()) {
                return Err(Error::ParseError(format!(
                    "Recipe {} defined more than once (second definition in {})",
                    recipe.name(),
                    path.display()
                )));
            }
            debug!("Loaded recipe {} from {}", recipe.name(), path.display());
            catalog.insert(recipe);
        }

        Ok(catalog)
    }

    pub fn insert(&mut self, recipe: Recipe) {
        self.recipes.insert(recipe.name().to_string(), recipe);
    }

    pub fn get(&self, name: &str) -> Option<&Recipe> {
        self.recipes.get(name)
    }

    /// Like `get`, but an unknown name is an error
    pub fn require(&self, name: &str) -> Result<&Recipe> {
        self.get(name).ok_or_else(|| Error::UnknownRecipe {
            name: name.to_string(),
            required_by: "command line".to_string(),
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA: &str = "9b1c7a7e03e8d63bd1d6e6f1b0ab4b9cbd0bd1bf4b0fdad5dd13f10f8a7d7c3a";

    fn write_recipe(dir: &Path, name: &str) {
        let content = format!(
            "[package]\nname = \"{name}\"\nversion = \"1.0\"\n\n[source]\nurl = \"https://example.com/{name}.tar.gz\"\nsha256 = \"{SHA}\"\n"
        );
        fs::write(dir.join(format!("{name}.toml")), content).unwrap();
    }

    #[test]
    fn test_load_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_recipe(dir.path(), "luau");
        write_recipe(dir.path(), "cmake");
        fs::write(dir.path().join("README.md"), "not a recipe").unwrap();

        let catalog = Catalog::load_dir(dir.path()).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.names().collect::<Vec<_>>(), vec!["cmake", "luau"]);
        assert!(catalog.contains("luau"));
    }

    #[test]
    fn test_load_missing_dir() {
        assert!(Catalog::load_dir(Path::new("/nonexistent/recipes")).is_err());
    }

    #[test]
    fn test_require_unknown() {
        let catalog = Catalog::new();
        assert!(matches!(
            catalog.require("nope"),
            Err(Error::UnknownRecipe { .. })
        ));
    }
}
