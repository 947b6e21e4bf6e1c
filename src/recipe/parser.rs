// src/recipe/parser.rs

//! Recipe file parsing

use crate::error::{Error, Result};
use crate::hash::is_sha256_hex;
use crate::recipe::format::{InstallStep, LivecheckStrategy, PatchSpec, Recipe};
use std::collections::HashSet;
use std::path::Path;

/// Parse a recipe from a TOML string
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    toml::from_str(content).map_err(|e| Error::ParseError(format!("Invalid recipe: {}", e)))
}

/// Parse a recipe from a file
pub fn parse_recipe_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::IoError(format!("Failed to read recipe file {}: {}", path.display(), e)))?;

    parse_recipe(&content)
        .map_err(|e| Error::ParseError(format!("{}: {}", path.display(), e)))
}

/// Names become directories under the cellar and opt, so only
/// `[A-Za-z0-9@._+-]` is allowed, with no leading dot
fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '+' | '-'))
}

/// Validate a recipe for completeness and correctness
///
/// Hard errors make the recipe unusable; the returned strings are warnings.
pub fn validate_recipe(recipe: &Recipe) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let name = recipe.name();

    if name.is_empty() {
        return Err(Error::ParseError("Recipe package name cannot be empty".to_string()));
    }
    if !is_valid_name(name) {
        return Err(Error::ParseError(format!("Invalid recipe name: {:?}", name)));
    }

    if !is_sha256_hex(&recipe.source.sha256) {
        return Err(Error::ParseError(format!(
            "{}: source sha256 must be 64 hex characters",
            name
        )));
    }

    let mut seen = HashSet::new();
    for resource in &recipe.resources {
        if !seen.insert(resource.name.as_str()) {
            return Err(Error::ParseError(format!(
                "{}: duplicate resource name {}",
                name, resource.name
            )));
        }
        if !is_sha256_hex(&resource.sha256) {
            return Err(Error::ParseError(format!(
                "{}: resource {} sha256 must be 64 hex characters",
                name, resource.name
            )));
        }
    }

    for dep in &recipe.dependencies {
        if !is_valid_name(&dep.name) {
            return Err(Error::ParseError(format!(
                "{}: invalid dependency name {:?}",
                name, dep.name
            )));
        }
        if dep.name == name {
            return Err(Error::ParseError(format!("{}: recipe depends on itself", name)));
        }
    }

    if let Some(bottle) = &recipe.bottle {
        for (tag, entry) in &bottle.files {
            if !is_sha256_hex(&entry.sha256) {
                return Err(Error::ParseError(format!(
                    "{}: bottle {} sha256 must be 64 hex characters",
                    name, tag
                )));
            }
        }
    }

    for patch in &recipe.patches {
        if let PatchSpec::Diff {
            url, sha256, inline, ..
        } = patch
        {
            match (url, inline) {
                (Some(_), Some(_)) | (None, None) => {
                    return Err(Error::ParseError(format!(
                        "{}: a diff patch needs exactly one of url or inline",
                        name
                    )));
                }
                (Some(u), None) if sha256.as_deref().is_none_or(|s| !is_sha256_hex(s)) => {
                    return Err(Error::ParseError(format!(
                        "{}: remote patch {} has no valid sha256",
                        name, u
                    )));
                }
                _ => {}
            }
        }
    }

    let option_names: HashSet<&str> = recipe.options.iter().map(|o| o.name.as_str()).collect();
    check_steps(recipe, &recipe.install, &option_names, &mut warnings)?;

    if recipe.package.desc.is_none() {
        warnings.push("Missing package description".to_string());
    }
    if recipe.package.license.is_none() {
        warnings.push("Missing package license".to_string());
    }
    if recipe.install.is_empty() && recipe.bottle.is_none() {
        warnings.push("No install steps and no bottles".to_string());
    }
    if recipe.test.as_ref().is_none_or(|t| t.assertions.is_empty()) {
        warnings.push("No test assertions".to_string());
    }

    if let Some(livecheck) = &recipe.livecheck {
        if livecheck.strategy == LivecheckStrategy::PageMatch && livecheck.regex.is_none() {
            return Err(Error::ParseError(format!(
                "{}: page_match livecheck needs a regex",
                name
            )));
        }
        if let Some(re) = &livecheck.regex {
            fancy_regex::Regex::new(re).map_err(|e| {
                Error::ParseError(format!("{}: invalid livecheck regex: {}", name, e))
            })?;
        }
    }

    Ok(warnings)
}

fn check_steps(
    recipe: &Recipe,
    steps: &[InstallStep],
    options: &HashSet<&str>,
    warnings: &mut Vec<String>,
) -> Result<()> {
    for step in steps {
        match step {
            InstallStep::StageResource { resource, .. } if recipe.resource(resource).is_none() => {
                return Err(Error::ParseError(format!(
                    "{}: stage_resource refers to unknown resource {}",
                    recipe.name(),
                    resource
                )));
            }
            InstallStep::ApplyPatch { index } if *index >= recipe.patches.len() => {
                return Err(Error::ParseError(format!(
                    "{}: apply_patch index {} out of range",
                    recipe.name(),
                    index
                )));
            }
            InstallStep::Conditional {
                when,
                steps,
                otherwise,
            } => {
                if let crate::recipe::Predicate::BuildOption(opt) = when
                    && !options.contains(opt.as_str())
                {
                    warnings.push(format!("Conditional refers to undeclared option {}", opt));
                }
                check_steps(recipe, steps, options, warnings)?;
                check_steps(recipe, otherwise, options, warnings)?;
            }
            _ => {}
        }
    }
    Ok(())
}
