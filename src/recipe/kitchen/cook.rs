// src/recipe/kitchen/cook.rs

//! Cook: source build execution for a single recipe

use crate::bottle::{patch_resource_name, relocate_staged};
use crate::error::{Error, Result};
use crate::exec::STDERR_TAIL_LINES;
use crate::filesystem::{copy_tree, is_empty_dir, list_files, make_executable, reroot, symlink};
use crate::layout::{KegPaths, PrefixLayout};
use crate::recipe::format::{DependencyKind, InstallStep, PatchSpec, Recipe, ResourceSpec};
use crate::recipe::predicate::PredicateContext;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

use super::archive::stage_file;
use super::patch::{apply_unified_diff, inreplace};
use super::{ArtifactSource, BuildArtifact, CookRequest, Kitchen};

/// A single cook operation
pub struct Cook<'a> {
    kitchen: &'a Kitchen,
    recipe: &'a Recipe,
    request: &'a CookRequest<'a>,
    /// Temporary build directory
    build_dir: TempDir,
    /// Project root after unpacking (`%(buildpath)s`)
    source_dir: PathBuf,
    /// Staging root; the live prefix is mirrored underneath it
    dest_dir: PathBuf,
    /// The install prefix as seen from inside `dest_dir`
    staged_prefix: PathBuf,
    /// Staged keg paths; what `%(prefix)s` and friends expand to
    keg: KegPaths,
    /// Where the keg is committed once the build succeeds
    keg_path: PathBuf,
    vars: HashMap<String, String>,
    env: Vec<(String, String)>,
    /// Downloaded resources by name
    fetched: HashMap<String, PathBuf>,
    /// Patches applied by an explicit `apply_patch` step instead of up front
    deferred_patches: HashSet<usize>,
    log: String,
    warnings: Vec<String>,
}

impl<'a> Cook<'a> {
    pub(super) fn new(kitchen: &'a Kitchen, request: &'a CookRequest<'a>) -> Result<Self> {
        let recipe = request.recipe;
        let build_dir = tempfile::Builder::new()
            .prefix(&format!("keg-{}-", recipe.name()))
            .tempdir()
            .map_err(|e| Error::IoError(format!("Failed to create build directory: {}", e)))?;

        let source_dir = build_dir.path().join("source");
        let dest_dir = build_dir.path().join("destdir");
        fs::create_dir_all(&source_dir)?;
        fs::create_dir_all(&dest_dir)?;

        let staged_prefix = reroot(&dest_dir, kitchen.layout.prefix());
        let keg = PrefixLayout::new(&staged_prefix).keg(recipe);
        let keg_path = kitchen.layout.keg_path(recipe.name(), &recipe.pkg_version());

        let mut deferred_patches = HashSet::new();
        collect_deferred(&recipe.install, &mut deferred_patches);

        Ok(Self {
            kitchen,
            recipe,
            request,
            build_dir,
            source_dir,
            dest_dir,
            staged_prefix,
            keg,
            keg_path,
            vars: HashMap::new(),
            env: Vec::new(),
            fetched: HashMap::new(),
            deferred_patches,
            log: String::new(),
            warnings: Vec::new(),
        })
    }

    fn predicates(&self) -> PredicateContext<'_> {
        PredicateContext::new(
            &self.kitchen.platform,
            self.request.dependencies,
            self.request.options,
        )
    }

    /// Phase 1: Prep - fetch every resource through the download cache
    pub(super) fn prep(&mut self, resources: &[ResourceSpec]) -> Result<()> {
        for resource in resources {
            self.request.cancel.check()?;
            let path = self.kitchen.cache.fetch(
                self.kitchen.fetcher.as_ref(),
                resource,
                &self.kitchen.config.retry,
                self.request.cancel,
            )?;
            self.log_line(&format!("Fetched {}: {}", resource.name, resource.url));
            self.fetched.insert(resource.name.clone(), path);
        }
        Ok(())
    }

    /// Phase 2a: Unpack the primary source
    pub(super) fn unpack(&mut self) -> Result<()> {
        self.request.cancel.check()?;
        let primary = self.fetched_path(self.recipe.name())?;
        let file_name = url_basename(&self.recipe.source_url());
        stage_file(&primary, &file_name, &self.source_dir)?;
        self.log_line(&format!("Extracted source to {}", self.source_dir.display()));
        debug!("Source directory: {}", self.source_dir.display());

        self.vars = self.keg.template_vars();
        let put = |vars: &mut HashMap<String, String>, k: &str, p: &Path| {
            vars.insert(k.to_string(), p.to_string_lossy().to_string());
        };
        put(&mut self.vars, "buildpath", &self.source_dir);
        put(&mut self.vars, "root", self.kitchen.layout.prefix());
        put(&mut self.vars, "opt", &self.kitchen.layout.opt_dir());
        put(&mut self.vars, "cellar", &self.kitchen.layout.cellar());
        self.vars
            .insert("jobs".to_string(), self.kitchen.config.jobs.to_string());
        for dep in &self.recipe.dependencies {
            let opt = self.kitchen.layout.opt_path(&dep.name);
            put(&mut self.vars, &format!("opt:{}", dep.name), &opt);
        }
        Ok(())
    }

    /// Phase 2b: Apply patches in order
    pub(super) fn patch(&mut self) -> Result<()> {
        for index in 0..self.recipe.patches.len() {
            if self.deferred_patches.contains(&index) {
                continue;
            }
            self.request.cancel.check()?;
            self.apply_patch(index)?;
        }
        Ok(())
    }

    fn apply_patch(&mut self, index: usize) -> Result<()> {
        let Some(patch) = self.recipe.patches.get(index) else {
            return Err(Error::PatchApplyFailure {
                patch: format!("#{}", index),
                reason: "no such patch".to_string(),
            });
        };
        if !patch.when().evaluate(&self.predicates()) {
            debug!("Skipping patch {} (condition not met)", patch.label());
            return Ok(());
        }

        let label = patch.label();
        info!("Applying patch: {}", label);
        match patch {
            PatchSpec::Diff {
                url: Some(_), strip, ..
            } => {
                let path = self.fetched_path(&patch_resource_name(index))?;
                let diff = fs::read_to_string(&path)?;
                apply_unified_diff(&self.source_dir, &diff, *strip, &label)?;
            }
            PatchSpec::Diff {
                inline: Some(diff),
                strip,
                ..
            } => {
                apply_unified_diff(&self.source_dir, diff, *strip, &label)?;
            }
            PatchSpec::Diff { .. } => {
                return Err(Error::PatchApplyFailure {
                    patch: label,
                    reason: "diff has neither url nor inline content".to_string(),
                });
            }
            PatchSpec::Inreplace {
                files,
                find,
                replace,
                ..
            } => {
                let files: Vec<String> = files.iter().map(|f| self.subst(f)).collect();
                inreplace(
                    &self.source_dir,
                    &files,
                    &self.subst(find),
                    &self.subst(replace),
                    &label,
                )?;
            }
        }
        self.log_line(&format!("Applied patch: {}", label));
        Ok(())
    }

    /// Phase 3: Simmer - interpret the install steps
    pub(super) fn simmer(&mut self) -> Result<()> {
        self.env = self.standard_env();
        let recipe = self.recipe;
        self.run_steps(&recipe.install)
    }

    /// `MAKEFLAGS`, `PREFIX` and search paths over the opt prefixes of
    /// this recipe's dependencies
    ///
    /// `PREFIX` is the staged keg, so no `DESTDIR` is exported: a build
    /// system honouring both would nest the keg twice.
    fn standard_env(&self) -> Vec<(String, String)> {
        let layout = &self.kitchen.layout;
        let ctx = self.predicates();
        let dep_prefixes: Vec<PathBuf> = self
            .recipe
            .dependencies
            .iter()
            .filter(|d| d.kind != DependencyKind::Test)
            .filter(|d| self.request.dependencies.contains(&d.name))
            .filter(|d| d.when.evaluate(&ctx))
            .map(|d| layout.opt_path(&d.name))
            .collect();

        let join = |paths: Vec<PathBuf>| {
            paths
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join(":")
        };

        let mut path_entries: Vec<PathBuf> = dep_prefixes.iter().map(|p| p.join("bin")).collect();
        path_entries.push(layout.prefix().join("bin"));
        let mut path = join(path_entries);
        if let Ok(host_path) = std::env::var("PATH") {
            path = format!("{}:{}", path, host_path);
        }

        vec![
            ("MAKEFLAGS".to_string(), format!("-j{}", self.kitchen.config.jobs)),
            ("PREFIX".to_string(), self.keg.prefix.to_string_lossy().to_string()),
            ("KEG_PREFIX".to_string(), layout.prefix().to_string_lossy().to_string()),
            ("CMAKE_PREFIX_PATH".to_string(), join(dep_prefixes.clone())),
            (
                "PKG_CONFIG_PATH".to_string(),
                join(dep_prefixes.iter().map(|p| p.join("lib/pkgconfig")).collect()),
            ),
            ("PATH".to_string(), path),
        ]
    }

    fn run_steps(&mut self, steps: &[InstallStep]) -> Result<()> {
        for step in steps {
            self.request.cancel.check()?;
            self.run_step(step)?;
        }
        Ok(())
    }

    fn run_step(&mut self, step: &InstallStep) -> Result<()> {
        debug!("Step: {}", step.label());
        match step {
            InstallStep::Run { command, workdir } => {
                let command = self.subst(command);
                let workdir = match workdir {
                    Some(wd) => self.source_dir.join(self.subst(wd)),
                    None => self.source_dir.clone(),
                };
                self.run_command(&step.label(), &command, &workdir)
            }
            InstallStep::SetEnv { key, value, append } => {
                let value = self.subst(value);
                let value = if *append {
                    let existing = self
                        .env_value(key)
                        .or_else(|| std::env::var(key).ok())
                        .filter(|v| !v.is_empty());
                    match existing {
                        Some(existing) => format!("{}:{}", existing, value),
                        None => value,
                    }
                } else {
                    value
                };
                self.env.retain(|(k, _)| k != key);
                self.env.push((key.clone(), value));
                Ok(())
            }
            InstallStep::Inreplace {
                files,
                find,
                replace,
            } => {
                let files: Vec<String> = files
                    .iter()
                    .map(|f| self.input_path(&self.subst(f)).to_string_lossy().to_string())
                    .collect();
                inreplace(
                    &self.source_dir,
                    &files,
                    &self.subst(find),
                    &self.subst(replace),
                    &step.label(),
                )
            }
            InstallStep::ApplyPatch { index } => self.apply_patch(*index),
            InstallStep::StageResource { resource, into } => {
                let spec = self.recipe.resource(resource).ok_or_else(|| {
                    Error::NotFound(format!("resource {} in {}", resource, self.recipe.name()))
                })?;
                let file_name = url_basename(&self.recipe.substitute(&spec.url, &self.vars));
                let path = self.fetched_path(resource)?;
                let target = self.output_path(&self.subst(into))?;
                stage_file(&path, &file_name, &target)?;
                self.log_line(&format!("Staged resource {} into {}", resource, target.display()));
                Ok(())
            }
            InstallStep::Install { from, into } => {
                let target_dir = self.output_path(&self.subst(into))?;
                fs::create_dir_all(&target_dir)?;
                for item in from {
                    let source = self.input_path(&self.subst(item));
                    let name = source.file_name().ok_or_else(|| {
                        Error::InvalidPath(format!("cannot install {}", source.display()))
                    })?;
                    let target = target_dir.join(name);
                    let meta = fs::symlink_metadata(&source).map_err(|e| Error::BuildStepFailure {
                        step: step.label(),
                        exit_code: None,
                        stderr_tail: format!("{}: {}", source.display(), e),
                    })?;
                    if meta.is_dir() {
                        copy_tree(&source, &target, |_| Ok(()))?;
                    } else if meta.file_type().is_symlink() {
                        symlink(&fs::read_link(&source)?, &target)?;
                    } else {
                        fs::copy(&source, &target)?;
                    }
                }
                Ok(())
            }
            InstallStep::Mkdir { path } => {
                let path = self.output_path(&self.subst(path))?;
                fs::create_dir_all(path)?;
                Ok(())
            }
            InstallStep::Symlink { target, link } => {
                let link = self.output_path(&self.subst(link))?;
                if let Some(parent) = link.parent() {
                    fs::create_dir_all(parent)?;
                }
                if link.symlink_metadata().is_ok() {
                    fs::remove_file(&link)?;
                }
                symlink(&self.live_path(&self.subst(target)), &link)
            }
            InstallStep::WriteExecScript { target, into } => {
                let target = self.live_path(&self.subst(target));
                let name = target
                    .file_name()
                    .map(|n| n.to_os_string())
                    .ok_or_else(|| Error::InvalidPath(format!("cannot wrap {}", target.display())))?;
                let dir = self.output_path(&self.subst(into))?;
                fs::create_dir_all(&dir)?;
                let script = dir.join(name);
                fs::write(
                    &script,
                    format!("#!/bin/bash\nexec \"{}\" \"$@\"\n", target.display()),
                )?;
                make_executable(&script)
            }
            InstallStep::Conditional {
                when,
                steps,
                otherwise,
            } => {
                if when.evaluate(&self.predicates()) {
                    self.run_steps(steps)
                } else {
                    self.run_steps(otherwise)
                }
            }
        }
    }

    /// Run a shell command; any non-zero exit fails the build
    fn run_command(&mut self, label: &str, command: &str, workdir: &Path) -> Result<()> {
        info!("Running: {}", label);
        fs::create_dir_all(workdir)?;
        let output = self.kitchen.runner.run(command, &self.env, workdir)?;
        self.log_build_output(label, &output.stdout, &output.stderr);

        if !output.success() {
            return Err(Error::BuildStepFailure {
                step: label.to_string(),
                exit_code: output.exit_code,
                stderr_tail: output.stderr_tail(STDERR_TAIL_LINES),
            });
        }
        Ok(())
    }

    /// Phase 4: Plate - hand the staged keg over as an artifact
    pub(super) fn plate(mut self) -> Result<BuildArtifact> {
        let staged_keg = self.keg.prefix.clone();
        if is_empty_dir(&staged_keg)? {
            return Err(Error::BuildStepFailure {
                step: "install".to_string(),
                exit_code: Some(0),
                stderr_tail: format!(
                    "no files were installed into {}",
                    self.keg_path.display()
                ),
            });
        }

        // Only the keg subtree is committed; anything else under DESTDIR
        // (config written straight to /etc, say) is dropped
        let keg_rel = staged_keg.strip_prefix(&self.dest_dir).unwrap_or(&staged_keg).to_path_buf();
        let stray: Vec<PathBuf> = list_files(&self.dest_dir)?
            .into_iter()
            .filter(|p| !p.starts_with(&keg_rel))
            .collect();
        if !stray.is_empty() {
            let shown: Vec<String> = stray.iter().take(5).map(|p| format!("/{}", p.display())).collect();
            self.warnings.push(format!(
                "{} file(s) installed outside the keg were discarded: {}",
                stray.len(),
                shown.join(", ")
            ));
        }

        let relocated = relocate_staged(&staged_keg, &self.staged_prefix, self.kitchen.layout.prefix())?;
        if relocated > 0 {
            self.log_line(&format!("Relocated {} staged path(s)", relocated));
        }

        info!("Cooked {} {}", self.recipe.name(), self.recipe.pkg_version());

        Ok(BuildArtifact {
            name: self.recipe.name().to_string(),
            pkg_version: self.recipe.pkg_version(),
            keg_path: self.keg_path,
            source: ArtifactSource::Source,
            log: self.log,
            warnings: self.warnings,
            staged_keg,
            build_dir: self.build_dir,
        })
    }

    fn subst(&self, template: &str) -> String {
        self.recipe.substitute(template, &self.vars)
    }

    fn env_value(&self, key: &str) -> Option<String> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    fn fetched_path(&self, name: &str) -> Result<PathBuf> {
        self.fetched
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("resource {} was not fetched", name)))
    }

    /// Where a built-in step writes: paths under the install prefix are
    /// redirected into the staging root, relative paths resolve against
    /// the source directory
    fn output_path(&self, path: &str) -> Result<PathBuf> {
        let path = Path::new(path);
        if !path.is_absolute() {
            return Ok(self.source_dir.join(path));
        }
        if path.starts_with(self.kitchen.layout.prefix()) {
            return Ok(reroot(&self.dest_dir, path));
        }
        if path.starts_with(self.build_dir.path()) {
            return Ok(path.to_path_buf());
        }
        Err(Error::InvalidPath(format!(
            "{} is outside the install prefix",
            path.display()
        )))
    }

    /// The live counterpart of a path under the staged prefix
    fn live_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        match path.strip_prefix(&self.staged_prefix) {
            Ok(rel) => self.kitchen.layout.prefix().join(rel),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Where a built-in step reads from: staged copies win over the live
    /// prefix, relative paths resolve against the source directory
    fn input_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if !path.is_absolute() {
            return self.source_dir.join(path);
        }
        if path.starts_with(self.kitchen.layout.prefix()) {
            let staged = reroot(&self.dest_dir, path);
            if staged.symlink_metadata().is_ok() {
                return staged;
            }
        }
        path.to_path_buf()
    }

    fn log_line(&mut self, line: &str) {
        self.log.push_str(line);
        self.log.push('\n');
    }

    /// Log build step output (stdout/stderr) with a phase header
    fn log_build_output(&mut self, step: &str, stdout: &str, stderr: &str) {
        self.log_line(&format!("=== {} ===", step));
        if !stdout.is_empty() {
            self.log.push_str(stdout);
            self.log.push('\n');
        }
        if !stderr.is_empty() {
            self.log.push_str(stderr);
            self.log.push('\n');
        }
    }
}

/// Patch indices referenced by `apply_patch` steps, at any depth
fn collect_deferred(steps: &[InstallStep], out: &mut HashSet<usize>) {
    for step in steps {
        match step {
            InstallStep::ApplyPatch { index } => {
                out.insert(*index);
            }
            InstallStep::Conditional {
                steps, otherwise, ..
            } => {
                collect_deferred(steps, out);
                collect_deferred(otherwise, out);
            }
            _ => {}
        }
    }
}

/// Last path segment of a URL, without query or fragment
pub(super) fn url_basename(url: &str) -> String {
    url.split(['?', '#'])
        .next()
        .and_then(|u| u.rsplit('/').next())
        .filter(|b| !b.is_empty())
        .unwrap_or("download")
        .to_string()
}
