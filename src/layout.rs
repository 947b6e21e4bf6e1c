// src/layout.rs
//! Centralized path derivation for the install prefix
//!
//! ```text
//! <prefix>/Cellar/<name>/<version>[_<revision>]/   one keg per installed version
//! <prefix>/opt/<name> -> ../Cellar/<name>/<version>
//! <prefix>/etc, <prefix>/var                       shared across kegs
//! <prefix>/var/keg/receipts.db                      receipt store
//! <prefix>/var/keg/commit.lock                      prefix commit lock
//! ```

use crate::recipe::Recipe;
use crate::version::PkgVersion;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Placeholder for the prefix inside relocatable bottles
pub const PREFIX_PLACEHOLDER: &str = "@@KEG_PREFIX@@";
/// Placeholder for the cellar inside relocatable bottles
pub const CELLAR_PLACEHOLDER: &str = "@@KEG_CELLAR@@";

/// Paths inside an install prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixLayout {
    prefix: PathBuf,
}

impl PrefixLayout {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }

    pub fn cellar(&self) -> PathBuf {
        self.prefix.join("Cellar")
    }

    pub fn opt_dir(&self) -> PathBuf {
        self.prefix.join("opt")
    }

    /// Stable path to the current keg of `name`
    pub fn opt_path(&self, name: &str) -> PathBuf {
        self.opt_dir().join(name)
    }

    /// All kegs of one recipe live under this directory
    pub fn rack(&self, name: &str) -> PathBuf {
        self.cellar().join(name)
    }

    pub fn keg_path(&self, name: &str, version: &PkgVersion) -> PathBuf {
        self.rack(name).join(version.to_string())
    }

    pub fn etc(&self) -> PathBuf {
        self.prefix.join("etc")
    }

    pub fn var(&self) -> PathBuf {
        self.prefix.join("var")
    }

    /// keg's own state directory
    pub fn state_dir(&self) -> PathBuf {
        self.var().join("keg")
    }

    pub fn default_db_path(&self) -> PathBuf {
        self.state_dir().join("receipts.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join("commit.lock")
    }

    /// Directory layout of one keg
    pub fn keg(&self, recipe: &Recipe) -> KegPaths {
        KegPaths::new(self, recipe.name(), self.keg_path(recipe.name(), &recipe.pkg_version()))
    }
}

/// Standard directories of one keg
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KegPaths {
    pub prefix: PathBuf,
    pub bin: PathBuf,
    pub sbin: PathBuf,
    pub lib: PathBuf,
    pub include: PathBuf,
    pub libexec: PathBuf,
    pub share: PathBuf,
    pub pkgshare: PathBuf,
    pub etc: PathBuf,
    pub var: PathBuf,
}

impl KegPaths {
    pub fn new(layout: &PrefixLayout, name: &str, keg: PathBuf) -> Self {
        Self {
            bin: keg.join("bin"),
            sbin: keg.join("sbin"),
            lib: keg.join("lib"),
            include: keg.join("include"),
            libexec: keg.join("libexec"),
            share: keg.join("share"),
            pkgshare: keg.join("share").join(name),
            etc: layout.etc(),
            var: layout.var(),
            prefix: keg,
        }
    }

    /// `cmake` arguments every CMake-based recipe wants
    pub fn std_cmake_args(&self) -> String {
        format!(
            "-DCMAKE_INSTALL_PREFIX={} -DCMAKE_INSTALL_LIBDIR=lib -DCMAKE_BUILD_TYPE=Release \
             -DCMAKE_FIND_FRAMEWORK=LAST -DCMAKE_VERBOSE_MAKEFILE=ON -Wno-dev -DBUILD_TESTING=OFF",
            self.prefix.display()
        )
    }

    /// Template variables for this keg
    pub fn template_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        let mut put = |k: &str, p: &Path| {
            vars.insert(k.to_string(), p.to_string_lossy().to_string());
        };
        put("prefix", &self.prefix);
        put("bin", &self.bin);
        put("sbin", &self.sbin);
        put("lib", &self.lib);
        put("include", &self.include);
        put("libexec", &self.libexec);
        put("share", &self.share);
        put("pkgshare", &self.pkgshare);
        put("etc", &self.etc);
        put("var", &self.var);
        vars.insert("std_cmake_args".to_string(), self.std_cmake_args());
        vars
    }
}
