// ─────────────────────────────────────────────────────────────────────────────
//  ino :: config
//
//  Layered TOML configuration.  Later layers override earlier ones:
//
//      /etc/ino.toml  →  ~/.inorc  →  ./ino.toml
//
//  Top-level keys apply to every command; a table named after a command
//  overrides them for that command only:
//
//      board-model = "uno"
//      arduino-dist = "/opt/arduino-1.0.5"
//
//      [build]
//      cppflags = "-Os -g"
//      link-order = "topological"
//
//  `board_model` and `board-model` are the same key.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::build::{split_flags, BuildRequest};
use crate::error::{Abort, Result};
use crate::resolve::LinkOrderPolicy;

/// Options one layer may set.  Unset keys leave lower layers alone.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Settings {
    pub board_model:  Option<String>,
    pub arduino_dist: Option<PathBuf>,
    pub cc:           Option<String>,
    pub cxx:          Option<String>,
    pub ar:           Option<String>,
    pub objcopy:      Option<String>,
    pub cppflags:     Option<String>,
    pub cflags:       Option<String>,
    pub cxxflags:     Option<String>,
    pub ldflags:      Option<String>,
    pub link_order:   Option<LinkOrderPolicy>,
    pub verbose:      Option<bool>,
}

impl Settings {
    /// Take every key `other` sets.
    pub fn overlay(&mut self, other: &Settings) {
        take(&mut self.board_model, &other.board_model);
        take(&mut self.arduino_dist, &other.arduino_dist);
        take(&mut self.cc, &other.cc);
        take(&mut self.cxx, &other.cxx);
        take(&mut self.ar, &other.ar);
        take(&mut self.objcopy, &other.objcopy);
        take(&mut self.cppflags, &other.cppflags);
        take(&mut self.cflags, &other.cflags);
        take(&mut self.cxxflags, &other.cxxflags);
        take(&mut self.ldflags, &other.ldflags);
        take(&mut self.link_order, &other.link_order);
        take(&mut self.verbose, &other.verbose);
    }

    /// Write the configured values into `req`.
    pub fn apply(&self, req: &mut BuildRequest) {
        if let Some(v) = &self.board_model  { req.board_model = v.clone(); }
        if let Some(v) = &self.arduino_dist { req.arduino_dist = Some(v.clone()); }
        if let Some(v) = &self.cc           { req.tools.cc = v.clone(); }
        if let Some(v) = &self.cxx          { req.tools.cxx = v.clone(); }
        if let Some(v) = &self.ar           { req.tools.ar = v.clone(); }
        if let Some(v) = &self.objcopy      { req.tools.objcopy = v.clone(); }
        if let Some(v) = &self.cppflags     { req.user_flags.cppflags = split_flags(v); }
        if let Some(v) = &self.cflags       { req.user_flags.cflags = split_flags(v); }
        if let Some(v) = &self.cxxflags     { req.user_flags.cxxflags = split_flags(v); }
        if let Some(v) = &self.ldflags      { req.user_flags.ldflags = split_flags(v); }
        if let Some(v) = self.link_order    { req.link_order = v; }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    global:   Settings,
    commands: HashMap<String, Settings>,
    /// Files that were actually read, in layer order.
    pub sources: Vec<PathBuf>,
}

impl Config {
    /// System, user, then project configuration.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/ino.toml")];
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".inorc"));
        }
        paths.push(PathBuf::from("ino.toml"));
        paths
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_paths())
    }

    /// Read every existing file of `paths`, in order.  Missing files are
    /// skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<Self> {
        let mut config = Self::default();
        for path in paths {
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(path)?;
            config.merge_str(&text, path)?;
            debug!("config: loaded {}", path.display());
            config.sources.push(path.clone());
        }
        Ok(config)
    }

    /// Parse one layer and put it on top.  `path` is only used in errors.
    pub fn merge_str(&mut self, text: &str, path: &Path) -> Result<()> {
        let bad = |message: String| Abort::Config { path: path.to_owned(), message };

        let table: toml::Table = toml::from_str(text).map_err(|e| bad(e.to_string()))?;

        let mut global = toml::Table::new();
        let mut commands: Vec<(String, toml::Table)> = Vec::new();
        for (key, value) in table {
            match value {
                toml::Value::Table(t) => commands.push((key, normalize(t))),
                v => {
                    global.insert(key.replace('_', "-"), v);
                }
            }
        }

        let layer: Settings = toml::Value::Table(global)
            .try_into()
            .map_err(|e: toml::de::Error| bad(e.to_string()))?;
        self.global.overlay(&layer);

        for (command, table) in commands {
            let layer: Settings = toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| bad(format!("[{command}]: {e}")))?;
            self.commands
                .entry(command.replace('_', "-"))
                .or_default()
                .overlay(&layer);
        }
        Ok(())
    }

    /// Effective settings for `command`.
    pub fn settings(&self, command: &str) -> Settings {
        let mut s = self.global.clone();
        if let Some(over) = self.commands.get(command) {
            s.overlay(over);
        }
        s
    }
}

fn take<T: Clone>(dst: &mut Option<T>, src: &Option<T>) {
    if src.is_some() {
        dst.clone_from(src);
    }
}

fn normalize(table: toml::Table) -> toml::Table {
    table
        .into_iter()
        .map(|(k, v)| (k.replace('_', "-"), v))
        .collect()
}
