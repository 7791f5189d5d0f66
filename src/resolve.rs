// ─────────────────────────────────────────────────────────────────────────────
//  ino :: resolve
//
//  Library graph resolver.  Starting from the sketch, every newly found
//  library is scanned in turn until nothing new turns up.  The result is the
//  transitive closure in link order: a library is placed after every library
//  that references it, so a one-pass linker sees users before providers.
//
//  Two orderings:
//    move-to-tail   – a library referenced again is moved to the end of the
//                     list.  Cheap, tolerates cycles silently.
//    topological    – Kahn's algorithm over the recorded `user → dependency`
//                     edges, ties broken by discovery order.  Cycles abort.
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::deps::{LibraryDir, Scan};
use crate::error::{Abort, Result};
use crate::fsquery::{self, EXCLUDED_DIRS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkOrderPolicy {
    #[default]
    MoveToTail,
    Topological,
}

impl fmt::Display for LinkOrderPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LinkOrderPolicy::MoveToTail  => "move-to-tail",
            LinkOrderPolicy::Topological => "topological",
        })
    }
}

impl FromStr for LinkOrderPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.replace('_', "-").to_ascii_lowercase().as_str() {
            "move-to-tail" => Ok(LinkOrderPolicy::MoveToTail),
            "topological"  => Ok(LinkOrderPolicy::Topological),
            other => Err(format!(
                "unknown link order '{other}' (expected move-to-tail or topological)"
            )),
        }
    }
}

/// What the resolver hands to the rest of the build.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Libraries in link order.
    pub used_libs:     Vec<LibraryDir>,
    /// `-I` flags for every used library and its subdirectories.
    pub include_flags: Vec<String>,
    /// Libraries each scanned directory was found to use.  The sketch
    /// directory has an entry too.
    pub deps:          HashMap<LibraryDir, Vec<LibraryDir>>,
}

/// `-I` for each directory and each of its subdirectories, recursively,
/// except `examples` trees.
pub fn include_flags(dirs: &[LibraryDir]) -> Vec<String> {
    let mut flags = Vec::new();
    for dir in dirs {
        flags.push(format!("-I{}", dir.path().display()));
        for sub in fsquery::list_subdirs(dir.path(), true, EXCLUDED_DIRS) {
            flags.push(format!("-I{}", sub.display()));
        }
    }
    flags
}

/// Discover every library the sketch in `sketch_dir` needs, directly or
/// through other libraries, and order them for linking.
pub fn resolve(
    scanner:    &mut dyn Scan,
    sketch_dir: &Path,
    candidates: &[LibraryDir],
    policy:     LinkOrderPolicy,
) -> Result<Resolution> {
    let inc_flags = include_flags(candidates);

    let mut used = scanner.scan(sketch_dir, candidates, &inc_flags)?;
    let mut discovered = used.clone();
    let mut scanned: HashSet<LibraryDir> = HashSet::new();
    let mut edges: Vec<(LibraryDir, LibraryDir)> = Vec::new();
    let mut deps = HashMap::new();
    deps.insert(LibraryDir::new(sketch_dir), used.clone());

    // ── Fixed point ───────────────────────────────────────────────────────
    while used.iter().any(|l| !scanned.contains(l)) {
        for lib in used.clone() {
            if scanned.contains(&lib) {
                continue;
            }
            let mut dep_libs = scanner.scan(lib.path(), candidates, &inc_flags)?;
            edges.extend(dep_libs.iter().map(|d| (lib.clone(), d.clone())));
            deps.insert(lib.clone(), dep_libs.clone());

            let (moved, kept): (Vec<_>, Vec<_>) =
                used.into_iter().partition(|u| dep_libs.contains(u));
            used = kept;
            used.extend(moved);
            dep_libs.retain(|d| !used.contains(d));

            discovered.extend(dep_libs.iter().cloned());
            used.extend(dep_libs);
            scanned.insert(lib);
        }
    }

    let used_libs = match policy {
        LinkOrderPolicy::MoveToTail  => used,
        LinkOrderPolicy::Topological => topological(&discovered, &edges)?,
    };

    info!(
        "Libraries: {}",
        used_libs.iter().map(LibraryDir::name).collect::<Vec<_>>().join(" ")
    );

    Ok(Resolution {
        include_flags: include_flags(&used_libs),
        used_libs,
        deps,
    })
}

/// Users first, dependencies after.  Among libraries that are ready at the
/// same time, the one discovered first goes first.
fn topological(nodes: &[LibraryDir], edges: &[(LibraryDir, LibraryDir)]) -> Result<Vec<LibraryDir>> {
    let index: HashMap<&LibraryDir, usize> = nodes.iter().enumerate().map(|(i, n)| (n, i)).collect();

    let mut indegree = vec![0usize; nodes.len()];
    let mut out: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut seen = HashSet::new();

    for (user, dep) in edges {
        let (Some(&u), Some(&d)) = (index.get(user), index.get(dep)) else {
            continue;
        };
        if seen.insert((u, d)) {
            out[u].push(d);
            indegree[d] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(i) = ready.pop_first() {
        order.push(nodes[i].clone());
        for &d in &out[i] {
            indegree[d] -= 1;
            if indegree[d] == 0 {
                ready.insert(d);
            }
        }
    }

    if order.len() < nodes.len() {
        let libs: Vec<String> = (0..nodes.len())
            .filter(|&i| indegree[i] > 0)
            .map(|i| nodes[i].name())
            .collect();
        debug!("cycle among {:?}", libs);
        return Err(Abort::DependencyCycle { libs });
    }
    Ok(order)
}
