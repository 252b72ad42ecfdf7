//! Post-resolution dependency graph: transitive requirement sets and link
//! ordering.

use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest;
use crate::tree::Tree;
use crate::MANIFEST_FILE;

/// Iteration bound for the requirement-set fixed point.
const MAX_PASSES: usize = 50;

/// Fill every node's transitive requirement set.
///
/// Direct dependencies come from each node's manifest; the root counts its
/// dev, executable, example, and test dependencies as well. The closure is
/// recomputed over the tree until no set changes. Sets are ordered by tree
/// index, so repeated runs produce identical results.
pub fn resolve_package_dependencies(tree: &mut Tree) -> Result<()> {
    let direct = direct_dependencies(tree)?;

    for pass in 1..=MAX_PASSES {
        let mut changed = false;
        for id in 0..tree.nodes.len() {
            let set = closure(tree, id, &direct[id])?;
            if tree.nodes[id].package_dep.as_ref() != Some(&set) {
                tree.nodes[id].package_dep = Some(set);
                changed = true;
            }
        }
        if !changed {
            debug!(passes = pass, "requirement sets settled");
            return Ok(());
        }
    }
    Err(Error::FixedPointDiverged(MAX_PASSES))
}

/// Topological ordering of the sub-graph rooted at `root_id`: every
/// provider precedes its consumers, and the root is emitted last.
pub fn link_order(tree: &Tree, root_id: usize) -> Result<Vec<usize>> {
    if root_id >= tree.nodes.len() {
        return Err(Error::GraphInvalidId(root_id));
    }
    let mut order = Vec::new();
    let mut visited = vec![false; tree.nodes.len()];
    visit(tree, root_id, &mut visited, &mut order)?;
    Ok(order)
}

fn visit(tree: &Tree, id: usize, visited: &mut [bool], order: &mut Vec<usize>) -> Result<()> {
    if visited[id] {
        return Ok(());
    }
    visited[id] = true;
    if let Some(deps) = &tree.nodes[id].package_dep {
        for name in deps {
            let dep = tree.find(name).ok_or_else(|| Error::GraphMissingDep {
                package: tree.nodes[id].name.clone(),
                dependency: name.clone(),
            })?;
            visit(tree, dep, visited, order)?;
        }
    }
    order.push(id);
    Ok(())
}

/// Direct dependency names per node, re-read from the resolved manifests.
fn direct_dependencies(tree: &Tree) -> Result<Vec<Vec<String>>> {
    let mut all = Vec::with_capacity(tree.nodes.len());
    for (id, node) in tree.nodes.iter().enumerate() {
        let Some(proj_dir) = &node.proj_dir else {
            debug!(name = %node.name, "no project directory, skipping requirement scan");
            all.push(Vec::new());
            continue;
        };
        let manifest = manifest::read_manifest(&proj_dir.join(MANIFEST_FILE))?;
        let mut names: Vec<String> = manifest.dependencies.keys().cloned().collect();
        if id == 0 {
            names.extend(manifest.dev_dependencies.keys().cloned());
            for section in manifest
                .executable
                .iter()
                .chain(&manifest.example)
                .chain(&manifest.test)
            {
                names.extend(section.dependencies.keys().cloned());
            }
        }
        all.push(names);
    }
    Ok(all)
}

/// Union of `direct` and the known requirement sets of those dependencies,
/// ordered by tree index.
fn closure(tree: &Tree, id: usize, direct: &[String]) -> Result<Vec<String>> {
    let mut include = vec![false; tree.nodes.len()];
    for name in direct {
        let dep = tree.find(name).ok_or_else(|| Error::GraphMissingDep {
            package: tree.nodes[id].name.clone(),
            dependency: name.clone(),
        })?;
        include[dep] = true;
        if let Some(transitive) = &tree.nodes[dep].package_dep {
            for further in transitive {
                let tid = tree.find(further).ok_or_else(|| Error::GraphMissingDep {
                    package: tree.nodes[dep].name.clone(),
                    dependency: further.clone(),
                })?;
                include[tid] = true;
            }
        }
    }
    Ok((0..tree.nodes.len())
        .filter(|i| include[*i])
        .map(|i| tree.nodes[i].name.clone())
        .collect())
}
