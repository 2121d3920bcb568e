//! Structural consistency check.
//!
//! Walks the whole tree from the root with the writer paused and verifies
//! the invariants every operation relies on. Intended for tests and for
//! tools that want to vet a store after recovery.

use std::cmp::Ordering;
use std::collections::HashSet;

use tracing::{debug, warn};

use crate::common::{Error, PageId, Result};
use crate::index::Layout;

use super::meta::FIRST_DATA_PAGE;
use super::pointer::Generations;
use super::tree::{BTree, TreeState};

/// Summary of a successful consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub height: usize,
    /// Node pages reachable from the root.
    pub pages: usize,
    pub entries: usize,
    /// Freelist entries plus the pages of the freelist chain.
    pub free_pages: usize,
}

struct Walk {
    generations: Generations,
    high_water: u32,
    height: usize,
    visited: HashSet<PageId>,
    /// Leaves in key order with the page their right slots point at.
    leaves: Vec<(PageId, PageId)>,
    entries: usize,
}

impl<L: Layout> BTree<L> {
    /// Verify the structure of the whole tree.
    ///
    /// Checks that every reachable page is in range, reachable once, of a
    /// valid generation and not superseded; that keys are strictly ordered
    /// and within their parent's bounds; that all leaves sit at the same
    /// depth and the sibling chain visits them in key order; and that no
    /// free page is reachable.
    ///
    /// # Errors
    /// `Error::CorruptionDetected` naming the first offending page.
    pub fn consistency_check(&self) -> Result<ConsistencyReport> {
        let state = self.state.lock();
        match self.check_locked(&state) {
            Ok(report) => {
                debug!(
                    height = report.height,
                    pages = report.pages,
                    entries = report.entries,
                    "tree.consistency.ok"
                );
                Ok(report)
            }
            Err(err) => {
                warn!(error = %err, "tree.consistency.failed");
                Err(err)
            }
        }
    }

    fn check_locked(&self, state: &TreeState) -> Result<ConsistencyReport> {
        let mut walk = Walk {
            generations: state.generations,
            high_water: state.high_water,
            height: state.height,
            visited: HashSet::new(),
            leaves: Vec::new(),
            entries: 0,
        };
        self.check_subtree(&mut walk, state.root, 1, u64::MAX, None, None)?;

        for pair in walk.leaves.windows(2) {
            let (page_id, right) = pair[0];
            if right != pair[1].0 {
                return Err(Error::corruption(
                    page_id,
                    format!("right sibling {} but next leaf is {}", right, pair[1].0),
                ));
            }
        }
        if let Some(&(page_id, right)) = walk.leaves.last() {
            if right != PageId::INVALID {
                return Err(Error::corruption(
                    page_id,
                    format!("last leaf points right to {}", right),
                ));
            }
        }

        let mut free = HashSet::new();
        let listed = state
            .freelist
            .iter()
            .map(|entry| entry.page_id)
            .chain(state.chain.iter().copied());
        for page_id in listed {
            if !free.insert(page_id) {
                return Err(Error::corruption(page_id, "listed as free twice"));
            }
            if walk.visited.contains(&page_id) {
                return Err(Error::corruption(page_id, "free page reachable from root"));
            }
            check_range(page_id, walk.high_water)?;
        }

        Ok(ConsistencyReport {
            height: state.height,
            pages: walk.visited.len(),
            entries: walk.entries,
            free_pages: free.len(),
        })
    }

    /// Check the subtree at `page_id`, whose keys must lie in
    /// `[lower, upper)`.
    fn check_subtree(
        &self,
        walk: &mut Walk,
        page_id: PageId,
        depth: usize,
        parent_generation: u64,
        lower: Option<&L::Key>,
        upper: Option<&L::Key>,
    ) -> Result<()> {
        if !walk.visited.insert(page_id) {
            return Err(Error::corruption(page_id, "page reachable twice"));
        }
        check_range(page_id, walk.high_water)?;

        let node = self.read_node(page_id)?;
        if !walk.generations.is_valid(node.generation) {
            return Err(Error::corruption(
                page_id,
                format!("generation {} not valid", node.generation),
            ));
        }
        if node.generation > parent_generation {
            return Err(Error::corruption(
                page_id,
                format!(
                    "generation {} newer than parent generation {}",
                    node.generation, parent_generation
                ),
            ));
        }
        if walk.generations.is_valid(node.successor.generation) {
            return Err(Error::corruption(
                page_id,
                format!("superseded by {}", node.successor.page_id),
            ));
        }

        let layout = &self.layout;
        for pair in node.keys.windows(2) {
            if layout.compare(&pair[0], &pair[1]) != Ordering::Less {
                return Err(Error::corruption(page_id, "keys out of order"));
            }
        }
        if let (Some(first), Some(lower)) = (node.keys.first(), lower) {
            if layout.compare(first, lower) == Ordering::Less {
                return Err(Error::corruption(page_id, "key below parent bound"));
            }
        }
        if let (Some(last), Some(upper)) = (node.keys.last(), upper) {
            if layout.compare(last, upper) != Ordering::Less {
                return Err(Error::corruption(page_id, "key above parent bound"));
            }
        }

        if node.is_leaf() {
            if depth != walk.height {
                return Err(Error::corruption(
                    page_id,
                    format!("leaf at depth {} in tree of height {}", depth, walk.height),
                ));
            }
            let right = node
                .right
                .resolve(&walk.generations)
                .ok_or_else(|| Error::corruption(page_id, "no valid right sibling slot"))?;
            walk.leaves.push((page_id, right.page_id));
            walk.entries += node.keys.len();
            return Ok(());
        }

        if node.keys.is_empty() || node.children.len() != node.keys.len() + 1 {
            return Err(Error::corruption(
                page_id,
                format!(
                    "{} routing keys for {} children",
                    node.keys.len(),
                    node.children.len()
                ),
            ));
        }
        for (index, &child) in node.children.iter().enumerate() {
            let child_lower = if index == 0 {
                lower
            } else {
                Some(&node.keys[index - 1])
            };
            let child_upper = node.keys.get(index).or(upper);
            self.check_subtree(
                walk,
                child,
                depth + 1,
                node.generation,
                child_lower,
                child_upper,
            )?;
        }
        Ok(())
    }
}

fn check_range(page_id: PageId, high_water: u32) -> Result<()> {
    if page_id.0 < FIRST_DATA_PAGE || page_id.0 >= high_water {
        return Err(Error::corruption(
            page_id,
            format!("outside allocated pages [{}, {})", FIRST_DATA_PAGE, high_water),
        ));
    }
    Ok(())
}
