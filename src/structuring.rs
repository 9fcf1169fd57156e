//! Normalization of a lowered jump graph into a finished [`Cfg`].

use crate::cfg::{Cfg, Label, RawCfg};
use crate::containers::unordered::{UnorderedMap, UnorderedSet};

/// Turns the unstructured jump graph of a routine into the engine's canonical CFG form.
pub trait CfgStructurer {
    fn structure(&self, raw: RawCfg) -> Cfg;
}

/// Keeps the jump graph as-is, ordering the blocks in reverse postorder from the entry and
/// recording predecessors. Blocks unreachable from the entry are kept, after the reachable ones,
/// in their original order.
#[derive(Clone, Copy, Debug, Default)]
pub struct JumpGraphStructurer;

impl CfgStructurer for JumpGraphStructurer {
    fn structure(&self, raw: RawCfg) -> Cfg {
        let RawCfg {
            handle,
            entry,
            blocks,
            registers,
        } = raw;

        let successors: UnorderedMap<Label, Vec<Label>> =
            blocks.iter().map(|b| (b.label, b.successors())).collect();

        let mut predecessors: UnorderedMap<Label, Vec<Label>> =
            blocks.iter().map(|b| (b.label, vec![])).collect();
        for b in &blocks {
            for s in b.successors() {
                let preds = predecessors.entry(s).or_default();
                if !preds.contains(&b.label) {
                    preds.push(b.label);
                }
            }
        }

        // Iterative DFS computing postorder
        let mut postorder: Vec<Label> = vec![];
        let mut visited: UnorderedSet<Label> = UnorderedSet::new();
        let mut stack: Vec<(Label, usize)> = vec![];
        if successors.contains_key(&entry) {
            visited.insert(entry);
            stack.push((entry, 0));
        }
        while let Some((node, next)) = stack.pop() {
            let succs = successors.get(&node).map(|v| v.as_slice()).unwrap_or(&[]);
            if let Some(&s) = succs.get(next) {
                stack.push((node, next + 1));
                if successors.contains_key(&s) && visited.insert(s) {
                    stack.push((s, 0));
                }
            } else {
                postorder.push(node);
            }
        }

        let rank: UnorderedMap<Label, usize> = postorder
            .iter()
            .rev()
            .enumerate()
            .map(|(i, l)| (*l, i))
            .collect();
        let mut blocks = blocks;
        // Stable, so unreachable blocks keep their relative order
        blocks.sort_by_key(|b| rank.get(&b.label).copied().unwrap_or(usize::MAX));

        Cfg {
            handle,
            entry,
            blocks,
            registers,
            predecessors,
        }
    }
}
