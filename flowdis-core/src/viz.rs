//! Graphviz export for a [`Cfg`]. Optional and purely textual: no drawing,
//! no GUI, just a `.dot` source a caller can feed to `dot -Tsvg`.

use std::fmt::{self, Display, Formatter, Write};

use crate::cfg::{Cfg, GraphBase};
use crate::model::ConstraintKind;
use crate::symbol::SymbolPool;

/// Renders a [`Cfg`] as a Graphviz `digraph`.
pub struct CfgPrinter<'a> {
    cfg: &'a Cfg,
    pool: &'a SymbolPool,
}

impl<'a> CfgPrinter<'a> {
    pub fn new(cfg: &'a Cfg, pool: &'a SymbolPool) -> Self {
        Self { cfg, pool }
    }

    /// Write the full `.dot` source to `w`.
    pub fn write(&self, w: &mut dyn Write) -> fmt::Result {
        writeln!(w, "digraph cfg {{")?;
        self.block_nodes(w)?;
        self.edges(w)?;
        writeln!(w, "}}")
    }

    fn label_for(&self, label: crate::model::LabelId) -> String {
        self.pool
            .label(label)
            .map(|l| l.name().to_string())
            .unwrap_or_else(|| label.to_string())
    }

    fn block_nodes(&self, w: &mut dyn Write) -> fmt::Result {
        let mut blocks: Vec<_> = self.cfg.blocks().collect();
        blocks.sort_by_key(|b| b.label.as_u32());
        for block in blocks {
            let name = self.label_for(block.label);
            if block.is_bad() {
                let reason = block
                    .bad_reason()
                    .map(|r| r.to_string())
                    .unwrap_or_default();
                writeln!(
                    w,
                    "    {:?} [shape=box, style=filled, fillcolor=lightpink, label=\"{} (bad: {})\"]",
                    name, name, reason
                )?;
                continue;
            }
            let range = block
                .range()
                .map(|r| format!("{:#x}..{:#x}", r.start, r.end))
                .unwrap_or_else(|| "?".to_string());
            writeln!(
                w,
                "    {:?} [shape=record, label=\"{{{} | {} lines | {}}}\"]",
                name,
                name,
                block.lines.len(),
                range
            )?;
        }
        Ok(())
    }

    fn edges(&self, w: &mut dyn Write) -> fmt::Result {
        let mut edges: Vec<_> = self.cfg.edges().collect();
        edges.sort_by_key(|&(s, d, _)| (s.as_u32(), d.as_u32()));
        for (src, dst, kind) in edges {
            let sole_successor = self.cfg.successors(src).len() == 1;
            let color = if sole_successor {
                "blue"
            } else {
                match kind {
                    ConstraintKind::Next => "red",
                    ConstraintKind::To => "darkgreen",
                }
            };
            writeln!(
                w,
                "    {:?} -> {:?} [color={}]",
                self.label_for(src),
                self.label_for(dst),
                color
            )?;
        }
        Ok(())
    }
}

impl<'a> Display for CfgPrinter<'a> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        self.write(f)
    }
}
