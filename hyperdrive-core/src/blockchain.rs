//! Append-only log of committed blocks

use crate::{CoreError, CoreResult, Hash, Height, SignedBlock};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Committed, signed blocks indexed by height; never truncated or reordered
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blockchain {
    blocks: Vec<SignedBlock>,
}

impl Blockchain {
    /// Create an empty blockchain
    pub fn new() -> Self {
        Self { blocks: Vec::new() }
    }

    /// Height of the tip; 0 for an empty chain
    pub fn height(&self) -> Height {
        self.blocks.last().map(|b| b.height()).unwrap_or(0)
    }

    /// Header of the tip; zero for an empty chain
    pub fn tip_header(&self) -> Hash {
        self.blocks.last().map(|b| b.header()).unwrap_or_default()
    }

    /// Most recently committed block
    pub fn tip(&self) -> Option<&SignedBlock> {
        self.blocks.last()
    }

    /// Block committed at `height`
    pub fn block(&self, height: Height) -> Option<&SignedBlock> {
        if height == 0 {
            return None;
        }
        self.blocks.get((height - 1) as usize)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SignedBlock> {
        self.blocks.iter()
    }

    /// Check that `block` would directly extend the tip
    pub fn check_extends(&self, block: &SignedBlock) -> CoreResult<()> {
        let tip = self.height();
        if block.height() != tip + 1 {
            return Err(CoreError::HeightMismatch {
                tip,
                actual: block.height(),
            });
        }
        let tip_header = self.tip_header();
        if block.parent_header() != tip_header {
            return Err(CoreError::ParentMismatch {
                expected: tip_header,
                actual: block.parent_header(),
            });
        }
        Ok(())
    }

    /// Append a block that extends the tip
    pub fn extend(&mut self, block: SignedBlock) -> CoreResult<()> {
        self.check_extends(&block)?;
        block.block.verify_header()?;
        debug!("Extending chain to height {} ({})", block.height(), block.header());
        self.blocks.push(block);
        Ok(())
    }
}
