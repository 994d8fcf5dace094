use std::fmt;
use bytemuck::{Pod, Zeroable};

/// Number of descriptor slots a binding mask can describe
pub const MAX_BINDINGS: usize = 128;

const MASK_WORDS: usize = MAX_BINDINGS / 32;

/// Records which descriptor slots have a resource bound.
///
/// Bit `i` corresponds to slot `i` of a [`DescriptorSlotMapping`]. Masks are
/// plain values: equality over every bit is the only thing a pipeline cache
/// keys on.
///
/// [`DescriptorSlotMapping`]: super::layout::DescriptorSlotMapping
#[repr(C)]
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct BindingMask {
    words: [u32; MASK_WORDS],
}

impl BindingMask {
    pub const fn empty() -> Self {
        Self { words: [0; MASK_WORDS] }
    }

    /// Builds a mask from the low 128 bits of `bits`.
    pub const fn from_bits(bits: u128) -> Self {
        Self {
            words: [
                bits as u32,
                (bits >> 32) as u32,
                (bits >> 64) as u32,
                (bits >> 96) as u32,
            ],
        }
    }

    pub fn from_slots(slots: impl IntoIterator<Item = u32>) -> Self {
        let mut mask = Self::empty();
        for slot in slots {
            mask.set(slot, true);
        }
        mask
    }

    pub fn from_words(words: [u32; MASK_WORDS]) -> Self {
        Self { words }
    }

    pub fn bits(&self) -> u128 {
        self.words
            .iter()
            .rev()
            .fold(0u128, |acc, word| (acc << 32) | *word as u128)
    }

    pub fn words(&self) -> [u32; MASK_WORDS] {
        self.words
    }

    pub fn test(&self, slot: u32) -> bool {
        let slot = slot as usize;
        if slot >= MAX_BINDINGS {
            return false;
        }
        self.words[slot / 32] & (1 << (slot % 32)) != 0
    }

    /// Slots past [`MAX_BINDINGS`] cannot be represented and are ignored.
    pub fn set(&mut self, slot: u32, bound: bool) {
        let slot = slot as usize;
        if slot >= MAX_BINDINGS {
            return;
        }
        let bit = 1 << (slot % 32);
        if bound {
            self.words[slot / 32] |= bit;
        } else {
            self.words[slot / 32] &= !bit;
        }
    }

    pub fn with_slot(mut self, slot: u32) -> Self {
        self.set(slot, true);
        self
    }

    pub fn count(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Iterates over bound slots in ascending order
    pub fn bound_slots(&self) -> impl Iterator<Item = u32> + '_ {
        (0..MAX_BINDINGS as u32).filter(|slot| self.test(*slot))
    }
}

impl fmt::Display for BindingMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.bits())
    }
}

impl fmt::Debug for BindingMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingMask({:#x})", self.bits())
    }
}

/// Dynamic state a compute pipeline variant is compiled against.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct ComputePipelineStateInfo {
    pub binding_mask: BindingMask,
}

impl ComputePipelineStateInfo {
    pub fn new(binding_mask: BindingMask) -> Self {
        Self { binding_mask }
    }
}

impl From<BindingMask> for ComputePipelineStateInfo {
    fn from(binding_mask: BindingMask) -> Self {
        Self::new(binding_mask)
    }
}
