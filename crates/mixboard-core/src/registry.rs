//! The 128-slot MIDI CC registry.
//!
//! This is the control-plane master copy: it owns the CC -> (channel,
//! parameter) table and each channel's four binding indices, and keeps the
//! two views consistent. Every mutation returns the list of slots it
//! touched so the caller can forward them to the audio-side dispatch table
//! through the command stream.

use std::collections::HashMap;

use crate::channel::StripRef;
use crate::error::{Error, Result};
use crate::midi::CcParam;

/// CC numbers below this are never auto-assigned; they are left free for
/// bank select, mod wheel, and the other conventionally-reserved
/// controllers.
const AUTO_ASSIGN_FIRST_CC: u8 = 11;

/// A CC slot's binding: which channel and which of its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub target: StripRef,
    pub param: CcParam,
}

/// A registry slot update to forward to the audio-side dispatch table.
pub(crate) type SlotUpdate = (u8, Option<Binding>);

/// Control-side CC registry.
///
/// Invariant: `map[cc] == Some(binding)` iff the bound channel's index for
/// `binding.param` is `Some(cc)`, and each channel parameter is bound to at
/// most one slot.
#[derive(Debug)]
pub struct CcRegistry {
    map: [Option<Binding>; 128],
    indices: HashMap<StripRef, [Option<u8>; 4]>,
}

impl Default for CcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CcRegistry {
    pub fn new() -> Self {
        Self {
            map: [None; 128],
            indices: HashMap::new(),
        }
    }

    /// The binding of a CC slot, if any.
    pub fn binding(&self, cc: u8) -> Option<Binding> {
        self.map.get(cc as usize).copied().flatten()
    }

    /// The CC bound to one parameter of a channel, if any.
    pub fn index_of(&self, strip: StripRef, param: CcParam) -> Option<u8> {
        self.indices
            .get(&strip)
            .and_then(|indices| indices[param.index()])
    }

    /// Bind `strip`'s `param` to a specific CC.
    ///
    /// Steals the slot from any previous owner and releases the parameter's
    /// previous slot, exactly like moving a mapping in a learn dialog.
    pub(crate) fn bind(
        &mut self,
        strip: StripRef,
        param: CcParam,
        cc: u8,
        updates: &mut Vec<SlotUpdate>,
    ) -> Result<()> {
        if cc > 127 {
            return Err(Error::InvalidCC);
        }

        self.unbind_slot(cc, updates);

        if let Some(previous) = self.index_of(strip, param) {
            self.map[previous as usize] = None;
            updates.push((previous, None));
        }

        let binding = Binding { target: strip, param };
        self.map[cc as usize] = Some(binding);
        self.indices.entry(strip).or_insert([None; 4])[param.index()] = Some(cc);
        updates.push((cc, Some(binding)));
        Ok(())
    }

    /// Bind `strip`'s `param` to the first free CC in the assignable range.
    pub(crate) fn auto_bind(
        &mut self,
        strip: StripRef,
        param: CcParam,
        updates: &mut Vec<SlotUpdate>,
    ) -> Result<u8> {
        for cc in AUTO_ASSIGN_FIRST_CC..=127 {
            if self.map[cc as usize].is_none() {
                self.bind(strip, param, cc, updates)?;
                return Ok(cc);
            }
        }
        Err(Error::NoFreeCC)
    }

    /// Release every binding of a channel, called on channel removal.
    pub(crate) fn remove_strip(&mut self, strip: StripRef, updates: &mut Vec<SlotUpdate>) {
        if let Some(indices) = self.indices.remove(&strip) {
            for cc in indices.into_iter().flatten() {
                debug_assert!(
                    matches!(self.map[cc as usize], Some(b) if b.target == strip),
                    "CC registry out of sync at slot {cc}"
                );
                self.map[cc as usize] = None;
                updates.push((cc, None));
            }
        }
    }

    /// Clear one slot, fixing up the previous owner's index.
    fn unbind_slot(&mut self, cc: u8, updates: &mut Vec<SlotUpdate>) {
        let Some(binding) = self.map[cc as usize].take() else {
            return;
        };
        if let Some(indices) = self.indices.get_mut(&binding.target) {
            if indices[binding.param.index()] == Some(cc) {
                indices[binding.param.index()] = None;
            }
        }
        updates.push((cc, None));
    }

    /// Verify the map/index bijection; test support.
    #[cfg(test)]
    fn check_consistent(&self) {
        for (cc, slot) in self.map.iter().enumerate() {
            if let Some(binding) = slot {
                assert_eq!(
                    self.index_of(binding.target, binding.param),
                    Some(cc as u8),
                    "slot {cc} not mirrored by its channel"
                );
            }
        }
        for (strip, indices) in &self.indices {
            for (i, cc) in indices.iter().enumerate() {
                if let Some(cc) = cc {
                    let binding = self.map[*cc as usize].expect("index points at empty slot");
                    assert_eq!(binding.target, *strip);
                    assert_eq!(binding.param.index(), i);
                }
            }
        }
    }
}
