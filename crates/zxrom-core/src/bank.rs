//! ROM bank store.
//!
//! Every image the board can serve is preconverted once and parked in a slot.
//! The engine reads through `active_slot`; the switcher writes it. Those two
//! atomics are the only state shared between the real-time context and the
//! supervisor.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::{
    data::DataPreconverter,
    error::Error,
    image::{PreparedImage, RomImage, label_bytes},
};

/// Upper bound on cycled banks.
pub const MAX_BANKS: usize = 16;

/// Which image a selection refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSelector {
    /// One of the cycled banks, by position.
    Bank(usize),
    /// An auxiliary image that is never cycled (e.g. a paged-in Interface 1 ROM).
    Aux(usize),
}

#[derive(Debug)]
struct BankEntry {
    name: String,
    slot: usize,
    announce_slot: Option<usize>,
}

/// Ordered set of preconverted ROM images plus the current selection.
#[derive(Debug)]
pub struct RomBankStore {
    slots: Vec<PreparedImage>,
    banks: Vec<BankEntry>,
    /// Slot of each auxiliary image, by aux index.
    aux_slots: Vec<usize>,
    active_slot: AtomicUsize,
    current_bank: AtomicUsize,
}

impl RomBankStore {
    pub fn builder(conv: &DataPreconverter) -> RomBankStoreBuilder<'_> {
        RomBankStoreBuilder {
            conv,
            banks: Vec::new(),
            aux: Vec::new(),
            announcement: None,
        }
    }

    /// Image the engine serves right now.
    #[inline]
    pub fn active(&self) -> &PreparedImage {
        let slot = self.active_slot.load(Ordering::Acquire);
        &self.slots[slot]
    }

    pub fn active_slot(&self) -> usize {
        self.active_slot.load(Ordering::Acquire)
    }

    pub fn bank_count(&self) -> usize {
        self.banks.len()
    }

    pub fn current_bank(&self) -> usize {
        self.current_bank.load(Ordering::Acquire)
    }

    /// Bank that the next switch lands on.
    pub fn next_bank(&self) -> usize {
        (self.current_bank() + 1) % self.banks.len()
    }

    pub fn bank_name(&self, bank: usize) -> Option<&str> {
        self.banks.get(bank).map(|b| b.name.as_str())
    }

    pub fn has_announcements(&self) -> bool {
        self.banks.iter().all(|b| b.announce_slot.is_some())
    }

    /// Moves to the next bank, wrapping after the last. Returns the new bank.
    ///
    /// Callers must hold the host in reset: the engine may otherwise see the
    /// old and new image within one instruction fetch sequence.
    pub fn advance(&self) -> usize {
        let next = self.next_bank();
        self.select_bank(next);
        next
    }

    /// Selects `bank` and serves it. Out-of-range indices wrap.
    pub fn select_bank(&self, bank: usize) {
        let bank = bank % self.banks.len();
        self.current_bank.store(bank, Ordering::Release);
        self.active_slot
            .store(self.banks[bank].slot, Ordering::Release);
        debug!(bank, name = %self.banks[bank].name, "bank selected");
    }

    /// Serves the announcement image for `bank` without changing the current
    /// bank. Returns `false` when no announcement template was configured.
    pub fn show_announcement(&self, bank: usize) -> bool {
        let Some(slot) = self
            .banks
            .get(bank % self.banks.len())
            .and_then(|b| b.announce_slot)
        else {
            return false;
        };
        self.active_slot.store(slot, Ordering::Release);
        true
    }

    /// Slot index backing `selector`, if it exists.
    pub fn slot_of(&self, selector: ImageSelector) -> Option<usize> {
        match selector {
            ImageSelector::Bank(bank) => self.banks.get(bank).map(|b| b.slot),
            ImageSelector::Aux(aux) => self.aux_slots.get(aux).copied(),
        }
    }

    /// Points the engine at a raw slot. Used by the engine's own address
    /// triggers, which resolve their targets to slots up front.
    #[inline]
    pub(crate) fn activate_slot(&self, slot: usize) {
        self.active_slot.store(slot, Ordering::Release);
    }
}

pub struct RomBankStoreBuilder<'a> {
    conv: &'a DataPreconverter,
    banks: Vec<(String, RomImage)>,
    aux: Vec<(String, RomImage)>,
    announcement: Option<(RomImage, usize)>,
}

impl RomBankStoreBuilder<'_> {
    /// Appends a cycled bank. Banks are cycled in insertion order.
    pub fn bank(mut self, name: impl Into<String>, image: RomImage) -> Self {
        self.banks.push((name.into(), image));
        self
    }

    pub fn aux(mut self, name: impl Into<String>, image: RomImage) -> Self {
        self.aux.push((name.into(), image));
        self
    }

    /// Template shown between presses, with its label field at `label_offset`.
    pub fn announcement(mut self, template: RomImage, label_offset: usize) -> Self {
        self.announcement = Some((template, label_offset));
        self
    }

    /// Preconverts every image, including one labelled announcement per bank,
    /// and selects bank 0.
    pub fn build(self) -> Result<RomBankStore, Error> {
        if self.banks.is_empty() {
            return Err(Error::NoBanks);
        }
        if self.banks.len() > MAX_BANKS {
            return Err(Error::TooManyBanks {
                count: self.banks.len(),
                max: MAX_BANKS,
            });
        }

        let announce_count = if self.announcement.is_some() {
            self.banks.len()
        } else {
            0
        };
        let mut slots = Vec::with_capacity(self.banks.len() * 2 + self.aux.len());
        let mut banks = Vec::with_capacity(self.banks.len());

        for (name, image) in self.banks {
            let label = label_bytes(&name);
            let announce_slot = match &self.announcement {
                Some((template, offset)) => {
                    let labelled = template.with_label(*offset, &label)?;
                    slots.push(labelled.preconvert(self.conv));
                    Some(slots.len() - 1)
                }
                None => None,
            };
            slots.push(image.preconvert(self.conv));
            banks.push(BankEntry {
                name,
                slot: slots.len() - 1,
                announce_slot,
            });
        }

        let mut aux_slots = Vec::with_capacity(self.aux.len());
        for (name, image) in self.aux {
            slots.push(image.preconvert(self.conv));
            debug!(%name, index = aux_slots.len(), "aux image stored");
            aux_slots.push(slots.len() - 1);
        }

        debug!(
            banks = banks.len(),
            announcements = announce_count,
            aux = aux_slots.len(),
            "ROM bank store built"
        );

        let first = banks[0].slot;
        Ok(RomBankStore {
            slots,
            banks,
            aux_slots,
            active_slot: AtomicUsize::new(first),
            current_bank: AtomicUsize::new(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
    };

    use proptest::prelude::*;

    use super::*;
    use crate::{
        address::LogicalAddress,
        image::{DEFAULT_LABEL_OFFSET, ROM_SIZE},
        lines::LineMap,
    };

    fn conv() -> DataPreconverter {
        DataPreconverter::new(&LineMap::ZX_PICO).expect("valid wiring")
    }

    fn store_with(count: usize) -> RomBankStore {
        let conv = conv();
        let mut builder = RomBankStore::builder(&conv);
        for bank in 0..count {
            builder = builder.bank(format!("rom{bank}"), RomImage::filled(bank as u8));
        }
        builder.build().expect("valid bank set")
    }

    #[test]
    fn empty_store_is_rejected() {
        let conv = conv();
        assert!(matches!(
            RomBankStore::builder(&conv).build(),
            Err(Error::NoBanks)
        ));
    }

    #[test]
    fn too_many_banks_are_rejected() {
        let conv = conv();
        let mut builder = RomBankStore::builder(&conv);
        for bank in 0..=MAX_BANKS {
            builder = builder.bank(format!("rom{bank}"), RomImage::filled(0));
        }
        assert!(matches!(
            builder.build(),
            Err(Error::TooManyBanks { count, .. }) if count == MAX_BANKS + 1
        ));
    }

    #[test]
    fn starts_on_bank_zero() {
        let store = store_with(3);
        assert_eq!(store.current_bank(), 0);
        assert_eq!(store.active().byte(LogicalAddress::from_masked(0)), 0);
        assert_eq!(store.bank_name(0), Some("rom0"));
    }

    #[test]
    fn n_advances_return_to_bank_zero() {
        for count in 1..=8 {
            let store = store_with(count);
            for step in 1..=count {
                let bank = store.advance();
                assert_eq!(bank, step % count);
                assert_eq!(store.current_bank(), step % count);
            }
            assert_eq!(store.current_bank(), 0);
        }
    }

    #[test]
    fn active_image_follows_selection() {
        let conv = conv();
        let store = store_with(4);
        store.select_bank(2);
        assert_eq!(
            store.active().byte(LogicalAddress::from_masked(0x100)),
            conv.preconvert(2)
        );
        store.select_bank(6);
        assert_eq!(store.current_bank(), 2);
    }

    #[test]
    fn announcement_carries_the_bank_label() {
        let conv = conv();
        let store = RomBankStore::builder(&conv)
            .bank("48K BASIC", RomImage::filled(0x11))
            .bank("Jet Set Willy", RomImage::filled(0x22))
            .announcement(RomImage::filled(0), DEFAULT_LABEL_OFFSET)
            .build()
            .expect("valid bank set");

        assert!(store.has_announcements());
        assert!(store.show_announcement(1));
        // Showing an announcement leaves the bank index alone.
        assert_eq!(store.current_bank(), 0);

        let served: Vec<u8> = (DEFAULT_LABEL_OFFSET..DEFAULT_LABEL_OFFSET + 13)
            .map(|addr| store.active().byte(LogicalAddress::from_masked(addr as u16)))
            .map(|wire| conv.restore(wire))
            .collect();
        assert_eq!(served, b"Jet Set Willy");
    }

    #[test]
    fn announcement_without_template_is_refused() {
        let store = store_with(2);
        assert!(!store.has_announcements());
        assert!(!store.show_announcement(1));
        assert_eq!(store.active_slot(), store.slot_of(ImageSelector::Bank(0)).unwrap());
    }

    #[test]
    fn aux_images_are_addressable() {
        let conv = conv();
        let store = RomBankStore::builder(&conv)
            .bank("48", RomImage::filled(0x48))
            .aux("if1", RomImage::filled(0x01))
            .build()
            .expect("valid bank set");

        let slot = store.slot_of(ImageSelector::Aux(0)).expect("aux slot");
        store.activate_slot(slot);
        assert_eq!(store.active().as_bytes()[ROM_SIZE - 1], conv.preconvert(0x01));
        assert!(store.slot_of(ImageSelector::Aux(1)).is_none());
    }

    /// While one thread keeps switching banks, every image the reader
    /// observes must be one of the configured images in full.
    #[test]
    fn reader_never_sees_a_torn_selection() {
        let store = Arc::new(store_with(4));
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let store = Arc::clone(&store);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    store.advance();
                }
            })
        };

        let conv = conv();
        let valid: Vec<u8> = (0..4).map(|b| conv.preconvert(b)).collect();
        for i in 0..20_000u16 {
            let image = store.active();
            let first = image.byte(LogicalAddress::from_masked(0));
            let last = image.byte(LogicalAddress::from_masked(i | 0x3F00));
            assert!(valid.contains(&first));
            assert_eq!(first, last);
            assert!(store.current_bank() < 4);
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().expect("writer thread");
    }

    proptest! {
        #[test]
        fn each_advance_moves_exactly_one_bank(count in 1usize..=MAX_BANKS, start in 0usize..64) {
            let store = store_with(count);
            store.select_bank(start);
            let before = store.current_bank();
            let after = store.advance();
            prop_assert_eq!(after, (before + 1) % count);
        }
    }
}
