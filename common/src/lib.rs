//! Types shared between the skimmer and the validator: detector and channel
//! identifiers, gain parity, and the data-cleaning bitmask wrappers.

use serde::{Deserialize, Serialize};

pub type RunNumber = u32;
pub type DataSetId = u8;
pub type Channel = u32;
pub type DetectorId = i32;

/// Composite card identity: `100 * crate + slot`, distinguishing the same
/// slot number across modules.
pub type CardId = i32;

pub const NS_PER_S: f64 = 1e9;

pub fn card_id(crate_number: i32, slot: i32) -> CardId {
    crate_number * 100 + slot
}

/// Cryostat module housing a subset of detectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Module {
    M1,
    M2,
}

impl TryFrom<u8> for Module {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Module::M1),
            2 => Ok(Module::M2),
            other => Err(format!("invalid module number: {other}")),
        }
    }
}

impl From<Module> for u8 {
    fn from(module: Module) -> u8 {
        match module {
            Module::M1 => 1,
            Module::M2 => 2,
        }
    }
}

/// Amplification level of a data channel. Paired channels read the same
/// physical detector: even ids at high gain, odd ids at low gain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gain {
    High,
    Low,
}

impl Gain {
    pub fn of_channel(channel: Channel) -> Self {
        if channel % 2 == 0 {
            Gain::High
        } else {
            Gain::Low
        }
    }
}

/// The paired channel at the other gain.
pub fn partner_channel(channel: Channel) -> Channel {
    match Gain::of_channel(channel) {
        Gain::High => channel + 1,
        Gain::Low => channel - 1,
    }
}

/// Per-waveform data-cleaning bitmask with named accessors for the bits the
/// skim inspects or repairs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WfCleaningBits(pub u32);

impl WfCleaningBits {
    const MULTISAMPLING: u32 = 1 << 4;
    const LATE_TRIGGER: u32 = 1 << 5;
    const SATURATED: u32 = 1 << 6;
    const NEGATIVE_SATURATED: u32 = 1 << 7;
    const PILEUP: u32 = 1 << 8;

    pub fn is_late_trigger(self) -> bool {
        self.0 & Self::LATE_TRIGGER != 0
    }

    pub fn is_saturated(self) -> bool {
        self.0 & Self::SATURATED != 0
    }

    pub fn is_negative_saturated(self) -> bool {
        self.0 & Self::NEGATIVE_SATURATED != 0
    }

    pub fn is_pileup(self) -> bool {
        self.0 & Self::PILEUP != 0
    }

    pub fn clear_pileup(&mut self) {
        self.0 &= !Self::PILEUP;
    }

    pub fn set_negative_saturated(&mut self, value: bool) {
        if value {
            self.0 |= Self::NEGATIVE_SATURATED;
        } else {
            self.0 &= !Self::NEGATIVE_SATURATED;
        }
    }

    /// True when no bit outside the multisampling bit (4) is set. Used for
    /// the "clean" multiplicity and energy-sum variants.
    pub fn is_clean(self) -> bool {
        self.0 & !Self::MULTISAMPLING == 0
    }
}

/// Event-level data-cleaning flag bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventCleaningBits(pub u32);

impl EventCleaningBits {
    /// Pulser events as identified upstream (bit 1). The separate pulser-tag
    /// channel bit misses too many pulsers to be useful.
    const PULSER: u32 = 1 << 1;

    pub fn is_pulser(self) -> bool {
        self.0 & Self::PULSER != 0
    }
}
