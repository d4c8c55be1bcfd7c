//! The serialized region records.
//!
//! Records are encoded with `bcs` (canonical, deterministic) and framed by
//! [`crate::page`]. Fresh flash decodes to the `Default` impls below, which
//! is how a factory-fresh device bootstraps: onboarding byte 0xFF (the
//! "unwritten" sentinel), no settings, no wallets, empty keystore.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use vault_common::{
    card::FamilyId,
    constants::MAX_WALLETS,
    onboarding::UNWRITTEN_SENTINEL,
    secret::PersistedSecret,
    wallet::{SealedShare, WalletHeader},
};

bitflags! {
    /// User-toggleable settings persisted in the normal region.
    #[derive(
        Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize,
    )]
    pub struct Settings: u8 {
        const LOG_EXPORT = 1 << 0;
        const PASSPHRASE = 1 << 1;
        const RAW_CALLDATA = 1 << 2;
        const ROTATED_DISPLAY = 1 << 3;
    }
}

/// The normal-region record.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct NormalRecord {
    /// Raw onboarding byte; 0xFF until first written.
    pub onboarding_step: u8,
    pub settings: Settings,
    pub wallets: [Option<WalletHeader>; MAX_WALLETS],
}

impl Default for NormalRecord {
    fn default() -> Self {
        Self {
            onboarding_step: UNWRITTEN_SENTINEL,
            settings: Settings::empty(),
            wallets: Default::default(),
        }
    }
}

/// One pairing keystore entry.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PairedCard {
    pub family_id: FamilyId,
    pub shared_secret: PersistedSecret,
}

/// The secure-region record.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SecureRecord {
    /// Key protecting traffic to the crypto co-processor; drawn on first
    /// boot.
    pub io_protection_key: Option<PersistedSecret>,
    /// Pairing keystore, slot i ⇔ card i+1.
    pub keystore: [Option<PairedCard>; MAX_WALLETS],
    /// Device-held share blobs, indexed like the wallet slots.
    pub device_shares: [Option<SealedShare>; MAX_WALLETS],
}
