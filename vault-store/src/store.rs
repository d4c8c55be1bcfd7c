//! The store facade over both flash regions.
//!
//! All mutations go through the transactional page writer; a power loss at
//! any point leaves exactly the pre-write or post-write record visible.

use tracing::{info, warn};
use vault_common::{
    card::{CardNumber, FamilyId},
    constants::MAX_WALLETS,
    error::CoreError,
    onboarding::OnboardingStep,
    rng::Crng,
    secret::PersistedSecret,
    wallet::{
        SealedShare, UnlockChallenge, WalletHeader, WalletId, WalletName,
        WalletState,
    },
};

use crate::{
    flash::{FlashBackend, FlashError, Region},
    page::PageStore,
    records::{NormalRecord, PairedCard, SecureRecord, Settings},
};

impl From<FlashError> for CoreError {
    fn from(_: FlashError) -> Self {
        CoreError::FlashIo
    }
}

pub struct WalletStore<F: FlashBackend> {
    flash: F,
    normal_pages: PageStore,
    secure_pages: PageStore,
    normal: NormalRecord,
    secure: SecureRecord,
}

impl<F: FlashBackend> WalletStore<F> {
    pub fn load(flash: F) -> Result<Self, CoreError> {
        let (normal_pages, normal): (_, NormalRecord) =
            PageStore::load(&flash, Region::Normal)?;
        let (secure_pages, secure): (_, SecureRecord) =
            PageStore::load(&flash, Region::Secure)?;

        let store = Self {
            flash,
            normal_pages,
            secure_pages,
            normal,
            secure,
        };

        for (index, header) in store.list() {
            if let Err(err) = header.check_invariants() {
                warn!(index, %err, "installed wallet violates invariants");
            }
        }
        Ok(store)
    }

    fn commit_normal(&mut self) -> Result<(), CoreError> {
        self.normal_pages.save(&mut self.flash, &self.normal)?;
        Ok(())
    }

    fn commit_secure(&mut self) -> Result<(), CoreError> {
        self.secure_pages.save(&mut self.flash, &self.secure)?;
        Ok(())
    }

    // --- Wallet registry --- //

    /// Insert a wallet in the first free slot, together with its device
    /// share blob when the device holds one.
    pub fn add_wallet(
        &mut self,
        header: WalletHeader,
        device_share: Option<SealedShare>,
    ) -> Result<usize, CoreError> {
        if self.get_by_name(&header.name).is_some() {
            return Err(CoreError::FlashDuplicateName);
        }
        if self.get_by_id(&header.id).is_some() {
            return Err(CoreError::FlashDuplicateId);
        }
        let index = self
            .normal
            .wallets
            .iter()
            .position(Option::is_none)
            .ok_or(CoreError::FlashFull)?;

        // Secure region first: a loss in between leaves an orphan share
        // blob, which the next header write overwrites; the reverse order
        // could leave a header whose share is gone.
        if let Some(share) = device_share {
            self.secure.device_shares[index] = Some(share);
            self.commit_secure()?;
        }
        self.normal.wallets[index] = Some(header);
        self.commit_normal()?;
        info!(index, "wallet added");
        Ok(index)
    }

    /// Zero the slot: header and device share both gone.
    pub fn remove_wallet(&mut self, index: usize) -> Result<(), CoreError> {
        if self.wallet(index).is_none() {
            return Err(CoreError::WalletNotFound);
        }
        self.normal.wallets[index] = None;
        self.commit_normal()?;
        if self.secure.device_shares[index].is_some() {
            self.secure.device_shares[index] = None;
            self.commit_secure()?;
        }
        info!(index, "wallet removed");
        Ok(())
    }

    pub fn wallet(&self, index: usize) -> Option<&WalletHeader> {
        self.normal.wallets.get(index)?.as_ref()
    }

    pub fn get_by_id(&self, id: &WalletId) -> Option<(usize, &WalletHeader)> {
        self.list().find(|(_, header)| header.id == *id)
    }

    /// Case-sensitive name lookup.
    pub fn get_by_name(
        &self,
        name: &WalletName,
    ) -> Option<(usize, &WalletHeader)> {
        self.list().find(|(_, header)| header.name == *name)
    }

    pub fn list(&self) -> impl Iterator<Item = (usize, &WalletHeader)> {
        self.normal
            .wallets
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|header| (i, header)))
    }

    pub fn wallet_count(&self) -> usize {
        self.list().count()
    }

    /// Atomic single-slot state update.
    pub fn set_state(
        &mut self,
        index: usize,
        state: WalletState,
    ) -> Result<(), CoreError> {
        let header = self.wallet_mut(index)?;
        header.state = state;
        self.commit_normal()
    }

    /// Atomic lock/unlock update. Locking records the locking card and
    /// drops any stale cached challenge; unlocking clears both.
    pub fn set_locked(
        &mut self,
        index: usize,
        locked_by: Option<CardNumber>,
    ) -> Result<(), CoreError> {
        let header = self.wallet_mut(index)?;
        header.is_locked = locked_by.is_some();
        header.locked_by = locked_by;
        header.challenge = None;
        if header.is_locked && header.state == WalletState::Valid {
            // A Valid wallet can't stay Valid while locked.
            header.state = WalletState::UnverifiedValid;
        } else if !header.is_locked
            && header.state == WalletState::UnverifiedValid
            && header.cards_states == vault_common::card::CardMask::ALL
        {
            // Undo the downgrade once the lock clears.
            header.state = WalletState::Valid;
        }
        self.commit_normal()
    }

    /// Cache (or clear) the unlock challenge fetched from the card.
    pub fn set_challenge(
        &mut self,
        index: usize,
        challenge: Option<UnlockChallenge>,
    ) -> Result<(), CoreError> {
        self.wallet_mut(index)?.challenge = challenge;
        self.commit_normal()
    }

    pub fn set_cards_states(
        &mut self,
        index: usize,
        cards_states: vault_common::card::CardMask,
    ) -> Result<(), CoreError> {
        self.wallet_mut(index)?.cards_states = cards_states;
        self.commit_normal()
    }

    fn wallet_mut(
        &mut self,
        index: usize,
    ) -> Result<&mut WalletHeader, CoreError> {
        self.normal
            .wallets
            .get_mut(index)
            .and_then(Option::as_mut)
            .ok_or(CoreError::WalletNotFound)
    }

    // --- Device shares (secure region) --- //

    pub fn device_share(&self, index: usize) -> Option<&SealedShare> {
        self.secure.device_shares.get(index)?.as_ref()
    }

    pub fn put_device_share(
        &mut self,
        index: usize,
        share: SealedShare,
    ) -> Result<(), CoreError> {
        if index >= MAX_WALLETS {
            return Err(CoreError::WalletNotFound);
        }
        self.secure.device_shares[index] = Some(share);
        self.commit_secure()
    }

    pub fn erase_device_share(
        &mut self,
        index: usize,
    ) -> Result<(), CoreError> {
        if index >= MAX_WALLETS {
            return Err(CoreError::WalletNotFound);
        }
        if self.secure.device_shares[index].take().is_some() {
            self.commit_secure()?;
        }
        Ok(())
    }

    // --- Pairing keystore (secure region) --- //

    pub fn pairing(&self, card: CardNumber) -> Option<&PairedCard> {
        self.secure.keystore[card.index()].as_ref()
    }

    /// Store a pairing. Re-pairing an already-paired card keeps the
    /// existing entry untouched.
    pub fn store_pairing(
        &mut self,
        card: CardNumber,
        entry: PairedCard,
    ) -> Result<(), CoreError> {
        if self.secure.keystore[card.index()].is_some() {
            return Ok(());
        }
        self.secure.keystore[card.index()] = Some(entry);
        self.commit_secure()
    }

    pub fn pairing_count(&self) -> usize {
        self.secure.keystore.iter().flatten().count()
    }

    /// The family id shared by all paired cards, if any card is paired.
    pub fn family_id(&self) -> Option<FamilyId> {
        self.secure
            .keystore
            .iter()
            .flatten()
            .map(|entry| entry.family_id)
            .next()
    }

    /// Key protecting co-processor traffic, drawn lazily on first use.
    pub fn io_protection_key<R: Crng>(
        &mut self,
        rng: &mut R,
    ) -> Result<PersistedSecret, CoreError> {
        if let Some(key) = &self.secure.io_protection_key {
            return Ok(key.clone());
        }
        let key = PersistedSecret::from_rng(rng);
        self.secure.io_protection_key = Some(key.clone());
        self.commit_secure()?;
        Ok(key)
    }

    // --- Onboarding & settings (normal region) --- //

    pub fn onboarding_step(&self) -> OnboardingStep {
        OnboardingStep::from_flash_byte(self.normal.onboarding_step)
            .unwrap_or_else(|err| {
                warn!(%err, "corrupt onboarding byte, treating as virgin");
                OnboardingStep::Virgin
            })
    }

    pub fn set_onboarding_step(
        &mut self,
        step: OnboardingStep,
    ) -> Result<(), CoreError> {
        self.onboarding_step()
            .check_advance(step)
            .map_err(|_| CoreError::WalletInvariant)?;
        self.normal.onboarding_step = step.to_flash_byte();
        self.commit_normal()
    }

    pub fn settings(&self) -> Settings {
        self.normal.settings
    }

    pub fn toggle_setting(
        &mut self,
        setting: Settings,
    ) -> Result<(), CoreError> {
        self.normal.settings.toggle(setting);
        self.commit_normal()
    }

    // --- Maintenance --- //

    /// Erase both regions; the device comes back virgin with an empty
    /// keystore.
    pub fn factory_reset(&mut self) -> Result<(), CoreError> {
        self.normal_pages.wipe(&mut self.flash)?;
        self.secure_pages.wipe(&mut self.flash)?;
        self.normal = NormalRecord::default();
        self.secure = SecureRecord::default();
        info!("factory reset complete");
        Ok(())
    }

    /// Remove all wallets and device shares but keep pairings, settings,
    /// and onboarding progress.
    pub fn clear_device_data(&mut self) -> Result<(), CoreError> {
        self.normal.wallets = Default::default();
        self.secure.device_shares = Default::default();
        self.commit_normal()?;
        self.commit_secure()
    }
}
