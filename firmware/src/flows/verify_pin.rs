//! PIN verification by threshold reconstruction.
//!
//! Transaction flows gate seed access on this: the user enters the PIN,
//! one card is tapped, and the device share plus that card's share must
//! reconstruct a secret whose wallet id matches the header. On success the
//! verified PIN is handed back to the caller; every secret buffer is gone
//! by then.

use tracing::{info, warn};
use vault_card::flows as card_flows;
use vault_common::{
    constants::DEVICE_SHARE_X, error::CoreError, secret::SecretString,
    ExposeSecret,
};
use vault_crypto::{
    envelope::EnvelopeKey, kdf, mnemonic::MnemonicPhrase, shamir,
};

use crate::context::DeviceCtx;

/// Verify the PIN for the wallet at `index`. Returns the PIN on success;
/// `UserRejection` when the user backs out, `CardPinExhausted` once the
/// card locks the wallet (the header lock is recorded before returning).
pub async fn run(
    ctx: &mut DeviceCtx,
    index: usize,
) -> Result<SecretString, CoreError> {
    let header = ctx
        .store
        .wallet(index)
        .ok_or(CoreError::WalletNotFound)?
        .clone();
    if !header.info.pin_set() {
        return Err(CoreError::WalletInvariant);
    }
    if header.is_locked {
        return Err(CoreError::CardLockedWallet);
    }
    let device_share = ctx
        .store
        .device_share(index)
        .ok_or(CoreError::WalletInvariant)?
        .clone();

    loop {
        let Some(pin) = ctx.input_pin("Enter PIN").await? else {
            return Err(CoreError::UserRejection);
        };
        let hashes = kdf::hash_pin(pin.expose());
        let pin_double = *hashes.double.expose_secret();

        // One card plus the device share meets the threshold.
        let fetch = {
            let mut ops = ctx.card_ops();
            let result = card_flows::reconstruct_shares(
                &mut ops,
                header.id,
                Some(pin_double),
                1,
            )
            .await;
            (result, ops.last_tapped)
        };

        let (card, card_share) = match fetch {
            (Ok(mut shares), _) => shares.pop().expect("threshold 1"),
            (Err(CoreError::CardWrongPin { attempts_left }), _) => {
                warn!(attempts_left, "wrong PIN");
                ctx.show_message(format!(
                    "Incorrect PIN, attempts left: {attempts_left}"
                ));
                continue;
            }
            (Err(err @ CoreError::CardPinExhausted), tapped) => {
                // The card just locked the wallet; mirror that in flash.
                warn!(wallet = %header.id, "PIN attempts exhausted");
                ctx.store.set_locked(index, tapped)?;
                ctx.menu_refresh = true;
                ctx.show_message(
                    "No attempts left. The wallet is now locked",
                );
                return Err(err);
            }
            (Err(err), _) => return Err(err),
        };

        // The card accepted the PIN; the shares must now prove it end to
        // end.
        let key = EnvelopeKey::from_pin(&hashes.single);
        let opened_card = key
            .open(&card_share)
            .map_err(|_| CoreError::ShareCorrupt)?;
        let opened_device = key
            .open(&device_share)
            .map_err(|_| CoreError::ShareCorrupt)?;

        let secret = shamir::reconstruct(&[
            shamir::Share::new(card.x_coord(), opened_card),
            shamir::Share::new(DEVICE_SHARE_X, opened_device),
        ])
        .map_err(|_| CoreError::WalletInvariant)?;

        let mnemonic =
            MnemonicPhrase::from_master_secret(&secret, header.word_count)
                .map_err(|_| CoreError::ShareCorrupt)?;
        if kdf::wallet_id(&mnemonic) != header.id {
            return Err(CoreError::ShareCorrupt);
        }

        info!(wallet = %header.id, "PIN verified");
        return Ok(pin);
    }
}
