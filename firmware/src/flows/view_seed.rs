//! Show the seed phrase on screen, gated by PIN verification.
//!
//! The seed is rebuilt from the device share plus one card share and
//! rendered word by word; all buffers wipe as soon as the flow leaves.

use tracing::info;
use vault_card::flows as card_flows;
use vault_common::{
    constants::DEVICE_SHARE_X, error::CoreError, ui::Screen, ExposeSecret,
};
use vault_crypto::{envelope::EnvelopeKey, kdf, mnemonic::MnemonicPhrase, shamir};

use crate::context::DeviceCtx;

pub async fn run(ctx: &mut DeviceCtx, index: usize) -> Result<(), CoreError> {
    let header = ctx
        .store
        .wallet(index)
        .ok_or(CoreError::WalletNotFound)?
        .clone();
    let device_share = ctx
        .store
        .device_share(index)
        .ok_or(CoreError::WalletInvariant)?
        .clone();

    if !ctx
        .confirm("View the seed phrase? Make sure nobody is watching")
        .await?
    {
        return Ok(());
    }

    loop {
        let (key, pin_double) = if header.info.pin_set() {
            let Some(pin) = ctx.input_pin("Enter PIN").await? else {
                return Err(CoreError::UserRejection);
            };
            let hashes = kdf::hash_pin(pin.expose());
            (
                EnvelopeKey::from_pin(&hashes.single),
                Some(*hashes.double.expose_secret()),
            )
        } else {
            (EnvelopeKey::unprotected(), None)
        };

        let fetch = {
            let mut ops = ctx.card_ops();
            let result = card_flows::reconstruct_shares(
                &mut ops,
                header.id,
                pin_double,
                1,
            )
            .await;
            (result, ops.last_tapped)
        };

        let (card, card_share) = match fetch {
            (Ok(mut shares), _) => shares.pop().expect("threshold 1"),
            (Err(CoreError::CardWrongPin { attempts_left }), _) => {
                ctx.show_message(format!(
                    "Incorrect PIN, attempts left: {attempts_left}"
                ));
                continue;
            }
            (Err(err @ CoreError::CardPinExhausted), tapped) => {
                ctx.store.set_locked(index, tapped)?;
                ctx.menu_refresh = true;
                ctx.show_message(
                    "No attempts left. The wallet is now locked",
                );
                return Err(err);
            }
            (Err(err), _) => return Err(err),
        };

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

        let words = mnemonic
            .words()
            .enumerate()
            .map(|(i, word)| format!("{}. {word}", i + 1))
            .collect();
        ctx.render(Screen::List {
            heading: format!("Seed for {}", header.name),
            items: words,
        });
        // Hold the words on screen until the user confirms they're done.
        let _ = ctx.confirm("Done viewing? The words will be cleared").await;
        info!(wallet = %header.id, "seed viewed");
        return Ok(());
    }
}
