//! Sync wallets from the cards.
//!
//! One tap fetches the card's wallet list; headers missing from flash are
//! inserted as `ValidWithoutDeviceShare`. For each such wallet (locked
//! ones are skipped with a notice) a threshold-2 reconstruct regenerates
//! the device share and promotes the header to `Valid`.

use tracing::{info, warn};
use vault_card::{apdu::WalletListEntry, flows as card_flows, ops::CardOpConfig};
use vault_common::{
    card::CardMask,
    constants::{DEVICE_SHARE_X, RECONSTRUCT_THRESHOLD},
    error::CoreError,
    wallet::{WalletHeader, WalletState},
    ExposeSecret,
};
use vault_crypto::{
    envelope::{self, EnvelopeKey},
    kdf, shamir,
};

use crate::context::DeviceCtx;

pub async fn run(ctx: &mut DeviceCtx) -> Result<(), CoreError> {
    if !ctx
        .confirm("Sync wallets from the cards? Tap any card to begin")
        .await?
    {
        return Ok(());
    }

    let (_, list) = {
        let mut ops = ctx.card_ops();
        ops.fetch_wallet_list(CardOpConfig::any_card("Tap any card"))
            .await?
    };

    let mut to_sync = Vec::new();
    for entry in &list {
        if ctx.store.get_by_id(&entry.id).is_some() {
            continue;
        }
        let header = WalletHeader {
            id: entry.id,
            name: entry.name.clone(),
            info: entry.info,
            word_count: entry.word_count,
            state: WalletState::ValidWithoutDeviceShare,
            cards_states: CardMask::ALL,
            is_locked: false,
            locked_by: None,
            challenge: None,
        };
        match ctx.store.add_wallet(header, None) {
            Ok(index) => to_sync.push((index, entry.clone())),
            Err(err @ CoreError::FlashFull) => {
                warn!(%err, "no slot left while syncing");
                ctx.show_message("No free wallet slot, sync incomplete");
                break;
            }
            Err(err) => return Err(err),
        }
    }
    ctx.menu_refresh = true;

    if to_sync.is_empty() {
        ctx.show_message("No new wallets found");
        return Ok(());
    }

    for (index, entry) in to_sync {
        if entry.locked {
            // The lock can only be cleared through the unlock flow.
            ctx.show_message(format!(
                "Wallet {} is locked and was skipped",
                entry.name
            ));
            continue;
        }
        if let Err(err) = sync_one(ctx, index, &entry).await {
            match err {
                CoreError::P0Timeout | CoreError::P0Abort => return Err(err),
                err => {
                    warn!(%err, wallet = %entry.id, "sync failed");
                    ctx.show_message(format!(
                        "Could not sync wallet {}",
                        entry.name
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Reconstruct one wallet's secret from two cards and regenerate the
/// device share.
async fn sync_one(
    ctx: &mut DeviceCtx,
    index: usize,
    entry: &WalletListEntry,
) -> Result<(), CoreError> {
    loop {
        let (key, pin_double) = if entry.info.pin_set() {
            let Some(pin) = ctx
                .input_pin(&format!("Enter PIN for {}", entry.name))
                .await?
            else {
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

        let fetched = {
            let mut ops = ctx.card_ops();
            card_flows::reconstruct_shares(
                &mut ops,
                entry.id,
                pin_double,
                RECONSTRUCT_THRESHOLD,
            )
            .await
        };
        let sealed = match fetched {
            Ok(sealed) => sealed,
            Err(CoreError::CardWrongPin { attempts_left }) => {
                ctx.show_message(format!(
                    "Incorrect PIN, attempts left: {attempts_left}"
                ));
                continue;
            }
            Err(err) => return Err(err),
        };

        // Shares from different wallets can't mix: their nonce seeds
        // disagree.
        let wallet_nonce = envelope::wallet_nonce_of_share(
            &sealed[0].1.envelope.nonce,
            sealed[0].0.x_coord(),
        );
        for (card, share) in &sealed {
            if envelope::wallet_nonce_of_share(
                &share.envelope.nonce,
                card.x_coord(),
            ) != wallet_nonce
            {
                return Err(CoreError::ShareCorrupt);
            }
        }

        let shares = sealed
            .iter()
            .map(|(card, share)| {
                key.open(share)
                    .map(|data| shamir::Share::new(card.x_coord(), data))
                    .map_err(|_| CoreError::ShareCorrupt)
            })
            .collect::<Result<Vec<_>, _>>()?;
        // The secret itself is only reconstructed to confirm the shares
        // are consistent; it drops right after.
        let _secret = shamir::reconstruct(&shares)
            .map_err(|_| CoreError::WalletInvariant)?;

        // The device share is the original polynomial evaluated at x = 5;
        // splitting afresh would re-randomize the card shares out from
        // under the wallet.
        let device_data = shamir::evaluate_at(&shares, DEVICE_SHARE_X)
            .map_err(|_| CoreError::WalletInvariant)?;
        let device_share = key.seal(
            &envelope::share_nonce(&wallet_nonce, DEVICE_SHARE_X),
            &device_data,
        );

        ctx.store.put_device_share(index, device_share)?;
        ctx.store.set_state(index, WalletState::Valid)?;
        ctx.menu_refresh = true;
        info!(wallet = %entry.id, "device share regenerated");
        ctx.show_message(format!("Wallet {} synced", entry.name));
        return Ok(());
    }
}
