//! Verify an `UnverifiedValid` wallet: read the shares back from every
//! card plus the device and check they all still derive the stored wallet
//! id.

use tracing::{info, warn};
use vault_card::flows as card_flows;
use vault_common::{error::CoreError, wallet::WalletState, ExposeSecret};
use vault_crypto::{envelope::EnvelopeKey, kdf};

use crate::context::DeviceCtx;

pub async fn run(ctx: &mut DeviceCtx, index: usize) -> Result<(), CoreError> {
    let header = ctx
        .store
        .wallet(index)
        .ok_or(CoreError::WalletNotFound)?
        .clone();
    if header.state != WalletState::UnverifiedValid {
        return Err(CoreError::WalletInvariant);
    }
    let device_share = ctx
        .store
        .device_share(index)
        .ok_or(CoreError::WalletInvariant)?
        .clone();

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

        let result = {
            let mut ops = ctx.card_ops();
            let result = card_flows::verify_wallet(
                &mut ops,
                &header,
                &device_share,
                &key,
                pin_double,
            )
            .await;
            (result, ops.last_tapped)
        };

        match result {
            (Ok(true), _) => {
                ctx.store.set_state(index, WalletState::Valid)?;
                ctx.menu_refresh = true;
                info!(wallet = %header.id, "wallet verified");
                ctx.show_message("Wallet verified");
                return Ok(());
            }
            (Ok(false), _) => {
                ctx.store.set_state(index, WalletState::Invalid)?;
                ctx.menu_refresh = true;
                warn!(wallet = %header.id, "wallet failed verification");
                ctx.show_message(
                    "Verification failed. The wallet is unusable and can \
                     only be deleted",
                );
                return Ok(());
            }
            (Err(CoreError::CardWrongPin { attempts_left }), _) => {
                ctx.show_message(format!(
                    "Incorrect PIN, attempts left: {attempts_left}"
                ));
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
        }
    }
}
