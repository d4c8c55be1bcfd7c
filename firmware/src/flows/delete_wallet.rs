//! Delete a wallet: its share leaves every card, then the device share
//! and header leave flash. Partial and invalid wallets delete too; cards
//! that never got the share are tolerated.

use tracing::{info, warn};
use vault_card::flows as card_flows;
use vault_common::{error::CoreError, ExposeSecret};
use vault_crypto::kdf;

use crate::context::DeviceCtx;

pub async fn run(ctx: &mut DeviceCtx, index: usize) -> Result<(), CoreError> {
    let header = ctx
        .store
        .wallet(index)
        .ok_or(CoreError::WalletNotFound)?
        .clone();

    if !ctx
        .confirm(format!(
            "Delete wallet {}? This cannot be undone",
            header.name
        ))
        .await?
    {
        return Ok(());
    }

    loop {
        let pin_double = if header.info.pin_set() {
            let Some(pin) = ctx.input_pin("Enter PIN").await? else {
                return Err(CoreError::UserRejection);
            };
            Some(*kdf::hash_pin(pin.expose()).double.expose_secret())
        } else {
            None
        };

        let result = {
            let mut ops = ctx.card_ops();
            let result = card_flows::delete_wallet_shares(
                &mut ops,
                header.id,
                pin_double,
            )
            .await;
            (result, ops.last_tapped)
        };

        match result {
            (Ok(()), _) => break,
            (Err(CoreError::CardWrongPin { attempts_left }), _) => {
                ctx.show_message(format!(
                    "Incorrect PIN, attempts left: {attempts_left}"
                ));
            }
            (Err(err @ CoreError::CardPinExhausted), tapped) => {
                warn!(wallet = %header.id, "PIN exhausted during delete");
                ctx.store.set_locked(index, tapped)?;
                ctx.menu_refresh = true;
                return Err(err);
            }
            (Err(err), _) => return Err(err),
        }
    }

    ctx.store.remove_wallet(index)?;
    ctx.menu_refresh = true;
    info!(wallet = %header.id, "wallet deleted");
    ctx.show_message(format!("Wallet {} deleted", header.name));
    Ok(())
}
