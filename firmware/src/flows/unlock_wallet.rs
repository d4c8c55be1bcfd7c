//! Unlock a locked wallet.
//!
//! The card that locked the wallet gates unlocking behind a proof-of-work
//! challenge plus the PIN. The challenge is cached in the header so a
//! reboot mid-grind doesn't need another tap; the grind itself polls the
//! event bus between batches so a P0 abandons the partial work.

use tracing::{info, warn};
use vault_card::{apdu::CardChallenge, ops::CardOpConfig};
use vault_common::{
    error::CoreError,
    ui::Screen,
    wallet::UnlockChallenge,
    ExposeSecret,
};
use vault_crypto::{
    kdf,
    pow::{PowChallenge, PowSolver},
};

use crate::context::DeviceCtx;

/// Hashes tried between event-bus polls.
const POW_BATCH: u32 = 4096;

pub async fn run(ctx: &mut DeviceCtx, index: usize) -> Result<(), CoreError> {
    loop {
        let header = ctx
            .store
            .wallet(index)
            .ok_or(CoreError::WalletNotFound)?
            .clone();
        if !header.is_locked {
            return Ok(());
        }
        let locked_by = header.locked_by.ok_or(CoreError::WalletInvariant)?;

        // Step 1: a cached challenge, or a tap on the locking card.
        let challenge = match header.challenge {
            Some(challenge) => challenge,
            None => {
                let mut cfg = CardOpConfig::one_card(locked_by);
                cfg.heading =
                    format!("Tap card {locked_by} to fetch the challenge");
                let (_, fetched) = {
                    let mut ops = ctx.card_ops();
                    ops.fetch_challenge(cfg, header.id).await?
                };
                match fetched {
                    Some(CardChallenge {
                        target,
                        card_nonce,
                        time_to_unlock_secs,
                    }) => {
                        let challenge = UnlockChallenge {
                            target,
                            card_nonce,
                            time_to_unlock_secs,
                        };
                        ctx.store.set_challenge(index, Some(challenge))?;
                        challenge
                    }
                    None => {
                        // The card no longer considers it locked.
                        info!(wallet = %header.id, "already unlocked on card");
                        ctx.store.set_locked(index, None)?;
                        ctx.menu_refresh = true;
                        ctx.show_message("Wallet is already unlocked");
                        return Ok(());
                    }
                }
            }
        };

        // Step 2: grind out the nonce.
        let solution = solve(ctx, &challenge).await?;

        // Step 3: the PIN.
        let pin_double = if header.info.pin_set() {
            let Some(pin) = ctx.input_pin("Enter PIN").await? else {
                return Err(CoreError::UserRejection);
            };
            Some(*kdf::hash_pin(pin.expose()).double.expose_secret())
        } else {
            None
        };

        // Step 4: present both to the card.
        let mut cfg = CardOpConfig::one_card(locked_by);
        cfg.heading = format!("Tap card {locked_by} to unlock");
        let result = {
            let mut ops = ctx.card_ops();
            ops.unlock_wallet(cfg, header.id, pin_double, solution).await
        };

        match result {
            Ok(_) => {
                ctx.store.set_locked(index, None)?;
                ctx.menu_refresh = true;
                info!(wallet = %header.id, "wallet unlocked");
                ctx.show_message(format!(
                    "Wallet {} unlocked",
                    header.name
                ));
                return Ok(());
            }
            Err(CoreError::CardLockedWallet) => {
                // Step 5: the card burned this challenge (one unlock
                // attempt consumed); fetch a fresh one and go again.
                warn!(wallet = %header.id, "still locked, refetching");
                ctx.store.set_challenge(index, None)?;
                if !ctx
                    .confirm("Still locked. Continue trying to unlock?")
                    .await?
                {
                    return Err(CoreError::UserRejection);
                }
            }
            Err(CoreError::CardWrongPin { attempts_left }) => {
                // The solved challenge stays valid; only the PIN was
                // wrong.
                ctx.show_message(format!(
                    "Incorrect PIN, attempts left: {attempts_left}"
                ));
            }
            Err(err) => return Err(err),
        }
    }
}

/// Run the solver to completion, yielding between batches so a P0 can
/// interrupt. The slideshow shows the card's time estimate.
async fn solve(
    ctx: &mut DeviceCtx,
    challenge: &UnlockChallenge,
) -> Result<[u8; 16], CoreError> {
    ctx.render(Screen::Slideshow {
        slides: vec![
            format!(
                "Unlocking takes about {} seconds",
                challenge.time_to_unlock_secs
            ),
            "Do not disconnect the device".to_owned(),
        ],
    });

    let mut solver = PowSolver::new(PowChallenge {
        card_nonce: challenge.card_nonce,
        target: challenge.target,
    })
    .map_err(|_| CoreError::WalletInvariant)?;

    loop {
        if let Some(solution) = solver.run_batch(POW_BATCH) {
            info!(attempts = solver.attempts(), "proof-of-work solved");
            return Ok(solution);
        }
        if ctx.bus.abort_pending() {
            warn!("proof-of-work aborted");
            return Err(CoreError::P0Abort);
        }
        tokio::task::yield_now().await;
    }
}
