//! End-to-end wallet flows.
//!
//! Each flow is an explicit state machine driven to a terminal state by a
//! single loop; the only suspension points are the context's UI helpers
//! and the card layer, both of which sit on `get_events`. Secret material
//! lives in scratch values that wipe on drop, so every exit path (success,
//! error, timeout, P0) clears it without ceremony.

/// Create-new-wallet and restore-from-seed.
pub mod create_wallet;
/// Delete a wallet from all cards and the device.
pub mod delete_wallet;
/// Regenerate missing headers and device shares from the cards.
pub mod sync_wallets;
/// Unlock a PIN-locked wallet via proof-of-work.
pub mod unlock_wallet;
/// PIN verification via threshold reconstruction.
pub mod verify_pin;
/// Verify an unverified wallet's shares.
pub mod verify_wallet;
/// Display the seed phrase, PIN-gated.
pub mod view_seed;

use vault_common::error::CoreError;

use crate::context::DeviceCtx;

/// The uniform tail every menu uses to finish a flow: fatal errors show
/// the error screen and notify the host; everything else (rejection,
/// recoverable failures already reported) returns to the menu quietly.
pub fn conclude(ctx: &mut DeviceCtx, result: Result<(), CoreError>) {
    match result {
        Ok(()) => {}
        Err(CoreError::UserRejection) => {}
        Err(err) => {
            ctx.report_error(&err);
        }
    }
}
