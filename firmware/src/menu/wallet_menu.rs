//! The per-wallet menu. What it offers depends entirely on the header:
//! locked wallets can only be unlocked, partial wallets only deleted,
//! unverified ones verified, share-less ones synced, and healthy ones get
//! the full submenu.

use async_trait::async_trait;
use tracing::warn;
use vault_common::{
    card::CardMask,
    error::CoreError,
    ui::Screen,
    wallet::WalletState,
};
use vault_engine::{
    Event, EventClass, EventConfig, Step, StepOutcome, UiEvent,
};

use crate::{
    context::DeviceCtx,
    flows::{
        self, delete_wallet, sync_wallets, unlock_wallet, verify_wallet,
        view_seed,
    },
};

/// What the menu decided to offer when it was entered.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Offer {
    Unlock,
    DeletePartial,
    Verify,
    Sync,
    DeleteInvalid,
    /// view seed / delete submenu for a fully valid wallet.
    Submenu,
    /// The wallet disappeared (deleted behind our back); just leave.
    Gone,
}

pub struct WalletMenu {
    index: usize,
    offer: Offer,
}

impl WalletMenu {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            offer: Offer::Gone,
        }
    }

    fn decide(&mut self, ctx: &mut DeviceCtx) {
        let Some(header) = ctx.store.wallet(self.index) else {
            self.offer = Offer::Gone;
            return;
        };
        self.offer = if header.is_locked {
            Offer::Unlock
        } else if header.cards_states != CardMask::ALL {
            Offer::DeletePartial
        } else {
            match header.state {
                WalletState::Valid => Offer::Submenu,
                WalletState::UnverifiedValid => Offer::Verify,
                WalletState::ValidWithoutDeviceShare => Offer::Sync,
                WalletState::Invalid => Offer::DeleteInvalid,
            }
        };
    }

    fn render(&self, ctx: &mut DeviceCtx) {
        let Some(header) = ctx.store.wallet(self.index) else {
            return;
        };
        let name = header.name.to_string();
        let screen = match self.offer {
            Offer::Unlock => Screen::Confirm {
                prompt: format!("{name} is locked. Continue to unlock?"),
            },
            Offer::DeletePartial => Screen::Confirm {
                prompt: format!(
                    "{name} is only on some cards. Continue to delete?"
                ),
            },
            Offer::Verify => Screen::Confirm {
                prompt: format!("{name} is unverified. Verify now?"),
            },
            Offer::Sync => Screen::Confirm {
                prompt: format!(
                    "{name} has no share on this device. Sync now?"
                ),
            },
            Offer::DeleteInvalid => Screen::Confirm {
                prompt: format!("{name} is invalid. Continue to delete?"),
            },
            Offer::Submenu => Screen::List {
                heading: name,
                items: vec!["View seed".to_owned(), "Delete".to_owned()],
            },
            Offer::Gone => return,
        };
        ctx.render(screen);
    }

    async fn dispatch(
        &self,
        ctx: &mut DeviceCtx,
    ) -> Result<(), CoreError> {
        match self.offer {
            Offer::Unlock => unlock_wallet::run(ctx, self.index).await,
            Offer::DeletePartial | Offer::DeleteInvalid =>
                delete_wallet::run(ctx, self.index).await,
            Offer::Verify => verify_wallet::run(ctx, self.index).await,
            Offer::Sync => sync_wallets::run(ctx).await,
            Offer::Submenu | Offer::Gone => Ok(()),
        }
    }
}

#[async_trait(?Send)]
impl Step<DeviceCtx> for WalletMenu {
    fn config(&self) -> EventConfig {
        EventConfig::new(EventClass::UI)
    }

    async fn on_enter(&mut self, ctx: &mut DeviceCtx) {
        self.decide(ctx);
        self.render(ctx);
    }

    async fn on_event(
        &mut self,
        ctx: &mut DeviceCtx,
        event: Event,
    ) -> StepOutcome<DeviceCtx> {
        if self.offer == Offer::Gone {
            return StepOutcome::Pop;
        }

        match event {
            Event::Ui(UiEvent::Confirm) if self.offer != Offer::Submenu => {
                let result = self.dispatch(ctx).await;
                flows::conclude(ctx, result);
                StepOutcome::Pop
            }
            Event::Ui(UiEvent::ListChoice(choice))
                if self.offer == Offer::Submenu =>
            {
                let result = match choice {
                    0 => view_seed::run(ctx, self.index).await,
                    1 => delete_wallet::run(ctx, self.index).await,
                    _ => Ok(()),
                };
                flows::conclude(ctx, result);
                StepOutcome::Pop
            }
            Event::Ui(UiEvent::Reject) => StepOutcome::Pop,
            Event::P0(p0) => {
                warn!(?p0, "p0 in wallet menu, returning to main menu");
                StepOutcome::Pop
            }
            _ => StepOutcome::Stay,
        }
    }
}
