//! The main menu: installed wallets, then "create wallet" while a slot is
//! free, then settings.

use async_trait::async_trait;
use tracing::debug;
use vault_common::{
    constants::MAX_WALLETS,
    status::DeviceIdleState,
    ui::Screen,
};
use vault_engine::{
    Event, EventClass, EventConfig, Step, StepOutcome, UiEvent,
};

use crate::{
    context::DeviceCtx,
    flows::{self, create_wallet},
    host,
    menu::{SettingsMenu, WalletMenu},
};

#[derive(Clone, Debug, Eq, PartialEq)]
enum Item {
    Wallet(usize),
    CreateWallet,
    Settings,
}

pub struct MainMenu {
    items: Vec<Item>,
}

impl MainMenu {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    fn rebuild(&mut self, ctx: &mut DeviceCtx) {
        self.items.clear();
        let mut labels = Vec::new();

        for (index, header) in ctx.store.list() {
            self.items.push(Item::Wallet(index));
            labels.push(header.name.as_str().to_owned());
        }
        if ctx.store.wallet_count() < MAX_WALLETS {
            self.items.push(Item::CreateWallet);
            labels.push("Create wallet".to_owned());
        }
        self.items.push(Item::Settings);
        labels.push("Settings".to_owned());

        ctx.menu_refresh = false;
        ctx.status.reset_flow();
        ctx.status.set_idle_state(DeviceIdleState::Idle);
        ctx.render(Screen::List {
            heading: "Main menu".to_owned(),
            items: labels,
        });
    }
}

impl Default for MainMenu {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Step<DeviceCtx> for MainMenu {
    fn config(&self) -> EventConfig {
        EventConfig::new(EventClass::UI | EventClass::USB)
    }

    async fn on_enter(&mut self, ctx: &mut DeviceCtx) {
        self.rebuild(ctx);
    }

    async fn on_event(
        &mut self,
        ctx: &mut DeviceCtx,
        event: Event,
    ) -> StepOutcome<DeviceCtx> {
        if ctx.menu_refresh {
            self.rebuild(ctx);
        }

        match event {
            Event::Ui(UiEvent::ListChoice(i)) => {
                match self.items.get(usize::from(i)) {
                    Some(Item::Wallet(index)) =>
                        return StepOutcome::Push(Box::new(WalletMenu::new(
                            *index,
                        ))),
                    Some(Item::CreateWallet) => {
                        let result = create_wallet::create(ctx).await;
                        flows::conclude(ctx, result);
                        self.rebuild(ctx);
                    }
                    Some(Item::Settings) =>
                        return StepOutcome::Push(Box::new(
                            SettingsMenu::new(),
                        )),
                    None => {}
                }
            }
            Event::Usb(usb) => host::handle_usb(ctx, usb),
            Event::P0(p0) => {
                // The main menu is the idle state; a timeout or abort here
                // has nothing to unwind.
                debug!(?p0, "p0 at main menu ignored");
                self.rebuild(ctx);
            }
            _ => {}
        }
        StepOutcome::Stay
    }
}
