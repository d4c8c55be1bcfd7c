//! The settings menu: persisted toggles, card utilities, device info, and
//! the destructive actions behind an explicit confirm.

use async_trait::async_trait;
use tracing::{info, warn};
use vault_card::{flows as card_flows, ops::CardOpConfig};
use vault_common::{
    card::CardMask,
    constants::CARD_COUNT,
    error::CoreError,
    ui::Screen,
};
use vault_engine::{
    Event, EventClass, EventConfig, Step, StepOutcome, UiEvent,
};
use vault_store::records::Settings;

use crate::{context::DeviceCtx, flows, host::FIRMWARE_VERSION};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Item {
    PairCards,
    TogglePassphrase,
    ToggleLogExport,
    ToggleRawCalldata,
    ToggleRotation,
    CardHealthCheck,
    DeviceInfo,
    ClearData,
    FactoryReset,
}

const ITEMS: [Item; 9] = [
    Item::PairCards,
    Item::TogglePassphrase,
    Item::ToggleLogExport,
    Item::ToggleRawCalldata,
    Item::ToggleRotation,
    Item::CardHealthCheck,
    Item::DeviceInfo,
    Item::ClearData,
    Item::FactoryReset,
];

pub struct SettingsMenu;

impl SettingsMenu {
    pub fn new() -> Self {
        Self
    }

    fn render(&self, ctx: &mut DeviceCtx) {
        let settings = ctx.store.settings();
        let on_off = |flag| {
            if settings.contains(flag) {
                "on"
            } else {
                "off"
            }
        };
        let items = ITEMS
            .iter()
            .map(|item| match item {
                Item::PairCards => format!(
                    "Pair cards ({}/{CARD_COUNT})",
                    ctx.store.pairing_count()
                ),
                Item::TogglePassphrase => format!(
                    "Passphrase support: {}",
                    on_off(Settings::PASSPHRASE)
                ),
                Item::ToggleLogExport =>
                    format!("Log export: {}", on_off(Settings::LOG_EXPORT)),
                Item::ToggleRawCalldata => format!(
                    "Raw calldata display: {}",
                    on_off(Settings::RAW_CALLDATA)
                ),
                Item::ToggleRotation => format!(
                    "Rotate display: {}",
                    on_off(Settings::ROTATED_DISPLAY)
                ),
                Item::CardHealthCheck => "Card health check".to_owned(),
                Item::DeviceInfo => "Device info".to_owned(),
                Item::ClearData => "Clear device data".to_owned(),
                Item::FactoryReset => "Factory reset".to_owned(),
            })
            .collect();
        ctx.render(Screen::List {
            heading: "Settings".to_owned(),
            items,
        });
    }

    async fn activate(
        &self,
        ctx: &mut DeviceCtx,
        item: Item,
    ) -> Result<(), CoreError> {
        match item {
            Item::PairCards => {
                let paired = {
                    let mut ops = ctx.card_ops();
                    card_flows::pair_all_cards(&mut ops).await?
                };
                ctx.show_message(format!("Paired {paired} new cards"));
            }
            Item::TogglePassphrase =>
                ctx.store.toggle_setting(Settings::PASSPHRASE)?,
            Item::ToggleLogExport =>
                ctx.store.toggle_setting(Settings::LOG_EXPORT)?,
            Item::ToggleRawCalldata =>
                ctx.store.toggle_setting(Settings::RAW_CALLDATA)?,
            Item::ToggleRotation =>
                ctx.store.toggle_setting(Settings::ROTATED_DISPLAY)?,

            Item::CardHealthCheck => {
                let (card, list) = {
                    let mut ops = ctx.card_ops();
                    ops.health_check(CardOpConfig::any_card(
                        "Tap the card to check",
                    ))
                    .await?
                };
                ctx.show_message(format!(
                    "Card {card} is healthy, {} wallets on it",
                    list.len()
                ));
            }

            Item::DeviceInfo => {
                ctx.show_message(format!(
                    "Firmware {FIRMWARE_VERSION}, {} wallets installed",
                    ctx.store.wallet_count()
                ));
            }

            Item::ClearData => {
                if ctx
                    .confirm(
                        "Remove all wallets from this device? Cards are \
                         not touched",
                    )
                    .await?
                {
                    ctx.store.clear_device_data()?;
                    ctx.menu_refresh = true;
                    info!("device data cleared");
                    ctx.show_message("Device data cleared");
                }
            }

            Item::FactoryReset => {
                self.factory_reset(ctx).await?;
            }
        }
        Ok(())
    }

    /// Factory reset erases both flash regions. If wallets are installed,
    /// two cards are read first to prove the shares still exist, so the
    /// reset can't orphan a wallet.
    async fn factory_reset(
        &self,
        ctx: &mut DeviceCtx,
    ) -> Result<(), CoreError> {
        if !ctx
            .confirm(
                "Factory reset erases all wallets and pairings from this \
                 device. Continue?",
            )
            .await?
        {
            return Ok(());
        }

        if ctx.store.wallet_count() > 0 {
            ctx.show_message(
                "Tap two cards to confirm your wallets are safe on them",
            );
            let mut acceptable = CardMask::ALL;
            for i in 0..2 {
                let mut cfg =
                    CardOpConfig::any_card(format!("Tap card {} of 2", i + 1));
                cfg.acceptable_cards = acceptable;
                let (card, list) = {
                    let mut ops = ctx.card_ops();
                    ops.fetch_wallet_list(cfg).await?
                };
                acceptable.remove(card);

                let missing = ctx.store.list().find_map(|(_, header)| {
                    let held =
                        list.iter().any(|entry| entry.id == header.id);
                    (!held).then(|| header.name.clone())
                });
                if let Some(name) = missing {
                    warn!(%name, %card, "wallet missing from card");
                    ctx.show_message(format!(
                        "Wallet {name} is missing from card {card}; reset \
                         aborted"
                    ));
                    return Ok(());
                }
            }
        }

        ctx.store.factory_reset()?;
        ctx.menu_refresh = true;
        info!("factory reset done");
        ctx.show_message("Device reset. Set it up again to continue");
        Ok(())
    }
}

impl Default for SettingsMenu {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Step<DeviceCtx> for SettingsMenu {
    fn config(&self) -> EventConfig {
        EventConfig::new(EventClass::UI)
    }

    async fn on_enter(&mut self, ctx: &mut DeviceCtx) {
        self.render(ctx);
    }

    async fn on_event(
        &mut self,
        ctx: &mut DeviceCtx,
        event: Event,
    ) -> StepOutcome<DeviceCtx> {
        match event {
            Event::Ui(UiEvent::ListChoice(i)) => {
                if let Some(item) = ITEMS.get(usize::from(i)).copied() {
                    let result = self.activate(ctx, item).await;
                    flows::conclude(ctx, result);
                }
                self.render(ctx);
                StepOutcome::Stay
            }
            Event::Ui(UiEvent::Reject) => StepOutcome::Pop,
            Event::P0(_) => StepOutcome::Pop,
            _ => StepOutcome::Stay,
        }
    }
}
