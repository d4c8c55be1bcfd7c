//! The restricted app.
//!
//! Runs instead of the main menu whenever the device hasn't proven its
//! authenticity. Only setup traffic is served; wallet applets get refused
//! and flash stays untouched.

use async_trait::async_trait;
use vault_common::{status::DeviceAuthState, ui::Screen};
use vault_engine::{Event, EventClass, EventConfig, Step, StepOutcome};

use crate::{context::DeviceCtx, host, menu::MainMenu};

pub struct RestrictedApp;

#[async_trait(?Send)]
impl Step<DeviceCtx> for RestrictedApp {
    fn config(&self) -> EventConfig {
        EventConfig::new(EventClass::USB)
    }

    async fn on_enter(&mut self, ctx: &mut DeviceCtx) {
        ctx.render(Screen::Message {
            text: "Device not authenticated. Connect to the host app"
                .to_owned(),
        });
    }

    async fn on_event(
        &mut self,
        ctx: &mut DeviceCtx,
        event: Event,
    ) -> StepOutcome<DeviceCtx> {
        match event {
            Event::Usb(usb) => {
                host::handle_usb_restricted(ctx, usb);
                if ctx.device_auth == DeviceAuthState::Authenticated {
                    StepOutcome::Replace(Box::new(MainMenu::new()))
                } else {
                    StepOutcome::Stay
                }
            }
            _ => StepOutcome::Stay,
        }
    }
}
