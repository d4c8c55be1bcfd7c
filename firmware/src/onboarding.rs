//! The onboarding screen.
//!
//! Shown until every milestone is complete. A factory-fresh device gets
//! the welcome slideshow exactly once; afterwards (and between milestones)
//! a static "connect to host" screen. All progress is driven by the host
//! over USB.

use async_trait::async_trait;
use tracing::debug;
use vault_common::{
    onboarding::OnboardingStep as Milestone,
    status::{DeviceAuthState, DeviceIdleState},
    ui::Screen,
};
use vault_engine::{Event, EventClass, EventConfig, Step, StepOutcome};

use crate::{context::DeviceCtx, host, menu::MainMenu, restricted};

pub struct OnboardingScreen {
    /// The welcome slideshow only plays once per power-on.
    welcomed: bool,
}

impl OnboardingScreen {
    pub fn new() -> Self {
        Self { welcomed: false }
    }

    fn render(&mut self, ctx: &mut DeviceCtx) {
        ctx.status.reset_flow();
        ctx.status.set_idle_state(DeviceIdleState::Idle);

        if ctx.store.onboarding_step() == Milestone::Virgin && !self.welcomed
        {
            self.welcomed = true;
            ctx.render(Screen::Slideshow {
                slides: vec![
                    "Welcome".to_owned(),
                    "This device keeps your keys split across four cards"
                        .to_owned(),
                    "Connect to the host app to begin setup".to_owned(),
                ],
            });
        } else {
            ctx.render(Screen::Message {
                text: "Connect the device to the host app to continue setup"
                    .to_owned(),
            });
        }
    }
}

impl Default for OnboardingScreen {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl Step<DeviceCtx> for OnboardingScreen {
    fn config(&self) -> EventConfig {
        EventConfig::new(EventClass::USB)
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
            Event::Usb(usb) => {
                host::handle_usb_restricted(ctx, usb);
                if ctx.store.onboarding_step() == Milestone::Complete {
                    return if ctx.device_auth
                        == DeviceAuthState::Authenticated
                    {
                        StepOutcome::Replace(Box::new(MainMenu::new()))
                    } else {
                        StepOutcome::Replace(Box::new(
                            restricted::RestrictedApp,
                        ))
                    };
                }
                self.render(ctx);
                StepOutcome::Stay
            }
            Event::P0(p0) => {
                // Nothing is in flight during onboarding; clear and stay.
                debug!(?p0, "p0 during onboarding ignored");
                StepOutcome::Stay
            }
            _ => StepOutcome::Stay,
        }
    }
}
