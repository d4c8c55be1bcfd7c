//! The firmware core: end-to-end wallet flows, menus, onboarding, the
//! restricted app, and the host interface, all driven by the cooperative
//! flow engine.

/// The device context threaded through every step and flow.
pub mod context;
/// End-to-end wallet flows.
pub mod flows;
/// Host USB protocol and dispatch.
pub mod host;
/// Main menu, wallet menu, settings.
pub mod menu;
/// The onboarding step.
pub mod onboarding;
/// The restricted app shown before setup completes.
pub mod restricted;

use vault_common::{onboarding::OnboardingStep, status::DeviceAuthState};
use vault_engine::Step;

use crate::context::DeviceCtx;

/// Pick the step the engine boots into: onboarding until its milestones
/// are done, the restricted app until the device has authenticated, and
/// the main menu after that.
pub fn initial_step(ctx: &DeviceCtx) -> Box<dyn Step<DeviceCtx>> {
    if ctx.store.onboarding_step() != OnboardingStep::Complete {
        Box::new(onboarding::OnboardingScreen::new())
    } else if ctx.device_auth != DeviceAuthState::Authenticated {
        Box::new(restricted::RestrictedApp)
    } else {
        Box::new(menu::MainMenu::new())
    }
}
