//! The device context: every collaborator a flow can touch, plus the
//! shared UI helpers built on the event bus.

use std::time::Duration;

use tracing::debug;
use vault_card::{ops::CardOperations, session::CardTransport};
use vault_common::{
    constants::{DEFAULT_INACTIVITY_TIMEOUT, MAX_NAME_LEN, MAX_PIN_LEN, MIN_PIN_LEN},
    error::CoreError,
    rng::Crng,
    secret::SecretString,
    status::{CoreStatus, DeviceAuthState, DeviceIdleState},
    ui::{Screen, UiHost},
};
use vault_engine::{Event, EventBus, EventClass, HasEventBus, P0Event, UiEvent};
use vault_store::{flash::FlashBackend, WalletStore};

use crate::host::{HostFrame, HostOut};

pub struct DeviceCtx {
    pub store: WalletStore<Box<dyn FlashBackend>>,
    pub transport: Box<dyn CardTransport>,
    pub ui: Box<dyn UiHost>,
    pub rng: Box<dyn Crng>,
    pub bus: EventBus,
    pub host: Box<dyn HostOut>,
    pub status: CoreStatus,
    pub device_auth: DeviceAuthState,
    /// Set by any flow that mutates the wallet list; menus rebuild on it.
    pub menu_refresh: bool,
}

impl HasEventBus for DeviceCtx {
    fn event_bus(&mut self) -> &mut EventBus {
        &mut self.bus
    }
}

impl DeviceCtx {
    /// Borrow out the pieces the card layer needs.
    pub fn card_ops(
        &mut self,
    ) -> CardOperations<'_, Box<dyn FlashBackend>, Box<dyn Crng>> {
        CardOperations::new(
            &mut self.bus,
            self.transport.as_mut(),
            &mut self.store,
            &mut self.rng,
            self.ui.as_mut(),
        )
    }

    pub fn render(&mut self, screen: Screen) {
        self.ui.render(screen);
    }

    pub fn show_message(&mut self, text: impl Into<String>) {
        self.ui.render(Screen::Message { text: text.into() });
    }

    /// The fatal-error tail: error screen plus a host error frame.
    pub fn report_error(&mut self, err: &CoreError) {
        self.ui.render(Screen::Error {
            text: err.to_string(),
        });
        self.host.send(HostFrame::Error {
            tag: err.tag(),
            code: err.code(),
        });
    }

    // --- UI helpers: the only suspension points flows use directly --- //

    async fn next_ui_event(
        &mut self,
        timeout: Duration,
    ) -> Result<UiEvent, CoreError> {
        loop {
            match self.bus.get_events(EventClass::UI, timeout).await {
                Event::Ui(event) => return Ok(event),
                Event::P0(P0Event::InactivityTimeout) =>
                    return Err(CoreError::P0Timeout),
                Event::P0(P0Event::Abort) => return Err(CoreError::P0Abort),
                other => {
                    debug!(?other, "ignoring non-UI event during prompt");
                }
            }
        }
    }

    /// Yes/no prompt. `Ok(false)` on reject.
    pub async fn confirm(
        &mut self,
        prompt: impl Into<String>,
    ) -> Result<bool, CoreError> {
        self.status.set_idle_state(DeviceIdleState::WaitUserInput);
        self.ui.render(Screen::Confirm {
            prompt: prompt.into(),
        });
        loop {
            match self.next_ui_event(DEFAULT_INACTIVITY_TIMEOUT).await? {
                UiEvent::Confirm => return Ok(true),
                UiEvent::Reject => return Ok(false),
                _ => {}
            }
        }
    }

    /// Free-text input. `Ok(None)` when the user backs out.
    pub async fn input_text(
        &mut self,
        prompt: impl Into<String>,
        obscured: bool,
        max_len: usize,
    ) -> Result<Option<SecretString>, CoreError> {
        self.status.set_idle_state(DeviceIdleState::WaitUserInput);
        self.ui.render(Screen::TextInput {
            prompt: prompt.into(),
            obscured,
            max_len,
        });
        loop {
            match self.next_ui_event(DEFAULT_INACTIVITY_TIMEOUT).await? {
                UiEvent::TextInput(text) => return Ok(Some(text)),
                UiEvent::Reject => return Ok(None),
                _ => {}
            }
        }
    }

    /// Wallet-name input with validation; loops until valid or backed out.
    pub async fn input_wallet_name(
        &mut self,
    ) -> Result<Option<vault_common::wallet::WalletName>, CoreError> {
        loop {
            let Some(text) = self
                .input_text("Enter wallet name", false, MAX_NAME_LEN)
                .await?
            else {
                return Ok(None);
            };
            match vault_common::wallet::WalletName::new(text.expose()) {
                Ok(name) => return Ok(Some(name)),
                Err(err) => self.show_message(err.to_string()),
            }
        }
    }

    /// PIN entry with length validation; loops until valid or backed out.
    pub async fn input_pin(
        &mut self,
        prompt: &str,
    ) -> Result<Option<SecretString>, CoreError> {
        loop {
            let Some(pin) =
                self.input_text(prompt, true, MAX_PIN_LEN).await?
            else {
                return Ok(None);
            };
            let len = pin.len();
            if (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&len) {
                return Ok(Some(pin));
            }
            self.show_message(format!(
                "PIN must be {MIN_PIN_LEN} to {MAX_PIN_LEN} characters"
            ));
        }
    }

    /// Scrollable list choice. `Ok(None)` when the user backs out.
    pub async fn choose(
        &mut self,
        heading: impl Into<String>,
        items: Vec<String>,
    ) -> Result<Option<u16>, CoreError> {
        let count = items.len() as u16;
        self.status.set_idle_state(DeviceIdleState::WaitUserInput);
        self.ui.render(Screen::List {
            heading: heading.into(),
            items,
        });
        loop {
            match self.next_ui_event(DEFAULT_INACTIVITY_TIMEOUT).await? {
                UiEvent::ListChoice(i) if i < count => return Ok(Some(i)),
                UiEvent::Reject => return Ok(None),
                _ => {}
            }
        }
    }
}
