//! End-to-end scenarios against the mock card deck and in-memory flash.
//!
//! Every test scripts the user (UI events) and the cards (taps) up front,
//! then drives the flow to completion; the event bus preserves FIFO order
//! per class, so a fully scripted run is deterministic.

use std::sync::{Arc, Mutex};

use firmware::{
    context::DeviceCtx,
    flows::{create_wallet, sync_wallets, unlock_wallet, verify_pin},
    host::{self, HostFrame, HostOut},
    initial_step,
};
use vault_card::{flows as card_flows, mock::MockDeck};
use vault_common::{
    card::{CardMask, CardNumber, FamilyId},
    error::{CoreError, ErrorTag},
    onboarding::OnboardingStep,
    rng::SmallRng,
    secret::SecretString,
    status::CoreStatus,
    ui::HeadlessUi,
    wallet::{WalletName, WalletState},
};
use vault_engine::{Engine, EventSenders, UiEvent, UsbEvent};
use vault_store::{flash::MemFlash, WalletStore};

#[derive(Clone, Default)]
struct RecordingHost(Arc<Mutex<Vec<HostFrame>>>);

impl RecordingHost {
    fn frames(&self) -> Vec<HostFrame> {
        self.0.lock().unwrap().clone()
    }
}

impl HostOut for RecordingHost {
    fn send(&mut self, frame: HostFrame) {
        self.0.lock().unwrap().push(frame);
    }
}

struct Device {
    ctx: DeviceCtx,
    deck: MockDeck,
    senders: EventSenders,
    host: RecordingHost,
}

impl Device {
    fn new() -> Self {
        logger::init_for_testing();

        let bus = vault_engine::EventBus::new();
        let deck = MockDeck::new(FamilyId(*b"TST1"), bus.senders());
        let host = RecordingHost::default();
        let senders = bus.senders();

        let ctx = DeviceCtx {
            store: WalletStore::load(Box::new(MemFlash::new())
                as Box<dyn vault_store::flash::FlashBackend>)
            .unwrap(),
            transport: Box::new(deck.transport()),
            ui: Box::new(HeadlessUi),
            rng: Box::new(SmallRng::from_u64(0x5eed)),
            bus,
            host: Box::new(host.clone()),
            status: CoreStatus::new(),
            device_auth: Default::default(),
            menu_refresh: true,
        };

        Self {
            ctx,
            deck,
            senders,
            host,
        }
    }

    /// Onboarded device with all four cards paired.
    async fn onboarded() -> Self {
        let mut device = Device::new();
        device
            .ctx
            .store
            .set_onboarding_step(OnboardingStep::Complete)
            .unwrap();

        for card in CardNumber::all() {
            device.deck.tap(card);
        }
        let paired = {
            let mut ops = device.ctx.card_ops();
            card_flows::pair_all_cards(&mut ops).await.unwrap()
        };
        assert_eq!(paired, 4);
        device
    }

    fn ui(&self, event: UiEvent) {
        self.senders.ui(event);
    }

    fn text(&self, s: &str) {
        self.ui(UiEvent::TextInput(SecretString::new(s.to_owned())));
    }

    fn tap(&self, n: u8) {
        self.deck.tap(CardNumber::new(n).unwrap());
    }

    /// Script the whole create-wallet interaction.
    fn script_create(&self, name: &str, pin: Option<&str>) {
        self.ui(UiEvent::Confirm); // "all four cards needed"
        self.text(name);
        self.ui(UiEvent::Confirm); // name confirm
        match pin {
            Some(pin) => {
                self.ui(UiEvent::Confirm); // set a PIN?
                self.text(pin);
                self.text(pin);
            }
            None => self.ui(UiEvent::Reject), // no PIN
        }
        // Four write taps, then four verify taps.
        for _ in 0..2 {
            for n in 1..=4 {
                self.tap(n);
            }
        }
    }
}

fn wallet_name(s: &str) -> WalletName {
    WalletName::new(s).unwrap()
}

/// Scenario 1: fresh device, create wallet "Alpha" with PIN 1234.
#[tokio::test(start_paused = true)]
async fn create_wallet_end_to_end() {
    let mut device = Device::onboarded().await;
    device.script_create("Alpha", Some("1234"));

    create_wallet::create(&mut device.ctx).await.unwrap();

    assert_eq!(device.ctx.store.wallet_count(), 1);
    let (index, header) = device
        .ctx
        .store
        .get_by_name(&wallet_name("Alpha"))
        .expect("wallet installed");
    assert_eq!(header.state, WalletState::Valid);
    assert_eq!(header.cards_states, CardMask::ALL);
    assert!(!header.is_locked);
    assert!(header.info.pin_set());
    assert!(device.ctx.store.device_share(index).is_some());

    for card in CardNumber::all() {
        assert!(device.deck.has_wallet(card, &header.id));
    }
}

/// Scenario 2: reconstruct for signing via verify-pin.
#[tokio::test(start_paused = true)]
async fn verify_pin_returns_the_pin() {
    let mut device = Device::onboarded().await;
    device.script_create("Alpha", Some("1234"));
    create_wallet::create(&mut device.ctx).await.unwrap();
    let (index, _) =
        device.ctx.store.get_by_name(&wallet_name("Alpha")).unwrap();

    device.text("1234");
    device.tap(2);

    let pin = verify_pin::run(&mut device.ctx, index).await.unwrap();
    assert_eq!(pin.expose(), "1234");
}

/// Scenario 3: three wrong PINs lock the wallet on the card and in flash.
#[tokio::test(start_paused = true)]
async fn wrong_pin_locks_after_three_attempts() {
    let mut device = Device::onboarded().await;
    device.script_create("Alpha", Some("1234"));
    create_wallet::create(&mut device.ctx).await.unwrap();
    let (index, header) =
        device.ctx.store.get_by_name(&wallet_name("Alpha")).unwrap();
    let id = header.id;

    for _ in 0..3 {
        device.text("9999");
        device.tap(3);
    }

    let err = verify_pin::run(&mut device.ctx, index).await.unwrap_err();
    assert_eq!(err, CoreError::CardPinExhausted);

    let header = device.ctx.store.wallet(index).unwrap();
    assert!(header.is_locked);
    assert_eq!(header.locked_by, Some(CardNumber::THREE));
    assert!(device.deck.is_locked(CardNumber::THREE, &id));
}

/// Scenario 4: unlock via proof-of-work and the correct PIN.
#[tokio::test(start_paused = true)]
async fn unlock_after_lockout() {
    let mut device = Device::onboarded().await;
    device.script_create("Alpha", Some("1234"));
    create_wallet::create(&mut device.ctx).await.unwrap();
    let (index, header) =
        device.ctx.store.get_by_name(&wallet_name("Alpha")).unwrap();
    let id = header.id;

    // Lock it with three wrong PINs.
    for _ in 0..3 {
        device.text("9999");
        device.tap(3);
    }
    let _ = verify_pin::run(&mut device.ctx, index).await;
    assert!(device.ctx.store.wallet(index).unwrap().is_locked);

    // Unlock: tap card 3 for the challenge, grind, PIN, tap card 3 again.
    device.tap(3);
    device.text("1234");
    device.tap(3);
    unlock_wallet::run(&mut device.ctx, index).await.unwrap();

    let header = device.ctx.store.wallet(index).unwrap();
    assert!(!header.is_locked);
    assert_eq!(header.locked_by, None);
    assert!(!device.deck.is_locked(CardNumber::THREE, &id));
    // The card reset its attempt counter.
    assert_eq!(device.deck.attempts_left(CardNumber::THREE, &id), Some(3));

    // The wallet is usable again.
    device.text("1234");
    device.tap(2);
    let pin = verify_pin::run(&mut device.ctx, index).await.unwrap();
    assert_eq!(pin.expose(), "1234");
}

/// Scenario 5: wipe device data, then sync the wallet back from cards.
#[tokio::test(start_paused = true)]
async fn sync_regenerates_the_device_share() {
    let mut device = Device::onboarded().await;
    device.script_create("Beta", None);
    create_wallet::create(&mut device.ctx).await.unwrap();
    let id = device
        .ctx
        .store
        .get_by_name(&wallet_name("Beta"))
        .unwrap()
        .1
        .id;

    // All wallets and device shares gone; pairings survive.
    device.ctx.store.clear_device_data().unwrap();
    assert_eq!(device.ctx.store.wallet_count(), 0);

    // Sync: one tap for the list, then two for the reconstruct.
    device.ui(UiEvent::Confirm);
    device.tap(1);
    device.tap(1);
    device.tap(2);
    sync_wallets::run(&mut device.ctx).await.unwrap();

    let (index, header) =
        device.ctx.store.get_by_name(&wallet_name("Beta")).unwrap();
    assert_eq!(header.id, id);
    assert_eq!(header.state, WalletState::Valid);
    assert_eq!(header.cards_states, CardMask::ALL);
    assert!(device.ctx.store.device_share(index).is_some());

    // The cards still serve shares for the synced wallet.
    device.tap(3);
    let shares = {
        let mut ops = device.ctx.card_ops();
        card_flows::reconstruct_shares(&mut ops, id, None, 1).await.unwrap()
    };
    assert_eq!(shares.len(), 1);
}

/// Scenario 6: a virgin device refuses wallet traffic over USB.
#[tokio::test(start_paused = true)]
async fn onboarding_gate_blocks_wallet_applets() {
    let mut device = Device::new();
    assert_eq!(device.ctx.store.onboarding_step(), OnboardingStep::Virgin);

    // Host tries to dispatch a wallet applet straight away.
    device.senders.usb(UsbEvent {
        tag: host::tags::APP_DISPATCH,
        payload: bytes::Bytes::copy_from_slice(&[0x02, 0x00]),
    });

    let mut engine = Engine::new();
    engine.push(initial_step(&device.ctx));
    tokio::select! {
        _ = engine.run(&mut device.ctx) =>
            panic!("onboarding screen should not exit"),
        _ = tokio::time::sleep(std::time::Duration::from_secs(1)) => {}
    }

    let frames = device.host.frames();
    assert!(frames.iter().any(|frame| matches!(
        frame,
        HostFrame::Error {
            tag: ErrorTag::DeviceSetupRequired,
            ..
        }
    )));
    // No flash mutation happened.
    assert_eq!(device.ctx.store.wallet_count(), 0);
    assert_eq!(device.ctx.store.onboarding_step(), OnboardingStep::Virgin);
}

/// Restoring an installed wallet is refused on the duplicate-id check.
#[tokio::test(start_paused = true)]
async fn restore_rejects_duplicate_wallet() {
    let mut device = Device::onboarded().await;
    device.script_create("Alpha", None);
    create_wallet::create(&mut device.ctx).await.unwrap();

    // A second device share for the same seed can't exist; the flow
    // refuses at validation, before any card is written.
    // (Entering the same name is already refused earlier, so use another.)
    device.ui(UiEvent::Confirm); // cards needed
    device.text("AlphaCopy");
    device.ui(UiEvent::Confirm); // name confirm
    device.ui(UiEvent::Reject); // no PIN
    device.ui(UiEvent::ListChoice(2)); // 24 words

    // Recover the seed words from the installed wallet via view-seed? Not
    // scriptable here; instead restore a fresh valid mnemonic and then
    // attempt to restore it a second time.
    let phrase = "legal winner thank year wave sausage worth useful legal \
                  winner thank year wave sausage worth useful legal winner \
                  thank year wave sausage worth title";
    device.text(phrase);
    device.ui(UiEvent::Confirm); // words correct
    for _ in 0..2 {
        for n in 1..=4 {
            device.tap(n);
        }
    }
    create_wallet::restore(&mut device.ctx).await.unwrap();
    assert_eq!(device.ctx.store.wallet_count(), 2);

    // Second restore of the same phrase: duplicate id.
    device.ui(UiEvent::Confirm);
    device.text("AlphaCopy2");
    device.ui(UiEvent::Confirm);
    device.ui(UiEvent::Reject);
    device.ui(UiEvent::ListChoice(2));
    device.text(phrase);

    let err = create_wallet::restore(&mut device.ctx).await.unwrap_err();
    assert_eq!(err, CoreError::FlashDuplicateId);
    assert_eq!(device.ctx.store.wallet_count(), 2);
}
