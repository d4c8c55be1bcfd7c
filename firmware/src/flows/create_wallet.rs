//! Create-new-wallet and restore-from-seed.
//!
//! Both run the same state machine; restoring only swaps the seed
//! acquisition states (word-count selection, seed entry, validation,
//! confirmation) in place of on-device generation.

use tracing::{info, warn};
use vault_card::{apdu::CardWalletRecord, flows as card_flows};
use vault_common::{
    card::CardMask,
    constants::CARD_COUNT,
    error::CoreError,
    ui::Screen,
    wallet::{
        WalletHeader, WalletInfo, WalletName, WalletState, WordCount,
    },
    ExposeSecret,
};
use vault_crypto::{
    envelope::{self, EnvelopeKey},
    kdf::{self, PinHashes},
    mnemonic::{self, MnemonicPhrase},
    shamir,
};
use vault_store::records::Settings;

use crate::context::DeviceCtx;

/// Where the seed comes from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SeedSource {
    Generate,
    Restore,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum State {
    NameInput,
    NameConfirm,
    PinInstructions,
    PinSelect,
    PinInput,
    PinConfirm,
    PassphraseInstructions,
    PassphraseEnable,
    // Generate path.
    SeedGenerate,
    // Restore path.
    InputWordCount,
    InputSeed,
    ValidateSeed,
    VerifySeed,
    // Shared tail.
    SaveDeviceShare,
    TapCards,
    VerifyShares,
    // Terminals.
    Done,
    DoneWithErrors,
    EarlyExit,
}

/// All flow-local secrets; wiped when the scratch drops.
#[derive(Default)]
struct Scratch {
    name: Option<WalletName>,
    info: WalletInfo,
    pin: Option<PinHashes>,
    word_count: WordCount,
    entered_phrase: Option<vault_common::secret::SecretString>,
    mnemonic: Option<MnemonicPhrase>,
    records: Vec<CardWalletRecord>,
    device_share: Option<vault_common::wallet::SealedShare>,
    envelope_key: Option<EnvelopeKey>,
    index: Option<usize>,
    failure: Option<CoreError>,
}

pub async fn create(ctx: &mut DeviceCtx) -> Result<(), CoreError> {
    run(ctx, SeedSource::Generate).await
}

pub async fn restore(ctx: &mut DeviceCtx) -> Result<(), CoreError> {
    run(ctx, SeedSource::Restore).await
}

async fn run(
    ctx: &mut DeviceCtx,
    source: SeedSource,
) -> Result<(), CoreError> {
    // All four cards must be paired before a wallet can exist.
    if ctx.store.pairing_count() < CARD_COUNT {
        ctx.show_message("Pair all four cards before creating a wallet");
        return Ok(());
    }
    if !ctx
        .confirm("All four cards will be needed. Continue?")
        .await?
    {
        return Ok(());
    }

    let mut scratch = Scratch {
        word_count: WordCount::TwentyFour,
        ..Default::default()
    };
    let mut state = State::NameInput;

    loop {
        // The host polls this counter to follow flow progress.
        ctx.status.set_core_flow_status(state as u32);
        state = step(ctx, source, state, &mut scratch).await?;
        match state {
            State::Done => {
                ctx.menu_refresh = true;
                return Ok(());
            }
            State::DoneWithErrors => {
                ctx.menu_refresh = true;
                return match scratch.failure.take() {
                    Some(err) => Err(err),
                    None => Ok(()),
                };
            }
            State::EarlyExit => return Ok(()),
            _ => {}
        }
    }
}

async fn step(
    ctx: &mut DeviceCtx,
    source: SeedSource,
    state: State,
    scratch: &mut Scratch,
) -> Result<State, CoreError> {
    Ok(match state {
        State::NameInput => {
            let Some(name) = ctx.input_wallet_name().await? else {
                return Ok(State::EarlyExit);
            };
            if ctx.store.get_by_name(&name).is_some() {
                ctx.show_message("A wallet with this name already exists");
                return Ok(State::NameInput);
            }
            scratch.name = Some(name);
            State::NameConfirm
        }

        State::NameConfirm => {
            let name = scratch.name.as_ref().expect("set by NameInput");
            if ctx.confirm(format!("Wallet name: {name}?")).await? {
                State::PinInstructions
            } else {
                State::NameInput
            }
        }

        State::PinInstructions => {
            ctx.show_message(
                "Next you can set a PIN. It protects the shares stored on \
                 the cards",
            );
            State::PinSelect
        }

        State::PinSelect => {
            scratch.info.remove(WalletInfo::PIN_SET);
            scratch.pin = None;
            if ctx.confirm("Do you want to set a PIN?").await? {
                State::PinInput
            } else {
                State::PassphraseInstructions
            }
        }

        State::PinInput => {
            let Some(pin) = ctx.input_pin("Enter PIN").await? else {
                return Ok(State::PinSelect);
            };
            scratch.pin = Some(kdf::hash_pin(pin.expose()));
            scratch.info.insert(WalletInfo::PIN_SET);
            State::PinConfirm
        }

        State::PinConfirm => {
            let Some(again) = ctx.input_pin("Confirm PIN").await? else {
                return Ok(State::PinSelect);
            };
            let reentered = kdf::hash_pin(again.expose());
            let expected = scratch.pin.as_ref().expect("set by PinInput");
            if reentered.double == expected.double {
                State::PassphraseInstructions
            } else {
                ctx.show_message("PINs do not match, try again");
                State::PinConfirm
            }
        }

        State::PassphraseInstructions => {
            scratch.info.remove(WalletInfo::PASSPHRASE_SET);
            if !ctx.store.settings().contains(Settings::PASSPHRASE) {
                return Ok(seed_entry_state(source));
            }
            ctx.show_message(
                "A passphrase acts as an extra word on top of the seed",
            );
            if ctx
                .confirm("Use a passphrase with this wallet?")
                .await?
            {
                State::PassphraseEnable
            } else {
                seed_entry_state(source)
            }
        }

        State::PassphraseEnable => {
            scratch.info.insert(WalletInfo::PASSPHRASE_SET);
            seed_entry_state(source)
        }

        State::SeedGenerate => {
            ctx.show_message("Generating seed...");
            let mnemonic =
                mnemonic::generate(&mut ctx.rng, scratch.word_count);
            scratch.mnemonic = Some(mnemonic);
            State::SaveDeviceShare
        }

        State::InputWordCount => {
            let choice = ctx
                .choose(
                    "How many words is your seed?",
                    vec!["12".into(), "18".into(), "24".into()],
                )
                .await?;
            match choice {
                Some(0) => scratch.word_count = WordCount::Twelve,
                Some(1) => scratch.word_count = WordCount::Eighteen,
                Some(2) => scratch.word_count = WordCount::TwentyFour,
                _ => return Ok(State::EarlyExit),
            }
            State::InputSeed
        }

        State::InputSeed => {
            let Some(phrase) = ctx
                .input_text("Enter your seed phrase", true, 24 * 9)
                .await?
            else {
                return Ok(State::InputWordCount);
            };
            scratch.entered_phrase = Some(phrase);
            State::ValidateSeed
        }

        State::ValidateSeed => {
            let phrase =
                scratch.entered_phrase.take().expect("set by InputSeed");
            let mnemonic = match mnemonic::parse(phrase.expose()) {
                Ok(m) if m.word_count() == scratch.word_count => m,
                Ok(_) => {
                    ctx.show_message("Word count doesn't match");
                    return Ok(State::InputSeed);
                }
                Err(err) => {
                    ctx.show_message(err.to_string());
                    return Ok(State::InputSeed);
                }
            };
            // Restoring a wallet that's already installed is refused
            // before anything touches the cards.
            if ctx.store.get_by_id(&kdf::wallet_id(&mnemonic)).is_some() {
                scratch.failure = Some(CoreError::FlashDuplicateId);
                ctx.show_message("This wallet already exists on the device");
                return Ok(State::DoneWithErrors);
            }
            scratch.mnemonic = Some(mnemonic);
            State::VerifySeed
        }

        State::VerifySeed => {
            let mnemonic =
                scratch.mnemonic.as_ref().expect("set by ValidateSeed");
            let words =
                mnemonic.words().map(str::to_owned).collect::<Vec<_>>();
            ctx.render(Screen::List {
                heading: "Verify your seed".to_owned(),
                items: words,
            });
            if ctx.confirm("Are these words correct?").await? {
                State::SaveDeviceShare
            } else {
                State::InputSeed
            }
        }

        State::SaveDeviceShare => {
            seal_and_save(ctx, scratch)?;
            State::TapCards
        }

        State::TapCards => {
            let records = std::mem::take(&mut scratch.records);
            let result = {
                let mut ops = ctx.card_ops();
                card_flows::create_wallet(&mut ops, records).await
            };
            let index = scratch.index.expect("set by SaveDeviceShare");
            match result {
                Ok(()) => {
                    ctx.store.set_cards_states(index, CardMask::ALL)?;
                    State::VerifyShares
                }
                Err(err) => {
                    // Roll back: the device share is erased and the header
                    // is marked invalid so the menu offers deletion.
                    warn!(%err, "card writes failed, rolling back");
                    ctx.store.erase_device_share(index)?;
                    ctx.store.set_state(index, WalletState::Invalid)?;
                    scratch.failure = Some(err);
                    State::DoneWithErrors
                }
            }
        }

        State::VerifyShares => {
            ctx.show_message("Verifying shares, tap each card again");
            let index = scratch.index.expect("set by SaveDeviceShare");
            let header = ctx
                .store
                .wallet(index)
                .ok_or(CoreError::WalletNotFound)?
                .clone();
            let device_share = scratch
                .device_share
                .as_ref()
                .expect("set by SaveDeviceShare")
                .clone();
            let key = scratch
                .envelope_key
                .as_ref()
                .expect("set by SaveDeviceShare");
            let pin_double = scratch
                .pin
                .as_ref()
                .map(|hashes| *hashes.double.expose_secret());

            let verified = {
                let mut ops = ctx.card_ops();
                card_flows::verify_wallet(
                    &mut ops,
                    &header,
                    &device_share,
                    key,
                    pin_double,
                )
                .await?
            };
            if verified {
                ctx.store.set_state(index, WalletState::Valid)?;
                info!(wallet = %header.id, "wallet created and verified");
                ctx.show_message("Wallet is ready to use");
                State::Done
            } else {
                ctx.store.set_state(index, WalletState::Invalid)?;
                warn!(wallet = %header.id, "share verification failed");
                scratch.failure = Some(CoreError::WalletInvariant);
                State::DoneWithErrors
            }
        }

        State::Done | State::DoneWithErrors | State::EarlyExit => state,
    })
}

fn seed_entry_state(source: SeedSource) -> State {
    match source {
        SeedSource::Generate => State::SeedGenerate,
        SeedSource::Restore => State::InputWordCount,
    }
}

/// Split the secret, seal all five shares, and persist the header plus
/// the device share. Also derives the wallet and beneficiary keys used by
/// the xPub caches; they drop (and wipe) immediately since no cache is
/// being populated here.
fn seal_and_save(
    ctx: &mut DeviceCtx,
    scratch: &mut Scratch,
) -> Result<(), CoreError> {
    let mnemonic = scratch.mnemonic.as_ref().expect("seed state ran");
    let id = kdf::wallet_id(mnemonic);

    let _wallet_key = kdf::derive_wallet_key(mnemonic)
        .map_err(|_| CoreError::WalletInvariant)?;
    let _beneficiary_key = kdf::derive_beneficiary_key(mnemonic)
        .map_err(|_| CoreError::WalletInvariant)?;

    let secret = mnemonic.to_master_secret();
    let shares = shamir::split(&mut ctx.rng, &secret);
    let key = match &scratch.pin {
        Some(hashes) => EnvelopeKey::from_pin(&hashes.single),
        None => EnvelopeKey::unprotected(),
    };
    let wallet_nonce = envelope::derive_wallet_nonce(&mut ctx.rng);
    let pin_double = scratch
        .pin
        .as_ref()
        .map(|hashes| *hashes.double.expose_secret());
    let name = scratch.name.clone().expect("set by NameInput");
    let word_count = mnemonic.word_count();

    scratch.records = shares[..CARD_COUNT]
        .iter()
        .map(|share| CardWalletRecord {
            id,
            name: name.clone(),
            info: scratch.info,
            word_count,
            share: key.seal(
                &envelope::share_nonce(&wallet_nonce, share.x),
                &share.data,
            ),
            pin_double_hash: pin_double,
        })
        .collect();

    let device = &shares[CARD_COUNT];
    let device_share = key.seal(
        &envelope::share_nonce(&wallet_nonce, device.x),
        &device.data,
    );

    let header = WalletHeader {
        id,
        name,
        info: scratch.info,
        word_count,
        state: WalletState::UnverifiedValid,
        cards_states: CardMask::NONE,
        is_locked: false,
        locked_by: None,
        challenge: None,
    };
    let index = ctx.store.add_wallet(header, Some(device_share.clone()))?;

    scratch.device_share = Some(device_share);
    scratch.envelope_key = Some(key);
    scratch.index = Some(index);
    ctx.menu_refresh = true;
    Ok(())
}
