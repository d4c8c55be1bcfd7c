//! High-level per-card operations.
//!
//! Every operation shares the same skeleton: prompt for a tap, wait on the
//! NFC event, select and vet the card, then run its exchanges inside the
//! abort-deferral window. Card-removed and wrong-card outcomes re-prompt
//! up to [`MAX_TAP_RETRIES`] times; everything else surfaces to the caller.

use tracing::{debug, info, warn};
use vault_common::{
    card::{CardMask, CardNumber, FamilyId},
    constants::{DEFAULT_INACTIVITY_TIMEOUT, MAX_TAP_RETRIES},
    error::CoreError,
    rng::{Crng, RngExt},
    ui::{Screen, UiHost},
    wallet::{SealedShare, WalletId},
};
use vault_engine::{Event, EventBus, EventClass, NfcEvent, P0Event};
use vault_store::{flash::FlashBackend, records::PairedCard, WalletStore};

use crate::{
    apdu::{
        self, CardChallenge, CardRequest, CardResponseBody, CardWalletRecord,
        WalletListEntry,
    },
    session::{self, CardTransport},
};

/// Per-operation configuration: which cards are acceptable and what the
/// user sees while tapping.
#[derive(Clone, Debug)]
pub struct CardOpConfig {
    pub acceptable_cards: CardMask,
    pub expected_family_id: Option<FamilyId>,
    /// Skip the wait for card removal after the exchange, so the user can
    /// proceed immediately (set for the last tap of a flow).
    pub skip_card_removal: bool,
    /// Clear when the caller already consumed the tap's NFC event (the
    /// pairing flow waits on NFC and UI together to offer a skip).
    pub wait_for_tap: bool,
    pub heading: String,
    pub message: String,
}

impl CardOpConfig {
    pub fn any_card(heading: impl Into<String>) -> Self {
        Self {
            acceptable_cards: CardMask::ALL,
            expected_family_id: None,
            skip_card_removal: false,
            wait_for_tap: true,
            heading: heading.into(),
            message: "Place the card below the device".to_owned(),
        }
    }

    pub fn one_card(card: CardNumber) -> Self {
        Self {
            acceptable_cards: CardMask::only(card),
            ..Self::any_card(format!("Tap card {card}"))
        }
    }
}

/// The borrowed collaborators every card operation needs.
pub struct CardOperations<'a, F: FlashBackend, R: Crng> {
    pub bus: &'a mut EventBus,
    pub transport: &'a mut dyn CardTransport,
    pub store: &'a mut WalletStore<F>,
    pub rng: &'a mut R,
    pub ui: &'a mut dyn UiHost,
    /// The card accepted by the most recent tap, including taps whose
    /// exchange then failed. Flows use this to attribute card-side
    /// failures (e.g. which card locked a wallet).
    pub last_tapped: Option<CardNumber>,
}

impl<'a, F: FlashBackend, R: Crng> CardOperations<'a, F, R> {
    pub fn new(
        bus: &'a mut EventBus,
        transport: &'a mut dyn CardTransport,
        store: &'a mut WalletStore<F>,
        rng: &'a mut R,
        ui: &'a mut dyn UiHost,
    ) -> Self {
        Self {
            bus,
            transport,
            store,
            rng,
            ui,
            last_tapped: None,
        }
    }
}

impl<F: FlashBackend, R: Crng> CardOperations<'_, F, R> {
    // --- The tap-and-exchange skeleton --- //

    /// Run `requests` against one tapped card, retrying recoverable tap
    /// failures. Returns the tapped card and one body per request.
    async fn run_exchanges(
        &mut self,
        cfg: &CardOpConfig,
        requests: &[CardRequest],
    ) -> Result<(CardNumber, Vec<CardResponseBody>), CoreError> {
        let mut tries = 0;
        let mut need_tap_event = cfg.wait_for_tap;
        loop {
            tries += 1;
            if need_tap_event {
                self.ui.render(Screen::Instruction {
                    heading: cfg.heading.clone(),
                    body: cfg.message.clone(),
                });

                match self
                    .bus
                    .get_events(EventClass::NFC, DEFAULT_INACTIVITY_TIMEOUT)
                    .await
                {
                    Event::Nfc(NfcEvent::CardDetected) => {}
                    Event::Nfc(NfcEvent::CardRemoved) => continue,
                    Event::P0(P0Event::InactivityTimeout) =>
                        return Err(CoreError::P0Timeout),
                    Event::P0(P0Event::Abort) =>
                        return Err(CoreError::P0Abort),
                    // UI / USB can't arrive: the mask excludes them.
                    _ => continue,
                }
            }
            need_tap_event = true;

            match self.tap_once(cfg, requests).await {
                Ok(ok) => {
                    if !cfg.skip_card_removal {
                        self.transport.wait_for_removal().await;
                    }
                    self.transport.deselect().await;
                    return Ok(ok);
                }
                Err(err @ (CoreError::CardRemoved | CoreError::CardWrong))
                    if tries < MAX_TAP_RETRIES =>
                {
                    debug!(%err, tries, "recoverable tap failure, re-prompting");
                    self.ui.render(Screen::Message {
                        text: match err {
                            CoreError::CardWrong =>
                                "Please tap another card".to_owned(),
                            _ => "Card removed too early, tap again".to_owned(),
                        },
                    });
                    continue;
                }
                Err(err) => {
                    self.transport.deselect().await;
                    return Err(err);
                }
            }
        }
    }

    /// One select + exchange attempt against whatever card is in the field.
    async fn tap_once(
        &mut self,
        cfg: &CardOpConfig,
        requests: &[CardRequest],
    ) -> Result<(CardNumber, Vec<CardResponseBody>), CoreError> {
        let identity = self.transport.select().await?;

        if !cfg.acceptable_cards.contains(identity.card_number) {
            warn!(card = %identity.card_number, "unacceptable card tapped");
            return Err(CoreError::CardWrong);
        }
        if let Some(expected) = cfg.expected_family_id {
            if identity.family_id != expected {
                warn!(
                    family = %identity.family_id,
                    "card from a different family tapped"
                );
                return Err(CoreError::CardWrong);
            }
        }

        self.last_tapped = Some(identity.card_number);

        // Pairing is the one plaintext exchange; everything else requires
        // a session key from the keystore.
        let plaintext_ok =
            matches!(requests.first(), Some(CardRequest::Pair { .. }));
        let key = match self.store.pairing(identity.card_number) {
            Some(entry) => Some(entry.shared_secret.clone()),
            None if plaintext_ok => None,
            None => {
                warn!(
                    card = %identity.card_number,
                    "card not paired, cannot open a session"
                );
                return Err(CoreError::CardWrong);
            }
        };

        // No P0 may interrupt an APDU in flight; queued aborts re-raise
        // at the next bus wait.
        self.bus.disable_abort();
        let result = self
            .exchange_all(key.as_ref(), identity.card_number, requests)
            .await;
        self.bus.enable_abort();

        result.map(|bodies| (identity.card_number, bodies))
    }

    async fn exchange_all(
        &mut self,
        key: Option<&vault_common::secret::PersistedSecret>,
        card: CardNumber,
        requests: &[CardRequest],
    ) -> Result<Vec<CardResponseBody>, CoreError> {
        let mut bodies = Vec::with_capacity(requests.len());
        for request in requests {
            let mut frame = apdu::encode_request(request);
            if let Some(key) = key {
                frame = session::seal_message(key, self.rng, &frame);
            }

            let mut reply = self.transport.exchange(&frame).await?;
            if let Some(key) = key {
                reply = session::open_message(key, &reply)?;
            }

            let response = apdu::decode_response(&reply)?;
            debug!(card = %card, sw = format_args!("{:#06x}", response.sw),
                "card exchange complete");
            bodies.push(response.into_result()?);
        }
        Ok(bodies)
    }

    // --- The operations --- //

    /// Pair one card. Re-pairing an already-paired card is an ignored
    /// no-op; returns whether a new pairing was stored.
    ///
    /// `already_tapped` when the caller consumed the tap's NFC event
    /// itself (the pairing flow does, to offer a per-card skip).
    pub async fn pair(
        &mut self,
        card_number: CardNumber,
        already_tapped: bool,
    ) -> Result<bool, CoreError> {
        if self.store.pairing(card_number).is_some() {
            debug!(card = %card_number, "already paired, skipping");
            return Ok(false);
        }

        let device_random: [u8; 32] = self.rng.gen_bytes();
        let cfg = CardOpConfig {
            expected_family_id: self.store.family_id(),
            wait_for_tap: !already_tapped,
            ..CardOpConfig::one_card(card_number)
        };

        let (_, bodies) = self
            .run_exchanges(&cfg, &[CardRequest::Pair { device_random }])
            .await?;
        let CardResponseBody::Paired {
            card_random,
            family_id,
        } = bodies.into_iter().next().expect("one body per request")
        else {
            return Err(CoreError::CardTransport);
        };

        let shared_secret = session::derive_pairing_secret(
            &device_random,
            &card_random,
            &family_id,
        );
        self.store.store_pairing(
            card_number,
            PairedCard {
                family_id,
                shared_secret,
            },
        )?;
        info!(card = %card_number, "card paired");
        Ok(true)
    }

    /// Store one wallet share on one card and read it back to verify the
    /// write. A read-back mismatch is fatal.
    pub async fn write_share(
        &mut self,
        mut cfg: CardOpConfig,
        record: CardWalletRecord,
    ) -> Result<CardNumber, CoreError> {
        cfg.expected_family_id = self.store.family_id();
        let requests = [
            CardRequest::WriteShare {
                wallet: record.clone(),
            },
            CardRequest::FetchShare {
                wallet_id: record.id,
                pin_double_hash: record.pin_double_hash,
            },
        ];
        let (card, bodies) = self.run_exchanges(&cfg, &requests).await?;

        let CardResponseBody::Share(read_back) = &bodies[1] else {
            return Err(CoreError::CardTransport);
        };
        if *read_back != record.share {
            warn!(card = %card, "share read-back mismatch");
            return Err(CoreError::ShareCorrupt);
        }
        info!(card = %card, wallet = %record.id, "share written");
        Ok(card)
    }

    /// Read one wallet share. The card verifies the PIN hash first; wrong
    /// PINs consume card-side attempts and eventually lock the wallet.
    pub async fn fetch_share(
        &mut self,
        mut cfg: CardOpConfig,
        wallet_id: WalletId,
        pin_double_hash: Option<[u8; 32]>,
    ) -> Result<(CardNumber, SealedShare), CoreError> {
        cfg.expected_family_id = self.store.family_id();
        let (card, bodies) = self
            .run_exchanges(
                &cfg,
                &[CardRequest::FetchShare {
                    wallet_id,
                    pin_double_hash,
                }],
            )
            .await?;
        let CardResponseBody::Share(share) = bodies.into_iter().next().expect("one body per request")
        else {
            return Err(CoreError::CardTransport);
        };
        Ok((card, share))
    }

    /// The tapped card's wallet list.
    pub async fn fetch_wallet_list(
        &mut self,
        mut cfg: CardOpConfig,
    ) -> Result<(CardNumber, Vec<WalletListEntry>), CoreError> {
        cfg.expected_family_id = self.store.family_id();
        let (card, bodies) = self
            .run_exchanges(&cfg, &[CardRequest::FetchWalletList])
            .await?;
        let CardResponseBody::WalletList(list) =
            bodies.into_iter().next().expect("one body per request")
        else {
            return Err(CoreError::CardTransport);
        };
        Ok((card, list))
    }

    /// Fetch the unlock challenge; `None` means the wallet is no longer
    /// locked on the card.
    pub async fn fetch_challenge(
        &mut self,
        mut cfg: CardOpConfig,
        wallet_id: WalletId,
    ) -> Result<(CardNumber, Option<CardChallenge>), CoreError> {
        cfg.expected_family_id = self.store.family_id();
        let (card, bodies) = self
            .run_exchanges(&cfg, &[CardRequest::FetchChallenge { wallet_id }])
            .await?;
        let CardResponseBody::Challenge(challenge) =
            bodies.into_iter().next().expect("one body per request")
        else {
            return Err(CoreError::CardTransport);
        };
        Ok((card, challenge))
    }

    /// Present the solved PoW nonce and PIN hash; on success the card
    /// clears the lock and resets its attempt counter.
    pub async fn unlock_wallet(
        &mut self,
        mut cfg: CardOpConfig,
        wallet_id: WalletId,
        pin_double_hash: Option<[u8; 32]>,
        solution_nonce: [u8; 16],
    ) -> Result<CardNumber, CoreError> {
        cfg.expected_family_id = self.store.family_id();
        let (card, _) = self
            .run_exchanges(
                &cfg,
                &[CardRequest::UnlockWallet {
                    wallet_id,
                    pin_double_hash,
                    solution_nonce,
                }],
            )
            .await?;
        info!(card = %card, wallet = %wallet_id, "wallet unlocked on card");
        Ok(card)
    }

    /// Delete one wallet's share from one card. Tolerates the wallet being
    /// absent (partially-created wallets).
    pub async fn delete_share(
        &mut self,
        mut cfg: CardOpConfig,
        wallet_id: WalletId,
        pin_double_hash: Option<[u8; 32]>,
    ) -> Result<(), CoreError> {
        cfg.expected_family_id = self.store.family_id();
        match self
            .run_exchanges(
                &cfg,
                &[CardRequest::DeleteShare {
                    wallet_id,
                    pin_double_hash,
                }],
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(CoreError::WalletNotFound) => {
                // Nothing to delete on this card; that's fine.
                debug!(wallet = %wallet_id, "wallet not on card");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Touch every wallet on the tapped card without decrypting anything.
    pub async fn health_check(
        &mut self,
        mut cfg: CardOpConfig,
    ) -> Result<(CardNumber, Vec<WalletListEntry>), CoreError> {
        cfg.expected_family_id = self.store.family_id();
        let (card, bodies) =
            self.run_exchanges(&cfg, &[CardRequest::HealthCheck]).await?;
        let CardResponseBody::WalletList(list) =
            bodies.into_iter().next().expect("one body per request")
        else {
            return Err(CoreError::CardTransport);
        };
        info!(card = %card, wallets = list.len(), "card health check done");
        Ok((card, list))
    }
}
