//! An in-memory deck of four X1 cards, speaking the real wire protocol
//! (including session encryption), for tests and the device simulator.
//!
//! Tests script taps with [`MockDeck::tap`]; the deck posts the NFC event
//! and the next `select` picks that card up. Card-side applet behavior
//! (PIN attempts, locking, challenges) follows the card spec.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tracing::debug;
use vault_common::{
    card::{CardNumber, FamilyId},
    rng::{RngExt, SmallRng},
    secret::PersistedSecret,
};
use vault_engine::{EventSenders, NfcEvent};

use crate::{
    apdu::{
        self, CardChallenge, CardRequest, CardResponse, CardResponseBody,
        CardWalletRecord, WalletListEntry,
    },
    session::{self, CardIdentity, CardTransport, TransportError},
};

const PIN_ATTEMPTS: u8 = 3;

struct MockWallet {
    record: CardWalletRecord,
    attempts_left: u8,
    locked: bool,
    challenge: Option<CardChallenge>,
}

#[derive(Default)]
struct MockCard {
    shared_secret: Option<PersistedSecret>,
    wallets: Vec<MockWallet>,
}

struct DeckState {
    family_id: FamilyId,
    cards: [MockCard; 4],
    tap_queue: VecDeque<CardNumber>,
    field: Option<CardNumber>,
    rng: SmallRng,
    /// Target handed out in fresh challenges; permissive by default so
    /// tests solve instantly.
    pow_target: [u8; 16],
    fail_selects: u32,
    fail_exchanges: u32,
}

/// Handle to the deck shared between the test and the transport.
#[derive(Clone)]
pub struct MockDeck {
    state: Arc<Mutex<DeckState>>,
    senders: EventSenders,
}

impl MockDeck {
    pub fn new(family_id: FamilyId, senders: EventSenders) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeckState {
                family_id,
                cards: Default::default(),
                tap_queue: VecDeque::new(),
                field: None,
                rng: SmallRng::from_u64(0x0ca8d),
                pow_target: [0xff; 16],
                fail_selects: 0,
                fail_exchanges: 0,
            })),
            senders,
        }
    }

    /// The transport the device side talks through.
    pub fn transport(&self) -> MockTransport {
        MockTransport {
            state: Arc::clone(&self.state),
        }
    }

    /// Script one tap: the card enters the field and the NFC event fires.
    pub fn tap(&self, card: CardNumber) {
        self.state.lock().unwrap().tap_queue.push_back(card);
        self.senders.nfc(NfcEvent::CardDetected);
    }

    /// Make the next `n` selects fail as if the card left immediately.
    /// Each still consumes a queued tap, like a real fumbled placement.
    pub fn fumble_taps(&self, n: u32) {
        self.state.lock().unwrap().fail_selects = n;
    }

    /// Make the next `n` exchanges fail mid-APDU.
    pub fn drop_exchanges(&self, n: u32) {
        self.state.lock().unwrap().fail_exchanges = n;
    }

    /// Lower the PoW difficulty knob for lock tests.
    pub fn set_pow_target(&self, target: [u8; 16]) {
        self.state.lock().unwrap().pow_target = target;
    }

    // --- Test inspection helpers --- //

    pub fn is_paired(&self, card: CardNumber) -> bool {
        self.state.lock().unwrap().cards[card.index()].shared_secret.is_some()
    }

    pub fn wallet_count(&self, card: CardNumber) -> usize {
        self.state.lock().unwrap().cards[card.index()].wallets.len()
    }

    pub fn has_wallet(
        &self,
        card: CardNumber,
        id: &vault_common::wallet::WalletId,
    ) -> bool {
        self.state.lock().unwrap().cards[card.index()]
            .wallets
            .iter()
            .any(|w| w.record.id == *id)
    }

    pub fn is_locked(
        &self,
        card: CardNumber,
        id: &vault_common::wallet::WalletId,
    ) -> bool {
        self.state.lock().unwrap().cards[card.index()]
            .wallets
            .iter()
            .any(|w| w.record.id == *id && w.locked)
    }

    pub fn attempts_left(
        &self,
        card: CardNumber,
        id: &vault_common::wallet::WalletId,
    ) -> Option<u8> {
        self.state.lock().unwrap().cards[card.index()]
            .wallets
            .iter()
            .find(|w| w.record.id == *id)
            .map(|w| w.attempts_left)
    }
}

/// The device side of the deck: implements the NFC driver contract.
pub struct MockTransport {
    state: Arc<Mutex<DeckState>>,
}

#[async_trait(?Send)]
impl CardTransport for MockTransport {
    async fn select(&mut self) -> Result<CardIdentity, TransportError> {
        let mut state = self.state.lock().unwrap();
        let card = state
            .tap_queue
            .pop_front()
            .ok_or(TransportError::Removed)?;
        if state.fail_selects > 0 {
            state.fail_selects -= 1;
            return Err(TransportError::Removed);
        }
        state.field = Some(card);
        Ok(CardIdentity {
            card_number: card,
            family_id: state.family_id,
        })
    }

    async fn exchange(
        &mut self,
        request: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_exchanges > 0 {
            state.fail_exchanges -= 1;
            return Err(TransportError::Removed);
        }
        let card = state.field.ok_or(TransportError::Removed)?;
        state.handle_frame(card, request)
    }

    async fn deselect(&mut self) {
        self.state.lock().unwrap().field = None;
    }

    async fn wait_for_removal(&mut self) {
        // The simulated user removes the card promptly.
    }
}

impl DeckState {
    fn handle_frame(
        &mut self,
        card: CardNumber,
        frame: &[u8],
    ) -> Result<Vec<u8>, TransportError> {
        // Pairing is the one plaintext exchange.
        if let Ok(CardRequest::Pair { device_random }) =
            apdu::decode_request(frame)
        {
            let response = self.handle_pair(card, device_random);
            return Ok(apdu::encode_response(&response));
        }

        let Some(key) = self.cards[card.index()].shared_secret.clone() else {
            debug!(card = %card, "encrypted frame for unpaired mock card");
            return Err(TransportError::Transport);
        };
        let plain = session::open_message(&key, frame)
            .map_err(|_| TransportError::Transport)?;
        let request = apdu::decode_request(&plain)
            .map_err(|_| TransportError::Transport)?;

        let response = self.handle_request(card, request);
        let frame =
            session::seal_message(&key, &mut self.rng, &apdu::encode_response(&response));
        Ok(frame)
    }

    fn handle_pair(
        &mut self,
        card: CardNumber,
        device_random: [u8; 32],
    ) -> CardResponse {
        let card_random: [u8; 32] = self.rng.gen_bytes();
        let family_id = self.family_id;
        let secret = session::derive_pairing_secret(
            &device_random,
            &card_random,
            &family_id,
        );
        self.cards[card.index()].shared_secret = Some(secret);
        CardResponse::ok(CardResponseBody::Paired {
            card_random,
            family_id,
        })
    }

    fn handle_request(
        &mut self,
        card: CardNumber,
        request: CardRequest,
    ) -> CardResponse {
        match request {
            CardRequest::Pair { .. } => unreachable!("handled as plaintext"),

            CardRequest::WriteShare { wallet } => {
                let slot = &mut self.cards[card.index()].wallets;
                slot.retain(|w| w.record.id != wallet.id);
                slot.push(MockWallet {
                    record: wallet,
                    attempts_left: PIN_ATTEMPTS,
                    locked: false,
                    challenge: None,
                });
                CardResponse::ok(CardResponseBody::Done)
            }

            CardRequest::FetchShare {
                wallet_id,
                pin_double_hash,
            } => {
                match self.check_pin(card, &wallet_id, pin_double_hash) {
                    Ok(()) => {}
                    Err(sw) => return CardResponse::error(sw),
                }
                let wallet = self
                    .find_wallet(card, &wallet_id)
                    .expect("checked by check_pin");
                CardResponse::ok(CardResponseBody::Share(
                    wallet.record.share.clone(),
                ))
            }

            CardRequest::FetchWalletList | CardRequest::HealthCheck => {
                let list = self.cards[card.index()]
                    .wallets
                    .iter()
                    .map(|w| WalletListEntry {
                        id: w.record.id,
                        name: w.record.name.clone(),
                        info: w.record.info,
                        word_count: w.record.word_count,
                        locked: w.locked,
                    })
                    .collect();
                CardResponse::ok(CardResponseBody::WalletList(list))
            }

            CardRequest::FetchChallenge { wallet_id } => {
                let pow_target = self.pow_target;
                let card_nonce: [u8; 16] = self.rng.gen_bytes();
                let Some(wallet) = self.find_wallet_mut(card, &wallet_id)
                else {
                    return CardResponse::error(apdu::sw::WALLET_NOT_FOUND);
                };
                if !wallet.locked {
                    return CardResponse::ok(CardResponseBody::Challenge(
                        None,
                    ));
                }
                let challenge =
                    *wallet.challenge.get_or_insert(CardChallenge {
                        target: pow_target,
                        card_nonce,
                        time_to_unlock_secs: 60,
                    });
                CardResponse::ok(CardResponseBody::Challenge(Some(challenge)))
            }

            CardRequest::UnlockWallet {
                wallet_id,
                pin_double_hash,
                solution_nonce,
            } => {
                let fresh_nonce: [u8; 16] = self.rng.gen_bytes();
                let pow_target = self.pow_target;
                let Some(wallet) = self.find_wallet_mut(card, &wallet_id)
                else {
                    return CardResponse::error(apdu::sw::WALLET_NOT_FOUND);
                };
                if !wallet.locked {
                    return CardResponse::ok(CardResponseBody::Done);
                }

                // The PoW must answer the challenge this card handed out.
                let solved = wallet.challenge.is_some_and(|ch| {
                    vault_crypto::pow::verify(
                        &vault_crypto::pow::PowChallenge {
                            card_nonce: ch.card_nonce,
                            target: ch.target,
                        },
                        &solution_nonce,
                    )
                });
                if !solved {
                    // Stale or bogus work: stay locked, rotate the
                    // challenge.
                    wallet.challenge = Some(CardChallenge {
                        target: pow_target,
                        card_nonce: fresh_nonce,
                        time_to_unlock_secs: 60,
                    });
                    return CardResponse::error(apdu::sw::WALLET_LOCKED);
                }

                let pin_ok = match (&wallet.record.pin_double_hash,
                    &pin_double_hash)
                {
                    (None, _) => true,
                    (Some(expected), Some(given)) => expected == given,
                    (Some(_), None) => false,
                };
                if !pin_ok {
                    wallet.attempts_left =
                        wallet.attempts_left.saturating_sub(1);
                    if wallet.attempts_left == 0 {
                        // Unlock attempts exhausted: stay locked, burn the
                        // solved challenge, start a fresh round.
                        wallet.attempts_left = PIN_ATTEMPTS;
                        wallet.challenge = Some(CardChallenge {
                            target: pow_target,
                            card_nonce: fresh_nonce,
                            time_to_unlock_secs: 60,
                        });
                        return CardResponse::error(apdu::sw::WALLET_LOCKED);
                    }
                    // The solved challenge stays valid for a re-try with
                    // a different PIN.
                    return CardResponse::error(apdu::sw::wrong_pin(
                        wallet.attempts_left,
                    ));
                }

                wallet.locked = false;
                wallet.challenge = None;
                wallet.attempts_left = PIN_ATTEMPTS;
                CardResponse::ok(CardResponseBody::Done)
            }

            CardRequest::DeleteShare {
                wallet_id,
                pin_double_hash,
            } => {
                match self.check_pin(card, &wallet_id, pin_double_hash) {
                    Ok(()) => {}
                    Err(sw) => return CardResponse::error(sw),
                }
                self.cards[card.index()]
                    .wallets
                    .retain(|w| w.record.id != wallet_id);
                CardResponse::ok(CardResponseBody::Done)
            }
        }
    }

    /// Shared PIN gate for share access: consumes attempts on mismatch and
    /// locks the wallet when they run out.
    fn check_pin(
        &mut self,
        card: CardNumber,
        wallet_id: &vault_common::wallet::WalletId,
        pin_double_hash: Option<[u8; 32]>,
    ) -> Result<(), u16> {
        let Some(wallet) = self.find_wallet_mut(card, wallet_id) else {
            return Err(apdu::sw::WALLET_NOT_FOUND);
        };
        if wallet.locked {
            return Err(apdu::sw::WALLET_LOCKED);
        }

        let pin_ok = match (&wallet.record.pin_double_hash, &pin_double_hash)
        {
            (None, _) => true,
            (Some(expected), Some(given)) => expected == given,
            (Some(_), None) => false,
        };
        if pin_ok {
            wallet.attempts_left = PIN_ATTEMPTS;
            return Ok(());
        }

        wallet.attempts_left = wallet.attempts_left.saturating_sub(1);
        if wallet.attempts_left == 0 {
            wallet.locked = true;
            // The counter now gates unlock attempts instead.
            let sw = apdu::sw::wrong_pin(0);
            wallet.attempts_left = PIN_ATTEMPTS;
            return Err(sw);
        }
        Err(apdu::sw::wrong_pin(wallet.attempts_left))
    }

    fn find_wallet(
        &self,
        card: CardNumber,
        id: &vault_common::wallet::WalletId,
    ) -> Option<&MockWallet> {
        self.cards[card.index()].wallets.iter().find(|w| w.record.id == *id)
    }

    fn find_wallet_mut(
        &mut self,
        card: CardNumber,
        id: &vault_common::wallet::WalletId,
    ) -> Option<&mut MockWallet> {
        self.cards[card.index()]
            .wallets
            .iter_mut()
            .find(|w| w.record.id == *id)
    }
}
