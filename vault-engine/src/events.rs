//! Event classes and the blocking wait.
//!
//! Four classes feed one bus: P0 (timeout / host abort), UI, USB, NFC.
//! [`EventBus::get_events`] returns exactly one event per call, with class
//! priority P0 ≫ UI > USB > NFC and FIFO order within a class. While a
//! card APDU is in flight the caller disables aborts; a P0 arriving in
//! that window is held in the queue and re-raised by the next wait.

use std::time::Duration;

use bitflags::bitflags;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;
use vault_common::secret::SecretString;

bitflags! {
    /// Which classes a step wants to hear about. P0 is always implied.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct EventClass: u8 {
        const UI = 1 << 0;
        const USB = 1 << 1;
        const NFC = 1 << 2;
    }
}

/// Priority-zero events: the ones that unwind flows.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum P0Event {
    /// The per-step inactivity budget ran out.
    InactivityTimeout,
    /// The host (or the device) requested an abort.
    Abort,
}

/// User input, already decoded by the input drivers.
#[derive(Clone, Debug)]
pub enum UiEvent {
    Confirm,
    Reject,
    ListChoice(u16),
    TextInput(SecretString),
    Skip,
}

/// A framed command from the host.
#[derive(Clone, Debug)]
pub struct UsbEvent {
    pub tag: u16,
    pub payload: Bytes,
}

/// Card field transitions from the NFC front end.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NfcEvent {
    CardDetected,
    CardRemoved,
}

/// The one-of-four event returned by a wait.
#[derive(Clone, Debug)]
pub enum Event {
    P0(P0Event),
    Ui(UiEvent),
    Usb(UsbEvent),
    Nfc(NfcEvent),
}

/// Clonable handles the transports use to post events.
#[derive(Clone)]
pub struct EventSenders {
    p0_tx: mpsc::UnboundedSender<P0Event>,
    ui_tx: mpsc::UnboundedSender<UiEvent>,
    usb_tx: mpsc::UnboundedSender<UsbEvent>,
    nfc_tx: mpsc::UnboundedSender<NfcEvent>,
}

impl EventSenders {
    /// Post a host abort. Never blocks.
    pub fn abort(&self) {
        let _ = self.p0_tx.send(P0Event::Abort);
    }

    pub fn ui(&self, event: UiEvent) {
        let _ = self.ui_tx.send(event);
    }

    pub fn usb(&self, event: UsbEvent) {
        let _ = self.usb_tx.send(event);
    }

    pub fn nfc(&self, event: NfcEvent) {
        let _ = self.nfc_tx.send(event);
    }
}

pub struct EventBus {
    p0_rx: mpsc::UnboundedReceiver<P0Event>,
    ui_rx: mpsc::UnboundedReceiver<UiEvent>,
    usb_rx: mpsc::UnboundedReceiver<UsbEvent>,
    nfc_rx: mpsc::UnboundedReceiver<NfcEvent>,
    /// Keeps every channel open so a `recv` can never observe a close.
    senders: EventSenders,
    abort_disabled: bool,
}

impl EventBus {
    pub fn new() -> Self {
        let (p0_tx, p0_rx) = mpsc::unbounded_channel();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (usb_tx, usb_rx) = mpsc::unbounded_channel();
        let (nfc_tx, nfc_rx) = mpsc::unbounded_channel();
        Self {
            p0_rx,
            ui_rx,
            usb_rx,
            nfc_rx,
            senders: EventSenders {
                p0_tx,
                ui_tx,
                usb_tx,
                nfc_tx,
            },
            abort_disabled: false,
        }
    }

    /// Another set of posting handles.
    pub fn senders(&self) -> EventSenders {
        self.senders.clone()
    }

    /// Stop delivering P0s; they queue instead. Set around card APDUs so a
    /// write isn't torn mid-exchange.
    pub fn disable_abort(&mut self) {
        self.abort_disabled = true;
    }

    /// Resume P0 delivery. Anything queued is re-raised on the next wait.
    pub fn enable_abort(&mut self) {
        self.abort_disabled = false;
    }

    /// Non-blocking look at whether an abort is pending, for compute loops
    /// (PoW) that poll between batches.
    pub fn abort_pending(&mut self) -> bool {
        if self.abort_disabled {
            return false;
        }
        match self.p0_rx.try_recv() {
            Ok(_) => true,
            Err(_) => false,
        }
    }

    /// Block until one event intersecting `mask` (or any P0) is ready.
    ///
    /// Exactly one event is returned per call. Events outside `mask` stay
    /// queued for a later step that subscribes to them.
    pub async fn get_events(
        &mut self,
        mask: EventClass,
        timeout: Duration,
    ) -> Event {
        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        let event = tokio::select! {
            // Priority is the arm order: P0 preempts everything, then
            // UI over USB over NFC.
            biased;

            Some(p0) = self.p0_rx.recv(), if !self.abort_disabled =>
                Event::P0(p0),
            () = &mut sleep, if !self.abort_disabled =>
                Event::P0(P0Event::InactivityTimeout),
            Some(ui) = self.ui_rx.recv(), if mask.contains(EventClass::UI) =>
                Event::Ui(ui),
            Some(usb) = self.usb_rx.recv(), if mask.contains(EventClass::USB) =>
                Event::Usb(usb),
            Some(nfc) = self.nfc_rx.recv(), if mask.contains(EventClass::NFC) =>
                Event::Nfc(nfc),

            // Unreachable: the bus holds a sender for every channel, so a
            // recv can't fail, and aborts are never disabled across a wait
            // with an empty mask.
            else => unreachable!("get_events with nothing to wait on"),
        };
        trace!(?mask, "event delivered");
        event
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const T: Duration = Duration::from_secs(900);

    fn all() -> EventClass {
        EventClass::all()
    }

    #[tokio::test(start_paused = true)]
    async fn ui_beats_usb_beats_nfc() {
        let mut bus = EventBus::new();
        let tx = bus.senders();

        tx.nfc(NfcEvent::CardDetected);
        tx.usb(UsbEvent {
            tag: 1,
            payload: Bytes::new(),
        });
        tx.ui(UiEvent::Confirm);

        assert!(matches!(
            bus.get_events(all(), T).await,
            Event::Ui(UiEvent::Confirm)
        ));
        assert!(matches!(bus.get_events(all(), T).await, Event::Usb(_)));
        assert!(matches!(
            bus.get_events(all(), T).await,
            Event::Nfc(NfcEvent::CardDetected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn p0_preempts_all() {
        let mut bus = EventBus::new();
        let tx = bus.senders();

        tx.ui(UiEvent::Confirm);
        tx.abort();

        assert!(matches!(
            bus.get_events(all(), T).await,
            Event::P0(P0Event::Abort)
        ));
        // The UI event is still queued behind it.
        assert!(matches!(bus.get_events(all(), T).await, Event::Ui(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn masked_classes_stay_queued() {
        let mut bus = EventBus::new();
        let tx = bus.senders();

        tx.nfc(NfcEvent::CardDetected);
        tx.ui(UiEvent::Reject);

        // The step only listens to UI; the NFC event must not be consumed.
        assert!(matches!(
            bus.get_events(EventClass::UI, T).await,
            Event::Ui(UiEvent::Reject)
        ));
        assert!(matches!(
            bus.get_events(EventClass::NFC, T).await,
            Event::Nfc(NfcEvent::CardDetected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_returns_p0() {
        let mut bus = EventBus::new();
        let event = bus.get_events(all(), Duration::from_secs(1)).await;
        assert!(matches!(event, Event::P0(P0Event::InactivityTimeout)));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_is_deferred_while_disabled() {
        let mut bus = EventBus::new();
        let tx = bus.senders();

        bus.disable_abort();
        tx.abort();
        tx.nfc(NfcEvent::CardRemoved);

        // With aborts deferred, the NFC event comes through first and the
        // timeout can't fire either.
        assert!(matches!(
            bus.get_events(EventClass::NFC, T).await,
            Event::Nfc(NfcEvent::CardRemoved)
        ));

        // Once re-enabled, the queued abort is re-raised immediately.
        bus.enable_abort();
        assert!(matches!(
            bus.get_events(all(), T).await,
            Event::P0(P0Event::Abort)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn fifo_within_class() {
        let mut bus = EventBus::new();
        let tx = bus.senders();

        tx.ui(UiEvent::Confirm);
        tx.ui(UiEvent::Reject);
        assert!(matches!(
            bus.get_events(all(), T).await,
            Event::Ui(UiEvent::Confirm)
        ));
        assert!(matches!(
            bus.get_events(all(), T).await,
            Event::Ui(UiEvent::Reject)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn abort_pending_polls_without_blocking() {
        let mut bus = EventBus::new();
        let tx = bus.senders();

        assert!(!bus.abort_pending());
        tx.abort();
        assert!(bus.abort_pending());
        // Consumed by the poll.
        assert!(!bus.abort_pending());
    }
}
